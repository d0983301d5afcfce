//! JSON frames exchanged over dashboard WebSocket sessions.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Actions sent by the server.
pub mod actions {
    pub const SERVER_METADATA: &str = "server_metadata";
    pub const AVAILABLE_DASHBOARDS: &str = "available_dashboards";
    pub const DASHBOARD_SELECTED: &str = "dashboard_selected";
    pub const DASHBOARD_INITIALIZING: &str = "dashboard_initializing";
    pub const WORKSPACE_LOADED: &str = "workspace_loaded";
    pub const ERROR: &str = "error";
}

/// Actions accepted from clients.
pub mod requests {
    pub const GET_SERVER_METADATA: &str = "get_server_metadata";
    pub const GET_AVAILABLE_DASHBOARDS: &str = "get_available_dashboards";
    pub const SELECT_DASHBOARD: &str = "select_dashboard";
}

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// A frame pushed to one or more clients. `seq` is stamped by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub action: String,
    #[serde(default)]
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl ServerEvent {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            seq: 0,
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            actions::ERROR,
            serde_json::json!({ "message": message.into() }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_payload_is_optional() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"get_server_metadata"}"#).unwrap();
        assert_eq!(msg.action, requests::GET_SERVER_METADATA);
        assert!(msg.payload.is_null());
    }

    #[test]
    fn null_payload_is_omitted() {
        let raw = serde_json::to_string(&ServerEvent::new("ping", Value::Null)).unwrap();
        assert_eq!(raw, r#"{"action":"ping","seq":0}"#);
    }

    #[test]
    fn error_event_carries_message() {
        let ev = ServerEvent::error("boom");
        assert_eq!(ev.action, actions::ERROR);
        assert_eq!(ev.payload["message"], "boom");
    }
}
