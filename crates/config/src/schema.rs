/// Config schema for the local service (API listener, dashboard startup, shutdown).
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default port the API server listens on.
pub const DEFAULT_API_PORT: u16 = 9033;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub api: ApiConfig,
    pub dashboard: DashboardConfig,
    pub shutdown: ShutdownConfig,
}

/// API server listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind. `127.0.0.1` keeps the service local-only.
    pub bind: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: DEFAULT_API_PORT,
        }
    }
}

impl ApiConfig {
    /// `bind:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.bind.contains(':') && !self.bind.starts_with('[') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }
}

/// Whether API serving waits for the dashboard server to finish initializing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardReadiness {
    /// Dashboard init and API serving proceed independently.
    #[default]
    Concurrent,
    /// API serving starts only after dashboard init succeeds.
    AwaitReady,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub readiness: DashboardReadiness,
    /// Upper bound on dashboard init when `readiness = "await_ready"`.
    pub ready_timeout_secs: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            readiness: DashboardReadiness::Concurrent,
            ready_timeout_secs: 30,
        }
    }
}

impl DashboardConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long running tasks get to drain before they are aborted.
    pub grace_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}
