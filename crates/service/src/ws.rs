use std::{net::SocketAddr, sync::Arc};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::hub::{HubSession, SocketHub};

/// Drive one upgraded WebSocket: register it with the hub, pump outbound
/// frames from the session channel, dispatch inbound text frames, and
/// unregister on close or when `cancel` fires.
pub async fn handle_connection(
    socket: WebSocket,
    hub: Arc<SocketHub>,
    remote_addr: SocketAddr,
    cancel: CancellationToken,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    info!(conn_id = %conn_id, remote = %remote_addr, "ws: connection opened");

    let write_conn_id = conn_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                debug!(conn_id = %write_conn_id, error = %e, "ws: write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    hub.register(HubSession::new(conn_id.clone(), Some(remote_addr), tx))
        .await;

    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            () = cancel.cancelled() => {
                debug!(conn_id = %conn_id, "ws: closing for shutdown");
                break;
            },
        };
        let Some(msg) = msg else {
            break;
        };
        match msg {
            Ok(Message::Text(text)) => hub.dispatch(&conn_id, text.as_str()).await,
            Ok(Message::Binary(_)) => {
                debug!(conn_id = %conn_id, "ws: ignoring binary frame");
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {},
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        }
    }

    // Dropping the session drops its sender, which ends the write loop.
    hub.remove(&conn_id).await;
    if let Err(e) = writer.await
        && e.is_panic()
    {
        warn!(conn_id = %conn_id, "ws: writer task panicked");
    }
    info!(conn_id = %conn_id, "ws: connection closed");
}
