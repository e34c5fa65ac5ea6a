use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use crate::orchestrator::session::{Completion, RunInfo};
use crate::orchestrator::{RunEvent, ServerStarted};
use crate::workspace::Target;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    TargetAdded {
        target: Target,
    },
    RunStarted {
        run_id: Uuid,
        command: String,
        target: String,
    },
    RunOutput {
        run_id: Uuid,
        lines: Vec<String>,
    },
    RunFinished {
        run: RunInfo,
        completion: Completion,
    },
    DocsStarted {
        server: ServerStarted,
    },
    DocsFailed {
        target: String,
        error: String,
    },
}

impl From<RunEvent> for WsMessage {
    fn from(event: RunEvent) -> Self {
        match event {
            RunEvent::Lines { run_id, lines } => WsMessage::RunOutput { run_id, lines },
            RunEvent::Finished { run, completion } => WsMessage::RunFinished { run, completion },
            RunEvent::DocsStarted(server) => WsMessage::DocsStarted { server },
            RunEvent::DocsFailed { target, error } => WsMessage::DocsFailed { target, error },
        }
    }
}

pub async fn ws_handler_with_sender(
    ws: WebSocketUpgrade,
    tx: broadcast::Sender<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket_with_sender(socket, tx))
}

async fn handle_socket_with_sender(socket: WebSocket, tx: broadcast::Sender<String>) {
    let (sender, receiver) = socket.split();
    let rx = tx.subscribe();
    run_socket_loop(sender, receiver, rx).await;
}

/// Forward broadcast events to one client, with ping/pong keepalive.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("WebSocket client missed pong, closing");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Clients resync from GET /api/session.
                        tracing::warn!(skipped, "WebSocket client lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Serialize and fan out to every connected client.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json); // Ignore error if no receivers
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize WsMessage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CommandCategory;
    use std::path::PathBuf;

    #[test]
    fn test_ws_message_run_output_serialization() {
        let msg = WsMessage::RunOutput {
            run_id: Uuid::nil(),
            lines: vec!["hello\n".to_string()],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"RunOutput\""));
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"lines\":[\"hello\\n\"]"));
    }

    #[test]
    fn test_ws_message_run_finished_serialization() {
        let run = RunInfo {
            run_id: Uuid::nil(),
            command_name: "Overview".into(),
            category: CommandCategory::Analysis,
            target: "app".into(),
            target_path: PathBuf::from("workspace/app"),
        };
        let msg = WsMessage::RunFinished {
            run,
            completion: Completion::Failed { exit_code: 3 },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"RunFinished\""));
        assert!(json.contains("\"result\":\"failed\""));
        assert!(json.contains("\"exit_code\":3"));
        assert!(json.contains("\"category\":\"analysis\""));
    }

    #[test]
    fn test_run_events_map_to_messages() {
        let started = ServerStarted {
            port: 8005,
            pid: 42,
            url: "http://localhost:8005".into(),
            replaced: None,
        };
        let msg: WsMessage = RunEvent::DocsStarted(started).into();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"DocsStarted\""));
        assert!(json.contains("\"url\":\"http://localhost:8005\""));

        let msg: WsMessage = RunEvent::DocsFailed {
            target: "app".into(),
            error: "boom".into(),
        }
        .into();
        assert!(matches!(msg, WsMessage::DocsFailed { .. }));
    }

    #[test]
    fn test_broadcast_message_no_receivers_does_not_panic() {
        let (tx, _) = broadcast::channel::<String>(16);
        let msg = WsMessage::DocsFailed {
            target: "x".into(),
            error: "y".into(),
        };
        broadcast_message(&tx, &msg);
    }

    #[test]
    fn test_broadcast_message_reaches_receiver() {
        let (tx, mut rx) = broadcast::channel::<String>(16);
        let msg = WsMessage::RunStarted {
            run_id: Uuid::nil(),
            command: "Overview".into(),
            target: "app".into(),
        };
        broadcast_message(&tx, &msg);
        let received = rx.try_recv().unwrap();
        assert!(received.contains("\"type\":\"RunStarted\""));
        assert!(received.contains("\"command\":\"Overview\""));
    }
}
