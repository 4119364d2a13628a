//! Typed websocket fan-out for one agent. Connections register an outbound
//! channel; broadcasts serialize once and go to every open connection.
//! Project-update kinds additionally accumulate into a running summary the
//! client can replay on reconnect.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsMessageType {
    AgentConnected,
    GenerationStarted,
    GenerationComplete,
    PhaseGenerating,
    PhaseGenerated,
    PhaseImplementing,
    PhaseValidating,
    PhaseValidated,
    PhaseImplemented,
    FileGenerating,
    FileChunkGenerated,
    FileGenerated,
    FileRegenerating,
    FileRegenerated,
    StaticAnalysisResults,
    RuntimeErrorFound,
    DeterministicCodeFixStarted,
    DeterministicCodeFixCompleted,
    DeploymentStarted,
    DeploymentCompleted,
    DeploymentFailed,
    CommandExecuting,
    ConversationResponse,
    ConversationCleared,
    GithubExportStarted,
    GithubExportProgress,
    GithubExportCompleted,
    GithubExportError,
    ScreenshotCaptureStarted,
    ScreenshotCaptureSuccess,
    ScreenshotCaptureError,
    RateLimitError,
    Error,
}

impl WsMessageType {
    /// Kinds whose payload is also appended to the project-update
    /// accumulator.
    fn is_project_update(self) -> bool {
        matches!(
            self,
            WsMessageType::PhaseGenerated
                | WsMessageType::PhaseImplemented
                | WsMessageType::DeploymentCompleted
                | WsMessageType::GenerationComplete
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub message_type: WsMessageType,
    pub data: serde_json::Value,
}

#[derive(Default)]
pub struct WsHub {
    connections: Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    project_updates: Mutex<Vec<String>>,
}

impl WsHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; the caller forwards everything received on
    /// the returned channel to its websocket.
    pub fn add_connection(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.connections.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn remove_connection(&self, connection_id: Uuid) {
        self.connections.lock().unwrap().remove(&connection_id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn broadcast(&self, message_type: WsMessageType, data: serde_json::Value) {
        let payload = match serde_json::to_string(&WsEnvelope { message_type, data: data.clone() }) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("Failed to serialize websocket message: {err}");
                return;
            }
        };

        if message_type.is_project_update() {
            self.project_updates.lock().unwrap().push(payload.clone());
        }

        let mut connections = self.connections.lock().unwrap();
        connections.retain(|_, tx| tx.send(payload.clone()).is_ok());
    }

    /// Directed send to a single connection.
    pub fn send(
        &self,
        connection_id: Uuid,
        message_type: WsMessageType,
        data: serde_json::Value,
    ) -> bool {
        let payload = match serde_json::to_string(&WsEnvelope { message_type, data }) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("Failed to serialize websocket message: {err}");
                return false;
            }
        };
        let mut connections = self.connections.lock().unwrap();
        match connections.get(&connection_id) {
            Some(tx) => {
                if tx.send(payload).is_ok() {
                    true
                } else {
                    connections.remove(&connection_id);
                    false
                }
            }
            None => false,
        }
    }

    pub fn drain_project_updates(&self) -> Vec<String> {
        std::mem::take(&mut *self.project_updates.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_every_connection() {
        let hub = WsHub::new();
        let (_, mut rx1) = hub.add_connection();
        let (_, mut rx2) = hub.add_connection();

        hub.broadcast(
            WsMessageType::PhaseGenerating,
            serde_json::json!({"phase": "Core"}),
        );

        let first = rx1.try_recv().unwrap();
        let second = rx2.try_recv().unwrap();
        assert_eq!(first, second);
        assert!(first.contains("PHASE_GENERATING"));
    }

    #[test]
    fn closed_connections_are_pruned_on_broadcast() {
        let hub = WsHub::new();
        let (_, rx) = hub.add_connection();
        drop(rx);
        hub.broadcast(WsMessageType::Error, serde_json::json!({}));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn project_update_kinds_accumulate() {
        let hub = WsHub::new();
        hub.broadcast(
            WsMessageType::PhaseImplemented,
            serde_json::json!({"phase": "Core"}),
        );
        hub.broadcast(WsMessageType::FileGenerating, serde_json::json!({}));
        let updates = hub.drain_project_updates();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].contains("PHASE_IMPLEMENTED"));
        assert!(hub.drain_project_updates().is_empty());
    }

    #[test]
    fn directed_send_targets_one_connection() {
        let hub = WsHub::new();
        let (id1, mut rx1) = hub.add_connection();
        let (_, mut rx2) = hub.add_connection();
        assert!(hub.send(id1, WsMessageType::ConversationResponse, serde_json::json!({})));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }
}
