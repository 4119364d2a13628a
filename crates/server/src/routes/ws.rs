//! Agent-scoped websocket: the server owns the agent; connections receive
//! every broadcast from the agent's hub and can drive generation with a
//! small set of typed client messages.

use agent::{core::UserImage, ws::WsMessageType};
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use deployment::Deployment;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::DeploymentImpl;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Generate,
    Cancel,
    UserRequest {
        text: String,
        #[serde(default)]
        images: Vec<ClientImage>,
    },
}

#[derive(Debug, Deserialize)]
struct ClientImage {
    filename: String,
    data_base64: String,
}

pub async fn agent_ws(
    ws: WebSocketUpgrade,
    Path(agent_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_agent_ws(socket, deployment, agent_id).await {
            tracing::warn!("agent WS closed: {}", e);
        }
    })
}

async fn handle_agent_ws(
    socket: WebSocket,
    deployment: DeploymentImpl,
    agent_id: Uuid,
) -> anyhow::Result<()> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let (connection_id, mut outbound) = agent.ws_hub().add_connection();
    let (mut sender, mut receiver) = socket.split();

    // Full state snapshot on connect so a reconnecting client can render
    // immediately.
    let snapshot = agent.state_snapshot().await;
    let (template_name, template_manifest) = agent.template_info().await;
    let connected = serde_json::to_string(&agent::ws::WsEnvelope {
        message_type: WsMessageType::AgentConnected,
        data: json!({
            "state": snapshot,
            "template": { "name": template_name, "manifest": template_manifest },
        }),
    })?;
    sender.send(Message::Text(connected.into())).await?;

    loop {
        tokio::select! {
            broadcast = outbound.recv() => {
                match broadcast {
                    Some(payload) => {
                        if sender.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&agent, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!("websocket receive error: {err}");
                        break;
                    }
                }
            }
        }
    }

    agent.ws_hub().remove_connection(connection_id);
    let _ = sender.close().await;
    Ok(())
}

async fn handle_client_message(agent: &std::sync::Arc<agent::core::Agent>, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!("Ignoring malformed client message: {err}");
            return;
        }
    };
    match message {
        ClientMessage::Generate => {
            agent.generate_all_files().await;
        }
        ClientMessage::Cancel => agent.cancel_current_inference(),
        ClientMessage::UserRequest { text, images } => {
            let images = images
                .into_iter()
                .map(|image| UserImage {
                    filename: image.filename,
                    data_base64: image.data_base64,
                })
                .collect();
            agent.queue_user_request(text, images).await;
            agent.generate_all_files().await;
        }
    }
}
