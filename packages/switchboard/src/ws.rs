//! WebSocket transport: each socket becomes a hub connection.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use backplane::{BackplaneError, HubConnection, HubLifetimeManager, HubMessage, TransportError};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::AppState;

/// Frames buffered per socket before sends start failing with backpressure
const OUTBOUND_CAPACITY: usize = 256;

/// Commands a client sends over its socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        group: String,
    },
    Leave {
        group: String,
    },
    SendConnection {
        connection_id: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    SendGroup {
        group: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        except_self: bool,
    },
    SendUser {
        user_id: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    SendAll {
        method: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        except_self: bool,
    },
}

/// Frames written to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected { connection_id: String },
    Invocation { method: String, args: Vec<Value> },
    Error { code: String, message: String },
}

impl ServerFrame {
    fn error(err: &BackplaneError) -> Self {
        ServerFrame::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

/// A socket as seen by the backplane. Writes go through a bounded queue
/// drained by the socket's writer task.
pub struct WsConnection {
    id: String,
    user: Option<String>,
    tx: mpsc::Sender<ServerFrame>,
}

impl WsConnection {
    pub fn new(id: String, user: Option<String>, tx: mpsc::Sender<ServerFrame>) -> Arc<Self> {
        Arc::new(Self { id, user, tx })
    }
}

#[async_trait]
impl HubConnection for WsConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> Option<&str> {
        self.user.as_deref()
    }

    async fn send(&self, message: &HubMessage) -> Result<(), TransportError> {
        let frame = ServerFrame::Invocation {
            method: message.method.clone(),
            args: message.args.clone(),
        };
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub user: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let user = params.user.filter(|u| !u.is_empty());
    ws.on_upgrade(move |socket| handle_socket(socket, user, state))
}

async fn handle_socket(socket: WebSocket, user: Option<String>, state: AppState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);
    let connection = WsConnection::new(connection_id.clone(), user, tx.clone());

    // Writer task: drain queued frames into the socket
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    if let Err(e) = state.hub.on_connected(connection.clone()).await {
        warn!(connection_id = %connection_id, error = %e, "failed to register connection");
        let _ = tx.send(ServerFrame::error(&e)).await;
        // releases the registry's clone of the sender so the writer can finish
        let _ = state.hub.on_disconnected(connection).await;
        drop(tx);
        let _ = writer.await;
        return;
    }
    let _ = tx
        .send(ServerFrame::Connected {
            connection_id: connection_id.clone(),
        })
        .await;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => execute(&state.hub, &connection_id, frame)
                        .await
                        .err()
                        .map(|e| ServerFrame::error(&e)),
                    Err(e) => Some(ServerFrame::Error {
                        code: "invalid_frame".to_string(),
                        message: e.to_string(),
                    }),
                };
                if let Some(frame) = reply {
                    if tx.try_send(frame).is_err() {
                        debug!(connection_id = %connection_id, "dropping error frame, queue full");
                    }
                }
            }
            Message::Binary(_) => {
                debug!("Binary messages not supported");
            }
            Message::Close(_) => {
                info!(connection_id = %connection_id, "WebSocket connection closed");
                break;
            }
            _ => {}
        }
    }

    if let Err(e) = state.hub.on_disconnected(connection).await {
        warn!(connection_id = %connection_id, error = %e, "failed to unregister connection");
    }
    writer.abort();
}

/// Run one client command on behalf of `connection_id`.
pub async fn execute(
    hub: &HubLifetimeManager,
    connection_id: &str,
    frame: ClientFrame,
) -> Result<(), BackplaneError> {
    let own = [connection_id.to_string()];
    match frame {
        ClientFrame::Join { group } => hub.add_to_group(connection_id, &group).await,
        ClientFrame::Leave { group } => hub.remove_from_group(connection_id, &group).await,
        ClientFrame::SendConnection {
            connection_id: target,
            method,
            args,
        } => {
            hub.send_connection(&target, &HubMessage::new(method, args))
                .await
        }
        ClientFrame::SendGroup {
            group,
            method,
            args,
            except_self,
        } => {
            let excluded: &[String] = if except_self { &own } else { &[] };
            hub.send_group_except(&group, &HubMessage::new(method, args), excluded)
                .await
        }
        ClientFrame::SendUser {
            user_id,
            method,
            args,
        } => hub.send_user(&user_id, &HubMessage::new(method, args)).await,
        ClientFrame::SendAll {
            method,
            args,
            except_self,
        } => {
            let excluded: &[String] = if except_self { &own } else { &[] };
            hub.send_all_except(&HubMessage::new(method, args), excluded)
                .await
        }
    }
}
