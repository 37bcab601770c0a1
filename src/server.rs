use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::messages::{ClientMessage, ServerMessage};
use crate::session::{ChatSession, SessionSettings};
use crate::store::SharedStore;

type Sessions = Arc<RwLock<HashMap<String, ChatSession>>>;

#[derive(Clone)]
pub struct Server {
    store: SharedStore,
    settings: SessionSettings,
    sessions: Sessions,
}

impl Server {
    pub fn new(store: SharedStore, settings: SessionSettings) -> Self {
        Server {
            store,
            settings,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn handle_connection(&self, ws: WebSocket) {
        let connection_id = Uuid::new_v4().to_string();
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let session = self.open_session(&connection_id, tx.clone()).await;

        let server = self.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_rx.next().await {
                match result {
                    Ok(msg) => {
                        if msg.is_close() {
                            break;
                        }
                        let Ok(text) = msg.to_str() else {
                            continue;
                        };
                        Self::handle_frame(text, &session, &tx).await;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }

            server.handle_disconnect(&connection_id).await;
        });

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode server message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::text(text)).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        });
    }

    async fn open_session(
        &self,
        connection_id: &str,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> ChatSession {
        let session = ChatSession::start(self.store.clone(), self.settings.clone(), tx).await;
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(connection_id.to_string(), session.clone());
        }
        info!("New connection {}", connection_id);
        session
    }

    async fn handle_frame(
        text: &str,
        session: &ChatSession,
        tx: &mpsc::UnboundedSender<ServerMessage>,
    ) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(client_msg) => Self::handle_client_message(client_msg, session).await,
            Err(e) => {
                debug!("Unparseable frame: {}", e);
                let _ = tx.send(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                });
            }
        }
    }

    async fn handle_client_message(message: ClientMessage, session: &ChatSession) {
        match message {
            ClientMessage::FindChat => {
                session.find_partner().await;
            }
            ClientMessage::Send { content } => {
                session.send(&content).await;
            }
            ClientMessage::LoadMore => {
                session.load_more().await;
            }
        }
    }

    /// Runs the session's teardown, the server-side stand-in for page unload.
    async fn handle_disconnect(&self, connection_id: &str) {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(connection_id)
        };
        if let Some(session) = session {
            session.teardown().await;
        }
        info!("Connection {} closed", connection_id);
    }

    /// Tears down every open session.
    pub async fn shutdown(&self) {
        let sessions: Vec<ChatSession> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        info!("Closing {} open sessions", sessions.len());
        for session in sessions {
            session.teardown().await;
        }
    }
}
