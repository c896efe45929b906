//! WebSocket server implementation
//!
//! Provides a WebSocket server that listens on a configurable port, runs
//! editor commands against the workspace sessions and relays transcript and
//! status changes to every connected editor.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::handler::SessionHandler;
use super::protocol::{ClientMessage, ServerMessage};
use crate::toolchain::SessionKind;

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self { bind, port }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// WebSocket server for editor connections
pub struct WebSocketServer {
    config: ServerConfig,
    handler: Arc<SessionHandler>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: ServerConfig, handler: SessionHandler) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler: Arc::new(handler),
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the WebSocket server
    ///
    /// Listens for incoming connections and handles them concurrently. On
    /// shutdown the REPL and reactor are stopped before returning.
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("WebSocket server listening on ws://{}/ws", addr);
        info!("Serving workspace {}", self.handler.workspace().display());

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let handler = Arc::clone(&self.handler);
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, handler, shutdown_rx).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        info!("Stopping running sessions...");
        self.handler.dispose().await;

        Ok(())
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<SessionHandler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    info!("New connection from {}", peer_addr);

    // Upgrade to WebSocket
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let mut repl_transcript = handler.subscribe_transcript(SessionKind::Repl);
    let mut reactor_transcript = handler.subscribe_transcript(SessionKind::Reactor);
    let mut repl_events = handler.subscribe_events(SessionKind::Repl);
    let mut reactor_events = handler.subscribe_events(SessionKind::Reactor);

    // Send welcome message and the current session states
    let welcome = ServerMessage::welcome(Some(handler.workspace().display().to_string()));
    ws_sender.send(to_frame(&welcome)?).await?;
    for kind in [SessionKind::Repl, SessionKind::Reactor] {
        ws_sender.send(to_frame(&handler.status(kind))?).await?;
        for message in handler.transcript_replay(kind) {
            ws_sender.send(to_frame(&message)?).await?;
        }
    }
    debug!("Sent welcome message to {}", peer_addr);

    // Message handling loop
    loop {
        let outgoing: Vec<ServerMessage> = tokio::select! {
            // Receive messages from client
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received message from {}: {}", peer_addr, text);
                        handle_message(&text, &handler).await
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Received binary message from {} ({} bytes), ignoring", peer_addr, data.len());
                        continue;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} requested close", peer_addr);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Connection closed by {}", peer_addr);
                        break;
                    }
                }
            }
            event = repl_transcript.recv() => {
                relayed(event, peer_addr)
                    .map(|event| ServerMessage::transcript(SessionKind::Repl, event))
                    .into_iter()
                    .collect()
            }
            event = reactor_transcript.recv() => {
                relayed(event, peer_addr)
                    .map(|event| ServerMessage::transcript(SessionKind::Reactor, event))
                    .into_iter()
                    .collect()
            }
            event = repl_events.recv() => {
                relayed(event, peer_addr)
                    .map(|event| handler.status(event.kind()))
                    .into_iter()
                    .collect()
            }
            event = reactor_events.recv() => {
                relayed(event, peer_addr)
                    .map(|event| handler.status(event.kind()))
                    .into_iter()
                    .collect()
            }
            // Handle shutdown signal
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, closing connection to {}", peer_addr);
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        };

        for message in &outgoing {
            ws_sender.send(to_frame(message)?).await?;
        }
    }

    info!("Connection from {} closed", peer_addr);
    Ok(())
}

/// Parse a client message and run it
async fn handle_message(text: &str, handler: &SessionHandler) -> Vec<ServerMessage> {
    match ClientMessage::from_json(text) {
        Ok(message) => handler.handle(message).await,
        Err(e) => {
            warn!("Rejected client message: {}", e);
            vec![ServerMessage::from(e)]
        }
    }
}

fn to_frame(message: &ServerMessage) -> anyhow::Result<Message> {
    Ok(Message::Text(serde_json::to_string(message)?))
}

/// Unwrap a relayed broadcast value; a slow connection skips what it missed
fn relayed<T>(result: Result<T, RecvError>, peer_addr: SocketAddr) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(RecvError::Lagged(skipped)) => {
            warn!("Connection {} lagged, skipped {} updates", peer_addr, skipped);
            None
        }
        Err(RecvError::Closed) => None,
    }
}
