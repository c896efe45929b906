//! WebSocket server module
//!
//! Handles WebSocket connections from editor clients and routes their
//! commands to the workspace sessions.

mod handler;
mod protocol;
mod websocket;

pub use handler::SessionHandler;
pub use websocket::{ServerConfig, WebSocketServer};
