//! Protocol message definitions
//!
//! Defines the message types exchanged between editor clients and the bridge
//! server. All messages are JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::facade::{DocumentSnapshot, StatusButton};
use crate::output::TranscriptEvent;
use crate::process::{SessionError, SessionState};
use crate::toolchain::SessionKind;

/// Current protocol version
/// Increment when making breaking changes to message format
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum text length sent to the REPL (1MB)
pub const MAX_TEXT_LENGTH: usize = 1024 * 1024;

/// Maximum path length
pub const MAX_PATH_LENGTH: usize = 4096;

/// Maximum language id length
pub const MAX_LANGUAGE_ID_LENGTH: usize = 64;

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Client Messages
// ============================================================================

/// Messages sent from an editor to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Connection keepalive ping
    Ping {
        /// Sequence number for tracking round-trip time
        seq: u64,
    },

    /// Start the REPL
    ReplStart {
        /// File or directory to resolve the project from
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },

    /// Stop the REPL
    ReplStop,

    /// Send arbitrary text from a document
    ReplSend { document: DocumentSnapshot, text: String },

    /// Send the line under the cursor
    ReplSendLine { document: DocumentSnapshot },

    /// Send the current selection
    ReplSendSelection { document: DocumentSnapshot },

    /// Send the whole document
    ReplSendFile { document: DocumentSnapshot },

    /// Start the reactor
    ReactorStart,

    /// Stop the reactor
    ReactorStop,

    /// Request the state of both sessions
    GetStatus,
}

impl ClientMessage {
    /// Parse and validate a client message from JSON
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let message: Self = serde_json::from_str(json)?;
        message.validate()?;
        Ok(message)
    }

    /// Name of the command, as used in `ack` replies
    pub fn command(&self) -> &'static str {
        match self {
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::ReplStart { .. } => "repl_start",
            ClientMessage::ReplStop => "repl_stop",
            ClientMessage::ReplSend { .. } => "repl_send",
            ClientMessage::ReplSendLine { .. } => "repl_send_line",
            ClientMessage::ReplSendSelection { .. } => "repl_send_selection",
            ClientMessage::ReplSendFile { .. } => "repl_send_file",
            ClientMessage::ReactorStart => "reactor_start",
            ClientMessage::ReactorStop => "reactor_stop",
            ClientMessage::GetStatus => "get_status",
        }
    }

    /// Validate message contents
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            ClientMessage::ReplStart { path: Some(path) } => {
                if path.is_empty() {
                    return Err(ProtocolError::ValidationError(
                        "path cannot be empty when specified".to_string(),
                    ));
                }
                validate_path_length(path.len())
            }

            ClientMessage::ReplSend { document, text } => {
                validate_document(document)?;
                if text.len() > MAX_TEXT_LENGTH {
                    return Err(ProtocolError::ValidationError(format!(
                        "text exceeds maximum length of {} bytes",
                        MAX_TEXT_LENGTH
                    )));
                }
                Ok(())
            }

            ClientMessage::ReplSendLine { document }
            | ClientMessage::ReplSendSelection { document }
            | ClientMessage::ReplSendFile { document } => validate_document(document),

            _ => Ok(()),
        }
    }

    /// Create a Ping message
    #[cfg(test)]
    pub fn ping(seq: u64) -> Self {
        ClientMessage::Ping { seq }
    }

    /// Create a ReplStart message
    #[cfg(test)]
    pub fn repl_start(path: Option<impl Into<String>>) -> Self {
        ClientMessage::ReplStart {
            path: path.map(Into::into),
        }
    }

    /// Create a ReplSend message
    #[cfg(test)]
    pub fn repl_send(document: DocumentSnapshot, text: impl Into<String>) -> Self {
        ClientMessage::ReplSend {
            document,
            text: text.into(),
        }
    }
}

fn validate_path_length(len: usize) -> ProtocolResult<()> {
    if len > MAX_PATH_LENGTH {
        return Err(ProtocolError::ValidationError(format!(
            "path exceeds maximum length of {} characters",
            MAX_PATH_LENGTH
        )));
    }
    Ok(())
}

fn validate_document(document: &DocumentSnapshot) -> ProtocolResult<()> {
    if document.language_id.is_empty() {
        return Err(ProtocolError::ValidationError(
            "language_id cannot be empty".to_string(),
        ));
    }
    if document.language_id.len() > MAX_LANGUAGE_ID_LENGTH {
        return Err(ProtocolError::ValidationError(format!(
            "language_id exceeds maximum length of {} characters",
            MAX_LANGUAGE_ID_LENGTH
        )));
    }
    if let Some(file_name) = &document.file_name {
        validate_path_length(file_name.as_os_str().len())?;
    }
    if document.text.len() > MAX_TEXT_LENGTH {
        return Err(ProtocolError::ValidationError(format!(
            "document exceeds maximum length of {} bytes",
            MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

// ============================================================================
// Server Messages
// ============================================================================

/// Messages sent from the server to editors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Welcome message sent on connection
    Welcome {
        /// Server protocol version
        version: u32,
        /// Workspace the server manages
        #[serde(skip_serializing_if = "Option::is_none")]
        workspace: Option<String>,
    },

    /// Response to Ping
    Pong {
        /// Echo back the sequence number
        seq: u64,
    },

    /// Command completed
    Ack { command: String },

    /// Informational message for the user
    Notice { message: String },

    /// Change to a session transcript
    Transcript {
        session: SessionKind,
        event: TranscriptEvent,
    },

    /// Lifecycle state of a session
    Status {
        session: SessionKind,
        state: SessionState,
        /// Stop button, reactor only
        #[serde(skip_serializing_if = "Option::is_none")]
        button: Option<StatusButton>,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code for programmatic handling
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
    /// No Elm project above the given path
    ProjectNotFound,
    /// Project manifest could not be read
    InvalidManifest,
    /// Failed to spawn the toolchain
    LaunchFailed,
    /// Session is not running
    NotRunning,
    /// Session is starting or stopping
    Busy,
    /// Session went away while sending
    InputClosed,
    /// Document is not an Elm document
    UnsupportedDocument,
    /// Internal server error
    InternalError,
}

impl From<&SessionError> for ErrorCode {
    fn from(err: &SessionError) -> Self {
        use crate::toolchain::ResolveError;

        match err {
            SessionError::Resolve(ResolveError::ProjectNotFound(_)) => ErrorCode::ProjectNotFound,
            SessionError::Resolve(ResolveError::ManifestUnreadable { .. }) => {
                ErrorCode::InvalidManifest
            }
            SessionError::Launch { .. } => ErrorCode::LaunchFailed,
            SessionError::NotRunning(_) => ErrorCode::NotRunning,
            SessionError::Busy(_) => ErrorCode::Busy,
            SessionError::InputClosed(_) => ErrorCode::InputClosed,
            SessionError::UnsupportedDocument(_) => ErrorCode::UnsupportedDocument,
        }
    }
}

impl ServerMessage {
    /// Create a Welcome message
    pub fn welcome(workspace: Option<String>) -> Self {
        ServerMessage::Welcome {
            version: PROTOCOL_VERSION,
            workspace,
        }
    }

    /// Create a Pong message
    pub fn pong(seq: u64) -> Self {
        ServerMessage::Pong { seq }
    }

    pub fn ack(command: impl Into<String>) -> Self {
        ServerMessage::Ack {
            command: command.into(),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        ServerMessage::Notice {
            message: message.into(),
        }
    }

    pub fn transcript(session: SessionKind, event: TranscriptEvent) -> Self {
        ServerMessage::Transcript { session, event }
    }

    /// Create an Error message with code
    pub fn error_with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code: Some(code),
        }
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<ProtocolError> for ServerMessage {
    fn from(err: ProtocolError) -> Self {
        ServerMessage::error_with_code(err.to_string(), ErrorCode::InvalidMessage)
    }
}

impl From<&SessionError> for ServerMessage {
    fn from(err: &SessionError) -> Self {
        ServerMessage::error_with_code(err.to_string(), ErrorCode::from(err))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    // -------------------------------------------------------------------------
    // Client Message Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_ping_serialization() {
        let msg = ClientMessage::ping(42);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"seq\":42"));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_repl_start_path_is_optional() {
        let parsed = ClientMessage::from_json(r#"{"type": "repl_start"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::ReplStart { path: None });

        let msg = ClientMessage::repl_start(Some("/work/app/src/Main.elm"));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"path\":\"/work/app/src/Main.elm\""));
        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_repl_send_serialization() {
        let document =
            DocumentSnapshot::elm("x = 1").with_file_name(PathBuf::from("/work/app/Main.elm"));
        let msg = ClientMessage::repl_send(document, "x");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"repl_send\""));
        assert!(json.contains("\"language_id\":\"elm\""));

        let parsed = ClientMessage::from_json(&json).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.command(), "repl_send");
    }

    #[test]
    fn test_unit_messages_parse() {
        for (json, expected) in [
            (r#"{"type":"repl_stop"}"#, ClientMessage::ReplStop),
            (r#"{"type":"reactor_start"}"#, ClientMessage::ReactorStart),
            (r#"{"type":"reactor_stop"}"#, ClientMessage::ReactorStop),
            (r#"{"type":"get_status"}"#, ClientMessage::GetStatus),
        ] {
            assert_eq!(ClientMessage::from_json(json).unwrap(), expected);
        }
    }

    #[test]
    fn test_send_line_parses_cursor_and_selection() {
        let json = r#"{
            "type": "repl_send_selection",
            "document": {
                "language_id": "elm",
                "file_name": "/work/app/Main.elm",
                "text": "a\nb",
                "cursor_line": 1,
                "selection": {"start": 0, "end": 1}
            }
        }"#;
        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::ReplSendSelection { document } => {
                assert_eq!(document.cursor_line, 1);
                assert_eq!(document, DocumentSnapshot::elm("a\nb")
                    .with_file_name("/work/app/Main.elm")
                    .with_cursor_line(1)
                    .with_selection(0, 1));
            }
            other => panic!("Expected ReplSendSelection, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = ClientMessage::from_json(r#"{"type":"repl_restart"}"#);
        assert!(matches!(result, Err(ProtocolError::SerializationError(_))));
    }

    // -------------------------------------------------------------------------
    // Validation Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_empty_path() {
        let msg = ClientMessage::ReplStart {
            path: Some(String::new()),
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_validate_path_too_long() {
        let msg = ClientMessage::repl_start(Some("a".repeat(MAX_PATH_LENGTH + 1)));
        assert!(msg.validate().is_err());

        let document = DocumentSnapshot::elm("x").with_file_name("b".repeat(MAX_PATH_LENGTH + 1));
        assert!(ClientMessage::ReplSendFile { document }.validate().is_err());
    }

    #[test]
    fn test_validate_text_too_long() {
        let msg = ClientMessage::repl_send(DocumentSnapshot::elm(""), "x".repeat(MAX_TEXT_LENGTH + 1));
        assert!(msg.validate().is_err());

        let document = DocumentSnapshot::elm("x".repeat(MAX_TEXT_LENGTH + 1));
        assert!(ClientMessage::ReplSendLine { document }.validate().is_err());
    }

    #[test]
    fn test_validate_language_id() {
        let mut document = DocumentSnapshot::elm("x");
        document.language_id = String::new();
        assert!(ClientMessage::ReplSendFile {
            document: document.clone()
        }
        .validate()
        .is_err());

        document.language_id = "l".repeat(MAX_LANGUAGE_ID_LENGTH + 1);
        assert!(ClientMessage::ReplSendFile { document }.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_non_elm_language() {
        let mut document = DocumentSnapshot::elm("x");
        document.language_id = "javascript".to_string();
        assert!(ClientMessage::ReplSendFile { document }.validate().is_ok());
    }

    // -------------------------------------------------------------------------
    // Server Message Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_welcome_serialization() {
        let msg = ServerMessage::welcome(Some("/work/app".to_string()));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"welcome\""));
        assert!(json.contains(&format!("\"version\":{}", PROTOCOL_VERSION)));

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_transcript_serialization() {
        let msg = ServerMessage::transcript(
            SessionKind::Repl,
            TranscriptEvent::Appended {
                text: "2 : number\n".to_string(),
            },
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"transcript\""));
        assert!(json.contains("\"session\":\"repl\""));
        assert!(json.contains("\"kind\":\"appended\""));

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_status_serialization() {
        let msg = ServerMessage::Status {
            session: SessionKind::Reactor,
            state: SessionState::Running,
            button: Some(StatusButton {
                text: "$(primitive-square)".to_string(),
                tooltip: "Stop reactor".to_string(),
                command: "elm.reactorStop".to_string(),
                visible: true,
            }),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"session\":\"reactor\""));
        assert!(json.contains("\"state\":\"running\""));
        assert!(json.contains("\"command\":\"elm.reactorStop\""));

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_error_serialization() {
        let msg = ServerMessage::error_with_code("Something went wrong", ErrorCode::InternalError);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"message\":\"Something went wrong\""));
        assert!(json.contains("\"code\":\"internal_error\""));

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_session_error_codes() {
        let err = SessionError::NotRunning(SessionKind::Repl);
        assert_eq!(
            ServerMessage::from(&err),
            ServerMessage::error_with_code("Elm REPL is not running", ErrorCode::NotRunning)
        );
        assert_eq!(
            ErrorCode::from(&SessionError::UnsupportedDocument("css".to_string())),
            ErrorCode::UnsupportedDocument
        );
        assert_eq!(
            ErrorCode::from(&SessionError::Resolve(
                crate::toolchain::ResolveError::ProjectNotFound(PathBuf::from("/tmp"))
            )),
            ErrorCode::ProjectNotFound
        );
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err = ProtocolError::ValidationError("bad".to_string());
        match ServerMessage::from(err) {
            ServerMessage::Error { code, .. } => assert_eq!(code, Some(ErrorCode::InvalidMessage)),
            other => panic!("Expected Error, got {:?}", other),
        }
    }
}
