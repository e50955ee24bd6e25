// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for client connections.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload, both
//! directions, over a persistent duplex connection. Every message
//! carries a `type` discriminator.

use ab_core::{AgentSessionRecord, Session};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Maximum message size (16 MB); terminal output is chunked well below
/// this.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Message from a client to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Attach this connection's terminal stream to a session.
    TerminalAttach {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "tmuxTarget")]
        tmux_target: String,
        cols: u16,
        rows: u16,
    },

    /// Keystrokes for the attached session.
    TerminalInput {
        #[serde(rename = "sessionId")]
        session_id: String,
        data: String,
    },

    TerminalResize {
        #[serde(rename = "sessionId")]
        session_id: String,
        cols: u16,
        rows: u16,
    },

    /// Stop routing terminal output; the proxy stays warm.
    TerminalDetach {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Client left scrollback view.
    TmuxCancelCopyMode {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Spawn a new managed tmux window.
    SessionCreate {
        #[serde(rename = "projectPath")]
        project_path: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        command: Option<String>,
    },

    SessionKill {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    SessionRename {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "newName")]
        new_name: String,
    },

    /// Re-enumerate windows now instead of waiting for the next poll.
    SessionRefresh,

    /// Pin or unpin an agent session for resurrection.
    SessionPin {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "isPinned")]
        is_pinned: bool,
    },
}

impl ClientMessage {
    /// Known `type` values, used to distinguish unknown message types
    /// from malformed payloads.
    pub const KNOWN_TYPES: [&'static str; 10] = [
        "terminal-attach",
        "terminal-input",
        "terminal-resize",
        "terminal-detach",
        "tmux-cancel-copy-mode",
        "session-create",
        "session-kill",
        "session-rename",
        "session-refresh",
        "session-pin",
    ];
}

/// Message from the server to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full slice of live sessions.
    Sessions { sessions: Vec<Session> },

    /// Snapshot of persistent agent-session records.
    AgentSessions { sessions: Vec<AgentSessionRecord> },

    SessionUpdate { session: Session },

    SessionCreated { session: Session },

    SessionRemoved {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Terminal attachment is live.
    TerminalReady {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Raw terminal bytes for the attached session.
    TerminalOutput {
        #[serde(rename = "sessionId")]
        session_id: String,
        data: String,
    },

    TerminalError {
        #[serde(rename = "sessionId")]
        session_id: String,
        code: String,
        message: String,
        retryable: bool,
    },

    SessionPinResult {
        ok: bool,
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    KillFailed {
        #[serde(rename = "sessionId")]
        session_id: String,
        message: String,
    },

    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Parse an inbound frame, mapping failures to the protocol's error
/// replies: malformed JSON yields "Invalid message payload", a JSON
/// object with an unrecognized `type` yields "Unknown message type".
pub fn parse_client_message(bytes: &[u8]) -> Result<ClientMessage, ServerMessage> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(_) => return Err(ServerMessage::error("Invalid message payload")),
    };
    let known = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(|t| ClientMessage::KNOWN_TYPES.contains(&t))
        .unwrap_or(false);
    if !known {
        return Err(ServerMessage::error("Unknown message type"));
    }
    serde_json::from_value(value).map_err(|_| ServerMessage::error("Invalid message payload"))
}

/// Encode a message to JSON bytes (without length prefix)
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(json)
}

/// Decode a message from wire format
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read a length-prefixed message from an async reader
pub async fn read_message<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed message to an async writer
pub async fn write_message<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    let len = data.len();
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    writer.write_all(&(len as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode and write one server message.
pub async fn write_server_message<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    message: &ServerMessage,
) -> Result<(), ProtocolError> {
    let data = encode(message)?;
    write_message(writer, &data).await
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
