// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OmpError>;

/// Bytes of a bad reply included in a `MalformedReply` preview
const PREVIEW_LENGTH: usize = 100;

#[derive(Debug, Error)]
pub enum OmpError {
    /// A required operation field was missing or out of range.
    /// Raised before anything is queued.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Not connected")]
    NotConnected,

    /// `position` is the byte offset of a syntax error, or `None` when the
    /// markup parsed but its content is not a valid reply.
    #[error(
        "Malformed reply{}: {message}{}",
        .position.map(|p| format!(" at byte {p}")).unwrap_or_default(),
        .buffer_preview.as_deref().unwrap_or("")
    )]
    MalformedReply {
        message: String,
        position: Option<usize>,
        buffer_preview: Option<String>,
    },

    /// The manager answered with a non-2xx status.
    #[error("{status_text} (status {status})")]
    ProtocolFailure { status: String, status_text: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout after {duration:?} while {operation}")]
    Timeout { operation: String, duration: Duration },

    #[error("Encode error: {0}")]
    Encode(String),
}

impl OmpError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a malformed-reply error with context
    pub fn malformed(message: impl Into<String>, position: usize) -> Self {
        Self::MalformedReply {
            message: message.into(),
            position: Some(position),
            buffer_preview: None,
        }
    }

    /// Well-formed markup that is not the reply a command expects
    pub fn unexpected_reply(message: impl Into<String>) -> Self {
        Self::MalformedReply {
            message: message.into(),
            position: None,
            buffer_preview: None,
        }
    }

    /// Create a malformed-reply error with buffer preview for debugging
    pub fn malformed_with_preview(message: impl Into<String>, position: usize, buffer: &[u8]) -> Self {
        let preview_len = buffer.len().min(PREVIEW_LENGTH);
        let hex_preview = buffer[..preview_len]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ");

        Self::MalformedReply {
            message: message.into(),
            position: Some(position),
            buffer_preview: Some(format!(" (buffer preview: {})", hex_preview)),
        }
    }

    pub fn protocol(status: impl Into<String>, status_text: impl Into<String>) -> Self {
        Self::ProtocolFailure {
            status: status.into(),
            status_text: status_text.into(),
        }
    }

    /// The manager's own message for a protocol failure
    pub fn status_text(&self) -> Option<&str> {
        match self {
            Self::ProtocolFailure { status_text, .. } => Some(status_text),
            _ => None,
        }
    }
}
