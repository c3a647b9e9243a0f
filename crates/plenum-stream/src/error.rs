// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error model for streaming connections.
//!
//! Distinguishes application-level errors sent by the server inside the
//! stream body ([`CommunicationError`]) from transport-level failures
//! ([`StreamError`]). Every failure episode that reaches a caller is
//! packaged as an [`ErrorDescription`].

use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Error kind used when a record is not valid JSON.
pub const KIND_INVALID_MESSAGE: &str = "Invalid message";

/// Error kind used when no server-supplied category is available.
pub const KIND_UNKNOWN_ERROR: &str = "Unknown Error";

/// A structured error emitted by the server within the stream body.
///
/// Wire shape is `{ "type": string, "msg": string }`, optionally wrapped as
/// `{ "error": { "type": string, "msg": string } }`. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommunicationError {
    /// Server-supplied category, or a synthesized kind for local failures.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable error message.
    #[serde(rename = "msg")]
    pub message: String,
}

impl CommunicationError {
    /// Create a new communication error.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Synthesize an error for a record that failed to parse as JSON.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(KIND_INVALID_MESSAGE, message)
    }

    /// Synthesize an error with no server-supplied category.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(KIND_UNKNOWN_ERROR, message)
    }

    /// Extract a communication error from a decoded JSON record.
    ///
    /// Accepts both the bare `{type, msg}` shape and the `{error: {...}}`
    /// wrapper. Returns `None` if the record matches neither.
    pub fn from_wire(value: &Value) -> Option<Self> {
        #[derive(Deserialize)]
        struct Wrapped {
            error: CommunicationError,
        }

        if let Ok(err) = serde_json::from_value::<CommunicationError>(value.clone()) {
            return Some(err);
        }
        serde_json::from_value::<Wrapped>(value.clone())
            .ok()
            .map(|w| w.error)
    }
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Coarse failure classification derived from the last seen HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// HTTP 4xx.
    Client,
    /// HTTP 5xx or a network-level failure.
    Server,
    /// No status code available.
    Unknown,
}

impl ErrorClassification {
    /// Classify from an optional HTTP status code.
    #[must_use]
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(s) if (400..500).contains(&s) => Self::Client,
            Some(s) if s >= 500 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One failure episode, as delivered to a stream's error handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDescription {
    /// Classification derived from the last seen HTTP status.
    pub classification: ErrorClassification,
    /// The underlying error.
    pub error: CommunicationError,
    /// Human-readable cause, e.g. "reported by server".
    pub reason: String,
}

impl ErrorDescription {
    /// Create a new error description.
    pub fn new(
        classification: ErrorClassification,
        error: CommunicationError,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            classification,
            error,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ErrorDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.error, self.classification, self.reason
        )
    }
}

/// Transport and lifecycle errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The underlying request could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Response body was not valid UTF-8.
    #[error("stream body was not valid UTF-8")]
    InvalidEncoding,

    /// Reconnect ceiling reached.
    #[error("reconnect limit exceeded after {attempts} attempts")]
    ReconnectLimitExceeded {
        /// Number of reconnect attempts made.
        attempts: u32,
    },

    /// HTTP client error.
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Type alias for wire-level results.
pub type Result<T> = std::result::Result<T, StreamError>;
