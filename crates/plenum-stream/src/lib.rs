// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! plenum-stream - Long-lived HTTP streaming client with reconnect.
//!
//! This crate receives continuous server push data (model updates,
//! notifications) over a chunked HTTP response instead of WebSockets. It
//! combines incremental parsing of newline-delimited JSON over a
//! progressively-filling body, separation of transport-level failures from
//! application-level error payloads, and an automatic reconnect policy
//! with jittered backoff and an attempt ceiling.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use plenum_stream::{
//!     HttpTransport, Method, PushStream, StreamOptions, StreamRequest,
//! };
//!
//! let transport = Arc::new(HttpTransport::new());
//! let request = StreamRequest::new(Method::Get, "https://example.com/system/stream");
//!
//! let mut stream = PushStream::<serde_json::Value>::new(1, transport, request,
//!         StreamOptions::new().with_description("model updates"))
//!     .on_message(|update, _stream| {
//!         println!("update: {update}");
//!     })
//!     .on_error(|failure| {
//!         eprintln!("stream gave up: {failure}");
//!     });
//!
//! stream.open();
//! // ... stream.close() on shutdown
//! ```
//!
//! # Single-action mode
//!
//! A stream used to obtain exactly one message is driven inline and
//! settles like a request/response call:
//!
//! ```ignore
//! let value: serde_json::Value = PushStream::new(2, transport, request,
//!     StreamOptions::new()).into_single().await?;
//! ```
//!
//! # Failure routing
//!
//! Every failure - transport errors, application error payloads sent
//! within the body, malformed records, unexpected end of stream - reaches
//! the reconnect decision first. Recoverable failures are retried after a
//! randomized backoff (default 2-5s, ceiling 3 attempts, reset by any
//! delivered message) without involving the caller. Terminal failures
//! invoke the error handler exactly once and close the stream.

mod error;
mod frame;
mod reconnect;
mod stream;
mod transport;

pub use error::{
    CommunicationError, ErrorClassification, ErrorDescription, KIND_INVALID_MESSAGE,
    KIND_UNKNOWN_ERROR, Result, StreamError,
};
pub use frame::{
    FrameEvent, FrameParser, REASON_CONNECTION_LOST, REASON_MALFORMED_RECORD,
    REASON_REPORTED_BY_SERVER, REASON_STREAM_CLOSED,
};
pub use reconnect::{
    BackoffTimeout, DEFAULT_BACKOFF_MAX, DEFAULT_BACKOFF_MIN, DEFAULT_RECONNECTS_BEFORE_CLOSE,
    ReconnectState, RetryPolicy,
};
pub use stream::{
    ErrorHandler, ManagedStream, MessageHandler, PushStream, StreamHandle, StreamOptions,
};
pub use transport::{
    HttpTransport, Method, ProbeResponse, StreamRequest, StreamingTransport, TransportEvent,
};
