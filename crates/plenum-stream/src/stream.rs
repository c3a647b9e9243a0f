// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The reconnecting push stream.
//!
//! A [`PushStream`] wraps one logical subscription to a server-push
//! endpoint. `open()` spawns a driver task that connects through the
//! transport, feeds every network event into a fresh [`FrameParser`] and
//! dispatches parsed messages to the caller's handlers. Failures run
//! through the reconnect policy first: recoverable ones are absorbed by a
//! backoff-and-retry loop, terminal ones reach the external error handler
//! exactly once and close the stream.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CommunicationError, ErrorClassification, ErrorDescription};
use crate::frame::{FrameEvent, FrameParser, REASON_CONNECTION_LOST, REASON_MALFORMED_RECORD};
use crate::reconnect::{
    BackoffTimeout, DEFAULT_RECONNECTS_BEFORE_CLOSE, ReconnectState, RetryPolicy,
};
use crate::transport::{StreamRequest, StreamingTransport, TransportEvent};

/// Handler invoked for every delivered message.
pub type MessageHandler<T> = Arc<dyn Fn(T, &StreamHandle) + Send + Sync>;

/// Handler invoked once per terminal failure.
pub type ErrorHandler = Arc<dyn Fn(ErrorDescription) + Send + Sync>;

/// Options for building a [`PushStream`].
///
/// `retry` and `backoff` left unset resolve to "always retry" and the
/// default jittered window; the stream factory fills them with policies
/// wired to global auth/offline state instead.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Free-form description shown in log output.
    pub description: Option<String>,
    /// Reconnect attempt ceiling; absolute value is used, 0 disables it,
    /// `None` means the default of 3.
    pub reconnects_before_close: Option<i32>,
    /// Retry decision, re-evaluated on every failure.
    pub retry: Option<RetryPolicy>,
    /// Backoff before each reconnect attempt.
    pub backoff: Option<BackoffTimeout>,
}

impl StreamOptions {
    /// Create empty options; unset fields resolve to defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the description used in log output.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the reconnect attempt ceiling (0 disables it).
    #[must_use]
    pub fn with_reconnects_before_close(mut self, ceiling: i32) -> Self {
        self.reconnects_before_close = Some(ceiling);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the backoff timing.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffTimeout) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// Control handle passed to message handlers.
///
/// Lets a handler close its own stream without holding a reference to the
/// [`PushStream`] itself.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    id: u64,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Id of the stream this handle controls.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Close the stream; late events are dropped.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Object-safe view of a stream, used by the communication manager to
/// open and close streams of different payload types uniformly.
pub trait ManagedStream: Send {
    /// Open the stream; no-op while already open.
    fn open(&mut self);
    /// Close the stream; idempotent.
    fn close(&mut self);
    /// Whether a driver is currently active.
    fn is_open(&self) -> bool;
    /// Stream id.
    fn id(&self) -> u64;
}

/// One logical, possibly-reconnecting subscription to a push endpoint.
pub struct PushStream<T> {
    id: u64,
    description: Option<String>,
    transport: Arc<dyn StreamingTransport>,
    request: StreamRequest,
    reconnects_before_close: i32,
    retry: RetryPolicy,
    backoff: BackoffTimeout,
    message_handler: Option<MessageHandler<T>>,
    error_handler: Option<ErrorHandler>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl<T> PushStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Create a stream in the closed state.
    pub fn new(
        id: u64,
        transport: Arc<dyn StreamingTransport>,
        request: StreamRequest,
        options: StreamOptions,
    ) -> Self {
        Self {
            id,
            description: options.description,
            transport,
            request,
            reconnects_before_close: options
                .reconnects_before_close
                .unwrap_or(DEFAULT_RECONNECTS_BEFORE_CLOSE),
            retry: options.retry.unwrap_or_else(RetryPolicy::always),
            backoff: options.backoff.unwrap_or_default(),
            message_handler: None,
            error_handler: None,
            cancel: CancellationToken::new(),
            driver: None,
        }
    }

    /// Stream id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Description used in log output.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The retry policy in effect.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Set the message handler.
    #[must_use]
    pub fn on_message(mut self, handler: impl Fn(T, &StreamHandle) + Send + Sync + 'static) -> Self {
        self.message_handler = Some(Arc::new(handler));
        self
    }

    /// Set the terminal error handler, replacing any previous one.
    #[must_use]
    pub fn on_error(mut self, handler: impl Fn(ErrorDescription) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Whether a driver task is currently active.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .driver
                .as_ref()
                .is_some_and(|driver| !driver.is_finished())
    }

    /// Open the stream. No-op while a driver is already active.
    pub fn open(&mut self) {
        if self.is_open() {
            return;
        }

        let cancel = CancellationToken::new();
        self.cancel = cancel.clone();

        let driver = Driver {
            id: self.id,
            description: self.description.clone(),
            transport: self.transport.clone(),
            request: self.request.clone(),
            retry: self.retry.clone(),
            backoff: self.backoff.clone(),
            reconnects: ReconnectState::new(self.reconnects_before_close),
            message_handler: self.message_handler.clone(),
            error_handler: self.error_handler.clone(),
            cancel,
        };
        debug!(stream_id = self.id, description = ?self.description, "stream opened");
        self.driver = Some(tokio::spawn(driver.run()));
    }

    /// Close the stream. Idempotent; in-flight events are dropped.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.driver = None;
        debug!(stream_id = self.id, "stream closed");
    }

    /// Close and immediately reopen.
    pub fn reconnect(&mut self) {
        self.close();
        self.open();
    }

    /// Drive a single connection inline and settle with the first message
    /// or the first error.
    ///
    /// Single-action mode: a finish event with buffered content is the
    /// message, and failures bypass the reconnect backoff entirely.
    pub async fn into_single(self) -> std::result::Result<T, ErrorDescription> {
        let mut parser = FrameParser::single_action();
        let mut events = self
            .transport
            .open(&self.request)
            .await
            .map_err(connection_failure)?;

        while let Some(event) = events.recv().await {
            let finished = matches!(event, TransportEvent::Finish { .. });
            for frame in parser.read(&event) {
                match frame {
                    FrameEvent::Message(value) => return decode_payload(value),
                    FrameEvent::Error(desc) => return Err(desc),
                }
            }
            if finished {
                break;
            }
        }

        Err(parser
            .connection_interrupted()
            .and_then(|frame| match frame {
                FrameEvent::Error(desc) => Some(desc),
                FrameEvent::Message(_) => None,
            })
            .unwrap_or_else(|| connection_failure(crate::error::StreamError::ConnectionFailed(
                "stream ended before a message arrived".to_string(),
            ))))
    }
}

impl<T> Drop for PushStream<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> ManagedStream for PushStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn open(&mut self) {
        PushStream::open(self);
    }

    fn close(&mut self) {
        PushStream::close(self);
    }

    fn is_open(&self) -> bool {
        PushStream::is_open(self)
    }

    fn id(&self) -> u64 {
        self.id
    }
}

fn connection_failure(error: crate::error::StreamError) -> ErrorDescription {
    ErrorDescription::new(
        ErrorClassification::Unknown,
        CommunicationError::unknown(error.to_string()),
        REASON_CONNECTION_LOST,
    )
}

fn decode_payload<T: DeserializeOwned>(
    value: serde_json::Value,
) -> std::result::Result<T, ErrorDescription> {
    serde_json::from_value(value).map_err(|e| {
        ErrorDescription::new(
            ErrorClassification::Unknown,
            CommunicationError::invalid_message(e.to_string()),
            REASON_MALFORMED_RECORD,
        )
    })
}

enum ConnectionOutcome {
    /// The stream was closed while the connection was live.
    Cancelled,
    /// The connection attempt ended in a failure episode.
    Failed(ErrorDescription),
}

/// Background task driving one stream: connect, parse, dispatch, retry.
struct Driver<T> {
    id: u64,
    description: Option<String>,
    transport: Arc<dyn StreamingTransport>,
    request: StreamRequest,
    retry: RetryPolicy,
    backoff: BackoffTimeout,
    reconnects: ReconnectState,
    message_handler: Option<MessageHandler<T>>,
    error_handler: Option<ErrorHandler>,
    cancel: CancellationToken,
}

impl<T> Driver<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn run(mut self) {
        let handle = StreamHandle {
            id: self.id,
            cancel: self.cancel.clone(),
        };

        loop {
            let failure = match self.run_connection(&handle).await {
                ConnectionOutcome::Cancelled => return,
                ConnectionOutcome::Failed(desc) => desc,
            };

            if self.retry.should_retry() && self.reconnects.can_reconnect() {
                let delay = self.backoff.delay_for_attempt(self.reconnects.attempts());
                debug!(
                    stream_id = self.id,
                    description = ?self.description,
                    attempt = self.reconnects.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "stream failed, reconnecting after backoff"
                );
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return,
                    _ = sleep(delay) => {}
                }
                self.reconnects.record_attempt();
                continue;
            }

            warn!(
                stream_id = self.id,
                description = ?self.description,
                attempts = self.reconnects.attempts(),
                error = %failure,
                "stream failed permanently"
            );
            if let Some(handler) = &self.error_handler {
                handler(failure);
            }
            self.cancel.cancel();
            return;
        }
    }

    /// One connection attempt. Returns when the connection fails, the
    /// parser reports an error, or the stream is closed.
    async fn run_connection(&mut self, handle: &StreamHandle) -> ConnectionOutcome {
        let mut parser = FrameParser::new();
        let mut events = match self.transport.open(&self.request).await {
            Ok(events) => events,
            Err(e) => return ConnectionOutcome::Failed(connection_failure(e)),
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ConnectionOutcome::Cancelled,
                event = events.recv() => event,
            };

            let Some(event) = event else {
                // Channel dropped without a finish or failure event.
                return match parser.connection_interrupted() {
                    Some(FrameEvent::Error(desc)) => ConnectionOutcome::Failed(desc),
                    _ => ConnectionOutcome::Cancelled,
                };
            };

            for frame in parser.read(&event) {
                if self.cancel.is_cancelled() {
                    return ConnectionOutcome::Cancelled;
                }
                match frame {
                    FrameEvent::Message(value) => {
                        // A live message proves the connection is healthy.
                        self.reconnects.reset();
                        match decode_payload::<T>(value) {
                            Ok(data) => {
                                if let Some(handler) = &self.message_handler {
                                    handler(data, handle);
                                }
                            }
                            Err(desc) => return ConnectionOutcome::Failed(desc),
                        }
                    }
                    FrameEvent::Error(desc) => return ConnectionOutcome::Failed(desc),
                }
            }

            if matches!(event, TransportEvent::Finish { .. } | TransportEvent::Failed { .. }) {
                // The parser swallowed the terminal event (error already
                // reported this episode); treat the episode as done.
                return match parser.connection_interrupted() {
                    Some(FrameEvent::Error(desc)) => ConnectionOutcome::Failed(desc),
                    _ => ConnectionOutcome::Cancelled,
                };
            }
        }
    }
}
