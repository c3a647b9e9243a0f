// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Incremental parser for newline-delimited JSON stream bodies.
//!
//! The transport delivers the response body as a cumulative, monotonically
//! growing text buffer. [`FrameParser::read`] scans forward from the last
//! checked offset only, so a byte is never examined twice and a record is
//! never emitted twice, no matter how the input is chunked.
//!
//! A header with status >= 400 switches the parser into error-tracking
//! mode: the body is no longer record-split, the first complete record (or
//! the finish event) is taken as the authoritative error payload, and any
//! further body content is ignored.

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{CommunicationError, ErrorClassification, ErrorDescription};
use crate::transport::TransportEvent;

/// Reason attached to application errors found inside the stream body.
pub const REASON_REPORTED_BY_SERVER: &str = "reported by server";

/// Reason attached when a subscription stream ends unexpectedly.
pub const REASON_STREAM_CLOSED: &str = "stream was closed";

/// Reason attached to records that fail to parse as JSON.
pub const REASON_MALFORMED_RECORD: &str = "malformed record";

/// Reason attached to transport-level failures.
pub const REASON_CONNECTION_LOST: &str = "connection lost";

/// One parsed outcome from the stream body.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// A complete application payload record.
    Message(Value),
    /// An error: application-level, malformed, transport, or termination.
    Error(ErrorDescription),
}

/// Incremental newline-delimited JSON parser for one connection attempt.
///
/// `read` must be called with events in arrival order; the parser keeps
/// offsets into the cumulative buffer and never re-scans earlier bytes.
/// At most one [`FrameEvent::Error`] is ever produced per parser instance.
#[derive(Debug, Default)]
pub struct FrameParser {
    status: Option<u16>,
    error_mode: bool,
    single_action: bool,
    /// Byte offset up to which the buffer has been scanned for newlines.
    checked_until: usize,
    /// Byte offset where the current (incomplete) record starts.
    record_start: usize,
    messages_emitted: usize,
    error_reported: bool,
}

impl FrameParser {
    /// Create a parser for a multi-message subscription stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser expecting exactly one message.
    ///
    /// In this mode a finish event with buffered content is the final
    /// record rather than an unexpected termination.
    #[must_use]
    pub fn single_action() -> Self {
        Self {
            single_action: true,
            ..Self::default()
        }
    }

    /// Last HTTP status seen on this connection, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Number of messages emitted so far.
    #[must_use]
    pub fn messages_emitted(&self) -> usize {
        self.messages_emitted
    }

    /// Feed one transport event, returning all frames it completed.
    pub fn read(&mut self, event: &TransportEvent) -> Vec<FrameEvent> {
        match event {
            TransportEvent::Header { status } => {
                self.status = Some(*status);
                if *status >= 400 {
                    debug!(status, "stream entered error mode");
                    self.error_mode = true;
                }
                Vec::new()
            }
            TransportEvent::Progress { text, .. } => {
                if self.error_mode {
                    self.read_error_progress(text)
                } else {
                    self.read_progress(text)
                }
            }
            TransportEvent::Finish { text } => self.read_finish(text.as_deref()),
            TransportEvent::Failed { message } => self
                .report(
                    self.transport_classification(),
                    CommunicationError::unknown(message.clone()),
                    REASON_CONNECTION_LOST,
                )
                .into_iter()
                .collect(),
        }
    }

    /// Synthesize the error for a connection dropped without a finish or
    /// failure event, honoring the first-error-wins guard.
    pub fn connection_interrupted(&mut self) -> Option<FrameEvent> {
        self.report(
            self.transport_classification(),
            CommunicationError::unknown("connection interrupted"),
            REASON_CONNECTION_LOST,
        )
    }

    fn read_progress(&mut self, text: &str) -> Vec<FrameEvent> {
        let bytes = text.as_bytes();
        let mut out = Vec::new();

        while let Some(offset) = bytes[self.checked_until.min(bytes.len())..]
            .iter()
            .position(|b| *b == b'\n')
        {
            let newline = self.checked_until + offset;
            let record = &text[self.record_start..newline];
            self.checked_until = newline + 1;
            self.record_start = newline + 1;
            trace!(len = record.len(), "record complete");
            if let Some(frame) = self.decode_record(record) {
                out.push(frame);
            }
        }
        self.checked_until = bytes.len();
        out
    }

    fn read_error_progress(&mut self, text: &str) -> Vec<FrameEvent> {
        let bytes = text.as_bytes();
        if self.error_reported {
            self.checked_until = bytes.len();
            return Vec::new();
        }

        // First complete record is the authoritative error payload.
        if let Some(offset) = bytes[self.checked_until.min(bytes.len())..]
            .iter()
            .position(|b| *b == b'\n')
        {
            let newline = self.checked_until + offset;
            let body = text[..newline].to_string();
            self.checked_until = bytes.len();
            return self.decode_error_body(&body).into_iter().collect();
        }
        self.checked_until = bytes.len();
        Vec::new()
    }

    fn read_finish(&mut self, text: Option<&str>) -> Vec<FrameEvent> {
        if self.error_mode {
            if self.error_reported {
                return Vec::new();
            }
            let body = text.unwrap_or("");
            let body = body.strip_suffix('\n').unwrap_or(body);
            return self.decode_error_body(body).into_iter().collect();
        }

        if self.single_action {
            let rest = match text {
                Some(t) if self.record_start < t.len() => &t[self.record_start..],
                _ => "",
            };
            let rest = rest.strip_suffix('\n').unwrap_or(rest);
            if !rest.is_empty() {
                return self.decode_record(rest).into_iter().collect();
            }
            if self.messages_emitted > 0 {
                return Vec::new();
            }
            // The single expected message never arrived.
            return self
                .report(
                    self.termination_classification(),
                    CommunicationError::unknown("stream ended without a message"),
                    REASON_STREAM_CLOSED,
                )
                .into_iter()
                .collect();
        }

        // A subscription stream is not supposed to end at all.
        self.report(
            self.termination_classification(),
            CommunicationError::unknown("stream was closed by the server"),
            REASON_STREAM_CLOSED,
        )
        .into_iter()
        .collect()
    }

    fn decode_record(&mut self, record: &str) -> Option<FrameEvent> {
        match serde_json::from_str::<Value>(record) {
            Ok(value) => {
                if let Some(error) = CommunicationError::from_wire(&value) {
                    self.report(
                        ErrorClassification::from_status(self.status),
                        error,
                        REASON_REPORTED_BY_SERVER,
                    )
                } else {
                    self.messages_emitted += 1;
                    Some(FrameEvent::Message(value))
                }
            }
            Err(e) => {
                debug!(error = %e, "record failed to parse as JSON");
                self.report(
                    ErrorClassification::from_status(self.status),
                    CommunicationError::invalid_message(record),
                    REASON_MALFORMED_RECORD,
                )
            }
        }
    }

    fn decode_error_body(&mut self, body: &str) -> Option<FrameEvent> {
        let error = serde_json::from_str::<Value>(body)
            .ok()
            .as_ref()
            .and_then(CommunicationError::from_wire)
            .unwrap_or_else(|| CommunicationError::unknown(body));
        self.report(
            ErrorClassification::from_status(self.status),
            error,
            REASON_REPORTED_BY_SERVER,
        )
    }

    /// First-error-wins: only the first failure of a connection attempt is
    /// reported, so one underlying failure cannot trigger two reconnects.
    fn report(
        &mut self,
        classification: ErrorClassification,
        error: CommunicationError,
        reason: &str,
    ) -> Option<FrameEvent> {
        if self.error_reported {
            return None;
        }
        self.error_reported = true;
        Some(FrameEvent::Error(ErrorDescription::new(
            classification,
            error,
            reason,
        )))
    }

    /// Network failures without a status are Unknown; with a non-4xx
    /// status they count against the server.
    fn transport_classification(&self) -> ErrorClassification {
        match self.status {
            None => ErrorClassification::Unknown,
            Some(s) if (400..500).contains(&s) => ErrorClassification::Client,
            Some(_) => ErrorClassification::Server,
        }
    }

    /// An ended subscription stream is a server-side anomaly unless the
    /// status already classifies as a client error.
    fn termination_classification(&self) -> ErrorClassification {
        match self.status {
            Some(s) if (400..500).contains(&s) => ErrorClassification::Client,
            _ => ErrorClassification::Server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header(status: u16) -> TransportEvent {
        TransportEvent::Header { status }
    }

    fn progress(text: &str) -> TransportEvent {
        TransportEvent::Progress {
            text: text.to_string(),
            loaded: text.len(),
        }
    }

    fn finish(text: Option<&str>) -> TransportEvent {
        TransportEvent::Finish {
            text: text.map(str::to_string),
        }
    }

    fn messages(frames: &[FrameEvent]) -> Vec<Value> {
        frames
            .iter()
            .filter_map(|f| match f {
                FrameEvent::Message(v) => Some(v.clone()),
                FrameEvent::Error(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_records_split_on_newlines() {
        let mut parser = FrameParser::new();
        parser.read(&header(200));

        let frames = parser.read(&progress("{\"a\":1}\n{\"b\":2}\n"));
        assert_eq!(messages(&frames), vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn test_chunk_boundaries_do_not_affect_records() {
        // Same concatenated body, three different chunkings.
        let body = "{\"a\":1}\n{\"b\":2}\n{\"c\":3}\n";
        let chunkings: &[&[usize]] = &[
            &[body.len()],        // all at once
            &[3, 9, 10, 20, 24],  // split mid-record
            &[
                1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22,
                23, 24,
            ], // byte at a time
        ];

        for cuts in chunkings {
            let mut parser = FrameParser::new();
            parser.read(&header(200));
            let mut seen = Vec::new();
            for cut in *cuts {
                let frames = parser.read(&progress(&body[..*cut]));
                seen.extend(messages(&frames));
            }
            assert_eq!(
                seen,
                vec![json!({"a": 1}), json!({"b": 2}), json!({"c": 3})],
                "chunking {cuts:?} changed the record sequence"
            );
        }
    }

    #[test]
    fn test_no_rescan_of_unchanged_bytes() {
        let mut parser = FrameParser::new();
        parser.read(&header(200));

        let frames = parser.read(&progress("{\"a\":1}\n"));
        assert_eq!(messages(&frames).len(), 1);

        // Same buffer delivered again: nothing new to scan.
        assert!(parser.read(&progress("{\"a\":1}\n")).is_empty());
        // Growing buffer re-delivers old bytes; only the new record shows.
        let frames = parser.read(&progress("{\"a\":1}\n{\"b\":2}\n"));
        assert_eq!(messages(&frames), vec![json!({"b": 2})]);
    }

    #[test]
    fn test_partial_record_is_held_back() {
        let mut parser = FrameParser::new();
        parser.read(&header(200));

        assert!(parser.read(&progress("{\"a\"")).is_empty());
        assert!(parser.read(&progress("{\"a\":1")).is_empty());
        let frames = parser.read(&progress("{\"a\":1}\n"));
        assert_eq!(messages(&frames), vec![json!({"a": 1})]);
    }

    #[test]
    fn test_error_record_inside_stream() {
        let mut parser = FrameParser::new();
        parser.read(&header(200));

        let frames = parser.read(&progress("{\"type\":\"auth\",\"msg\":\"expired\"}\n"));
        assert_eq!(frames.len(), 1);
        let FrameEvent::Error(desc) = &frames[0] else {
            panic!("expected error frame");
        };
        assert_eq!(desc.error.kind, "auth");
        assert_eq!(desc.reason, REASON_REPORTED_BY_SERVER);
        // Status 200 gives no classification.
        assert_eq!(desc.classification, ErrorClassification::Unknown);
    }

    #[test]
    fn test_wrapped_error_record() {
        let mut parser = FrameParser::new();
        parser.read(&header(200));

        let frames =
            parser.read(&progress("{\"error\":{\"type\":\"quota\",\"msg\":\"limit\"}}\n"));
        assert_eq!(frames.len(), 1);
        let FrameEvent::Error(desc) = &frames[0] else {
            panic!("expected error frame");
        };
        assert_eq!(desc.error.kind, "quota");
    }

    #[test]
    fn test_malformed_record() {
        let mut parser = FrameParser::new();
        parser.read(&header(200));

        let frames = parser.read(&progress("not json\n"));
        assert_eq!(frames.len(), 1);
        let FrameEvent::Error(desc) = &frames[0] else {
            panic!("expected error frame");
        };
        assert_eq!(desc.error.kind, "Invalid message");
        assert_eq!(desc.error.message, "not json");
        assert_eq!(desc.classification, ErrorClassification::Unknown);
    }

    #[test]
    fn test_malformed_record_with_client_status() {
        let mut parser = FrameParser::new();
        // 404 puts the parser in error mode; body is raw error text.
        parser.read(&header(404));

        let frames = parser.read(&progress("not json\n"));
        assert_eq!(frames.len(), 1);
        let FrameEvent::Error(desc) = &frames[0] else {
            panic!("expected error frame");
        };
        assert_eq!(desc.classification, ErrorClassification::Client);
        assert_eq!(desc.error.kind, "Unknown Error");
    }

    #[test]
    fn test_error_mode_parses_first_record_as_error_shape() {
        let mut parser = FrameParser::new();
        parser.read(&header(500));

        let frames = parser.read(&progress("{\"type\":\"X\",\"msg\":\"boom\"}\n"));
        assert_eq!(frames.len(), 1);
        let FrameEvent::Error(desc) = &frames[0] else {
            panic!("expected error frame");
        };
        assert_eq!(desc.classification, ErrorClassification::Server);
        assert_eq!(desc.error.kind, "X");
        assert_eq!(desc.error.message, "boom");
        assert_eq!(desc.reason, REASON_REPORTED_BY_SERVER);
    }

    #[test]
    fn test_error_mode_later_records_are_ignored() {
        let mut parser = FrameParser::new();
        parser.read(&header(503));

        let first = parser.read(&progress("{\"type\":\"a\",\"msg\":\"1\"}\n"));
        assert_eq!(first.len(), 1);
        let second =
            parser.read(&progress("{\"type\":\"a\",\"msg\":\"1\"}\n{\"type\":\"b\",\"msg\":\"2\"}\n"));
        assert!(second.is_empty());
        assert!(parser.read(&finish(None)).is_empty());
    }

    #[test]
    fn test_error_mode_body_only_on_finish() {
        let mut parser = FrameParser::new();
        parser.read(&header(502));
        assert!(parser.read(&progress("gateway error")).is_empty());

        let frames = parser.read(&finish(Some("gateway error")));
        assert_eq!(frames.len(), 1);
        let FrameEvent::Error(desc) = &frames[0] else {
            panic!("expected error frame");
        };
        assert_eq!(desc.error.kind, "Unknown Error");
        assert_eq!(desc.error.message, "gateway error");
        assert_eq!(desc.classification, ErrorClassification::Server);
    }

    #[test]
    fn test_unexpected_finish_is_an_error() {
        let mut parser = FrameParser::new();
        parser.read(&header(200));
        parser.read(&progress("{\"a\":1}\n"));

        let frames = parser.read(&finish(Some("{\"a\":1}\n")));
        assert_eq!(frames.len(), 1);
        let FrameEvent::Error(desc) = &frames[0] else {
            panic!("expected error frame");
        };
        assert_eq!(desc.reason, REASON_STREAM_CLOSED);
        assert_eq!(desc.classification, ErrorClassification::Server);
    }

    #[test]
    fn test_single_action_finish_is_the_message() {
        let mut parser = FrameParser::single_action();
        parser.read(&header(200));

        let frames = parser.read(&finish(Some("{\"result\":42}")));
        assert_eq!(messages(&frames), vec![json!({"result": 42})]);
    }

    #[test]
    fn test_single_action_finish_with_error_shape() {
        let mut parser = FrameParser::single_action();
        parser.read(&header(200));

        let frames = parser.read(&finish(Some("{\"type\":\"denied\",\"msg\":\"no\"}")));
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], FrameEvent::Error(_)));
    }

    #[test]
    fn test_single_action_empty_finish_after_message() {
        let mut parser = FrameParser::single_action();
        parser.read(&header(200));
        let frames = parser.read(&progress("{\"result\":1}\n"));
        assert_eq!(messages(&frames).len(), 1);

        // Message already delivered through a progress event.
        assert!(parser.read(&finish(Some("{\"result\":1}\n"))).is_empty());
    }

    #[test]
    fn test_single_action_empty_finish_without_message() {
        let mut parser = FrameParser::single_action();
        parser.read(&header(200));

        let frames = parser.read(&finish(None));
        assert_eq!(frames.len(), 1);
        let FrameEvent::Error(desc) = &frames[0] else {
            panic!("expected error frame");
        };
        assert_eq!(desc.reason, REASON_STREAM_CLOSED);
    }

    #[test]
    fn test_first_error_wins() {
        let mut parser = FrameParser::new();
        parser.read(&header(200));

        let frames = parser.read(&progress("garbage\n{\"type\":\"x\",\"msg\":\"y\"}\n"));
        let errors = frames
            .iter()
            .filter(|f| matches!(f, FrameEvent::Error(_)))
            .count();
        assert_eq!(errors, 1);

        // The subsequent termination is also swallowed.
        assert!(parser.read(&finish(None)).is_empty());
        assert!(parser.connection_interrupted().is_none());
    }

    #[test]
    fn test_transport_failure_without_header() {
        let mut parser = FrameParser::new();
        let frames = parser.read(&TransportEvent::Failed {
            message: "connection reset".to_string(),
        });
        assert_eq!(frames.len(), 1);
        let FrameEvent::Error(desc) = &frames[0] else {
            panic!("expected error frame");
        };
        assert_eq!(desc.classification, ErrorClassification::Unknown);
        assert_eq!(desc.reason, REASON_CONNECTION_LOST);
    }

    #[test]
    fn test_transport_failure_with_ok_status() {
        let mut parser = FrameParser::new();
        parser.read(&header(200));
        let frames = parser.read(&TransportEvent::Failed {
            message: "connection reset".to_string(),
        });
        let FrameEvent::Error(desc) = &frames[0] else {
            panic!("expected error frame");
        };
        assert_eq!(desc.classification, ErrorClassification::Server);
    }

    #[test]
    fn test_messages_after_error_still_flow() {
        // Only errors are deduplicated; message delivery is unaffected.
        let mut parser = FrameParser::new();
        parser.read(&header(200));
        let frames = parser.read(&progress("bad\n{\"a\":1}\n"));
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], FrameEvent::Error(_)));
        assert!(matches!(&frames[1], FrameEvent::Message(_)));
    }
}
