// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transport abstraction for long-lived chunked HTTP responses.
//!
//! A [`StreamingTransport`] turns one request into an ordered sequence of
//! [`TransportEvent`]s: a header carrying the HTTP status, progress events
//! carrying the cumulative body text received so far, and a finish (or
//! failure) event. [`HttpTransport`] is the reqwest-backed implementation;
//! tests substitute their own transport behind the same trait.

use std::fmt;
use std::str;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Result, StreamError};

/// HTTP method for a stream or probe request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Method {
    /// HTTP GET.
    #[default]
    Get,
    /// HTTP POST.
    Post,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// One network event of a streaming response, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Response headers arrived.
    Header {
        /// HTTP status code.
        status: u16,
    },
    /// More body data arrived. `text` is the whole body received so far;
    /// it only ever grows between consecutive progress events.
    Progress {
        /// Cumulative body text.
        text: String,
        /// Length of the cumulative text in bytes.
        loaded: usize,
    },
    /// The response ended cleanly.
    Finish {
        /// Final full body text, if any body was received.
        text: Option<String>,
    },
    /// The underlying request failed (network error, abrupt disconnect).
    Failed {
        /// Failure description from the transport.
        message: String,
    },
}

/// Description of one streaming request.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    /// HTTP method.
    pub method: Method,
    /// Request URL.
    pub url: String,
    /// Query parameters.
    pub params: Vec<(String, String)>,
    /// Additional request headers.
    pub headers: Vec<(String, String)>,
    /// Request body, sent as JSON.
    pub body: Option<String>,
}

impl StreamRequest {
    /// Create a request for the given method and URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Self::default()
        }
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Response of a one-shot probe request.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Full response body.
    pub body: String,
}

/// A transport able to deliver a response incrementally.
#[async_trait]
pub trait StreamingTransport: Send + Sync {
    /// Open a streaming request.
    ///
    /// Events arrive on the returned channel strictly in network order.
    /// The channel ends after a `Finish` or `Failed` event; a channel that
    /// closes without either indicates the connection was dropped.
    async fn open(&self, request: &StreamRequest) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Issue a one-shot request and collect the full response.
    async fn probe(&self, method: Method, url: &str) -> Result<ProbeResponse>;
}

/// Reqwest-backed transport with incremental body delivery.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport reusing an existing HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: &StreamRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), &request.url)
            .query(&request.params);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body.clone());
        }
        builder
    }
}

#[async_trait]
impl StreamingTransport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> Result<mpsc::Receiver<TransportEvent>> {
        let response = self.build(request).send().await?;
        let status = response.status().as_u16();
        debug!(url = %request.url, status, "stream response headers received");

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            if tx.send(TransportEvent::Header { status }).await.is_err() {
                return;
            }

            let mut body = String::new();
            let mut pending: Vec<u8> = Vec::new();
            let mut chunks = response.bytes_stream();

            while let Some(chunk) = chunks.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(TransportEvent::Failed {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                };

                pending.extend_from_slice(&bytes);
                match take_utf8_prefix(&mut pending) {
                    Ok(decoded) => body.push_str(&decoded),
                    Err(e) => {
                        let _ = tx
                            .send(TransportEvent::Failed {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }

                trace!(loaded = body.len(), "stream progress");
                let event = TransportEvent::Progress {
                    text: body.clone(),
                    loaded: body.len(),
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            let text = if body.is_empty() { None } else { Some(body) };
            let _ = tx.send(TransportEvent::Finish { text }).await;
        });

        Ok(rx)
    }

    async fn probe(&self, method: Method, url: &str) -> Result<ProbeResponse> {
        let response = self
            .client
            .request(method.as_reqwest(), url)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ProbeResponse { status, body })
    }
}

/// Split the longest valid UTF-8 prefix off `pending`, leaving any
/// incomplete trailing sequence for the next chunk.
fn take_utf8_prefix(pending: &mut Vec<u8>) -> Result<String> {
    match str::from_utf8(pending) {
        Ok(s) => {
            let decoded = s.to_string();
            pending.clear();
            Ok(decoded)
        }
        Err(e) if e.error_len().is_none() => {
            // Chunk boundary split a multi-byte character.
            let valid = e.valid_up_to();
            let decoded = str::from_utf8(&pending[..valid])
                .map_err(|_| StreamError::InvalidEncoding)?
                .to_string();
            pending.drain(..valid);
            Ok(decoded)
        }
        Err(_) => Err(StreamError::InvalidEncoding),
    }
}
