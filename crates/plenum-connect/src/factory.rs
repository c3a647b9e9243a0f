// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stream factory: endpoint resolution and default policy wiring.
//!
//! The factory turns an endpoint (by name or literal configuration) into a
//! constructed, not-yet-opened [`PushStream`]. Unless the caller overrides
//! them, it wires the policies that tie a stream into global client state:
//! retry while online and authenticated, report terminal failures to the
//! offline broadcast, back off in a jittered 2-5s window.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use plenum_stream::{
    Method, PushStream, RetryPolicy, StreamOptions, StreamRequest, StreamingTransport,
};

use crate::endpoint::{EndpointConfig, EndpointRegistry};
use crate::error::Result;
use crate::state::{AuthGuard, OfflineBroadcast, StreamIdProvider};

/// Provider for the request body, evaluated at stream-creation time.
pub type BodyProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Provider for query parameters, evaluated at stream-creation time.
pub type ParamsProvider = Arc<dyn Fn() -> Vec<(String, String)> + Send + Sync>;

/// An endpoint reference: registered name or literal configuration.
#[derive(Debug, Clone)]
pub enum EndpointRef {
    /// Look the endpoint up in the registry.
    Named(String),
    /// Use the configuration as given.
    Literal(EndpointConfig),
}

impl From<&str> for EndpointRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<EndpointConfig> for EndpointRef {
    fn from(config: EndpointConfig) -> Self {
        Self::Literal(config)
    }
}

/// Per-request options applied when building the underlying request.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Body provider; default sends `{}` for POST endpoints.
    pub body: Option<BodyProvider>,
    /// Query parameter provider; default sends none.
    pub params: Option<ParamsProvider>,
    /// Additional request headers.
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    /// Create empty request options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the body provider.
    #[must_use]
    pub fn with_body(mut self, provider: impl Fn() -> Option<String> + Send + Sync + 'static) -> Self {
        self.body = Some(Arc::new(provider));
        self
    }

    /// Set the query parameter provider.
    #[must_use]
    pub fn with_params(
        mut self,
        provider: impl Fn() -> Vec<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        self.params = Some(Arc::new(provider));
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Builds streams against registered endpoints with default policies.
pub struct StreamFactory {
    transport: Arc<dyn StreamingTransport>,
    registry: Arc<EndpointRegistry>,
    auth: Arc<dyn AuthGuard>,
    offline: Arc<dyn OfflineBroadcast>,
    ids: Arc<dyn StreamIdProvider>,
}

impl StreamFactory {
    /// Create a factory wired to the given collaborators.
    pub fn new(
        transport: Arc<dyn StreamingTransport>,
        registry: Arc<EndpointRegistry>,
        auth: Arc<dyn AuthGuard>,
        offline: Arc<dyn OfflineBroadcast>,
        ids: Arc<dyn StreamIdProvider>,
    ) -> Self {
        Self {
            transport,
            registry,
            auth,
            offline,
            ids,
        }
    }

    /// Build a stream for the given endpoint.
    ///
    /// Default resolution order: values set in `options` win; unset retry,
    /// backoff and error handling fall back to the factory's policies. The
    /// returned stream is constructed but not yet opened.
    pub fn create<T>(
        &self,
        endpoint: impl Into<EndpointRef>,
        mut options: StreamOptions,
        request: RequestOptions,
    ) -> Result<PushStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let config = match endpoint.into() {
            EndpointRef::Named(name) => self.registry.get(&name)?,
            EndpointRef::Literal(config) => config,
        };

        let body = request
            .body
            .as_ref()
            .map_or_else(|| default_body(config.method), |provider| provider());
        let params = request.params.as_ref().map(|provider| provider());

        let mut stream_request = StreamRequest::new(config.method, &config.url);
        stream_request.headers = request.headers;
        if let Some(params) = params {
            stream_request.params = params;
        }
        if let Some(body) = body {
            stream_request = stream_request.with_body(body);
        }

        if options.retry.is_none() {
            let offline = self.offline.clone();
            let auth = self.auth.clone();
            options.retry = Some(RetryPolicy::check(move || {
                !offline.is_offline() && auth.is_authenticated()
            }));
        }

        let id = self.ids.next_id();
        debug!(stream_id = id, url = %config.url, "stream created");

        let offline = self.offline.clone();
        let url = config.url.clone();
        Ok(
            PushStream::new(id, self.transport.clone(), stream_request, options).on_error(
                move |failure| {
                    debug!(url = %url, error = %failure, "stream failed, broadcasting offline");
                    offline.went_offline(&url);
                },
            ),
        )
    }
}

fn default_body(method: Method) -> Option<String> {
    match method {
        Method::Post => Some("{}".to_string()),
        Method::Get => None,
    }
}
