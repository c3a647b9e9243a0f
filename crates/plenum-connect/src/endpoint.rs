// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Named stream endpoints and health probing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::debug;

use plenum_stream::{Method, StreamingTransport};

use crate::error::{ConnectError, Result};

/// Configuration of one stream endpoint. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Stream URL.
    pub url: String,
    /// Health-check URL.
    pub health_url: String,
    /// HTTP method for the stream request.
    pub method: Method,
}

impl EndpointConfig {
    /// Create a GET endpoint.
    pub fn new(url: impl Into<String>, health_url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            health_url: health_url.into(),
            method: Method::Get,
        }
    }

    /// Set the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    healthy: bool,
}

/// Registry mapping logical endpoint names to configurations.
///
/// Names are unique; registering a name again overwrites the previous
/// configuration.
pub struct EndpointRegistry {
    transport: Arc<dyn StreamingTransport>,
    endpoints: Mutex<HashMap<String, EndpointConfig>>,
}

impl EndpointRegistry {
    /// Create an empty registry probing through the given transport.
    pub fn new(transport: Arc<dyn StreamingTransport>) -> Self {
        Self {
            transport,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Register or overwrite an endpoint under `name`.
    pub fn register(&self, name: impl Into<String>, config: EndpointConfig) {
        let name = name.into();
        debug!(endpoint = %name, url = %config.url, "endpoint registered");
        self.endpoints.lock().unwrap().insert(name, config);
    }

    /// Look up an endpoint by name.
    pub fn get(&self, name: &str) -> Result<EndpointConfig> {
        self.endpoints
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectError::EndpointNotFound(name.to_string()))
    }

    /// Probe an endpoint's health URL.
    ///
    /// Returns true only if the server explicitly reports
    /// `{"healthy": true}` with a 2xx status. Any failure - network error,
    /// non-2xx status, malformed body - yields false; health checks never
    /// error.
    pub async fn is_healthy(&self, endpoint: &EndpointConfig) -> bool {
        let response = match self
            .transport
            .probe(Method::Get, &endpoint.health_url)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %endpoint.health_url, error = %e, "health probe failed");
                return false;
            }
        };

        if !(200..300).contains(&response.status) {
            return false;
        }
        serde_json::from_str::<HealthBody>(&response.body)
            .map(|body| body.healthy)
            .unwrap_or(false)
    }
}
