// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Composition layer for the plenum streaming client.
//!
//! Where `plenum-stream` gives you one reconnecting stream, this crate
//! wires streams into an application: named endpoints with health probes,
//! a factory that applies the client's default retry and failure-reporting
//! policies, and a communication manager that opens and closes every
//! registered stream in step with the application lifecycle.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use plenum_connect::{
//!     CommunicationManager, EndpointConfig, EndpointRegistry, MonotonicIds,
//!     RequestOptions, StreamFactory,
//! };
//! use plenum_stream::{HttpTransport, StreamOptions};
//!
//! # use plenum_connect::{AuthGuard, OfflineBroadcast};
//! # struct Session; impl AuthGuard for Session { fn is_authenticated(&self) -> bool { true } }
//! # struct Net; impl OfflineBroadcast for Net {
//! #     fn is_offline(&self) -> bool { false }
//! #     fn went_offline(&self, _reason: &str) {}
//! # }
//! # #[derive(serde::Deserialize)] struct Update;
//! let transport = Arc::new(HttpTransport::new());
//! let registry = Arc::new(EndpointRegistry::new(transport.clone()));
//! registry.register(
//!     "updates",
//!     EndpointConfig::new("https://example.org/stream", "https://example.org/health"),
//! );
//!
//! let ids = Arc::new(MonotonicIds::new());
//! let factory = StreamFactory::new(
//!     transport,
//!     registry,
//!     Arc::new(Session),
//!     Arc::new(Net),
//!     ids.clone(),
//! );
//!
//! let manager = CommunicationManager::new(ids);
//! manager.register(move |_id| {
//!     let stream = factory
//!         .create::<Update>("updates", StreamOptions::new(), RequestOptions::new())
//!         .expect("endpoint is registered")
//!         .on_message(|_update, _handle| { /* apply the update */ });
//!     Box::new(stream)
//! });
//!
//! manager.start_communication();
//! ```

pub mod endpoint;
pub mod error;
pub mod factory;
pub mod manager;
pub mod state;

pub use endpoint::{EndpointConfig, EndpointRegistry};
pub use error::{ConnectError, Result};
pub use factory::{BodyProvider, EndpointRef, ParamsProvider, RequestOptions, StreamFactory};
pub use manager::{CommunicationManager, StreamBuilder, StreamRegistration};
pub use state::{AuthGuard, LifecycleEvent, MonotonicIds, OfflineBroadcast, StreamIdProvider};
