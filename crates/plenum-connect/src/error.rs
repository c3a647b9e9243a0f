// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Errors for endpoint resolution and stream composition.

use thiserror::Error;

/// Errors that can occur while composing streams.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The endpoint name was never registered.
    #[error("unknown stream endpoint: {0}")]
    EndpointNotFound(String),
}

/// Type alias for composition results.
pub type Result<T> = std::result::Result<T, ConnectError>;
