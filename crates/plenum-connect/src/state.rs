// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Collaborator contracts consumed by the streaming core.
//!
//! Auth, connectivity and application lifecycle live elsewhere in the
//! client; this module defines the narrow traits the streaming layer
//! consults. The composition root passes implementations in explicitly -
//! there are no ambient singletons.

use std::sync::atomic::{AtomicU64, Ordering};

/// Authentication state, consulted per failure to decide whether retrying
/// a stream is worthwhile.
pub trait AuthGuard: Send + Sync {
    /// Whether the client currently holds a valid session.
    fn is_authenticated(&self) -> bool;
}

/// Global connectivity state and loss reporting.
pub trait OfflineBroadcast: Send + Sync {
    /// Whether the client currently considers itself offline.
    fn is_offline(&self) -> bool;

    /// Report that connectivity to the given endpoint was lost.
    fn went_offline(&self, reason: &str);
}

/// Application lifecycle and connectivity signals, delivered over a
/// `tokio::sync::broadcast` channel to the communication manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The application finished booting.
    Booted,
    /// The application is shutting down.
    Shutdown,
    /// Global connectivity was lost.
    WentOffline,
    /// Global connectivity came back.
    CameOnline,
}

/// Source of stream ids.
pub trait StreamIdProvider: Send + Sync {
    /// Produce the next id.
    fn next_id(&self) -> u64;
}

/// Monotonic id provider; deterministic, so tests can assert on ids.
#[derive(Debug, Default)]
pub struct MonotonicIds {
    next: AtomicU64,
}

impl MonotonicIds {
    /// Create a provider counting from 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamIdProvider for MonotonicIds {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_ids() {
        let ids = MonotonicIds::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
    }
}
