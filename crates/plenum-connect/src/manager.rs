// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Communication manager: collective stream lifecycle.
//!
//! The manager tracks every registered stream and flips them all open or
//! closed together. Streams registered while communication is running are
//! opened immediately; streams registered while stopped wait for the next
//! start. Lifecycle events from the rest of the client arrive over a
//! broadcast channel and map onto start/stop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use plenum_stream::ManagedStream;

use crate::state::{LifecycleEvent, StreamIdProvider};

/// Factory closure producing a fresh stream instance for each open cycle.
pub type StreamBuilder = Box<dyn Fn(u64) -> Box<dyn ManagedStream> + Send>;

struct StreamEntry {
    build: StreamBuilder,
    current: Option<Box<dyn ManagedStream>>,
}

impl StreamEntry {
    /// Open a stream for this entry. No second instance is created while
    /// one is still open.
    fn open_current(&mut self, id: u64) {
        if self.current.as_ref().is_some_and(|s| s.is_open()) {
            return;
        }
        let mut stream = (self.build)(id);
        stream.open();
        self.current = Some(stream);
    }

    fn close_current(&mut self) {
        if let Some(mut stream) = self.current.take() {
            stream.close();
        }
    }
}

struct ManagerInner {
    running: bool,
    entries: HashMap<u64, StreamEntry>,
}

/// Registration handle returned by [`CommunicationManager::register`].
///
/// Dropping the handle does not deregister; call [`close`](Self::close) to
/// stop and remove the stream.
pub struct StreamRegistration {
    id: u64,
    inner: Arc<Mutex<ManagerInner>>,
}

impl StreamRegistration {
    /// Id assigned to the registered stream.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Close the stream and remove it from the manager.
    pub fn close(self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(mut entry) = inner.entries.remove(&self.id) {
            entry.close_current();
            debug!(stream_id = self.id, "stream deregistered");
        }
    }
}

/// Opens and closes all registered streams together.
#[derive(Clone)]
pub struct CommunicationManager {
    inner: Arc<Mutex<ManagerInner>>,
    ids: Arc<dyn StreamIdProvider>,
}

impl CommunicationManager {
    /// Create a stopped manager with no registered streams.
    pub fn new(ids: Arc<dyn StreamIdProvider>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManagerInner {
                running: false,
                entries: HashMap::new(),
            })),
            ids,
        }
    }

    /// Register a stream builder.
    ///
    /// If communication is running, a stream is built and opened
    /// immediately; otherwise it opens on the next
    /// [`start_communication`](Self::start_communication).
    pub fn register(
        &self,
        build: impl Fn(u64) -> Box<dyn ManagedStream> + Send + 'static,
    ) -> StreamRegistration {
        let id = self.ids.next_id();
        let mut inner = self.inner.lock().unwrap();
        let mut entry = StreamEntry {
            build: Box::new(build),
            current: None,
        };
        if inner.running {
            entry.open_current(id);
        }
        inner.entries.insert(id, entry);
        debug!(stream_id = id, running = inner.running, "stream registered");

        StreamRegistration {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Open all registered streams. Calling while already running opens
    /// nothing twice.
    pub fn start_communication(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.running = true;
        let mut opened = 0usize;
        for (id, entry) in &mut inner.entries {
            if entry.current.as_ref().is_none_or(|s| !s.is_open()) {
                opened += 1;
            }
            entry.open_current(*id);
        }
        info!(streams = inner.entries.len(), opened, "communication started");
    }

    /// Close all registered streams. Idempotent; registrations survive and
    /// reopen on the next start.
    pub fn stop_communication(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.running = false;
        for entry in inner.entries.values_mut() {
            entry.close_current();
        }
        info!(streams = inner.entries.len(), "communication stopped");
    }

    /// Whether communication is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    /// Number of streams currently open.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .entries
            .values()
            .filter(|entry| entry.current.as_ref().is_some_and(|s| s.is_open()))
            .count()
    }

    /// Drive the manager from lifecycle events until the channel closes.
    ///
    /// Boot and regained connectivity start communication; shutdown and
    /// lost connectivity stop it. A lagged receiver skips the missed
    /// events and keeps going.
    pub fn listen(&self, mut events: broadcast::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LifecycleEvent::Booted | LifecycleEvent::CameOnline) => {
                        manager.start_communication();
                    }
                    Ok(LifecycleEvent::Shutdown | LifecycleEvent::WentOffline) => {
                        manager.stop_communication();
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "lifecycle receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
