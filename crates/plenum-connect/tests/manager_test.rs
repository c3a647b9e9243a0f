// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the communication manager lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;

use plenum_connect::{CommunicationManager, LifecycleEvent, MonotonicIds};
use plenum_stream::ManagedStream;

/// Counters shared between a test and the fake streams it registers.
#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

/// Stand-in for a push stream that only tracks open/close calls.
struct FakeStream {
    id: u64,
    open: AtomicBool,
    counters: Arc<Counters>,
}

impl FakeStream {
    fn boxed(id: u64, counters: Arc<Counters>) -> Box<dyn ManagedStream> {
        Box::new(Self {
            id,
            open: AtomicBool::new(false),
            counters,
        })
    }
}

impl ManagedStream for FakeStream {
    fn open(&mut self) {
        if !self.open.swap(true, Ordering::SeqCst) {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn close(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn id(&self) -> u64 {
        self.id
    }
}

fn manager() -> CommunicationManager {
    CommunicationManager::new(Arc::new(MonotonicIds::new()))
}

fn register_fake(manager: &CommunicationManager, counters: &Arc<Counters>) {
    let counters = counters.clone();
    manager.register(move |id| FakeStream::boxed(id, counters.clone()));
}

#[tokio::test]
async fn test_streams_wait_for_start() {
    let manager = manager();
    let counters = Arc::new(Counters::default());
    register_fake(&manager, &counters);
    register_fake(&manager, &counters);

    assert!(!manager.is_running());
    assert_eq!(counters.opens.load(Ordering::SeqCst), 0);

    manager.start_communication();
    assert!(manager.is_running());
    assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    assert_eq!(manager.active_count(), 2);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let manager = manager();
    let counters = Arc::new(Counters::default());
    register_fake(&manager, &counters);

    manager.start_communication();
    manager.start_communication();
    manager.start_communication();

    // One stream instance, opened once.
    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    assert_eq!(manager.active_count(), 1);
}

#[tokio::test]
async fn test_registration_while_running_opens_immediately() {
    let manager = manager();
    let counters = Arc::new(Counters::default());

    manager.start_communication();
    register_fake(&manager, &counters);

    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    assert_eq!(manager.active_count(), 1);
}

#[tokio::test]
async fn test_stop_closes_everything_and_restart_reopens() {
    let manager = manager();
    let counters = Arc::new(Counters::default());
    register_fake(&manager, &counters);
    register_fake(&manager, &counters);

    manager.start_communication();
    manager.stop_communication();

    assert!(!manager.is_running());
    assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
    assert_eq!(manager.active_count(), 0);

    // Registrations survive a stop; a fresh instance opens per stream.
    manager.start_communication();
    assert_eq!(counters.opens.load(Ordering::SeqCst), 4);
    assert_eq!(manager.active_count(), 2);
}

#[tokio::test]
async fn test_stop_while_stopped_is_a_no_op() {
    let manager = manager();
    let counters = Arc::new(Counters::default());
    register_fake(&manager, &counters);

    manager.stop_communication();
    assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_close_handle_deregisters() {
    let manager = manager();
    let counters = Arc::new(Counters::default());
    let shared = counters.clone();
    let registration = manager.register(move |id| FakeStream::boxed(id, shared.clone()));

    manager.start_communication();
    assert_eq!(manager.active_count(), 1);

    registration.close();
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert_eq!(manager.active_count(), 0);

    // A deregistered stream does not come back on restart.
    manager.stop_communication();
    manager.start_communication();
    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
}

/// Wait until the condition holds or a generous deadline passes.
async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_lifecycle_events_drive_start_and_stop() {
    let manager = manager();
    let counters = Arc::new(Counters::default());
    register_fake(&manager, &counters);

    let (tx, rx) = broadcast::channel(8);
    let listener = manager.listen(rx);

    tx.send(LifecycleEvent::Booted).unwrap();
    eventually(|| manager.is_running()).await;
    assert_eq!(manager.active_count(), 1);

    tx.send(LifecycleEvent::WentOffline).unwrap();
    eventually(|| !manager.is_running()).await;
    assert_eq!(manager.active_count(), 0);

    tx.send(LifecycleEvent::CameOnline).unwrap();
    eventually(|| manager.is_running()).await;

    tx.send(LifecycleEvent::Shutdown).unwrap();
    eventually(|| !manager.is_running()).await;

    // Dropping the sender ends the listener task.
    drop(tx);
    listener.await.unwrap();
}
