//! Change-notification feed
//!
//! Invalidation keys arrive from the reference database's change log. The
//! feed decouples producers from the caches: events go onto a channel and a
//! single worker thread applies them to the registry in arrival order.

use crate::error::{CacheError, CacheResult};
use crate::key::ObjectKey;
use crate::registry::CacheRegistry;
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

enum FeedEvent {
    Invalidate(ObjectKey),
    Flush(Sender<()>),
    Shutdown,
}

/// Totals over the lifetime of a feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedReport {
    /// Events applied to at least one cache
    pub applied: u64,
    /// Events no cache accepted
    pub rejected: u64,
    /// Entries removed across all caches
    pub entries_removed: u64,
}

/// Cloneable producer handle
#[derive(Clone)]
pub struct FeedSender {
    tx: Sender<FeedEvent>,
}

impl FeedSender {
    /// Queue an invalidation
    pub fn publish(&self, key: ObjectKey) -> CacheResult<()> {
        self.tx
            .send(FeedEvent::Invalidate(key))
            .map_err(|_| CacheError::FeedClosed)
    }

    /// Parse a flat key (`Table:FIELD=value|...`) and queue it
    pub fn publish_flat(&self, flat: &str) -> CacheResult<()> {
        self.publish(ObjectKey::parse(flat)?)
    }
}

/// Worker applying invalidation events to a registry
pub struct InvalidationFeed {
    sender: FeedSender,
    worker: Option<JoinHandle<FeedReport>>,
}

impl InvalidationFeed {
    /// Start the worker thread
    pub fn spawn(registry: Arc<CacheRegistry>) -> std::io::Result<Self> {
        let (tx, rx) = channel::unbounded();
        let worker = thread::Builder::new()
            .name("invalidation-feed".to_string())
            .spawn(move || run(&registry, rx))?;

        info!("Invalidation feed started");

        Ok(Self {
            sender: FeedSender { tx },
            worker: Some(worker),
        })
    }

    pub fn sender(&self) -> FeedSender {
        self.sender.clone()
    }

    pub fn publish(&self, key: ObjectKey) -> CacheResult<()> {
        self.sender.publish(key)
    }

    pub fn publish_flat(&self, flat: &str) -> CacheResult<()> {
        self.sender.publish_flat(flat)
    }

    /// Block until every event queued before this call has been applied
    pub fn flush(&self) -> CacheResult<()> {
        let (ack_tx, ack_rx) = channel::bounded(1);
        self.sender
            .tx
            .send(FeedEvent::Flush(ack_tx))
            .map_err(|_| CacheError::FeedClosed)?;
        ack_rx.recv().map_err(|_| CacheError::FeedClosed)
    }

    /// Apply everything already queued, stop the worker and report totals
    pub fn shutdown(mut self) -> CacheResult<FeedReport> {
        self.stop().ok_or(CacheError::FeedClosed)
    }

    fn stop(&mut self) -> Option<FeedReport> {
        let worker = self.worker.take()?;
        // The worker may already be gone; join reports that
        let _ = self.sender.tx.send(FeedEvent::Shutdown);
        let report = worker.join().ok()?;

        info!(
            applied = report.applied,
            rejected = report.rejected,
            entries_removed = report.entries_removed,
            "Invalidation feed stopped"
        );
        Some(report)
    }
}

impl Drop for InvalidationFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(registry: &CacheRegistry, rx: Receiver<FeedEvent>) -> FeedReport {
    let mut report = FeedReport::default();

    for event in rx.iter() {
        match event {
            FeedEvent::Invalidate(key) => {
                let routed = registry.route_invalidation(&key);
                // A rejecting target does not undo removals made by the others
                report.entries_removed += routed.removed as u64;
                match routed.error {
                    None => {
                        debug!(key = %key, removed = routed.removed, "Invalidation applied");
                        report.applied += 1;
                    }
                    Some(e) => {
                        warn!(key = %key, removed = routed.removed, "Invalidation rejected: {}", e);
                        report.rejected += 1;
                    }
                }
            }
            FeedEvent::Flush(ack) => {
                let _ = ack.send(());
            }
            FeedEvent::Shutdown => break,
        }
    }

    report
}
