//! Fixed-size worker pool with load-aware placement.
//!
//! All workers are started in parallel at boot; any failure aborts startup.
//! Rooms take a [`WorkerLease`] on the least-loaded worker, and the lease
//! keeps the load counters honest: whatever a room added is released when
//! the lease drops, so a crashed or cancelled room never strands capacity.

use super::{MediaEngine, MediaWorker, WorkerSettings};
use crate::errors::RcError;

use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

struct PoolWorker {
    index: usize,
    worker: Arc<dyn MediaWorker>,
    clients: AtomicU32,
    rooms: AtomicU32,
}

/// Point-in-time load of one pool worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub worker_index: usize,
    pub pid: u32,
    pub clients_count: u32,
    pub rooms_count: u32,
}

/// Pool of media-engine workers, fixed at startup.
pub struct WorkerPool {
    workers: Vec<Arc<PoolWorker>>,
}

impl WorkerPool {
    /// Start `size` workers in parallel. Fails fast: the first worker that
    /// cannot start fails the whole pool, and startup is expected to abort.
    pub async fn create(
        engine: &dyn MediaEngine,
        size: usize,
        settings: &WorkerSettings,
    ) -> Result<Self, RcError> {
        if size == 0 {
            return Err(RcError::WorkerPoolInit(
                "pool size must be at least 1".to_string(),
            ));
        }
        let startups = (0..size).map(|_| engine.create_worker(settings));
        let mut workers = Vec::with_capacity(size);
        for (index, result) in join_all(startups).await.into_iter().enumerate() {
            let worker = result.map_err(|e| {
                RcError::WorkerPoolInit(format!("worker {index} failed to start: {e}"))
            })?;
            debug!(target: "rc.engine", worker_index = index, pid = worker.pid(), "worker started");
            workers.push(Arc::new(PoolWorker {
                index,
                worker,
                clients: AtomicU32::new(0),
                rooms: AtomicU32::new(0),
            }));
        }
        info!(target: "rc.engine", pool_size = size, "worker pool ready");
        Ok(Self { workers })
    }

    /// Lease the worker with the fewest active clients. Ties resolve to the
    /// lowest index, so placement is deterministic for a given load state.
    pub fn lease_least_loaded(&self) -> Result<WorkerLease, RcError> {
        let slot = self
            .workers
            .iter()
            .min_by_key(|w| w.clients.load(Ordering::SeqCst))
            .ok_or_else(|| RcError::WorkerPoolInit("worker pool is empty".to_string()))?;
        slot.rooms.fetch_add(1, Ordering::SeqCst);
        debug!(
            target: "rc.engine",
            worker_index = slot.index,
            clients = slot.clients.load(Ordering::SeqCst),
            "leased worker"
        );
        Ok(WorkerLease {
            slot: Arc::clone(slot),
            held_clients: AtomicU32::new(0),
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Per-worker load snapshot for diagnostics.
    #[must_use]
    pub fn stats(&self) -> Vec<WorkerStats> {
        self.workers
            .iter()
            .map(|w| WorkerStats {
                worker_index: w.index,
                pid: w.worker.pid(),
                clients_count: w.clients.load(Ordering::SeqCst),
                rooms_count: w.rooms.load(Ordering::SeqCst),
            })
            .collect()
    }
}

/// One room's claim on a pool worker.
///
/// Client increments made through the lease are tracked, and anything not
/// explicitly removed is released on drop along with the room slot.
pub struct WorkerLease {
    slot: Arc<PoolWorker>,
    held_clients: AtomicU32,
}

impl WorkerLease {
    #[must_use]
    pub fn worker(&self) -> Arc<dyn MediaWorker> {
        Arc::clone(&self.slot.worker)
    }

    #[must_use]
    pub fn worker_index(&self) -> usize {
        self.slot.index
    }

    /// Record one more active client on the leased worker.
    pub fn add_client(&self) {
        self.slot.clients.fetch_add(1, Ordering::SeqCst);
        self.held_clients.fetch_add(1, Ordering::SeqCst);
    }

    /// Record one client leaving the leased worker.
    pub fn remove_client(&self) {
        decrement_saturating(&self.held_clients, 1);
        decrement_saturating(&self.slot.clients, 1);
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        let leaked = self.held_clients.swap(0, Ordering::SeqCst);
        if leaked > 0 {
            decrement_saturating(&self.slot.clients, leaked);
        }
        decrement_saturating(&self.slot.rooms, 1);
    }
}

fn decrement_saturating(counter: &AtomicU32, by: u32) {
    let mut current = counter.load(Ordering::SeqCst);
    loop {
        let next = current.saturating_sub(by);
        match counter.compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}
