//! Read/write worker allocation for vnodes.
//!
//! Worker threads and their queues belong to the data path; vnodes only hold
//! the handles and give them back on teardown.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, warn};

/// Kind of worker a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    /// Serves queries.
    Read,
    /// Serves inserts.
    Write,
}

/// Opaque handle to a worker owned by one vnode.
///
/// Not `Clone`: a handle is freed exactly once by moving it back to the pool.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct WorkerHandle {
    id: u64,
    kind: WorkerKind,
}

impl WorkerHandle {
    /// Pool-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read or write.
    pub fn kind(&self) -> WorkerKind {
        self.kind
    }
}

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WorkerKind::Read => write!(f, "rworker-{}", self.id),
            WorkerKind::Write => write!(f, "wworker-{}", self.id),
        }
    }
}

/// Allocator for per-vnode workers.
pub trait WorkerPool: Send + Sync {
    /// Hands out a write worker.
    fn allocate_write_worker(&self) -> WorkerHandle;

    /// Hands out a read worker.
    fn allocate_read_worker(&self) -> WorkerHandle;

    /// Returns a worker to the pool.
    fn free(&self, worker: WorkerHandle);
}

/// In-process worker pool that tracks every live handle.
#[derive(Debug, Default)]
pub struct LocalWorkerPool {
    next_id: AtomicU64,
    live: DashMap<u64, WorkerKind>,
}

impl LocalWorkerPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self, kind: WorkerKind) -> WorkerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.live.insert(id, kind);
        let handle = WorkerHandle { id, kind };
        debug!(worker = %handle, "allocated worker");
        handle
    }

    /// Number of handles allocated and not yet freed.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of live handles of one kind.
    pub fn live_count_of(&self, kind: WorkerKind) -> usize {
        self.live.iter().filter(|e| *e.value() == kind).count()
    }
}

impl WorkerPool for LocalWorkerPool {
    fn allocate_write_worker(&self) -> WorkerHandle {
        self.allocate(WorkerKind::Write)
    }

    fn allocate_read_worker(&self) -> WorkerHandle {
        self.allocate(WorkerKind::Read)
    }

    fn free(&self, worker: WorkerHandle) {
        if self.live.remove(&worker.id).is_none() {
            warn!(worker = %worker, "freeing worker unknown to this pool");
        } else {
            debug!(worker = %worker, "freed worker");
        }
    }
}
