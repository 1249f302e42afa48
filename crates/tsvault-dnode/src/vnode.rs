//! The vnode object: status, reference count, and owned handles of one replica.

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::repo::{RepoStats, Repository};
use crate::types::{SyncStatus, VgroupId, VnodeStatus};
use crate::worker::WorkerHandle;

/// Handle to a collaborating subsystem (WAL, replica, event stream, continuous
/// query) whose lifetime follows the vnode's.
pub trait Attachment: Send + Sync {
    /// Shuts the collaborator down for this vnode.
    fn release(self: Box<Self>);
}

/// Slot an [`Attachment`] occupies on a vnode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSlot {
    /// Write-ahead log.
    Wal,
    /// Replication state.
    Replica,
    /// Event stream.
    Events,
    /// Continuous query runner.
    ContinuousQuery,
}

#[derive(Default)]
struct Attachments {
    wal: Option<Box<dyn Attachment>>,
    replica: Option<Box<dyn Attachment>>,
    events: Option<Box<dyn Attachment>>,
    cq: Option<Box<dyn Attachment>>,
}

impl Attachments {
    fn slot(&mut self, slot: AttachmentSlot) -> &mut Option<Box<dyn Attachment>> {
        match slot {
            AttachmentSlot::Wal => &mut self.wal,
            AttachmentSlot::Replica => &mut self.replica,
            AttachmentSlot::Events => &mut self.events,
            AttachmentSlot::ContinuousQuery => &mut self.cq,
        }
    }
}

struct Workers {
    write: WorkerHandle,
    read: WorkerHandle,
}

/// One locally hosted replica of a vgroup.
///
/// The registry holds one implicit reference from creation until teardown;
/// every [`VnodeRef`] handed to a caller holds one more.
pub struct Vnode {
    vgroup_id: VgroupId,
    vnode_id: i32,
    root: PathBuf,
    status: AtomicU8,
    sync_status: AtomicU8,
    ref_count: AtomicI32,
    version: AtomicI64,
    workers: Mutex<Option<Workers>>,
    repo: RwLock<Option<Box<dyn Repository>>>,
    attachments: Mutex<Attachments>,
}

impl Vnode {
    /// Builds a `NotReady` vnode holding the registry's reference.
    pub fn new(
        vgroup_id: VgroupId,
        repo: Box<dyn Repository>,
        write_worker: WorkerHandle,
        read_worker: WorkerHandle,
    ) -> Self {
        Self {
            vgroup_id,
            vnode_id: repo.config().tsdb_id,
            root: repo.root().to_path_buf(),
            status: AtomicU8::new(VnodeStatus::NotReady.into()),
            sync_status: AtomicU8::new(SyncStatus::Init.into()),
            ref_count: AtomicI32::new(1),
            version: AtomicI64::new(0),
            workers: Mutex::new(Some(Workers {
                write: write_worker,
                read: read_worker,
            })),
            repo: RwLock::new(Some(repo)),
            attachments: Mutex::new(Attachments::default()),
        }
    }

    /// Vgroup this vnode replicates.
    pub fn vgroup_id(&self) -> VgroupId {
        self.vgroup_id
    }

    /// Controller-assigned vnode id.
    pub fn vnode_id(&self) -> i32 {
        self.vnode_id
    }

    /// Repository root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current status.
    pub fn status(&self) -> VnodeStatus {
        VnodeStatus::from(self.status.load(Ordering::SeqCst))
    }

    /// Current sync status.
    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus::from(self.sync_status.load(Ordering::SeqCst))
    }

    /// Records the sync status reported by the replication layer.
    pub fn set_sync_status(&self, status: SyncStatus) {
        self.sync_status.store(status.into(), Ordering::SeqCst);
    }

    /// Outstanding references, including the registry's.
    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::SeqCst)
    }

    /// Data version.
    pub fn version(&self) -> i64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Id of the write worker, if not yet released.
    pub fn write_worker_id(&self) -> Option<u64> {
        self.workers.lock().as_ref().map(|w| w.write.id())
    }

    /// Id of the read worker, if not yet released.
    pub fn read_worker_id(&self) -> Option<u64> {
        self.workers.lock().as_ref().map(|w| w.read.id())
    }

    /// Runs `f` against the open repository, if it has not been released.
    pub fn with_repo<R>(&self, f: impl FnOnce(&dyn Repository) -> R) -> Option<R> {
        self.repo.read().as_deref().map(f)
    }

    /// Repository counters, or zeros once the repository is released.
    pub fn repo_stats(&self) -> RepoStats {
        self.with_repo(|r| r.stats()).unwrap_or_default()
    }

    /// Installs a collaborator handle, returning the one it replaces.
    pub fn attach(
        &self,
        slot: AttachmentSlot,
        handle: Box<dyn Attachment>,
    ) -> Option<Box<dyn Attachment>> {
        self.attachments.lock().slot(slot).replace(handle)
    }

    /// Whether a collaborator handle occupies `slot`.
    pub fn is_attached(&self, slot: AttachmentSlot) -> bool {
        self.attachments.lock().slot(slot).is_some()
    }

    pub(crate) fn acquire(&self) -> i32 {
        self.ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drops one reference, never going below zero. Returns the remaining count.
    pub(crate) fn release(&self) -> i32 {
        match self
            .ref_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                if c > 0 {
                    Some(c - 1)
                } else {
                    None
                }
            }) {
            Ok(prev) => prev - 1,
            Err(_) => {
                warn!(vgroup_id = %self.vgroup_id, "release on vnode with zero references");
                0
            }
        }
    }

    /// Moves the vnode to `next` if the transition is legal; returns the status
    /// observed when the transition was refused.
    pub(crate) fn transition(&self, next: VnodeStatus) -> Result<(), VnodeStatus> {
        self.status
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                if VnodeStatus::from(raw).can_transition_to(next) {
                    Some(next.into())
                } else {
                    None
                }
            })
            .map(|prev| {
                debug!(
                    vgroup_id = %self.vgroup_id,
                    from = %VnodeStatus::from(prev),
                    to = %next,
                    "vnode status changed"
                );
            })
            .map_err(VnodeStatus::from)
    }

    pub(crate) fn take_repo(&self) -> Option<Box<dyn Repository>> {
        self.repo.write().take()
    }

    pub(crate) fn take_workers(&self) -> Option<(WorkerHandle, WorkerHandle)> {
        self.workers.lock().take().map(|w| (w.write, w.read))
    }

    pub(crate) fn take_attachments(&self) -> Vec<Box<dyn Attachment>> {
        let mut attachments = self.attachments.lock();
        [
            attachments.cq.take(),
            attachments.events.take(),
            attachments.replica.take(),
            attachments.wal.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

impl fmt::Debug for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vnode")
            .field("vgroup_id", &self.vgroup_id)
            .field("vnode_id", &self.vnode_id)
            .field("status", &self.status())
            .field("ref_count", &self.ref_count())
            .field("root", &self.root)
            .finish()
    }
}

/// A borrowed reference to a registered vnode.
///
/// Holding a `VnodeRef` keeps the vnode's reference count raised; dropping it
/// (or calling [`VnodeRef::release`]) gives the reference back exactly once.
pub struct VnodeRef {
    vnode: Arc<Vnode>,
}

impl VnodeRef {
    /// Wraps a vnode whose reference count the caller has already raised.
    pub(crate) fn adopt(vnode: Arc<Vnode>) -> Self {
        Self { vnode }
    }

    /// Gives the reference back.
    pub fn release(self) {}
}

impl Deref for VnodeRef {
    type Target = Vnode;

    fn deref(&self) -> &Vnode {
        &self.vnode
    }
}

impl Clone for VnodeRef {
    fn clone(&self) -> Self {
        self.vnode.acquire();
        Self {
            vnode: Arc::clone(&self.vnode),
        }
    }
}

impl Drop for VnodeRef {
    fn drop(&mut self) {
        self.vnode.release();
    }
}

impl fmt::Debug for VnodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VnodeRef").field(&*self.vnode).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{RepoConfig, UNSET};
    use crate::types::Precision;
    use crate::worker::{LocalWorkerPool, WorkerPool};
    use std::sync::atomic::AtomicUsize;

    struct StubRepo {
        root: PathBuf,
        config: RepoConfig,
    }

    impl Repository for StubRepo {
        fn root(&self) -> &Path {
            &self.root
        }
        fn config(&self) -> &RepoConfig {
            &self.config
        }
        fn stats(&self) -> RepoStats {
            RepoStats {
                total_storage: 10,
                comp_storage: 5,
                points_written: 3,
            }
        }
        fn record_points(&self, _points: u64) {}
    }

    fn test_vnode(pool: &LocalWorkerPool, vgroup: i32) -> Vnode {
        let repo = StubRepo {
            root: PathBuf::from(format!("/data/vnode{}", vgroup)),
            config: RepoConfig {
                tsdb_id: vgroup + 100,
                precision: Precision::Milli,
                max_tables: 10,
                days_per_file: 1,
                min_rows_per_file_block: UNSET,
                max_rows_per_file_block: UNSET,
                keep: UNSET,
                max_cache_size: UNSET as i64,
            },
        };
        Vnode::new(
            VgroupId::new(vgroup),
            Box::new(repo),
            pool.allocate_write_worker(),
            pool.allocate_read_worker(),
        )
    }

    struct CountingAttachment(Arc<AtomicUsize>);

    impl Attachment for CountingAttachment {
        fn release(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_new_vnode_defaults() {
        let pool = LocalWorkerPool::new();
        let vnode = test_vnode(&pool, 7);
        assert_eq!(vnode.vgroup_id(), VgroupId::new(7));
        assert_eq!(vnode.vnode_id(), 107);
        assert_eq!(vnode.status(), VnodeStatus::NotReady);
        assert_eq!(vnode.sync_status(), SyncStatus::Init);
        assert_eq!(vnode.ref_count(), 1);
        assert_eq!(vnode.version(), 0);
        assert_eq!(vnode.root(), Path::new("/data/vnode7"));
        assert!(vnode.write_worker_id().is_some());
        assert!(vnode.read_worker_id().is_some());
        assert_eq!(vnode.repo_stats().total_storage, 10);
    }

    #[test]
    fn test_release_never_below_zero() {
        let pool = LocalWorkerPool::new();
        let vnode = test_vnode(&pool, 1);
        assert_eq!(vnode.acquire(), 2);
        assert_eq!(vnode.release(), 1);
        assert_eq!(vnode.release(), 0);
        assert_eq!(vnode.release(), 0);
        assert_eq!(vnode.ref_count(), 0);
    }

    #[test]
    fn test_transition_rules() {
        let pool = LocalWorkerPool::new();
        let vnode = test_vnode(&pool, 1);
        assert!(vnode.transition(VnodeStatus::Master).is_ok());
        assert_eq!(
            vnode.transition(VnodeStatus::Slave),
            Err(VnodeStatus::Master)
        );
        assert!(vnode.transition(VnodeStatus::Deleting).is_ok());
        assert_eq!(
            vnode.transition(VnodeStatus::NotReady),
            Err(VnodeStatus::Deleting)
        );
        assert_eq!(vnode.status(), VnodeStatus::Deleting);
    }

    #[test]
    fn test_vnode_ref_guard() {
        let pool = LocalWorkerPool::new();
        let vnode = Arc::new(test_vnode(&pool, 1));

        vnode.acquire();
        let r1 = VnodeRef::adopt(Arc::clone(&vnode));
        assert_eq!(vnode.ref_count(), 2);

        let r2 = r1.clone();
        assert_eq!(vnode.ref_count(), 3);
        assert_eq!(r2.vgroup_id(), VgroupId::new(1));

        r1.release();
        drop(r2);
        assert_eq!(vnode.ref_count(), 1);
    }

    #[test]
    fn test_take_handles_once() {
        let pool = LocalWorkerPool::new();
        let vnode = test_vnode(&pool, 1);

        let (w, r) = vnode.take_workers().unwrap();
        pool.free(w);
        pool.free(r);
        assert!(vnode.take_workers().is_none());
        assert!(vnode.write_worker_id().is_none());
        assert_eq!(pool.live_count(), 0);

        assert!(vnode.take_repo().is_some());
        assert!(vnode.take_repo().is_none());
        assert_eq!(vnode.repo_stats(), RepoStats::default());
    }

    #[test]
    fn test_attachments() {
        let pool = LocalWorkerPool::new();
        let vnode = test_vnode(&pool, 1);
        let released = Arc::new(AtomicUsize::new(0));

        assert!(!vnode.is_attached(AttachmentSlot::Wal));
        let prev = vnode.attach(
            AttachmentSlot::Wal,
            Box::new(CountingAttachment(released.clone())),
        );
        assert!(prev.is_none());
        vnode.attach(
            AttachmentSlot::ContinuousQuery,
            Box::new(CountingAttachment(released.clone())),
        );
        assert!(vnode.is_attached(AttachmentSlot::Wal));

        for handle in vnode.take_attachments() {
            handle.release();
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(!vnode.is_attached(AttachmentSlot::Wal));
        assert!(vnode.take_attachments().is_empty());
    }
}
