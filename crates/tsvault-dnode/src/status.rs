//! Periodic status report (vnode census) sent to the cluster controller.
//!
//! The timer re-arms only after a report has been assembled and handed off, so
//! the period drifts by the time each report takes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::Disks;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{DnodeError, DnodeResult};
use crate::mgmt::DnodeMgmt;
use crate::types::{SyncStatus, VnodeStatus};

/// Per-vnode entry of the census.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnodeLoad {
    /// Vnode id.
    pub vnode: i32,
    /// Vgroup id.
    pub vgroup_id: i32,
    /// Replication role.
    pub status: VnodeStatus,
    /// Sync state.
    pub sync_status: SyncStatus,
    /// Uncompressed bytes on disk.
    pub total_storage: u64,
    /// Compressed bytes on disk.
    pub comp_storage: u64,
    /// Points written; zero unless the vnode is master.
    pub points_written: u64,
}

/// Status message describing this node and the vnodes it hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMsg {
    /// Software version.
    pub version: u32,
    /// Private address.
    pub private_ip: String,
    /// Public address.
    pub public_ip: String,
    /// Process start time, seconds since the epoch.
    pub last_reboot: u64,
    /// Vnode capacity of this node.
    pub num_total_vnodes: u16,
    /// Vnodes currently registered.
    pub open_vnodes: u16,
    /// CPU cores available to the process.
    pub num_cores: u16,
    /// Free space under the data directory, in GiB.
    pub disk_available_gb: f32,
    /// Alternative role advertised to the controller.
    pub alternative_role: u8,
    /// One entry per registered vnode, ordered by vgroup id.
    pub load: Vec<VnodeLoad>,
}

/// Destination of status messages (the controller link).
pub trait StatusSink: Send + Sync {
    /// Ships one status message.
    fn send_status(&self, msg: StatusMsg) -> DnodeResult<()>;
}

/// Sink that only logs the census.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn send_status(&self, msg: StatusMsg) -> DnodeResult<()> {
        debug!(
            open_vnodes = msg.open_vnodes,
            total_vnodes = msg.num_total_vnodes,
            disk_available_gb = msg.disk_available_gb,
            "status report"
        );
        Ok(())
    }
}

/// Assembles the census from the registry and node identity.
pub fn build_status_msg(mgmt: &DnodeMgmt) -> StatusMsg {
    let config = mgmt.config();
    let load: Vec<VnodeLoad> = mgmt
        .registry()
        .acquire_all()
        .into_iter()
        .map(|vnode| {
            let status = vnode.status();
            let stats = vnode.repo_stats();
            VnodeLoad {
                vnode: vnode.vnode_id(),
                vgroup_id: vnode.vgroup_id().as_i32(),
                status,
                sync_status: vnode.sync_status(),
                total_storage: stats.total_storage,
                comp_storage: stats.comp_storage,
                points_written: if status == VnodeStatus::Master {
                    stats.points_written
                } else {
                    0
                },
            }
        })
        .collect();

    StatusMsg {
        version: config.version,
        private_ip: config.private_ip.clone(),
        public_ip: config.public_ip.clone(),
        last_reboot: mgmt.reboot_time(),
        num_total_vnodes: clamp_u16(config.max_vnodes),
        open_vnodes: clamp_u16(load.len()),
        num_cores: clamp_u16(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        ),
        disk_available_gb: disk_available_gb(&config.data_dir),
        alternative_role: config.alternative_role,
        load,
    }
}

fn clamp_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

fn disk_available_gb(path: &Path) -> f32 {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let available = available_on_mount(
        &resolved,
        disks
            .list()
            .iter()
            .map(|disk| (disk.mount_point(), disk.available_space())),
    )
    .unwrap_or(0);
    (available as f64 / (1u64 << 30) as f64) as f32
}

// Free bytes of the mount whose mount point is the longest prefix of `path`.
fn available_on_mount<'a>(
    path: &Path,
    mounts: impl IntoIterator<Item = (&'a Path, u64)>,
) -> Option<u64> {
    mounts
        .into_iter()
        .filter(|(mount, _)| path.starts_with(mount))
        .max_by_key(|(mount, _)| mount.components().count())
        .map(|(_, available)| available)
}

/// Running status timer.
pub struct StatusReporter {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StatusReporter {
    /// Arms the status timer on the current tokio runtime.
    ///
    /// Fails with [`DnodeError::Timer`] outside a runtime.
    pub fn start(mgmt: Arc<DnodeMgmt>, sink: Arc<dyn StatusSink>) -> DnodeResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            error!("failed to init dnode timer: {}", e);
            DnodeError::Timer(e.to_string())
        })?;

        let initial = mgmt.config().status_initial_delay();
        let interval = mgmt.config().status_interval();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = runtime.spawn(run(mgmt, sink, stop_rx, initial, interval));
        info!(?initial, ?interval, "status timer armed");

        Ok(Self {
            stop: stop_tx,
            task,
        })
    }

    /// Returns true while the timer is still re-arming.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the timer without waiting for an in-flight report.
    pub fn cancel(&self) {
        let _ = self.stop.send(true);
    }

    /// Stops the timer and waits for an in-flight report to finish.
    pub async fn stop(self) {
        self.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "status timer task ended abnormally");
        }
        info!("status timer stopped");
    }
}

async fn run(
    mgmt: Arc<DnodeMgmt>,
    sink: Arc<dyn StatusSink>,
    mut stop: watch::Receiver<bool>,
    initial: Duration,
    interval: Duration,
) {
    let mut delay = initial;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    debug!("status reporter dropped, timer stopped");
                }
                return;
            }
        }

        // Sizing repositories walks the filesystem.
        let census = {
            let mgmt = mgmt.clone();
            tokio::task::spawn_blocking(move || build_status_msg(&mgmt)).await
        };
        match census {
            Ok(msg) => {
                if let Err(e) = sink.send_status(msg) {
                    warn!(error = %e, "failed to send status message");
                }
            }
            Err(e) => error!(error = %e, "status census task failed"),
        }
        delay = interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DnodeConfig;
    use crate::message::CreateVnodeMsg;
    use crate::error::StorageResult;
    use crate::repo::{FsRepoEngine, RepoConfig, RepoEngine, RepoStats, Repository};
    use crate::types::{Precision, VgroupId};
    use crate::worker::LocalWorkerPool;
    use parking_lot::Mutex;
    use std::thread::{self, ThreadId};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CollectingSink {
        msgs: Mutex<Vec<StatusMsg>>,
        fail: bool,
    }

    impl StatusSink for CollectingSink {
        fn send_status(&self, msg: StatusMsg) -> DnodeResult<()> {
            self.msgs.lock().push(msg);
            if self.fail {
                return Err(DnodeError::Timer("link down".to_string()));
            }
            Ok(())
        }
    }

    fn mgmt(dir: &TempDir) -> Arc<DnodeMgmt> {
        let config = DnodeConfig {
            data_dir: dir.path().to_path_buf(),
            max_vnodes: 16,
            status_interval_secs: 1,
            status_initial_delay_ms: 500,
            ..Default::default()
        };
        Arc::new(
            DnodeMgmt::new(
                config,
                Arc::new(FsRepoEngine::new()),
                Arc::new(LocalWorkerPool::new()),
            )
            .unwrap(),
        )
    }

    fn create(mgmt: &DnodeMgmt, vgroup: i32) {
        mgmt.create_vnode(&CreateVnodeMsg {
            vnode: vgroup + 10,
            vgroup_id: VgroupId::new(vgroup),
            max_sessions: 10,
            days_per_file: 1,
            precision: Precision::Milli,
        })
        .unwrap();
    }

    #[test]
    fn test_census_contents() {
        let dir = TempDir::new().unwrap();
        let mgmt = mgmt(&dir);
        create(&mgmt, 2);
        create(&mgmt, 1);
        mgmt.set_vnode_role(VgroupId::new(2), VnodeStatus::Master)
            .unwrap();
        for id in [1, 2] {
            mgmt.registry()
                .acquire(VgroupId::new(id))
                .unwrap()
                .with_repo(|r| r.record_points(50))
                .unwrap();
        }

        let msg = build_status_msg(&mgmt);
        assert_eq!(msg.num_total_vnodes, 16);
        assert_eq!(msg.open_vnodes, 2);
        assert!(msg.num_cores >= 1);
        assert_eq!(msg.last_reboot, mgmt.reboot_time());
        assert_eq!(msg.load.len(), 2);

        assert_eq!(msg.load[0].vgroup_id, 1);
        assert_eq!(msg.load[0].vnode, 11);
        assert_eq!(msg.load[0].status, VnodeStatus::NotReady);
        assert_eq!(msg.load[0].points_written, 0);

        assert_eq!(msg.load[1].vgroup_id, 2);
        assert_eq!(msg.load[1].status, VnodeStatus::Master);
        assert_eq!(msg.load[1].points_written, 50);
        assert!(msg.load[1].total_storage > 0);

        // the census borrows must all be returned
        let vnode = mgmt.registry().acquire(VgroupId::new(1)).unwrap();
        assert_eq!(vnode.ref_count(), 2);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let dir = TempDir::new().unwrap();
        let result = StatusReporter::start(mgmt(&dir), Arc::new(LogStatusSink));
        assert!(matches!(result, Err(DnodeError::Timer(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_rearms_after_each_report() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(CollectingSink::default());
        let reporter = StatusReporter::start(mgmt(&dir), sink.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(sink.msgs.lock().len(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.msgs.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(sink.msgs.lock().len(), 3);

        assert!(reporter.is_running());
        reporter.stop().await;
        let count = sink.msgs.lock().len();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.msgs.lock().len(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_keeps_timer_running() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(CollectingSink {
            msgs: Mutex::new(Vec::new()),
            fail: true,
        });
        let reporter = StatusReporter::start(mgmt(&dir), sink.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(2600)).await;
        assert_eq!(sink.msgs.lock().len(), 3);
        assert!(reporter.is_running());
        reporter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_reporter_stops_cycle() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(CollectingSink::default());
        let reporter = StatusReporter::start(mgmt(&dir), sink.clone()).unwrap();
        drop(reporter);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(sink.msgs.lock().len(), 0);
    }

    #[test]
    fn test_available_on_mount_picks_longest_prefix() {
        let mounts = [
            (Path::new("/"), 10),
            (Path::new("/var"), 20),
            (Path::new("/var/lib/tsvault"), 30),
            (Path::new("/var/lib/other"), 40),
        ];
        assert_eq!(
            available_on_mount(Path::new("/var/lib/tsvault/data"), mounts),
            Some(30)
        );
        assert_eq!(available_on_mount(Path::new("/var/log"), mounts), Some(20));
        assert_eq!(available_on_mount(Path::new("/home"), mounts), Some(10));
        assert_eq!(available_on_mount(Path::new("relative"), mounts), None);
    }

    #[test]
    fn test_disk_available_for_missing_dir() {
        let dir = TempDir::new().unwrap();
        let gb = disk_available_gb(&dir.path().join("not-yet-created"));
        assert!(gb.is_finite());
        assert!(gb >= 0.0);
    }

    // Records which thread asked for repository stats.
    struct StatsThreads(Arc<Mutex<Vec<ThreadId>>>);

    struct RecordingRepo {
        inner: Box<dyn Repository>,
        threads: Arc<Mutex<Vec<ThreadId>>>,
    }

    impl Repository for RecordingRepo {
        fn root(&self) -> &Path {
            self.inner.root()
        }

        fn config(&self) -> &RepoConfig {
            self.inner.config()
        }

        fn stats(&self) -> RepoStats {
            self.threads.lock().push(thread::current().id());
            self.inner.stats()
        }

        fn record_points(&self, points: u64) {
            self.inner.record_points(points)
        }
    }

    impl RepoEngine for StatsThreads {
        fn open(&self, root: &Path) -> StorageResult<Box<dyn Repository>> {
            let inner = FsRepoEngine::new().open(root)?;
            Ok(Box::new(RecordingRepo {
                inner,
                threads: self.0.clone(),
            }))
        }

        fn create(&self, root: &Path, config: &RepoConfig) -> StorageResult<Box<dyn Repository>> {
            let inner = FsRepoEngine::new().create(root, config)?;
            Ok(Box::new(RecordingRepo {
                inner,
                threads: self.0.clone(),
            }))
        }

        fn close(&self, repo: Box<dyn Repository>) {
            FsRepoEngine::new().close(repo)
        }

        fn drop_repo(&self, repo: Box<dyn Repository>) -> StorageResult<()> {
            FsRepoEngine::new().drop_repo(repo)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_census_runs_off_the_runtime_thread() {
        let dir = TempDir::new().unwrap();
        let threads = Arc::new(Mutex::new(Vec::new()));
        let config = DnodeConfig {
            data_dir: dir.path().to_path_buf(),
            max_vnodes: 4,
            ..Default::default()
        };
        let mgmt = Arc::new(
            DnodeMgmt::new(
                config,
                Arc::new(StatsThreads(threads.clone())),
                Arc::new(LocalWorkerPool::new()),
            )
            .unwrap(),
        );
        create(&mgmt, 1);

        let sink = Arc::new(CollectingSink::default());
        let reporter = StatusReporter::start(mgmt, sink.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        reporter.stop().await;

        assert_eq!(sink.msgs.lock().len(), 1);
        let threads = threads.lock();
        assert!(!threads.is_empty());
        let runtime_thread = thread::current().id();
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_reporter_task_exits() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(CollectingSink::default());
        let reporter = StatusReporter::start(mgmt(&dir), sink.clone()).unwrap();
        let StatusReporter { stop, task } = reporter;
        drop(stop);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sink.msgs.lock().len(), 0);
    }
}
