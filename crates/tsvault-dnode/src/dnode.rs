//! Management subsystem init and teardown.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::DnodeConfig;
use crate::dispatch::MgmtDispatcher;
use crate::error::DnodeResult;
use crate::message::{RpcMsg, Transport};
use crate::mgmt::DnodeMgmt;
use crate::repo::RepoEngine;
use crate::status::{StatusReporter, StatusSink};
use crate::worker::WorkerPool;

/// The data node's management subsystem: vnode lifecycle, message dispatch,
/// and the status timer, constructed once per process.
pub struct Dnode {
    mgmt: Arc<DnodeMgmt>,
    dispatcher: MgmtDispatcher,
    reporter: StatusReporter,
}

impl Dnode {
    /// Builds the registry, arms the status timer, and opens every vnode
    /// found on disk. Any failure aborts startup.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(
        config: DnodeConfig,
        engine: Arc<dyn RepoEngine>,
        workers: Arc<dyn WorkerPool>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn StatusSink>,
    ) -> DnodeResult<Self> {
        let mgmt = Arc::new(DnodeMgmt::new(config, engine, workers)?);
        let reporter = StatusReporter::start(mgmt.clone(), sink)?;

        if let Err(e) = mgmt.open_vnodes() {
            error!(error = %e, "failed to open vnodes");
            reporter.cancel();
            mgmt.cleanup_vnodes();
            return Err(e);
        }

        let dispatcher = MgmtDispatcher::new(mgmt.clone(), transport);
        info!(vnodes = mgmt.registry().len(), "dnode management started");
        Ok(Self {
            mgmt,
            dispatcher,
            reporter,
        })
    }

    /// Lifecycle state, for the data path and tests.
    pub fn mgmt(&self) -> &Arc<DnodeMgmt> {
        &self.mgmt
    }

    /// Handles one inbound management message. Returns the reply code.
    pub fn dispatch(&self, msg: RpcMsg) -> i32 {
        self.dispatcher.dispatch(msg)
    }

    /// Returns true while the status timer is re-arming.
    pub fn is_reporting(&self) -> bool {
        self.reporter.is_running()
    }

    /// Stops the status timer, then closes every vnode, keeping repositories on disk.
    pub async fn cleanup(self) {
        self.reporter.stop().await;
        self.mgmt.cleanup_vnodes();
        info!("dnode management stopped");
    }
}
