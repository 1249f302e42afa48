//! Vnode lifecycle: open, create, drop, clean up, and hand out vnodes.

use std::fs;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::config::DnodeConfig;
use crate::error::{DnodeError, DnodeResult, StorageError};
use crate::message::CreateVnodeMsg;
use crate::registry::VnodeRegistry;
use crate::repo::{RepoConfig, RepoEngine, Repository, UNSET};
use crate::types::{VgroupId, VnodeStatus};
use crate::vnode::{Vnode, VnodeRef};
use crate::worker::WorkerPool;

/// Owns the vnode registry and drives every vnode state transition.
pub struct DnodeMgmt {
    config: DnodeConfig,
    registry: VnodeRegistry,
    engine: Arc<dyn RepoEngine>,
    workers: Arc<dyn WorkerPool>,
    reboot_time: u64,
}

impl DnodeMgmt {
    /// Creates the management state with an empty registry sized from the config.
    pub fn new(
        config: DnodeConfig,
        engine: Arc<dyn RepoEngine>,
        workers: Arc<dyn WorkerPool>,
    ) -> DnodeResult<Self> {
        config.validate()?;
        let registry = VnodeRegistry::new(config.max_vnodes);
        let reboot_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        info!(
            data_dir = %config.data_dir.display(),
            max_vnodes = config.max_vnodes,
            "dnode management initialized"
        );
        Ok(Self {
            config,
            registry,
            engine,
            workers,
            reboot_time,
        })
    }

    /// Node configuration.
    pub fn config(&self) -> &DnodeConfig {
        &self.config
    }

    /// The vnode registry.
    pub fn registry(&self) -> &VnodeRegistry {
        &self.registry
    }

    /// Process start time in seconds since the epoch.
    pub fn reboot_time(&self) -> u64 {
        self.reboot_time
    }

    /// Borrows a vnode for the read/write path. Only masters are handed out.
    pub fn get_vnode(&self, vgroup_id: VgroupId) -> DnodeResult<VnodeRef> {
        let vnode = self
            .registry
            .acquire(vgroup_id)
            .ok_or(DnodeError::InvalidVgroupId(vgroup_id))?;

        let status = vnode.status();
        if status != VnodeStatus::Master {
            return Err(DnodeError::InvalidVnodeStatus { vgroup_id, status });
        }
        Ok(vnode)
    }

    /// Gives back a vnode borrowed with [`DnodeMgmt::get_vnode`].
    pub fn release_vnode(&self, vnode: VnodeRef) {
        vnode.release();
    }

    /// Re-attaches the repository already on disk for `vgroup_id`.
    pub fn open_vnode(&self, vgroup_id: VgroupId) -> DnodeResult<()> {
        let root = self.config.vnode_dir(vgroup_id);
        let opened = self.registry.insert_with(vgroup_id, || {
            let repo = self.engine.open(&root)?;
            Ok(self.build_vnode(vgroup_id, repo))
        })?;
        if !opened {
            return Err(DnodeError::VgroupAlreadyExists(vgroup_id));
        }
        info!(vgroup_id = %vgroup_id, root = %root.display(), "vnode opened");
        Ok(())
    }

    /// Creates a repository and vnode for a vgroup. A vgroup that already has a
    /// vnode is left alone and reported as success.
    pub fn create_vnode(&self, msg: &CreateVnodeMsg) -> DnodeResult<()> {
        let vgroup_id = msg.vgroup_id;
        let root = self.config.vnode_dir(vgroup_id);
        let repo_config = RepoConfig {
            tsdb_id: msg.vnode,
            precision: msg.precision,
            max_tables: msg.max_sessions,
            days_per_file: msg.days_per_file,
            min_rows_per_file_block: UNSET,
            max_rows_per_file_block: UNSET,
            keep: UNSET,
            max_cache_size: UNSET as i64,
        };

        let created = self.registry.insert_with(vgroup_id, || {
            let repo = self.engine.create(&root, &repo_config)?;
            Ok(self.build_vnode(vgroup_id, repo))
        })?;
        if created {
            info!(
                vgroup_id = %vgroup_id,
                vnode = msg.vnode,
                max_sessions = msg.max_sessions,
                days_per_file = msg.days_per_file,
                "vnode created"
            );
        } else {
            info!(vgroup_id = %vgroup_id, "vnode already exists, create is a no-op");
        }
        Ok(())
    }

    /// Drops a vnode and deletes its repository from disk.
    ///
    /// Does not wait for outstanding borrowers: they may observe `Deleting`
    /// or a released repository after this returns.
    pub fn drop_vnode(&self, vgroup_id: VgroupId) -> DnodeResult<()> {
        let dropped = self.registry.remove_with(
            vgroup_id,
            |vnode| {
                if let Err(status) = vnode.transition(VnodeStatus::Deleting) {
                    warn!(vgroup_id = %vgroup_id, %status, "vnode already deleting");
                }
            },
            |vnode| {
                let remaining = vnode.release();
                if remaining > 0 {
                    // TODO: drain or hand destruction to the last releaser instead of
                    // dropping under live borrowers.
                    warn!(
                        vgroup_id = %vgroup_id,
                        refs = remaining,
                        "vnode still referenced at drop, not waiting"
                    );
                }

                let result = match vnode.take_repo() {
                    Some(repo) => self.engine.drop_repo(repo),
                    None => Ok(()),
                };
                self.release_handles(vnode);
                result
            },
        )?;

        match dropped {
            Ok(()) => {
                info!(vgroup_id = %vgroup_id, "vnode dropped");
                Ok(())
            }
            Err(e) => {
                error!(vgroup_id = %vgroup_id, error = %e, "failed to drop repository");
                Err(e.into())
            }
        }
    }

    /// Shutdown teardown: releases the vnode's handles and unregisters it,
    /// leaving its repository on disk.
    pub fn cleanup_vnode(&self, vgroup_id: VgroupId) -> DnodeResult<()> {
        self.registry.remove_with(
            vgroup_id,
            |vnode| {
                let _ = vnode.transition(VnodeStatus::NotReady);
            },
            |vnode| {
                let remaining = vnode.release();
                if remaining > 0 {
                    warn!(
                        vgroup_id = %vgroup_id,
                        refs = remaining,
                        "vnode still referenced at cleanup, not waiting"
                    );
                }
                self.release_handles(vnode);
            },
        )?;
        info!(vgroup_id = %vgroup_id, "vnode cleaned up");
        Ok(())
    }

    /// Assigns a replication role to a `NotReady` vnode.
    pub fn set_vnode_role(&self, vgroup_id: VgroupId, role: VnodeStatus) -> DnodeResult<()> {
        self.registry.update(vgroup_id, |vnode| {
            if !matches!(role, VnodeStatus::Master | VnodeStatus::Slave) {
                return Err(DnodeError::InvalidVnodeStatus {
                    vgroup_id,
                    status: role,
                });
            }
            vnode
                .transition(role)
                .map_err(|status| DnodeError::InvalidVnodeStatus { vgroup_id, status })?;
            info!(vgroup_id = %vgroup_id, %role, "vnode role assigned");
            Ok(())
        })?
    }

    /// Opens every `vnode<N>` repository under the data directory.
    pub fn open_vnodes(&self) -> DnodeResult<()> {
        let data_dir = &self.config.data_dir;
        fs::create_dir_all(data_dir).map_err(StorageError::from)?;

        let mut ids = Vec::new();
        for entry in fs::read_dir(data_dir).map_err(StorageError::from)? {
            let entry = entry.map_err(StorageError::from)?;
            if !entry.file_type().map_err(StorageError::from)?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(VgroupId::from_dir_name) {
                ids.push(id);
            }
        }
        ids.sort();

        info!(count = ids.len(), "opening all vnodes");
        for id in ids {
            self.open_vnode(id)?;
        }
        Ok(())
    }

    /// Cleans up every registered vnode.
    pub fn cleanup_vnodes(&self) {
        let ids = self.registry.vgroup_ids();
        info!(count = ids.len(), "cleaning up all vnodes");
        for id in ids {
            if let Err(e) = self.cleanup_vnode(id) {
                warn!(vgroup_id = %id, error = %e, "vnode vanished during cleanup");
            }
        }
    }

    fn build_vnode(&self, vgroup_id: VgroupId, repo: Box<dyn Repository>) -> Vnode {
        let write_worker = self.workers.allocate_write_worker();
        let read_worker = self.workers.allocate_read_worker();
        Vnode::new(vgroup_id, repo, write_worker, read_worker)
    }

    fn release_handles(&self, vnode: &Vnode) {
        for attachment in vnode.take_attachments() {
            attachment.release();
        }
        if let Some((write_worker, read_worker)) = vnode.take_workers() {
            self.workers.free(read_worker);
            self.workers.free(write_worker);
        }
        if let Some(repo) = vnode.take_repo() {
            self.engine.close(repo);
        }
    }
}
