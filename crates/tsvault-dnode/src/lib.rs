#![warn(missing_docs)]

//! TsVault data node management subsystem: vnode registry, vnode lifecycle, management dispatch
//!
//! A data node hosts many vnodes, one per vgroup replica. This crate opens,
//! creates, drops, and closes them in response to controller messages while
//! the read/write path borrows them concurrently, and periodically reports the
//! node's vnode census back to the controller.

pub mod config;
pub mod dispatch;
pub mod dnode;
pub mod error;
pub mod message;
pub mod mgmt;
pub mod registry;
pub mod repo;
pub mod status;
pub mod types;
pub mod vnode;
pub mod worker;

pub use config::DnodeConfig;
pub use dispatch::MgmtDispatcher;
pub use dnode::Dnode;
pub use error::{DnodeError, DnodeResult, StorageError, StorageResult};
pub use message::{CreateVnodeMsg, DropVnodeMsg, MgmtMsgType, RpcHandle, RpcMsg, RpcResponse, Transport};
pub use mgmt::DnodeMgmt;
pub use registry::VnodeRegistry;
pub use repo::{FsRepoEngine, RepoConfig, RepoEngine, RepoStats, Repository};
pub use status::{LogStatusSink, StatusMsg, StatusReporter, StatusSink, VnodeLoad};
pub use types::{Precision, SyncStatus, VgroupId, VnodeStatus};
pub use vnode::{Attachment, AttachmentSlot, Vnode, VnodeRef};
pub use worker::{LocalWorkerPool, WorkerHandle, WorkerKind, WorkerPool};
