//! Error types for the data node management subsystem.
//!
//! Every error surfaces to the cluster controller only as a numeric code in the
//! reply message, so each variant maps to a stable code via [`DnodeError::code`].

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{VgroupId, VnodeStatus};

/// Reply code for a successfully handled message.
pub const CODE_SUCCESS: i32 = 0;
/// The message tag has no handler.
pub const CODE_MSG_NOT_PROCESSED: i32 = 3;
/// The vnode registry is at capacity.
pub const CODE_RESOURCE_EXHAUSTED: i32 = 8;
/// The message payload is shorter than its fixed layout.
pub const CODE_INVALID_MSG_LEN: i32 = 11;
/// A payload field carries a value outside its domain.
pub const CODE_INVALID_MSG_CONTENT: i32 = 12;
/// No vnode is registered for the vgroup.
pub const CODE_INVALID_VGROUP_ID: i32 = 102;
/// The vnode exists but is not serving as master.
pub const CODE_INVALID_VNODE_STATUS: i32 = 103;
/// A vnode for the vgroup is already registered.
pub const CODE_VGROUP_ALREADY_EXISTS: i32 = 104;
/// The storage repository does not exist on disk.
pub const CODE_REPO_NOT_FOUND: i32 = 201;
/// A storage repository already exists at the target path.
pub const CODE_REPO_ALREADY_EXISTS: i32 = 202;
/// The storage repository metadata is unreadable.
pub const CODE_REPO_CORRUPTED: i32 = 203;
/// The storage layer hit an I/O error.
pub const CODE_STORAGE_IO: i32 = 204;
/// The status timer could not be armed.
pub const CODE_TIMER: i32 = 301;
/// The node configuration is invalid.
pub const CODE_CONFIG: i32 = 302;

/// Result type alias for storage repository operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for data node management operations.
pub type DnodeResult<T> = Result<T, DnodeError>;

/// Errors raised by the storage repository layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No repository exists at the given root.
    #[error("repository not found at {}", path.display())]
    RepoNotFound {
        /// Repository root directory.
        path: PathBuf,
    },

    /// A repository already exists at the given root.
    #[error("repository already exists at {}", path.display())]
    RepoAlreadyExists {
        /// Repository root directory.
        path: PathBuf,
    },

    /// The repository metadata could not be parsed.
    #[error("repository at {} is corrupted: {reason}", path.display())]
    RepoCorrupted {
        /// Repository root directory.
        path: PathBuf,
        /// Description of the corruption.
        reason: String,
    },
}

impl StorageError {
    /// Returns the reply code for this error.
    pub fn code(&self) -> i32 {
        match self {
            StorageError::Io(_) => CODE_STORAGE_IO,
            StorageError::RepoNotFound { .. } => CODE_REPO_NOT_FOUND,
            StorageError::RepoAlreadyExists { .. } => CODE_REPO_ALREADY_EXISTS,
            StorageError::RepoCorrupted { .. } => CODE_REPO_CORRUPTED,
        }
    }
}

/// Errors raised by vnode lifecycle handlers and the management dispatcher.
#[derive(Debug, Error)]
pub enum DnodeError {
    /// No vnode is registered for the vgroup.
    #[error("invalid vgroup id {0}")]
    InvalidVgroupId(VgroupId),

    /// The vnode is not in a status that allows the operation.
    #[error("vnode for vgroup {vgroup_id} has invalid status {status}")]
    InvalidVnodeStatus {
        /// Vgroup of the vnode.
        vgroup_id: VgroupId,
        /// Status observed at the time of the request.
        status: VnodeStatus,
    },

    /// A vnode for this vgroup is already registered.
    #[error("vgroup {0} already has a vnode")]
    VgroupAlreadyExists(VgroupId),

    /// The management message tag has no handler.
    #[error("message type {0:#04x} not processed")]
    MessageNotProcessed(u8),

    /// The vnode registry is full.
    #[error("vnode registry exhausted: capacity {capacity}")]
    ResourceExhausted {
        /// Configured registry capacity.
        capacity: usize,
    },

    /// The payload is shorter than the message layout requires.
    #[error("invalid message length: expected {expected} bytes, got {actual}")]
    InvalidMsgLen {
        /// Bytes required by the layout.
        expected: usize,
        /// Bytes present in the payload.
        actual: usize,
    },

    /// A payload field is out of range.
    #[error("invalid message content: {0}")]
    InvalidMsgContent(String),

    /// Pass-through storage repository error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The status timer could not be started.
    #[error("timer error: {0}")]
    Timer(String),

    /// The node configuration is invalid.
    #[error("config error: {0}")]
    Config(String),
}

impl DnodeError {
    /// Returns the reply code sent to the cluster controller for this error.
    pub fn code(&self) -> i32 {
        match self {
            DnodeError::InvalidVgroupId(_) => CODE_INVALID_VGROUP_ID,
            DnodeError::InvalidVnodeStatus { .. } => CODE_INVALID_VNODE_STATUS,
            DnodeError::VgroupAlreadyExists(_) => CODE_VGROUP_ALREADY_EXISTS,
            DnodeError::MessageNotProcessed(_) => CODE_MSG_NOT_PROCESSED,
            DnodeError::ResourceExhausted { .. } => CODE_RESOURCE_EXHAUSTED,
            DnodeError::InvalidMsgLen { .. } => CODE_INVALID_MSG_LEN,
            DnodeError::InvalidMsgContent(_) => CODE_INVALID_MSG_CONTENT,
            DnodeError::Storage(e) => e.code(),
            DnodeError::Timer(_) => CODE_TIMER,
            DnodeError::Config(_) => CODE_CONFIG,
        }
    }
}

/// Collapses a handler outcome into a reply code.
pub fn result_code<T>(result: &DnodeResult<T>) -> i32 {
    match result {
        Ok(_) => CODE_SUCCESS,
        Err(e) => e.code(),
    }
}
