use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a vnode group; unique key of a vnode within one data node
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VgroupId(i32);

impl VgroupId {
    /// Creates a new VgroupId from a raw i32 value
    pub fn new(id: i32) -> Self {
        VgroupId(id)
    }

    /// Returns the raw i32 value of this vgroup ID
    pub fn as_i32(&self) -> i32 {
        self.0
    }

    /// Name of the repository directory for this vgroup under the node data directory
    pub fn dir_name(&self) -> String {
        format!("vnode{}", self.0)
    }

    /// Parses a repository directory name produced by [`VgroupId::dir_name`]
    pub fn from_dir_name(name: &str) -> Option<Self> {
        name.strip_prefix("vnode")?.parse::<i32>().ok().map(VgroupId)
    }
}

impl fmt::Display for VgroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const STATUS_NOT_READY: u8 = 0;
const STATUS_MASTER: u8 = 1;
const STATUS_SLAVE: u8 = 2;
const STATUS_DELETING: u8 = 3;

/// Replication role and availability of a vnode
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VnodeStatus {
    /// Opened or created but not yet assigned a role
    NotReady,
    /// Serving reads and writes for its vgroup
    Master,
    /// Following the master of its vgroup
    Slave,
    /// Being dropped; never handed out again
    Deleting,
}

impl VnodeStatus {
    /// Whether a lifecycle handler may move a vnode from `self` to `next`.
    ///
    /// Roles are only assigned out of `NotReady`; any live status may start
    /// deleting; nothing leaves `Deleting`. Shutdown teardown may park a live
    /// vnode back in `NotReady`.
    pub fn can_transition_to(self, next: VnodeStatus) -> bool {
        match (self, next) {
            (VnodeStatus::Deleting, _) => false,
            (VnodeStatus::NotReady, VnodeStatus::Master | VnodeStatus::Slave) => true,
            (_, VnodeStatus::Deleting) => true,
            (VnodeStatus::Master | VnodeStatus::Slave, VnodeStatus::NotReady) => true,
            _ => false,
        }
    }
}

impl From<u8> for VnodeStatus {
    fn from(raw: u8) -> Self {
        match raw {
            STATUS_MASTER => VnodeStatus::Master,
            STATUS_SLAVE => VnodeStatus::Slave,
            STATUS_DELETING => VnodeStatus::Deleting,
            _ => VnodeStatus::NotReady,
        }
    }
}

impl From<VnodeStatus> for u8 {
    fn from(status: VnodeStatus) -> Self {
        match status {
            VnodeStatus::NotReady => STATUS_NOT_READY,
            VnodeStatus::Master => STATUS_MASTER,
            VnodeStatus::Slave => STATUS_SLAVE,
            VnodeStatus::Deleting => STATUS_DELETING,
        }
    }
}

impl fmt::Display for VnodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VnodeStatus::NotReady => "not-ready",
            VnodeStatus::Master => "master",
            VnodeStatus::Slave => "slave",
            VnodeStatus::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

/// Data synchronisation state of a vnode relative to its vgroup peers
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// No sync has been attempted
    Init,
    /// Catching up with the master
    Syncing,
    /// In sync with the master
    Synced,
}

impl From<u8> for SyncStatus {
    fn from(raw: u8) -> Self {
        match raw {
            1 => SyncStatus::Syncing,
            2 => SyncStatus::Synced,
            _ => SyncStatus::Init,
        }
    }
}

impl From<SyncStatus> for u8 {
    fn from(status: SyncStatus) -> Self {
        match status {
            SyncStatus::Init => 0,
            SyncStatus::Syncing => 1,
            SyncStatus::Synced => 2,
        }
    }
}

/// Timestamp precision of a vnode's time-series data
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    /// Millisecond timestamps
    Milli,
    /// Microsecond timestamps
    Micro,
    /// Nanosecond timestamps
    Nano,
}

impl Precision {
    /// Wire representation of this precision
    pub fn as_u8(self) -> u8 {
        match self {
            Precision::Milli => 0,
            Precision::Micro => 1,
            Precision::Nano => 2,
        }
    }

    /// Parses the wire representation, returning None for unknown values
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Precision::Milli),
            1 => Some(Precision::Micro),
            2 => Some(Precision::Nano),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vgroup_dir_name() {
        let id = VgroupId::new(42);
        assert_eq!(id.dir_name(), "vnode42");
        assert_eq!(VgroupId::from_dir_name("vnode42"), Some(id));
        assert_eq!(VgroupId::from_dir_name("vnode"), None);
        assert_eq!(VgroupId::from_dir_name("vnodex"), None);
        assert_eq!(VgroupId::from_dir_name("mnode1"), None);
    }

    #[test]
    fn test_status_u8_conversion() {
        for status in [
            VnodeStatus::NotReady,
            VnodeStatus::Master,
            VnodeStatus::Slave,
            VnodeStatus::Deleting,
        ] {
            assert_eq!(VnodeStatus::from(u8::from(status)), status);
        }
        assert_eq!(VnodeStatus::from(200), VnodeStatus::NotReady);
    }

    #[test]
    fn test_status_transitions() {
        use VnodeStatus::*;
        assert!(NotReady.can_transition_to(Master));
        assert!(NotReady.can_transition_to(Slave));
        assert!(NotReady.can_transition_to(Deleting));
        assert!(Master.can_transition_to(Deleting));
        assert!(Slave.can_transition_to(Deleting));
        assert!(Master.can_transition_to(NotReady));

        assert!(!Deleting.can_transition_to(NotReady));
        assert!(!Deleting.can_transition_to(Master));
        assert!(!Master.can_transition_to(Slave));
        assert!(!Slave.can_transition_to(Master));
    }

    #[test]
    fn test_precision_wire_values() {
        assert_eq!(Precision::from_u8(0), Some(Precision::Milli));
        assert_eq!(Precision::from_u8(2), Some(Precision::Nano));
        assert_eq!(Precision::from_u8(3), None);
        assert_eq!(Precision::Micro.as_u8(), 1);
    }
}
