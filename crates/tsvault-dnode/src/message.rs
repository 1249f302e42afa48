//! Management messages exchanged with the cluster controller.
//!
//! Payloads have a fixed layout with every multi-byte integer in network
//! byte order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DnodeError, DnodeResult};
use crate::types::{Precision, VgroupId};

/// Size of a CreateVnode/AlterVnode payload in bytes.
pub const CREATE_VNODE_MSG_LEN: usize = 17;

/// Size of a DropVnode payload in bytes.
pub const DROP_VNODE_MSG_LEN: usize = 4;

/// Management message kinds with a handler on the data node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MgmtMsgType {
    /// Create a vnode for a vgroup.
    CreateVnode = 0x11,
    /// Drop a vnode and its repository.
    DropVnode = 0x13,
    /// Alter a vnode's configuration.
    AlterVnode = 0x15,
    /// Alter a continuous-query stream.
    AlterStream = 0x17,
    /// Apply a dynamic config option.
    ConfigDnode = 0x19,
}

impl MgmtMsgType {
    /// Resolves a raw tag, returning None for tags without a handler.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x11 => Some(MgmtMsgType::CreateVnode),
            0x13 => Some(MgmtMsgType::DropVnode),
            0x15 => Some(MgmtMsgType::AlterVnode),
            0x17 => Some(MgmtMsgType::AlterStream),
            0x19 => Some(MgmtMsgType::ConfigDnode),
            _ => None,
        }
    }

    /// Raw wire tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Transport-level identifier of the connection a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RpcHandle(pub u64);

/// An inbound management request.
#[derive(Debug, Clone)]
pub struct RpcMsg {
    /// Where the reply goes.
    pub handle: RpcHandle,
    /// Raw message tag.
    pub msg_type: u8,
    /// Payload buffer, owned until handed back to the transport.
    pub cont: Bytes,
}

/// Reply to a management request: a code and no body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcResponse {
    /// Connection of the original request.
    pub handle: RpcHandle,
    /// Result code; 0 is success.
    pub code: i32,
}

/// The RPC layer as seen by the management dispatcher.
pub trait Transport: Send + Sync {
    /// Sends a reply back to the requester.
    fn send_response(&self, rsp: RpcResponse);

    /// Returns an inbound payload buffer to the transport.
    fn free_cont(&self, cont: Bytes);
}

/// Payload of CreateVnode and AlterVnode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateVnodeMsg {
    /// Controller-assigned vnode id.
    pub vnode: i32,
    /// Vgroup to host.
    pub vgroup_id: VgroupId,
    /// Upper bound on tables in the vnode.
    pub max_sessions: i32,
    /// Days covered by one data file.
    pub days_per_file: i32,
    /// Timestamp precision.
    pub precision: Precision,
}

impl CreateVnodeMsg {
    /// Decodes a payload.
    pub fn decode(mut buf: &[u8]) -> DnodeResult<Self> {
        check_len(buf, CREATE_VNODE_MSG_LEN)?;
        let vnode = buf.get_i32();
        let vgroup_id = VgroupId::new(buf.get_i32());
        let max_sessions = buf.get_i32();
        let days_per_file = buf.get_i32();
        let raw_precision = buf.get_u8();
        let precision = Precision::from_u8(raw_precision).ok_or_else(|| {
            DnodeError::InvalidMsgContent(format!("unknown precision {}", raw_precision))
        })?;
        Ok(Self {
            vnode,
            vgroup_id,
            max_sessions,
            days_per_file,
            precision,
        })
    }

    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CREATE_VNODE_MSG_LEN);
        buf.put_i32(self.vnode);
        buf.put_i32(self.vgroup_id.as_i32());
        buf.put_i32(self.max_sessions);
        buf.put_i32(self.days_per_file);
        buf.put_u8(self.precision.as_u8());
        buf.freeze()
    }
}

/// Payload of DropVnode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropVnodeMsg {
    /// Vgroup whose vnode is dropped.
    pub vgroup_id: VgroupId,
}

impl DropVnodeMsg {
    /// Decodes a payload.
    pub fn decode(mut buf: &[u8]) -> DnodeResult<Self> {
        check_len(buf, DROP_VNODE_MSG_LEN)?;
        Ok(Self {
            vgroup_id: VgroupId::new(buf.get_i32()),
        })
    }

    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DROP_VNODE_MSG_LEN);
        buf.put_i32(self.vgroup_id.as_i32());
        buf.freeze()
    }
}

fn check_len(buf: &[u8], expected: usize) -> DnodeResult<()> {
    if buf.len() < expected {
        return Err(DnodeError::InvalidMsgLen {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}
