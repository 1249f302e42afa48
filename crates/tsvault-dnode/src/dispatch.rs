//! Management message dispatch.
//!
//! Every inbound message produces exactly one reply carrying a result code,
//! and its payload buffer is handed back to the transport exactly once,
//! whatever the handler did.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{result_code, DnodeError, DnodeResult};
use crate::message::{
    CreateVnodeMsg, DropVnodeMsg, MgmtMsgType, RpcMsg, RpcResponse, Transport,
};
use crate::mgmt::DnodeMgmt;

/// Routes management messages to vnode lifecycle handlers.
pub struct MgmtDispatcher {
    mgmt: Arc<DnodeMgmt>,
    transport: Arc<dyn Transport>,
}

impl MgmtDispatcher {
    /// Creates a dispatcher replying over `transport`.
    pub fn new(mgmt: Arc<DnodeMgmt>, transport: Arc<dyn Transport>) -> Self {
        Self { mgmt, transport }
    }

    /// Handles one message, replies, and releases its buffer. Returns the reply code.
    pub fn dispatch(&self, msg: RpcMsg) -> i32 {
        let RpcMsg {
            handle,
            msg_type,
            cont,
        } = msg;

        let result = match MgmtMsgType::from_u8(msg_type) {
            Some(kind) => self.handle(kind, &cont),
            None => Err(DnodeError::MessageNotProcessed(msg_type)),
        };

        let code = result_code(&result);
        match &result {
            Ok(()) => debug!(msg_type, ?handle, "management message processed"),
            Err(e) => warn!(msg_type, ?handle, code, error = %e, "management message failed"),
        }

        self.transport.send_response(RpcResponse { handle, code });
        self.transport.free_cont(cont);
        code
    }

    fn handle(&self, kind: MgmtMsgType, payload: &[u8]) -> DnodeResult<()> {
        match kind {
            MgmtMsgType::CreateVnode => self.process_create_vnode(payload),
            MgmtMsgType::DropVnode => self.process_drop_vnode(payload),
            MgmtMsgType::AlterVnode => self.process_alter_vnode(payload),
            MgmtMsgType::AlterStream => self.process_alter_stream(payload),
            MgmtMsgType::ConfigDnode => self.process_config_dnode(payload),
        }
    }

    fn process_create_vnode(&self, payload: &[u8]) -> DnodeResult<()> {
        let msg = CreateVnodeMsg::decode(payload)?;
        self.mgmt.create_vnode(&msg)
    }

    fn process_drop_vnode(&self, payload: &[u8]) -> DnodeResult<()> {
        let msg = DropVnodeMsg::decode(payload)?;
        self.mgmt.drop_vnode(msg.vgroup_id)
    }

    // Alter carries the create layout; an existing vnode is left as is.
    fn process_alter_vnode(&self, payload: &[u8]) -> DnodeResult<()> {
        let msg = CreateVnodeMsg::decode(payload)?;
        self.mgmt.create_vnode(&msg)
    }

    fn process_alter_stream(&self, payload: &[u8]) -> DnodeResult<()> {
        debug!(len = payload.len(), "alter stream not implemented, ignoring");
        Ok(())
    }

    fn process_config_dnode(&self, payload: &[u8]) -> DnodeResult<()> {
        debug!(len = payload.len(), "dynamic config not implemented, ignoring");
        Ok(())
    }
}
