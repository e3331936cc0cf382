use crate::error::{Result, StratumError};
use crate::transport::{Group, Transport};
use crate::types::MASTER_RANK;

/// Copy the master rank's buffer to every other member of `group`.
pub(crate) fn try_broadcast(transport: &dyn Transport, group: &Group, buf: &mut [u8]) -> Result<()> {
    if !transport.capabilities().available {
        return Err(StratumError::Unsupported { op: "broadcast" });
    }
    transport.broadcast(group, buf, MASTER_RANK)
}
