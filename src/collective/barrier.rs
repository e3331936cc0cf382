use crate::error::{Result, StratumError};
use crate::transport::{Group, Transport};

/// Barrier over `group`. Configuration error when no collective layer is
/// built in.
pub(crate) fn try_barrier(transport: &dyn Transport, group: &Group) -> Result<()> {
    if !transport.capabilities().available {
        return Err(StratumError::Unsupported { op: "barrier" });
    }
    transport.barrier(group)
}
