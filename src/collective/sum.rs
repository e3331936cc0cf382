//! The hierarchical sum-reduction engine.
//!
//! One generic operation covers all element types; the algorithm is chosen
//! per call from two facts established at setup: whether the work group's
//! node decomposition is worthwhile, and whether the transport can reduce
//! in place. Four shapes fall out:
//!
//! - flat, in place: one all-reduce over the group;
//! - flat, staged: all-reduce into scratch, copy back;
//! - two-level, in place: rooted reduce within the node, all-reduce among
//!   node representatives, broadcast back within the node;
//! - two-level, staged: all-reduce within the node into scratch,
//!   representatives all-reduce with the buffers reversed, broadcast back.

use crate::comm::{NodeComm, WorkGroup};
use crate::error::{Result, StratumError};
use crate::lifecycle;
use crate::reduce::as_bytes_mut;
use crate::transport::{Group, Transport};
use crate::types::{CommElement, MASTER_RANK};

/// Sum `elems` element-wise across the work group.
pub(crate) fn try_sum<T: CommElement>(wg: &WorkGroup, elems: &mut [T]) -> Result<()> {
    let transport = wg.transport();
    let caps = transport.capabilities();
    if !caps.available {
        return Err(StratumError::Unsupported { op: "sum" });
    }

    let dtype = T::DTYPE;
    let bytes = as_bytes_mut(elems);

    match wg.node() {
        NodeComm::TwoLevel {
            intra,
            inter,
            intra_rank,
            ..
        } => {
            if caps.in_place {
                if *intra_rank == 0 {
                    transport.reduce_sum_in_place(intra, bytes, dtype, MASTER_RANK)?;
                    // Sum the nodes' partial sums among the representatives.
                    transport.allreduce_sum_in_place(representative_group(inter)?, bytes, dtype)?;
                } else {
                    // Contribute only; this rank's buffer need not hold the
                    // intra-node partial sum.
                    transport.reduce_sum_in_place(intra, bytes, dtype, MASTER_RANK)?;
                }
                transport.broadcast(intra, bytes, MASTER_RANK)?;
            } else {
                let mut scratch = wg.scratch();
                let buf = scratch.acquire(dtype, bytes.len());
                transport.allreduce_sum(intra, bytes, buf, dtype)?;
                if *intra_rank == 0 {
                    // Buffers reversed: partial sums go out, totals come back.
                    transport.allreduce_sum(representative_group(inter)?, buf, bytes, dtype)?;
                }
                transport.broadcast(intra, bytes, MASTER_RANK)?;
            }
        }
        NodeComm::Flat { .. } => {
            if caps.in_place {
                transport.allreduce_sum_in_place(wg.group(), bytes, dtype)?;
            } else {
                let mut scratch = wg.scratch();
                let buf = scratch.acquire(dtype, bytes.len());
                transport.allreduce_sum(wg.group(), bytes, buf, dtype)?;
                bytes.copy_from_slice(buf);
            }
        }
    }
    Ok(())
}

fn representative_group(inter: &Option<Group>) -> Result<&Group> {
    inter.as_ref().ok_or_else(|| StratumError::Topology {
        reason: "representative rank lost its inter-node group".into(),
    })
}

/// Sum `elems` element-wise across an explicitly supplied group, bypassing
/// any work group's node decomposition — always a flat reduction. Used for
/// reductions across a different process dimension, such as
/// cross-simulation ensemble masters. A transport fault is fatal for the
/// whole process group, as with [`WorkGroup::sum`].
pub fn sum_group<T: CommElement>(transport: &dyn Transport, group: &Group, elems: &mut [T]) {
    if let Err(e) = try_sum_group(transport, group, elems) {
        let rank = transport.rank(group).unwrap_or(0);
        let size = transport.size(group).unwrap_or(1);
        lifecycle::comm_failure(transport, rank, size, "sum_group", e);
    }
}

pub(crate) fn try_sum_group<T: CommElement>(
    transport: &dyn Transport,
    group: &Group,
    elems: &mut [T],
) -> Result<()> {
    let caps = transport.capabilities();
    if !caps.available {
        return Err(StratumError::Unsupported { op: "sum_group" });
    }

    let dtype = T::DTYPE;
    let bytes = as_bytes_mut(elems);
    if caps.in_place {
        transport.allreduce_sum_in_place(group, bytes, dtype)
    } else {
        // Off the simulation's hot path; a fresh buffer per call is fine.
        let mut buf = vec![0u8; bytes.len()];
        transport.allreduce_sum(group, bytes, &mut buf, dtype)?;
        bytes.copy_from_slice(&buf);
        Ok(())
    }
}
