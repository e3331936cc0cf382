//! Process-wide transport lifecycle: idempotent init, drain-then-finalize,
//! and the fatal-termination path.
//!
//! The state machine per transport instance is
//! `Uninitialized → Initialized → Finalized`, with `Finalized` terminal.
//! Both transitions are safe to request more than once.

use crate::error::{Result, StratumError};
use crate::transport::Transport;
use crate::types::Rank;

/// Bring up the transport. No-op when it is already initialized.
pub fn init(transport: &dyn Transport) -> Result<()> {
    if transport.is_initialized() {
        return Ok(());
    }
    transport.init()
}

/// Tear down the transport.
///
/// No-op when the transport is absent, never came up, or is already
/// finalized — finalize may be invoked from multiple unwinding paths and
/// must be safe each time. Otherwise a world barrier lets in-flight
/// transport operations drain before teardown; some transports misbehave
/// when finalized with traffic still in the air.
pub fn finalize(transport: &dyn Transport) -> Result<()> {
    if !transport.capabilities().available {
        return Ok(());
    }
    if !transport.is_initialized() {
        return Ok(());
    }
    if transport.is_finalized() {
        return Ok(());
    }

    transport.barrier(&transport.world())?;

    tracing::debug!("finalizing transport");
    transport.finalize()
}

/// Deliberate kill-switch: print which of `nranks` cooperating processes is
/// halting, terminate the whole process group, and exit with `code`.
///
/// Never returns. Used when continuing would corrupt results.
pub fn abort(transport: &dyn Transport, rank: Rank, nranks: u32, code: i32) -> ! {
    if nranks > 1 {
        eprintln!("Halting parallel program on rank {rank} out of {nranks}");
    } else {
        eprintln!("Halting program");
    }
    tracing::error!(rank, nranks, code, "aborting process group");
    transport.abort(&transport.world(), code);
    std::process::exit(code);
}

/// Escalate a failed collective to a group abort.
///
/// Collectives are synchronization points: once some ranks may have
/// observed a result, the operation cannot be replayed, so the only safe
/// continuation is none at all.
pub(crate) fn comm_failure(
    transport: &dyn Transport,
    rank: Rank,
    nranks: u32,
    op: &str,
    err: StratumError,
) -> ! {
    tracing::error!(op, error = %err, "collective communication failed");
    eprintln!("Fatal error in collective {op}: {err}");
    abort(transport, rank, nranks, 1)
}
