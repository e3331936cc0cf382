//! # stratum
//!
//! Topology-aware collective summing for distributed simulation workers.
//!
//! Every simulation step, each rank holds per-process partial quantities
//! (energies, virials, signal flags) that must become identical global sums
//! on all ranks. stratum performs that reduction over a pluggable
//! [`Transport`], and — when the work group spans several multi-rank
//! physical hosts — sums in two steps (within each node, then between node
//! representatives) to cut inter-node fan-in.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratum::{LoopbackTransport, WorkGroup};
//!
//! let mut ranks = LoopbackTransport::bootstrap(1);
//! let wg = WorkGroup::new(Arc::new(ranks.remove(0)))?;
//! let mut energies = [0.5f64, 1.5];
//! wg.sum(&mut energies);
//! wg.finalize()?;
//! # Ok::<(), stratum::StratumError>(())
//! ```
//!
//! Collective discipline: every operation here must be invoked by every
//! member of the relevant group, in matching order. There are no timeouts —
//! a rank that never makes the call hangs the rest of its group.

pub mod collective;
pub mod comm;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod profile;
mod reduce;
pub mod topology;
pub mod transport;
pub mod types;

pub use collective::sum_group;
pub use comm::{NodeComm, WorkGroup};
pub use config::CommConfig;
pub use error::{Result, StratumError};
pub use profile::{NoopCounter, OpCounter, OpKind};
pub use transport::{
    Capabilities, Group, LoopbackOptions, LoopbackTransport, NullTransport, Transport,
};
pub use types::{CommElement, DataType, MASTER_RANK, Rank};
