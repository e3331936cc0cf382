//! The collective transport abstraction.
//!
//! The communicator layer never talks to a network directly; it drives an
//! implementation of [`Transport`], which supplies process-group lifecycle,
//! group splitting, and the raw reduction/broadcast primitives. Backends
//! differ in one capability that matters to the reduction engine: whether
//! they can reduce into the caller's buffer in place, or need a separate
//! receive buffer.

mod loopback;

pub use loopback::{LoopbackOptions, LoopbackTransport};

use crate::error::{Result, StratumError};
use crate::types::{DataType, Rank};

/// Static facts about the active transport configuration.
///
/// Pure queries with no failure modes; consumers branch on both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether a collective layer exists at all. When false, every
    /// collective operation is a configuration error.
    pub available: bool,
    /// Whether the transport supports reducing into the caller's buffer
    /// without a separate receive buffer.
    pub in_place: bool,
}

/// Opaque handle to a subset of the transport's processes.
///
/// Handles are created by [`Transport::split`] and released with
/// [`Transport::free_group`]. The world group is never freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Group(pub(crate) u64);

impl Group {
    pub(crate) const WORLD: Group = Group(0);
}

/// A collective communication backend.
///
/// All group operations are collective: every member of the group must make
/// the matching call, in the same relative order, or the call blocks
/// indefinitely. This is a correctness precondition of the caller, not
/// something a backend can enforce.
pub trait Transport: Send + Sync {
    /// What this backend can do. See [`Capabilities`].
    fn capabilities(&self) -> Capabilities;

    /// Bring up the process-wide transport instance. Called through
    /// [`crate::lifecycle::init`], which makes it idempotent.
    fn init(&self) -> Result<()>;

    /// Whether `init` has completed for this process.
    fn is_initialized(&self) -> bool;

    /// Whether `finalize` has completed for this process.
    fn is_finalized(&self) -> bool;

    /// Tear down the transport. Terminal; use
    /// [`crate::lifecycle::finalize`] for the drain-then-finalize sequence.
    fn finalize(&self) -> Result<()>;

    /// The group containing every process of the run.
    fn world(&self) -> Group;

    /// This process's rank within `group`.
    fn rank(&self, group: &Group) -> Result<Rank>;

    /// Number of processes in `group`.
    fn size(&self, group: &Group) -> Result<u32>;

    /// Block until every member of `group` has entered the barrier.
    fn barrier(&self, group: &Group) -> Result<()>;

    /// Copy `root`'s buffer contents to every other member of `group`.
    fn broadcast(&self, group: &Group, buf: &mut [u8], root: Rank) -> Result<()>;

    /// Rooted sum-reduction: `root`'s buffer accumulates the element-wise
    /// sum; other members contribute their buffer, whose contents are
    /// unspecified afterwards. Valid only when the `in_place` capability is
    /// set.
    fn reduce_sum_in_place(
        &self,
        group: &Group,
        buf: &mut [u8],
        dtype: DataType,
        root: Rank,
    ) -> Result<()>;

    /// All-to-all sum-reduction into the caller's buffer. Valid only when
    /// the `in_place` capability is set.
    fn allreduce_sum_in_place(&self, group: &Group, buf: &mut [u8], dtype: DataType) -> Result<()>;

    /// All-to-all sum-reduction through a separate receive buffer, for
    /// backends without the in-place optimization. `send` and `recv` must
    /// be the same length.
    fn allreduce_sum(
        &self,
        group: &Group,
        send: &[u8],
        recv: &mut [u8],
        dtype: DataType,
    ) -> Result<()>;

    /// Partition `group`: members passing equal `color` end up in the same
    /// subgroup, ordered by `key` (ties broken by original rank). Every
    /// member of `group` must participate, even if it discards the result.
    fn split(&self, parent: &Group, color: u32, key: u32) -> Result<Group>;

    /// Release a group handle obtained from [`Transport::split`].
    fn free_group(&self, group: Group);

    /// This process's resolvable host name, up to the backend's length
    /// limit. `None` means the run is confined to a single physical node by
    /// construction and topology discovery can be skipped.
    fn processor_name(&self) -> Option<String> {
        Some(gethostname::gethostname().to_string_lossy().into_owned())
    }

    /// Kill every process of `group`. Used only from the fatal-termination
    /// path; the caller exits afterwards regardless.
    fn abort(&self, group: &Group, code: i32);
}

/// The "built without a collective layer" configuration.
///
/// A world of exactly one process. Rank and size queries work; every
/// collective operation reports [`StratumError::Unsupported`], which the
/// public entry points escalate to a fatal configuration error.
#[derive(Debug, Default)]
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for NullTransport {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            available: false,
            in_place: false,
        }
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        false
    }

    fn is_finalized(&self) -> bool {
        false
    }

    fn finalize(&self) -> Result<()> {
        Ok(())
    }

    fn world(&self) -> Group {
        Group::WORLD
    }

    fn rank(&self, _group: &Group) -> Result<Rank> {
        Ok(0)
    }

    fn size(&self, _group: &Group) -> Result<u32> {
        Ok(1)
    }

    fn barrier(&self, _group: &Group) -> Result<()> {
        Err(StratumError::Unsupported { op: "barrier" })
    }

    fn broadcast(&self, _group: &Group, _buf: &mut [u8], _root: Rank) -> Result<()> {
        Err(StratumError::Unsupported { op: "broadcast" })
    }

    fn reduce_sum_in_place(
        &self,
        _group: &Group,
        _buf: &mut [u8],
        _dtype: DataType,
        _root: Rank,
    ) -> Result<()> {
        Err(StratumError::Unsupported {
            op: "reduce_sum_in_place",
        })
    }

    fn allreduce_sum_in_place(
        &self,
        _group: &Group,
        _buf: &mut [u8],
        _dtype: DataType,
    ) -> Result<()> {
        Err(StratumError::Unsupported {
            op: "allreduce_sum_in_place",
        })
    }

    fn allreduce_sum(
        &self,
        _group: &Group,
        _send: &[u8],
        _recv: &mut [u8],
        _dtype: DataType,
    ) -> Result<()> {
        Err(StratumError::Unsupported { op: "allreduce_sum" })
    }

    fn split(&self, _parent: &Group, _color: u32, _key: u32) -> Result<Group> {
        Err(StratumError::Unsupported { op: "split" })
    }

    fn free_group(&self, _group: Group) {}

    fn processor_name(&self) -> Option<String> {
        None
    }

    fn abort(&self, _group: &Group, _code: i32) {}
}
