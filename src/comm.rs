//! The per-process communicator record and the node-aware group builder.
//!
//! Many transports do not optimize all-to-all reductions for multi-core
//! nodes connected by a network. When the work group spans several physical
//! hosts with several ranks each, summing in two steps — once within each
//! node, once between node representatives — cuts the fan-in on the
//! inter-node network from `n` ranks to one per host.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::collective;
use crate::config::CommConfig;
use crate::error::Result;
use crate::lifecycle;
use crate::profile::{NoopCounter, OpCounter, OpKind};
use crate::reduce::as_bytes_mut;
use crate::topology::resolve_host_id;
use crate::transport::{Group, Transport};
use crate::types::{CommElement, DataType, Rank, MASTER_RANK};

/// Node decomposition of one work group, built once at setup.
///
/// `TwoLevel` is chosen only when the host split actually reduces some
/// rank's fan-in relative to a flat reduction; degenerate splits (one node,
/// or all-singleton nodes) fall back to `Flat`.
#[derive(Debug)]
pub enum NodeComm {
    /// Flat summing over the whole work group.
    Flat {
        /// Kept from the split for diagnostics even when unused.
        intra_rank: Rank,
    },
    /// Two-step summing: reduce within each host, all-reduce between host
    /// representatives, broadcast back within each host.
    TwoLevel {
        /// Ranks sharing this process's physical host.
        intra: Group,
        /// Representatives of every host. Retained only where
        /// `intra_rank == 0`; other ranks release their handle at build.
        inter: Option<Group>,
        /// This process's rank within `intra`.
        intra_rank: Rank,
        /// Number of intra-node groups.
        node_groups: u32,
        /// Size of this process's intra-node group.
        node_size: u32,
    },
}

impl NodeComm {
    /// Whether two-step summing is active.
    pub fn two_level(&self) -> bool {
        matches!(self, NodeComm::TwoLevel { .. })
    }

    /// This process's rank within its intra-node group.
    pub fn intra_rank(&self) -> Rank {
        match self {
            NodeComm::Flat { intra_rank } | NodeComm::TwoLevel { intra_rank, .. } => *intra_rank,
        }
    }

    /// Number of intra-node groups, when two-step summing is active.
    pub fn node_groups(&self) -> Option<u32> {
        match self {
            NodeComm::Flat { .. } => None,
            NodeComm::TwoLevel { node_groups, .. } => Some(*node_groups),
        }
    }

    /// Size of this process's intra-node group, when two-step summing is
    /// active.
    pub fn node_size(&self) -> Option<u32> {
        match self {
            NodeComm::Flat { .. } => None,
            NodeComm::TwoLevel { node_size, .. } => Some(*node_size),
        }
    }

    /// Partition `group` by physical host and decide whether the two-level
    /// scheme is worthwhile. Collective over `group`; runs once at setup,
    /// off the simulation's hot path.
    pub(crate) fn build(
        transport: &dyn Transport,
        group: &Group,
        cfg: &CommConfig,
    ) -> Result<NodeComm> {
        if !transport.capabilities().available {
            return Ok(NodeComm::Flat { intra_rank: 0 });
        }

        let n = transport.size(group)?;
        let rank = transport.rank(group)?;
        let hostnum = resolve_host_id(transport);

        tracing::debug!(n, rank, hostnum, "splitting communicator by host");

        // The intra-node group, split on host number.
        let intra = transport.split(group, hostnum, rank)?;
        let intra_rank = transport.rank(&intra)?;

        // The inter-node group, split on intra rank. Only the hosts'
        // rank-0 representatives will use theirs, but the split primitive
        // requires every rank to participate.
        let inter = transport.split(group, intra_rank, rank)?;

        let ng = transport.size(&inter)?;
        let ni = transport.size(&intra)?;

        let worthwhile = (ng > 1 && ng < n) || (ni > 1 && ni < n);
        if worthwhile && !cfg.no_two_level {
            tracing::debug!(
                ng,
                ni,
                avg = n as f64 / ng as f64,
                "using two-step summing over node groups"
            );
            let inter = if intra_rank == 0 {
                Some(inter)
            } else {
                transport.free_group(inter);
                None
            };
            Ok(NodeComm::TwoLevel {
                intra,
                inter,
                intra_rank,
                node_groups: ng,
                node_size: ni,
            })
        } else {
            // One group, or every rank in a group of its own: flat summing.
            transport.free_group(inter);
            transport.free_group(intra);
            tracing::debug!(ng, ni, "not using separate intra- and inter-node groups");
            Ok(NodeComm::Flat { intra_rank })
        }
    }
}

/// Reduction scratch storage for transports without the in-place
/// capability. One buffer per element type, sized to the largest request
/// seen so far; grows monotonically and never shrinks within a run.
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    i32_buf: Vec<u8>,
    i64_buf: Vec<u8>,
    f32_buf: Vec<u8>,
    f64_buf: Vec<u8>,
}

impl Scratch {
    pub(crate) fn acquire(&mut self, dtype: DataType, len: usize) -> &mut [u8] {
        let buf = match dtype {
            DataType::I32 => &mut self.i32_buf,
            DataType::I64 => &mut self.i64_buf,
            DataType::F32 => &mut self.f32_buf,
            DataType::F64 => &mut self.f64_buf,
        };
        if buf.len() < len {
            buf.resize(len, 0);
        }
        &mut buf[..len]
    }
}

/// The per-process record for one simulation's cooperating ranks.
///
/// Built once at setup, consulted by every collective call for the run, and
/// torn down at drop (group handles released) or
/// [`WorkGroup::finalize`].
pub struct WorkGroup {
    transport: Arc<dyn Transport>,
    /// Whole-simulation scope, used by [`WorkGroup::broadcast_sim`].
    sim: Group,
    /// Working-subset scope, used by everything else.
    group: Group,
    rank: Rank,
    size: u32,
    node: NodeComm,
    scratch: Mutex<Scratch>,
    counters: Arc<dyn OpCounter>,
    rank_on_node: u32,
    ranks_on_node: u32,
}

impl WorkGroup {
    /// Build the communicator record over the transport's world group,
    /// reading operational switches from the environment.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_config(transport, &CommConfig::from_env())
    }

    /// Build over the world group with explicit configuration.
    pub fn with_config(transport: Arc<dyn Transport>, cfg: &CommConfig) -> Result<Self> {
        let world = transport.world();
        Self::with_groups(transport, world, world, cfg)
    }

    /// Build over explicit simulation and working scopes. Collective over
    /// both scopes; every member must call this during setup.
    pub fn with_groups(
        transport: Arc<dyn Transport>,
        sim: Group,
        group: Group,
        cfg: &CommConfig,
    ) -> Result<Self> {
        lifecycle::init(transport.as_ref())?;

        let rank = transport.rank(&group)?;
        let size = transport.size(&group)?;
        let node = NodeComm::build(transport.as_ref(), &group, cfg)?;
        let (rank_on_node, ranks_on_node) = intranode_counts(transport.as_ref(), &sim)?;

        tracing::debug!(
            rank,
            size,
            intra_rank = node.intra_rank(),
            two_level = node.two_level(),
            rank_on_node,
            ranks_on_node,
            "work group ready"
        );

        Ok(Self {
            transport,
            sim,
            group,
            rank,
            size,
            node,
            scratch: Mutex::new(Scratch::default()),
            counters: Arc::new(NoopCounter),
            rank_on_node,
            ranks_on_node,
        })
    }

    /// Attach a call-count facility; entry points report their operation
    /// kind to it.
    pub fn with_counters(mut self, counters: Arc<dyn OpCounter>) -> Self {
        self.counters = counters;
        self
    }

    /// This process's rank within the working group.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of ranks in the working group.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whether this process is the working group's master rank.
    pub fn is_master(&self) -> bool {
        self.rank == MASTER_RANK
    }

    /// The node decomposition descriptor.
    pub fn node(&self) -> &NodeComm {
        &self.node
    }

    /// How many ranks of the simulation share this process's physical host.
    pub fn ranks_on_node(&self) -> u32 {
        self.ranks_on_node
    }

    /// This process's index among the ranks sharing its physical host.
    pub fn rank_on_node(&self) -> u32 {
        self.rank_on_node
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn group(&self) -> &Group {
        &self.group
    }

    pub(crate) fn scratch(&self) -> MutexGuard<'_, Scratch> {
        self.scratch.lock().expect("scratch lock poisoned")
    }

    /// Element-wise sum across the working group. Every rank ends up
    /// holding the identical sums in `elems`.
    ///
    /// Summation order across ranks is transport-defined, so
    /// floating-point results need not be bit-identical between transports
    /// or topologies; integer sums are exact. A transport fault here is
    /// fatal for the whole process group — reductions are synchronization
    /// points and cannot be replayed.
    pub fn sum<T: CommElement>(&self, elems: &mut [T]) {
        self.counters.record(OpKind::Sum);
        if let Err(e) = collective::try_sum(self, elems) {
            lifecycle::comm_failure(self.transport.as_ref(), self.rank, self.size, "sum", e);
        }
    }

    /// Block until every rank of the working group has entered the barrier.
    pub fn barrier(&self) {
        self.counters.record(OpKind::Barrier);
        if let Err(e) = collective::try_barrier(self.transport.as_ref(), &self.group) {
            lifecycle::comm_failure(self.transport.as_ref(), self.rank, self.size, "barrier", e);
        }
    }

    /// Copy the working group master's buffer to every rank of the working
    /// group.
    pub fn broadcast(&self, buf: &mut [u8]) {
        self.counters.record(OpKind::Broadcast);
        if let Err(e) = collective::try_broadcast(self.transport.as_ref(), &self.group, buf) {
            lifecycle::comm_failure(self.transport.as_ref(), self.rank, self.size, "broadcast", e);
        }
    }

    /// Copy the simulation master's buffer to every rank of the simulation
    /// scope.
    pub fn broadcast_sim(&self, buf: &mut [u8]) {
        self.counters.record(OpKind::Broadcast);
        if let Err(e) = collective::try_broadcast(self.transport.as_ref(), &self.sim, buf) {
            lifecycle::comm_failure(
                self.transport.as_ref(),
                self.rank,
                self.size,
                "broadcast_sim",
                e,
            );
        }
    }

    /// Release the communicator record and finalize the transport
    /// (drain-barrier first, double-finalize suppressed). Collective over
    /// the whole run.
    pub fn finalize(self) -> Result<()> {
        let transport = Arc::clone(&self.transport);
        drop(self);
        lifecycle::finalize(transport.as_ref())
    }
}

impl Drop for WorkGroup {
    fn drop(&mut self) {
        if self.transport.is_finalized() {
            return;
        }
        if let NodeComm::TwoLevel { intra, inter, .. } = &self.node {
            if let Some(inter) = inter {
                self.transport.free_group(*inter);
            }
            self.transport.free_group(*intra);
        }
    }
}

/// Count how many simulation ranks share the calling process's physical
/// host, and this rank's index among them, by summing a host-id-tagged
/// vector across the scope.
///
/// Uses send/receive buffers rather than the in-place primitive so it works
/// on every transport; this runs once at setup and is not latency-sensitive.
fn intranode_counts(transport: &dyn Transport, scope: &Group) -> Result<(u32, u32)> {
    if !transport.capabilities().available {
        // Serial run: one rank, alone on its node.
        return Ok((0, 1));
    }

    let n = transport.size(scope)? as usize;
    let rank = transport.rank(scope)? as usize;
    let mynum = resolve_host_id(transport) as i32;

    let mut nums = vec![0i32; n];
    nums[rank] = mynum;
    let mut summed = vec![0i32; n];
    transport.allreduce_sum(
        scope,
        crate::reduce::as_bytes(&nums),
        as_bytes_mut(&mut summed),
        DataType::I32,
    )?;

    let mut rank_on_node = 0;
    let mut ranks_on_node = 0;
    for (i, &num) in summed.iter().enumerate() {
        if num == mynum {
            ranks_on_node += 1;
            if i < rank {
                rank_on_node += 1;
            }
        }
    }
    Ok((rank_on_node, ranks_on_node))
}
