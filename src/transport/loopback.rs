//! In-process transport backend.
//!
//! Every rank of the world holds one [`LoopbackTransport`] handle; the
//! handles share rendezvous state, so threads stand in for processes.
//! Collectives block until every member of the group has made the matching
//! call, exactly like a wire transport would.
//!
//! The backend is fully configurable for exercising the reduction engine:
//! the in-place capability can be switched off to force the staged
//! scratch-buffer path, and synthetic per-rank host names shape the node
//! topology seen by the communicator builder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use indexmap::IndexMap;

use crate::error::{Result, StratumError};
use crate::reduce::accumulate_slice;
use crate::transport::{Capabilities, Group, Transport};
use crate::types::{DataType, Rank};

/// Construction-time switches for a loopback world.
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Advertise (and accept) the in-place reduction primitives.
    pub in_place: bool,
    /// Host name reported by each rank, in world-rank order. `None` models
    /// a run confined to a single physical node by construction.
    pub hostnames: Option<Vec<String>>,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            in_place: true,
            hostnames: None,
        }
    }
}

/// One rank's handle onto a shared in-process world.
pub struct LoopbackTransport {
    shared: Arc<Shared>,
    world_rank: Rank,
}

struct Shared {
    in_place: bool,
    hostnames: Option<Vec<String>>,
    initialized: AtomicBool,
    finalized: AtomicBool,
    abort_code: Mutex<Option<i32>>,
    groups: Mutex<HashMap<u64, Arc<GroupCore>>>,
    next_group_id: AtomicU64,
}

struct GroupCore {
    id: u64,
    /// World ranks of the members; group rank = index.
    members: Vec<Rank>,
    /// Handles not yet released. The core is unregistered when this hits 0.
    live_handles: AtomicU32,
    round: Mutex<Round>,
    cv: Condvar,
}

impl GroupCore {
    fn new(id: u64, members: Vec<Rank>) -> Self {
        let live = members.len() as u32;
        Self {
            id,
            members,
            live_handles: AtomicU32::new(live),
            round: Mutex::new(Round::default()),
            cv: Condvar::new(),
        }
    }
}

/// State of the group's current collective round.
///
/// Generation-counted: a new round cannot begin until every member has
/// picked up the previous result (`draining == 0`).
#[derive(Default)]
struct Round {
    arrived: u32,
    draining: u32,
    generation: u64,
    contrib: Vec<Vec<u8>>,
    result: Vec<u8>,
    failure: Option<String>,
}

impl LoopbackTransport {
    /// Create an in-process world of `world_size` ranks with default
    /// options (in-place capability on, single-node topology).
    pub fn bootstrap(world_size: u32) -> Vec<Self> {
        Self::bootstrap_with(world_size, LoopbackOptions::default())
    }

    /// Create an in-process world with explicit options. Returns one handle
    /// per rank, in world-rank order.
    pub fn bootstrap_with(world_size: u32, opts: LoopbackOptions) -> Vec<Self> {
        assert!(world_size >= 1, "world must have at least one rank");
        if let Some(names) = &opts.hostnames {
            assert_eq!(
                names.len(),
                world_size as usize,
                "one hostname per rank required"
            );
        }

        let world = Arc::new(GroupCore::new(
            Group::WORLD.0,
            (0..world_size).collect(),
        ));
        let mut groups = HashMap::new();
        groups.insert(Group::WORLD.0, world);

        let shared = Arc::new(Shared {
            in_place: opts.in_place,
            hostnames: opts.hostnames,
            initialized: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            abort_code: Mutex::new(None),
            groups: Mutex::new(groups),
            next_group_id: AtomicU64::new(1),
        });

        (0..world_size)
            .map(|world_rank| Self {
                shared: Arc::clone(&shared),
                world_rank,
            })
            .collect()
    }

    /// This handle's rank in the world group.
    pub fn world_rank(&self) -> Rank {
        self.world_rank
    }

    /// Error code recorded by [`Transport::abort`], if any rank aborted.
    pub fn abort_code(&self) -> Option<i32> {
        *self
            .shared
            .abort_code
            .lock()
            .expect("loopback abort lock poisoned")
    }

    fn core(&self, group: &Group) -> Result<Arc<GroupCore>> {
        let groups = self
            .shared
            .groups
            .lock()
            .expect("loopback group registry poisoned");
        groups
            .get(&group.0)
            .cloned()
            .ok_or(StratumError::UnknownGroup { id: group.0 })
    }

    fn member_index(&self, core: &GroupCore) -> Result<usize> {
        core.members
            .iter()
            .position(|&m| m == self.world_rank)
            .ok_or(StratumError::NotInGroup {
                rank: self.world_rank,
                id: core.id,
            })
    }

    /// Run one collective round: deposit `payload`, let the last arrival
    /// combine all contributions, and hand every member the combined bytes.
    ///
    /// A poisoned lock means another rank panicked mid-collective; the
    /// collective contract is already broken, so we propagate the panic.
    fn rendezvous<F>(&self, core: &GroupCore, my_idx: usize, payload: Vec<u8>, combine: F) -> Result<Vec<u8>>
    where
        F: FnOnce(Vec<Vec<u8>>) -> Result<Vec<u8>>,
    {
        let n = core.members.len();
        let mut round = core.round.lock().expect("loopback round lock poisoned");

        // Wait for the previous round to be fully drained.
        while round.draining > 0 {
            round = core.cv.wait(round).expect("loopback round lock poisoned");
        }

        if round.contrib.is_empty() {
            round.contrib = vec![Vec::new(); n];
        }
        round.contrib[my_idx] = payload;
        round.arrived += 1;
        let entered_at = round.generation;

        if round.arrived as usize == n {
            let contribs = std::mem::take(&mut round.contrib);
            match combine(contribs) {
                Ok(out) => {
                    round.result = out;
                    round.failure = None;
                }
                Err(e) => {
                    round.result = Vec::new();
                    round.failure = Some(e.to_string());
                }
            }
            round.arrived = 0;
            round.draining = n as u32;
            round.generation += 1;
            core.cv.notify_all();
        } else {
            while round.generation == entered_at {
                round = core.cv.wait(round).expect("loopback round lock poisoned");
            }
        }

        let out = match &round.failure {
            Some(msg) => Err(StratumError::transport(msg.clone())),
            None => Ok(round.result.clone()),
        };
        round.draining -= 1;
        if round.draining == 0 {
            round.result = Vec::new();
            round.failure = None;
            core.cv.notify_all();
        }
        out
    }
}

fn combine_sum(contribs: Vec<Vec<u8>>, dtype: DataType) -> Result<Vec<u8>> {
    let mut iter = contribs.into_iter();
    let mut acc = iter.next().unwrap_or_default();
    for c in iter {
        accumulate_slice(&mut acc, &c, dtype)?;
    }
    Ok(acc)
}

impl Transport for LoopbackTransport {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            available: true,
            in_place: self.shared.in_place,
        }
    }

    fn init(&self) -> Result<()> {
        self.shared.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    fn is_finalized(&self) -> bool {
        self.shared.finalized.load(Ordering::SeqCst)
    }

    fn finalize(&self) -> Result<()> {
        self.shared.finalized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn world(&self) -> Group {
        Group::WORLD
    }

    fn rank(&self, group: &Group) -> Result<Rank> {
        let core = self.core(group)?;
        Ok(self.member_index(&core)? as Rank)
    }

    fn size(&self, group: &Group) -> Result<u32> {
        let core = self.core(group)?;
        Ok(core.members.len() as u32)
    }

    fn barrier(&self, group: &Group) -> Result<()> {
        let core = self.core(group)?;
        let my_idx = self.member_index(&core)?;
        self.rendezvous(&core, my_idx, Vec::new(), |_| Ok(Vec::new()))?;
        Ok(())
    }

    fn broadcast(&self, group: &Group, buf: &mut [u8], root: Rank) -> Result<()> {
        let core = self.core(group)?;
        let my_idx = self.member_index(&core)?;
        let root_idx = root as usize;
        if root_idx >= core.members.len() {
            return Err(StratumError::NotInGroup {
                rank: root,
                id: core.id,
            });
        }

        let payload = if my_idx == root_idx {
            buf.to_vec()
        } else {
            Vec::new()
        };
        let out = self.rendezvous(&core, my_idx, payload, move |mut contribs| {
            Ok(std::mem::take(&mut contribs[root_idx]))
        })?;

        if my_idx != root_idx {
            if out.len() != buf.len() {
                return Err(StratumError::BufferSizeMismatch {
                    expected: buf.len(),
                    actual: out.len(),
                });
            }
            buf.copy_from_slice(&out);
        }
        Ok(())
    }

    fn reduce_sum_in_place(
        &self,
        group: &Group,
        buf: &mut [u8],
        dtype: DataType,
        root: Rank,
    ) -> Result<()> {
        if !self.shared.in_place {
            return Err(StratumError::Unsupported {
                op: "reduce_sum_in_place",
            });
        }
        let core = self.core(group)?;
        let my_idx = self.member_index(&core)?;
        let root_idx = root as usize;
        if root_idx >= core.members.len() {
            return Err(StratumError::NotInGroup {
                rank: root,
                id: core.id,
            });
        }

        let out = self.rendezvous(&core, my_idx, buf.to_vec(), move |contribs| {
            combine_sum(contribs, dtype)
        })?;
        // Only the root needs the sum; other members' buffers stay as
        // contributed.
        if my_idx == root_idx {
            buf.copy_from_slice(&out);
        }
        Ok(())
    }

    fn allreduce_sum_in_place(&self, group: &Group, buf: &mut [u8], dtype: DataType) -> Result<()> {
        if !self.shared.in_place {
            return Err(StratumError::Unsupported {
                op: "allreduce_sum_in_place",
            });
        }
        let core = self.core(group)?;
        let my_idx = self.member_index(&core)?;
        let out = self.rendezvous(&core, my_idx, buf.to_vec(), move |contribs| {
            combine_sum(contribs, dtype)
        })?;
        buf.copy_from_slice(&out);
        Ok(())
    }

    fn allreduce_sum(
        &self,
        group: &Group,
        send: &[u8],
        recv: &mut [u8],
        dtype: DataType,
    ) -> Result<()> {
        if recv.len() != send.len() {
            return Err(StratumError::BufferSizeMismatch {
                expected: send.len(),
                actual: recv.len(),
            });
        }
        let core = self.core(group)?;
        let my_idx = self.member_index(&core)?;
        let out = self.rendezvous(&core, my_idx, send.to_vec(), move |contribs| {
            combine_sum(contribs, dtype)
        })?;
        recv.copy_from_slice(&out);
        Ok(())
    }

    fn split(&self, parent: &Group, color: u32, key: u32) -> Result<Group> {
        let core = self.core(parent)?;
        let my_idx = self.member_index(&core)?;

        // Encode as 8 bytes: [color: u32 LE][key: u32 LE].
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&color.to_le_bytes());
        payload.extend_from_slice(&key.to_le_bytes());

        let shared = Arc::clone(&self.shared);
        let members = core.members.clone();
        let out = self.rendezvous(&core, my_idx, payload, move |contribs| {
            let mut entries = Vec::with_capacity(contribs.len());
            for (idx, c) in contribs.iter().enumerate() {
                if c.len() != 8 {
                    return Err(StratumError::transport("split payload mismatch"));
                }
                let color = u32::from_le_bytes(c[0..4].try_into().expect("4-byte slice"));
                let key = u32::from_le_bytes(c[4..8].try_into().expect("4-byte slice"));
                entries.push((idx, color, key));
            }

            // Group parent slots by color, in first-appearance order so
            // subgroup creation is deterministic across runs.
            let mut by_color: IndexMap<u32, Vec<(u32, usize)>> = IndexMap::new();
            for &(idx, color, key) in &entries {
                by_color.entry(color).or_default().push((key, idx));
            }

            let mut assigned = vec![0u64; entries.len()];
            let mut registry = shared
                .groups
                .lock()
                .expect("loopback group registry poisoned");
            for (_color, mut slots) in by_color {
                slots.sort_by_key(|&(key, idx)| (key, idx));
                let sub_members: Vec<Rank> = slots.iter().map(|&(_, idx)| members[idx]).collect();
                let id = shared.next_group_id.fetch_add(1, Ordering::Relaxed);
                registry.insert(id, Arc::new(GroupCore::new(id, sub_members)));
                for &(_, idx) in &slots {
                    assigned[idx] = id;
                }
            }

            let mut encoded = Vec::with_capacity(assigned.len() * 8);
            for id in assigned {
                encoded.extend_from_slice(&id.to_le_bytes());
            }
            Ok(encoded)
        })?;

        let off = my_idx * 8;
        let id = u64::from_le_bytes(out[off..off + 8].try_into().expect("8-byte slice"));
        Ok(Group(id))
    }

    fn free_group(&self, group: Group) {
        let Ok(core) = self.core(&group) else {
            return;
        };
        if core.live_handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared
                .groups
                .lock()
                .expect("loopback group registry poisoned")
                .remove(&group.0);
        }
    }

    fn processor_name(&self) -> Option<String> {
        self.shared
            .hostnames
            .as_ref()
            .map(|names| names[self.world_rank as usize].clone())
    }

    fn abort(&self, _group: &Group, code: i32) {
        *self
            .shared
            .abort_code
            .lock()
            .expect("loopback abort lock poisoned") = Some(code);
    }
}
