//! Integration tests for the two-level reduction engine across topology
//! shapes, group sizes, element types, and transport capability modes.
//!
//! Threads stand in for ranks: each rank owns a `LoopbackTransport` handle
//! and drives its own `WorkGroup`, so every code path below runs as a real
//! collective.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use stratum::{
    CommConfig, LoopbackOptions, LoopbackTransport, OpCounter, OpKind, Transport, WorkGroup,
    sum_group,
};

fn run_ranks<F>(ts: Vec<LoopbackTransport>, f: F)
where
    F: Fn(Arc<LoopbackTransport>) + Send + Sync,
{
    thread::scope(|s| {
        for t in ts {
            s.spawn(|| f(Arc::new(t)));
        }
    });
}

fn single_host(n: u32) -> Option<Vec<String>> {
    Some(vec!["node7".to_string(); n as usize])
}

fn distinct_hosts(n: u32) -> Option<Vec<String>> {
    Some((0..n).map(|i| format!("node{:03}.cluster", i + 1)).collect())
}

fn mixed_hosts(n: u32) -> Option<Vec<String>> {
    Some((0..n).map(|i| format!("node{:02}", (i % 4) + 1)).collect())
}

/// Sum known per-rank arrays of every element type and check the result on
/// every rank.
fn check_sums(n: u32, hostnames: Option<Vec<String>>, in_place: bool) {
    let ts = LoopbackTransport::bootstrap_with(n, LoopbackOptions { in_place, hostnames });
    run_ranks(ts, |t| {
        let wg = WorkGroup::with_config(t, &CommConfig::default()).unwrap();
        let rank = wg.rank();
        let n = wg.size();
        // Sum over ranks of (rank + 1).
        let tri = (n as i64) * (n as i64 + 1) / 2;

        let mut vi: Vec<i32> = (0..5).map(|i| (rank as i32 + 1) * (i + 3)).collect();
        wg.sum(&mut vi);
        let want: Vec<i32> = (0..5).map(|i| tri as i32 * (i + 3)).collect();
        assert_eq!(vi, want, "i32 sums on rank {rank} of {n}");

        let mut vl: Vec<i64> = (0..3)
            .map(|i| 1_000_000_007i64 * (rank as i64 + 1) + i)
            .collect();
        wg.sum(&mut vl);
        let want: Vec<i64> = (0..3)
            .map(|i| 1_000_000_007i64 * tri + i * n as i64)
            .collect();
        assert_eq!(vl, want, "i64 sums on rank {rank} of {n}");

        let mut vf: Vec<f32> = (0..4)
            .map(|i| (rank as f32 + 1.0) * 0.5 + i as f32)
            .collect();
        wg.sum(&mut vf);
        for (i, &got) in vf.iter().enumerate() {
            let want = tri as f32 * 0.5 + (i as f32) * n as f32;
            assert!(
                (got - want).abs() <= 1e-3 * want.abs().max(1.0),
                "f32 sum on rank {rank} of {n}: got {got}, want {want}"
            );
        }

        let mut vd: Vec<f64> = (0..4)
            .map(|i| (rank as f64 + 1.0) * 0.25 - i as f64)
            .collect();
        wg.sum(&mut vd);
        for (i, &got) in vd.iter().enumerate() {
            let want = tri as f64 * 0.25 - (i as f64) * n as f64;
            assert!(
                (got - want).abs() <= 1e-9 * want.abs().max(1.0),
                "f64 sum on rank {rank} of {n}: got {got}, want {want}"
            );
        }
    });
}

#[test]
fn test_sums_single_node_by_construction() {
    for n in [1, 2, 5, 17] {
        for in_place in [true, false] {
            check_sums(n, None, in_place);
        }
    }
}

#[test]
fn test_sums_single_host() {
    for n in [1, 2, 5, 17] {
        for in_place in [true, false] {
            check_sums(n, single_host(n), in_place);
        }
    }
}

#[test]
fn test_sums_all_distinct_hosts() {
    for n in [1, 2, 5, 17] {
        for in_place in [true, false] {
            check_sums(n, distinct_hosts(n), in_place);
        }
    }
}

#[test]
fn test_sums_mixed_hosts() {
    for n in [1, 2, 5, 17] {
        for in_place in [true, false] {
            check_sums(n, mixed_hosts(n), in_place);
        }
    }
}

#[test]
fn test_two_hosts_scenario() {
    // Four ranks, two per host: two-level summing with ng = ni = 2.
    for in_place in [true, false] {
        let ts = LoopbackTransport::bootstrap_with(
            4,
            LoopbackOptions {
                in_place,
                hostnames: Some(vec![
                    "alpha1".into(),
                    "alpha1".into(),
                    "beta2".into(),
                    "beta2".into(),
                ]),
            },
        );
        run_ranks(ts, |t| {
            let wg = WorkGroup::with_config(t, &CommConfig::default()).unwrap();
            assert!(wg.node().two_level());
            assert_eq!(wg.node().node_groups(), Some(2));
            assert_eq!(wg.node().node_size(), Some(2));

            let mut v = [wg.rank() as i32 + 1];
            wg.sum(&mut v);
            assert_eq!(v, [10]);
        });
    }
}

#[test]
fn test_three_distinct_hosts_scenario() {
    // Three ranks on three hosts: ng = 3 = n, so flat summing.
    for in_place in [true, false] {
        let ts = LoopbackTransport::bootstrap_with(
            3,
            LoopbackOptions {
                in_place,
                hostnames: Some(vec!["u1".into(), "u2".into(), "u3".into()]),
            },
        );
        run_ranks(ts, |t| {
            let wg = WorkGroup::with_config(t, &CommConfig::default()).unwrap();
            assert!(!wg.node().two_level());

            let mut v = [10i32.pow(wg.rank())];
            wg.sum(&mut v);
            assert_eq!(v, [111]);
        });
    }
}

#[test]
fn test_zero_inputs_and_no_implicit_accumulation() {
    for in_place in [true, false] {
        let ts = LoopbackTransport::bootstrap_with(
            4,
            LoopbackOptions {
                in_place,
                hostnames: Some(vec!["a1".into(), "a1".into(), "b2".into(), "b2".into()]),
            },
        );
        run_ranks(ts, |t| {
            let wg = WorkGroup::with_config(t, &CommConfig::default()).unwrap();

            // All-zero inputs stay all-zero.
            let mut z = [0i64; 8];
            wg.sum(&mut z);
            assert_eq!(z, [0i64; 8]);

            // Re-supplying the same inputs gives the same result again:
            // no state lingers between calls.
            let mut first = [wg.rank() as i32 + 1];
            wg.sum(&mut first);
            let mut second = [wg.rank() as i32 + 1];
            wg.sum(&mut second);
            assert_eq!(first, second);

            // Feeding a result back in sums it again, once per rank.
            let mut chained = first;
            wg.sum(&mut chained);
            assert_eq!(chained[0], first[0] * wg.size() as i32);
        });
    }
}

#[test]
fn test_sum_group_over_split_subgroups() {
    for in_place in [true, false] {
        let ts = LoopbackTransport::bootstrap_with(
            6,
            LoopbackOptions {
                in_place,
                hostnames: None,
            },
        );
        run_ranks(ts, |t| {
            let world = t.world();
            let rank = t.rank(&world).unwrap();
            // Two ensembles of three ranks each.
            let ensemble = t.split(&world, rank % 2, rank).unwrap();

            let mut v = [100i32 + rank as i32];
            sum_group(t.as_ref(), &ensemble, &mut v);
            let want = if rank % 2 == 0 {
                300 + (0 + 2 + 4)
            } else {
                300 + (1 + 3 + 5)
            };
            assert_eq!(v, [want]);

            t.free_group(ensemble);
        });
    }
}

#[test]
fn test_broadcast_scopes_are_distinct() {
    let ts = LoopbackTransport::bootstrap(4);
    run_ranks(ts, |t| {
        let world = t.world();
        let world_rank = t.rank(&world).unwrap();
        // Working subsets {0, 1} and {2, 3} inside one simulation.
        let sub = t.split(&world, world_rank / 2, world_rank).unwrap();
        let wg = WorkGroup::with_groups(t.clone(), world, sub, &CommConfig::default()).unwrap();

        // Group scope: each subset's master seeds its own value.
        let mut buf = if wg.is_master() {
            [world_rank as u8 + 40; 4]
        } else {
            [0u8; 4]
        };
        wg.broadcast(&mut buf);
        let want = if world_rank < 2 { 40 } else { 42 };
        assert_eq!(buf, [want; 4]);

        // Simulation scope: the simulation master reaches every rank.
        let mut sim_buf = if world_rank == 0 { [7u8; 2] } else { [0u8; 2] };
        wg.broadcast_sim(&mut sim_buf);
        assert_eq!(sim_buf, [7u8; 2]);

        // Sums stay confined to the working group.
        let mut v = [1i32];
        wg.sum(&mut v);
        assert_eq!(v, [2]);
    });
}

#[derive(Default)]
struct CountingFacility {
    sums: AtomicU32,
    barriers: AtomicU32,
    broadcasts: AtomicU32,
}

impl OpCounter for CountingFacility {
    fn record(&self, op: OpKind) {
        match op {
            OpKind::Sum => &self.sums,
            OpKind::Barrier => &self.barriers,
            OpKind::Broadcast => &self.broadcasts,
        }
        .fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_entry_points_report_to_counting_facility() {
    let mut ts = LoopbackTransport::bootstrap(1);
    let counters = Arc::new(CountingFacility::default());
    let wg = WorkGroup::with_config(Arc::new(ts.remove(0)), &CommConfig::default())
        .unwrap()
        .with_counters(counters.clone());

    let mut v = [1.0f32];
    wg.sum(&mut v);
    wg.sum(&mut v);
    wg.barrier();
    let mut b = [0u8; 1];
    wg.broadcast(&mut b);

    assert_eq!(counters.sums.load(Ordering::Relaxed), 2);
    assert_eq!(counters.barriers.load(Ordering::Relaxed), 1);
    assert_eq!(counters.broadcasts.load(Ordering::Relaxed), 1);
}

#[test]
fn test_scratch_growth_across_calls() {
    // Staged transport: the scratch path must handle a growing then
    // shrinking request sequence (buffer never shrinks internally).
    let ts = LoopbackTransport::bootstrap_with(
        3,
        LoopbackOptions {
            in_place: false,
            hostnames: None,
        },
    );
    run_ranks(ts, |t| {
        let wg = WorkGroup::with_config(t, &CommConfig::default()).unwrap();
        for len in [1usize, 64, 8, 256, 2] {
            let mut v = vec![wg.rank() as i64; len];
            wg.sum(&mut v);
            assert_eq!(v, vec![3i64; len]);
        }
    });
}
