mod util;

use hypermesh::comm::{NoComm, ReduceOp};
use hypermesh::dist::{Dist, Remotes};
use hypermesh::prelude::*;
use proptest::prelude::*;
use serial_test::serial;
use std::sync::Arc;
use util::on_ranks;

fn serial_dist(dests: &[(u32, u32)], nroots: usize) -> Dist<NoComm> {
    let remotes = Remotes::new(
        dests.iter().map(|&(r, _)| r).collect::<Vec<_>>().into(),
        dests.iter().map(|&(_, i)| i).collect::<Vec<_>>().into(),
    );
    Dist::new(Arc::new(NoComm), &remotes, nroots).unwrap()
}

#[test]
fn identity_exchange_is_identity() {
    for n in [0usize, 1, 5] {
        let dests: Vec<(u32, u32)> = (0..n as u32).map(|i| (0, i)).collect();
        let d = serial_dist(&dests, n);
        let data: Read<f64> = (0..n).map(|i| i as f64 * 1.5).collect::<Vec<_>>().into();
        assert_eq!(d.exch(&data, 1).unwrap().as_slice(), data.as_slice());
    }
}

#[test]
fn double_inversion_matches_original() {
    let d = serial_dist(&[(0, 2), (0, 0), (0, 1)], 3);
    let data: Read<i64> = vec![5, 6, 7].into();
    let a = d.exch(&data, 1).unwrap();
    let b = d.invert().invert().exch(&data, 1).unwrap();
    assert_eq!(a.as_slice(), b.as_slice());
}

proptest! {
    #[test]
    fn reduce_matches_manual_accumulation(
        dests in proptest::collection::vec(0u32..6, 0..20),
        nroots in 6usize..8,
    ) {
        let pattern: Vec<(u32, u32)> = dests.iter().map(|&i| (0, i)).collect();
        let d = serial_dist(&pattern, nroots);
        let data: Vec<f64> = (0..pattern.len()).map(|i| i as f64 + 1.0).collect();
        let out = d.exch_reduce(&data.clone().into(), 1, ReduceOp::Sum).unwrap();
        let mut expect = vec![0.0; nroots];
        for (i, &(_, root)) in pattern.iter().enumerate() {
            expect[root as usize] += data[i];
        }
        prop_assert_eq!(out.as_slice(), &expect[..]);
    }

    #[test]
    fn inversion_is_involutive(
        dests in proptest::collection::vec(0u32..5, 1..16),
    ) {
        let pattern: Vec<(u32, u32)> = dests.iter().map(|&i| (0, i)).collect();
        let d = serial_dist(&pattern, 5);
        let data: Vec<i32> = (0..pattern.len() as i32).collect();
        let once = d.exch(&data.clone().into(), 1).unwrap();
        let twice = d.invert().invert().exch(&data.into(), 1).unwrap();
        prop_assert_eq!(once.as_slice(), twice.as_slice());
    }
}

#[test]
#[serial]
fn two_rank_crossing_exchange() {
    let out = on_ranks(2, |comm| {
        let me = comm.rank() as i64;
        let peer = 1 - comm.rank() as u32;
        let dests = Remotes::new(vec![peer; 2].into(), vec![0, 1].into());
        let d = Dist::new(Arc::new(comm), &dests, 2).unwrap();
        let data: Read<i64> = vec![me * 10, me * 10 + 1].into();
        let received = d.exch(&data, 1).unwrap();
        let back = d.invert().invert().exch(&data, 1).unwrap();
        assert_eq!(received.as_slice(), back.as_slice());
        received.to_vec()
    });
    assert_eq!(out[0], vec![10, 11]);
    assert_eq!(out[1], vec![0, 1]);
}

#[test]
#[serial]
fn two_rank_gather_and_fanout() {
    // both ranks claim root 0 on rank 0; the inverted pattern pushes the
    // root value back to both claimants
    let out = on_ranks(2, |comm| {
        let rank = comm.rank();
        let dests = Remotes::new(vec![0u32; 1].into(), vec![0u32; 1].into());
        let nroots = if rank == 0 { 1 } else { 0 };
        let d = Dist::new(Arc::new(comm), &dests, nroots).unwrap();
        let contribution: Read<f64> = vec![(rank + 1) as f64].into();
        let total = d.exch_reduce(&contribution, 1, ReduceOp::Sum).unwrap();
        let roots: Read<f64> = if rank == 0 { vec![42.0].into() } else { Vec::new().into() };
        let fanned = d.invert().exch(&roots, 1).unwrap();
        (total.to_vec(), fanned.to_vec())
    });
    assert_eq!(out[0].0, vec![3.0]); // 1 + 2 gathered at rank 0
    assert!(out[1].0.is_empty());
    assert_eq!(out[0].1, vec![42.0]);
    assert_eq!(out[1].1, vec![42.0]);
}
