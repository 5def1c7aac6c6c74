mod util;

use hypermesh::build::build_box;
use hypermesh::comm::ReduceOp;
use hypermesh::prelude::*;
use serial_test::serial;
use std::sync::Arc;
use util::on_ranks;

/// 4x1 box on two ranks: cells {0,1} and {2,3}; ghosting replicates the
/// neighbor cell across the shared column of vertices.
#[test]
#[serial]
fn ghosting_grows_and_shrinks_the_halo() {
    let counts = on_ranks(2, |comm| {
        let mut mesh = build_box(Arc::new(comm), 4, 1, 4.0, 1.0).unwrap();
        let before = (mesh.nverts(), mesh.nents(1), mesh.nelems());
        mesh.set_parting(Parting::Ghosted).unwrap();
        let ghosted = (mesh.nverts(), mesh.nents(1), mesh.nelems());
        mesh.set_parting(Parting::ElemBased).unwrap();
        let after = (mesh.nverts(), mesh.nents(1), mesh.nelems());
        (before, ghosted, after)
    });
    for (before, ghosted, after) in counts {
        assert_eq!(before, (6, 7, 2));
        // one halo cell: +2 verts, +3 edges
        assert_eq!(ghosted, (8, 10, 3));
        assert_eq!(after, before);
    }
}

#[test]
#[serial]
fn ghost_copies_take_owner_values_after_sync() {
    let checks = on_ranks(2, |comm| {
        let rank = comm.rank();
        let mut mesh = build_box(Arc::new(comm), 4, 1, 4.0, 1.0).unwrap();
        mesh.set_parting(Parting::Ghosted).unwrap();
        let g0 = mesh.get_array::<i64>(0, "global").unwrap();
        let owned = mesh.owned(0).unwrap();
        // owners write f(gid); ghosts start from junk
        let vals: Vec<f64> = (0..mesh.nverts())
            .map(|v| {
                if owned.get(v) != 0 {
                    g0.get(v) as f64 * 2.0 + 1.0
                } else {
                    -7.0 * (rank as f64 + 1.0)
                }
            })
            .collect();
        let synced = mesh.sync_array(0, &vals.into(), 1).unwrap();
        (0..mesh.nverts()).all(|v| synced.get(v) == g0.get(v) as f64 * 2.0 + 1.0)
    });
    assert_eq!(checks, vec![true, true]);
}

#[test]
#[serial]
fn reduce_counts_copies_at_the_owner() {
    let copies = on_ranks(2, |comm| {
        let mut mesh = build_box(Arc::new(comm), 4, 1, 4.0, 1.0).unwrap();
        // every rank contributes 1 per local vertex copy
        let ones: Read<f64> = vec![1.0; mesh.nverts()].into();
        let reduced = mesh.reduce_array(0, &ones, 1, ReduceOp::Sum).unwrap();
        let owned = mesh.owned(0).unwrap();
        let g0 = mesh.get_array::<i64>(0, "global").unwrap();
        (0..mesh.nverts())
            .filter(|&v| owned.get(v) != 0)
            .map(|v| (g0.get(v), reduced.get(v)))
            .collect::<Vec<_>>()
    });
    let mut all: Vec<(i64, f64)> = copies.into_iter().flatten().collect();
    all.sort_by_key(|&(g, _)| g);
    // the shared column x=2 (vertex gids 2 and 7) has two copies
    for (gid, count) in all {
        let expect = if gid == 2 || gid == 7 { 2.0 } else { 1.0 };
        assert_eq!(count, expect, "gid {gid}");
    }
}

#[test]
#[serial]
fn ghosted_tags_match_owners_everywhere() {
    let ok = on_ranks(2, |comm| {
        let mut mesh = build_box(Arc::new(comm), 4, 1, 4.0, 1.0).unwrap();
        mesh.add_tag::<i32>(2, "material", 1, TransferPolicy::Inherit, {
            let g2 = mesh.get_array::<i64>(2, "global").unwrap();
            (0..mesh.nelems())
                .map(|c| 100 + g2.get(c) as i32)
                .collect::<Vec<_>>()
                .into()
        })
        .unwrap();
        mesh.set_parting(Parting::Ghosted).unwrap();
        // after the transition every copy, ghost or not, carries the
        // owner's value
        let g2 = mesh.get_array::<i64>(2, "global").unwrap();
        let mat = mesh.get_array::<i32>(2, "material").unwrap();
        (0..mesh.nelems()).all(|c| mat.get(c) == 100 + g2.get(c) as i32)
    });
    assert_eq!(ok, vec![true, true]);
}
