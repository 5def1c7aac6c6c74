mod util;

use hypermesh::amr::{TransferOpts, code_parent_dim, code_which_child, refine};
use hypermesh::build::build_box;
use hypermesh::prelude::*;
use hypermesh::repro::repro_sum;
use serial_test::serial;
use std::sync::Arc;
use util::on_ranks;

/// The 2x1 box on two ranks: each rank owns one cell; they share one edge
/// and its two vertices. Rank 1 marks its only cell for refinement.
#[test]
#[serial]
fn shared_edge_refinement_is_consistent() {
    let results = on_ranks(2, |comm| {
        let rank = comm.rank();
        let mut mesh = build_box(Arc::new(comm), 2, 1, 2.0, 1.0).unwrap();
        assert_eq!(mesh.nelems(), 1);
        let marks: Read<i8> = vec![if rank == 1 { 1 } else { 0 }].into();
        refine(&mut mesh, &marks, &TransferOpts::default()).unwrap();

        let p1 = mesh.ask_parents(1).unwrap();
        let new_edges: Vec<(u32, usize, usize)> = (0..mesh.nents(1))
            .filter(|&e| p1.parent_idx.get(e) != INVALID_LOCAL)
            .map(|e| {
                (
                    p1.parent_idx.get(e),
                    code_parent_dim(p1.codes.get(e)),
                    code_which_child(p1.codes.get(e)),
                )
            })
            .collect();
        let g0 = mesh.get_array::<i64>(0, "global").unwrap().to_vec();
        let g1 = mesh.get_array::<i64>(1, "global").unwrap().to_vec();
        (
            mesh.nverts(),
            mesh.nents(1),
            mesh.nelems(),
            new_edges,
            g0,
            g1,
        )
    });

    // rank 0 did not refine its cell, but the shared edge was marked on
    // both sides: it gains the midpoint and the two half-edges
    let (nv0, ne0, nc0, new0, g0_r0, g1_r0) = &results[0];
    assert_eq!((*nv0, *ne0, *nc0), (5, 6, 1));
    assert_eq!(new0.len(), 2);
    for &(parent, pdim, child) in new0 {
        assert_eq!(pdim, 1);
        assert!(child < 2);
        // the parent is the shared edge, global id 5
        assert_eq!(g1_r0[parent as usize], 5);
    }

    // rank 1 refined its cell: 4 bisected edges and 4 interior edges
    let (nv1, ne1, nc1, new1, g0_r1, _) = &results[1];
    assert_eq!((*nv1, *ne1, *nc1), (4 + 5, 4 + 12, 1 + 4));
    assert_eq!(new1.iter().filter(|&&(_, d, _)| d == 1).count(), 8);
    assert_eq!(new1.iter().filter(|&&(_, d, _)| d == 2).count(), 4);

    // both ranks assign the same global id to the shared midpoint: the
    // fresh vertex range starts at 6 and the shared edge has order 0
    assert!(g0_r0.contains(&6));
    assert!(g0_r1.contains(&6));
    // fresh vertex ids are exactly 6..=10 across both ranks
    let mut fresh: Vec<i64> = g0_r0
        .iter()
        .chain(g0_r1.iter())
        .copied()
        .filter(|&g| g >= 6)
        .collect();
    fresh.sort_unstable();
    fresh.dedup();
    assert_eq!(fresh, vec![6, 7, 8, 9, 10]);
}

#[test]
#[serial]
fn conservation_across_ranks() {
    let sums = on_ranks(2, |comm| {
        let rank = comm.rank();
        let mut mesh = build_box(Arc::new(comm), 2, 1, 2.0, 1.0).unwrap();
        let mass = if rank == 0 { 2.0 } else { 3.0 };
        mesh.add_tag::<f64>(2, "mass", 1, TransferPolicy::Conserve, vec![mass].into())
            .unwrap();
        let leaf_sum = |mesh: &mut Mesh<hypermesh::comm::ThreadComm>| {
            let leaf = mesh.get_array::<i8>(2, "leaf").unwrap();
            let vals = mesh.get_array::<f64>(2, "mass").unwrap();
            let owned: Vec<f64> = (0..mesh.nelems())
                .filter(|&c| leaf.get(c) != 0)
                .map(|c| vals.get(c))
                .collect();
            repro_sum(mesh.comm().as_ref(), &owned).unwrap()
        };
        let before = leaf_sum(&mut mesh);
        let marks: Read<i8> = vec![if rank == 1 { 1 } else { 0 }].into();
        refine(&mut mesh, &marks, &TransferOpts::default()).unwrap();
        let after = leaf_sum(&mut mesh);
        (before, after)
    });
    for (before, after) in sums {
        assert!((before - 5.0).abs() < 1e-12);
        assert!((before - after).abs() < 1e-12);
    }
}

#[test]
#[serial]
fn shared_products_agree_on_ownership() {
    let owners = on_ranks(2, |comm| {
        let rank = comm.rank();
        let mut mesh = build_box(Arc::new(comm), 2, 1, 2.0, 1.0).unwrap();
        let marks: Read<i8> = vec![if rank == 1 { 1 } else { 0 }].into();
        refine(&mut mesh, &marks, &TransferOpts::default()).unwrap();
        // owner rank of the shared midpoint (global id 6) as seen locally
        let g0 = mesh.get_array::<i64>(0, "global").unwrap();
        let v = (0..mesh.nverts()).find(|&v| g0.get(v) == 6).unwrap();
        let o = mesh.ask_owners(0).unwrap();
        o.ranks.get(v)
    });
    // the shared edge is owned by rank 0, so its midpoint is too; both
    // ranks agree
    assert_eq!(owners, vec![0, 0]);
}
