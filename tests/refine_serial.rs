use hypermesh::amr::{TransferOpts, code_parent_dim, code_which_child, refine};
use hypermesh::build::build_box;
use hypermesh::comm::NoComm;
use hypermesh::prelude::*;
use hypermesh::repro::repro_sum;
use std::sync::Arc;

fn marks(n: usize, which: &[usize]) -> Read<i8> {
    let mut m = vec![0i8; n];
    for &c in which {
        m[c] = 1;
    }
    m.into()
}

/// Refining one neighbor-free marked cell of a 2x1 box produces exactly
/// the split-degree counts: 5 vertices (4 edge midpoints + 1 center),
/// 12 edges (8 halves + 4 interior), 4 child cells.
#[test]
fn product_counts_match_split_degree() {
    let mut m = build_box(Arc::new(NoComm), 2, 1, 2.0, 1.0).unwrap();
    refine(&mut m, &marks(2, &[0]), &TransferOpts::default()).unwrap();
    assert_eq!(m.nverts(), 6 + 5);
    assert_eq!(m.nents(1), 7 + 12);
    assert_eq!(m.nelems(), 2 + 4);
    let leaf = m.get_array::<i8>(2, "leaf").unwrap();
    assert_eq!(leaf.iter().filter(|&&l| l != 0).count(), 5);
    let leaf1 = m.get_array::<i8>(1, "leaf").unwrap();
    assert_eq!(leaf1.iter().filter(|&&l| l == 0).count(), 4);
}

#[test]
fn parent_codes_record_ancestry() {
    let mut m = build_box(Arc::new(NoComm), 2, 1, 2.0, 1.0).unwrap();
    refine(&mut m, &marks(2, &[0]), &TransferOpts::default()).unwrap();

    let p1 = m.ask_parents(1).unwrap();
    let mut from_edges = 0;
    let mut from_cells = 0;
    for e in 7..m.nents(1) {
        let pi = p1.parent_idx.get(e);
        assert_ne!(pi, INVALID_LOCAL);
        match code_parent_dim(p1.codes.get(e)) {
            1 => {
                from_edges += 1;
                assert!(code_which_child(p1.codes.get(e)) < 2);
            }
            2 => {
                from_cells += 1;
                assert_eq!(pi, 0); // the marked cell
            }
            d => panic!("unexpected parent dim {d}"),
        }
    }
    assert_eq!(from_edges, 8);
    assert_eq!(from_cells, 4);

    let p2 = m.ask_parents(2).unwrap();
    for (slot, c) in (2..6).enumerate() {
        assert_eq!(p2.parent_idx.get(c), 0);
        assert_eq!(code_parent_dim(p2.codes.get(c)), 2);
        assert_eq!(code_which_child(p2.codes.get(c)), slot);
    }
    // carried-over entities have no parent
    for e in 0..7 {
        assert_eq!(p1.parent_idx.get(e), INVALID_LOCAL);
    }
}

#[test]
fn linear_transfer_places_midpoints() {
    let mut m = build_box(Arc::new(NoComm), 2, 1, 2.0, 1.0).unwrap();
    refine(&mut m, &marks(2, &[0]), &TransferOpts::default()).unwrap();
    let coords = m.coords().unwrap();
    let p0 = m.ask_parents(0).unwrap();
    let ev = m.ask_verts_of(1).unwrap();
    let cv = m.ask_verts_of(2).unwrap();
    for v in 6..m.nverts() {
        let (x, y) = (coords.get(v * 2), coords.get(v * 2 + 1));
        let pi = p0.parent_idx.get(v) as usize;
        match code_parent_dim(p0.codes.get(v)) {
            1 => {
                let (a, b) = (ev.get(pi * 2) as usize, ev.get(pi * 2 + 1) as usize);
                assert_eq!(x, 0.5 * (coords.get(a * 2) + coords.get(b * 2)));
                assert_eq!(y, 0.5 * (coords.get(a * 2 + 1) + coords.get(b * 2 + 1)));
            }
            2 => {
                let cx: f64 = (0..4).map(|k| coords.get(cv.get(pi * 4 + k) as usize * 2)).sum();
                let cy: f64 =
                    (0..4).map(|k| coords.get(cv.get(pi * 4 + k) as usize * 2 + 1)).sum();
                assert_eq!(x, 0.25 * cx);
                assert_eq!(y, 0.25 * cy);
            }
            d => panic!("vertex {v} has parent dim {d}"),
        }
    }
}

fn leaf_sum(m: &mut Mesh<NoComm>, name: &str) -> f64 {
    let leaf = m.get_array::<i8>(2, "leaf").unwrap();
    let vals = m.get_array::<f64>(2, name).unwrap();
    let owned: Vec<f64> = (0..m.nelems())
        .filter(|&c| leaf.get(c) != 0)
        .map(|c| vals.get(c))
        .collect();
    repro_sum(m.comm().as_ref(), &owned).unwrap()
}

#[test]
fn conserved_tag_preserves_leaf_sum() {
    let mut m = build_box(Arc::new(NoComm), 2, 2, 1.0, 1.0).unwrap();
    m.add_tag::<f64>(
        2,
        "mass",
        1,
        TransferPolicy::Conserve,
        vec![1.5, 2.25, 3.0, 0.25].into(),
    )
    .unwrap();
    let before = leaf_sum(&mut m, "mass");
    refine(&mut m, &marks(4, &[1, 3]), &TransferOpts::default()).unwrap();
    let after = leaf_sum(&mut m, "mass");
    assert!((before - after).abs() < 1e-12, "{before} vs {after}");
    // refine a child of the previous round
    let nelems = m.nelems();
    let leaf = m.get_array::<i8>(2, "leaf").unwrap();
    let child = (0..nelems).find(|&c| leaf.get(c) != 0 && c >= 4).unwrap();
    refine(&mut m, &marks(nelems, &[child]), &TransferOpts::default()).unwrap();
    assert!((leaf_sum(&mut m, "mass") - before).abs() < 1e-12);
}

#[test]
fn inherit_and_level_semantics() {
    let mut m = build_box(Arc::new(NoComm), 2, 1, 2.0, 1.0).unwrap();
    m.add_tag::<i32>(2, "material", 1, TransferPolicy::Inherit, vec![7, 9].into())
        .unwrap();
    refine(&mut m, &marks(2, &[0]), &TransferOpts::default()).unwrap();
    let mat = m.get_array::<i32>(2, "material").unwrap();
    assert_eq!(mat.as_slice(), &[7, 9, 7, 7, 7, 7]);
    let level = m.get_array::<i8>(2, "level").unwrap();
    assert_eq!(level.as_slice(), &[0, 0, 1, 1, 1, 1]);
    let level0 = m.get_array::<i8>(0, "level").unwrap();
    assert!(level0.as_slice()[6..].iter().all(|&l| l == 1));
}

/// Refining the neighbor of an already refined cell reuses the recorded
/// midpoint of the shared edge instead of minting a duplicate.
#[test]
fn neighbor_refinement_reuses_hanging_midpoint() {
    let mut m = build_box(Arc::new(NoComm), 2, 1, 2.0, 1.0).unwrap();
    refine(&mut m, &marks(2, &[0]), &TransferOpts::default()).unwrap();
    let (nv, ne, nc) = (m.nverts(), m.nents(1), m.nelems());
    // cell 1 is untouched and still a leaf; one of its edges (the shared
    // one) is already split, so only 3 edges are bisected this round
    refine(&mut m, &marks(nc, &[1]), &TransferOpts::default()).unwrap();
    assert_eq!(m.nverts(), nv + 3 + 1);
    assert_eq!(m.nents(1), ne + 3 * 2 + 4);
    assert_eq!(m.nelems(), nc + 4);
    // globals stay unique
    for dim in 0..=2 {
        let mut g = m.get_array::<i64>(dim, "global").unwrap().to_vec();
        g.sort_unstable();
        let n = g.len();
        g.dedup();
        assert_eq!(g.len(), n, "duplicate globals in dim {dim}");
    }
}

#[test]
fn refine_preconditions_are_checked() {
    let mut m = build_box(Arc::new(NoComm), 2, 1, 2.0, 1.0).unwrap();
    let err = refine(&mut m, &marks(5, &[0]), &TransferOpts::default()).unwrap_err();
    assert!(matches!(err, MeshError::LengthMismatch { expected: 2, found: 5 }));

    refine(&mut m, &marks(2, &[0]), &TransferOpts::default()).unwrap();
    // cell 0 is now a parent; marking it again must fail eagerly
    let n = m.nelems();
    let err = refine(&mut m, &marks(n, &[0]), &TransferOpts::default()).unwrap_err();
    assert!(matches!(err, MeshError::RefineNonLeaf(0)));
}
