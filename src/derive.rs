//! Lazy adjacency derivation.
//!
//! Down-adjacencies (cell to vertex, edge to vertex) are the only relations
//! ever stored directly; everything else is computed here: inversion of a
//! fixed-arity down into an up CSR, composition through a shared lower
//! dimension (star and dual graphs), and [`find_matches`], which resolves
//! which entities of one vertex-relation correspond to which of another by
//! comparing vertex sets — used both to derive cell-to-edge adjacency and to
//! stitch entities across partition boundaries.

use crate::array::{Local, Read};
use crate::error::{MeshError, Result};
use crate::graph::{Adj, Graph, make_orient_code};
use crate::maps::offset_scan;

/// Row view over a relation that is either CSR or fixed-arity.
struct Rows<'a> {
    offsets: Option<&'a [Local]>,
    targets: &'a [Local],
    deg: usize,
}

impl<'a> Rows<'a> {
    fn of(adj: &'a Adj, deg: usize) -> Self {
        if adj.a2ab().exists() {
            Self {
                offsets: Some(adj.a2ab().as_slice()),
                targets: adj.ab2b().as_slice(),
                deg,
            }
        } else {
            Self {
                offsets: None,
                targets: adj.ab2b().as_slice(),
                deg,
            }
        }
    }

    fn len(&self) -> usize {
        match self.offsets {
            Some(o) => o.len() - 1,
            None => self.targets.len() / self.deg,
        }
    }

    fn row(&self, i: usize) -> &'a [Local] {
        match self.offsets {
            Some(o) => &self.targets[o[i] as usize..o[i + 1] as usize],
            None => &self.targets[i * self.deg..(i + 1) * self.deg],
        }
    }
}

/// Invert a fixed-arity down adjacency `a -> b` into an up CSR `b -> a`,
/// with `which_down` orientation codes recording the local use.
///
/// Entries for each target are ordered by (source, local use), so the result
/// is deterministic.
pub fn invert_adj(down: &Adj, deg: usize, nb: usize) -> Adj {
    let ab2b = down.ab2b().as_slice();
    let na = ab2b.len() / deg;
    let mut counts = vec![0 as Local; nb];
    for &b in ab2b {
        counts[b as usize] += 1;
    }
    let offsets = offset_scan(&counts);
    let mut cursor = offsets[..nb].to_vec();
    let mut b2a = vec![0 as Local; ab2b.len()];
    let mut codes = vec![0u8; ab2b.len()];
    for a in 0..na {
        for k in 0..deg {
            let b = ab2b[a * deg + k] as usize;
            let slot = cursor[b] as usize;
            cursor[b] += 1;
            b2a[slot] = a as Local;
            codes[slot] = make_orient_code(k as u8, 0, false);
        }
    }
    Adj::new(offsets.into(), b2a.into(), codes.into())
}

/// Compose `a -> bridge` with `bridge -> b`, deduplicating entities reached
/// through multiple bridges and dropping `a == b` self-entries when the two
/// sides are the same entity set.
pub fn transit(a2l: &Adj, a_deg: usize, l2b: &Adj, l_deg: usize, exclude_self: bool) -> Graph {
    let a_rows = Rows::of(a2l, a_deg);
    let l_rows = Rows::of(l2b, l_deg);
    let na = a_rows.len();
    let mut offsets = Vec::with_capacity(na + 1);
    let mut targets: Vec<Local> = Vec::new();
    offsets.push(0 as Local);
    let mut scratch: Vec<Local> = Vec::new();
    for a in 0..na {
        scratch.clear();
        for &l in a_rows.row(a) {
            for &b in l_rows.row(l as usize) {
                if exclude_self && b as usize == a {
                    continue;
                }
                scratch.push(b);
            }
        }
        scratch.sort_unstable();
        scratch.dedup();
        targets.extend_from_slice(&scratch);
        offsets.push(targets.len() as Local);
    }
    Graph::new(offsets.into(), targets.into())
}

fn match_verts(deg: usize, a: &[Local], b: &[Local]) -> Option<(u8, bool)> {
    match deg {
        2 => {
            if a[0] == b[0] && a[1] == b[1] {
                Some((0, false))
            } else if a[0] == b[1] && a[1] == b[0] {
                Some((0, true))
            } else {
                None
            }
        }
        4 => {
            for r in 0..4u8 {
                if (0..4).all(|i| a[i] == b[(r as usize + i) % 4]) {
                    return Some((r, false));
                }
                if (0..4).all(|i| a[i] == b[(r as usize + 4 - i) % 4]) {
                    return Some((r, true));
                }
            }
            None
        }
        _ => None,
    }
}

/// For two entity-to-vertex relations over the same vertex set, resolve
/// which entity of `b` each entity of `a` is, by vertex-set comparison
/// through the shared up-adjacency `v2b`. Returns the target index and an
/// orientation code (rotation and flip of `b`'s canonical order relative to
/// `a`'s use) per `a` entity.
pub fn find_matches(
    deg: usize,
    av2v: &Read<Local>,
    bv2v: &Read<Local>,
    v2b: &Adj,
) -> Result<(Read<Local>, Read<u8>)> {
    let na = av2v.len() / deg;
    let v2b_rows = Rows::of(v2b, 1);
    let bv = bv2v.as_slice();
    let mut a2b = vec![0 as Local; na];
    let mut codes = vec![0u8; na];
    for a in 0..na {
        let avs = &av2v.as_slice()[a * deg..(a + 1) * deg];
        let mut found = None;
        for &b in v2b_rows.row(avs[0] as usize) {
            let bvs = &bv[b as usize * deg..(b as usize + 1) * deg];
            if let Some((rotation, flipped)) = match_verts(deg, avs, bvs) {
                found = Some((b, rotation, flipped));
                break;
            }
        }
        let (b, rotation, flipped) = found.ok_or(MeshError::NoMatch {
            dim: deg / 2,
            entity: a,
        })?;
        a2b[a] = b;
        codes[a] = make_orient_code(0, rotation, flipped);
    }
    Ok((a2b.into(), codes.into()))
}

/// Enumerate the unique edges of a quad mesh from its cell-to-vertex
/// relation, in first-use order with low-vertex-first orientation.
pub fn derive_edges_from_cells(cells2verts: &Read<Local>) -> Read<Local> {
    use crate::hypercube::QUAD_EDGE_VERTS;
    use hashbrown::HashMap;
    let ncells = cells2verts.len() / 4;
    let cv = cells2verts.as_slice();
    let mut seen: HashMap<(Local, Local), Local> = HashMap::new();
    let mut edges2verts: Vec<Local> = Vec::new();
    for c in 0..ncells {
        for t in &QUAD_EDGE_VERTS {
            let (a, b) = (cv[c * 4 + t[0]], cv[c * 4 + t[1]]);
            let key = (a.min(b), a.max(b));
            seen.entry(key).or_insert_with(|| {
                edges2verts.push(key.0);
                edges2verts.push(key.1);
                (edges2verts.len() / 2 - 1) as Local
            });
        }
    }
    edges2verts.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    // One quad: verts 0..4, edges (0,1),(1,2),(2,3),(3,0).
    fn quad_edges() -> Adj {
        Adj::from_ab2b(vec![0, 1, 1, 2, 2, 3, 3, 0].into())
    }

    #[test]
    fn invert_roundtrips_down() {
        let down = quad_edges();
        let up = invert_adj(&down, 2, 4);
        // re-derive down from up: for each edge, the verts listing it
        let mut rows: Vec<Vec<Local>> = vec![Vec::new(); 4];
        let offs = up.a2ab().as_slice();
        for v in 0..4 {
            for s in offs[v] as usize..offs[v + 1] as usize {
                rows[up.ab2b().get(s) as usize].push(v as Local);
            }
        }
        for (e, row) in rows.iter().enumerate() {
            let want: Vec<Local> = down.ab2b().as_slice()[e * 2..e * 2 + 2]
                .iter()
                .copied()
                .sorted()
                .collect();
            let got: Vec<Local> = row.iter().copied().sorted().collect();
            assert_eq!(got, want, "edge {e}");
        }
    }

    #[test]
    fn vertex_star_through_edges() {
        let down = quad_edges();
        let up = invert_adj(&down, 2, 4);
        let star = transit(&up, 1, &down, 2, true);
        // vert 0 neighbors through edges: 1 and 3
        let offs = star.a2ab.as_slice();
        assert_eq!(&star.ab2b.as_slice()[offs[0] as usize..offs[1] as usize], &[1, 3]);
    }

    #[test]
    fn find_matches_resolves_flips() {
        let down = quad_edges();
        let up = invert_adj(&down, 2, 4);
        // look up edges by reversed vertex pairs
        let uses: Read<Local> = vec![1, 0, 2, 1].into();
        let (a2b, codes) = find_matches(2, &uses, down.ab2b(), &up).unwrap();
        assert_eq!(a2b.as_slice(), &[0, 1]);
        assert!(crate::graph::code_is_flipped(codes.get(0)));
        assert!(crate::graph::code_is_flipped(codes.get(1)));
    }

    #[test]
    fn find_matches_reports_missing() {
        let down = quad_edges();
        let up = invert_adj(&down, 2, 4);
        let uses: Read<Local> = vec![0, 2].into(); // a diagonal, not an edge
        let err = find_matches(2, &uses, down.ab2b(), &up).unwrap_err();
        assert!(matches!(err, MeshError::NoMatch { entity: 0, .. }));
    }

    #[test]
    fn derived_edges_are_unique() {
        // two quads sharing edge (1, 4): 0-1-4-5 and 1-2-3-4
        let cv: Read<Local> = vec![0, 1, 4, 5, 1, 2, 3, 4].into();
        let ev = derive_edges_from_cells(&cv);
        assert_eq!(ev.len() / 2, 7);
        let pairs: Vec<(Local, Local)> = ev
            .chunks(2)
            .map(|p| (p[0], p[1]))
            .collect();
        assert_eq!(pairs.iter().unique().count(), 7);
        assert!(pairs.contains(&(1, 4)));
    }

    #[test]
    fn quad_match_with_rotation() {
        let bv: Read<Local> = vec![10, 11, 12, 13].into();
        // v2b: every vert belongs to quad 0
        let v2b = invert_adj(&Adj::from_ab2b(bv.clone()), 4, 14);
        let uses: Read<Local> = vec![12, 13, 10, 11].into();
        let (a2b, codes) = find_matches(4, &uses, &bv, &v2b).unwrap();
        assert_eq!(a2b.get(0), 0);
        assert_eq!(crate::graph::code_rotation(codes.get(0)), 2);
        assert!(!crate::graph::code_is_flipped(codes.get(0)));
    }
}
