//! Index-map utilities: marking, inversion, expansion, gathering.
//!
//! These are the pure building blocks under adjacency derivation and the
//! refinement engine. All of them are deterministic and order-preserving.

use crate::array::{INVALID_LOCAL, Local};
use crate::parallel::parallel_map;

/// Indices of all nonzero marks, in ascending order.
pub fn collect_marked(marks: &[i8]) -> Vec<Local> {
    marks
        .iter()
        .enumerate()
        .filter(|&(_, &m)| m != 0)
        .map(|(i, _)| i as Local)
        .collect()
}

/// Invert an injective map `a -> b` into `b -> a`, filling unmapped targets
/// with [`INVALID_LOCAL`].
pub fn invert_injective_map(a2b: &[Local], nb: usize) -> Vec<Local> {
    let mut b2a = vec![INVALID_LOCAL; nb];
    for (a, &b) in a2b.iter().enumerate() {
        debug_assert_eq!(b2a[b as usize], INVALID_LOCAL, "map is not injective");
        b2a[b as usize] = a as Local;
    }
    b2a
}

/// Exclusive prefix sum of `counts`, one longer than the input.
pub fn offset_scan(counts: &[Local]) -> Vec<Local> {
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    let mut acc = 0;
    offsets.push(0);
    for &c in counts {
        acc += c;
        offsets.push(acc);
    }
    offsets
}

/// Invert a general map `a -> b` into offsets plus the a-indices grouped by
/// target, preserving ascending a-order within each group (counting sort).
pub fn invert_map_to_graph(a2b: &[Local], nb: usize) -> (Vec<Local>, Vec<Local>) {
    let mut counts = vec![0 as Local; nb];
    for &b in a2b {
        counts[b as usize] += 1;
    }
    let offsets = offset_scan(&counts);
    let mut cursor = offsets[..nb].to_vec();
    let mut items = vec![0 as Local; a2b.len()];
    for (a, &b) in a2b.iter().enumerate() {
        items[cursor[b as usize] as usize] = a as Local;
        cursor[b as usize] += 1;
    }
    (offsets, items)
}

/// Fan a-indexed data out to ab-indexed data: the row of `a` is repeated for
/// each of its `offsets[a+1] - offsets[a]` entries.
pub fn expand<T: Copy + Send + Sync>(data: &[T], offsets: &[Local], width: usize) -> Vec<T> {
    let na = offsets.len() - 1;
    debug_assert_eq!(data.len(), na * width);
    let total = offsets[na] as usize;
    let mut out = Vec::with_capacity(total * width);
    for a in 0..na {
        for _ in offsets[a]..offsets[a + 1] {
            out.extend_from_slice(&data[a * width..(a + 1) * width]);
        }
    }
    out
}

/// Gather rows: `out[a] = data[a2b[a]]`, each row `width` wide.
pub fn unmap<T: Copy + Send + Sync>(a2b: &[Local], data: &[T], width: usize) -> Vec<T> {
    parallel_map(a2b.len() * width, |i| {
        let (a, c) = (i / width, i % width);
        data[a2b[a] as usize * width + c]
    })
}
