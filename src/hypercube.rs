//! Combinatorics of the hypercube cell family.
//!
//! The split-degree table gives, for an entity of dimension `mod_dim` being
//! refined, how many interior product entities of dimension `prod_dim` it
//! creates. Child-connectivity templates are provided for the quad family;
//! the hex assembly tables are intentionally not guessed (see DESIGN.md),
//! so refinement is limited to top dimension 2.

/// Highest representable topological dimension.
pub const MAX_DIM: usize = 3;

/// Number of vertices bounding a hypercube cell of each dimension.
pub const fn hypercube_verts_per_cell(dim: usize) -> usize {
    1 << dim
}

/// Interior product entities of dimension `prod_dim` created by refining an
/// entity of dimension `mod_dim`.
///
/// Bisecting an edge yields one midpoint vertex and two child edges; a quad
/// yields a center vertex, four interior edges, and four children; a hex
/// yields a center vertex, six interior edges, twelve interior quads, and
/// eight children.
pub const fn hypercube_split_degree(mod_dim: usize, prod_dim: usize) -> usize {
    const TABLE: [[usize; 4]; 4] = [
        [0, 0, 0, 0],
        [1, 2, 0, 0],
        [1, 4, 4, 0],
        [1, 6, 12, 8],
    ];
    TABLE[mod_dim][prod_dim]
}

/// Vertices of each template edge of a quad, counterclockwise:
/// bottom, right, top, left.
pub const QUAD_EDGE_VERTS: [[usize; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 0]];

/// Child quad `k` of a refined quad, in template vertex order:
/// (corner k, midpoint of edge k, center, midpoint of edge k-1).
/// Symbols: 0..4 = parent corners, 4..8 = edge midpoints, 8 = center.
pub const QUAD_CHILD_VERTS: [[usize; 4]; 4] = [
    [0, 4, 8, 7],
    [1, 5, 8, 4],
    [2, 6, 8, 5],
    [3, 7, 8, 6],
];

/// Interior edge `k` of a refined quad connects the midpoint of template
/// edge `k` to the center.
pub const QUAD_INTERIOR_EDGE_VERTS: [[usize; 2]; 4] = [[4, 8], [5, 8], [6, 8], [7, 8]];

/// Singular entity name per dimension.
pub const fn hypercube_singular_name(dim: usize) -> &'static str {
    ["vertex", "edge", "quad", "hex"][dim]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_degrees_match_bisection_combinatorics() {
        // interior k-cubes of a bisected n-cube: C(n,k) * 2^(n-k) for k < n,
        // except the count of children (k == n) is 2^n and verts are 1.
        assert_eq!(hypercube_split_degree(1, 0), 1);
        assert_eq!(hypercube_split_degree(1, 1), 2);
        assert_eq!(hypercube_split_degree(2, 0), 1);
        assert_eq!(hypercube_split_degree(2, 1), 4);
        assert_eq!(hypercube_split_degree(2, 2), 4);
        assert_eq!(hypercube_split_degree(3, 3), 8);
        assert_eq!(hypercube_split_degree(0, 0), 0);
    }

    #[test]
    fn quad_children_tile_the_parent() {
        // Every midpoint symbol appears in exactly two children, the center
        // in all four, and each corner in exactly one.
        let mut uses = [0usize; 9];
        for child in &QUAD_CHILD_VERTS {
            for &v in child {
                uses[v] += 1;
            }
        }
        assert_eq!(&uses[0..4], &[1, 1, 1, 1]);
        assert_eq!(&uses[4..8], &[2, 2, 2, 2]);
        assert_eq!(uses[8], 4);
    }

    #[test]
    fn names() {
        assert_eq!(hypercube_singular_name(2), "quad");
    }
}
