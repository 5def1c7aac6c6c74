//! Ragged adjacency storage and orientation codes.
//!
//! A [`Graph`] encodes a relation from entities of kind A to entities of
//! kind B as CSR arrays: `a2ab` holds ordered offsets (length `nA + 1`) and
//! `ab2b` the targets. Down-adjacencies have fixed small arity, so their
//! offsets are implicit and `a2ab` is absent. An [`Adj`] optionally carries
//! one orientation code per entry: which local use, rotation, and flip,
//! packed into a byte.

use crate::array::{Local, Read};

/// Ragged relation from A-entities to B-entities.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    /// Ordered offsets, length `nA + 1`; absent for fixed-arity relations.
    pub a2ab: Read<Local>,
    /// Targets, length `a2ab.last()` (or `nA * arity` when fixed-arity).
    pub ab2b: Read<Local>,
}

impl Graph {
    pub fn from_ab2b(ab2b: Read<Local>) -> Self {
        Self {
            a2ab: Read::none(),
            ab2b,
        }
    }

    pub fn new(a2ab: Read<Local>, ab2b: Read<Local>) -> Self {
        Self { a2ab, ab2b }
    }
}

/// A [`Graph`] plus optional per-entry orientation codes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Adj {
    pub graph: Graph,
    pub codes: Read<u8>,
}

impl Adj {
    /// Fixed-arity relation without codes.
    pub fn from_ab2b(ab2b: Read<Local>) -> Self {
        Self {
            graph: Graph::from_ab2b(ab2b),
            codes: Read::none(),
        }
    }

    /// Fixed-arity relation with orientation codes.
    pub fn with_codes(ab2b: Read<Local>, codes: Read<u8>) -> Self {
        Self {
            graph: Graph::from_ab2b(ab2b),
            codes,
        }
    }

    /// Ragged relation with codes.
    pub fn new(a2ab: Read<Local>, ab2b: Read<Local>, codes: Read<u8>) -> Self {
        Self {
            graph: Graph::new(a2ab, ab2b),
            codes,
        }
    }

    pub fn from_graph(graph: Graph) -> Self {
        Self {
            graph,
            codes: Read::none(),
        }
    }

    #[inline]
    pub fn a2ab(&self) -> &Read<Local> {
        &self.graph.a2ab
    }

    #[inline]
    pub fn ab2b(&self) -> &Read<Local> {
        &self.graph.ab2b
    }
}

/// Pack (which local use, rotation, flip) into an orientation code.
#[inline]
pub const fn make_orient_code(which_down: u8, rotation: u8, flipped: bool) -> u8 {
    (which_down << 3) | (rotation << 1) | (flipped as u8)
}

/// Whether the entry's orientation is reversed relative to canonical.
#[inline]
pub const fn code_is_flipped(code: u8) -> bool {
    code & 1 != 0
}

/// Rotation of the entry relative to canonical vertex order.
#[inline]
pub const fn code_rotation(code: u8) -> u8 {
    (code >> 1) & 3
}

/// Which local downward use of the source this entry is.
#[inline]
pub const fn code_which_down(code: u8) -> u8 {
    code >> 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orient_code_roundtrip() {
        for which in 0..4u8 {
            for rot in 0..4u8 {
                for flip in [false, true] {
                    let code = make_orient_code(which, rot, flip);
                    assert_eq!(code_which_down(code), which);
                    assert_eq!(code_rotation(code), rot);
                    assert_eq!(code_is_flipped(code), flip);
                }
            }
        }
    }

    #[test]
    fn fixed_arity_has_no_offsets() {
        let adj = Adj::from_ab2b(vec![0, 1, 1, 2].into());
        assert!(!adj.a2ab().exists());
        assert_eq!(adj.ab2b().len(), 4);
    }
}
