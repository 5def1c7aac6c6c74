//! MeshError: unified error type for hypermesh public APIs.
//!
//! Every fallible public API in this crate reports failures through this
//! enum. Precondition violations (length mismatches, out-of-range dimension
//! arguments, inconsistent exchange patterns) are checked eagerly and
//! surfaced as typed errors, never silently coerced.

use thiserror::Error;

/// Unified error type for hypermesh operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// An array argument did not have the length the operation requires.
    #[error("array length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    /// A topological dimension argument was outside `[0, mesh.dim()]`.
    #[error("dimension {dim} out of range for a {mesh_dim}-dimensional mesh")]
    DimOutOfRange { dim: usize, mesh_dim: usize },
    /// A tag lookup failed.
    #[error("no tag named `{0}` on dimension {1}")]
    MissingTag(String, usize),
    /// A tag with this name already exists on the dimension.
    #[error("tag `{0}` already exists on dimension {1}")]
    DuplicateTag(String, usize),
    /// A typed tag view was requested with the wrong scalar type.
    #[error("tag `{name}`: stored type is {stored}, requested {requested}")]
    TagTypeMismatch {
        name: String,
        stored: &'static str,
        requested: &'static str,
    },
    /// Distribution construction saw inconsistent item/rank/index counts.
    #[error("distribution size mismatch: {nitems} items but {nranks} ranks, {nidxs} indices")]
    DistSizeMismatch {
        nitems: usize,
        nranks: usize,
        nidxs: usize,
    },
    /// A destination rank was outside the communicator's size.
    #[error("destination rank {rank} out of range for communicator of size {size}")]
    RankOutOfRange { rank: usize, size: usize },
    /// A destination root index was outside the receiver's root count.
    #[error("destination index {idx} out of range for {nroots} roots")]
    DistIndexOutOfRange { idx: usize, nroots: usize },
    /// A reduction was requested on a distribution without root grouping.
    #[error("exch_reduce requires a root-to-items grouping on the receive side")]
    MissingRootGrouping,
    /// `alltoallv` counts disagree between sender and receiver.
    #[error("alltoallv count mismatch with rank {peer}: peer sends {sent}, we expect {expected}")]
    AlltoallvCountMismatch {
        peer: usize,
        sent: usize,
        expected: usize,
    },
    /// A point-to-point message arrived with an unexpected byte length.
    #[error("message from rank {peer}: expected {expected} bytes, got {found}")]
    MessageSizeMismatch {
        peer: usize,
        expected: usize,
        found: usize,
    },
    /// The requested adjacency cannot be derived from stored relations.
    #[error("no derivation path for adjacency {from} -> {to}")]
    NoDerivationPath { from: usize, to: usize },
    /// `find_matches` failed to resolve an entity against the target set.
    #[error("no match for entity {entity} of dimension {dim} (vertex sets disagree)")]
    NoMatch { dim: usize, entity: usize },
    /// The mesh has no entities of this dimension yet.
    #[error("entities of dimension {0} have not been set")]
    EntsNotSet(usize),
    /// Refinement requested on a mesh outside the hypercube family,
    /// or with a top dimension whose split tables are not provided.
    #[error("refinement requires a hypercube mesh of dimension 2 (got dimension {0})")]
    UnsupportedFamily(usize),
    /// A refinement mark targeted an entity that is not a leaf.
    #[error("cell {0} is marked for refinement but is not a leaf")]
    RefineNonLeaf(usize),
    /// The operation requires a specific parting state.
    #[error("operation requires {required} parting (current: {current})")]
    WrongParting {
        required: &'static str,
        current: &'static str,
    },
    /// Parting transitions are only implemented for the quad family.
    #[error("parting transition not supported for dimension {0} meshes")]
    UnsupportedParting(usize),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MeshError>;
