//! # hypermesh
//!
//! hypermesh is a distributed, adaptive mesh library for unstructured
//! hypercube (quad/hex family) meshes used in numerical simulation. It
//! stores mesh topology and attached field data across a partitioned set
//! of processes, derives missing topological relationships on demand,
//! keeps partitions consistent under adaptive refinement, and moves data
//! between processes through a reusable sparse-communication layer.
//!
//! ## Layers
//! - [`array`]: reference-counted, fixed-size typed buffers ([`array::Write`]
//!   and [`array::Read`]) with an explicit absent state.
//! - [`comm`]: the [`comm::Communicator`] trait (collectives over one sparse
//!   byte-exchange primitive) with serial, in-process multi-rank, and
//!   optional MPI backends.
//! - [`dist`]: the sparse bipartite exchange pattern ([`dist::Dist`]) plus
//!   rendezvous ownership resolution.
//! - [`mesh`]: per-dimension entities, tags, lazy adjacency derivation,
//!   ownership, parting transitions, and ghost synchronization.
//! - [`amr`]: hypercube refinement — mark propagation, canonical ordering
//!   of shared modifications, topology rewrite, and field transfer.
//!
//! ## Determinism
//! Every distributed protocol here is deterministic given its inputs:
//! canonical orderings are derived from global ids and owned-count scans,
//! never from arrival order. Fixed-point accumulation ([`repro::repro_sum`])
//! makes global sums independent of the partitioning.
//!
//! ## Feature flags
//! - `rayon`: dispatch elementwise kernels to the rayon pool.
//! - `mpi-support`: an MPI-backed communicator.

pub mod amr;
pub mod array;
pub mod build;
pub mod comm;
pub mod derive;
pub mod dist;
pub mod error;
pub mod graph;
pub mod hypercube;
pub mod maps;
pub mod mesh;
pub mod parallel;
mod parting;
pub mod repro;
pub mod snapshot;
pub mod tag;

/// The most-used types and traits in one import.
pub mod prelude {
    pub use crate::amr::{TransferOpts, refine};
    pub use crate::array::{Global, INVALID_LOCAL, Local, Read, Write};
    pub use crate::build::{build_box, build_from_elems2verts};
    pub use crate::comm::{CommScalar, Communicator, NoComm, ReduceOp, ThreadComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::dist::{Dist, Remotes, owners_from_globals};
    pub use crate::error::{MeshError, Result};
    pub use crate::graph::{Adj, Graph};
    pub use crate::mesh::{Mesh, Parents, Parting, reserved};
    pub use crate::repro::repro_sum;
    pub use crate::snapshot::MeshSnapshot;
    pub use crate::tag::{Tag, TagData, TagValue, TransferPolicy};
}
