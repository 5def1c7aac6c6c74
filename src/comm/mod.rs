//! Process-group communication: a thin façade over message passing.
//!
//! Messages are contiguous byte slices. The one required transport primitive
//! is [`Communicator::exchange`]: post every receive, post every send, wait —
//! a blocking sparse exchange with an explicit peer list and known receive
//! sizes. All collectives (`allreduce`, `exscan`, `bcast`, `allgather`,
//! `alltoall`, `alltoallv`, `barrier`) are provided on top of it.
//!
//! The SPMD collective contract applies throughout: every participating rank
//! must issue matching collective calls in the same order. Mismatched call
//! sequences are undefined behavior at this layer; `alltoallv` count
//! disagreements are the one case detected eagerly (see
//! [`Communicator::alltoallv`]).

mod serial;
mod thread;

#[cfg(feature = "mpi-support")]
mod mpi_backend;

pub use serial::NoComm;
pub use thread::ThreadComm;

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

use crate::array::Read;
use crate::error::{MeshError, Result};
use bytes::Bytes;
use std::mem::size_of;

/// Message tags, one namespace per protocol stage.
pub mod tags {
    /// Collective plumbing (gather/scatter legs of allreduce & friends).
    pub const COLLECTIVE: u16 = 1;
    /// Bulk `alltoallv` payload messages.
    pub const PAYLOAD: u16 = 2;
    /// Distribution construction and exchange.
    pub const DIST: u16 = 3;
}

/// Reduction operators for collectives and sparse-exchange reductions.
///
/// All operators are commutative and associative; arrival order across ranks
/// is unspecified. Bitwise operators are defined for integer scalars only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
    BOr,
    BAnd,
}

/// Scalars that can cross rank boundaries and be reduced.
pub trait CommScalar: bytemuck::Pod + Send + Sync + 'static {
    /// The operator's identity element for this type.
    fn identity(op: ReduceOp) -> Self;
    /// Combine two values under `op`.
    fn combine(op: ReduceOp, a: Self, b: Self) -> Self;
}

macro_rules! impl_comm_scalar_int {
    ($($t:ty),*) => {$(
        impl CommScalar for $t {
            fn identity(op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum | ReduceOp::BOr => <$t as num_traits::Zero>::zero(),
                    ReduceOp::Min => <$t as num_traits::Bounded>::max_value(),
                    ReduceOp::Max => <$t as num_traits::Bounded>::min_value(),
                    ReduceOp::BAnd => !<$t as num_traits::Zero>::zero(),
                }
            }
            fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
                match op {
                    ReduceOp::Sum => a.wrapping_add(b),
                    ReduceOp::Min => a.min(b),
                    ReduceOp::Max => a.max(b),
                    ReduceOp::BOr => a | b,
                    ReduceOp::BAnd => a & b,
                }
            }
        }
    )*};
}

impl_comm_scalar_int!(i8, u8, i32, u32, i64, u64, i128);

impl CommScalar for f64 {
    fn identity(op: ReduceOp) -> Self {
        match op {
            ReduceOp::Sum => 0.0,
            ReduceOp::Min => f64::INFINITY,
            ReduceOp::Max => f64::NEG_INFINITY,
            ReduceOp::BOr | ReduceOp::BAnd => {
                panic!("bitwise reduction is defined for integer scalars only")
            }
        }
    }
    fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
        match op {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::BOr | ReduceOp::BAnd => {
                panic!("bitwise reduction is defined for integer scalars only")
            }
        }
    }
}

fn scalar_bytes<T: CommScalar>(v: &T) -> Bytes {
    Bytes::copy_from_slice(bytemuck::bytes_of(v))
}

/// Received buffers carry no alignment guarantee; always read unaligned.
fn scalar_from_bytes<T: CommScalar>(buf: &[u8]) -> T {
    bytemuck::pod_read_unaligned(buf)
}

/// Copy a received byte buffer into a typed vector (alignment-safe).
pub(crate) fn typed_from_bytes<T: bytemuck::Pod>(buf: &[u8]) -> Vec<T> {
    bytemuck::pod_collect_to_vec(buf)
}

/// Blocking communication over a fixed process group.
///
/// `rank()` and `size()` are O(1) and fixed for the object's lifetime.
pub trait Communicator: Send + Sync + 'static {
    /// This process's rank in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Sparse blocking byte exchange.
    ///
    /// Sends in `sends` (peer, payload) are issued without waiting on
    /// remote progress; receives in `recvs` (peer, exact byte length) are
    /// satisfied in list order, and the call returns the received buffers
    /// once everything has completed. Peers must post matching
    /// sends/receives or the group deadlocks, by design. Self-sends are
    /// permitted and resolve within the call.
    fn exchange(
        &self,
        tag: u16,
        sends: &[(usize, Bytes)],
        recvs: &[(usize, usize)],
    ) -> Result<Vec<Vec<u8>>>;

    /// A new communicator over the same group.
    fn dup(&self) -> Self
    where
        Self: Sized;

    /// Partition the group: ranks with equal `color` form a subgroup,
    /// ordered by `(key, rank)`.
    fn split(&self, color: i32, key: i32) -> Result<Self>
    where
        Self: Sized;

    /// Reduce `x` across all ranks; every rank gets the combined value.
    fn allreduce<T: CommScalar>(&self, x: T, op: ReduceOp) -> Result<T>
    where
        Self: Sized,
    {
        if self.size() == 1 {
            return Ok(x);
        }
        let width = size_of::<T>();
        if self.rank() == 0 {
            let recvs: Vec<(usize, usize)> = (1..self.size()).map(|r| (r, width)).collect();
            let got = self.exchange(tags::COLLECTIVE, &[], &recvs)?;
            let mut acc = x;
            for buf in &got {
                acc = T::combine(op, acc, scalar_from_bytes(buf));
            }
            let sends: Vec<(usize, Bytes)> =
                (1..self.size()).map(|r| (r, scalar_bytes(&acc))).collect();
            self.exchange(tags::COLLECTIVE, &sends, &[])?;
            Ok(acc)
        } else {
            self.exchange(tags::COLLECTIVE, &[(0, scalar_bytes(&x))], &[])?;
            let got = self.exchange(tags::COLLECTIVE, &[], &[(0, width)])?;
            Ok(scalar_from_bytes(&got[0]))
        }
    }

    /// Exclusive prefix reduction in rank order; rank 0 gets the identity.
    fn exscan<T: CommScalar>(&self, x: T, op: ReduceOp) -> Result<T>
    where
        Self: Sized,
    {
        if self.size() == 1 {
            return Ok(T::identity(op));
        }
        let width = size_of::<T>();
        if self.rank() == 0 {
            let recvs: Vec<(usize, usize)> = (1..self.size()).map(|r| (r, width)).collect();
            let got = self.exchange(tags::COLLECTIVE, &[], &recvs)?;
            let mut sends = Vec::with_capacity(self.size() - 1);
            let mut acc = x;
            for (r, buf) in (1..self.size()).zip(&got) {
                sends.push((r, scalar_bytes(&acc)));
                acc = T::combine(op, acc, scalar_from_bytes::<T>(buf));
            }
            self.exchange(tags::COLLECTIVE, &sends, &[])?;
            Ok(T::identity(op))
        } else {
            self.exchange(tags::COLLECTIVE, &[(0, scalar_bytes(&x))], &[])?;
            let got = self.exchange(tags::COLLECTIVE, &[], &[(0, width)])?;
            Ok(scalar_from_bytes(&got[0]))
        }
    }

    /// Broadcast rank 0's value to every rank.
    fn bcast<T: CommScalar>(&self, x: T) -> Result<T>
    where
        Self: Sized,
    {
        if self.size() == 1 {
            return Ok(x);
        }
        if self.rank() == 0 {
            let sends: Vec<(usize, Bytes)> =
                (1..self.size()).map(|r| (r, scalar_bytes(&x))).collect();
            self.exchange(tags::COLLECTIVE, &sends, &[])?;
            Ok(x)
        } else {
            let got = self.exchange(tags::COLLECTIVE, &[], &[(0, size_of::<T>())])?;
            Ok(scalar_from_bytes(&got[0]))
        }
    }

    /// Gather one value per rank; every rank gets the full rank-ordered array.
    fn allgather<T: CommScalar>(&self, x: T) -> Result<Read<T>>
    where
        Self: Sized,
    {
        let size = self.size();
        if size == 1 {
            return Ok(vec![x].into());
        }
        let width = size_of::<T>();
        if self.rank() == 0 {
            let recvs: Vec<(usize, usize)> = (1..size).map(|r| (r, width)).collect();
            let got = self.exchange(tags::COLLECTIVE, &[], &recvs)?;
            let mut all = Vec::with_capacity(size);
            all.push(x);
            for buf in &got {
                all.push(scalar_from_bytes(buf));
            }
            let payload = Bytes::copy_from_slice(bytemuck::cast_slice(&all));
            let sends: Vec<(usize, Bytes)> = (1..size).map(|r| (r, payload.clone())).collect();
            self.exchange(tags::COLLECTIVE, &sends, &[])?;
            Ok(all.into())
        } else {
            self.exchange(tags::COLLECTIVE, &[(0, scalar_bytes(&x))], &[])?;
            let got = self.exchange(tags::COLLECTIVE, &[], &[(0, size * width)])?;
            Ok(typed_from_bytes::<T>(&got[0]).into())
        }
    }

    /// Exchange one value with every rank: `out[r]` is what rank `r` sent us.
    fn alltoall<T: CommScalar>(&self, xs: &[T]) -> Result<Vec<T>>
    where
        Self: Sized,
    {
        let size = self.size();
        if xs.len() != size {
            return Err(MeshError::LengthMismatch {
                expected: size,
                found: xs.len(),
            });
        }
        let width = size_of::<T>();
        let sends: Vec<(usize, Bytes)> =
            (0..size).map(|r| (r, scalar_bytes(&xs[r]))).collect();
        let recvs: Vec<(usize, usize)> = (0..size).map(|r| (r, width)).collect();
        let got = self.exchange(tags::COLLECTIVE, &sends, &recvs)?;
        Ok(got.iter().map(|b| scalar_from_bytes(b)).collect())
    }

    /// Variable-count all-to-all with caller-supplied counts and displacements.
    ///
    /// Send counts are exchanged first and checked against the receive counts;
    /// a disagreement returns [`MeshError::AlltoallvCountMismatch`] before any
    /// payload message is issued.
    fn alltoallv<T: CommScalar>(
        &self,
        sendbuf: &[T],
        sendcounts: &[usize],
        sdispls: &[usize],
        recvcounts: &[usize],
        rdispls: &[usize],
    ) -> Result<Vec<T>>
    where
        Self: Sized,
    {
        let size = self.size();
        for (name, len) in [
            ("sendcounts", sendcounts.len()),
            ("sdispls", sdispls.len()),
            ("recvcounts", recvcounts.len()),
            ("rdispls", rdispls.len()),
        ] {
            if len != size {
                log::debug!("alltoallv: {name} has length {len}, expected {size}");
                return Err(MeshError::LengthMismatch {
                    expected: size,
                    found: len,
                });
            }
        }
        let counts: Vec<u64> = sendcounts.iter().map(|&c| c as u64).collect();
        let incoming = self.alltoall(&counts)?;
        for r in 0..size {
            if incoming[r] as usize != recvcounts[r] {
                return Err(MeshError::AlltoallvCountMismatch {
                    peer: r,
                    sent: incoming[r] as usize,
                    expected: recvcounts[r],
                });
            }
        }
        let width = size_of::<T>();
        let sends: Vec<(usize, Bytes)> = (0..size)
            .map(|r| {
                let s = &sendbuf[sdispls[r]..sdispls[r] + sendcounts[r]];
                (r, Bytes::copy_from_slice(bytemuck::cast_slice(s)))
            })
            .collect();
        let recvs: Vec<(usize, usize)> = (0..size).map(|r| (r, recvcounts[r] * width)).collect();
        let got = self.exchange(tags::PAYLOAD, &sends, &recvs)?;
        let total = (0..size)
            .map(|r| rdispls[r] + recvcounts[r])
            .max()
            .unwrap_or(0);
        let mut out = vec![T::identity(ReduceOp::Sum); total];
        for r in 0..size {
            let vals = typed_from_bytes::<T>(&got[r]);
            out[rdispls[r]..rdispls[r] + vals.len()].copy_from_slice(&vals);
        }
        Ok(out)
    }

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<()>
    where
        Self: Sized,
    {
        self.allreduce(0i32, ReduceOp::Sum)?;
        Ok(())
    }

    /// Combine 128-bit partial sums bit-exactly across ranks.
    fn add_int128(&self, x: i128) -> Result<i128>
    where
        Self: Sized,
    {
        self.allreduce(x, ReduceOp::Sum)
    }
}

/// A directed neighbor graph over a communicator's ranks.
///
/// `destinations` are the ranks this rank sends to; `sources` the ranks it
/// receives from. Built collectively, so both sides are always consistent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Neighbors {
    pub sources: Vec<usize>,
    pub destinations: Vec<usize>,
}

impl Neighbors {
    /// Wrap explicitly known edges (the adjacent-graph constructor).
    pub fn new(sources: Vec<usize>, destinations: Vec<usize>) -> Self {
        Self {
            sources,
            destinations,
        }
    }

    /// Build from this rank's destination list; sources are discovered with
    /// a flag all-to-all. Collective over `comm`.
    pub fn from_destinations<C: Communicator>(comm: &C, destinations: Vec<usize>) -> Result<Self> {
        let size = comm.size();
        let mut flags = vec![0u8; size];
        for &d in &destinations {
            if d >= size {
                return Err(MeshError::RankOutOfRange { rank: d, size });
            }
            flags[d] = 1;
        }
        let incoming = comm.alltoall(&flags)?;
        let sources = (0..size).filter(|&r| incoming[r] != 0).collect();
        Ok(Self {
            sources,
            destinations,
        })
    }

    /// Reverse every edge: sources become destinations and vice versa.
    pub fn invert(self) -> Self {
        Self {
            sources: self.destinations,
            destinations: self.sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_identities() {
        assert_eq!(i32::identity(ReduceOp::Sum), 0);
        assert_eq!(i32::identity(ReduceOp::Min), i32::MAX);
        assert_eq!(i32::identity(ReduceOp::Max), i32::MIN);
        assert_eq!(u8::identity(ReduceOp::BAnd), 0xff);
        assert_eq!(f64::identity(ReduceOp::Min), f64::INFINITY);
    }

    #[test]
    fn combine_ops() {
        assert_eq!(i64::combine(ReduceOp::Sum, 3, 4), 7);
        assert_eq!(i64::combine(ReduceOp::Min, 3, 4), 3);
        assert_eq!(u32::combine(ReduceOp::BOr, 0b01, 0b10), 0b11);
        assert_eq!(f64::combine(ReduceOp::Max, -1.0, 2.5), 2.5);
    }

    #[test]
    fn serial_collectives_are_identities() {
        let c = NoComm::default();
        assert_eq!(c.allreduce(5i32, ReduceOp::Sum).unwrap(), 5);
        assert_eq!(c.exscan(5i64, ReduceOp::Sum).unwrap(), 0);
        assert_eq!(c.bcast(2.5f64).unwrap(), 2.5);
        assert_eq!(c.allgather(9u32).unwrap().as_slice(), &[9]);
        assert_eq!(c.alltoall(&[7i32]).unwrap(), vec![7]);
        c.barrier().unwrap();
    }

    #[test]
    fn serial_alltoallv_roundtrip() {
        let c = NoComm::default();
        let out = c
            .alltoallv(&[1i32, 2, 3], &[3], &[0], &[3], &[0])
            .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn serial_neighbor_graph_inverts() {
        let c = NoComm::default();
        let n = Neighbors::from_destinations(&c, vec![0]).unwrap();
        assert_eq!(n.sources, vec![0]);
        let inv = n.invert();
        assert_eq!(inv.destinations, vec![0]);
        assert_eq!(inv.sources, vec![0]);
        let empty = Neighbors::from_destinations(&c, vec![]).unwrap();
        assert!(empty.sources.is_empty());
    }

    #[test]
    fn serial_alltoallv_count_mismatch() {
        let c = NoComm::default();
        let err = c
            .alltoallv(&[1i32, 2], &[2], &[0], &[3], &[0])
            .unwrap_err();
        assert!(matches!(err, MeshError::AlltoallvCountMismatch { peer: 0, .. }));
    }
}
