//! In-process multi-rank communicator backed by a global mailbox.
//!
//! Each rank of a [`ThreadComm`] universe runs on its own thread; messages
//! travel through a process-wide mailbox keyed by (universe, communicator,
//! source, destination, tag) with FIFO delivery per key. This is the test
//! harness for every distributed code path: no MPI launcher required.
//!
//! Because the mailbox is global, tests that spin up universes must not run
//! concurrently with each other (`serial_test::serial` in this crate's
//! integration tests).

use super::Communicator;
use crate::error::{MeshError, Result};
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// (universe, comm, src universe-rank, dst universe-rank, tag)
type Key = (u64, u64, usize, usize, u16);

static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);

static NEXT_UNIVERSE: AtomicU64 = AtomicU64::new(1);

fn mix(a: u64, b: u64, c: u64) -> u64 {
    // splitmix64 over the packed inputs; only uniqueness matters here
    let mut z = a
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(b.rotate_left(17))
        .wrapping_add(c.rotate_left(43));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// One rank's handle into an in-process process group.
pub struct ThreadComm {
    universe: u64,
    comm_id: u64,
    rank: usize,
    /// comm rank -> universe rank
    members: Arc<Vec<usize>>,
    /// SPMD-symmetric counter used to derive subgroup communicator ids.
    seq: AtomicU64,
}

impl ThreadComm {
    /// Create a fresh universe of `n` ranks; hand one communicator to each
    /// test thread.
    pub fn universe(n: usize) -> Vec<ThreadComm> {
        let universe = NEXT_UNIVERSE.fetch_add(1, Relaxed);
        let members = Arc::new((0..n).collect::<Vec<_>>());
        (0..n)
            .map(|rank| ThreadComm {
                universe,
                comm_id: 0,
                rank,
                members: members.clone(),
                seq: AtomicU64::new(0),
            })
            .collect()
    }

    fn post(&self, tag: u16, peer: usize, buf: &Bytes) {
        let key = (
            self.universe,
            self.comm_id,
            self.members[self.rank],
            self.members[peer],
            tag,
        );
        MAILBOX.entry(key).or_default().push_back(buf.clone());
    }

    fn take(&self, tag: u16, peer: usize) -> Bytes {
        let key = (
            self.universe,
            self.comm_id,
            self.members[peer],
            self.members[self.rank],
            tag,
        );
        loop {
            if let Some(mut q) = MAILBOX.get_mut(&key) {
                if let Some(buf) = q.pop_front() {
                    return buf;
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn exchange(
        &self,
        tag: u16,
        sends: &[(usize, Bytes)],
        recvs: &[(usize, usize)],
    ) -> Result<Vec<Vec<u8>>> {
        let size = self.size();
        for (peer, buf) in sends {
            if *peer >= size {
                return Err(MeshError::RankOutOfRange { rank: *peer, size });
            }
            self.post(tag, *peer, buf);
        }
        let mut out = Vec::with_capacity(recvs.len());
        for &(peer, len) in recvs {
            if peer >= size {
                return Err(MeshError::RankOutOfRange { rank: peer, size });
            }
            let buf = self.take(tag, peer);
            if buf.len() != len {
                return Err(MeshError::MessageSizeMismatch {
                    peer,
                    expected: len,
                    found: buf.len(),
                });
            }
            out.push(buf.to_vec());
        }
        Ok(out)
    }

    fn dup(&self) -> Self {
        let seq = self.seq.fetch_add(1, Relaxed);
        ThreadComm {
            universe: self.universe,
            comm_id: mix(self.comm_id, seq.wrapping_add(1), u64::MAX),
            rank: self.rank,
            members: self.members.clone(),
            seq: AtomicU64::new(0),
        }
    }

    fn split(&self, color: i32, key: i32) -> Result<Self> {
        let seq = self.seq.fetch_add(1, Relaxed);
        let colors = self.allgather(color)?;
        let keys = self.allgather(key)?;
        let mut group: Vec<usize> = (0..self.size())
            .filter(|&r| colors.get(r) == color)
            .collect();
        group.sort_by_key(|&r| (keys.get(r), r));
        let rank = group
            .iter()
            .position(|&r| r == self.rank)
            .expect("split group must contain the calling rank");
        let members = Arc::new(group.iter().map(|&r| self.members[r]).collect::<Vec<_>>());
        Ok(ThreadComm {
            universe: self.universe,
            comm_id: mix(self.comm_id, seq.wrapping_add(1), color as u64),
            rank,
            members,
            seq: AtomicU64::new(0),
        })
    }
}
