//! MPI transport (feature = "mpi-support").
//!
//! Thin adapter over `rsmpi`: `exchange` posts immediate receives, then
//! immediate sends, then waits, all inside one request scope.

use super::Communicator;
use crate::error::{MeshError, Result};
use bytes::Bytes;
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;

/// Communicator over an MPI process group.
pub struct MpiComm {
    comm: SimpleCommunicator,
}

impl MpiComm {
    /// Wrap the world communicator. Call once per process after
    /// `mpi::initialize`; keep the returned universe alive for the run.
    pub fn world(universe: &mpi::environment::Universe) -> Self {
        Self {
            comm: universe.world(),
        }
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn exchange(
        &self,
        tag: u16,
        sends: &[(usize, Bytes)],
        recvs: &[(usize, usize)],
    ) -> Result<Vec<Vec<u8>>> {
        let size = self.size();
        for (peer, _) in sends {
            if *peer >= size {
                return Err(MeshError::RankOutOfRange { rank: *peer, size });
            }
        }
        let mut bufs: Vec<Vec<u8>> = recvs.iter().map(|&(_, len)| vec![0u8; len]).collect();
        mpi::request::scope(|scope| {
            let mut recv_reqs = Vec::with_capacity(recvs.len());
            for (buf, &(peer, _)) in bufs.iter_mut().zip(recvs.iter()) {
                let proc = self.comm.process_at_rank(peer as i32);
                recv_reqs.push(proc.immediate_receive_into_with_tag(scope, &mut buf[..], tag as i32));
            }
            let mut send_reqs = Vec::with_capacity(sends.len());
            for (peer, data) in sends {
                let proc = self.comm.process_at_rank(*peer as i32);
                send_reqs.push(proc.immediate_send_with_tag(scope, &data[..], tag as i32));
            }
            for req in send_reqs {
                req.wait();
            }
            for req in recv_reqs {
                req.wait();
            }
        });
        Ok(bufs)
    }

    fn dup(&self) -> Self {
        Self {
            comm: self.comm.duplicate(),
        }
    }

    fn split(&self, color: i32, key: i32) -> Result<Self> {
        let comm = self
            .comm
            .split_by_color_with_key(Color::with_value(color), key)
            .expect("split color must be valid for the calling rank");
        Ok(Self { comm })
    }
}
