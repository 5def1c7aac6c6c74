//! Compile-time no-op communicator for pure serial runs and unit tests.

use super::Communicator;
use crate::error::{MeshError, Result};
use bytes::Bytes;
use std::collections::VecDeque;

/// Single-rank communicator. All exchanges are self-sends resolved within
/// the same call; collectives short-circuit.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn exchange(
        &self,
        _tag: u16,
        sends: &[(usize, Bytes)],
        recvs: &[(usize, usize)],
    ) -> Result<Vec<Vec<u8>>> {
        let mut queue: VecDeque<&Bytes> = VecDeque::with_capacity(sends.len());
        for (peer, buf) in sends {
            if *peer != 0 {
                return Err(MeshError::RankOutOfRange {
                    rank: *peer,
                    size: 1,
                });
            }
            queue.push_back(buf);
        }
        let mut out = Vec::with_capacity(recvs.len());
        for &(peer, len) in recvs {
            if peer != 0 {
                return Err(MeshError::RankOutOfRange { rank: peer, size: 1 });
            }
            let buf = queue.pop_front().ok_or(MeshError::MessageSizeMismatch {
                peer: 0,
                expected: len,
                found: 0,
            })?;
            if buf.len() != len {
                return Err(MeshError::MessageSizeMismatch {
                    peer: 0,
                    expected: len,
                    found: buf.len(),
                });
            }
            out.push(buf.to_vec());
        }
        Ok(out)
    }

    fn dup(&self) -> Self {
        NoComm
    }

    fn split(&self, _color: i32, _key: i32) -> Result<Self> {
        Ok(NoComm)
    }
}
