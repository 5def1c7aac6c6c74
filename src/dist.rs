//! Sparse bipartite exchange between distributed item sets.
//!
//! A [`Dist`] is built from one [`Remotes`] record per local item: the
//! destination rank and the destination-local root index. Construction is
//! collective; it derives both message directions (grouping items by
//! destination rank forward, by origin rank in reverse) so the pattern can
//! be driven either way. [`Dist::invert`] swaps the two directions and is
//! its own inverse.
//!
//! Multiple items may target the same root; [`Dist::exch_reduce`] combines
//! arrivals with a commutative, associative operator, since arrival order
//! across ranks is unspecified.

use crate::array::{Global, INVALID_LOCAL, Local, Read};
use crate::comm::{CommScalar, Communicator, ReduceOp, tags};
use crate::error::{MeshError, Result};
use crate::maps::{expand, invert_map_to_graph, offset_scan};
use bytes::Bytes;
use hashbrown::HashMap;
use std::mem::size_of;
use std::sync::Arc;

/// Cross-rank addressing: one (owning rank, local index on that rank) pair
/// per local item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Remotes {
    pub ranks: Read<u32>,
    pub idxs: Read<Local>,
}

impl Remotes {
    pub fn new(ranks: Read<u32>, idxs: Read<Local>) -> Self {
        Self { ranks, idxs }
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

/// One direction of a [`Dist`].
#[derive(Clone, Debug, Default)]
struct Flow {
    /// Destination rank of each message, ascending.
    msgs2ranks: Vec<usize>,
    /// Offsets of each message into the packed content, length `nmsgs + 1`.
    msgs2content: Vec<Local>,
    /// Packed-content position of each item on this side.
    items2content: Vec<Local>,
    /// Offsets grouping this side's items by root, length `nroots + 1`.
    roots2items: Option<Vec<Local>>,
    /// Destination root index per item, when known on this side.
    dest_idxs: Option<Vec<Local>>,
    nroots: usize,
}

const FWD: usize = 0;
const REV: usize = 1;

/// Sparse communication pattern between a source item set and a root set.
#[derive(Clone, Debug)]
pub struct Dist<C: Communicator> {
    comm: Arc<C>,
    flows: [Flow; 2],
}

impl<C: Communicator> Dist<C> {
    /// Build the pattern from per-item destinations. Collective over `comm`;
    /// `nroots` is the local root count on the receiving side.
    pub fn new(comm: Arc<C>, dests: &Remotes, nroots: usize) -> Result<Self> {
        let nitems = dests.ranks.len();
        if dests.idxs.len() != nitems {
            return Err(MeshError::DistSizeMismatch {
                nitems,
                nranks: dests.ranks.len(),
                nidxs: dests.idxs.len(),
            });
        }
        let size = comm.size();
        for &r in dests.ranks.iter() {
            if r as usize >= size {
                return Err(MeshError::RankOutOfRange {
                    rank: r as usize,
                    size,
                });
            }
        }
        log::trace!("Dist::new: {nitems} items -> {nroots} roots over {size} ranks");

        // Forward flow: stable-sort items by destination rank.
        let mut order: Vec<Local> = (0..nitems as Local).collect();
        order.sort_by_key(|&i| dests.ranks.get(i as usize));
        let mut items2content = vec![0 as Local; nitems];
        for (pos, &item) in order.iter().enumerate() {
            items2content[item as usize] = pos as Local;
        }
        let mut counts = vec![0u64; size];
        for &r in dests.ranks.iter() {
            counts[r as usize] += 1;
        }
        let mut msgs2ranks = Vec::new();
        let mut msg_counts = Vec::new();
        for (r, &c) in counts.iter().enumerate() {
            if c > 0 {
                msgs2ranks.push(r);
                msg_counts.push(c as Local);
            }
        }
        let msgs2content = offset_scan(&msg_counts);
        let forward = Flow {
            msgs2ranks,
            msgs2content,
            items2content,
            roots2items: None,
            dest_idxs: Some(dests.idxs.to_vec()),
            nroots: nitems,
        };

        // Reverse flow: learn incoming counts, then the targeted root of
        // every incoming item, and group arrivals by root.
        let incoming = comm.alltoall(&counts)?;
        let mut rev_msgs2ranks = Vec::new();
        let mut rev_counts = Vec::new();
        for (r, &c) in incoming.iter().enumerate() {
            if c > 0 {
                rev_msgs2ranks.push(r);
                rev_counts.push(c as Local);
            }
        }
        let rev_msgs2content = offset_scan(&rev_counts);
        let n_recv = *rev_msgs2content.last().unwrap() as usize;

        let content_idxs: Vec<Local> = order
            .iter()
            .map(|&item| dests.idxs.get(item as usize))
            .collect();
        let sends: Vec<(usize, Bytes)> = forward
            .msgs2ranks
            .iter()
            .enumerate()
            .map(|(m, &rank)| {
                let lo = forward.msgs2content[m] as usize;
                let hi = forward.msgs2content[m + 1] as usize;
                (
                    rank,
                    Bytes::copy_from_slice(bytemuck::cast_slice(&content_idxs[lo..hi])),
                )
            })
            .collect();
        let recvs: Vec<(usize, usize)> = rev_msgs2ranks
            .iter()
            .enumerate()
            .map(|(m, &rank)| {
                (
                    rank,
                    (rev_msgs2content[m + 1] - rev_msgs2content[m]) as usize
                        * size_of::<Local>(),
                )
            })
            .collect();
        let got = comm.exchange(tags::DIST, &sends, &recvs)?;
        let mut recv_roots: Vec<Local> = Vec::with_capacity(n_recv);
        for buf in &got {
            recv_roots.extend(crate::comm::typed_from_bytes::<Local>(buf));
        }
        for &root in &recv_roots {
            if root as usize >= nroots {
                return Err(MeshError::DistIndexOutOfRange {
                    idx: root as usize,
                    nroots,
                });
            }
        }
        let (roots2items, rev_items2content) = invert_map_to_graph(&recv_roots, nroots);
        let reverse = Flow {
            msgs2ranks: rev_msgs2ranks,
            msgs2content: rev_msgs2content,
            items2content: rev_items2content,
            roots2items: Some(roots2items),
            dest_idxs: None,
            nroots,
        };

        Ok(Self {
            comm,
            flows: [forward, reverse],
        })
    }

    /// Swap the forward and reverse roles. Involutive: inverting twice is
    /// observationally the original pattern.
    pub fn invert(&self) -> Self {
        let [f, r] = self.flows.clone();
        Self {
            comm: self.comm.clone(),
            flows: [r, f],
        }
    }

    pub fn comm(&self) -> &Arc<C> {
        &self.comm
    }

    /// Number of items on the sending side.
    pub fn nitems(&self) -> usize {
        self.flows[FWD].items2content.len()
    }

    /// Number of roots on the receiving side.
    pub fn nroots(&self) -> usize {
        self.flows[REV].nroots
    }

    /// Destination rank per item.
    pub fn items2ranks(&self) -> Read<u32> {
        let f = &self.flows[FWD];
        let mut content2rank = vec![0u32; f.items2content.len()];
        for (m, &rank) in f.msgs2ranks.iter().enumerate() {
            for pos in f.msgs2content[m]..f.msgs2content[m + 1] {
                content2rank[pos as usize] = rank as u32;
            }
        }
        f.items2content
            .iter()
            .map(|&pos| content2rank[pos as usize])
            .collect::<Vec<_>>()
            .into()
    }

    /// Destination root index per item; absent when this side never learned
    /// them (a reverse flow).
    pub fn items2dest_idxs(&self) -> Read<Local> {
        match &self.flows[FWD].dest_idxs {
            Some(v) => v.clone().into(),
            None => Read::none(),
        }
    }

    /// Root-to-items offsets on the sending side, when present.
    pub fn roots2items(&self) -> Read<Local> {
        match &self.flows[FWD].roots2items {
            Some(v) => v.clone().into(),
            None => Read::none(),
        }
    }

    /// The directed rank graph this pattern communicates over: forward
    /// message destinations out, reverse message sources in.
    pub fn neighbors(&self) -> crate::comm::Neighbors {
        crate::comm::Neighbors {
            sources: self.flows[REV].msgs2ranks.clone(),
            destinations: self.flows[FWD].msgs2ranks.clone(),
        }
    }

    /// Destination rank per forward message.
    pub fn msgs2ranks(&self) -> Read<u32> {
        self.flows[FWD]
            .msgs2ranks
            .iter()
            .map(|&r| r as u32)
            .collect::<Vec<_>>()
            .into()
    }

    /// Exchange `width`-wide slices of `data` along the pattern.
    ///
    /// When the sending side carries a root grouping (an inverted pattern),
    /// `data` is root-indexed and fans out to every copy; otherwise it is
    /// item-indexed. The result is indexed by the receiving side's items,
    /// grouped by root.
    pub fn exch<T: CommScalar>(&self, data: &Read<T>, width: usize) -> Result<Read<T>> {
        let f = &self.flows[FWD];
        let r = &self.flows[REV];
        let nitems = f.items2content.len();

        let expanded;
        let items_data: &[T] = if let Some(r2i) = &f.roots2items {
            let nroots = r2i.len() - 1;
            if data.len() != nroots * width {
                return Err(MeshError::LengthMismatch {
                    expected: nroots * width,
                    found: data.len(),
                });
            }
            expanded = expand(data.as_slice(), r2i, width);
            &expanded
        } else {
            if data.len() != nitems * width {
                return Err(MeshError::LengthMismatch {
                    expected: nitems * width,
                    found: data.len(),
                });
            }
            data.as_slice()
        };

        // Pack into content order.
        let mut content = vec![T::identity(ReduceOp::Sum); nitems * width];
        for (item, &pos) in f.items2content.iter().enumerate() {
            content[pos as usize * width..(pos as usize + 1) * width]
                .copy_from_slice(&items_data[item * width..(item + 1) * width]);
        }

        let sends: Vec<(usize, Bytes)> = f
            .msgs2ranks
            .iter()
            .enumerate()
            .map(|(m, &rank)| {
                let lo = f.msgs2content[m] as usize * width;
                let hi = f.msgs2content[m + 1] as usize * width;
                (
                    rank,
                    Bytes::copy_from_slice(bytemuck::cast_slice(&content[lo..hi])),
                )
            })
            .collect();
        let recvs: Vec<(usize, usize)> = r
            .msgs2ranks
            .iter()
            .enumerate()
            .map(|(m, &rank)| {
                (
                    rank,
                    (r.msgs2content[m + 1] - r.msgs2content[m]) as usize
                        * width
                        * size_of::<T>(),
                )
            })
            .collect();
        let got = self.comm.exchange(tags::DIST, &sends, &recvs)?;

        let n_out = r.items2content.len();
        let mut recv_content: Vec<T> = Vec::with_capacity(n_out * width);
        for buf in &got {
            recv_content.extend(crate::comm::typed_from_bytes::<T>(buf));
        }
        let mut out = vec![T::identity(ReduceOp::Sum); n_out * width];
        for (item, &pos) in r.items2content.iter().enumerate() {
            out[item * width..(item + 1) * width].copy_from_slice(
                &recv_content[pos as usize * width..(pos as usize + 1) * width],
            );
        }
        Ok(out.into())
    }

    /// Exchange, then combine all arrivals at each root with `op`. Roots
    /// nobody targeted hold the operator identity.
    pub fn exch_reduce<T: CommScalar>(
        &self,
        data: &Read<T>,
        width: usize,
        op: ReduceOp,
    ) -> Result<Read<T>> {
        let vals = self.exch(data, width)?;
        let r = &self.flows[REV];
        let r2i = r.roots2items.as_ref().ok_or(MeshError::MissingRootGrouping)?;
        let nroots = r2i.len() - 1;
        let mut out = vec![T::identity(op); nroots * width];
        for root in 0..nroots {
            for item in r2i[root] as usize..r2i[root + 1] as usize {
                for c in 0..width {
                    out[root * width + c] =
                        T::combine(op, out[root * width + c], vals.get(item * width + c));
                }
            }
        }
        Ok(out.into())
    }
}

/// Resolve ownership for globally identified entities by rendezvous.
///
/// Every rank claims each of its local entities at a directory rank
/// (`gid % size`). The directory elects the owner — the prior owner when it
/// is among the claimants, else the lowest claiming rank — and replies with
/// the owner's (rank, local index). `idx_offset` shifts the claimed local
/// indices, for callers resolving a tail slice of a larger entity set.
/// Collective over `comm`.
pub fn owners_from_globals<C: Communicator>(
    comm: &Arc<C>,
    globals: &[Global],
    prior_owners: Option<&[u32]>,
    idx_offset: Local,
) -> Result<Remotes> {
    if let Some(p) = prior_owners {
        if p.len() != globals.len() {
            return Err(MeshError::LengthMismatch {
                expected: globals.len(),
                found: p.len(),
            });
        }
    }
    let size = comm.size();

    // Pack claims grouped by directory rank: (gid, local idx, prior owner).
    let mut counts = vec![0usize; size];
    for &g in globals {
        counts[(g % size as u64) as usize] += 1;
    }
    let displs = offset_scan(&counts.iter().map(|&c| c as Local).collect::<Vec<_>>());
    let mut cursor: Vec<usize> = displs[..size].iter().map(|&d| d as usize).collect();
    let total = globals.len();
    let mut claims = vec![0u64; total * 3];
    let mut claim_order = vec![0usize; total];
    for (i, &g) in globals.iter().enumerate() {
        let dir = (g % size as u64) as usize;
        let slot = cursor[dir];
        cursor[dir] += 1;
        claims[slot * 3] = g;
        claims[slot * 3 + 1] = idx_offset as u64 + i as u64;
        claims[slot * 3 + 2] = prior_owners.map_or(u64::MAX, |p| p[i] as u64);
        claim_order[slot] = i;
    }
    let send_counts: Vec<usize> = counts.iter().map(|&c| c * 3).collect();
    let send_displs: Vec<usize> = displs[..size].iter().map(|&d| d as usize * 3).collect();
    let recv_triple_counts = comm.alltoall(
        &counts.iter().map(|&c| c as u64).collect::<Vec<_>>(),
    )?;
    let recv_counts: Vec<usize> = recv_triple_counts.iter().map(|&c| c as usize * 3).collect();
    let recv_displs = {
        let mut d = Vec::with_capacity(size);
        let mut acc = 0;
        for &c in &recv_counts {
            d.push(acc);
            acc += c;
        }
        d
    };
    let incoming = comm.alltoallv(&claims, &send_counts, &send_displs, &recv_counts, &recv_displs)?;

    // Directory pass 1: elect an owner per gid.
    let mut elected: HashMap<u64, (u32, u64)> = HashMap::new();
    let mut pass = |f: &mut dyn FnMut(u32, u64, u64, u64)| {
        for r in 0..size {
            let base = recv_displs[r];
            let n = recv_counts[r] / 3;
            for k in 0..n {
                let gid = incoming[base + k * 3];
                let idx = incoming[base + k * 3 + 1];
                let prior = incoming[base + k * 3 + 2];
                f(r as u32, gid, idx, prior);
            }
        }
    };
    let mut claimants: HashMap<u64, Vec<(u32, u64, u64)>> = HashMap::new();
    pass(&mut |src, gid, idx, prior| {
        claimants.entry(gid).or_default().push((src, idx, prior));
    });
    for (&gid, list) in &claimants {
        let prior = list
            .iter()
            .map(|&(_, _, p)| p)
            .find(|&p| p != u64::MAX && list.iter().any(|&(s, _, _)| s as u64 == p));
        let owner_rank = match prior {
            Some(p) => p as u32,
            None => list.iter().map(|&(s, _, _)| s).min().unwrap(),
        };
        let owner_idx = list
            .iter()
            .find(|&&(s, _, _)| s == owner_rank)
            .map(|&(_, idx, _)| idx)
            .unwrap();
        elected.insert(gid, (owner_rank, owner_idx));
    }

    // Directory pass 2: answer each claim in arrival order.
    let mut replies = vec![0u64; (incoming.len() / 3) * 2];
    {
        let mut k = 0;
        pass(&mut |_src, gid, _idx, _prior| {
            let (owner_rank, owner_idx) = elected[&gid];
            replies[k * 2] = owner_rank as u64;
            replies[k * 2 + 1] = owner_idx;
            k += 1;
        });
    }
    let reply_send_counts: Vec<usize> = recv_triple_counts.iter().map(|&c| c as usize * 2).collect();
    let reply_send_displs = {
        let mut d = Vec::with_capacity(size);
        let mut acc = 0;
        for &c in &reply_send_counts {
            d.push(acc);
            acc += c;
        }
        d
    };
    let reply_recv_counts: Vec<usize> = counts.iter().map(|&c| c * 2).collect();
    let reply_recv_displs: Vec<usize> = displs[..size].iter().map(|&d| d as usize * 2).collect();
    let answers = comm.alltoallv(
        &replies,
        &reply_send_counts,
        &reply_send_displs,
        &reply_recv_counts,
        &reply_recv_displs,
    )?;

    let mut ranks = vec![0u32; total];
    let mut idxs = vec![INVALID_LOCAL; total];
    for slot in 0..total {
        let i = claim_order[slot];
        ranks[i] = answers[slot * 2] as u32;
        idxs[i] = answers[slot * 2 + 1] as Local;
    }
    Ok(Remotes::new(ranks.into(), idxs.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;

    fn identity_dist(n: usize) -> Dist<NoComm> {
        let dests = Remotes::new(
            vec![0u32; n].into(),
            (0..n as Local).collect::<Vec<_>>().into(),
        );
        Dist::new(Arc::new(NoComm), &dests, n).unwrap()
    }

    #[test]
    fn identity_exchange() {
        let d = identity_dist(4);
        let data: Read<f64> = vec![1.0, 2.0, 3.0, 4.0].into();
        let out = d.exch(&data, 1).unwrap();
        assert_eq!(out.as_slice(), data.as_slice());
        let nbrs = d.neighbors();
        assert_eq!(nbrs.sources, vec![0]);
        assert_eq!(nbrs.destinations, vec![0]);
        assert_eq!(d.nitems(), 4);
        assert_eq!(d.nroots(), 4);
        assert_eq!(d.items2ranks().as_slice(), &[0; 4]);
        assert_eq!(d.items2dest_idxs().as_slice(), &[0, 1, 2, 3]);
    }

    #[test]
    fn inverse_is_involution() {
        let d = identity_dist(3);
        let data: Read<i64> = vec![7, 8, 9].into();
        let twice = d.invert().invert();
        assert_eq!(
            twice.exch(&data, 1).unwrap().as_slice(),
            d.exch(&data, 1).unwrap().as_slice()
        );
    }

    #[test]
    fn gathering_pattern_reduces() {
        // Three items all target root 0 of a 2-root set.
        let dests = Remotes::new(vec![0u32; 3].into(), vec![0 as Local; 3].into());
        let d = Dist::new(Arc::new(NoComm), &dests, 2).unwrap();
        let out = d
            .exch_reduce(&vec![1.0, 2.0, 4.0].into(), 1, ReduceOp::Sum)
            .unwrap();
        assert_eq!(out.as_slice(), &[7.0, 0.0]);
        let out_max = d
            .exch_reduce(&vec![1.0, 2.0, 4.0].into(), 1, ReduceOp::Max)
            .unwrap();
        assert_eq!(out_max.get(0), 4.0);
    }

    #[test]
    fn inverted_fanout_expands_roots() {
        // Two items claim the same root; the inverted pattern pushes the
        // root value back to both claimants.
        let dests = Remotes::new(vec![0u32; 2].into(), vec![1 as Local; 2].into());
        let d = Dist::new(Arc::new(NoComm), &dests, 2).unwrap();
        let roots: Read<f64> = vec![5.0, 9.0].into();
        let out = d.invert().exch(&roots, 1).unwrap();
        assert_eq!(out.as_slice(), &[9.0, 9.0]);
    }

    #[test]
    fn size_mismatch_is_eager() {
        let dests = Remotes::new(vec![0u32; 2].into(), vec![0 as Local; 3].into());
        let err = Dist::new(Arc::new(NoComm), &dests, 1).unwrap_err();
        assert!(matches!(err, MeshError::DistSizeMismatch { .. }));
    }

    #[test]
    fn dest_index_out_of_range_is_eager() {
        let dests = Remotes::new(vec![0u32; 1].into(), vec![5 as Local; 1].into());
        let err = Dist::new(Arc::new(NoComm), &dests, 2).unwrap_err();
        assert!(matches!(err, MeshError::DistIndexOutOfRange { idx: 5, nroots: 2 }));
    }

    #[test]
    fn width_preserved() {
        let d = identity_dist(2);
        let data: Read<i32> = vec![1, 2, 3, 4].into();
        let out = d.exch(&data, 2).unwrap();
        assert_eq!(out.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn serial_owners_from_globals() {
        let comm = Arc::new(NoComm);
        let owners = owners_from_globals(&comm, &[42, 7, 9], None, 0).unwrap();
        assert_eq!(owners.ranks.as_slice(), &[0, 0, 0]);
        assert_eq!(owners.idxs.as_slice(), &[0, 1, 2]);

        let shifted = owners_from_globals(&comm, &[3], None, 10).unwrap();
        assert_eq!(shifted.idxs.as_slice(), &[10]);
    }
}
