//! Parting transitions: building and dropping the one-layer ghost halo.
//!
//! Ghosting is a migration: every rank acquires a copy of each remote
//! element sharing a vertex with one of its local vertices. The halo is
//! negotiated at vertex owners (star claims in, unioned star lists out),
//! cell payloads are pulled from their owners, ghost entities are appended
//! after the existing local numbering (which is therefore preserved), edges
//! are stitched through global ids, and every tag is carried by a sync over
//! the new ownership. Dropping the halo keeps the closure of owned
//! elements, owned entities, and refinement descendants of kept entities,
//! compacts the numbering, and re-exchanges owner-local indices through a
//! sync over the old numbering before anything is discarded.
//!
//! Transitions are implemented for the quad family (top dimension 2), which
//! is what the refinement engine requires; a single-rank communicator only
//! flips the parting flag.

use crate::amr::code_parent_dim;
use crate::array::{INVALID_LOCAL, Local};
use crate::comm::Communicator;
use crate::dist::Remotes;
use crate::error::{MeshError, Result};
use crate::graph::Adj;
use crate::mesh::{Mesh, Parents, Parting};
use crate::tag::{Tag, TagData};
use bytemuck::Zeroable;
use hashbrown::{HashMap, HashSet};
use static_assertions::const_assert_eq;

/// Per-cell halo payload, flat little words for the wire.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct WireCell {
    gid: u64,
    vert_gids: [u64; 4],
    vert_owner_ranks: [u64; 4],
    vert_owner_idxs: [u64; 4],
    edge_gids: [u64; 4],
    edge_owner_ranks: [u64; 4],
    edge_owner_idxs: [u64; 4],
    edge_vert_gids: [[u64; 2]; 4],
}

const_assert_eq!(std::mem::size_of::<WireCell>(), 33 * 8);

/// Exchange one `u64` list per peer rank; returns one list per source rank.
fn exchange_by_rank<C: Communicator>(comm: &C, sends: &[Vec<u64>]) -> Result<Vec<Vec<u64>>> {
    let size = comm.size();
    let counts: Vec<u64> = sends.iter().map(|s| s.len() as u64).collect();
    let incoming = comm.alltoall(&counts)?;
    let mut sendbuf = Vec::with_capacity(counts.iter().sum::<u64>() as usize);
    let mut sdispls = Vec::with_capacity(size);
    for s in sends {
        sdispls.push(sendbuf.len());
        sendbuf.extend_from_slice(s);
    }
    let sendcounts: Vec<usize> = counts.iter().map(|&c| c as usize).collect();
    let recvcounts: Vec<usize> = incoming.iter().map(|&c| c as usize).collect();
    let mut rdispls = Vec::with_capacity(size);
    let mut acc = 0;
    for &c in &recvcounts {
        rdispls.push(acc);
        acc += c;
    }
    let flat = comm.alltoallv(&sendbuf, &sendcounts, &sdispls, &recvcounts, &rdispls)?;
    Ok((0..size)
        .map(|r| flat[rdispls[r]..rdispls[r] + recvcounts[r]].to_vec())
        .collect())
}

fn extend_tag(tag: &Tag, old_n: usize, new_n: usize) -> Tag {
    let grow = (new_n - old_n) * tag.ncomps();
    let data = match tag.data() {
        TagData::I8(a) => {
            let mut v = a.to_vec();
            v.resize(v.len() + grow, 0);
            TagData::I8(v.into())
        }
        TagData::I32(a) => {
            let mut v = a.to_vec();
            v.resize(v.len() + grow, 0);
            TagData::I32(v.into())
        }
        TagData::I64(a) => {
            let mut v = a.to_vec();
            v.resize(v.len() + grow, 0);
            TagData::I64(v.into())
        }
        TagData::F64(a) => {
            let mut v = a.to_vec();
            v.resize(v.len() + grow, 0.0);
            TagData::F64(v.into())
        }
    };
    let mut out = tag.clone();
    out.replace_data(data);
    out
}

fn filter_tag(tag: &Tag, kept: &[Local]) -> Tag {
    let ncomps = tag.ncomps();
    let data = match tag.data() {
        TagData::I8(a) => TagData::I8(crate::maps::unmap(kept, a, ncomps).into()),
        TagData::I32(a) => TagData::I32(crate::maps::unmap(kept, a, ncomps).into()),
        TagData::I64(a) => TagData::I64(crate::maps::unmap(kept, a, ncomps).into()),
        TagData::F64(a) => TagData::F64(crate::maps::unmap(kept, a, ncomps).into()),
    };
    let mut out = tag.clone();
    out.replace_data(data);
    out
}

/// Element-based to ghosted: append the one-layer halo.
pub(crate) fn ghost<C: Communicator>(mesh: &mut Mesh<C>) -> Result<()> {
    if mesh.parting() != Parting::ElemBased {
        return Err(MeshError::WrongParting {
            required: Parting::ElemBased.name(),
            current: mesh.parting().name(),
        });
    }
    if mesh.comm().size() == 1 {
        mesh.set_parting_flag(Parting::Ghosted);
        return Ok(());
    }
    if mesh.dim() != 2 {
        return Err(MeshError::UnsupportedParting(mesh.dim()));
    }
    let comm = mesh.comm().clone();
    let size = comm.size();
    let rank = comm.rank();

    let cv = mesh.ask_verts_of(2)?;
    let ce = mesh.ask_down(2, 1)?.ab2b().clone();
    let ev = mesh.ask_verts_of(1)?;
    let v2c = mesh.ask_up(0, 2)?;
    let g0 = mesh.ask_globals(0)?;
    let g1 = mesh.ask_globals(1)?;
    let g2 = mesh.ask_globals(2)?;
    let o0 = mesh.ask_owners(0)?;
    let o1 = mesh.ask_owners(1)?;
    let o2 = mesh.ask_owners(2)?;
    let (nv, ne, nc) = (mesh.nverts(), mesh.nents(1), mesh.nelems());
    debug_assert!(o2.ranks.iter().all(|&r| r as usize == rank));

    // Stage 1: send star claims (owner vert idx, cell gid, cell idx) to
    // each vertex's owner; every rank claims for all its copies, itself
    // included, so the protocol has no local special case. A presence
    // record (sentinel cell id) registers interest even for vertices with
    // no locally adjacent cell, e.g. a hanging midpoint.
    const NO_CELL: u64 = u64::MAX;
    let mut claims: Vec<Vec<u64>> = vec![Vec::new(); size];
    let offs = v2c.a2ab().as_slice();
    for v in 0..nv {
        let dest = o0.ranks.get(v) as usize;
        let w = o0.idxs.get(v) as u64;
        claims[dest].extend_from_slice(&[w, NO_CELL, 0]);
        for s in offs[v] as usize..offs[v + 1] as usize {
            let c = v2c.ab2b().get(s) as usize;
            claims[dest].extend_from_slice(&[w, g2.get(c) as u64, c as u64]);
        }
    }
    let arrived = exchange_by_rank(&*comm, &claims)?;

    // Stage 2: union the per-vertex star lists and answer every requester.
    let mut union: HashMap<u64, Vec<(u64, u64, u64)>> = HashMap::new();
    let mut requesters: HashMap<u64, HashSet<usize>> = HashMap::new();
    for (src, list) in arrived.iter().enumerate() {
        for rec in list.chunks(3) {
            let (w, gid, idx) = (rec[0], rec[1], rec[2]);
            requesters.entry(w).or_default().insert(src);
            if gid != NO_CELL {
                union.entry(w).or_default().push((gid, src as u64, idx));
            }
        }
    }
    let mut replies: Vec<Vec<u64>> = vec![Vec::new(); size];
    for (&w, reqs) in &requesters {
        let Some(records) = union.get(&w) else { continue };
        for &r in reqs {
            for &(gid, crank, cidx) in records {
                replies[r].extend_from_slice(&[w, gid, crank, cidx]);
            }
        }
    }
    let star_lists = exchange_by_rank(&*comm, &replies)?;

    // Stage 3: pick the remote cells we lack and request their payloads.
    let mut owner_key_to_vert: HashMap<(u32, Local), Local> = HashMap::new();
    for v in 0..nv {
        owner_key_to_vert.insert((o0.ranks.get(v), o0.idxs.get(v)), v as Local);
    }
    let local_cell_gids: HashSet<u64> = (0..nc).map(|c| g2.get(c) as u64).collect();
    let mut halo: HashMap<u64, (usize, u64)> = HashMap::new();
    for (src, list) in star_lists.iter().enumerate() {
        for rec in list.chunks(4) {
            let (w, gid, crank, cidx) = (rec[0], rec[1], rec[2] as usize, rec[3]);
            debug_assert!(
                owner_key_to_vert.contains_key(&(src as u32, w as Local)),
                "star reply for a vertex we never claimed"
            );
            if !local_cell_gids.contains(&gid) {
                halo.entry(gid).or_insert((crank, cidx));
            }
        }
    }
    let mut requests: Vec<Vec<u64>> = vec![Vec::new(); size];
    for (_, &(crank, cidx)) in halo.iter() {
        requests[crank].push(cidx);
    }
    let wanted = exchange_by_rank(&*comm, &requests)?;

    // Stage 4: answer payload requests from local data.
    let mut payloads: Vec<Vec<u64>> = vec![Vec::new(); size];
    for (src, list) in wanted.iter().enumerate() {
        for &cidx in list {
            let c = cidx as usize;
            let mut w = WireCell::zeroed();
            w.gid = g2.get(c) as u64;
            for k in 0..4 {
                let v = cv.get(c * 4 + k) as usize;
                w.vert_gids[k] = g0.get(v) as u64;
                w.vert_owner_ranks[k] = o0.ranks.get(v) as u64;
                w.vert_owner_idxs[k] = o0.idxs.get(v) as u64;
                let e = ce.get(c * 4 + k) as usize;
                w.edge_gids[k] = g1.get(e) as u64;
                w.edge_owner_ranks[k] = o1.ranks.get(e) as u64;
                w.edge_owner_idxs[k] = o1.idxs.get(e) as u64;
                w.edge_vert_gids[k] = [
                    g0.get(ev.get(e * 2) as usize) as u64,
                    g0.get(ev.get(e * 2 + 1) as usize) as u64,
                ];
            }
            payloads[src].extend_from_slice(bytemuck::cast_slice(&[w]));
        }
    }
    let received = exchange_by_rank(&*comm, &payloads)?;

    // Stage 5: stitch ghosts after the existing numbering, by global id.
    let mut cells: Vec<(WireCell, u32, Local)> = Vec::new();
    for (src, list) in received.iter().enumerate() {
        let wire: &[WireCell] = bytemuck::cast_slice(list);
        for (k, w) in wire.iter().enumerate() {
            cells.push((*w, src as u32, requests[src][k] as Local));
        }
    }
    cells.sort_by_key(|(w, _, _)| w.gid);

    let mut vert_by_gid: HashMap<u64, Local> = (0..nv)
        .map(|v| (g0.get(v) as u64, v as Local))
        .collect();
    let mut edge_by_gid: HashMap<u64, Local> = (0..ne)
        .map(|e| (g1.get(e) as u64, e as Local))
        .collect();
    let mut new_g0: Vec<i64> = g0.to_vec();
    let mut new_g1: Vec<i64> = g1.to_vec();
    let mut new_g2: Vec<i64> = g2.to_vec();
    let mut vr = o0.ranks.to_vec();
    let mut vi = o0.idxs.to_vec();
    let mut er = o1.ranks.to_vec();
    let mut ei = o1.idxs.to_vec();
    let mut cr = o2.ranks.to_vec();
    let mut ci = o2.idxs.to_vec();
    let mut ev_new = ev.to_vec();
    let mut cv_new = cv.to_vec();

    for (w, src, src_idx) in &cells {
        for k in 0..4 {
            vert_by_gid.entry(w.vert_gids[k]).or_insert_with(|| {
                let v = new_g0.len() as Local;
                new_g0.push(w.vert_gids[k] as i64);
                vr.push(w.vert_owner_ranks[k] as u32);
                vi.push(w.vert_owner_idxs[k] as Local);
                v
            });
        }
        for k in 0..4 {
            if !edge_by_gid.contains_key(&w.edge_gids[k]) {
                let e = new_g1.len() as Local;
                new_g1.push(w.edge_gids[k] as i64);
                er.push(w.edge_owner_ranks[k] as u32);
                ei.push(w.edge_owner_idxs[k] as Local);
                ev_new.push(vert_by_gid[&w.edge_vert_gids[k][0]]);
                ev_new.push(vert_by_gid[&w.edge_vert_gids[k][1]]);
                edge_by_gid.insert(w.edge_gids[k], e);
            }
        }
        for k in 0..4 {
            cv_new.push(vert_by_gid[&w.vert_gids[k]]);
        }
        new_g2.push(w.gid as i64);
        cr.push(*src);
        ci.push(*src_idx);
    }

    let (new_nv, new_ne, new_nc) = (new_g0.len(), new_g1.len(), new_g2.len());
    log::debug!(
        "ghost: rank {rank} grows {nv}/{ne}/{nc} -> {new_nv}/{new_ne}/{new_nc}"
    );

    // Stage 6: commit — extend tags/parents, install topology and owners,
    // then sync every tag so ghosts take their owners' values.
    let mut stashed: Vec<(usize, Tag)> = Vec::new();
    for (dim, old_n, new_n) in [(0, nv, new_nv), (1, ne, new_ne), (2, nc, new_nc)] {
        for i in 0..mesh.ntags(dim) {
            stashed.push((dim, extend_tag(mesh.tag_by_index(dim, i).unwrap(), old_n, new_n)));
        }
    }
    let mut stashed_parents: Vec<(usize, Parents)> = Vec::new();
    for (dim, new_n) in [(0, new_nv), (1, new_ne), (2, new_nc)] {
        let p = mesh.ask_parents(dim)?;
        let mut idx = p.parent_idx.to_vec();
        let mut codes = p.codes.to_vec();
        idx.resize(new_n, INVALID_LOCAL);
        codes.resize(new_n, 0);
        stashed_parents.push((
            dim,
            Parents {
                parent_idx: idx.into(),
                codes: codes.into(),
            },
        ));
    }

    mesh.resize_verts(new_nv);
    mesh.set_ents(1, Adj::from_ab2b(ev_new.into()))?;
    mesh.set_ents(2, Adj::from_ab2b(cv_new.into()))?;
    mesh.set_owners(0, Remotes::new(vr.into(), vi.into()))?;
    mesh.set_owners(1, Remotes::new(er.into(), ei.into()))?;
    mesh.set_owners(2, Remotes::new(cr.into(), ci.into()))?;
    for (dim, tag) in stashed {
        replace_tag(mesh, dim, tag)?;
    }
    for (dim, parents) in stashed_parents {
        mesh.set_parents(dim, parents);
    }
    // the stitched ids are already consistent; install them over the sync
    mesh.put_tag::<i64>(0, crate::mesh::reserved::GLOBAL, 1, Default::default(), new_g0.into())?;
    mesh.put_tag::<i64>(1, crate::mesh::reserved::GLOBAL, 1, Default::default(), new_g1.into())?;
    mesh.put_tag::<i64>(2, crate::mesh::reserved::GLOBAL, 1, Default::default(), new_g2.into())?;
    mesh.set_parting_flag(Parting::Ghosted);
    for dim in 0..=2 {
        let names: Vec<String> = (0..mesh.ntags(dim))
            .map(|i| mesh.tag_by_index(dim, i).unwrap().name().to_string())
            .collect();
        for name in names {
            if name != crate::mesh::reserved::GLOBAL {
                mesh.sync_tag(dim, &name)?;
            }
        }
    }
    Ok(())
}

fn replace_tag<C: Communicator>(mesh: &mut Mesh<C>, dim: usize, tag: Tag) -> Result<()> {
    let name = tag.name().to_string();
    let ncomps = tag.ncomps();
    let policy = tag.policy();
    match tag.data().clone() {
        TagData::I8(a) => mesh.put_tag(dim, &name, ncomps, policy, a),
        TagData::I32(a) => mesh.put_tag(dim, &name, ncomps, policy, a),
        TagData::I64(a) => mesh.put_tag(dim, &name, ncomps, policy, a),
        TagData::F64(a) => mesh.put_tag(dim, &name, ncomps, policy, a),
    }
}

/// Ghosted to element-based: drop the halo and compact the numbering.
pub(crate) fn unghost<C: Communicator>(mesh: &mut Mesh<C>) -> Result<()> {
    if mesh.parting() != Parting::Ghosted {
        return Err(MeshError::WrongParting {
            required: Parting::Ghosted.name(),
            current: mesh.parting().name(),
        });
    }
    if mesh.comm().size() == 1 {
        mesh.set_parting_flag(Parting::ElemBased);
        return Ok(());
    }
    if mesh.dim() != 2 {
        return Err(MeshError::UnsupportedParting(mesh.dim()));
    }
    let comm = mesh.comm().clone();
    let rank = comm.rank();

    let cv = mesh.ask_verts_of(2)?;
    let ce = mesh.ask_down(2, 1)?.ab2b().clone();
    let ev = mesh.ask_verts_of(1)?;
    let counts = [mesh.nverts(), mesh.nents(1), mesh.nelems()];
    let owners: Vec<Remotes> = (0..=2).map(|d| mesh.ask_owners(d)).collect::<Result<_>>()?;
    let parents: Vec<Parents> = (0..=2).map(|d| mesh.ask_parents(d)).collect::<Result<_>>()?;

    // Keep: closure of owned cells, everything we own, and refinement
    // descendants of anything kept (their midpoints must stay resolvable).
    let mut keep: [Vec<bool>; 3] = [
        vec![false; counts[0]],
        vec![false; counts[1]],
        vec![false; counts[2]],
    ];
    for c in 0..counts[2] {
        if owners[2].ranks.get(c) as usize == rank {
            keep[2][c] = true;
            for k in 0..4 {
                keep[0][cv.get(c * 4 + k) as usize] = true;
                keep[1][ce.get(c * 4 + k) as usize] = true;
            }
        }
    }
    for d in 0..=2 {
        for i in 0..counts[d] {
            if owners[d].ranks.get(i) as usize == rank {
                keep[d][i] = true;
            }
        }
    }
    loop {
        let mut changed = false;
        for d in 0..=2 {
            for i in 0..counts[d] {
                if keep[d][i] {
                    continue;
                }
                let pi = parents[d].parent_idx.get(i);
                if pi != INVALID_LOCAL {
                    let pd = code_parent_dim(parents[d].codes.get(i));
                    if keep[pd][pi as usize] {
                        keep[d][i] = true;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    // Old-to-new maps plus each owner's compacted index, exchanged over the
    // old numbering before anything is dropped.
    let mut old2new: [Vec<Local>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut kept: [Vec<Local>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for d in 0..=2 {
        old2new[d] = vec![INVALID_LOCAL; counts[d]];
        for i in 0..counts[d] {
            if keep[d][i] {
                old2new[d][i] = kept[d].len() as Local;
                kept[d].push(i as Local);
            }
        }
    }
    let mut owner_new_idx: [Vec<i64>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for d in 0..=2 {
        let local: Vec<i64> = old2new[d]
            .iter()
            .map(|&x| if x == INVALID_LOCAL { -1 } else { x as i64 })
            .collect();
        owner_new_idx[d] = mesh.sync_array(d, &local.into(), 1)?.to_vec();
    }

    let remap = |d: usize, i: Local| old2new[d][i as usize];
    let mut cv_new = Vec::with_capacity(kept[2].len() * 4);
    for &c in &kept[2] {
        for k in 0..4 {
            cv_new.push(remap(0, cv.get(c as usize * 4 + k)));
        }
    }
    let mut ev_new = Vec::with_capacity(kept[1].len() * 2);
    for &e in &kept[1] {
        ev_new.push(remap(0, ev.get(e as usize * 2)));
        ev_new.push(remap(0, ev.get(e as usize * 2 + 1)));
    }
    debug_assert!(cv_new.iter().chain(ev_new.iter()).all(|&v| v != INVALID_LOCAL));

    let mut stashed: Vec<(usize, Tag)> = Vec::new();
    for d in 0..=2 {
        for i in 0..mesh.ntags(d) {
            stashed.push((d, filter_tag(mesh.tag_by_index(d, i).unwrap(), &kept[d])));
        }
    }
    let mut new_owners: Vec<Remotes> = Vec::new();
    for d in 0..=2 {
        let ranks: Vec<u32> = kept[d].iter().map(|&i| owners[d].ranks.get(i as usize)).collect();
        let idxs: Vec<Local> = kept[d]
            .iter()
            .map(|&i| owner_new_idx[d][i as usize] as Local)
            .collect();
        debug_assert!(
            kept[d]
                .iter()
                .all(|&i| owner_new_idx[d][i as usize] >= 0),
            "an owner dropped an entity still held elsewhere"
        );
        new_owners.push(Remotes::new(ranks.into(), idxs.into()));
    }
    let mut new_parents: Vec<Parents> = Vec::new();
    for d in 0..=2 {
        let mut idx = Vec::with_capacity(kept[d].len());
        let mut codes = Vec::with_capacity(kept[d].len());
        for &i in &kept[d] {
            let pi = parents[d].parent_idx.get(i as usize);
            let code = parents[d].codes.get(i as usize);
            if pi == INVALID_LOCAL {
                idx.push(INVALID_LOCAL);
                codes.push(0);
            } else {
                let pd = code_parent_dim(code);
                let np = remap(pd, pi);
                idx.push(np);
                codes.push(if np == INVALID_LOCAL { 0 } else { code });
            }
        }
        new_parents.push(Parents {
            parent_idx: idx.into(),
            codes: codes.into(),
        });
    }

    log::debug!(
        "unghost: rank {rank} keeps {}/{}/{} of {}/{}/{}",
        kept[0].len(),
        kept[1].len(),
        kept[2].len(),
        counts[0],
        counts[1],
        counts[2]
    );

    mesh.resize_verts(kept[0].len());
    mesh.set_ents(1, Adj::from_ab2b(ev_new.into()))?;
    mesh.set_ents(2, Adj::from_ab2b(cv_new.into()))?;
    for (d, owners) in new_owners.into_iter().enumerate() {
        mesh.set_owners(d, owners)?;
    }
    for (dim, tag) in stashed {
        replace_tag(mesh, dim, tag)?;
    }
    for (d, parents) in new_parents.into_iter().enumerate() {
        mesh.set_parents(d, parents);
    }
    mesh.set_parting_flag(Parting::ElemBased);
    Ok(())
}
