//! Phase 3: rewrite the topology from the split-degree tables.
//!
//! Products are instantiated per product dimension from vertices upward;
//! entities untouched by refinement keep their local indices (products are
//! appended), and the explicit old-to-new maps are therefore identity
//! prefixes. Product global ids are a pure function of the canonical mod
//! ordering computed in the ghosted phase, so every rank holding a copy of
//! a shared mod derives the same ids without further communication.

use super::{TransferOpts, make_code, transfer};
use crate::array::{Global, INVALID_LOCAL, Local, Read};
use crate::comm::{Communicator, ReduceOp};
use crate::dist::{Remotes, owners_from_globals};
use crate::error::{MeshError, Result};
use crate::graph::Adj;
use crate::hypercube::{QUAD_CHILD_VERTS, hypercube_split_degree};
use crate::maps::{collect_marked, invert_injective_map};
use crate::mesh::{Mesh, Parents, reserved};
use crate::tag::TransferPolicy;
use hashbrown::HashMap;

/// Everything the transfer phase needs to know about the rewrite.
pub(crate) struct RefinePlan {
    /// Marked (modified) edges and cells, ascending.
    pub em: Vec<Local>,
    pub cm: Vec<Local>,
    /// Old entity counts per dimension.
    pub nv: usize,
    pub ne: usize,
    pub nc: usize,
    /// Old down-adjacencies.
    pub cv: Read<Local>,
    pub ev: Read<Local>,
    /// New midpoint vertex per marked edge / marked cell.
    pub edge_mid: Vec<Local>,
    pub cell_center: Vec<Local>,
    /// Per marked cell, the midpoint vertex of each template edge.
    pub cell_edge_mids: Vec<[Local; 4]>,
}

pub(crate) fn refine_elem_based<C: Communicator>(
    mesh: &mut Mesh<C>,
    totals: &[u64; 4],
    opts: &TransferOpts,
) -> Result<Mesh<C>> {
    let comm = mesh.comm().clone();
    let (nv, ne, nc) = (mesh.nverts(), mesh.nents(1), mesh.nelems());
    let cv = mesh.ask_verts_of(2)?;
    let ce = mesh.ask_down(2, 1)?.ab2b().clone();
    let ev = mesh.ask_verts_of(1)?;
    let marks1 = mesh.get_array::<i8>(1, reserved::REFINE)?;
    let marks2 = mesh.get_array::<i8>(2, reserved::REFINE)?;
    let order1 = mesh.get_array::<i64>(1, reserved::AMR_ORDER)?;
    let order2 = mesh.get_array::<i64>(2, reserved::AMR_ORDER)?;
    let leaf1 = mesh.get_array::<i8>(1, reserved::LEAF)?;
    let g0 = mesh.ask_globals(0)?;
    let g1 = mesh.ask_globals(1)?;
    let g2 = mesh.ask_globals(2)?;

    let em = collect_marked(marks1.as_slice());
    let cm = collect_marked(marks2.as_slice());
    let e2mod = invert_injective_map(&em, ne);

    // Fresh id ranges start after the current global extent of each
    // dimension; block layout is (edge mods, then cell mods) per product
    // dimension, `order * degree + slot` within a block.
    let mut base = [0i64; 3];
    for (dim, g) in [(0, &g0), (1, &g1), (2, &g2)] {
        let local_max = g.iter().copied().max().unwrap_or(-1);
        base[dim] = comm.allreduce(local_max, ReduceOp::Max)? + 1;
    }
    let nmods_e = totals[1] as i64;
    let gid_midvert = |e: Local| base[0] + order1.get(e as usize);
    let gid_center = |c: Local| base[0] + nmods_e + order2.get(c as usize);
    let gid_edge_child = |e: Local, slot: i64| base[1] + order1.get(e as usize) * 2 + slot;
    let gid_interior_edge =
        |c: Local, slot: i64| base[1] + nmods_e * 2 + order2.get(c as usize) * 4 + slot;
    let gid_cell_child = |c: Local, slot: i64| base[2] + order2.get(c as usize) * 4 + slot;

    // -- product vertices --------------------------------------------------
    debug_assert_eq!(hypercube_split_degree(1, 0), 1);
    debug_assert_eq!(hypercube_split_degree(2, 0), 1);
    let edge_mid: Vec<Local> = (0..em.len()).map(|j| (nv + j) as Local).collect();
    let cell_center: Vec<Local> = (0..cm.len())
        .map(|j| (nv + em.len() + j) as Local)
        .collect();
    let new_nv = nv + em.len() + cm.len();

    // Midpoints of an already-refined edge come from its recorded child.
    let p0 = mesh.ask_parents(0)?;
    let mut existing_mid: HashMap<Local, Local> = HashMap::new();
    for v in 0..nv {
        let pi = p0.parent_idx.get(v);
        if pi != INVALID_LOCAL && super::code_parent_dim(p0.codes.get(v)) == 1 {
            existing_mid.insert(pi, v as Local);
        }
    }
    let mut cell_edge_mids: Vec<[Local; 4]> = Vec::with_capacity(cm.len());
    for &c in &cm {
        let mut mids = [0 as Local; 4];
        for k in 0..4 {
            let e = ce.get(c as usize * 4 + k);
            mids[k] = if marks1.get(e as usize) != 0 {
                edge_mid[e2mod[e as usize] as usize]
            } else if leaf1.get(e as usize) == 0 {
                *existing_mid
                    .get(&e)
                    .ok_or(MeshError::NoMatch { dim: 1, entity: e as usize })?
            } else {
                // propagation guarantees every leaf edge of a marked cell
                // is itself marked
                return Err(MeshError::NoMatch { dim: 1, entity: e as usize });
            };
        }
        cell_edge_mids.push(mids);
    }

    // -- product edges -----------------------------------------------------
    debug_assert_eq!(hypercube_split_degree(1, 1), 2);
    debug_assert_eq!(hypercube_split_degree(2, 1), 4);
    let mut ev_new = ev.to_vec();
    let mut g1_new = g1.to_vec();
    let mut parents1_idx: Vec<Local> = vec![INVALID_LOCAL; ne];
    let mut parents1_codes: Vec<i8> = vec![0; ne];
    {
        let old = mesh.ask_parents(1)?;
        parents1_idx.copy_from_slice(old.parent_idx.as_slice());
        parents1_codes.copy_from_slice(old.codes.as_slice());
    }
    for (j, &e) in em.iter().enumerate() {
        let (a, b) = (ev.get(e as usize * 2), ev.get(e as usize * 2 + 1));
        let m = edge_mid[j];
        ev_new.extend_from_slice(&[a, m, m, b]);
        for slot in 0..2 {
            g1_new.push(gid_edge_child(e, slot));
            parents1_idx.push(e);
            parents1_codes.push(make_code(slot as usize, 1));
        }
    }
    for (j, &c) in cm.iter().enumerate() {
        for k in 0..4 {
            ev_new.extend_from_slice(&[cell_edge_mids[j][k], cell_center[j]]);
            g1_new.push(gid_interior_edge(c, k as i64));
            parents1_idx.push(c);
            parents1_codes.push(make_code(k, 2));
        }
    }
    let new_ne = ev_new.len() / 2;

    // -- product cells -----------------------------------------------------
    debug_assert_eq!(hypercube_split_degree(2, 2), 4);
    let mut cv_new = cv.to_vec();
    let mut g2_new = g2.to_vec();
    let mut parents2_idx: Vec<Local> = vec![INVALID_LOCAL; nc];
    let mut parents2_codes: Vec<i8> = vec![0; nc];
    {
        let old = mesh.ask_parents(2)?;
        parents2_idx.copy_from_slice(old.parent_idx.as_slice());
        parents2_codes.copy_from_slice(old.codes.as_slice());
    }
    for (j, &c) in cm.iter().enumerate() {
        for (k, child) in QUAD_CHILD_VERTS.iter().enumerate() {
            for &sym in child {
                cv_new.push(match sym {
                    s if s < 4 => cv.get(c as usize * 4 + s),
                    s if s < 8 => cell_edge_mids[j][s - 4],
                    _ => cell_center[j],
                });
            }
            g2_new.push(gid_cell_child(c, k as i64));
            parents2_idx.push(c);
            parents2_codes.push(make_code(k, 2));
        }
    }
    let new_nc = cv_new.len() / 4;

    // vertex ids and ancestry
    let mut g0_new = g0.to_vec();
    let mut parents0_idx: Vec<Local> = vec![INVALID_LOCAL; nv];
    let mut parents0_codes: Vec<i8> = vec![0; nv];
    {
        let old = mesh.ask_parents(0)?;
        parents0_idx.copy_from_slice(old.parent_idx.as_slice());
        parents0_codes.copy_from_slice(old.codes.as_slice());
    }
    for &e in &em {
        g0_new.push(gid_midvert(e));
        parents0_idx.push(e);
        parents0_codes.push(make_code(0, 1));
    }
    for &c in &cm {
        g0_new.push(gid_center(c));
        parents0_idx.push(c);
        parents0_codes.push(make_code(0, 2));
    }

    // -- assemble ----------------------------------------------------------
    let mut new_mesh = Mesh::new(comm.clone(), 2, new_nv)?;
    new_mesh.set_ents(1, Adj::from_ab2b(ev_new.into()))?;
    new_mesh.set_ents(2, Adj::from_ab2b(cv_new.into()))?;
    new_mesh.set_parents(
        0,
        Parents {
            parent_idx: parents0_idx.into(),
            codes: parents0_codes.into(),
        },
    );
    new_mesh.set_parents(
        1,
        Parents {
            parent_idx: parents1_idx.into(),
            codes: parents1_codes.into(),
        },
    );
    new_mesh.set_parents(
        2,
        Parents {
            parent_idx: parents2_idx.into(),
            codes: parents2_codes.into(),
        },
    );
    new_mesh.put_tag::<i64>(
        0,
        reserved::GLOBAL,
        1,
        TransferPolicy::Inherit,
        g0_new.clone().into(),
    )?;
    new_mesh.put_tag::<i64>(1, reserved::GLOBAL, 1, TransferPolicy::Inherit, g1_new.into())?;
    new_mesh.put_tag::<i64>(2, reserved::GLOBAL, 1, TransferPolicy::Inherit, g2_new.into())?;

    // -- ownership: old entities keep their records, products rendezvous
    // with the parent's owner as the preferred rank ----------------------
    let o0 = mesh.ask_owners(0)?;
    let o1 = mesh.ask_owners(1)?;
    let o2 = mesh.ask_owners(2)?;
    let prod_g0: Vec<Global> = g0_new[nv..].iter().map(|&g| g as Global).collect();
    let mut prior0: Vec<u32> = Vec::with_capacity(prod_g0.len());
    for &e in &em {
        prior0.push(o1.ranks.get(e as usize));
    }
    for &c in &cm {
        prior0.push(o2.ranks.get(c as usize));
    }
    let prod_o0 = owners_from_globals(&comm, &prod_g0, Some(&prior0), nv as Local)?;

    let nprod_e = em.len() * 2 + cm.len() * 4;
    let mut prod_g1: Vec<Global> = Vec::with_capacity(nprod_e);
    let mut prior1: Vec<u32> = Vec::with_capacity(nprod_e);
    for &e in &em {
        for slot in 0..2 {
            prod_g1.push(gid_edge_child(e, slot) as Global);
            prior1.push(o1.ranks.get(e as usize));
        }
    }
    for &c in &cm {
        for k in 0..4 {
            prod_g1.push(gid_interior_edge(c, k) as Global);
            prior1.push(o2.ranks.get(c as usize));
        }
    }
    let prod_o1 = owners_from_globals(&comm, &prod_g1, Some(&prior1), ne as Local)?;

    let mut prod_g2: Vec<Global> = Vec::with_capacity(cm.len() * 4);
    let mut prior2: Vec<u32> = Vec::with_capacity(cm.len() * 4);
    for &c in &cm {
        for k in 0..4 {
            prod_g2.push(gid_cell_child(c, k) as Global);
            prior2.push(o2.ranks.get(c as usize));
        }
    }
    let prod_o2 = owners_from_globals(&comm, &prod_g2, Some(&prior2), nc as Local)?;

    let concat_owners = |old: &Remotes, prod: &Remotes| -> Remotes {
        let mut ranks = old.ranks.to_vec();
        ranks.extend_from_slice(prod.ranks.as_slice());
        let mut idxs = old.idxs.to_vec();
        idxs.extend_from_slice(prod.idxs.as_slice());
        Remotes::new(ranks.into(), idxs.into())
    };
    new_mesh.set_owners(0, concat_owners(&o0, &prod_o0))?;
    new_mesh.set_owners(1, concat_owners(&o1, &prod_o1))?;
    new_mesh.set_owners(2, concat_owners(&o2, &prod_o2))?;

    // -- field transfer ----------------------------------------------------
    let plan = RefinePlan {
        em,
        cm,
        nv,
        ne,
        nc,
        cv,
        ev,
        edge_mid,
        cell_center,
        cell_edge_mids,
    };
    transfer::transfer_fields(mesh, &mut new_mesh, &plan, opts)?;
    Ok(new_mesh)
}
