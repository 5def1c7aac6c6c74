//! Adaptive refinement of hypercube meshes.
//!
//! [`refine`] consumes a per-cell marking and rewrites the mesh in strict
//! phases: marks are propagated to the closure of every marked cell (with
//! an ownership-aware reduction so all copies of a shared entity agree);
//! the mesh switches to the ghosted parting, where every marked entity is
//! assigned a canonical global ordering; back in the element-based parting
//! the topology is rewritten from the hypercube split-degree tables, field
//! data is transferred per tag policy, ancestry codes are recorded, and the
//! rewritten mesh atomically replaces the caller's handle.

mod topology;
mod transfer;

use crate::array::Read;
use crate::comm::{Communicator, ReduceOp};
use crate::error::{MeshError, Result};
use crate::mesh::{Mesh, Parting, reserved};
use crate::parallel::parallel_map;
use crate::tag::TransferPolicy;
use std::collections::HashMap;

/// Pack (which child, parent dimension) into an ancestry code.
#[inline]
pub const fn make_code(which_child: usize, parent_dim: usize) -> i8 {
    ((which_child << 2) | parent_dim) as i8
}

/// The child slot of an ancestry code.
#[inline]
pub const fn code_which_child(code: i8) -> usize {
    (code as u8 >> 2) as usize
}

/// The parent's topological dimension of an ancestry code.
#[inline]
pub const fn code_parent_dim(code: i8) -> usize {
    (code & 3) as usize
}

/// Per-tag transfer-policy overrides for one refine call. Names not listed
/// fall back to the tag's declared policy.
#[derive(Clone, Debug, Default)]
pub struct TransferOpts {
    pub overrides: HashMap<String, TransferPolicy>,
}

impl TransferOpts {
    pub fn with(mut self, name: &str, policy: TransferPolicy) -> Self {
        self.overrides.insert(name.to_string(), policy);
        self
    }
}

/// Refine every marked cell of a 2-D hypercube mesh.
///
/// `marks` has one entry per element (nonzero = refine); every marked cell
/// must be a leaf. The old mesh stays valid until the rewritten mesh
/// replaces it; the operation is not transactional across process crashes.
pub fn refine<C: Communicator>(
    mesh: &mut Mesh<C>,
    marks: &Read<i8>,
    opts: &TransferOpts,
) -> Result<()> {
    if mesh.dim() != 2 {
        return Err(MeshError::UnsupportedFamily(mesh.dim()));
    }
    if mesh.parting() != Parting::ElemBased {
        return Err(MeshError::WrongParting {
            required: Parting::ElemBased.name(),
            current: mesh.parting().name(),
        });
    }
    mark_refined(mesh, marks)?;
    mesh.set_parting(Parting::Ghosted)?;
    let totals = order_mods(mesh)?;
    mesh.set_parting(Parting::ElemBased)?;
    let new_mesh = topology::refine_elem_based(mesh, &totals, opts)?;
    *mesh = new_mesh;
    log::debug!(
        "refine: rank {} now holds {}/{}/{} entities",
        mesh.comm().rank(),
        mesh.nverts(),
        mesh.nents(1),
        mesh.nelems()
    );
    Ok(())
}

fn ensure_base_tags<C: Communicator>(mesh: &mut Mesh<C>) -> Result<()> {
    for dim in 0..=mesh.dim() {
        if !mesh.has_tag(dim, reserved::LEVEL) {
            let zeros: Read<i8> = vec![0i8; mesh.nents(dim)].into();
            mesh.add_tag(dim, reserved::LEVEL, 1, TransferPolicy::Inherit, zeros)?;
        }
    }
    for dim in 1..=mesh.dim() {
        if !mesh.has_tag(dim, reserved::LEAF) {
            let ones: Read<i8> = vec![1i8; mesh.nents(dim)].into();
            mesh.add_tag(dim, reserved::LEAF, 1, TransferPolicy::Inherit, ones)?;
        }
    }
    Ok(())
}

/// Phase 1: expand cell marks to the refinement closure.
///
/// An edge is marked when it is still a leaf and any cell of its star is
/// marked; marks of shared edges are combined at the owner with a bitwise
/// or and pushed back to every copy, so all ranks agree.
pub(crate) fn mark_refined<C: Communicator>(mesh: &mut Mesh<C>, marks: &Read<i8>) -> Result<()> {
    let nc = mesh.nelems();
    if marks.len() != nc {
        return Err(MeshError::LengthMismatch {
            expected: nc,
            found: marks.len(),
        });
    }
    ensure_base_tags(mesh)?;
    let leaf2 = mesh.get_array::<i8>(2, reserved::LEAF)?;
    for c in 0..nc {
        if marks.get(c) != 0 && leaf2.get(c) == 0 {
            return Err(MeshError::RefineNonLeaf(c));
        }
    }
    mesh.put_tag(2, reserved::REFINE, 1, TransferPolicy::Inherit, marks.clone())?;

    let ne = mesh.nents(1);
    let e2c = mesh.ask_up(1, 2)?;
    let leaf1 = mesh.get_array::<i8>(1, reserved::LEAF)?;
    let offs = e2c.a2ab().clone();
    let cells = e2c.ab2b().clone();
    let edge_marks: Vec<i8> = parallel_map(ne, |e| {
        if leaf1.get(e) == 0 {
            return 0;
        }
        let touched = (offs.get(e) as usize..offs.get(e + 1) as usize)
            .any(|s| marks.get(cells.get(s) as usize) != 0);
        touched as i8
    });
    mesh.put_tag(1, reserved::REFINE, 1, TransferPolicy::Inherit, edge_marks.into())?;
    mesh.reduce_tag(1, reserved::REFINE, ReduceOp::BOr)?;
    Ok(())
}

/// Phase 2 (ghosted): number all marked entities of each dimension
/// globally — owned-count exclusive scan, owner assignment, sync to every
/// copy — and record the ordering as a tag. Returns the global mod count
/// per dimension.
pub(crate) fn order_mods<C: Communicator>(mesh: &mut Mesh<C>) -> Result<[u64; 4]> {
    let comm = mesh.comm().clone();
    let mut totals = [0u64; 4];
    for dim in 1..=mesh.dim() {
        let marks = mesh.get_array::<i8>(dim, reserved::REFINE)?;
        let owned = mesh.owned(dim)?;
        let count = (0..mesh.nents(dim))
            .filter(|&i| marks.get(i) != 0 && owned.get(i) != 0)
            .count() as i64;
        let offset = comm.exscan(count, ReduceOp::Sum)?;
        let mut next = offset;
        let local: Vec<i64> = (0..mesh.nents(dim))
            .map(|i| {
                if marks.get(i) != 0 && owned.get(i) != 0 {
                    let o = next;
                    next += 1;
                    o
                } else {
                    -1
                }
            })
            .collect();
        let synced = mesh.sync_array(dim, &local.into(), 1)?;
        debug_assert!(
            (0..mesh.nents(dim)).all(|i| marks.get(i) == 0 || synced.get(i) >= 0),
            "a marked entity never received its canonical order"
        );
        mesh.put_tag(dim, reserved::AMR_ORDER, 1, TransferPolicy::Inherit, synced)?;
        totals[dim] = comm.allreduce(count, ReduceOp::Sum)? as u64;
    }
    log::debug!("order_mods: totals {:?}", &totals[1..=mesh.dim()]);
    Ok(totals)
}
