//! Phase 4: move field data onto the refined topology.
//!
//! Entities carried over keep their values (old indices are preserved by
//! the rewrite); products get values per tag policy. Inherited and
//! pointwise tags copy the same-dimension parent's row (products without a
//! same-dimension ancestor start at zero); linear vertex tags interpolate
//! the parent entity's vertices; conserved cell tags split the parent's
//! quantity equally among its four children, which keeps the leaf-cell sum
//! invariant. Refinement depth and leaf flags are rewritten directly.

use super::TransferOpts;
use super::topology::RefinePlan;
use crate::array::{Local, Read};
use crate::comm::{CommScalar, Communicator, ReduceOp};
use crate::error::Result;
use crate::mesh::{Mesh, reserved};
use crate::tag::{TagData, TagValue, TransferPolicy};

/// Per product of dimension `dim` (in append order), the old index of its
/// parent when the parent has the same dimension.
fn same_dim_parents(plan: &RefinePlan, dim: usize) -> Vec<Option<Local>> {
    match dim {
        0 => vec![None; plan.em.len() + plan.cm.len()],
        1 => {
            let mut out = Vec::with_capacity(plan.em.len() * 2 + plan.cm.len() * 4);
            for &e in &plan.em {
                out.push(Some(e));
                out.push(Some(e));
            }
            out.extend(std::iter::repeat_n(None, plan.cm.len() * 4));
            out
        }
        _ => {
            let mut out = Vec::with_capacity(plan.cm.len() * 4);
            for &c in &plan.cm {
                out.extend(std::iter::repeat_n(Some(c), 4));
            }
            out
        }
    }
}

fn transfer_copy<T: TagValue>(
    old_data: &Read<T>,
    ncomps: usize,
    parents: &[Option<Local>],
) -> Vec<T> {
    let mut out = old_data.to_vec();
    for p in parents {
        match p {
            Some(i) => {
                let i = *i as usize;
                out.extend_from_slice(&old_data.as_slice()[i * ncomps..(i + 1) * ncomps]);
            }
            None => out.extend(std::iter::repeat_n(T::identity(ReduceOp::Sum), ncomps)),
        }
    }
    out
}

fn transfer_f64(
    old_data: &Read<f64>,
    ncomps: usize,
    dim: usize,
    policy: TransferPolicy,
    plan: &RefinePlan,
    parents: &[Option<Local>],
) -> Vec<f64> {
    match (policy, dim) {
        (TransferPolicy::Linear, 0) => {
            let mut out = old_data.to_vec();
            let row = |v: Local| &old_data.as_slice()[v as usize * ncomps..(v as usize + 1) * ncomps];
            for &e in &plan.em {
                let (a, b) = (plan.ev.get(e as usize * 2), plan.ev.get(e as usize * 2 + 1));
                for c in 0..ncomps {
                    out.push(0.5 * (row(a)[c] + row(b)[c]));
                }
            }
            for &cell in &plan.cm {
                for c in 0..ncomps {
                    let sum: f64 = (0..4)
                        .map(|k| row(plan.cv.get(cell as usize * 4 + k))[c])
                        .sum();
                    out.push(0.25 * sum);
                }
            }
            out
        }
        (TransferPolicy::Conserve, 2) => {
            let mut out = old_data.to_vec();
            for p in parents {
                let i = p.expect("every cell product has a cell parent") as usize;
                for c in 0..ncomps {
                    out.push(old_data.get(i * ncomps + c) / 4.0);
                }
            }
            out
        }
        _ => transfer_copy(old_data, ncomps, parents),
    }
}

pub(crate) fn transfer_fields<C: Communicator>(
    old: &mut Mesh<C>,
    new_mesh: &mut Mesh<C>,
    plan: &RefinePlan,
    opts: &TransferOpts,
) -> Result<()> {
    // refinement depth: products sit one level below their parent
    let level1 = old.get_array::<i8>(1, reserved::LEVEL)?;
    let level2 = old.get_array::<i8>(2, reserved::LEVEL)?;
    {
        let mut l0 = old.get_array::<i8>(0, reserved::LEVEL)?.to_vec();
        for &e in &plan.em {
            l0.push(level1.get(e as usize).saturating_add(1));
        }
        for &c in &plan.cm {
            l0.push(level2.get(c as usize).saturating_add(1));
        }
        new_mesh.put_tag::<i8>(0, reserved::LEVEL, 1, TransferPolicy::Inherit, l0.into())?;

        let mut l1 = level1.to_vec();
        for &e in &plan.em {
            let l = level1.get(e as usize).saturating_add(1);
            l1.extend_from_slice(&[l, l]);
        }
        for &c in &plan.cm {
            let l = level2.get(c as usize).saturating_add(1);
            l1.extend(std::iter::repeat_n(l, 4));
        }
        new_mesh.put_tag::<i8>(1, reserved::LEVEL, 1, TransferPolicy::Inherit, l1.into())?;

        let mut l2 = level2.to_vec();
        for &c in &plan.cm {
            l2.extend(std::iter::repeat_n(level2.get(c as usize).saturating_add(1), 4));
        }
        new_mesh.put_tag::<i8>(2, reserved::LEVEL, 1, TransferPolicy::Inherit, l2.into())?;
    }

    // leaf flags: refined entities stop being leaves, products start as such
    {
        let mut leaf1 = old.get_array::<i8>(1, reserved::LEAF)?.to_vec();
        for &e in &plan.em {
            leaf1[e as usize] = 0;
        }
        leaf1.extend(std::iter::repeat_n(1, plan.em.len() * 2 + plan.cm.len() * 4));
        new_mesh.put_tag::<i8>(1, reserved::LEAF, 1, TransferPolicy::Inherit, leaf1.into())?;

        let mut leaf2 = old.get_array::<i8>(2, reserved::LEAF)?.to_vec();
        for &c in &plan.cm {
            leaf2[c as usize] = 0;
        }
        leaf2.extend(std::iter::repeat_n(1, plan.cm.len() * 4));
        new_mesh.put_tag::<i8>(2, reserved::LEAF, 1, TransferPolicy::Inherit, leaf2.into())?;
    }

    // user tags, by declared or overridden policy
    for dim in 0..=2 {
        let parents = same_dim_parents(plan, dim);
        let names: Vec<String> = (0..old.ntags(dim))
            .map(|i| old.tag_by_index(dim, i).unwrap().name().to_string())
            .filter(|n| {
                n != reserved::REFINE
                    && n != reserved::AMR_ORDER
                    && n != reserved::GLOBAL
                    && n != reserved::LEVEL
                    && n != reserved::LEAF
            })
            .collect();
        for name in names {
            let tag = old.get_tag(dim, &name)?;
            let ncomps = tag.ncomps();
            let policy = opts.overrides.get(&name).copied().unwrap_or(tag.policy());
            match tag.data().clone() {
                TagData::I8(a) => new_mesh.put_tag::<i8>(
                    dim,
                    &name,
                    ncomps,
                    policy,
                    transfer_copy(&a, ncomps, &parents).into(),
                )?,
                TagData::I32(a) => new_mesh.put_tag::<i32>(
                    dim,
                    &name,
                    ncomps,
                    policy,
                    transfer_copy(&a, ncomps, &parents).into(),
                )?,
                TagData::I64(a) => new_mesh.put_tag::<i64>(
                    dim,
                    &name,
                    ncomps,
                    policy,
                    transfer_copy(&a, ncomps, &parents).into(),
                )?,
                TagData::F64(a) => new_mesh.put_tag::<f64>(
                    dim,
                    &name,
                    ncomps,
                    policy,
                    transfer_f64(&a, ncomps, dim, policy, plan, &parents).into(),
                )?,
            }
        }
    }
    Ok(())
}
