//! Plain-data mesh snapshots for binary persistence.
//!
//! [`MeshSnapshot`] captures everything a mesh stores — dimension, parting,
//! entity counts, down-adjacencies, tags, ownership, ancestry — as owned
//! vectors with serde derives, so any serde format can round-trip a mesh:
//! `Mesh::from_snapshot(comm, &mesh.snapshot())` reconstructs a mesh equal
//! to the original under [`Mesh`]'s structural equality.

use crate::array::Local;
use crate::comm::Communicator;
use crate::dist::Remotes;
use crate::error::Result;
use crate::graph::Adj;
use crate::mesh::{DIMS, Mesh, Parents, Parting};
use crate::tag::{TagData, TransferPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SnapData {
    I8(Vec<i8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

impl From<&TagData> for SnapData {
    fn from(data: &TagData) -> Self {
        match data {
            TagData::I8(a) => SnapData::I8(a.to_vec()),
            TagData::I32(a) => SnapData::I32(a.to_vec()),
            TagData::I64(a) => SnapData::I64(a.to_vec()),
            TagData::F64(a) => SnapData::F64(a.to_vec()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapTag {
    pub dim: usize,
    pub name: String,
    pub ncomps: usize,
    pub policy: TransferPolicy,
    pub data: SnapData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshSnapshot {
    pub dim: usize,
    pub parting: Parting,
    pub nverts: usize,
    /// (dimension, entity-to-vertex list), ascending by dimension.
    pub down: Vec<(usize, Vec<Local>)>,
    pub tags: Vec<SnapTag>,
    /// (dimension, owner ranks, owner indices).
    pub owners: Vec<(usize, Vec<u32>, Vec<Local>)>,
    /// (dimension, parent indices, ancestry codes).
    pub parents: Vec<(usize, Vec<Local>, Vec<i8>)>,
}

impl<C: Communicator> Mesh<C> {
    /// Capture all stored state; derived caches are not included.
    pub fn snapshot(&self) -> MeshSnapshot {
        let mut down = Vec::new();
        for dim in 1..=self.dim() {
            if let Ok(adj) = self.get_adj(dim, 0) {
                down.push((dim, adj.ab2b().to_vec()));
            }
        }
        let mut tags = Vec::new();
        for dim in 0..DIMS {
            for i in 0..self.ntags(dim) {
                let t = self.tag_by_index(dim, i).unwrap();
                tags.push(SnapTag {
                    dim,
                    name: t.name().to_string(),
                    ncomps: t.ncomps(),
                    policy: t.policy(),
                    data: t.data().into(),
                });
            }
        }
        let mut owners = Vec::new();
        let mut parents = Vec::new();
        for dim in 0..DIMS {
            if let Some(o) = self.stored_owners(dim) {
                owners.push((dim, o.ranks.to_vec(), o.idxs.to_vec()));
            }
            if let Some(p) = self.stored_parents(dim) {
                parents.push((dim, p.parent_idx.to_vec(), p.codes.to_vec()));
            }
        }
        MeshSnapshot {
            dim: self.dim(),
            parting: self.parting(),
            nverts: self.nverts(),
            down,
            tags,
            owners,
            parents,
        }
    }

    /// Rebuild a mesh from a snapshot over `comm`.
    pub fn from_snapshot(comm: Arc<C>, snap: &MeshSnapshot) -> Result<Self> {
        let mut mesh = Mesh::new(comm, snap.dim, snap.nverts)?;
        for (dim, ab2b) in &snap.down {
            mesh.set_ents(*dim, Adj::from_ab2b(ab2b.clone().into()))?;
        }
        for t in &snap.tags {
            install_tag(&mut mesh, t)?;
        }
        for (dim, ranks, idxs) in &snap.owners {
            mesh.set_owners(*dim, Remotes::new(ranks.clone().into(), idxs.clone().into()))?;
        }
        for (dim, parent_idx, codes) in &snap.parents {
            mesh.set_parents(
                *dim,
                Parents {
                    parent_idx: parent_idx.clone().into(),
                    codes: codes.clone().into(),
                },
            );
        }
        mesh.set_parting_flag(snap.parting);
        Ok(mesh)
    }
}

fn install_tag<C: Communicator>(mesh: &mut Mesh<C>, t: &SnapTag) -> Result<()> {
    match &t.data {
        SnapData::I8(v) => mesh.add_tag(t.dim, &t.name, t.ncomps, t.policy, v.clone().into()),
        SnapData::I32(v) => mesh.add_tag(t.dim, &t.name, t.ncomps, t.policy, v.clone().into()),
        SnapData::I64(v) => mesh.add_tag(t.dim, &t.name, t.ncomps, t.policy, v.clone().into()),
        SnapData::F64(v) => mesh.add_tag(t.dim, &t.name, t.ncomps, t.policy, v.clone().into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build_box;
    use crate::comm::NoComm;

    #[test]
    fn snapshot_roundtrip_equals() {
        let mut m = build_box(Arc::new(NoComm), 2, 2, 1.0, 1.0).unwrap();
        m.add_tag::<f64>(
            2,
            "mass",
            1,
            TransferPolicy::Conserve,
            vec![1.0, 2.0, 3.0, 4.0].into(),
        )
        .unwrap();
        let _ = m.ask_down(2, 1).unwrap(); // populate a derived cache
        let snap = m.snapshot();
        let m2 = Mesh::from_snapshot(Arc::new(NoComm), &snap).unwrap();
        assert!(m2 == m);
    }
}
