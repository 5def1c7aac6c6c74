//! Mesh construction: the box generator and the raw connectivity path.
//!
//! [`build_box`] lays out an `nx` by `ny` quad grid, partitions its cells
//! in contiguous blocks across the communicator, and instantiates on each
//! rank the closure of its cells: vertices and edges sorted by global id,
//! canonical global edge orientation, coordinates, global-id tags, level
//! and leaf tags, and ownership records (lowest sharing rank owns; owner
//! indices follow from the deterministic global layout, so construction
//! needs no communication).

use crate::array::{Local, Read};
use crate::comm::Communicator;
use crate::dist::Remotes;
use crate::error::Result;
use crate::graph::Adj;
use crate::mesh::{Mesh, reserved};
use crate::tag::TransferPolicy;
use hashbrown::HashMap;
use itertools::Itertools;
use std::sync::Arc;

/// Wrap raw element connectivity into a mesh; edges and every derived
/// relation come from lazy derivation. The general setter path for format
/// readers and generators.
pub fn build_from_elems2verts<C: Communicator>(
    comm: Arc<C>,
    dim: usize,
    ev2v: Read<Local>,
    nverts: usize,
) -> Result<Mesh<C>> {
    let mut mesh = Mesh::new(comm, dim, nverts)?;
    mesh.set_ents(dim, Adj::from_ab2b(ev2v))?;
    Ok(mesh)
}

struct BoxLayout {
    nx: usize,
    ny: usize,
    size: usize,
}

impl BoxLayout {
    fn nverts(&self) -> usize {
        (self.nx + 1) * (self.ny + 1)
    }
    fn ncells(&self) -> usize {
        self.nx * self.ny
    }
    fn nh(&self) -> usize {
        self.nx * (self.ny + 1)
    }
    fn vert(&self, i: usize, j: usize) -> u64 {
        (j * (self.nx + 1) + i) as u64
    }
    fn hedge(&self, i: usize, j: usize) -> u64 {
        (j * self.nx + i) as u64
    }
    fn vedge(&self, i: usize, j: usize) -> u64 {
        (self.nh() + j * (self.nx + 1) + i) as u64
    }
    fn cell_rank(&self, gid: u64) -> usize {
        let chunk = self.ncells().div_ceil(self.size).max(1);
        (gid as usize / chunk).min(self.size - 1)
    }
    fn cell_verts(&self, gid: u64) -> [u64; 4] {
        let (i, j) = ((gid as usize) % self.nx, (gid as usize) / self.nx);
        [
            self.vert(i, j),
            self.vert(i + 1, j),
            self.vert(i + 1, j + 1),
            self.vert(i, j + 1),
        ]
    }
    /// Template order: bottom, right, top, left.
    fn cell_edges(&self, gid: u64) -> [u64; 4] {
        let (i, j) = ((gid as usize) % self.nx, (gid as usize) / self.nx);
        [
            self.hedge(i, j),
            self.vedge(i + 1, j),
            self.hedge(i, j + 1),
            self.vedge(i, j),
        ]
    }
    /// Canonical global orientation: left-to-right, bottom-to-top.
    fn edge_verts(&self, gid: u64) -> [u64; 2] {
        let g = gid as usize;
        if g < self.nh() {
            let (i, j) = (g % self.nx, g / self.nx);
            [self.vert(i, j), self.vert(i + 1, j)]
        } else {
            let g = g - self.nh();
            let (i, j) = (g % (self.nx + 1), g / (self.nx + 1));
            [self.vert(i, j), self.vert(i, j + 1)]
        }
    }
    fn vert_owner(&self, gid: u64) -> usize {
        let (i, j) = ((gid as usize) % (self.nx + 1), (gid as usize) / (self.nx + 1));
        let mut owner = self.size;
        for cj in j.saturating_sub(1)..=j.min(self.ny - 1) {
            for ci in i.saturating_sub(1)..=i.min(self.nx - 1) {
                owner = owner.min(self.cell_rank((cj * self.nx + ci) as u64));
            }
        }
        owner
    }
    fn edge_owner(&self, gid: u64) -> usize {
        let g = gid as usize;
        let mut owner = self.size;
        if g < self.nh() {
            let (i, j) = (g % self.nx, g / self.nx);
            if j > 0 {
                owner = owner.min(self.cell_rank(((j - 1) * self.nx + i) as u64));
            }
            if j < self.ny {
                owner = owner.min(self.cell_rank((j * self.nx + i) as u64));
            }
        } else {
            let g = g - self.nh();
            let (i, j) = (g % (self.nx + 1), g / (self.nx + 1));
            if i > 0 {
                owner = owner.min(self.cell_rank((j * self.nx + i - 1) as u64));
            }
            if i < self.nx {
                owner = owner.min(self.cell_rank((j * self.nx + i) as u64));
            }
        }
        owner
    }
    /// Sorted closure (vert gids, edge gids, cell gids) of one rank.
    fn closure(&self, rank: usize) -> (Vec<u64>, Vec<u64>, Vec<u64>) {
        let cells: Vec<u64> = (0..self.ncells() as u64)
            .filter(|&c| self.cell_rank(c) == rank)
            .collect();
        let verts: Vec<u64> = cells
            .iter()
            .flat_map(|&c| self.cell_verts(c))
            .sorted_unstable()
            .dedup()
            .collect();
        let edges: Vec<u64> = cells
            .iter()
            .flat_map(|&c| self.cell_edges(c))
            .sorted_unstable()
            .dedup()
            .collect();
        (verts, edges, cells)
    }
}

/// Build a 2-D `nx` by `ny` quad box of extent `lx` by `ly`, partitioned
/// in contiguous cell blocks over `comm`.
pub fn build_box<C: Communicator>(
    comm: Arc<C>,
    nx: usize,
    ny: usize,
    lx: f64,
    ly: f64,
) -> Result<Mesh<C>> {
    let layout = BoxLayout {
        nx,
        ny,
        size: comm.size(),
    };
    let rank = comm.rank();
    let (verts, edges, cells) = layout.closure(rank);
    let vert_idx: HashMap<u64, Local> = verts
        .iter()
        .enumerate()
        .map(|(i, &g)| (g, i as Local))
        .collect();

    let mut ev = Vec::with_capacity(edges.len() * 2);
    for &e in &edges {
        for g in layout.edge_verts(e) {
            ev.push(vert_idx[&g]);
        }
    }
    let mut cv = Vec::with_capacity(cells.len() * 4);
    for &c in &cells {
        for g in layout.cell_verts(c) {
            cv.push(vert_idx[&g]);
        }
    }

    let mut mesh = Mesh::new(comm.clone(), 2, verts.len())?;
    mesh.set_ents(1, Adj::from_ab2b(ev.into()))?;
    mesh.set_ents(2, Adj::from_ab2b(cv.into()))?;

    let coords: Vec<f64> = verts
        .iter()
        .flat_map(|&g| {
            let (i, j) = ((g as usize) % (nx + 1), (g as usize) / (nx + 1));
            [i as f64 * lx / nx as f64, j as f64 * ly / ny as f64]
        })
        .collect();
    mesh.add_coords(coords.into())?;

    for (dim, gids) in [(0, &verts), (1, &edges), (2, &cells)] {
        let g: Vec<i64> = gids.iter().map(|&x| x as i64).collect();
        mesh.add_tag(dim, reserved::GLOBAL, 1, TransferPolicy::Inherit, g.into())?;
        mesh.add_tag(
            dim,
            reserved::LEVEL,
            1,
            TransferPolicy::Inherit,
            vec![0i8; gids.len()].into(),
        )?;
        if dim > 0 {
            mesh.add_tag(
                dim,
                reserved::LEAF,
                1,
                TransferPolicy::Inherit,
                vec![1i8; gids.len()].into(),
            )?;
        }
    }

    // Owner-local indices follow from the owner's deterministic closure.
    let mut closures: HashMap<usize, (Vec<u64>, Vec<u64>, Vec<u64>)> = HashMap::new();
    closures.insert(rank, (verts.clone(), edges.clone(), cells.clone()));
    let mut owner_idx = |owner: usize, dim: usize, gid: u64| -> Local {
        let entry = closures
            .entry(owner)
            .or_insert_with(|| layout.closure(owner));
        let list = match dim {
            0 => &entry.0,
            1 => &entry.1,
            _ => &entry.2,
        };
        list.binary_search(&gid).expect("owner closure misses its entity") as Local
    };
    let vowners = Remotes::new(
        verts.iter().map(|&g| layout.vert_owner(g) as u32).collect::<Vec<_>>().into(),
        verts
            .iter()
            .map(|&g| owner_idx(layout.vert_owner(g), 0, g))
            .collect::<Vec<_>>()
            .into(),
    );
    let eowners = Remotes::new(
        edges.iter().map(|&g| layout.edge_owner(g) as u32).collect::<Vec<_>>().into(),
        edges
            .iter()
            .map(|&g| owner_idx(layout.edge_owner(g), 1, g))
            .collect::<Vec<_>>()
            .into(),
    );
    let cowners = Remotes::new(
        vec![rank as u32; cells.len()].into(),
        (0..cells.len() as Local).collect::<Vec<_>>().into(),
    );
    mesh.set_owners(0, vowners)?;
    mesh.set_owners(1, eowners)?;
    mesh.set_owners(2, cowners)?;
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;

    #[test]
    fn serial_box_counts() {
        let m = build_box(Arc::new(NoComm), 2, 1, 1.0, 1.0).unwrap();
        assert_eq!(m.nverts(), 6);
        assert_eq!(m.nents(1), 7);
        assert_eq!(m.nelems(), 2);
        assert_eq!(m.coords().unwrap().len(), 12);
    }

    #[test]
    fn serial_box_is_self_owned() {
        let mut m = build_box(Arc::new(NoComm), 3, 2, 3.0, 2.0).unwrap();
        for dim in 0..=2 {
            let owned = m.owned(dim).unwrap();
            assert!(owned.iter().all(|&o| o == 1), "dim {dim}");
        }
        assert_eq!(m.nglobal_ents(2).unwrap(), 6);
    }

    #[test]
    fn box_coordinates_span_extent() {
        let m = build_box(Arc::new(NoComm), 2, 2, 4.0, 2.0).unwrap();
        let coords = m.coords().unwrap();
        let xs: Vec<f64> = coords.chunks(2).map(|c| c[0]).collect();
        let ys: Vec<f64> = coords.chunks(2).map(|c| c[1]).collect();
        assert_eq!(xs.iter().cloned().fold(f64::MIN, f64::max), 4.0);
        assert_eq!(ys.iter().cloned().fold(f64::MIN, f64::max), 2.0);
    }

    #[test]
    fn raw_connectivity_path() {
        let m = build_from_elems2verts(
            Arc::new(NoComm),
            2,
            vec![0, 1, 4, 3, 1, 2, 5, 4].into(),
            6,
        )
        .unwrap();
        assert_eq!(m.nelems(), 2);
    }
}
