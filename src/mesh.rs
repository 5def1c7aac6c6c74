//! Distributed mesh: per-dimension entities, tags, cached adjacencies,
//! ownership, and ghost synchronization.
//!
//! A mesh stores, per topological dimension, the entity count, a set of
//! named [`Tag`]s, a matrix of cached adjacencies, ownership records for
//! shared entities, and a cached [`Dist`] used to move per-entity data
//! between ranks. Down-adjacencies enter through [`Mesh::set_ents`]; every
//! other relation is derived lazily and cached. Any entity-count change for
//! a dimension must go through [`Mesh::invalidate_dim`], which clears all
//! cached state keyed to the old numbering — invalidation is explicit,
//! never a side effect of reads.

use crate::array::{Global, INVALID_LOCAL, Local, Read};
use crate::comm::{CommScalar, Communicator, ReduceOp};
use crate::derive::{derive_edges_from_cells, find_matches, invert_adj, transit};
use crate::dist::{Dist, Remotes};
use crate::error::{MeshError, Result};
use crate::graph::{Adj, Graph, code_is_flipped, make_orient_code};
use crate::hypercube::{MAX_DIM, QUAD_EDGE_VERTS, hypercube_verts_per_cell};
use crate::tag::{Tag, TagData, TagValue, TransferPolicy};
use std::sync::Arc;

/// Number of representable dimensions (0 through [`MAX_DIM`]).
pub const DIMS: usize = MAX_DIM + 1;

/// Reserved tag names managed by the library.
pub mod reserved {
    /// Vertex coordinates, `ncomps == mesh.dim()`, linear transfer.
    pub const COORDS: &str = "coordinates";
    /// Global entity identifiers, one `i64` per entity.
    pub const GLOBAL: &str = "global";
    /// Refinement depth, one `i8` per entity.
    pub const LEVEL: &str = "level";
    /// 1 for leaves, 0 for refined (parent) entities.
    pub const LEAF: &str = "leaf";
    /// Per-dimension refinement marks, present only during a refine call.
    pub(crate) const REFINE: &str = "refine";
    /// Canonical global ordering of marked entities, present only during
    /// a refine call.
    pub(crate) const AMR_ORDER: &str = "amr_order";
}

/// Partition style of a mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Parting {
    /// Each element lives on exactly one rank; only the closure of the
    /// element set is shared at partition boundaries.
    ElemBased,
    /// One layer of halo elements is replicated from neighboring ranks.
    Ghosted,
}

impl Parting {
    pub fn name(self) -> &'static str {
        match self {
            Parting::ElemBased => "element-based",
            Parting::Ghosted => "ghosted",
        }
    }
}

/// Refinement ancestry: for each entity, the local index of its parent and
/// a packed (which-child, parent-dimension) code.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parents {
    pub parent_idx: Read<Local>,
    pub codes: Read<i8>,
}

/// A distributed mesh over communicator `C`.
pub struct Mesh<C: Communicator> {
    comm: Arc<C>,
    dim: usize,
    parting: Parting,
    nents: [usize; DIMS],
    ents_set: [bool; DIMS],
    tags: [Vec<Tag>; DIMS],
    adjs: [[Option<Adj>; DIMS]; DIMS],
    stars: [Option<Graph>; DIMS],
    owners: [Option<Remotes>; DIMS],
    dists: [Option<Arc<Dist<C>>>; DIMS],
    parents: [Option<Parents>; DIMS],
}

impl<C: Communicator> Mesh<C> {
    /// A mesh with its dimension and vertex count fixed; entities of higher
    /// dimensions enter through [`Mesh::set_ents`].
    pub fn new(comm: Arc<C>, dim: usize, nverts: usize) -> Result<Self> {
        if dim == 0 || dim > MAX_DIM {
            return Err(MeshError::DimOutOfRange { dim, mesh_dim: MAX_DIM });
        }
        let mut nents = [0; DIMS];
        let mut ents_set = [false; DIMS];
        nents[0] = nverts;
        ents_set[0] = true;
        Ok(Self {
            comm,
            dim,
            parting: Parting::ElemBased,
            nents,
            ents_set,
            tags: std::array::from_fn(|_| Vec::new()),
            adjs: std::array::from_fn(|_| std::array::from_fn(|_| None)),
            stars: std::array::from_fn(|_| None),
            owners: std::array::from_fn(|_| None),
            dists: std::array::from_fn(|_| None),
            parents: std::array::from_fn(|_| None),
        })
    }

    pub fn comm(&self) -> &Arc<C> {
        &self.comm
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn parting(&self) -> Parting {
        self.parting
    }

    pub(crate) fn set_parting_flag(&mut self, parting: Parting) {
        self.parting = parting;
    }

    fn check_dim(&self, dim: usize) -> Result<()> {
        if dim > self.dim {
            return Err(MeshError::DimOutOfRange {
                dim,
                mesh_dim: self.dim,
            });
        }
        Ok(())
    }

    pub fn has_ents(&self, dim: usize) -> bool {
        dim < DIMS && self.ents_set[dim]
    }

    /// Entity count for `dim`; zero when the dimension has not been set.
    pub fn nents(&self, dim: usize) -> usize {
        self.nents[dim]
    }

    pub fn nelems(&self) -> usize {
        self.nents[self.dim]
    }

    pub fn nverts(&self) -> usize {
        self.nents[0]
    }

    /// Clear every cached structure keyed to dimension `dim`'s numbering:
    /// the adjacency row and column, the star graph, the distribution, and
    /// the ancestry record. Must be called on any entity-count change.
    pub fn invalidate_dim(&mut self, dim: usize) {
        for other in 0..DIMS {
            self.adjs[dim][other] = None;
            self.adjs[other][dim] = None;
            self.stars[other] = None;
        }
        self.stars[dim] = None;
        self.dists[dim] = None;
        self.parents[dim] = None;
    }

    /// Change the vertex count during a migration; invalidates dimension 0.
    pub(crate) fn resize_verts(&mut self, nverts: usize) {
        self.invalidate_dim(0);
        self.nents[0] = nverts;
    }

    /// Install entities of dimension `dim` together with their
    /// down-adjacency to vertices (fixed arity for the hypercube family).
    pub fn set_ents(&mut self, dim: usize, down: Adj) -> Result<()> {
        self.check_dim(dim)?;
        if dim == 0 {
            return Err(MeshError::DimOutOfRange {
                dim: 0,
                mesh_dim: self.dim,
            });
        }
        let arity = hypercube_verts_per_cell(dim);
        let len = down.ab2b().len();
        if len % arity != 0 {
            return Err(MeshError::LengthMismatch {
                expected: (len / arity + 1) * arity,
                found: len,
            });
        }
        for &v in down.ab2b().iter() {
            if v as usize >= self.nents[0] {
                return Err(MeshError::DistIndexOutOfRange {
                    idx: v as usize,
                    nroots: self.nents[0],
                });
            }
        }
        self.invalidate_dim(dim);
        self.nents[dim] = len / arity;
        self.ents_set[dim] = true;
        self.adjs[dim][0] = Some(down);
        // keep tags only if their length still matches
        let nents = self.nents[dim];
        self.tags[dim].retain(|t| t.data().len() == nents * t.ncomps());
        Ok(())
    }

    // ---- tags ------------------------------------------------------------

    fn tag_index(&self, dim: usize, name: &str) -> Option<usize> {
        self.tags[dim].iter().position(|t| t.name() == name)
    }

    pub fn has_tag(&self, dim: usize, name: &str) -> bool {
        dim < DIMS && self.tag_index(dim, name).is_some()
    }

    pub fn ntags(&self, dim: usize) -> usize {
        self.tags[dim].len()
    }

    /// Tag by insertion index, for ordered iteration.
    pub fn tag_by_index(&self, dim: usize, i: usize) -> Option<&Tag> {
        self.tags[dim].get(i)
    }

    pub fn get_tag(&self, dim: usize, name: &str) -> Result<&Tag> {
        self.check_dim(dim)?;
        self.tag_index(dim, name)
            .map(|i| &self.tags[dim][i])
            .ok_or_else(|| MeshError::MissingTag(name.to_string(), dim))
    }

    /// Attach a new tag. The data length must equal `nents(dim) * ncomps`.
    pub fn add_tag<T: TagValue>(
        &mut self,
        dim: usize,
        name: &str,
        ncomps: usize,
        policy: TransferPolicy,
        data: Read<T>,
    ) -> Result<()> {
        self.check_dim(dim)?;
        if self.has_tag(dim, name) {
            return Err(MeshError::DuplicateTag(name.to_string(), dim));
        }
        if data.len() != self.nents[dim] * ncomps {
            return Err(MeshError::LengthMismatch {
                expected: self.nents[dim] * ncomps,
                found: data.len(),
            });
        }
        self.tags[dim].push(Tag::new(name, ncomps, policy, data));
        Ok(())
    }

    /// Replace an existing tag's backing array (same type, same length).
    pub fn set_tag<T: TagValue>(&mut self, dim: usize, name: &str, data: Read<T>) -> Result<()> {
        self.check_dim(dim)?;
        let i = self
            .tag_index(dim, name)
            .ok_or_else(|| MeshError::MissingTag(name.to_string(), dim))?;
        self.tags[dim][i].set_array(data)
    }

    /// Add the tag, or replace it wholesale when it already exists.
    pub(crate) fn put_tag<T: TagValue>(
        &mut self,
        dim: usize,
        name: &str,
        ncomps: usize,
        policy: TransferPolicy,
        data: Read<T>,
    ) -> Result<()> {
        if let Some(i) = self.tag_index(dim, name) {
            if data.len() != self.nents[dim] * ncomps {
                return Err(MeshError::LengthMismatch {
                    expected: self.nents[dim] * ncomps,
                    found: data.len(),
                });
            }
            self.tags[dim][i] = Tag::new(name, ncomps, policy, data);
            Ok(())
        } else {
            self.add_tag(dim, name, ncomps, policy, data)
        }
    }

    pub fn remove_tag(&mut self, dim: usize, name: &str) -> Result<()> {
        self.check_dim(dim)?;
        let i = self
            .tag_index(dim, name)
            .ok_or_else(|| MeshError::MissingTag(name.to_string(), dim))?;
        self.tags[dim].remove(i);
        Ok(())
    }

    /// Typed view of a tag's backing array.
    pub fn get_array<T: TagValue>(&self, dim: usize, name: &str) -> Result<Read<T>> {
        Ok(self.get_tag(dim, name)?.array::<T>()?.clone())
    }

    // ---- coordinates and globals ----------------------------------------

    /// Attach vertex coordinates (`ncomps == dim`, linear transfer).
    pub fn add_coords(&mut self, coords: Read<f64>) -> Result<()> {
        let dim = self.dim;
        self.add_tag(0, reserved::COORDS, dim, TransferPolicy::Linear, coords)
    }

    pub fn coords(&self) -> Result<Read<f64>> {
        self.get_array::<f64>(0, reserved::COORDS)
    }

    pub fn set_coords(&mut self, coords: Read<f64>) -> Result<()> {
        self.set_tag(0, reserved::COORDS, coords)
    }

    /// Global identifiers for dimension `dim`, assigning them (owned-count
    /// exclusive scan, then a sync to ghost copies) when absent.
    pub fn ask_globals(&mut self, dim: usize) -> Result<Read<i64>> {
        self.check_dim(dim)?;
        if self.has_tag(dim, reserved::GLOBAL) {
            return self.get_array::<i64>(dim, reserved::GLOBAL);
        }
        let n = self.nents[dim];
        let globals: Read<i64> = if self.comm.size() == 1 {
            (0..n as i64).collect::<Vec<_>>().into()
        } else {
            let owned = self.owned(dim)?;
            let nowned = owned.iter().filter(|&&o| o != 0).count() as i64;
            let offset = self.comm.exscan(nowned, ReduceOp::Sum)?;
            let mut next = offset;
            let vals: Vec<i64> = owned
                .iter()
                .map(|&o| {
                    if o != 0 {
                        let g = next;
                        next += 1;
                        g
                    } else {
                        -1
                    }
                })
                .collect();
            self.sync_array::<i64>(dim, &vals.into(), 1)?
        };
        self.put_tag(dim, reserved::GLOBAL, 1, TransferPolicy::Inherit, globals.clone())?;
        Ok(globals)
    }

    /// Forget all assigned global identifiers.
    pub fn reset_globals(&mut self) {
        for dim in 0..DIMS {
            let _ = self.remove_tag(dim, reserved::GLOBAL);
        }
    }

    /// Total entity count of dimension `dim` across all ranks.
    pub fn nglobal_ents(&mut self, dim: usize) -> Result<Global> {
        self.check_dim(dim)?;
        let owned = self.owned(dim)?;
        let nowned = owned.iter().filter(|&&o| o != 0).count() as i64;
        Ok(self.comm.allreduce(nowned, ReduceOp::Sum)? as Global)
    }

    // ---- ownership and distributions ------------------------------------

    /// Install ownership records for dimension `dim`.
    pub fn set_owners(&mut self, dim: usize, owners: Remotes) -> Result<()> {
        self.check_dim(dim)?;
        if owners.len() != self.nents[dim] {
            return Err(MeshError::LengthMismatch {
                expected: self.nents[dim],
                found: owners.len(),
            });
        }
        self.owners[dim] = Some(owners);
        self.dists[dim] = None;
        Ok(())
    }

    /// Ownership records, defaulting to self-owned when never set.
    pub fn ask_owners(&mut self, dim: usize) -> Result<Remotes> {
        self.check_dim(dim)?;
        if self.owners[dim].is_none() {
            let rank = self.comm.rank() as u32;
            let n = self.nents[dim];
            self.owners[dim] = Some(Remotes::new(
                vec![rank; n].into(),
                (0..n as Local).collect::<Vec<_>>().into(),
            ));
        }
        Ok(self.owners[dim].clone().unwrap())
    }

    /// 1 where this rank owns the entity, 0 for ghost copies.
    pub fn owned(&mut self, dim: usize) -> Result<Read<i8>> {
        let rank = self.comm.rank() as u32;
        let owners = self.ask_owners(dim)?;
        Ok(owners
            .ranks
            .iter()
            .map(|&r| (r == rank) as i8)
            .collect::<Vec<_>>()
            .into())
    }

    /// The cached distribution mapping each local entity to its owner.
    pub fn ask_dist(&mut self, dim: usize) -> Result<Arc<Dist<C>>> {
        self.check_dim(dim)?;
        if let Some(d) = &self.dists[dim] {
            return Ok(d.clone());
        }
        let owners = self.ask_owners(dim)?;
        let dist = Arc::new(Dist::new(self.comm.clone(), &owners, self.nents[dim])?);
        self.dists[dim] = Some(dist.clone());
        Ok(dist)
    }

    /// Push owned values to every ghost copy; owners always win, ghosts
    /// never originate data.
    pub fn sync_array<T: CommScalar>(
        &mut self,
        dim: usize,
        a: &Read<T>,
        width: usize,
    ) -> Result<Read<T>> {
        self.check_dim(dim)?;
        if a.len() != self.nents[dim] * width {
            return Err(MeshError::LengthMismatch {
                expected: self.nents[dim] * width,
                found: a.len(),
            });
        }
        if self.comm.size() == 1 {
            return Ok(a.clone());
        }
        let dist = self.ask_dist(dim)?;
        dist.invert().exch(a, width)
    }

    /// Combine ghost-held partial contributions at the owner with `op`.
    /// Only owned entries are authoritative afterwards; follow with
    /// [`Mesh::sync_array`] when ghosts need the combined value.
    pub fn reduce_array<T: CommScalar>(
        &mut self,
        dim: usize,
        a: &Read<T>,
        width: usize,
        op: ReduceOp,
    ) -> Result<Read<T>> {
        self.check_dim(dim)?;
        if a.len() != self.nents[dim] * width {
            return Err(MeshError::LengthMismatch {
                expected: self.nents[dim] * width,
                found: a.len(),
            });
        }
        if self.comm.size() == 1 {
            return Ok(a.clone());
        }
        let dist = self.ask_dist(dim)?;
        dist.exch_reduce(a, width, op)
    }

    /// Synchronize a named tag's values from owners to ghosts.
    pub fn sync_tag(&mut self, dim: usize, name: &str) -> Result<()> {
        let tag = self.get_tag(dim, name)?;
        let ncomps = tag.ncomps();
        let data = tag.data().clone();
        let new_data = match data {
            TagData::I8(a) => TagData::I8(self.sync_array(dim, &a, ncomps)?),
            TagData::I32(a) => TagData::I32(self.sync_array(dim, &a, ncomps)?),
            TagData::I64(a) => TagData::I64(self.sync_array(dim, &a, ncomps)?),
            TagData::F64(a) => TagData::F64(self.sync_array(dim, &a, ncomps)?),
        };
        let i = self.tag_index(dim, name).unwrap();
        self.tags[dim][i].replace_data(new_data);
        Ok(())
    }

    /// Reduce a named tag's ghost contributions to the owner with `op`,
    /// then synchronize the combined value back to every copy.
    pub fn reduce_tag(&mut self, dim: usize, name: &str, op: ReduceOp) -> Result<()> {
        let tag = self.get_tag(dim, name)?;
        let ncomps = tag.ncomps();
        let data = tag.data().clone();
        let new_data = match data {
            TagData::I8(a) => {
                let r = self.reduce_array(dim, &a, ncomps, op)?;
                TagData::I8(self.sync_array(dim, &r, ncomps)?)
            }
            TagData::I32(a) => {
                let r = self.reduce_array(dim, &a, ncomps, op)?;
                TagData::I32(self.sync_array(dim, &r, ncomps)?)
            }
            TagData::I64(a) => {
                let r = self.reduce_array(dim, &a, ncomps, op)?;
                TagData::I64(self.sync_array(dim, &r, ncomps)?)
            }
            TagData::F64(a) => {
                let r = self.reduce_array(dim, &a, ncomps, op)?;
                TagData::F64(self.sync_array(dim, &r, ncomps)?)
            }
        };
        let i = self.tag_index(dim, name).unwrap();
        self.tags[dim][i].replace_data(new_data);
        Ok(())
    }

    // ---- adjacency -------------------------------------------------------

    pub fn has_adj(&self, from: usize, to: usize) -> bool {
        from < DIMS && to < DIMS && self.adjs[from][to].is_some()
    }

    pub fn get_adj(&self, from: usize, to: usize) -> Result<Adj> {
        self.adjs[from][to]
            .clone()
            .ok_or(MeshError::NoDerivationPath { from, to })
    }

    /// Downward adjacency `from -> to` (`from > to`), derived and cached.
    pub fn ask_down(&mut self, from: usize, to: usize) -> Result<Adj> {
        self.check_dim(from)?;
        if from <= to {
            return Err(MeshError::NoDerivationPath { from, to });
        }
        self.ask_adj(from, to)
    }

    /// Upward adjacency `from -> to` (`from < to`), derived and cached.
    pub fn ask_up(&mut self, from: usize, to: usize) -> Result<Adj> {
        self.check_dim(to)?;
        if from >= to {
            return Err(MeshError::NoDerivationPath { from, to });
        }
        self.ask_adj(from, to)
    }

    /// Vertex list of dimension-`dim` entities (fixed arity).
    pub fn ask_verts_of(&mut self, dim: usize) -> Result<Read<Local>> {
        if dim == 0 {
            return Ok((0..self.nents[0] as Local).collect::<Vec<_>>().into());
        }
        Ok(self.ask_down(dim, 0)?.ab2b().clone())
    }

    fn ask_adj(&mut self, from: usize, to: usize) -> Result<Adj> {
        if let Some(a) = &self.adjs[from][to] {
            return Ok(a.clone());
        }
        let a = self.derive_adj(from, to)?;
        self.adjs[from][to] = Some(a.clone());
        Ok(a)
    }

    fn derive_adj(&mut self, from: usize, to: usize) -> Result<Adj> {
        if from > to {
            match (from, to) {
                (1, 0) => {
                    // edges were never set; enumerate them from the cells
                    if self.dim < 2 || !self.ents_set[2] {
                        return Err(MeshError::EntsNotSet(1));
                    }
                    let cv = self.ask_adj(2, 0)?;
                    let ev = derive_edges_from_cells(cv.ab2b());
                    self.nents[1] = ev.len() / 2;
                    self.ents_set[1] = true;
                    Ok(Adj::from_ab2b(ev))
                }
                (2, 1) => {
                    let cv = self.ask_adj(2, 0)?;
                    let ev = self.ask_adj(1, 0)?;
                    let v2e = self.ask_adj(0, 1)?;
                    let ncells = self.nents[2];
                    let mut uses = Vec::with_capacity(ncells * 8);
                    for c in 0..ncells {
                        for t in &QUAD_EDGE_VERTS {
                            uses.push(cv.ab2b().get(c * 4 + t[0]));
                            uses.push(cv.ab2b().get(c * 4 + t[1]));
                        }
                    }
                    let (c2e, mcodes) = find_matches(2, &uses.into(), ev.ab2b(), &v2e)?;
                    let codes: Vec<u8> = mcodes
                        .iter()
                        .enumerate()
                        .map(|(i, &m)| {
                            make_orient_code((i % 4) as u8, 0, code_is_flipped(m))
                        })
                        .collect();
                    Ok(Adj::with_codes(c2e, codes.into()))
                }
                _ => {
                    if self.ents_set[from] {
                        Err(MeshError::NoDerivationPath { from, to })
                    } else {
                        Err(MeshError::EntsNotSet(from))
                    }
                }
            }
        } else {
            // up: invert the corresponding down relation
            let down = self.ask_adj(to, from)?;
            let deg = if from == 0 {
                hypercube_verts_per_cell(to)
            } else {
                // only (1, 2) remains: quads have 4 edges
                4
            };
            Ok(invert_adj(&down, deg, self.nents[from]))
        }
    }

    /// Neighbors of dimension-`dim` entities through a shared bridge
    /// (edges for vertices, vertices otherwise), deduplicated, self
    /// excluded. Cached until the dimension is invalidated.
    pub fn ask_star(&mut self, dim: usize) -> Result<Graph> {
        self.check_dim(dim)?;
        if let Some(g) = &self.stars[dim] {
            return Ok(g.clone());
        }
        let g = if dim == 0 {
            let up = self.ask_up(0, 1)?;
            let down = self.ask_down(1, 0)?;
            transit(&up, 1, &down, 2, true)
        } else {
            let down = self.ask_down(dim, 0)?;
            let up = self.ask_up(0, dim)?;
            transit(&down, hypercube_verts_per_cell(dim), &up, 1, true)
        };
        self.stars[dim] = Some(g.clone());
        Ok(g)
    }

    /// Element-to-element adjacency through shared faces (edges in 2-D).
    pub fn ask_dual(&mut self) -> Result<Graph> {
        let dim = self.dim;
        if let Some(a) = &self.adjs[dim][dim] {
            return Ok(a.graph.clone());
        }
        let g = if dim >= 2 {
            let down = self.ask_down(dim, dim - 1)?;
            let up = self.ask_up(dim - 1, dim)?;
            transit(&down, 4, &up, 1, true)
        } else {
            let down = self.ask_down(1, 0)?;
            let up = self.ask_up(0, 1)?;
            transit(&down, 2, &up, 1, true)
        };
        self.adjs[dim][dim] = Some(Adj::from_graph(g.clone()));
        Ok(g)
    }

    // ---- refinement ancestry --------------------------------------------

    pub(crate) fn set_parents(&mut self, dim: usize, parents: Parents) {
        self.parents[dim] = Some(parents);
    }

    /// Ownership records as stored, without materializing defaults.
    pub fn stored_owners(&self, dim: usize) -> Option<&Remotes> {
        self.owners[dim].as_ref()
    }

    /// Ancestry records as stored, without materializing defaults.
    pub fn stored_parents(&self, dim: usize) -> Option<&Parents> {
        self.parents[dim].as_ref()
    }

    /// Refinement ancestry for dimension `dim`; entities that were never
    /// created by refinement carry `INVALID_LOCAL` and code 0.
    pub fn ask_parents(&mut self, dim: usize) -> Result<Parents> {
        self.check_dim(dim)?;
        if self.parents[dim].is_none() {
            let n = self.nents[dim];
            self.parents[dim] = Some(Parents {
                parent_idx: vec![INVALID_LOCAL; n].into(),
                codes: vec![0i8; n].into(),
            });
        }
        Ok(self.parents[dim].clone().unwrap())
    }

    // ---- parting ---------------------------------------------------------

    /// Switch the partition style; a real migration when the style changes.
    pub fn set_parting(&mut self, parting: Parting) -> Result<()> {
        if parting == self.parting {
            return Ok(());
        }
        log::debug!(
            "set_parting: {} -> {} on rank {}",
            self.parting.name(),
            parting.name(),
            self.comm.rank()
        );
        match parting {
            Parting::Ghosted => crate::parting::ghost(self),
            Parting::ElemBased => crate::parting::unghost(self),
        }
    }
}

impl<C: Communicator> PartialEq for Mesh<C> {
    /// Structural equality over stored state: dimension, parting, counts,
    /// down-adjacencies, tags, owners, and ancestry. Derived caches are
    /// not compared.
    fn eq(&self, other: &Self) -> bool {
        if self.dim != other.dim || self.parting != other.parting || self.nents != other.nents {
            return false;
        }
        for d in 1..=self.dim {
            if self.adjs[d][0] != other.adjs[d][0] {
                return false;
            }
        }
        self.tags == other.tags && self.owners == other.owners && self.parents == other.parents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;

    fn two_quads() -> Mesh<NoComm> {
        // 2x1 box: verts 0..6, cells (0,1,4,3) and (1,2,5,4)
        //   3--4--5
        //   |  |  |
        //   0--1--2
        let mut m = Mesh::new(Arc::new(NoComm), 2, 6).unwrap();
        m.set_ents(2, Adj::from_ab2b(vec![0, 1, 4, 3, 1, 2, 5, 4].into()))
            .unwrap();
        m
    }

    #[test]
    fn construction_checks_dim() {
        assert!(Mesh::new(Arc::new(NoComm), 0, 1).is_err());
        assert!(Mesh::new(Arc::new(NoComm), 4, 1).is_err());
    }

    #[test]
    fn derives_edges_and_counts() {
        let mut m = two_quads();
        assert_eq!(m.nverts(), 6);
        assert_eq!(m.nelems(), 2);
        let ev = m.ask_verts_of(1).unwrap();
        assert_eq!(ev.len() / 2, 7);
        assert_eq!(m.nents(1), 7);
    }

    #[test]
    fn cells_to_edges_via_matching() {
        let mut m = two_quads();
        let c2e = m.ask_down(2, 1).unwrap();
        assert_eq!(c2e.ab2b().len(), 8);
        // the two cells share exactly one edge
        let row0: Vec<_> = c2e.ab2b().as_slice()[0..4].to_vec();
        let row1: Vec<_> = c2e.ab2b().as_slice()[4..8].to_vec();
        let shared: Vec<_> = row0.iter().filter(|e| row1.contains(e)).collect();
        assert_eq!(shared.len(), 1);
    }

    #[test]
    fn dual_connects_neighbors() {
        let mut m = two_quads();
        let dual = m.ask_dual().unwrap();
        let offs = dual.a2ab.as_slice();
        assert_eq!(&dual.ab2b.as_slice()[offs[0] as usize..offs[1] as usize], &[1]);
        assert_eq!(&dual.ab2b.as_slice()[offs[1] as usize..offs[2] as usize], &[0]);
    }

    #[test]
    fn up_adjacency_covers_star() {
        let mut m = two_quads();
        let v2c = m.ask_up(0, 2).unwrap();
        let offs = v2c.a2ab().as_slice();
        // verts 1 and 4 touch both cells
        assert_eq!(offs[2] - offs[1], 2);
        assert_eq!(offs[5] - offs[4], 2);
    }

    #[test]
    fn adjacency_cache_invalidation() {
        let mut m = two_quads();
        let _ = m.ask_down(2, 1).unwrap();
        assert!(m.has_adj(2, 1));
        m.set_ents(2, Adj::from_ab2b(vec![0, 1, 4, 3].into())).unwrap();
        assert!(!m.has_adj(2, 1));
        assert_eq!(m.nelems(), 1);
    }

    #[test]
    fn tag_lifecycle() {
        let mut m = two_quads();
        m.add_tag::<f64>(2, "density", 1, TransferPolicy::Conserve, vec![1.0, 2.0].into())
            .unwrap();
        assert!(m.has_tag(2, "density"));
        let err = m
            .add_tag::<f64>(2, "density", 1, TransferPolicy::Conserve, vec![0.0; 2].into())
            .unwrap_err();
        assert!(matches!(err, MeshError::DuplicateTag(..)));
        let err = m
            .add_tag::<f64>(2, "short", 1, TransferPolicy::Inherit, vec![0.0].into())
            .unwrap_err();
        assert!(matches!(err, MeshError::LengthMismatch { expected: 2, found: 1 }));
        m.set_tag::<f64>(2, "density", vec![3.0, 4.0].into()).unwrap();
        assert_eq!(m.get_array::<f64>(2, "density").unwrap().as_slice(), &[3.0, 4.0]);
        m.remove_tag(2, "density").unwrap();
        assert!(!m.has_tag(2, "density"));
    }

    #[test]
    fn serial_globals_and_sync() {
        let mut m = two_quads();
        let g = m.ask_globals(2).unwrap();
        assert_eq!(g.as_slice(), &[0, 1]);
        let a: Read<f64> = vec![1.0, 2.0].into();
        let synced = m.sync_array(2, &a, 1).unwrap();
        assert_eq!(synced.as_slice(), a.as_slice());
        assert_eq!(m.nglobal_ents(2).unwrap(), 2);
    }

    #[test]
    fn parents_default_to_invalid() {
        let mut m = two_quads();
        let p = m.ask_parents(2).unwrap();
        assert_eq!(p.parent_idx.as_slice(), &[INVALID_LOCAL; 2]);
        assert_eq!(p.codes.as_slice(), &[0, 0]);
    }
}
