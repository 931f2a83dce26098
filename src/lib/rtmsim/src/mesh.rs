//! C1: mesh assembly. Resolves external node/triangle ids into a dense
//! index space, canonicalizes triangle node order, discovers face adjacency
//! via half-edge keys, classifies wall cells, and resolves patch membership
//! to cell indices.
//!
//! This is the unstructured-mesh analogue of the teacher's `grid.rs`: where
//! the teacher indexes a structured `(i, j, k)` grid, this module builds the
//! same notion of "a cell and its neighbors" from an arbitrary triangulation.

use std::collections::HashMap;

use crate::config::{PatchKind, PatchSpec};
use crate::error::SimError;
use crate::geometry::Vec3;

/// Maximum neighbors a single cell may have before the mesh is considered
/// degenerate (mesh-hygiene guard, not a storage limit -- storage is a flat
/// CSR array built in `geometry.rs`).
pub const MAX_NEIGHBORS_PER_CELL: usize = 10;

/// A node as supplied by the caller, keyed by an external id.
#[derive(Clone, Copy, Debug)]
pub struct RawNode {
    pub external_id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A triangle as supplied by the caller, referencing nodes by external id.
#[derive(Clone, Copy, Debug)]
pub struct RawTriangle {
    pub external_id: u64,
    pub node_ids: [u64; 3],
}

/// A node after external-id resolution. Immutable after load.
#[derive(Clone, Copy, Debug)]
pub struct Node {
    pub external_id: u64,
    pub position: Vec3,
}

/// A cell's class. Set once at assembly/property-assignment time and static
/// for the run (the only dynamic state machine is the run's global phase,
/// tracked by the port facade).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellClass {
    Interior,
    Wall,
    PressureInlet,
    PressureOutlet,
}

/// Topology-only view of a cell: canonical node indices, the geometric
/// center, its class as determined purely from half-edge adjacency (patch
/// overrides are applied later in `properties.rs`), and the list of
/// neighbors discovered by shared edges.
#[derive(Clone, Debug)]
pub struct CellTopology {
    /// Canonical node index triple, ascending by original external id.
    pub nodes: [usize; 3],
    pub center: Vec3,
    pub class: CellClass,
    /// `(neighbor_cell, (a, b))` where `a < b` are the *local node indices*
    /// (indices into `AssembledMesh::nodes`) of the shared edge.
    pub neighbors: Vec<(usize, (usize, usize))>,
}

/// Output of C1: a topologically valid mesh plus resolved patch membership,
/// ready for C2 (local frames) and C3 (property assignment).
#[derive(Clone, Debug)]
pub struct AssembledMesh {
    pub nodes: Vec<Node>,
    pub cells: Vec<CellTopology>,
    /// Resolved patches, in declaration order, as `(kind, cell_indices)`.
    pub patches: Vec<(PatchKind, Vec<usize>)>,
}

fn degenerate(reason: impl Into<String>) -> SimError {
    SimError::MeshDegenerate {
        reason: reason.into(),
    }
}

/// Assembles a mesh from a flat node/triangle list and patch specs keyed by
/// external triangle id.
pub fn assemble(
    nodes: &[RawNode],
    triangles: &[RawTriangle],
    patches: &[PatchSpec],
) -> Result<AssembledMesh, SimError> {
    let mut node_index: HashMap<u64, usize> = HashMap::with_capacity(nodes.len());
    let mut resolved_nodes = Vec::with_capacity(nodes.len());
    for (i, n) in nodes.iter().enumerate() {
        if node_index.insert(n.external_id, i).is_some() {
            return Err(degenerate(format!("duplicate node id {}", n.external_id)));
        }
        resolved_nodes.push(Node {
            external_id: n.external_id,
            position: Vec3::new(n.x, n.y, n.z),
        });
    }

    let mut triangle_index: HashMap<u64, usize> = HashMap::with_capacity(triangles.len());
    let mut canonical_nodes: Vec<[usize; 3]> = Vec::with_capacity(triangles.len());
    let mut seen_triples: HashMap<[usize; 3], u64> = HashMap::with_capacity(triangles.len());

    for (i, tri) in triangles.iter().enumerate() {
        if triangle_index.insert(tri.external_id, i).is_some() {
            return Err(degenerate(format!("duplicate triangle id {}", tri.external_id)));
        }
        let mut local = [0usize; 3];
        for (slot, ext) in local.iter_mut().zip(tri.node_ids.iter()) {
            *slot = *node_index
                .get(ext)
                .ok_or_else(|| degenerate(format!("triangle {} references unknown node {}", tri.external_id, ext)))?;
        }
        // Canonical order: ascending by the *original external id*, matching
        // spec.md's "smallest, middle, largest original id" rule.
        let mut pairs: [(u64, usize); 3] = [
            (tri.node_ids[0], local[0]),
            (tri.node_ids[1], local[1]),
            (tri.node_ids[2], local[2]),
        ];
        pairs.sort_by_key(|(ext, _)| *ext);
        let canonical = [pairs[0].1, pairs[1].1, pairs[2].1];

        if let Some(&dup) = seen_triples.get(&canonical) {
            return Err(degenerate(format!(
                "triangles {} and {} share the same canonical node triple",
                triangles[dup as usize].external_id, tri.external_id
            )));
        }
        seen_triples.insert(canonical, i as u64);
        canonical_nodes.push(canonical);
    }

    // Half-edge grouping: key is (min_node, max_node) in local index space.
    let mut edges: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for (cell_id, n) in canonical_nodes.iter().enumerate() {
        let triples = [(n[0], n[1]), (n[1], n[2]), (n[2], n[0])];
        for (a, b) in triples {
            let key = if a < b { (a, b) } else { (b, a) };
            edges.entry(key).or_default().push(cell_id);
        }
    }

    let mut neighbors: Vec<Vec<(usize, (usize, usize))>> = vec![Vec::new(); canonical_nodes.len()];
    let mut is_wall = vec![false; canonical_nodes.len()];
    for (key, owners) in &edges {
        match owners.len() {
            1 => {
                is_wall[owners[0]] = true;
            }
            2 => {
                neighbors[owners[0]].push((owners[1], *key));
                neighbors[owners[1]].push((owners[0], *key));
            }
            n => {
                return Err(degenerate(format!(
                    "edge ({}, {}) is shared by {} triangles (expected 1 or 2)",
                    key.0, key.1, n
                )));
            }
        }
    }

    for (cell_id, ns) in neighbors.iter().enumerate() {
        if ns.len() > MAX_NEIGHBORS_PER_CELL {
            return Err(degenerate(format!(
                "cell {cell_id} has {} neighbors, exceeding the {MAX_NEIGHBORS_PER_CELL}-neighbor limit",
                ns.len()
            )));
        }
    }

    let mut cells = Vec::with_capacity(canonical_nodes.len());
    for (cell_id, node_triple) in canonical_nodes.iter().enumerate() {
        let p0 = resolved_nodes[node_triple[0]].position;
        let p1 = resolved_nodes[node_triple[1]].position;
        let p2 = resolved_nodes[node_triple[2]].position;
        let edge1 = p1 - p0;
        let edge2 = p2 - p0;
        if edge1.cross(&edge2).norm() <= 0.0 {
            return Err(degenerate(format!("triangle {cell_id} has zero area (collinear nodes)")));
        }
        let center = (p0 + p1 + p2) / 3.0;
        cells.push(CellTopology {
            nodes: *node_triple,
            center,
            class: if is_wall[cell_id] { CellClass::Wall } else { CellClass::Interior },
            neighbors: neighbors[cell_id].clone(),
        });
    }

    let mut resolved_patches = Vec::with_capacity(patches.len());
    for patch in patches {
        let mut cell_ids = Vec::with_capacity(patch.triangle_ids.len());
        for ext in &patch.triangle_ids {
            let idx = *triangle_index.get(ext).ok_or_else(|| {
                SimError::ConfigInvalid {
                    field: "patches[].triangle_ids",
                    message: format!("patch `{}` references unknown triangle {}", patch.name, ext),
                }
            })?;
            cell_ids.push(idx);
        }
        resolved_patches.push((patch.kind.clone(), cell_ids));
    }

    Ok(AssembledMesh {
        nodes: resolved_nodes,
        cells,
        patches: resolved_patches,
    })
}
