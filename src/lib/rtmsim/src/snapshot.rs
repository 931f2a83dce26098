//! A4: snapshot model and writer (section 6 / Design Note "Magic
//! classification codes").
//!
//! A `Snapshot` is the only thing this crate ever writes to disk. Its
//! layout is deliberately flat and `serde_json`-friendly, mirroring the way
//! the teacher re-exports its whole cell-state vector to the caller
//! (`get_grid_state`/`get_well_state` in `lib.rs`) rather than building a
//! bespoke binary format. The output-only `gamma_hat` field -- `-1` for
//! inlet cells, `-2` for outlet cells, else `gamma` -- is computed only
//! here; `CellState` in `solver.rs` never stores it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::flux::CellState;
use crate::geometry::GeometryMesh;
use crate::mesh::CellClass;

/// Output-only fill-fraction encoding for downstream visualization
/// (section 3): inlet cells report `-1`, outlet cells report `-2`, every
/// other cell reports its true `gamma`.
fn gamma_hat(class: CellClass, gamma: f64) -> f64 {
    match class {
        CellClass::PressureInlet => -1.0,
        CellClass::PressureOutlet => -2.0,
        CellClass::Interior | CellClass::Wall => gamma,
    }
}

/// One scheduled output of the solver (section 6's "Snapshot layout").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    /// Simulation time at which this snapshot was taken [s].
    pub t: f64,
    /// Ordinal number of this snapshot (0, 1, 2, ...).
    pub n_out: u64,
    /// Cell count, carried alongside the arrays for self-describing output.
    pub n_cells: usize,

    pub rho: Vec<f64>,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub p: Vec<f64>,
    pub gamma: Vec<f64>,
    pub gamma_hat: Vec<f64>,

    /// Node positions, `(x, y, z)` per node, in declaration order.
    pub node_positions: Vec<(f64, f64, f64)>,
    /// Each cell's canonical node-index triple, indexing `node_positions`.
    pub cell_node_ids: Vec<[usize; 3]>,
}

impl Snapshot {
    /// Builds a snapshot from the mesh (immutable) and the current cell
    /// state (mutable, owned by `solver::Solver`).
    pub fn capture(mesh: &GeometryMesh, states: &[CellState], t: f64, n_out: u64) -> Self {
        let n_cells = mesh.cells.len();
        let mut rho = Vec::with_capacity(n_cells);
        let mut u = Vec::with_capacity(n_cells);
        let mut v = Vec::with_capacity(n_cells);
        let mut p = Vec::with_capacity(n_cells);
        let mut gamma = Vec::with_capacity(n_cells);
        let mut gamma_hat_vals = Vec::with_capacity(n_cells);

        for (cell, state) in mesh.cells.iter().zip(states.iter()) {
            rho.push(state.rho);
            u.push(state.u);
            v.push(state.v);
            p.push(state.p);
            gamma.push(state.gamma);
            gamma_hat_vals.push(gamma_hat(cell.class, state.gamma));
        }

        let node_positions = mesh
            .nodes
            .iter()
            .map(|n| (n.position.x, n.position.y, n.position.z))
            .collect();
        let cell_node_ids = mesh.cells.iter().map(|c| c.nodes).collect();

        Snapshot {
            t,
            n_out,
            n_cells,
            rho,
            u,
            v,
            p,
            gamma,
            gamma_hat: gamma_hat_vals,
            node_positions,
            cell_node_ids,
        }
    }

    /// Writes this snapshot to two files: a numbered one
    /// (`snapshot_<n_out>.json`) and the canonical latest-results file
    /// (`results.json`). Both writes are fatal on failure (section 7:
    /// "Snapshot I/O failures are surfaced and terminate the run").
    pub fn write(&self, dir: &Path) -> Result<(), SimError> {
        std::fs::create_dir_all(dir)?;
        let body = serde_json::to_vec_pretty(self)?;

        let numbered = dir.join(format!("snapshot_{}.json", self.n_out));
        std::fs::write(&numbered, &body)?;

        let canonical = dir.join("results.json");
        std::fs::write(&canonical, &body)?;

        log::info!(
            "wrote snapshot {} at t={:.4} ({} cells) to {}",
            self.n_out,
            self.t,
            self.n_cells,
            dir.display()
        );
        Ok(())
    }

    /// Loads a snapshot back from disk, for restart.
    pub fn load(path: &PathBuf) -> Result<Self, SimError> {
        let body = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SimError::MeshMissing { path: path.display().to_string() }
            } else {
                SimError::SnapshotIo(e)
            }
        })?;
        let snapshot: Snapshot = serde_json::from_slice(&body)?;
        Ok(snapshot)
    }
}
