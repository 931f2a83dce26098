//! `rtmsim`: a finite-area surface solver for resin impregnation of a thin
//! fibrous preform during Resin Transfer Moulding (section 1).
//!
//! The crate is organized as the pipeline section 2 describes: mesh assembly
//! (C1) -> local frames and flattened-neighbor geometry (C2) -> default/patch
//! property resolution (C3) -> [optional geometric inlet seeding (C7)] ->
//! per-step gradient (C4), flux (C5), and state update (C6) -> the port
//! façade below (C8), which is the crate's single entry point.

pub mod config;
pub mod eos;
pub mod error;
pub mod flux;
pub mod geometry;
pub mod gradient;
pub mod inlet_seed;
pub mod mesh;
pub mod properties;
pub mod snapshot;
pub mod solver;

pub use config::{EosKind, InteractiveMode, MeshSource, PatchKind, PatchSpec, PreformProperties, SolverConfig};
pub use error::{SimError, SimResult};
pub use flux::CellState;
pub use geometry::GeometryMesh;
pub use snapshot::Snapshot;
pub use solver::Solver;

use mesh::{AssembledMesh, RawNode, RawTriangle};

/// The run's global phase, tracked by the façade rather than by individual
/// cells -- cell class is static for the run's lifetime (section 4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Running,
    Snapshotting,
    Terminated,
}

/// A validated, mesh-bound simulation ready to step or run to completion.
/// This is the RTM analogue of the teacher's `ReservoirSimulator`: one
/// struct owning the solver and exposing `step`/`run_to_completion`, minus
/// the `#[wasm_bindgen]` boundary (section 1 scopes the UI out).
pub struct SimulationHandle {
    phase: RunPhase,
    solver: Solver,
    t_max: f64,
}

impl SimulationHandle {
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    /// Advances the simulation by one step. Transitions `Init`/`Running` ->
    /// `Snapshotting` -> `Running` around a step that emits a snapshot, and
    /// to `Terminated` once `t > t_max`.
    pub fn step(&mut self) -> SimResult<Option<Snapshot>> {
        if self.phase == RunPhase::Terminated {
            return Ok(None);
        }
        let snapshot = self.solver.step(self.t_max)?;
        self.phase = if snapshot.is_some() { RunPhase::Snapshotting } else { RunPhase::Running };
        if self.solver.time() > self.t_max {
            self.phase = RunPhase::Terminated;
        }
        Ok(snapshot)
    }

    /// Runs to `t > t_max`, returning every snapshot emitted along the way.
    pub fn run_to_completion(&mut self) -> SimResult<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        while self.phase != RunPhase::Terminated {
            if let Some(snapshot) = self.step()? {
                snapshots.push(snapshot);
            }
        }
        log::info!(
            "run terminated at t={:.4} after {} snapshots",
            self.solver.time(),
            snapshots.len()
        );
        Ok(snapshots)
    }
}

/// Resolves C1's topology plus, for a restart, the snapshot to seed state
/// from.
fn assemble_topology(
    nodes: &[RawNode],
    triangles: &[RawTriangle],
    patches: &[config::PatchSpec],
) -> SimResult<AssembledMesh> {
    let topology = mesh::assemble(nodes, triangles, patches)?;
    log::info!(
        "assembled mesh: {} nodes, {} cells, {} patches",
        topology.nodes.len(),
        topology.cells.len(),
        topology.patches.len()
    );
    Ok(topology)
}

/// Applies C7 (if requested) to `topology`'s already-resolved patches,
/// returning the patch list C3 should use. Must run on `AssembledMesh`
/// (C1 output), not `GeometryMesh` (C2), since C3 -- which needs these
/// patches -- runs before C2.
fn apply_inlet_seeding(
    topology: &AssembledMesh,
    config: &SolverConfig,
) -> Vec<(config::PatchKind, Vec<usize>)> {
    let mut patches = topology.patches.clone();
    if config.interactive_mode == InteractiveMode::None {
        return patches;
    }
    let centers: Vec<geometry::Vec3> = topology.cells.iter().map(|c| c.center).collect();
    let matched = inlet_seed::resolve(&centers, &config.inlet_seed_points, config.inlet_seed_radius);
    log::info!("inlet seeding ({:?}) matched {} cells", config.interactive_mode, matched.len());
    if config.interactive_mode == InteractiveMode::ReplaceInlets {
        patches.retain(|(kind, _)| !matches!(kind, config::PatchKind::Inlet));
    }
    patches.push((config::PatchKind::Inlet, matched));
    patches
}

/// Builds a `GeometryMesh` from raw nodes/triangles/patches plus
/// `config`'s default properties and reference direction, running C1 ->
/// (C7) -> C3 -> C2 in that order.
fn build_mesh(
    nodes: &[RawNode],
    triangles: &[RawTriangle],
    patches: &[config::PatchSpec],
    config: &SolverConfig,
) -> SimResult<GeometryMesh> {
    let topology = assemble_topology(nodes, triangles, patches)?;
    let resolved_patches = apply_inlet_seeding(&topology, config);
    let assignments = properties::assign_scalar(&topology, &config.default_properties, &resolved_patches)?;
    geometry::build(&topology, &assignments, config.reference_direction, config.mu)
}

/// The crate's single entry point (section 4.8): validates `config`,
/// assembles the mesh through C1->C2->C3->(C7), and builds a `Solver`
/// ready to run -- from a cold start for `MeshSource::Triangulation`, or
/// seeded from a prior snapshot for `MeshSource::Restart`.
pub fn run_simulation(config: &mut SolverConfig, mesh_source: MeshSource) -> SimResult<SimulationHandle> {
    config.validate()?;

    let solver = match mesh_source {
        MeshSource::Triangulation { nodes, triangles, patches } => {
            let mesh = build_mesh(&nodes, &triangles, &patches, config)?;
            Solver::new(mesh, config)?
        }
        MeshSource::Restart { nodes, triangles, patches, snapshot_path } => {
            let mesh = build_mesh(&nodes, &triangles, &patches, config)?;
            let snapshot = Snapshot::load(&snapshot_path)?;
            log::info!("restarting from snapshot {} at t={:.4}", snapshot.n_out, snapshot.t);
            Solver::from_snapshot(mesh, config, &snapshot)?
        }
    };

    Ok(SimulationHandle { phase: RunPhase::Init, solver, t_max: config.t_max })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec3;

    fn unit_square_triangulation() -> (Vec<RawNode>, Vec<RawTriangle>, Vec<PatchSpec>) {
        let nodes = vec![
            RawNode { external_id: 0, x: 0.0, y: 0.0, z: 0.0 },
            RawNode { external_id: 1, x: 1.0, y: 0.0, z: 0.0 },
            RawNode { external_id: 2, x: 1.0, y: 1.0, z: 0.0 },
            RawNode { external_id: 3, x: 0.0, y: 1.0, z: 0.0 },
        ];
        let triangles =
            vec![RawTriangle { external_id: 10, node_ids: [0, 1, 2] }, RawTriangle { external_id: 11, node_ids: [0, 2, 3] }];
        let inlet = PatchSpec { name: "inlet".into(), kind: PatchKind::Inlet, triangle_ids: vec![10] };
        let outlet = PatchSpec { name: "outlet".into(), kind: PatchKind::Outlet, triangle_ids: vec![11] };
        (nodes, triangles, vec![inlet, outlet])
    }

    fn base_config(dir: std::path::PathBuf) -> SolverConfig {
        SolverConfig {
            t_max: 2.0,
            eos: EosKind::WeaklyCompressible { gamma_eos: 1.4 },
            p_ref: 1.0e5,
            rho_ref: 1.0,
            mu: 0.06,
            p_a: 1.2e5,
            p_init: 1.0e5,
            default_properties: PreformProperties {
                thickness: 3.0e-3,
                porosity: 0.7,
                k1: 3.0e-10,
                alpha: 1.0,
                principal_direction: Vec3::new(1.0, 0.0, 0.0),
            },
            patches: Vec::new(),
            restart: false,
            interactive_mode: InteractiveMode::None,
            inlet_seed_points: Vec::new(),
            inlet_seed_radius: 0.01,
            n_pics: 8,
            reference_direction: Vec3::new(1.0, 0.0, 0.0),
            snapshot_interval: 0.5,
            snapshot_dir: dir,
        }
    }

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("rtmsim_lib_test_{tag}_{}", std::process::id()))
    }

    #[test]
    fn run_simulation_validates_config_before_touching_the_mesh() {
        let dir = temp_dir("validate");
        let mut config = base_config(dir.clone());
        config.t_max = -1.0;
        let (nodes, triangles, patches) = unit_square_triangulation();
        let err = run_simulation(&mut config, MeshSource::Triangulation { nodes, triangles, patches }).unwrap_err();
        assert!(matches!(err, SimError::ConfigInvalid { field: "t_max", .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn run_to_completion_reaches_terminated_and_writes_snapshots() {
        let dir = temp_dir("complete");
        let mut config = base_config(dir.clone());
        let (nodes, triangles, patches) = unit_square_triangulation();
        let mut handle =
            run_simulation(&mut config, MeshSource::Triangulation { nodes, triangles, patches }).unwrap();
        let snapshots = handle.run_to_completion().unwrap();
        assert_eq!(handle.phase(), RunPhase::Terminated);
        assert!(!snapshots.is_empty());
        assert!(dir.join("results.json").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn replace_inlets_drops_patch_defined_inlet_membership() {
        let dir = temp_dir("replace_inlets");
        let mut config = base_config(dir.clone());
        config.interactive_mode = InteractiveMode::ReplaceInlets;
        config.inlet_seed_points = vec![Vec3::new(0.9, 0.9, 0.0)];
        config.inlet_seed_radius = 0.5;
        let (nodes, triangles, patches) = unit_square_triangulation();
        let handle =
            run_simulation(&mut config, MeshSource::Triangulation { nodes, triangles, patches }).unwrap();
        // The original patch-defined inlet was triangle 10 (cell 0); the
        // seed near (0.9, 0.9) should resolve to cell 1 instead, and
        // `ReplaceInlets` means cell 0 must no longer be an inlet.
        let classes: Vec<_> = handle.solver().mesh().cells.iter().map(|c| c.class).collect();
        assert_ne!(classes[0], mesh::CellClass::PressureInlet);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn restart_seeds_state_from_a_prior_snapshot() {
        let dir = temp_dir("restart");
        let mut config = base_config(dir.clone());
        let (nodes, triangles, patches) = unit_square_triangulation();
        let mut handle = run_simulation(
            &mut config,
            MeshSource::Triangulation { nodes: nodes.clone(), triangles: triangles.clone(), patches: patches.clone() },
        )
        .unwrap();
        let snapshots = handle.run_to_completion().unwrap();
        let last = snapshots.last().unwrap().clone();
        let snapshot_path = dir.join(format!("snapshot_{}.json", last.n_out));

        let mut restart_config = base_config(dir.clone());
        let restarted = run_simulation(
            &mut restart_config,
            MeshSource::Restart { nodes, triangles, patches, snapshot_path },
        )
        .unwrap();
        assert!((restarted.solver().time() - last.t).abs() < 1e-9);
        std::fs::remove_dir_all(&dir).ok();
    }
}
