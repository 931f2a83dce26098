//! C6: the time-explicit finite-area solver (section 4.6).
//!
//! Per step: reconstruct the pressure gradient (C4), accumulate upwind
//! fluxes (C5), advance the conservation laws for interior/wall cells,
//! clamp, re-pin inlet/outlet cells to their fixed boundary state, adapt
//! `dt` once past the warm-up window, and emit a snapshot if one is due.
//! This is the RTM analogue of the teacher's `step.rs::step_internal`
//! outer loop (assemble -> solve -> update -> advance time), minus the
//! implicit PCG pressure solve the teacher needs and this spec explicitly
//! excludes (no implicit time integration).

use rayon::prelude::*;

use crate::config::{EosKind, SolverConfig};
use crate::eos::{EquationOfState, EPSILON};
use crate::error::SimError;
use crate::flux::{self, CellFluxTotals, CellState};
use crate::geometry::GeometryMesh;
use crate::gradient;
use crate::mesh::CellClass;
use crate::snapshot::Snapshot;

/// Weight in the Δt adaptation blend (section 4.6 step 6).
const DT_ADAPT_BLEND: f64 = 0.5;
/// Initial-Δt stability factor β₁ (section 4.6).
const BETA1: f64 = 1.0;
/// Adaptive-Δt stability factor β₂, weakly-compressible branch.
const BETA2_WEAKLY_COMPRESSIBLE: f64 = 0.1;
/// Adaptive-Δt stability factor β₂, quasi-incompressible branch.
const BETA2_QUASI_INCOMPRESSIBLE: f64 = 0.01;

/// Drives the time loop. Owns the assembled mesh (read-only for the run),
/// the calibrated equation of state, the current cell-state buffer, and the
/// adaptive-Δt bookkeeping.
pub struct Solver {
    mesh: GeometryMesh,
    eos: EquationOfState,
    states: Vec<CellState>,
    t: f64,
    dt: f64,
    steps_taken: u64,
    n_pics: u32,
    max_dt: f64,
    beta2: f64,
    p_init: f64,
    p_a: f64,
    rho_init: f64,
    rho_a: f64,
    snapshot_interval: f64,
    next_snapshot_time: f64,
    n_out: u64,
    snapshot_dir: std::path::PathBuf,
}

fn delta_p(p_abs: f64, p_init: f64) -> f64 {
    p_abs - p_init + EPSILON
}

fn abs_p(delta_p: f64, p_init: f64) -> f64 {
    delta_p - EPSILON + p_init
}

impl Solver {
    /// Builds a solver at `t = 0` with every interior/wall cell at the
    /// initial state and every boundary cell pinned to its fixed state
    /// (section 3: "Inlet cells hold (rho_a, 0, 0, p_a, 1); outlet cells
    /// hold (rho_init, 0, 0, p_init, 0) ... at the start ... of every
    /// step").
    pub fn new(mesh: GeometryMesh, config: &SolverConfig) -> Result<Self, SimError> {
        let eos = EquationOfState::from_config(config.eos, config.p_ref, config.rho_ref);
        let rho_init = eos.density(delta_p(config.p_init, config.p_init));
        let rho_a = eos.density(delta_p(config.p_a, config.p_init));

        let states: Vec<CellState> = mesh
            .cells
            .iter()
            .map(|cell| match cell.class {
                CellClass::PressureInlet => CellState { rho: rho_a, u: 0.0, v: 0.0, p: config.p_a, gamma: 1.0 },
                CellClass::PressureOutlet => {
                    CellState { rho: rho_init, u: 0.0, v: 0.0, p: config.p_init, gamma: 0.0 }
                }
                CellClass::Interior | CellClass::Wall => {
                    CellState { rho: rho_init, u: 0.0, v: 0.0, p: config.p_init, gamma: 0.0 }
                }
            })
            .collect();

        let beta2 = match config.eos {
            EosKind::WeaklyCompressible { .. } => BETA2_WEAKLY_COMPRESSIBLE,
            EosKind::QuasiIncompressible => BETA2_QUASI_INCOMPRESSIBLE,
        };

        let dt = initial_dt(&mesh, config.p_a - config.p_init);
        log::info!(
            "solver initialized: {} cells, dt0={:.6e}, rho_init={:.4}, rho_a={:.4}",
            mesh.cells.len(),
            dt,
            rho_init,
            rho_a
        );

        Ok(Solver {
            mesh,
            eos,
            states,
            t: 0.0,
            dt,
            steps_taken: 0,
            n_pics: config.n_pics,
            max_dt: config.max_dt_after_warmup(),
            beta2,
            p_init: config.p_init,
            p_a: config.p_a,
            rho_init,
            rho_a,
            snapshot_interval: config.snapshot_interval,
            next_snapshot_time: config.snapshot_interval,
            n_out: 0,
            snapshot_dir: config.snapshot_dir.clone(),
        })
    }

    /// Restores a solver from a prior snapshot. Per the "Restart coupling"
    /// design note, the adaptive Δt is not part of the snapshot; it is
    /// recomputed here from the same initial rule as a fresh run, so
    /// bit-exact restart only holds for a fixed Δt schedule (section 8).
    pub fn from_snapshot(mesh: GeometryMesh, config: &SolverConfig, snapshot: &Snapshot) -> Result<Self, SimError> {
        if snapshot.n_cells != mesh.cells.len() {
            return Err(SimError::ConfigInvalid {
                field: "restart",
                message: format!(
                    "snapshot has {} cells but the assembled mesh has {}",
                    snapshot.n_cells,
                    mesh.cells.len()
                ),
            });
        }
        let mut solver = Self::new(mesh, config)?;
        solver.states = (0..snapshot.n_cells)
            .map(|i| CellState {
                rho: snapshot.rho[i],
                u: snapshot.u[i],
                v: snapshot.v[i],
                p: snapshot.p[i],
                gamma: snapshot.gamma[i],
            })
            .collect();
        solver.t = snapshot.t;
        solver.n_out = snapshot.n_out + 1;
        solver.next_snapshot_time = snapshot.t + solver.snapshot_interval;
        Ok(solver)
    }

    pub fn mesh(&self) -> &GeometryMesh {
        &self.mesh
    }

    pub fn states(&self) -> &[CellState] {
        &self.states
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Advances the solver by one step (section 4.6 steps 1-6). Returns
    /// `Some(snapshot)` if a scheduled (or final) snapshot was due this
    /// step, after it has been written to `snapshot_dir`.
    pub fn step(&mut self, t_max: f64) -> Result<Option<Snapshot>, SimError> {
        let pressures: Vec<f64> = self.states.iter().map(|s| s.p).collect();
        let gradients = gradient::reconstruct(&self.mesh, &pressures);
        let fluxes = flux::accumulate(&self.mesh, &self.states, &gradients);

        let dt = self.dt;
        let eos = self.eos;
        let p_init = self.p_init;
        let updated: Vec<Result<CellState, SimError>> = (0..self.mesh.cells.len())
            .into_par_iter()
            .map(|cell_id| {
                let cell = &self.mesh.cells[cell_id];
                match cell.class {
                    CellClass::PressureInlet | CellClass::PressureOutlet => Ok(self.states[cell_id]),
                    CellClass::Interior | CellClass::Wall => update_cell(
                        cell_id,
                        cell,
                        &self.states[cell_id],
                        &fluxes[cell_id],
                        gradients[cell_id],
                        dt,
                        &eos,
                        p_init,
                    ),
                }
            })
            .collect();

        let mut next_states = Vec::with_capacity(updated.len());
        for result in updated {
            next_states.push(result?);
        }
        self.states = next_states;

        // Re-pin inlet/outlet cells to their fixed boundary state (section
        // 4.6 step 5), every step, regardless of what the update loop did.
        for (cell_id, cell) in self.mesh.cells.iter().enumerate() {
            match cell.class {
                CellClass::PressureInlet => {
                    self.states[cell_id] = CellState { rho: self.rho_a, u: 0.0, v: 0.0, p: self.p_a, gamma: 1.0 };
                }
                CellClass::PressureOutlet => {
                    self.states[cell_id] =
                        CellState { rho: self.rho_init, u: 0.0, v: 0.0, p: self.p_init, gamma: 0.0 };
                }
                CellClass::Interior | CellClass::Wall => {}
            }
        }

        self.steps_taken += 1;
        self.t += dt;

        if self.steps_taken > self.n_pics as u64 {
            self.adapt_dt();
        }

        let due = self.t >= self.next_snapshot_time || self.t + self.dt > t_max;
        let snapshot = if due {
            let snap = Snapshot::capture(&self.mesh, &self.states, self.t, self.n_out);
            snap.write(&self.snapshot_dir)?;
            self.n_out += 1;
            self.next_snapshot_time = self.t + self.snapshot_interval;
            Some(snap)
        } else {
            None
        };

        Ok(snapshot)
    }

    /// Section 4.6 step 6: blend the current Δt with a CFL-style estimate
    /// from the fastest cell, then cap at `t_max / (4 n_pics)`.
    fn adapt_dt(&mut self) {
        let min_crossing_time = self
            .mesh
            .cells
            .iter()
            .zip(self.states.iter())
            .filter(|(cell, _)| matches!(cell.class, CellClass::Interior | CellClass::Wall))
            .filter_map(|(cell, state)| {
                let speed = (state.u * state.u + state.v * state.v).sqrt();
                if speed > 0.0 {
                    Some((cell.volume / cell.thickness).sqrt() / speed)
                } else {
                    None
                }
            })
            .fold(f64::INFINITY, f64::min);

        if min_crossing_time.is_finite() {
            let candidate = (1.0 - DT_ADAPT_BLEND) * self.dt + DT_ADAPT_BLEND * self.beta2 * min_crossing_time;
            self.dt = candidate;
        }
        if self.dt > self.max_dt {
            log::debug!("dt capped at t_max/(4*n_pics) = {:.6e} (was {:.6e})", self.max_dt, self.dt);
            self.dt = self.max_dt;
        }
    }
}

/// Section 4.6's initial-Δt rule: `dt0 = beta1 * sqrt(Abar) / v_max`, where
/// `Abar` is the minimum in-plane cell area and `v_max` is the maximum
/// characteristic Darcy speed `K * delta_p_drive / (mu * area)` over the
/// mesh.
fn initial_dt(mesh: &GeometryMesh, delta_p_drive: f64) -> f64 {
    let min_area = mesh.cells.iter().map(|c| c.area).fold(f64::INFINITY, f64::min);
    let v_max = mesh
        .cells
        .iter()
        .map(|c| c.k1 * delta_p_drive / (c.viscosity * c.area))
        .fold(0.0_f64, f64::max);
    if v_max <= 0.0 || !v_max.is_finite() {
        return min_area.sqrt();
    }
    BETA1 * min_area.sqrt() / v_max
}

/// One interior/wall cell's conservation update, section 4.6 step 3.
fn update_cell(
    cell_id: usize,
    cell: &crate::geometry::Cell,
    state: &CellState,
    flux: &CellFluxTotals,
    gradient: crate::geometry::Vec2,
    dt: f64,
    eos: &EquationOfState,
    p_init: f64,
) -> Result<CellState, SimError> {
    let volume = cell.volume;
    let porosity = cell.porosity;

    let rho_new = (state.rho - (dt / volume) * flux.mass).max(0.0);
    check_finite(cell_id, "rho", rho_new)?;

    let u_new = (state.rho * state.u - (dt / volume) * flux.momentum_u - dt * gradient.x)
        / (rho_new + dt * cell.viscosity / cell.k1);
    check_finite(cell_id, "u", u_new)?;

    let v_new = (state.rho * state.v - (dt / volume) * flux.momentum_v - dt * gradient.y)
        / (rho_new + dt * cell.viscosity / cell.k2);
    check_finite(cell_id, "v", v_new)?;

    let gamma_new = ((porosity * state.gamma - (dt / volume) * (flux.gamma_transport - state.gamma * flux.volume_flux))
        / porosity)
        .clamp(0.0, 1.0);
    check_finite(cell_id, "gamma", gamma_new)?;

    let delta_p_new = eos.pressure(rho_new);
    let p_new = abs_p(delta_p_new, p_init).max(0.0);
    check_finite(cell_id, "p", p_new)?;

    Ok(CellState { rho: rho_new, u: u_new, v: v_new, p: p_new, gamma: gamma_new })
}

fn check_finite(cell: usize, field: &'static str, value: f64) -> Result<(), SimError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SimError::NumericalInstability { cell, field })
    }
}
