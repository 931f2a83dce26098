//! Equation of state (section 4.6 / Design Note "Equation of state
//! branching"). The solver works throughout in a *normalized* pressure
//! `delta_p = p - p_init + EPSILON`, never in raw absolute pressure; every
//! function here takes and returns `delta_p`, not `p`. `solver.rs` owns the
//! shift back to absolute pressure for reporting.
//!
//! The two branches do not share one formula, only one call shape
//! (`pressure`/`density`/`sound_speed`), matched behind `EosModel` so the
//! per-step hot path never branches on which one is active:
//!
//! - **Weakly compressible**: the power law `delta_p = kappa * rho ^
//!   gamma_eos`, `kappa = p_ref / rho_ref ^ gamma_eos`.
//! - **Quasi-incompressible**: the quadratic `delta_p = a1*rho^2 + a2*rho`,
//!   solved from the three constraints named in section 4.6 -- `delta_p(0)
//!   = 0`, `delta_p(rho_ref) = p_ref`, and zero slope at `rho_ref` -- which
//!   gives `a1 = -p_ref / rho_ref^2`, `a2 = -2 * a1 * rho_ref`, `a3 = 0`.
//!   The curve peaks at `rho_ref`; this crate always inverts it on the
//!   `rho <= rho_ref` branch, matching the weakly-compressible branch's own
//!   range for the same `delta_p < p_ref`.

/// Pressure-shift constant from section 4.6's normalization
/// (`delta_p = p - p_init + EPSILON`).
pub const EPSILON: f64 = 100.0;

use crate::config::EosKind;

#[derive(Clone, Copy, Debug)]
enum EosModel {
    Power { gamma_eos: f64, kappa: f64 },
    Quadratic { a1: f64, a2: f64, p_ref: f64, rho_ref: f64 },
}

/// A calibrated equation of state: maps normalized pressure to density and
/// back, and reports the local speed of sound used by the Delta t
/// stability estimate.
#[derive(Clone, Copy, Debug)]
pub struct EquationOfState {
    model: EosModel,
}

impl EquationOfState {
    pub fn from_config(eos: EosKind, p_ref: f64, rho_ref: f64) -> Self {
        let model = match eos {
            EosKind::WeaklyCompressible { gamma_eos } => {
                let kappa = p_ref / rho_ref.powf(gamma_eos);
                EosModel::Power { gamma_eos, kappa }
            }
            EosKind::QuasiIncompressible => {
                let a1 = -p_ref / (rho_ref * rho_ref);
                let a2 = -2.0 * a1 * rho_ref;
                EosModel::Quadratic { a1, a2, p_ref, rho_ref }
            }
        };
        EquationOfState { model }
    }

    /// `delta_p(rho)`.
    pub fn pressure(&self, rho: f64) -> f64 {
        match self.model {
            EosModel::Power { gamma_eos, kappa } => kappa * rho.powf(gamma_eos),
            EosModel::Quadratic { a1, a2, .. } => a1 * rho * rho + a2 * rho,
        }
    }

    /// `rho(delta_p)`, the inverse used after the explicit mass update
    /// leaves a cell with a known conserved mass but no direct pressure.
    pub fn density(&self, delta_p: f64) -> f64 {
        match self.model {
            EosModel::Power { gamma_eos, kappa } => (delta_p / kappa).powf(1.0 / gamma_eos),
            EosModel::Quadratic { p_ref, rho_ref, .. } => {
                // Inverts the rho <= rho_ref branch of the parabola; clamp
                // guards the sqrt domain if delta_p drifts past p_ref.
                let ratio = (delta_p / p_ref).clamp(0.0, 1.0);
                rho_ref * (1.0 - (1.0 - ratio).sqrt())
            }
        }
    }

    /// Local speed of sound `c = sqrt(d(delta_p)/d(rho))`, used by the
    /// Delta t stability heuristic (section 4.6).
    pub fn sound_speed(&self, rho: f64) -> f64 {
        let dpdrho = match self.model {
            EosModel::Power { gamma_eos, kappa } => gamma_eos * kappa * rho.powf(gamma_eos - 1.0),
            EosModel::Quadratic { a1, a2, .. } => 2.0 * a1 * rho + a2,
        };
        dpdrho.max(0.0).sqrt()
    }
}
