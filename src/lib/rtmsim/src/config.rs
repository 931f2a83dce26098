//! Validated invocation parameters. This replaces the ~45-argument entry
//! point the source grew into with a single struct whose `validate()` checks
//! every field once, in declared order, and fails fast on the first
//! offender.

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::geometry::Vec3;

/// Default preform properties, or the properties a `preform_override` patch
/// substitutes for its member cells.
///
/// Resin viscosity is deliberately absent here: section 6's external
/// interface lists `mu` among the *EoS parameters*, separate from the
/// "default preform properties tuple" and the "patch-override tuples" this
/// struct models, so viscosity is never patch-overridable -- it is the
/// single scalar `SolverConfig::mu`, applied uniformly to every cell by
/// `geometry::build`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PreformProperties {
    /// Preform thickness [m].
    pub thickness: f64,
    /// Porosity, dimensionless, in `(0, 1]`.
    pub porosity: f64,
    /// First principal in-plane permeability [m^2].
    pub k1: f64,
    /// Permeability anisotropy ratio `alpha`; second principal permeability
    /// is `alpha * k1`.
    pub alpha: f64,
    /// Principal permeability direction, expressed in the global frame.
    /// Need not be tangent to the surface; it is projected into each cell's
    /// local frame at property-assignment time.
    pub principal_direction: Vec3,
}

impl PreformProperties {
    pub(crate) fn validate(&self, label: &'static str) -> Result<(), SimError> {
        if !(self.thickness > 0.0) {
            return Err(invalid(label, "thickness must be > 0"));
        }
        if !(self.porosity > 0.0 && self.porosity <= 1.0) {
            return Err(invalid(label, "porosity must be in (0, 1]"));
        }
        if !(self.k1 > 0.0) {
            return Err(invalid(label, "k1 must be > 0"));
        }
        if !(self.alpha > 0.0) {
            return Err(invalid(label, "alpha must be > 0 (second permeability must be > 0)"));
        }
        if self.principal_direction.norm() <= 0.0 {
            return Err(invalid(label, "principal_direction must be nonzero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: &str) -> SimError {
    SimError::ConfigInvalid {
        field,
        message: message.to_string(),
    }
}

/// How a patch's member cells should be handled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PatchKind {
    /// No effect; membership is recorded but nothing is overridden.
    Ignored,
    /// Cells become `pressure_inlet`, held at `(rho_a, 0, 0, p_a, 1)`.
    Inlet,
    /// Cells become `pressure_outlet`, held at `(rho_init, 0, 0, p_init, 0)`.
    Outlet,
    /// Cells keep their C1-assigned class (interior/wall) but use these
    /// properties instead of the run's defaults.
    PreformOverride(PreformProperties),
}

/// A named subset of triangles (by external id) with a type tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatchSpec {
    pub name: String,
    pub kind: PatchKind,
    /// External (pre-assembly) triangle ids, in declaration order.
    pub triangle_ids: Vec<u64>,
}

/// Equation-of-state selection (section 4.6). Kept as data rather than a trait
/// object so `SolverConfig` stays `Serialize`/`Deserialize` end to end; the
/// per-step hot path builds the corresponding `EquationOfState` once.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum EosKind {
    /// `gamma_eos` near the ideal-gas exponent (default 1.4).
    WeaklyCompressible { gamma_eos: f64 },
    /// Quadratic fit `delta_p = a1*rho^2 + a2*rho`, pinned to `(0, 0)` and
    /// `(rho_ref, p_ref)` with zero slope at `rho_ref`.
    QuasiIncompressible,
}

/// How geometric inlet selection (C7) should be applied, if at all.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum InteractiveMode {
    #[default]
    None,
    /// Seed-resolved cells replace any inlet patch membership.
    ReplaceInlets,
    /// Seed-resolved cells are unioned with existing inlet patch membership.
    AddInlets,
}

/// Where the run's mesh (and, for restart, prior state) comes from.
/// Parsing any specific on-disk mesh format is out of scope; callers hand in
/// already-parsed node and triangle lists.
///
/// A restart needs both the original triangulation (C1/C2/C3 must still run
/// to rebuild identical geometry and material properties -- neither is
/// stored in a `Snapshot`, which only carries per-cell dynamic state) and a
/// prior snapshot to seed that state from, so `Restart` carries both rather
/// than replacing `Triangulation`.
#[derive(Clone, Debug)]
pub enum MeshSource {
    Triangulation {
        nodes: Vec<crate::mesh::RawNode>,
        triangles: Vec<crate::mesh::RawTriangle>,
        patches: Vec<PatchSpec>,
    },
    Restart {
        nodes: Vec<crate::mesh::RawNode>,
        triangles: Vec<crate::mesh::RawTriangle>,
        patches: Vec<PatchSpec>,
        snapshot_path: std::path::PathBuf,
    },
}

/// The full, validated set of inputs to a solver invocation (section 6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Physical end time [s]. The loop runs until `t > t_max`.
    pub t_max: f64,

    pub eos: EosKind,
    /// Reference pressure for the EoS [Pa].
    pub p_ref: f64,
    /// Reference density for the EoS [kg/m^3].
    pub rho_ref: f64,
    /// Resin dynamic viscosity [Pa.s], the single value every cell's Darcy
    /// momentum sink and inlet boundary law uses (section 4.5/4.6's `mu` is
    /// never subscripted per cell, unlike `K`); `geometry::build` copies this
    /// into every `Cell::viscosity`.
    pub mu: f64,

    /// Absolute inlet pressure [Pa].
    pub p_a: f64,
    /// Initial / outlet pressure [Pa].
    pub p_init: f64,

    /// Default preform properties applied where no `preform_override` patch
    /// matches.
    pub default_properties: PreformProperties,

    /// Up to four patch specifications, applied in declaration order
    /// (later patches win on overlapping membership, section 4.3).
    pub patches: Vec<PatchSpec>,

    pub restart: bool,

    /// Geometric inlet-port selection.
    pub interactive_mode: InteractiveMode,
    /// Seed points for C7, in the global frame.
    pub inlet_seed_points: Vec<Vec3>,
    /// Initial seed search radius [m]; grown by 1.1x per retry.
    pub inlet_seed_radius: f64,

    /// Number of "pressure iteration cycles" before Delta t adaptation
    /// begins; clamped to `[4, 100]` and rounded up to a multiple of 4 by
    /// `validate()`.
    pub n_pics: u32,

    /// User reference direction used to orient each cell's local frame
    /// (section 4.2).
    pub reference_direction: Vec3,

    /// Interval between scheduled snapshots [s].
    pub snapshot_interval: f64,
    /// Directory snapshots are written into.
    pub snapshot_dir: std::path::PathBuf,
}

const MAX_PATCHES: usize = 4;

impl SolverConfig {
    /// Validates every field, in declared order, returning the first
    /// offending field as `SimError::ConfigInvalid`.
    pub fn validate(&mut self) -> Result<(), SimError> {
        if !(self.t_max > 0.0) {
            return Err(invalid("t_max", "t_max must be > 0"));
        }
        match self.eos {
            EosKind::WeaklyCompressible { gamma_eos } => {
                if !(gamma_eos > 1.0) {
                    return Err(invalid("eos.gamma_eos", "gamma_eos must be > 1"));
                }
            }
            EosKind::QuasiIncompressible => {}
        }
        if !(self.p_ref > 0.0) {
            return Err(invalid("p_ref", "p_ref must be > 0"));
        }
        if !(self.rho_ref > 0.0) {
            return Err(invalid("rho_ref", "rho_ref must be > 0"));
        }
        if !(self.mu > 0.0) {
            return Err(invalid("mu", "mu must be > 0"));
        }
        if !(self.p_init >= 0.0) {
            return Err(invalid("p_init", "p_init must be >= 0"));
        }
        if !(self.p_a > self.p_init) {
            return Err(invalid("p_a", "p_a must be > p_init"));
        }
        self.default_properties.validate("default_properties")?;
        if self.patches.len() > MAX_PATCHES {
            return Err(invalid(
                "patches",
                &format!("at most {MAX_PATCHES} patches are supported, got {}", self.patches.len()),
            ));
        }
        for patch in &self.patches {
            if let PatchKind::PreformOverride(props) = &patch.kind {
                props.validate("patches[].preform_override")?;
            }
            if patch.triangle_ids.is_empty() {
                return Err(invalid("patches[].triangle_ids", "a patch must name at least one triangle"));
            }
        }
        if self.interactive_mode != InteractiveMode::None && self.inlet_seed_points.is_empty() {
            return Err(invalid(
                "inlet_seed_points",
                "interactive_mode requires at least one seed point",
            ));
        }
        if !(self.inlet_seed_radius > 0.0) {
            return Err(invalid("inlet_seed_radius", "inlet_seed_radius must be > 0"));
        }
        if self.reference_direction.norm() <= 0.0 {
            return Err(invalid("reference_direction", "reference_direction must be nonzero"));
        }
        if !(self.snapshot_interval > 0.0) {
            return Err(invalid("snapshot_interval", "snapshot_interval must be > 0"));
        }

        self.n_pics = self.n_pics.clamp(4, 100);
        if self.n_pics % 4 != 0 {
            self.n_pics += 4 - (self.n_pics % 4);
        }

        Ok(())
    }

    /// Upper bound Delta t must never exceed after the first `n_pics` steps
    /// (section 4.6 / section 8 S6).
    pub fn max_dt_after_warmup(&self) -> f64 {
        self.t_max / (4.0 * self.n_pics as f64)
    }
}
