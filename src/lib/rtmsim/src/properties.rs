//! C3: default-vs-patch-override property resolution (section 4.3).
//!
//! This runs in two halves. The scalar half below needs only C1's topology
//! (patch membership is already cell ids by the time it reaches this
//! module) and runs before C2, because C2's face-area and cell-volume
//! computation needs per-cell thickness. The geometric half --
//! reprojecting the principal permeability direction into each cell's local
//! frame -- genuinely needs the frame, so it is folded into
//! `geometry::build` instead of living here; see `DESIGN.md`. Resin
//! viscosity is also set there rather than resolved here: it is a single
//! global EoS parameter (`SolverConfig::mu`, section 6), not part of the
//! per-cell property tuple this module resolves.

use crate::config::{PatchKind, PatchSpec, PreformProperties};
use crate::error::SimError;
use crate::geometry::Vec3;
use crate::mesh::{AssembledMesh, CellClass};

/// Resolved per-cell scalars, before local-frame projection.
#[derive(Clone, Copy, Debug)]
pub struct PreformAssignment {
    pub class: CellClass,
    pub thickness: f64,
    pub porosity: f64,
    pub k1: f64,
    pub k2: f64,
    pub principal_direction_global: Vec3,
}

impl PreformAssignment {
    fn from_default(class: CellClass, default: &PreformProperties) -> Self {
        PreformAssignment {
            class,
            thickness: default.thickness,
            porosity: default.porosity,
            k1: default.k1,
            k2: default.alpha * default.k1,
            principal_direction_global: default.principal_direction,
        }
    }

    fn apply_override(&mut self, props: &PreformProperties) {
        self.thickness = props.thickness;
        self.porosity = props.porosity;
        self.k1 = props.k1;
        self.k2 = props.alpha * props.k1;
        self.principal_direction_global = props.principal_direction;
    }
}

/// Assigns every cell its default properties, then applies patches in
/// declaration order so a later patch wins on overlapping membership
/// (section 4.3). `Inlet`/`Outlet` patches only ever raise a cell's class;
/// they never touch its material properties, since boundary cells are
/// re-pinned to the boundary state every step regardless (section 4.6).
pub fn assign_scalar(
    topology: &AssembledMesh,
    default: &PreformProperties,
    patches: &[(PatchKind, Vec<usize>)],
) -> Result<Vec<PreformAssignment>, SimError> {
    let mut assignments: Vec<PreformAssignment> = topology
        .cells
        .iter()
        .map(|cell| PreformAssignment::from_default(cell.class, default))
        .collect();

    for (kind, cell_ids) in patches {
        for &cell_id in cell_ids {
            let assignment = &mut assignments[cell_id];
            match kind {
                PatchKind::Ignored => {}
                PatchKind::Inlet => assignment.class = CellClass::PressureInlet,
                PatchKind::Outlet => assignment.class = CellClass::PressureOutlet,
                PatchKind::PreformOverride(props) => assignment.apply_override(props),
            }
        }
    }

    Ok(assignments)
}

/// Same as [`assign_scalar`] but resolving patches directly from
/// `PatchSpec`s and an already-built triangle-id index, for callers that
/// have not yet gone through `mesh::assemble`'s patch resolution. Kept
/// separate from the hot path so `lib.rs` can validate a `SolverConfig`'s
/// patches independently of mesh assembly if it ever needs to.
pub fn resolve_patch_kinds(patches: &[PatchSpec]) -> Vec<PatchKind> {
    patches.iter().map(|p| p.kind.clone()).collect()
}
