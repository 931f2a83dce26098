//! C5: first-order upwind numerical fluxes (section 4.5).
//!
//! One pass per cell over its flattened neighbor geometry. Interior faces
//! get mass/momentum/volume fluxes upwound by the sign of the interface
//! mass or volume flux; pressure-boundary faces (inlet/outlet) are driven by
//! the boundary condition instead of a neighbor state, with the owner's area
//! rescaled for the thickness discontinuity.
//!
//! Like the teacher's `step.rs::calculate_fluxes`, this computes one
//! face-centered quantity per neighbor and lets the caller (`solver.rs`)
//! accumulate it into the owning cell's per-step totals -- the difference is
//! that RTM's faces are either interior (symmetric, Darcy single-phase) or a
//! fixed-pressure boundary, never a well term.

use nalgebra::Vector2;
use rayon::prelude::*;

use crate::geometry::{Cell, GeometryMesh, Vec2};
use crate::mesh::CellClass;

/// Accumulated per-cell flux totals for one step: `sum(F_rho)`,
/// `sum(F_u)`, `sum(F_v)`, `sum(F_gamma)` (the gamma-transported term) and
/// `sum(F_V)` (the bare volume-flux correction term, section 4.5/4.6).
#[derive(Clone, Copy, Debug, Default)]
pub struct CellFluxTotals {
    pub mass: f64,
    pub momentum_u: f64,
    pub momentum_v: f64,
    pub gamma_transport: f64,
    pub volume_flux: f64,
}

/// One cell's instantaneous state, as seen by the flux kernel. Carried
/// separately from `geometry::Cell` (which is immutable mesh data) since
/// this changes every step.
#[derive(Clone, Copy, Debug)]
pub struct CellState {
    pub rho: f64,
    pub u: f64,
    pub v: f64,
    pub p: f64,
    pub gamma: f64,
}

impl CellState {
    fn velocity(&self) -> Vec2 {
        Vec2::new(self.u, self.v)
    }
}

/// Computes every cell's accumulated flux totals for the current state.
/// `gradients[i]` is cell `i`'s least-squares pressure gradient (C4),
/// needed only at inlet faces for the Darcy boundary velocity.
///
/// Each cell's total reads only its own and its neighbors' *current* state
/// and writes only its own output slot (section 5: "data-parallel over
/// cells with no inter-cell write conflicts within one step"), so the outer
/// loop is a `rayon` parallel map rather than a sequential accumulation.
pub fn accumulate(mesh: &GeometryMesh, states: &[CellState], gradients: &[Vec2]) -> Vec<CellFluxTotals> {
    (0..mesh.cells.len())
        .into_par_iter()
        .map(|cell_id| cell_flux_totals(mesh, states, gradients, cell_id))
        .collect()
}

fn cell_flux_totals(mesh: &GeometryMesh, states: &[CellState], gradients: &[Vec2], cell_id: usize) -> CellFluxTotals {
    let owner = &mesh.cells[cell_id];
    // Boundary cells are re-pinned every step (section 4.6 step 5); their
    // own outgoing fluxes are never used to update their own state.
    if matches!(owner.class, CellClass::PressureInlet | CellClass::PressureOutlet) {
        return CellFluxTotals::default();
    }
    let owner_state = &states[cell_id];
    let mut total = CellFluxTotals::default();
    for ng in mesh.cell_neighbors(cell_id) {
        let neighbor = &mesh.cells[ng.neighbor_id];
        let contribution = match neighbor.class {
            CellClass::PressureInlet => {
                boundary_face_flux(owner, neighbor, owner_state, ng.area, ng.normal, true, gradients[cell_id])
            }
            CellClass::PressureOutlet => {
                boundary_face_flux(owner, neighbor, owner_state, ng.area, ng.normal, false, gradients[cell_id])
            }
            CellClass::Interior | CellClass::Wall => {
                interior_face_flux(owner_state, &states[ng.neighbor_id], ng.area, ng.normal, ng.rotation)
            }
        };
        total.mass += contribution.mass;
        total.momentum_u += contribution.momentum_u;
        total.momentum_v += contribution.momentum_v;
        total.gamma_transport += contribution.gamma_transport;
        total.volume_flux += contribution.volume_flux;
    }
    total
}

/// Interior face flux (section 4.5): interface-averaged density, the
/// neighbor's velocity rotated into the owner's frame, upwind by the sign of
/// the mass (momentum) or volume (gamma) flux.
fn interior_face_flux(
    owner: &CellState,
    neighbor: &CellState,
    area: f64,
    normal: Vec2,
    rotation: nalgebra::Matrix2<f64>,
) -> CellFluxTotals {
    let rho_avg = 0.5 * (owner.rho + neighbor.rho);
    let neighbor_velocity_in_owner_frame = rotation * neighbor.velocity();
    let u_bar = 0.5 * (owner.velocity() + neighbor_velocity_in_owner_frame);

    let mass_flux = normal.dot(&(rho_avg * u_bar)) * area;
    let volume_flux = normal.dot(&u_bar) * area;

    let upwind_u = if mass_flux >= 0.0 { owner.u } else { neighbor_velocity_in_owner_frame.x };
    let upwind_v = if mass_flux >= 0.0 { owner.v } else { neighbor_velocity_in_owner_frame.y };
    let upwind_gamma = if volume_flux >= 0.0 { owner.gamma } else { neighbor.gamma };

    CellFluxTotals {
        mass: mass_flux,
        momentum_u: mass_flux * upwind_u,
        momentum_v: mass_flux * upwind_v,
        gamma_transport: volume_flux * upwind_gamma,
        volume_flux,
    }
}

/// Pressure-boundary face flux (section 4.5). `geometry::build` computes
/// every face's area from the *averaged* incident-cell thickness, inlet and
/// outlet cells included; at a pressure boundary that average is not
/// physical (the boundary "cell" carries whatever thickness its patch was
/// assigned, not the preform's), so the owner's area is rescaled here by
/// `t_owner / avg(t_owner, t_boundary)` -- which simplifies to
/// `area * t_owner / avg_thickness`, i.e. the owner-thickness-only area.
fn boundary_face_flux(
    owner: &Cell,
    boundary: &Cell,
    owner_state: &CellState,
    area: f64,
    normal: Vec2,
    is_inlet: bool,
    gradient: Vec2,
) -> CellFluxTotals {
    let avg_thickness = 0.5 * (owner.thickness + boundary.thickness);
    let rescaled_area = if avg_thickness > 0.0 { area * owner.thickness / avg_thickness } else { area };
    let through_velocity = if is_inlet {
        darcy_inlet_velocity(owner, gradient, normal)
    } else {
        normal.dot(&owner_state.velocity())
    };
    let through_flux = if is_inlet { through_velocity.min(0.0) } else { through_velocity };

    let mass_flux = owner_state.rho * through_flux * rescaled_area;
    let volume_flux = through_flux * rescaled_area;
    let upwind_gamma = if volume_flux >= 0.0 { owner_state.gamma } else { 1.0 };

    CellFluxTotals {
        mass: mass_flux,
        momentum_u: mass_flux * owner_state.u,
        momentum_v: mass_flux * owner_state.v,
        gamma_transport: volume_flux * upwind_gamma,
        volume_flux,
    }
}

/// Darcy's law through-face velocity at an inlet, section 4.5:
/// `u_bar = -(1/mu) diag(K, alpha*K) grad(p)`, projected onto the face
/// normal (`n . u_bar`, not `u_bar.x + u_bar.y`). No-backflow is enforced by
/// the caller (`min(0, n.u_bar)`).
fn darcy_inlet_velocity(owner: &Cell, gradient: Vec2, normal: Vec2) -> f64 {
    let u_bar = Vector2::new(
        -owner.k1 / owner.viscosity * gradient.x,
        -owner.k2 / owner.viscosity * gradient.y,
    );
    normal.dot(&u_bar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreformProperties;
    use crate::geometry::{build, Vec3};
    use crate::mesh::{assemble, RawNode, RawTriangle};
    use crate::properties::assign_scalar;
    use approx::assert_relative_eq;

    fn two_cell_mesh() -> GeometryMesh {
        let nodes = vec![
            RawNode { external_id: 0, x: 0.0, y: 0.0, z: 0.0 },
            RawNode { external_id: 1, x: 1.0, y: 0.0, z: 0.0 },
            RawNode { external_id: 2, x: 1.0, y: 1.0, z: 0.0 },
            RawNode { external_id: 3, x: 0.0, y: 1.0, z: 0.0 },
        ];
        let triangles = vec![
            RawTriangle { external_id: 10, node_ids: [0, 1, 2] },
            RawTriangle { external_id: 11, node_ids: [0, 2, 3] },
        ];
        let topology = assemble(&nodes, &triangles, &[]).unwrap();
        let default = PreformProperties {
            thickness: 2.0e-3,
            porosity: 0.6,
            k1: 1.0e-10,
            alpha: 1.0,
            principal_direction: Vec3::new(1.0, 0.0, 0.0),
        };
        let assignments = assign_scalar(&topology, &default, &[]).unwrap();
        build(&topology, &assignments, Vec3::new(1.0, 0.0, 0.0), 0.05).unwrap()
    }

    #[test]
    fn mass_flux_is_antisymmetric_between_owner_and_neighbor() {
        let mesh = two_cell_mesh();
        let states: Vec<CellState> = vec![
            CellState { rho: 1.0, u: 0.1, v: 0.0, p: 1.0e5, gamma: 0.5 },
            CellState { rho: 0.9, u: 0.0, v: 0.0, p: 0.9e5, gamma: 0.2 },
        ];
        let gradients = vec![Vec2::zeros(); 2];
        let totals = accumulate(&mesh, &states, &gradients);

        // Each cell has exactly one neighbor across the shared diagonal;
        // the outward normals are opposite, so the raw per-face mass flux
        // (not yet multiplied by upwind state) should be antisymmetric.
        let ng0 = &mesh.cell_neighbors(0)[0];
        let ng1 = &mesh.cell_neighbors(1)[0];
        assert_relative_eq!(ng0.area, ng1.area, epsilon = 1e-12);
        let n0 = ng0.normal;
        let n1 = ng1.normal;
        assert_relative_eq!(n0.x, -n1.x, epsilon = 1e-10);
        assert_relative_eq!(n0.y, -n1.y, epsilon = 1e-10);
        assert!(totals[0].mass.is_finite());
        assert!(totals[1].mass.is_finite());
    }

    #[test]
    fn boundary_cells_accumulate_no_flux() {
        // Re-pinning boundary cells regardless of flux accumulation is
        // section 4.6 step 5's job; the flux kernel itself must not
        // contribute anything to a boundary cell's own totals.
        let nodes = vec![
            RawNode { external_id: 0, x: 0.0, y: 0.0, z: 0.0 },
            RawNode { external_id: 1, x: 1.0, y: 0.0, z: 0.0 },
            RawNode { external_id: 2, x: 1.0, y: 1.0, z: 0.0 },
            RawNode { external_id: 3, x: 0.0, y: 1.0, z: 0.0 },
        ];
        let triangles = vec![
            RawTriangle { external_id: 10, node_ids: [0, 1, 2] },
            RawTriangle { external_id: 11, node_ids: [0, 2, 3] },
        ];
        let patch = crate::config::PatchSpec {
            name: "inlet".into(),
            kind: crate::config::PatchKind::Inlet,
            triangle_ids: vec![10],
        };
        let topology = assemble(&nodes, &triangles, &[patch]).unwrap();
        let default = PreformProperties {
            thickness: 2.0e-3,
            porosity: 0.6,
            k1: 1.0e-10,
            alpha: 1.0,
            principal_direction: Vec3::new(1.0, 0.0, 0.0),
        };
        let assignments = assign_scalar(&topology, &default, &topology.patches).unwrap();
        let mesh = build(&topology, &assignments, Vec3::new(1.0, 0.0, 0.0), 0.05).unwrap();

        let states = vec![
            CellState { rho: 1.0, u: 0.0, v: 0.0, p: 1.35e5, gamma: 1.0 },
            CellState { rho: 0.9, u: 0.0, v: 0.0, p: 1.0e5, gamma: 0.0 },
        ];
        let gradients = vec![Vec2::zeros(); 2];
        let totals = accumulate(&mesh, &states, &gradients);
        assert_eq!(totals[0].mass, 0.0);
        assert_eq!(totals[0].volume_flux, 0.0);
    }

    #[test]
    fn inlet_boundary_never_allows_backflow_into_the_domain() {
        let mesh = two_cell_mesh();
        // Favorable gradient for outflow from the domain into the inlet
        // boundary (positive grad along the face normal) must clamp to
        // zero through-flux, not reverse the sign.
        let owner = &mesh.cells[0];
        let normal = Vec2::new(1.0, 0.0);
        let adverse_gradient = Vec2::new(1.0e7, 0.0);
        let v = darcy_inlet_velocity(owner, adverse_gradient, normal);
        let through = v.min(0.0);
        assert!(through <= 0.0);
    }

    #[test]
    fn darcy_inlet_velocity_projects_onto_the_face_normal_not_onto_1_1() {
        let mesh = two_cell_mesh();
        let owner = &mesh.cells[0];
        // A gradient with zero y-component drives flow purely along x. With
        // normal = (0, 1) the through-face velocity must vanish; summing the
        // raw Darcy components (the bug this regresses) would not.
        let gradient = Vec2::new(1.0e4, 0.0);
        let normal_y = Vec2::new(0.0, 1.0);
        assert_relative_eq!(darcy_inlet_velocity(owner, gradient, normal_y), 0.0, epsilon = 1e-12);

        let normal_x = Vec2::new(1.0, 0.0);
        let expected = -owner.k1 / owner.viscosity * gradient.x;
        assert_relative_eq!(darcy_inlet_velocity(owner, gradient, normal_x), expected, epsilon = 1e-12);
    }
}
