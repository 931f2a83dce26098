//! C2: per-cell local frames and the flattened-neighbor construction that
//! lets a 2-D finite-area scheme run on a non-planar shell.
//!
//! Storage follows the Design Note "Fixed-cap neighbor arrays": neighbor
//! records live in one flat `Vec<NeighborGeom>` with a per-cell
//! `(offset, count)` pair (CSR-style) rather than a rectangular,
//! sentinel-filled `N x 10` array. The 10-neighbor mesh-hygiene cap is still
//! enforced, but only as a `mesh::assemble` check.

use nalgebra::{Matrix2, Vector2, Vector3};

use crate::error::SimError;
use crate::mesh::{AssembledMesh, CellClass, Node};
use crate::properties::PreformAssignment;

pub type Vec3 = Vector3<f64>;
pub type Vec2 = Vector2<f64>;
pub type Mat2 = Matrix2<f64>;

/// A cell's orthonormal local frame (section 4.2). `theta` is the alignment angle
/// applied to the raw Gram-Schmidt basis; it is kept around because the
/// flattened inter-frame rotation `T` needs to reapply it to a second,
/// independently built basis (section 4.2's "apply the neighbor's own theta").
#[derive(Clone, Copy, Debug)]
pub struct LocalFrame {
    pub b1: Vec3,
    pub b2: Vec3,
    pub b3: Vec3,
    pub theta: f64,
}

/// One neighbor of a cell, with all geometry expressed in the flattened
/// configuration and the owning cell's local frame.
#[derive(Clone, Copy, Debug)]
pub struct NeighborGeom {
    pub neighbor_id: usize,
    /// Outward unit normal, 2-D, in the owner's local frame.
    pub normal: Vec2,
    /// Face area: averaged incident-cell thickness times edge length.
    pub area: f64,
    /// Vector from the owner's center to the flattened neighbor center.
    pub center_vec: Vec2,
    /// Maps a velocity expressed in the neighbor's local frame into the
    /// owner's local frame.
    pub rotation: Mat2,
}

/// A fully assembled cell: topology, local frame, and properties.
#[derive(Clone, Debug)]
pub struct Cell {
    pub nodes: [usize; 3],
    pub class: CellClass,
    pub center: Vec3,
    pub frame: LocalFrame,
    /// The cell's own three vertices, in its own local 2-D frame.
    pub planar_vertices: [Vec2; 3],
    /// Planar (2-D) triangle area.
    pub area: f64,
    pub thickness: f64,
    pub porosity: f64,
    /// First principal in-plane permeability [m^2].
    pub k1: f64,
    /// Second principal in-plane permeability [m^2] (`alpha * k1`).
    pub k2: f64,
    /// Principal permeability direction, projected into the local frame.
    pub principal_direction: Vec2,
    pub viscosity: f64,
    /// `area * thickness`.
    pub volume: f64,
    neighbor_offset: usize,
    neighbor_count: usize,
}

impl Cell {
    pub fn neighbor_range(&self) -> std::ops::Range<usize> {
        self.neighbor_offset..(self.neighbor_offset + self.neighbor_count)
    }
}

/// Output of C2+C3: nodes, fully geometrized cells, and the flat neighbor
/// array.
#[derive(Clone, Debug)]
pub struct GeometryMesh {
    pub nodes: Vec<Node>,
    pub cells: Vec<Cell>,
    pub neighbors: Vec<NeighborGeom>,
}

impl GeometryMesh {
    pub fn cell_neighbors(&self, cell_id: usize) -> &[NeighborGeom] {
        &self.neighbors[self.cells[cell_id].neighbor_range()]
    }
}

fn degenerate(reason: impl Into<String>) -> SimError {
    SimError::MeshDegenerate { reason: reason.into() }
}

/// Raw (pre-rotation) Gram-Schmidt basis from a canonical node triple,
/// section 4.2: `b1 = normalize(x2-x1)`, `b2` Gram-Schmidt-orthogonalized against
/// `x3-x1`, `b3 = b1 x b2`.
fn gram_schmidt_basis(p0: Vec3, p1: Vec3, p2: Vec3) -> Result<(Vec3, Vec3, Vec3), SimError> {
    let e1 = p1 - p0;
    let e2 = p2 - p0;
    if e1.norm() <= 0.0 {
        return Err(degenerate("zero-length edge in local frame construction"));
    }
    let b1 = e1.normalize();
    let e2_perp = e2 - b1 * b1.dot(&e2);
    if e2_perp.norm() <= 0.0 {
        return Err(degenerate("collinear triangle in local frame construction"));
    }
    let b2 = e2_perp.normalize();
    let b3 = b1.cross(&b2);
    Ok((b1, b2, b3))
}

/// theta = atan2 of the user reference direction's projected (y, x)
/// components in the raw `(b1, b2)` basis.
fn alignment_theta(b1: Vec3, b2: Vec3, reference_direction: Vec3) -> f64 {
    let rx = reference_direction.dot(&b1);
    let ry = reference_direction.dot(&b2);
    ry.atan2(rx)
}

fn rotate_basis(b1: Vec3, b2: Vec3, theta: f64) -> (Vec3, Vec3) {
    let (s, c) = theta.sin_cos();
    (c * b1 + s * b2, -s * b1 + c * b2)
}

fn build_local_frame(p0: Vec3, p1: Vec3, p2: Vec3, reference_direction: Vec3) -> Result<LocalFrame, SimError> {
    let (raw_b1, raw_b2, b3) = gram_schmidt_basis(p0, p1, p2)?;
    let theta = alignment_theta(raw_b1, raw_b2, reference_direction);
    let (b1, b2) = rotate_basis(raw_b1, raw_b2, theta);
    Ok(LocalFrame { b1, b2, b3, theta })
}

fn to_local2d(center: Vec3, b1: Vec3, b2: Vec3, point: Vec3) -> Vec2 {
    let d = point - center;
    Vec2::new(b1.dot(&d), b2.dot(&d))
}

/// Orthogonal projection of `point` onto the line through `line_point` with
/// unit direction `line_dir`.
fn foot_on_line(line_point: Vec2, line_dir: Vec2, point: Vec2) -> Vec2 {
    line_point + line_dir * line_dir.dot(&(point - line_point))
}

/// Reflects a point across the shared edge, out of the owner's own half of
/// the plane (the "flattening" fold, section 4.2). `dir` is the unit vector from
/// the owner's center to its own foot on the edge -- always well-defined
/// since a non-degenerate triangle's centroid never lies on an edge line.
fn flatten_point(edge_point: Vec2, edge_dir: Vec2, dir: Vec2, point2d: Vec2) -> Vec2 {
    let foot = foot_on_line(edge_point, edge_dir, point2d);
    let perpendicular_distance = (point2d - foot).norm();
    foot + dir * perpendicular_distance
}

struct OwnerEdgeFrame {
    edge_point: Vec2,
    edge_dir: Vec2,
    /// Unit vector from the owner's center (the local frame's origin)
    /// towards its own foot on the edge -- the outward normal.
    outward: Vec2,
}

fn owner_edge_frame(e_a2: Vec2, e_b2: Vec2) -> OwnerEdgeFrame {
    let edge_dir = (e_b2 - e_a2).normalize();
    let q0 = foot_on_line(e_a2, edge_dir, Vec2::zeros());
    let l1 = q0.norm();
    debug_assert!(l1 > 0.0, "a non-degenerate cell's centroid cannot lie on its own edge");
    let outward = if l1 > 0.0 { q0 / l1 } else { Vec2::new(-edge_dir.y, edge_dir.x) };
    OwnerEdgeFrame { edge_point: e_a2, edge_dir, outward }
}

/// Builds C2's geometry (and merges in C3's scalar property assignment)
/// from C1's topology.
pub fn build(
    topology: &AssembledMesh,
    assignments: &[PreformAssignment],
    reference_direction: Vec3,
    mu: f64,
) -> Result<GeometryMesh, SimError> {
    let n = topology.cells.len();
    let mut cells = Vec::with_capacity(n);

    for (cell_id, topo) in topology.cells.iter().enumerate() {
        let p0 = topology.nodes[topo.nodes[0]].position;
        let p1 = topology.nodes[topo.nodes[1]].position;
        let p2 = topology.nodes[topo.nodes[2]].position;
        let frame = build_local_frame(p0, p1, p2, reference_direction)?;
        let planar_vertices = [
            to_local2d(topo.center, frame.b1, frame.b2, p0),
            to_local2d(topo.center, frame.b1, frame.b2, p1),
            to_local2d(topo.center, frame.b1, frame.b2, p2),
        ];
        let area = 0.5 * (p1 - p0).cross(&(p2 - p0)).norm();

        let assignment = &assignments[cell_id];
        let principal_2d = Vec2::new(
            frame.b1.dot(&assignment.principal_direction_global),
            frame.b2.dot(&assignment.principal_direction_global),
        );
        let principal_direction = if principal_2d.norm() > 1e-12 {
            principal_2d.normalize()
        } else {
            log::warn!(
                "cell {cell_id}: principal direction has no in-plane component, defaulting to local x-axis"
            );
            Vec2::new(1.0, 0.0)
        };

        cells.push(Cell {
            nodes: topo.nodes,
            class: assignment.class,
            center: topo.center,
            frame,
            planar_vertices,
            area,
            thickness: assignment.thickness,
            porosity: assignment.porosity,
            k1: assignment.k1,
            k2: assignment.k2,
            principal_direction,
            viscosity: mu,
            volume: area * assignment.thickness,
            neighbor_offset: 0,
            neighbor_count: 0,
        });
    }

    let mut neighbors = Vec::new();
    for cell_id in 0..n {
        let offset = neighbors.len();
        let topo_neighbors = &topology.cells[cell_id].neighbors;
        for &(neighbor_id, (na, nb)) in topo_neighbors {
            let owner = &cells[cell_id];
            let neighbor = &cells[neighbor_id];

            let p_a = topology.nodes[na].position;
            let p_b = topology.nodes[nb].position;
            let e_a2 = to_local2d(owner.center, owner.frame.b1, owner.frame.b2, p_a);
            let e_b2 = to_local2d(owner.center, owner.frame.b1, owner.frame.b2, p_b);
            let edge = owner_edge_frame(e_a2, e_b2);

            let neighbor_center_2d =
                to_local2d(owner.center, owner.frame.b1, owner.frame.b2, neighbor.center);
            let flat_center =
                flatten_point(edge.edge_point, edge.edge_dir, edge.outward, neighbor_center_2d);

            let edge_length = (e_b2 - e_a2).norm();
            let area = edge_length * 0.5 * (owner.thickness + neighbor.thickness);

            // Rebuild the neighbor's own canonical triple, flattened into
            // the owner's plane: shared-edge nodes keep their exact
            // positions; the third node is flattened the same way the
            // center was.
            let neighbor_topo_nodes = topology.cells[neighbor_id].nodes;
            let mut flat_triple = [Vec2::zeros(); 3];
            for (slot, &global_node) in flat_triple.iter_mut().zip(neighbor_topo_nodes.iter()) {
                *slot = if global_node == na {
                    e_a2
                } else if global_node == nb {
                    e_b2
                } else {
                    let p = topology.nodes[global_node].position;
                    let p2d = to_local2d(owner.center, owner.frame.b1, owner.frame.b2, p);
                    flatten_point(edge.edge_point, edge.edge_dir, edge.outward, p2d)
                };
            }

            // Embed the flattened 2-D triple back into owner's ambient 3-D
            // frame (z = 0 relative to the owner's plane) so the same
            // section-4.2 construction can run on it.
            let embed = |v: Vec2| owner.center + v.x * owner.frame.b1 + v.y * owner.frame.b2;
            let (raw_b1, raw_b2, _raw_b3) =
                gram_schmidt_basis(embed(flat_triple[0]), embed(flat_triple[1]), embed(flat_triple[2]))?;
            let (rb1, rb2) = rotate_basis(raw_b1, raw_b2, neighbor.frame.theta);
            let rotation = Mat2::from_columns(&[
                Vec2::new(rb1.dot(&owner.frame.b1), rb1.dot(&owner.frame.b2)),
                Vec2::new(rb2.dot(&owner.frame.b1), rb2.dot(&owner.frame.b2)),
            ]);

            neighbors.push(NeighborGeom {
                neighbor_id,
                normal: edge.outward,
                area,
                center_vec: flat_center,
                rotation,
            });
        }
        cells[cell_id].neighbor_offset = offset;
        cells[cell_id].neighbor_count = neighbors.len() - offset;
    }

    Ok(GeometryMesh {
        nodes: topology.nodes.clone(),
        cells,
        neighbors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatchKind;
    use crate::mesh::{assemble, RawNode, RawTriangle};
    use crate::properties::assign_scalar;
    use approx::assert_relative_eq;

    fn flat_square() -> GeometryMesh {
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
        let default = crate::config::PreformProperties {
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
    fn local_frame_is_orthonormal() {
        let mesh = flat_square();
        for cell in &mesh.cells {
            assert_relative_eq!(cell.frame.b1.norm(), 1.0, epsilon = 1e-10);
            assert_relative_eq!(cell.frame.b2.norm(), 1.0, epsilon = 1e-10);
            assert_relative_eq!(cell.frame.b3.norm(), 1.0, epsilon = 1e-10);
            assert!(cell.frame.b1.dot(&cell.frame.b2).abs() < 1e-10);
        }
    }

    #[test]
    fn volume_is_positive_and_matches_formula() {
        let mesh = flat_square();
        for cell in &mesh.cells {
            assert!(cell.volume > 0.0);
            assert_relative_eq!(cell.volume, cell.area * cell.thickness, epsilon = 1e-8);
        }
    }

    #[test]
    fn flattening_is_identity_on_an_already_planar_mesh() {
        // With a flat (coplanar) mesh the dihedral fold angle is zero, so
        // the flattened neighbor center must coincide with the neighbor's
        // true center expressed in the owner's local frame.
        let mesh = flat_square();
        for cell_id in 0..mesh.cells.len() {
            let owner = &mesh.cells[cell_id];
            for ng in mesh.cell_neighbors(cell_id) {
                let neighbor = &mesh.cells[ng.neighbor_id];
                let true_2d = to_local2d(owner.center, owner.frame.b1, owner.frame.b2, neighbor.center);
                assert_relative_eq!(ng.center_vec.x, true_2d.x, epsilon = 1e-8);
                assert_relative_eq!(ng.center_vec.y, true_2d.y, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn neighbor_face_area_uses_averaged_thickness() {
        let mesh = flat_square();
        for cell_id in 0..mesh.cells.len() {
            for ng in mesh.cell_neighbors(cell_id) {
                assert!(ng.area > 0.0);
            }
        }
    }

    #[test]
    fn patch_override_changes_class_and_is_visible_in_geometry() {
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
            name: "inlet".to_string(),
            kind: PatchKind::Inlet,
            triangle_ids: vec![10],
        };
        let topology = assemble(&nodes, &triangles, &[patch]).unwrap();
        let default = crate::config::PreformProperties {
            thickness: 2.0e-3,
            porosity: 0.6,
            k1: 1.0e-10,
            alpha: 1.0,
            principal_direction: Vec3::new(1.0, 0.0, 0.0),
        };
        let assignments = assign_scalar(&topology, &default, &topology.patches).unwrap();
        let mesh = build(&topology, &assignments, Vec3::new(1.0, 0.0, 0.0), 0.05).unwrap();
        assert_eq!(mesh.cells[0].class, CellClass::PressureInlet);
    }
}
