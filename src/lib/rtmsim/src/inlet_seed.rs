//! C7: geometric inlet-port selection from seed points (section 4.7).
//!
//! No direct teacher analogue -- `sergeyfarin-ressim` places wells by grid
//! index, never by geometric proximity -- so this follows spec.md §4.7
//! directly: for each seed, grow the search radius by 1.1x until at least
//! one cell falls within it, then union every matched cell across every
//! seed into one inlet patch.
//!
//! This runs on cell centers alone, not a full `GeometryMesh`: per the
//! system data flow (section 2), C7 must feed C3 (property assignment),
//! which in turn must complete before C2 (geometry build) can compute
//! per-cell thickness for face areas. `mesh::CellTopology::center` is
//! already available straight out of C1, so this operates on that instead
//! of waiting for local frames that haven't been built yet.

use crate::geometry::Vec3;

/// Radius growth factor applied per retry when a seed matches no cell.
const RADIUS_GROWTH: f64 = 1.1;

/// Resolves a set of 3-D seed points into the cell ids that should become
/// one inlet patch. `centers` is indexed by cell id (as produced by C1).
/// Each seed independently grows its search radius until it matches at
/// least one cell; the returned set is deduplicated and sorted for
/// deterministic downstream patch application.
pub fn resolve(centers: &[Vec3], seeds: &[Vec3], initial_radius: f64) -> Vec<usize> {
    let mut matched = std::collections::BTreeSet::new();
    for &seed in seeds {
        for cell_id in cells_within_growing_radius(centers, seed, initial_radius) {
            matched.insert(cell_id);
        }
    }
    matched.into_iter().collect()
}

/// Cells within `radius` of `seed`, growing `radius` by 1.1x per empty
/// retry until at least one cell matches.
fn cells_within_growing_radius(centers: &[Vec3], seed: Vec3, initial_radius: f64) -> Vec<usize> {
    let mut radius = initial_radius;
    loop {
        let hits: Vec<usize> = centers
            .iter()
            .enumerate()
            .filter(|(_, &center)| (center - seed).norm() <= radius)
            .map(|(id, _)| id)
            .collect();
        if !hits.is_empty() {
            return hits;
        }
        log::debug!("inlet seed at {seed:?} matched no cell within radius {radius}, growing");
        radius *= RADIUS_GROWTH;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{assemble, RawNode, RawTriangle};

    fn grid_centers() -> Vec<Vec3> {
        // A 2x2 unit-square grid of triangle pairs, centers roughly at
        // (0.33,0.33), (0.66,0.66), etc. -- enough spread to exercise radius
        // growth for an off-mesh seed.
        let mut nodes = Vec::new();
        for j in 0..=2 {
            for i in 0..=2 {
                nodes.push(RawNode {
                    external_id: (j * 3 + i) as u64,
                    x: i as f64,
                    y: j as f64,
                    z: 0.0,
                });
            }
        }
        let mut triangles = Vec::new();
        let mut tid = 0u64;
        for j in 0..2 {
            for i in 0..2 {
                let bl = (j * 3 + i) as u64;
                let br = bl + 1;
                let tl = bl + 3;
                let tr = tl + 1;
                triangles.push(RawTriangle { external_id: tid, node_ids: [bl, br, tr] });
                tid += 1;
                triangles.push(RawTriangle { external_id: tid, node_ids: [bl, tr, tl] });
                tid += 1;
            }
        }
        let topology = assemble(&nodes, &triangles, &[]).unwrap();
        topology.cells.iter().map(|c| c.center).collect()
    }

    #[test]
    fn seed_on_a_cell_center_matches_immediately() {
        let centers = grid_centers();
        let matched = resolve(&centers, &[centers[0]], 1.0e-6);
        assert!(matched.contains(&0));
    }

    #[test]
    fn far_seed_grows_radius_until_nonempty() {
        let centers = grid_centers();
        // A seed well outside the mesh bounding box: the initial radius
        // (tiny) matches nothing, forcing several growth iterations before
        // the nearest cell falls in range.
        let far_seed = Vec3::new(100.0, 100.0, 0.0);
        let matched = resolve(&centers, &[far_seed], 1.0e-3);
        assert!(!matched.is_empty());
    }

    #[test]
    fn multiple_seeds_union_into_one_deduplicated_patch() {
        let centers = grid_centers();
        let c0 = centers[0];
        let c1 = centers[1];
        let matched = resolve(&centers, &[c0, c0, c1], 1.0e-6);
        assert!(matched.contains(&0));
        assert!(matched.contains(&1));
        // `c0` was listed twice; the result must still be deduplicated.
        let unique: std::collections::BTreeSet<_> = matched.iter().collect();
        assert_eq!(unique.len(), matched.len());
    }
}
