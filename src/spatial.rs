use crate::types::Boundary;
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::Point;
use rstar::{RTree, RTreeObject, AABB};

// Wrapper for RTree indexing
pub struct BoundaryEnvelope {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for BoundaryEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Boundaries plus an envelope index for point lookups.
pub struct BoundarySet {
    pub boundaries: Vec<Boundary>,
    tree: RTree<BoundaryEnvelope>,
}

impl BoundarySet {
    pub fn new(boundaries: Vec<Boundary>) -> Self {
        let items: Vec<BoundaryEnvelope> = boundaries
            .iter()
            .enumerate()
            .filter_map(|(index, boundary)| {
                // Empty geometries have no envelope and can never be hit.
                let rect = boundary.geometry.bounding_rect()?;
                Some(BoundaryEnvelope {
                    index,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        tracing::debug!("Indexed {} of {} boundaries", items.len(), boundaries.len());
        Self { boundaries, tree: RTree::bulk_load(items) }
    }

    /// Index of the boundary containing (lon, lat), if any.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<usize> {
        let point = Point::new(lon, lat);
        let envelope = AABB::from_point([lon, lat]);

        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|candidate| candidate.index)
            .find(|&i| self.boundaries[i].geometry.contains(&point))
    }

    pub fn get(&self, index: usize) -> Option<&Boundary> {
        self.boundaries.get(index)
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }
}
