//! Read-only street graph consumed by the candidate selector.
//!
//! Nodes carry geodetic positions; edges are pairs of node ids. The map also
//! exposes a normalisation origin (min longitude, min latitude) used for
//! planar projection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::TrackerError;
use crate::report::GeoPoint;

/// A vertex of the street graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreetNode {
    pub node_id: i64,
    pub position: GeoPoint,
}

/// An edge between two street nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Street {
    pub first: i64,
    pub second: i64,
}

/// Immutable street graph. Shared read-only via `Arc`.
#[derive(Debug, Clone)]
pub struct StreetMap {
    nodes: BTreeMap<i64, StreetNode>,
    edges: Vec<Street>,
    origin: (f64, f64),
}

impl StreetMap {
    /// Builds a map from nodes and edges. Every edge endpoint must name an
    /// existing node; positions must be in-domain.
    pub fn new(nodes: Vec<StreetNode>, edges: Vec<Street>) -> Result<Arc<Self>, TrackerError> {
        let mut by_id = BTreeMap::new();
        let mut origin = (f64::MAX, f64::MAX);
        for node in nodes {
            node.position.validate()?;
            origin.0 = origin.0.min(node.position.longitude());
            origin.1 = origin.1.min(node.position.latitude());
            by_id.insert(node.node_id, node);
        }
        if by_id.is_empty() {
            origin = (0.0, 0.0);
        }
        for edge in &edges {
            if !by_id.contains_key(&edge.first) || !by_id.contains_key(&edge.second) {
                return Err(TrackerError::bad_input(format!(
                    "street ({}, {}) references unknown node",
                    edge.first, edge.second
                )));
            }
        }
        Ok(Arc::new(StreetMap {
            nodes: by_id,
            edges,
            origin,
        }))
    }

    pub fn node(&self, node_id: i64) -> Option<&StreetNode> {
        self.nodes.get(&node_id)
    }

    /// Streets incident to the given node.
    pub fn streets_at(&self, node_id: i64) -> impl Iterator<Item = &Street> {
        self.edges
            .iter()
            .filter(move |s| s.first == node_id || s.second == node_id)
    }

    /// (min longitude, min latitude) over all nodes; the planar projection
    /// origin.
    pub fn normalization_origin(&self) -> (f64, f64) {
        self.origin
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, lon: f64, lat: f64) -> StreetNode {
        StreetNode {
            node_id: id,
            position: GeoPoint::new(lon, lat, 0.0).unwrap(),
        }
    }

    #[test]
    fn origin_is_min_lon_lat() {
        let map = StreetMap::new(
            vec![node(1, 10.0, 5.0), node(2, 8.0, 7.0)],
            vec![Street { first: 1, second: 2 }],
        )
        .unwrap();
        assert_eq!(map.normalization_origin(), (8.0, 5.0));
    }

    #[test]
    fn streets_at_filters_incident_edges() {
        let map = StreetMap::new(
            vec![node(1, 0.0, 0.0), node(2, 1.0, 0.0), node(3, 2.0, 0.0)],
            vec![
                Street { first: 1, second: 2 },
                Street { first: 2, second: 3 },
            ],
        )
        .unwrap();
        assert_eq!(map.streets_at(1).count(), 1);
        assert_eq!(map.streets_at(2).count(), 2);
    }

    #[test]
    fn rejects_dangling_edge() {
        let result = StreetMap::new(vec![node(1, 0.0, 0.0)], vec![Street { first: 1, second: 9 }]);
        assert!(result.is_err());
    }
}
