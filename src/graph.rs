//! Result graphs
//!
//! A [`Graph`] is a set of vertices, a set of edges and a map recording the
//! depth at which each network-boundary vertex was reached while a lineage
//! query was evaluated. Graphs are built incrementally across one query or one
//! pipeline run and combined with [`Graph::union`] and [`Graph::intersection`].

use crate::error::{KernelError, Result, ResultExt};
use crate::types::{Edge, Vertex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    vertices: HashSet<Vertex>,
    #[serde(default)]
    edges: HashSet<Edge>,
    #[serde(default, with = "network_entries")]
    network: HashMap<Vertex, u32>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex. Returns false if it was already present.
    pub fn put_vertex(&mut self, vertex: Vertex) -> bool {
        self.vertices.insert(vertex)
    }

    /// Add an edge. Endpoints are not added to the vertex set.
    pub fn put_edge(&mut self, edge: Edge) -> bool {
        self.edges.insert(edge)
    }

    /// Record a network-boundary vertex reached at `depth`.
    ///
    /// The smallest depth seen for a vertex is kept.
    pub fn put_network_vertex(&mut self, vertex: Vertex, depth: u32) {
        self.network
            .entry(vertex)
            .and_modify(|d| *d = (*d).min(depth))
            .or_insert(depth);
    }

    pub fn vertices(&self) -> &HashSet<Vertex> {
        &self.vertices
    }

    pub fn edges(&self) -> &HashSet<Edge> {
        &self.edges
    }

    /// Network-boundary vertices and the depth they were reached at.
    pub fn network_map(&self) -> &HashMap<Vertex, u32> {
        &self.network
    }

    pub fn contains_vertex(&self, vertex: &Vertex) -> bool {
        self.vertices.contains(vertex)
    }

    pub fn contains_edge(&self, edge: &Edge) -> bool {
        self.edges.contains(edge)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.edges.is_empty()
    }

    /// Vertices in a stable order, for printing.
    pub fn sorted_vertices(&self) -> Vec<&Vertex> {
        let mut vertices: Vec<&Vertex> = self.vertices.iter().collect();
        vertices.sort();
        vertices
    }

    /// Merge `other` into this graph in place.
    pub fn merge(&mut self, other: Graph) {
        self.vertices.extend(other.vertices);
        self.edges.extend(other.edges);
        for (vertex, depth) in other.network {
            self.put_network_vertex(vertex, depth);
        }
    }

    /// Shift every network depth by `by`, as when a remote result is grafted
    /// onto a local one at that depth.
    pub fn offset_network_depths(&mut self, by: u32) {
        for depth in self.network.values_mut() {
            *depth = depth.saturating_add(by);
        }
    }

    /// Set union of vertices and edges; network depths merge keeping the minimum.
    pub fn union(a: &Graph, b: &Graph) -> Graph {
        let mut result = a.clone();
        result.merge(b.clone());
        result
    }

    /// Set intersection of vertices and edges.
    pub fn intersection(a: &Graph, b: &Graph) -> Graph {
        let vertices: HashSet<Vertex> = a.vertices.intersection(&b.vertices).cloned().collect();
        let edges = a.edges.intersection(&b.edges).cloned().collect();
        let mut network = HashMap::new();
        for (vertex, depth) in &a.network {
            if let Some(other) = b.network.get(vertex) {
                if vertices.contains(vertex) {
                    network.insert(vertex.clone(), (*depth).min(*other));
                }
            }
        }
        Graph {
            vertices,
            edges,
            network,
        }
    }

    /// Write the graph as pretty JSON.
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| KernelError::Serialization(format!("Failed to serialize graph: {}", e)))?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to export graph to {}", path.display()))
    }
}

/// JSON object keys must be strings, so the network map travels as a list.
mod network_entries {
    use crate::types::Vertex;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        vertex: Vertex,
        depth: u32,
    }

    pub fn serialize<S: Serializer>(
        map: &HashMap<Vertex, u32>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<Entry> = map
            .iter()
            .map(|(vertex, depth)| Entry {
                vertex: vertex.clone(),
                depth: *depth,
            })
            .collect();
        entries.sort_by(|a, b| a.vertex.cmp(&b.vertex));
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<Vertex, u32>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|e| (e.vertex, e.depth)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NETWORK_TYPE, TYPE};
    use proptest::prelude::*;

    fn vertex(id: u8) -> Vertex {
        Vertex::new().with("id", id.to_string())
    }

    fn graph_from(ids: &[u8], links: &[(u8, u8)]) -> Graph {
        let mut g = Graph::new();
        for id in ids {
            g.put_vertex(vertex(*id));
        }
        for (c, p) in links {
            g.put_edge(Edge::new(vertex(*c), vertex(*p)));
        }
        g
    }

    #[test]
    fn test_duplicates_collapse() {
        let mut g = Graph::new();
        assert!(g.put_vertex(vertex(1)));
        assert!(!g.put_vertex(vertex(1)));
        assert!(g.put_edge(Edge::new(vertex(1), vertex(2))));
        assert!(!g.put_edge(Edge::new(vertex(1), vertex(2))));
        assert_eq!(g.vertex_count(), 1);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_network_depth_keeps_minimum() {
        let net = Vertex::new().with(TYPE, NETWORK_TYPE);
        let mut a = Graph::new();
        a.put_network_vertex(net.clone(), 3);
        let mut b = Graph::new();
        b.put_network_vertex(net.clone(), 1);
        let u = Graph::union(&a, &b);
        assert_eq!(u.network_map().get(&net), Some(&1));
    }

    #[test]
    fn test_json_roundtrip_keeps_network_map() {
        let mut g = graph_from(&[1, 2], &[(1, 2)]);
        let net = Vertex::new().with(TYPE, NETWORK_TYPE).with("remote host", "b");
        g.put_vertex(net.clone());
        g.put_network_vertex(net, 2);
        let json = serde_json::to_string(&g).unwrap();
        let back: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }

    #[test]
    fn test_export_json_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.json");
        graph_from(&[1], &[]).export_json(&path).unwrap();
        let back: Graph = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.vertex_count(), 1);
    }

    fn arb_graph() -> impl Strategy<Value = Graph> {
        (
            proptest::collection::vec(0u8..12, 0..10),
            proptest::collection::vec((0u8..12, 0u8..12), 0..10),
        )
            .prop_map(|(ids, links)| graph_from(&ids, &links))
    }

    proptest! {
        #[test]
        fn union_is_set_union(a in arb_graph(), b in arb_graph()) {
            let u = Graph::union(&a, &b);
            let expected_v: HashSet<Vertex> = a.vertices().union(b.vertices()).cloned().collect();
            let expected_e: HashSet<Edge> = a.edges().union(b.edges()).cloned().collect();
            prop_assert_eq!(u.vertices(), &expected_v);
            prop_assert_eq!(u.edges(), &expected_e);
        }

        #[test]
        fn intersection_is_set_intersection(a in arb_graph(), b in arb_graph()) {
            let i = Graph::intersection(&a, &b);
            let expected_v: HashSet<Vertex> = a.vertices().intersection(b.vertices()).cloned().collect();
            let expected_e: HashSet<Edge> = a.edges().intersection(b.edges()).cloned().collect();
            prop_assert_eq!(i.vertices(), &expected_v);
            prop_assert_eq!(i.edges(), &expected_e);
        }

        #[test]
        fn union_and_intersection_commute(a in arb_graph(), b in arb_graph()) {
            prop_assert_eq!(Graph::union(&a, &b), Graph::union(&b, &a));
            prop_assert_eq!(Graph::intersection(&a, &b), Graph::intersection(&b, &a));
        }

        #[test]
        fn union_is_idempotent(a in arb_graph()) {
            prop_assert_eq!(Graph::union(&a, &a), a);
        }
    }
}
