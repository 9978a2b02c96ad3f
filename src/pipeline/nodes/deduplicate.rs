//! Deduplicate: drops elements already forwarded once.
//!
//! Vertices and edges are compared by value, so a re-reported element with
//! identical annotations (and, for edges, identical endpoints) is dropped.

use crate::pipeline::filter::{Filter, Forward};
use crate::types::{Edge, Vertex};
use std::collections::HashSet;

#[derive(Default)]
pub struct Deduplicate {
    vertices: HashSet<Vertex>,
    edges: HashSet<Edge>,
}

impl Deduplicate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for Deduplicate {
    fn name(&self) -> &str {
        "Deduplicate"
    }

    fn put_vertex(&mut self, vertex: Vertex, next: &mut dyn Forward) {
        if self.vertices.insert(vertex.clone()) {
            next.put_vertex(vertex);
        }
    }

    fn put_edge(&mut self, edge: Edge, next: &mut dyn Forward) {
        if self.edges.insert(edge.clone()) {
            next.put_edge(edge);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::pipeline::filter::FilterChain;
    use crate::pipeline::stages::ResultStage;

    /// Counts what reaches the end of the chain.
    #[derive(Default)]
    struct Counter {
        vertices: usize,
        edges: usize,
    }

    impl Forward for Counter {
        fn put_vertex(&mut self, _vertex: Vertex) {
            self.vertices += 1;
        }
        fn put_edge(&mut self, _edge: Edge) {
            self.edges += 1;
        }
    }

    #[test]
    fn test_repeats_are_dropped() {
        let mut chain = FilterChain::new();
        chain.insert(0, Box::new(Deduplicate::new())).unwrap();
        let mut counter = Counter::default();
        {
            let mut head = chain.chain(&mut counter);
            let v = Vertex::new().with("pid", "1");
            head.put_vertex(v.clone());
            head.put_vertex(v.clone());
            head.put_edge(Edge::new(v.clone(), Vertex::new()));
            head.put_edge(Edge::new(v, Vertex::new()));
        }
        assert_eq!(counter.vertices, 1);
        assert_eq!(counter.edges, 1);
    }

    #[test]
    fn test_distinct_pass_through() {
        let mut chain = FilterChain::new();
        chain.insert(0, Box::new(Deduplicate::new())).unwrap();
        let mut graph = Graph::new();
        let mut result = ResultStage::new(&mut graph);
        let mut head = chain.chain(&mut result);
        head.put_vertex(Vertex::new().with("pid", "1"));
        head.put_vertex(Vertex::new().with("pid", "2"));
        drop(head);
        drop(result);
        assert_eq!(graph.vertex_count(), 2);
    }
}
