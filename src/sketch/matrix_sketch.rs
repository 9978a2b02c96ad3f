//! Bloom-filter reachability sketch.
//!
//! Observes every committed element and keeps the child → parent structure of
//! the local graph. For each network vertex N the matrix holds a filter with
//! the sketch key of every network vertex that descends from N, N included.
//! The matrix is rebuilt lazily when read after new edges arrive.

use crate::sketch::bloom::MatrixFilter;
use crate::sketch::Sketch;
use crate::types::{Edge, Vertex};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Default)]
pub struct MatrixSketch {
    /// identity string → sketch key, for network vertices
    network: HashMap<String, String>,
    /// parent identity → child identities
    children: HashMap<String, HashSet<String>>,
    matrix: MatrixFilter,
    dirty: bool,
}

impl MatrixSketch {
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&mut self, vertex: &Vertex) -> String {
        let key = vertex.identity().to_string();
        if vertex.is_network() && !self.network.contains_key(&key) {
            self.network.insert(key.clone(), vertex.sketch_key());
            self.dirty = true;
        }
        key
    }

    fn rebuild(&mut self) {
        let mut matrix = MatrixFilter::new();
        for (start, start_key) in &self.network {
            let mut seen = HashSet::from([start.as_str()]);
            let mut queue = VecDeque::from([start.as_str()]);
            while let Some(current) = queue.pop_front() {
                if let Some(sketch_key) = self.network.get(current) {
                    matrix.add(start_key, sketch_key);
                }
                for child in self.children.get(current).into_iter().flatten() {
                    if seen.insert(child.as_str()) {
                        queue.push_back(child.as_str());
                    }
                }
            }
        }
        self.matrix = matrix;
        self.dirty = false;
    }
}

impl Sketch for MatrixSketch {
    fn put_vertex(&mut self, vertex: &Vertex) {
        self.observe(vertex);
    }

    fn put_edge(&mut self, edge: &Edge) {
        let child = self.observe(&edge.child);
        let parent = self.observe(&edge.parent);
        if self.children.entry(parent).or_default().insert(child) {
            self.dirty = true;
        }
    }

    fn matrix_filter(&mut self) -> MatrixFilter {
        if self.dirty {
            self.rebuild();
        }
        self.matrix.clone()
    }
}
