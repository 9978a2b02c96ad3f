//! Fixed chain terminators.
//!
//! - [`CommitStage`] ends the filter chain: every storage, then every sketch.
//! - [`ResultStage`] ends the transformer chain: the query's result graph.

use crate::backend::StorageEntry;
use crate::graph::Graph;
use crate::pipeline::filter::Forward;
use crate::sketch::SketchEntry;
use crate::types::{Edge, Vertex};
use std::sync::Arc;

/// Commits elements to the active storages and mirrors them to sketches.
///
/// Storage counters move only when the storage reports success; sketches see
/// every element regardless.
pub struct CommitStage<'a> {
    storages: &'a [Arc<StorageEntry>],
    sketches: &'a mut [SketchEntry],
}

impl<'a> CommitStage<'a> {
    pub fn new(storages: &'a [Arc<StorageEntry>], sketches: &'a mut [SketchEntry]) -> Self {
        Self { storages, sketches }
    }
}

impl Forward for CommitStage<'_> {
    fn put_vertex(&mut self, vertex: Vertex) {
        for storage in self.storages {
            storage.commit_vertex(&vertex);
        }
        for sketch in self.sketches.iter_mut() {
            sketch.sketch.put_vertex(&vertex);
        }
    }

    fn put_edge(&mut self, edge: Edge) {
        for storage in self.storages {
            storage.commit_edge(&edge);
        }
        for sketch in self.sketches.iter_mut() {
            sketch.sketch.put_edge(&edge);
        }
    }
}

/// Commits elements into a result graph.
pub struct ResultStage<'a> {
    graph: &'a mut Graph,
}

impl<'a> ResultStage<'a> {
    pub fn new(graph: &'a mut Graph) -> Self {
        Self { graph }
    }
}

impl Forward for ResultStage<'_> {
    fn put_vertex(&mut self, vertex: Vertex) {
        self.graph.put_vertex(vertex);
    }

    fn put_edge(&mut self, edge: Edge) {
        self.graph.put_edge(edge);
    }
}
