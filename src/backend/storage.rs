//! Storage trait for provenance backends
//!
//! A storage accepts committed vertices and edges from the commit stage and
//! answers the queries the kernel delegates to it. Storages are shared between
//! the dispatch thread (writes, flushes) and query threads (reads), so every
//! method takes `&self` and implementations synchronize internally.

use crate::error::{KernelError, Result};
use crate::graph::Graph;
use crate::types::{Edge, Vertex};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Direction of a lineage traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow edges from child to parent
    Ancestors,
    /// Follow edges from parent to child
    Descendants,
    Both,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ancestors => "a",
            Direction::Descendants => "d",
            Direction::Both => "b",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "ancestors" => Ok(Direction::Ancestors),
            "d" | "descendants" => Ok(Direction::Descendants),
            "b" | "both" => Ok(Direction::Both),
            other => Err(KernelError::Query(format!("Unknown direction '{}'", other))),
        }
    }
}

/// Capability contract every storage backend satisfies.
pub trait Storage: Send + Sync {
    /// Prepare the backend. Called once, before the storage is shared.
    fn initialize(&mut self, args: &str) -> Result<()>;

    /// Commit a vertex. Returns true if it was stored.
    fn put_vertex(&self, vertex: &Vertex) -> bool;

    /// Commit an edge. Returns true if it was stored.
    fn put_edge(&self, edge: &Edge) -> bool;

    /// Vertices matching an `key:value AND ...` expression.
    fn get_vertices(&self, expression: &str) -> Result<Graph>;

    /// Lineage of a vertex up to `depth` hops.
    ///
    /// Traversal stops at vertices matching `terminating`. Network vertices
    /// reached are recorded in the result's network map with their depth.
    fn get_lineage(
        &self,
        vertex_id: &str,
        depth: u32,
        direction: Direction,
        terminating: Option<&str>,
    ) -> Result<Graph>;

    /// Paths from `src_id` to its ancestor `dst_id` no longer than `max_length`.
    fn get_paths(&self, src_id: &str, dst_id: &str, max_length: u32) -> Result<Graph>;

    /// Edges whose child, parent and edge annotations match the given expressions.
    /// `None` matches anything.
    fn get_edges(
        &self,
        child: Option<&str>,
        parent: Option<&str>,
        edge: Option<&str>,
    ) -> Result<Graph>;

    /// Commit any pending writes. Only called from the dispatch thread.
    fn flush_transactions(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources. No further calls follow.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// An active storage with its lifecycle metadata.
pub struct StorageEntry {
    pub name: String,
    pub args: String,
    storage: Box<dyn Storage>,
    vertex_count: AtomicU64,
    edge_count: AtomicU64,
}

impl StorageEntry {
    pub fn new(name: impl Into<String>, args: impl Into<String>, storage: Box<dyn Storage>) -> Self {
        Self {
            name: name.into(),
            args: args.into(),
            storage,
            vertex_count: AtomicU64::new(0),
            edge_count: AtomicU64::new(0),
        }
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Forward a vertex, counting it only if the storage accepted it.
    pub fn commit_vertex(&self, vertex: &Vertex) {
        if self.storage.put_vertex(vertex) {
            self.vertex_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Forward an edge, counting it only if the storage accepted it.
    pub fn commit_edge(&self, edge: &Edge) {
        if self.storage.put_edge(edge) {
            self.edge_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn vertex_count(&self) -> u64 {
        self.vertex_count.load(Ordering::Relaxed)
    }

    pub fn edge_count(&self) -> u64 {
        self.edge_count.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for StorageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEntry")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("vertex_count", &self.vertex_count())
            .field("edge_count", &self.edge_count())
            .finish()
    }
}
