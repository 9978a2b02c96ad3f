//! In-memory storage backend.
//!
//! This is the reference implementation of [`Storage`]. Vertices are keyed by
//! their identity (annotations without host-local keys) and given a numeric
//! `storageId`; edges are kept in a list with child and parent adjacency.
//! Everything sits behind one `RwLock`, so every write is atomic with respect
//! to queries.
//!
//! ## Limitations
//!
//! - **No persistence**: the graph lives as long as the storage.
//! - **No indexes**: vertex and edge expressions do a full scan.

use crate::backend::storage::{Direction, Storage};
use crate::error::{KernelError, Result};
use crate::graph::Graph;
use crate::query::VertexPredicate;
use crate::types::{Edge, Vertex, STORAGE_ID};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

type VertexId = u64;

struct StoredEdge {
    annotations: BTreeMap<String, String>,
    child: VertexId,
    parent: VertexId,
}

#[derive(Default)]
struct GraphStore {
    ids: HashMap<Vertex, VertexId>,
    vertices: HashMap<VertexId, Vertex>,
    edges: Vec<StoredEdge>,
    edge_keys: HashSet<(VertexId, VertexId, BTreeMap<String, String>)>,
    /// vertex → indices of edges where it is the child
    up: HashMap<VertexId, Vec<usize>>,
    /// vertex → indices of edges where it is the parent
    down: HashMap<VertexId, Vec<usize>>,
    next_id: VertexId,
}

impl GraphStore {
    /// Id of the stored vertex, inserting it if new. Returns (id, inserted).
    fn intern(&mut self, vertex: &Vertex) -> (VertexId, bool) {
        let identity = vertex.identity();
        if let Some(id) = self.ids.get(&identity) {
            return (*id, false);
        }
        self.next_id += 1;
        let id = self.next_id;
        self.ids.insert(identity, id);
        let mut stored = vertex.clone();
        stored.remove(STORAGE_ID);
        self.vertices.insert(id, stored);
        (id, true)
    }

    /// A stored vertex as returned from queries.
    fn vertex(&self, id: VertexId) -> Option<Vertex> {
        self.vertices
            .get(&id)
            .map(|v| v.clone().with(STORAGE_ID, id.to_string()))
    }

    fn edge(&self, index: usize) -> Option<Edge> {
        let stored = self.edges.get(index)?;
        Some(Edge {
            annotations: stored.annotations.clone(),
            child: self.vertex(stored.child)?,
            parent: self.vertex(stored.parent)?,
        })
    }

    fn resolve(&self, vertex_id: &str) -> Result<VertexId> {
        let id: VertexId = vertex_id
            .trim()
            .parse()
            .map_err(|_| KernelError::Query(format!("Bad vertex id '{}'", vertex_id)))?;
        if self.vertices.contains_key(&id) {
            Ok(id)
        } else {
            Err(KernelError::Query(format!("No vertex with id {}", id)))
        }
    }

    /// Neighbouring (edge index, vertex) pairs one hop away.
    fn neighbours(&self, id: VertexId, upward: bool) -> Vec<(usize, VertexId)> {
        let index = if upward { &self.up } else { &self.down };
        index
            .get(&id)
            .map(|edges| {
                edges
                    .iter()
                    .map(|&e| {
                        let stored = &self.edges[e];
                        (e, if upward { stored.parent } else { stored.child })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Hop distances from `start`, bounded by `limit`.
    fn distances(&self, start: VertexId, upward: bool, limit: u32) -> HashMap<VertexId, u32> {
        let mut seen = HashMap::from([(start, 0u32)]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let d = seen[&current];
            if d >= limit {
                continue;
            }
            for (_, next) in self.neighbours(current, upward) {
                if !seen.contains_key(&next) {
                    seen.insert(next, d + 1);
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    fn lineage(
        &self,
        start: VertexId,
        depth: u32,
        upward: bool,
        terminating: Option<&VertexPredicate>,
        result: &mut Graph,
    ) {
        let mut seen = HashSet::from([start]);
        let mut frontier = vec![start];
        self.record(start, 0, result);

        for level in 1..=depth {
            let mut next_frontier = Vec::new();
            for current in frontier {
                for (edge, next) in self.neighbours(current, upward) {
                    if let Some(e) = self.edge(edge) {
                        result.put_edge(e);
                    }
                    if !seen.insert(next) {
                        continue;
                    }
                    self.record(next, level, result);
                    let stop = match (terminating, self.vertices.get(&next)) {
                        (Some(predicate), Some(vertex)) => predicate.matches(vertex),
                        _ => false,
                    };
                    if !stop {
                        next_frontier.push(next);
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
    }

    fn record(&self, id: VertexId, level: u32, result: &mut Graph) {
        if let Some(vertex) = self.vertex(id) {
            if vertex.is_network() {
                result.put_network_vertex(vertex.clone(), level);
            }
            result.put_vertex(vertex);
        }
    }
}

/// In-memory provenance graph.
#[derive(Default)]
pub struct MemoryStorage {
    store: RwLock<GraphStore>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn initialize(&mut self, args: &str) -> Result<()> {
        if !args.trim().is_empty() {
            tracing::debug!("Memory storage ignores arguments '{}'", args);
        }
        Ok(())
    }

    fn put_vertex(&self, vertex: &Vertex) -> bool {
        self.store.write().intern(vertex).1
    }

    fn put_edge(&self, edge: &Edge) -> bool {
        let mut store = self.store.write();
        let (child, _) = store.intern(&edge.child);
        let (parent, _) = store.intern(&edge.parent);
        if !store
            .edge_keys
            .insert((child, parent, edge.annotations.clone()))
        {
            return false;
        }
        let index = store.edges.len();
        store.edges.push(StoredEdge {
            annotations: edge.annotations.clone(),
            child,
            parent,
        });
        store.up.entry(child).or_default().push(index);
        store.down.entry(parent).or_default().push(index);
        true
    }

    fn get_vertices(&self, expression: &str) -> Result<Graph> {
        let predicate = VertexPredicate::parse(expression)?;
        let store = self.store.read();
        let mut result = Graph::new();
        for (id, vertex) in &store.vertices {
            if predicate.matches(vertex) {
                if let Some(v) = store.vertex(*id) {
                    result.put_vertex(v);
                }
            }
        }
        Ok(result)
    }

    fn get_lineage(
        &self,
        vertex_id: &str,
        depth: u32,
        direction: Direction,
        terminating: Option<&str>,
    ) -> Result<Graph> {
        let terminating = VertexPredicate::parse_optional(terminating)?;
        let store = self.store.read();
        let start = store.resolve(vertex_id)?;
        let mut result = Graph::new();
        if matches!(direction, Direction::Ancestors | Direction::Both) {
            store.lineage(start, depth, true, terminating.as_ref(), &mut result);
        }
        if matches!(direction, Direction::Descendants | Direction::Both) {
            store.lineage(start, depth, false, terminating.as_ref(), &mut result);
        }
        Ok(result)
    }

    fn get_paths(&self, src_id: &str, dst_id: &str, max_length: u32) -> Result<Graph> {
        let store = self.store.read();
        let src = store.resolve(src_id)?;
        let dst = store.resolve(dst_id)?;

        let from_src = store.distances(src, true, max_length);
        let to_dst = store.distances(dst, false, max_length);
        let mut result = Graph::new();
        if !from_src.contains_key(&dst) {
            return Ok(result);
        }

        for (index, edge) in store.edges.iter().enumerate() {
            let on_path = match (from_src.get(&edge.child), to_dst.get(&edge.parent)) {
                (Some(a), Some(b)) => a + 1 + b <= max_length,
                _ => false,
            };
            if on_path {
                if let Some(e) = store.edge(index) {
                    result.put_vertex(e.child.clone());
                    result.put_vertex(e.parent.clone());
                    result.put_edge(e);
                }
            }
        }
        if let Some(v) = store.vertex(src) {
            result.put_vertex(v);
        }
        Ok(result)
    }

    fn get_edges(
        &self,
        child: Option<&str>,
        parent: Option<&str>,
        edge: Option<&str>,
    ) -> Result<Graph> {
        let child = VertexPredicate::parse_optional(child)?;
        let parent = VertexPredicate::parse_optional(parent)?;
        let edge_filter = VertexPredicate::parse_optional(edge)?;
        let store = self.store.read();
        let mut result = Graph::new();

        for (index, stored) in store.edges.iter().enumerate() {
            let matches = |p: &Option<VertexPredicate>, id: VertexId| match p {
                Some(p) => store.vertices.get(&id).is_some_and(|v| p.matches(v)),
                None => true,
            };
            let edge_matches = edge_filter
                .as_ref()
                .map_or(true, |p| p.matches_annotations(&stored.annotations));
            if edge_matches && matches(&child, stored.child) && matches(&parent, stored.parent) {
                if let Some(e) = store.edge(index) {
                    result.put_vertex(e.child.clone());
                    result.put_vertex(e.parent.clone());
                    result.put_edge(e);
                }
            }
        }
        Ok(result)
    }

    fn flush_transactions(&self) -> Result<()> {
        tracing::trace!("Memory storage flush (writes are immediate)");
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let store = self.store.read();
        tracing::info!(
            "Memory storage closing with {} vertices and {} edges",
            store.vertices.len(),
            store.edges.len()
        );
        Ok(())
    }
}
