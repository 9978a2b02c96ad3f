//! Query evaluation.
//!
//! Every query first waits on the flush barrier so it observes everything
//! committed before it was issued. Graph results pass through the
//! transformer chain before they are returned.
//!
//! Lineage queries may be resolved across hosts: every network vertex in the
//! result whose remaining depth is positive is looked up on its remote host
//! and that host's lineage from the matching vertex is grafted on. Remote
//! results can reveal further network vertices; resolution repeats until none
//! are left unresolved.

use crate::backend::{Direction, Storage};
use crate::error::{KernelError, Result, ResultExt};
use crate::graph::Graph;
use crate::kernel::Kernel;
use crate::net::QueryClient;
use crate::query::{HostVertex, Query, QueryKind, VertexPredicate};
use crate::sketch::protocol;
use crate::types::Vertex;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Graph(Graph),
    PathExists(bool),
    SketchesRebuilt,
}

impl QueryResult {
    pub fn into_graph(self) -> Option<Graph> {
        match self {
            QueryResult::Graph(graph) => Some(graph),
            _ => None,
        }
    }
}

struct LineageRequest<'a> {
    storage: &'a str,
    depth: u32,
    direction: Direction,
    terminating: Option<&'a str>,
}

pub struct QueryEngine {
    kernel: Arc<Kernel>,
}

impl QueryEngine {
    pub fn new(kernel: Arc<Kernel>) -> Self {
        Self { kernel }
    }

    /// Evaluate `query`. With `resolve_remote`, lineage results are resolved
    /// across hosts.
    pub fn execute(&self, query: &Query, resolve_remote: bool) -> Result<QueryResult> {
        let entry = self.kernel.find_storage(&query.storage).ok_or_else(|| {
            KernelError::Query(format!("No storage named {}", query.storage))
        })?;
        self.kernel
            .flush_and_wait()
            .context("Flush before query")?;
        let storage = entry.storage();

        let graph = match &query.kind {
            QueryKind::Vertices { expression } => storage.get_vertices(expression)?,
            QueryKind::RemoteVertices { host, expression } => {
                if self.kernel.config().is_local_host(host) {
                    storage.get_vertices(expression)?
                } else {
                    let vertices = Query::new(
                        &query.storage,
                        QueryKind::Vertices {
                            expression: expression.clone(),
                        },
                    );
                    QueryClient::connect(self.kernel.config(), host)?.query(&vertices, false)?
                }
            }
            QueryKind::Lineage {
                vertex_id,
                depth,
                direction,
                terminating,
            } => {
                let request = LineageRequest {
                    storage: &query.storage,
                    depth: *depth,
                    direction: *direction,
                    terminating: terminating.as_deref(),
                };
                let local = storage.get_lineage(
                    vertex_id,
                    request.depth,
                    request.direction,
                    request.terminating,
                )?;
                if resolve_remote {
                    self.resolve_network(&request, local)
                } else {
                    local
                }
            }
            QueryKind::Paths {
                src,
                dst,
                max_length,
            } => storage.get_paths(src, dst, *max_length)?,
            QueryKind::RemotePaths {
                src,
                dst,
                max_length,
            } => self.remote_paths(&query.storage, storage, src, dst, *max_length)?,
            QueryKind::PathInSketch { src, dst } => {
                protocol::get_path_in_sketch(&self.kernel, storage, &query.storage, src, dst)?
            }
            QueryKind::PathExists { src, dst } => {
                let exists =
                    protocol::check_path_in_sketch(&self.kernel, storage, &query.storage, src, dst)?;
                return Ok(QueryResult::PathExists(exists));
            }
            QueryKind::RebuildSketches { level, max_level } => {
                protocol::notify_rebuild_sketches(&self.kernel, *level, *max_level);
                return Ok(QueryResult::SketchesRebuilt);
            }
        };

        Ok(QueryResult::Graph(self.kernel.transform(graph)))
    }

    /// Graft the remote lineage of every unresolved network vertex onto `graph`.
    fn resolve_network(&self, request: &LineageRequest<'_>, mut graph: Graph) -> Graph {
        let mut resolved: HashSet<String> = HashSet::new();

        loop {
            let mut pending: Vec<(Vertex, u32)> = graph
                .network_map()
                .iter()
                .filter(|(vertex, _)| !resolved.contains(&vertex.sketch_key()))
                .map(|(vertex, depth)| (vertex.clone(), *depth))
                .collect();
            if pending.is_empty() {
                break;
            }
            pending.sort();

            for (vertex, current) in pending {
                resolved.insert(vertex.sketch_key());
                let remaining = request.depth.saturating_sub(current);
                if remaining == 0 {
                    continue;
                }
                let Some(host) = vertex.remote_host() else {
                    tracing::debug!("Network vertex without remote host: {}", vertex);
                    continue;
                };
                if self.kernel.config().is_local_host(host) {
                    continue;
                }

                match self.remote_lineage(host, request, &vertex, remaining) {
                    Ok(mut remote) => {
                        tracing::debug!(
                            "Resolved {} on {}: {} vertices, {} edges",
                            vertex,
                            host,
                            remote.vertex_count(),
                            remote.edge_count()
                        );
                        remote.offset_network_depths(current);
                        graph.merge(remote);
                    }
                    Err(e) => tracing::warn!("Remote lineage on {} for {} failed: {}", host, vertex, e),
                }
            }
        }
        graph
    }

    /// Find the counterpart of `vertex` on `host` and fetch its lineage there.
    fn remote_lineage(
        &self,
        host: &str,
        request: &LineageRequest<'_>,
        vertex: &Vertex,
        remaining: u32,
    ) -> Result<Graph> {
        let mut client = QueryClient::connect(self.kernel.config(), host)?;

        let lookup = Query::new(
            request.storage,
            QueryKind::Vertices {
                expression: VertexPredicate::expression_for(&vertex.boundary_identity()),
            },
        );
        let found = client.query(&lookup, false)?;
        let Some(start) = found
            .sorted_vertices()
            .into_iter()
            .find_map(|v| v.storage_id().map(str::to_string))
        else {
            tracing::debug!("No counterpart of {} on {}", vertex, host);
            return Ok(Graph::new());
        };

        let lineage = Query::new(
            request.storage,
            QueryKind::Lineage {
                vertex_id: start,
                depth: remaining,
                direction: request.direction,
                terminating: request.terminating.map(str::to_string),
            },
        );
        client.query(&lineage, false)
    }

    /// Paths between vertices on possibly different hosts.
    ///
    /// Across hosts this is the overlap of the source's ancestors and the
    /// destination's descendants, each fetched from its own host and resolved
    /// across the network.
    fn remote_paths(
        &self,
        storage_name: &str,
        storage: &dyn Storage,
        src: &HostVertex,
        dst: &HostVertex,
        max_length: u32,
    ) -> Result<Graph> {
        let config = self.kernel.config();
        if config.is_local_host(&src.host) && config.is_local_host(&dst.host) {
            return storage.get_paths(&src.id, &dst.id, max_length);
        }

        let src_graph = self.endpoint_lineage(storage_name, storage, src, max_length, Direction::Ancestors);
        let dst_graph =
            self.endpoint_lineage(storage_name, storage, dst, max_length, Direction::Descendants);
        Ok(Graph::intersection(&src_graph, &dst_graph))
    }

    fn endpoint_lineage(
        &self,
        storage_name: &str,
        storage: &dyn Storage,
        endpoint: &HostVertex,
        depth: u32,
        direction: Direction,
    ) -> Graph {
        let request = LineageRequest {
            storage: storage_name,
            depth,
            direction,
            terminating: None,
        };

        let outcome = if self.kernel.config().is_local_host(&endpoint.host) {
            storage
                .get_lineage(&endpoint.id, depth, direction, None)
                .map(|local| self.resolve_network(&request, local))
        } else {
            let lineage = Query::new(
                storage_name,
                QueryKind::Lineage {
                    vertex_id: endpoint.id.clone(),
                    depth,
                    direction,
                    terminating: None,
                },
            );
            QueryClient::connect(self.kernel.config(), &endpoint.host)
                .and_then(|mut client| client.query(&lineage, true))
        };

        outcome.unwrap_or_else(|e| {
            tracing::warn!("Lineage of {} ({}) failed: {}", endpoint, direction, e);
            Graph::new()
        })
    }
}
