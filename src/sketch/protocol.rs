//! Cross-host sketch exchange.
//!
//! Sketch tables flood upstream: a host sends its table (remote sketches plus
//! its own) to the hosts its network artifacts were generated for, one level
//! per hop, until `max_level` is reached. A rebuild notification walks the
//! other way, decrementing the level until it reaches 0, where propagation
//! starts.
//!
//! Path checks treat every filter as "network vertices downstream of this
//! one". The aggregate for a destination set is the closure over all known
//! matrices: any key already covered pulls in its own filter. This makes the
//! check independent of how many hosts sit between the endpoints.
//!
//! Remote legs that fail are logged and skipped.

use crate::backend::Storage;
use crate::error::{KernelError, Result};
use crate::graph::Graph;
use crate::kernel::Kernel;
use crate::net::{sketch_call, QueryClient, SketchRequest, SketchResponse};
use crate::query::{HostVertex, Query, QueryKind};
use crate::sketch::{BloomFilter, MatrixFilter, SketchPayload};
use crate::types::{Vertex, NETWORK_TYPE, TYPE, USED, WAS_GENERATED_BY};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Keys reachable from a start set, exact for the start keys and
/// conservative for the rest.
struct Reach {
    keys: HashSet<String>,
    filter: Option<BloomFilter>,
}

impl Reach {
    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key) || self.filter.as_ref().is_some_and(|f| f.contains(key))
    }

    fn absorb(&mut self, filter: &BloomFilter) {
        match &mut self.filter {
            Some(aggregate) => {
                if let Err(e) = aggregate.union_with(filter) {
                    tracing::warn!("Skipping filter in aggregate: {}", e);
                }
            }
            None => self.filter = Some(filter.clone()),
        }
    }
}

/// Close `start` over every filter in `matrices`.
fn reach(matrices: &[&MatrixFilter], start: impl IntoIterator<Item = String>) -> Reach {
    let mut reach = Reach {
        keys: start.into_iter().collect(),
        filter: None,
    };
    let mut absorbed: HashSet<(usize, &str)> = HashSet::new();

    loop {
        let mut grew = false;
        for (index, matrix) in matrices.iter().enumerate() {
            for (key, filter) in matrix.iter() {
                if absorbed.contains(&(index, key)) || !reach.contains(key) {
                    continue;
                }
                absorbed.insert((index, key));
                reach.absorb(filter);
                grew = true;
            }
        }
        if !grew {
            return reach;
        }
    }
}

fn expression(key: &str, value: &str) -> String {
    format!("{}:{}", key, value)
}

/// Remote hosts of network vertices at the ends of matching edges.
fn neighbour_hosts(
    kernel: &Kernel,
    child: Option<&str>,
    parent: Option<&str>,
    edge: &str,
) -> BTreeSet<String> {
    let Some(entry) = kernel.first_storage() else {
        return BTreeSet::new();
    };
    let edges = match entry.storage().get_edges(child, parent, Some(edge)) {
        Ok(graph) => graph,
        Err(e) => {
            tracing::warn!("Neighbour lookup on {} failed: {}", entry.name, e);
            return BTreeSet::new();
        }
    };

    edges
        .edges()
        .iter()
        .flat_map(|e| [&e.child, &e.parent])
        .filter(|v| v.is_network())
        .filter_map(|v| v.remote_host())
        .filter(|host| !kernel.config().is_local_host(host))
        .map(str::to_string)
        .collect()
}

/// Send this host's sketch table one level further upstream.
pub fn propagate_sketches(kernel: &Kernel, level: u32, max_level: u32) {
    if level >= max_level {
        return;
    }
    let level = level + 1;
    let network = expression(TYPE, NETWORK_TYPE);
    let generated = expression(TYPE, WAS_GENERATED_BY);
    let hosts = neighbour_hosts(kernel, Some(&network), None, &generated);
    if hosts.is_empty() {
        return;
    }

    let table = kernel.sketch_table();
    for host in hosts {
        tracing::debug!("Propagating {} sketches to {} (level {})", table.len(), host, level);
        let request = SketchRequest::PropagateSketches {
            level,
            max_level,
            table: table.clone(),
        };
        if let Err(e) = sketch_call(kernel.config(), &host, &request) {
            tracing::warn!("Sketch propagation to {} failed: {}", host, e);
        }
    }
}

/// Merge a propagated table and continue the flood.
pub fn receive_sketches(
    kernel: &Kernel,
    level: u32,
    max_level: u32,
    table: HashMap<String, SketchPayload>,
) {
    let table: HashMap<_, _> = table
        .into_iter()
        .filter(|(host, _)| !kernel.config().is_local_host(host))
        .collect();
    tracing::debug!("Received {} sketches at level {}", table.len(), level);
    kernel.merge_remote_sketches(table);
    propagate_sketches(kernel, level, max_level);
}

/// Walk downstream decrementing `level`; propagation starts where it hits 0.
pub fn notify_rebuild_sketches(kernel: &Kernel, level: u32, max_level: u32) {
    if level == 0 {
        propagate_sketches(kernel, 0, max_level);
        return;
    }
    let level = level - 1;
    let network = expression(TYPE, NETWORK_TYPE);
    let used = expression(TYPE, USED);
    for host in neighbour_hosts(kernel, None, Some(&network), &used) {
        let request = SketchRequest::NotifyRebuildSketches { level, max_level };
        if let Err(e) = sketch_call(kernel.config(), &host, &request) {
            tracing::warn!("Rebuild notification to {} failed: {}", host, e);
        }
    }
}

/// Ask `host` for its sketch and sketch table.
pub fn fetch_sketch(
    kernel: &Kernel,
    host: &str,
) -> Result<(Option<SketchPayload>, HashMap<String, SketchPayload>)> {
    match sketch_call(kernel.config(), host, &SketchRequest::GiveSketch)? {
        SketchResponse::SketchTable { sketch, table } => Ok((sketch, table)),
        other => Err(KernelError::Protocol(format!(
            "Unexpected reply to giveSketch: {:?}",
            other
        ))),
    }
}

/// Runs the two lookups endpoint resolution needs, locally or on a peer.
trait EndpointSource {
    fn run(&mut self, query: &Query) -> Result<Graph>;
}

struct LocalSource<'a>(&'a dyn Storage);

impl EndpointSource for LocalSource<'_> {
    fn run(&mut self, query: &Query) -> Result<Graph> {
        match &query.kind {
            QueryKind::Vertices { expression } => self.0.get_vertices(expression),
            QueryKind::Paths {
                src,
                dst,
                max_length,
            } => self.0.get_paths(src, dst, *max_length),
            other => Err(KernelError::Query(format!(
                "Unsupported endpoint lookup {}",
                other.keyword()
            ))),
        }
    }
}

impl EndpointSource for QueryClient {
    fn run(&mut self, query: &Query) -> Result<Graph> {
        self.query(query, false)
    }
}

/// Which side of a path an endpoint is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    /// Network vertices the endpoint has a path to.
    Source,
    /// Network vertices with a path to the endpoint.
    Destination,
}

/// Network vertices on the endpoint's host connected to it by a bounded path.
fn endpoint_network_vertices(
    kernel: &Kernel,
    storage: &dyn Storage,
    storage_name: &str,
    endpoint: &HostVertex,
    side: Side,
) -> Vec<Vertex> {
    let max_length = kernel.config().path_max_length;
    let lookup = |source: &mut dyn EndpointSource| -> Result<Vec<Vertex>> {
        let network = source.run(&Query::new(
            storage_name,
            QueryKind::Vertices {
                expression: expression(TYPE, NETWORK_TYPE),
            },
        ))?;

        let mut connected = Vec::new();
        for vertex in network.sorted_vertices() {
            let Some(id) = vertex.storage_id() else {
                continue;
            };
            let (src, dst) = match side {
                Side::Source => (endpoint.id.clone(), id.to_string()),
                Side::Destination => (id.to_string(), endpoint.id.clone()),
            };
            let paths = source.run(&Query::new(
                storage_name,
                QueryKind::Paths {
                    src,
                    dst,
                    max_length,
                },
            ))?;
            if !paths.edges().is_empty() {
                connected.push(vertex.clone());
            }
        }
        Ok(connected)
    };

    let outcome = if kernel.config().is_local_host(&endpoint.host) {
        lookup(&mut LocalSource(storage))
    } else {
        QueryClient::connect(kernel.config(), &endpoint.host)
            .and_then(|mut client| lookup(&mut client))
    };

    outcome.unwrap_or_else(|e| {
        tracing::warn!("Network vertices of {} unavailable: {}", endpoint, e);
        Vec::new()
    })
}

fn keys(vertices: &[Vertex]) -> Vec<String> {
    vertices.iter().map(Vertex::sketch_key).collect()
}

/// Whether the sketches admit a path from `src` to `dst`.
///
/// False negatives are impossible for sketches that are current; false
/// positives are possible.
pub fn check_path_in_sketch(
    kernel: &Kernel,
    storage: &dyn Storage,
    storage_name: &str,
    src: &HostVertex,
    dst: &HostVertex,
) -> Result<bool> {
    let src_vertices = endpoint_network_vertices(kernel, storage, storage_name, src, Side::Source);
    let dst_vertices =
        endpoint_network_vertices(kernel, storage, storage_name, dst, Side::Destination);
    if src_vertices.is_empty() || dst_vertices.is_empty() {
        return Ok(false);
    }

    let table = kernel.sketch_table();
    let matrices: Vec<&MatrixFilter> = table.values().map(|s| &s.matrix).collect();
    let aggregate = reach(&matrices, keys(&dst_vertices));
    let exists = keys(&src_vertices).iter().any(|k| aggregate.contains(k));
    tracing::debug!("Path {} -> {} in sketch: {}", src, dst, exists);
    Ok(exists)
}

/// Collect path fragments from every host whose sketch table claims to
/// reach the source side.
pub fn get_path_in_sketch(
    kernel: &Kernel,
    storage: &dyn Storage,
    storage_name: &str,
    src: &HostVertex,
    dst: &HostVertex,
) -> Result<Graph> {
    let src_vertices = endpoint_network_vertices(kernel, storage, storage_name, src, Side::Source);
    let dst_vertices =
        endpoint_network_vertices(kernel, storage, storage_name, dst, Side::Destination);
    let src_keys = keys(&src_vertices);

    let mut request = kernel.local_sketch().unwrap_or_default();
    request.src_vertices = src_vertices;
    request.dst_vertices = dst_vertices;

    let claims_source = |sketch: &SketchPayload| {
        sketch
            .matrix
            .all_filters()
            .is_some_and(|all| src_keys.iter().any(|k| all.contains(k)))
    };

    let mut result = Graph::new();
    for (host, sketch) in kernel.remote_sketches() {
        if kernel.config().is_local_host(&host) || !claims_source(&sketch) {
            continue;
        }
        let call = SketchRequest::PathFragment {
            sketch: request.clone(),
        };
        match sketch_call(kernel.config(), &host, &call) {
            Ok(SketchResponse::Graph { graph }) => {
                tracing::debug!("Fragment from {}: {} edges", host, graph.edge_count());
                result.merge(graph);
            }
            Ok(other) => tracing::warn!("Unexpected fragment reply from {}: {:?}", host, other),
            Err(e) => tracing::warn!("Path fragment from {} failed: {}", host, e),
        }
    }

    if kernel.local_sketch().is_some_and(|local| claims_source(&local)) {
        result.merge(path_fragment(kernel, &request)?);
    }
    Ok(result)
}

/// This host's contribution to a path between the requester's endpoints.
///
/// Candidates are local network vertices reachable from the destination set
/// and reaching the source set; every ordered pair of candidates is joined by
/// a bounded path query.
pub fn path_fragment(kernel: &Kernel, request: &SketchPayload) -> Result<Graph> {
    let Some(entry) = kernel.first_storage() else {
        return Ok(Graph::new());
    };
    if let Err(e) = kernel.flush_and_wait() {
        tracing::warn!("Flush before path fragment failed: {}", e);
    }

    let storage = entry.storage();
    let network = storage.get_vertices(&expression(TYPE, NETWORK_TYPE))?;

    let table = kernel.sketch_table();
    let mut matrices: Vec<&MatrixFilter> = table.values().map(|s| &s.matrix).collect();
    matrices.push(&request.matrix);

    let src_keys = keys(&request.src_vertices);
    let down = reach(&matrices, keys(&request.dst_vertices));
    let candidates: Vec<&Vertex> = network
        .sorted_vertices()
        .into_iter()
        .filter(|vertex| {
            let key = vertex.sketch_key();
            if !down.contains(&key) {
                return false;
            }
            let up = reach(&matrices, [key]);
            src_keys.iter().any(|k| up.contains(k))
        })
        .collect();

    let max_length = kernel.config().path_max_length;
    let mut fragment = Graph::new();
    for from in &candidates {
        for to in &candidates {
            if from == to {
                continue;
            }
            let (Some(src), Some(dst)) = (from.storage_id(), to.storage_id()) else {
                continue;
            };
            match storage.get_paths(src, dst, max_length) {
                Ok(paths) if !paths.is_empty() => fragment.merge(paths),
                Ok(_) => {}
                Err(e) => tracing::warn!("Fragment paths {} -> {} failed: {}", src, dst, e),
            }
        }
    }
    tracing::debug!(
        "Path fragment: {} candidates, {} edges",
        candidates.len(),
        fragment.edge_count()
    );
    Ok(fragment)
}
