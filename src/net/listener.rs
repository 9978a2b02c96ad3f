//! Accept loops for the query and sketch services.
//!
//! Each service binds one listener and hands every accepted connection to its
//! own handler thread. A handler serves requests until the peer closes the
//! connection or stays silent past the remote timeout. The accept loop polls
//! so it can notice shutdown.

use crate::error::{Result, ResultExt};
use crate::graph::Graph;
use crate::kernel::Kernel;
use crate::net::wire::{
    read_message, write_message, QueryRequest, QueryResponse, SketchRequest, SketchResponse,
};
use crate::query::{Query, QueryEngine, QueryResult};
use crate::sketch::protocol;
use std::io::{BufReader, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(25);

type Handler = fn(&Arc<Kernel>, TcpStream) -> Result<()>;

/// A running accept loop.
pub struct ServiceHandle {
    pub local_addr: SocketAddr,
    pub thread: JoinHandle<()>,
}

/// Bind the query service on the configured port.
pub fn spawn_query_service(kernel: Arc<Kernel>) -> Result<ServiceHandle> {
    let address = format!(
        "{}:{}",
        kernel.config().listen_address,
        kernel.config().query_port
    );
    spawn_service(kernel, &address, "query", serve_query)
}

/// Bind the sketch service on the configured port.
pub fn spawn_sketch_service(kernel: Arc<Kernel>) -> Result<ServiceHandle> {
    let address = format!(
        "{}:{}",
        kernel.config().listen_address,
        kernel.config().sketch_port
    );
    spawn_service(kernel, &address, "sketch", serve_sketch)
}

fn spawn_service(
    kernel: Arc<Kernel>,
    address: &str,
    service: &'static str,
    handler: Handler,
) -> Result<ServiceHandle> {
    let listener = TcpListener::bind(address)
        .with_context(|| format!("Failed to bind {} service on {}", service, address))?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    tracing::info!("{} service listening on {}", service, local_addr);

    let thread = std::thread::Builder::new()
        .name(format!("{}-accept", service))
        .spawn(move || accept_loop(kernel, listener, service, handler))?;

    Ok(ServiceHandle { local_addr, thread })
}

fn accept_loop(kernel: Arc<Kernel>, listener: TcpListener, service: &'static str, handler: Handler) {
    while !kernel.is_shutting_down() {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!("{} connection from {}", service, peer);
                let kernel = kernel.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("{}-conn", service))
                    .spawn(move || {
                        if let Err(e) = prepare_stream(&stream, kernel.config().remote_timeout()) {
                            tracing::warn!("{} connection from {}: {}", service, peer, e);
                            return;
                        }
                        if let Err(e) = handler(&kernel, stream) {
                            tracing::warn!("{} connection from {} failed: {}", service, peer, e);
                        }
                    });
                if let Err(e) = spawned {
                    tracing::error!("Failed to spawn {} handler: {}", service, e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                tracing::warn!("{} accept failed: {}", service, e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    tracing::info!("{} service stopped", service);
}

/// Blocking I/O with the remote timeout in both directions.
fn prepare_stream(stream: &TcpStream, timeout: Duration) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))
}

fn serve_query(kernel: &Arc<Kernel>, stream: TcpStream) -> Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let engine = QueryEngine::new(kernel.clone());

    while let Some(request) = read_message::<_, QueryRequest>(&mut reader)? {
        let QueryRequest::Query {
            line,
            resolve_remote,
        } = request;
        tracing::debug!("Remote query: {}", line);

        let outcome =
            Query::parse(&line, false).and_then(|query| engine.execute(&query, resolve_remote));
        let response = match outcome {
            Ok(QueryResult::Graph(graph)) => QueryResponse::Graph { graph, error: None },
            Ok(_) => QueryResponse::Graph {
                graph: Graph::new(),
                error: None,
            },
            Err(e) => {
                tracing::warn!("Remote query '{}' failed: {}", line, e);
                QueryResponse::Graph {
                    graph: Graph::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        write_message(&mut writer, &response)?;
    }
    Ok(())
}

fn serve_sketch(kernel: &Arc<Kernel>, stream: TcpStream) -> Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    while let Some(request) = read_message::<_, SketchRequest>(&mut reader)? {
        let response = match request {
            SketchRequest::GiveSketch => SketchResponse::SketchTable {
                sketch: kernel.local_sketch(),
                table: kernel.remote_sketches(),
            },
            SketchRequest::PathFragment { sketch } => match protocol::path_fragment(kernel, &sketch) {
                Ok(graph) => SketchResponse::Graph { graph },
                Err(e) => {
                    tracing::warn!("Path fragment failed: {}", e);
                    SketchResponse::Error {
                        message: e.to_string(),
                    }
                }
            },
            // Floods are acknowledged before they continue, so the sender's
            // timeout bounds one hop rather than the whole chain.
            SketchRequest::NotifyRebuildSketches { level, max_level } => {
                write_message(&mut writer, &SketchResponse::Ack)?;
                protocol::notify_rebuild_sketches(kernel, level, max_level);
                continue;
            }
            SketchRequest::PropagateSketches {
                level,
                max_level,
                table,
            } => {
                write_message(&mut writer, &SketchResponse::Ack)?;
                protocol::receive_sketches(kernel, level, max_level, table);
                continue;
            }
        };
        write_message(&mut writer, &response)?;
    }
    Ok(())
}
