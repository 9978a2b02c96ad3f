//! Blocking clients for the query and sketch services of peer hosts.
//!
//! Every connection uses the configured remote timeout for connecting,
//! reading and writing, so a hung peer costs one leg at most that long.

use crate::config::KernelConfig;
use crate::error::{KernelError, Result, ResultExt};
use crate::graph::Graph;
use crate::net::wire::{
    read_message, write_message, QueryRequest, QueryResponse, SketchRequest, SketchResponse,
};
use crate::query::Query;
use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

fn connect(address: &str, timeout: Duration) -> Result<TcpStream> {
    let addrs = address
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}", address))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) => KernelError::Remote(format!("Failed to connect to {}: {}", address, e)),
        None => KernelError::Remote(format!("No addresses for {}", address)),
    })
}

/// A connection to a peer's query service. Several queries may be sent over
/// the same connection.
pub struct QueryClient {
    host: String,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl QueryClient {
    pub fn connect(config: &KernelConfig, host: &str) -> Result<Self> {
        let address = config.query_address(host);
        let stream = connect(&address, config.remote_timeout())?;
        let writer = stream.try_clone()?;
        tracing::debug!("Connected to query service of {} at {}", host, address);
        Ok(Self {
            host: host.to_string(),
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Run `query` on the peer and return its graph.
    pub fn query(&mut self, query: &Query, resolve_remote: bool) -> Result<Graph> {
        let line = query.to_line();
        write_message(
            &mut self.writer,
            &QueryRequest::Query {
                line: line.clone(),
                resolve_remote,
            },
        )?;

        match read_message(&mut self.reader)? {
            Some(QueryResponse::Graph { graph, error: None }) => Ok(graph),
            Some(QueryResponse::Graph {
                error: Some(message),
                ..
            }) => Err(KernelError::Remote(format!(
                "{} failed '{}': {}",
                self.host, line, message
            ))),
            None => Err(KernelError::Remote(format!(
                "{} closed the connection during '{}'",
                self.host, line
            ))),
        }
    }
}

/// One request/response exchange with a peer's sketch service.
pub fn sketch_call(
    config: &KernelConfig,
    host: &str,
    request: &SketchRequest,
) -> Result<SketchResponse> {
    let address = config.sketch_address(host);
    let stream = connect(&address, config.remote_timeout())?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    write_message(&mut writer, request)?;
    match read_message(&mut reader)? {
        Some(SketchResponse::Error { message }) => Err(KernelError::Remote(format!(
            "{} rejected sketch request: {}",
            host, message
        ))),
        Some(response) => Ok(response),
        None => Err(KernelError::Remote(format!(
            "{} closed the sketch connection without replying",
            host
        ))),
    }
}
