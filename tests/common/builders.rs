//! Test data builders for creating test objects

use super::mock_helpers::{RecordingStorage, ScriptedReporter, StorageCalls};
use super::test_timeout;
use provd::backend::Registry;
use provd::config::KernelConfig;
use provd::net::{spawn_query_service, spawn_sketch_service};
use provd::types::{Edge, Element, Vertex};
use provd::{Dispatcher, Kernel};
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

pub fn process(pid: &str) -> Vertex {
    Vertex::new().with("type", "Process").with("pid", pid)
}

pub fn artifact(path: &str) -> Vertex {
    Vertex::new().with("type", "Artifact").with("path", path)
}

/// One end of a connection. Both hosts build it from the same `connection`
/// and differ only in `remote host`.
pub fn network(connection: &str, remote_host: &str) -> Vertex {
    Vertex::new()
        .with("type", "Network")
        .with("connection", connection)
        .with("remote host", remote_host)
}

/// `process` read `artifact`.
pub fn used(process: &Vertex, artifact: &Vertex) -> Edge {
    Edge::new(process.clone(), artifact.clone()).with("type", "Used")
}

/// `artifact` was written by `process`.
pub fn generated(artifact: &Vertex, process: &Vertex) -> Edge {
    Edge::new(artifact.clone(), process.clone()).with("type", "WasGeneratedBy")
}

/// Vertices of `edges` followed by the edges themselves.
pub fn elements(edges: &[Edge]) -> Vec<Element> {
    let mut out: Vec<Element> = Vec::new();
    for edge in edges {
        for vertex in [&edge.child, &edge.parent] {
            let element = Element::Vertex(vertex.clone());
            if !out.contains(&element) {
                out.push(element);
            }
        }
    }
    out.extend(edges.iter().cloned().map(Element::Edge));
    out
}

/// Builder for test kernels with extra collaborators registered.
pub struct KernelBuilder {
    config: KernelConfig,
    registry: Registry,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            registry: Registry::with_builtins(),
        }
    }

    pub fn host_id(mut self, host_id: &str) -> Self {
        self.config.host_id = host_id.to_string();
        self
    }

    pub fn peer(mut self, host: &str, query: u16, sketch: u16) -> Self {
        self.config.peers.insert(
            host.to_string(),
            provd::config::PeerAddress {
                query: Some(format!("127.0.0.1:{}", query)),
                sketch: Some(format!("127.0.0.1:{}", sketch)),
            },
        );
        self
    }

    pub fn ports(mut self, query: u16, sketch: u16) -> Self {
        self.config.query_port = query;
        self.config.sketch_port = sketch;
        self
    }

    /// Register a reporter named `name` that replays `elements`.
    pub fn scripted_reporter(
        mut self,
        name: &str,
        elements: Vec<Element>,
        shut_down: Arc<AtomicBool>,
    ) -> Self {
        self.registry.register_reporter(name, move || {
            Box::new(ScriptedReporter::new(elements.clone()).with_flag(shut_down.clone()))
        });
        self
    }

    /// Register a storage named `name` reporting into `calls`.
    pub fn recording_storage(mut self, name: &str, calls: Arc<StorageCalls>) -> Self {
        self.registry
            .register_storage(name, move || Box::new(RecordingStorage::new(calls.clone())));
        self
    }

    pub fn build(self) -> Arc<Kernel> {
        Arc::new(Kernel::new(self.config, self.registry))
    }

    /// Build and start the dispatch loop.
    pub fn start(self) -> TestHost {
        let kernel = self.build();
        let dispatcher = Dispatcher::spawn(kernel.clone()).expect("spawn dispatcher");
        TestHost {
            kernel,
            dispatcher: Some(dispatcher),
            query_addr: None,
            sketch_addr: None,
        }
    }

    /// Build, start the dispatch loop and both remote services.
    pub fn start_with_services(self) -> TestHost {
        let mut host = self.start();
        let query = spawn_query_service(host.kernel.clone()).expect("query service");
        let sketch = spawn_sketch_service(host.kernel.clone()).expect("sketch service");
        host.query_addr = Some(query.local_addr);
        host.sketch_addr = Some(sketch.local_addr);
        host
    }
}

/// A running kernel.
pub struct TestHost {
    pub kernel: Arc<Kernel>,
    dispatcher: Option<JoinHandle<()>>,
    pub query_addr: Option<SocketAddr>,
    pub sketch_addr: Option<SocketAddr>,
}

impl TestHost {
    pub fn dispatcher_thread(&self) -> Option<std::thread::ThreadId> {
        self.dispatcher.as_ref().map(|h| h.thread().id())
    }

    /// Shut down and wait for teardown.
    pub fn stop(mut self) {
        self.kernel.shutdown();
        assert!(
            self.kernel.wait_for_termination(Some(test_timeout())),
            "kernel did not terminate"
        );
        if let Some(handle) = self.dispatcher.take() {
            handle.join().unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elements_lists_vertices_once() {
        let p = process("1");
        let a = artifact("/etc/passwd");
        let out = elements(&[used(&p, &a), generated(&a, &p)]);
        assert_eq!(out.len(), 4);
    }
}
