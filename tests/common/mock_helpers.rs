//! Mock collaborators

use provd::backend::{Direction, MemoryStorage, Reporter, Storage};
use provd::pipeline::Buffer;
use provd::types::{Edge, Element, Vertex};
use provd::{Graph, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// Pushes a fixed list of elements on launch.
pub struct ScriptedReporter {
    elements: Vec<Element>,
    shut_down: Arc<AtomicBool>,
}

impl ScriptedReporter {
    pub fn new(elements: Vec<Element>) -> Self {
        Self {
            elements,
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report shutdown through `flag`.
    pub fn with_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shut_down = flag;
        self
    }
}

impl Reporter for ScriptedReporter {
    fn launch(&mut self, _args: &str, buffer: Buffer) -> Result<()> {
        for element in self.elements.drain(..) {
            buffer.push(element);
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Observations shared between a [`RecordingStorage`] and the test.
#[derive(Default)]
pub struct StorageCalls {
    pub flushes: AtomicUsize,
    pub flush_threads: Mutex<Vec<ThreadId>>,
    pub shut_down: AtomicBool,
}

impl StorageCalls {
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

/// In-memory storage that records flushes and the threads they ran on.
pub struct RecordingStorage {
    inner: MemoryStorage,
    calls: Arc<StorageCalls>,
}

impl RecordingStorage {
    pub fn new(calls: Arc<StorageCalls>) -> Self {
        Self {
            inner: MemoryStorage::new(),
            calls,
        }
    }
}

impl Storage for RecordingStorage {
    fn initialize(&mut self, args: &str) -> Result<()> {
        self.inner.initialize(args)
    }

    fn put_vertex(&self, vertex: &Vertex) -> bool {
        self.inner.put_vertex(vertex)
    }

    fn put_edge(&self, edge: &Edge) -> bool {
        self.inner.put_edge(edge)
    }

    fn get_vertices(&self, expression: &str) -> Result<Graph> {
        self.inner.get_vertices(expression)
    }

    fn get_lineage(
        &self,
        vertex_id: &str,
        depth: u32,
        direction: Direction,
        terminating: Option<&str>,
    ) -> Result<Graph> {
        self.inner.get_lineage(vertex_id, depth, direction, terminating)
    }

    fn get_paths(&self, src_id: &str, dst_id: &str, max_length: u32) -> Result<Graph> {
        self.inner.get_paths(src_id, dst_id, max_length)
    }

    fn get_edges(
        &self,
        child: Option<&str>,
        parent: Option<&str>,
        edge: Option<&str>,
    ) -> Result<Graph> {
        self.inner.get_edges(child, parent, edge)
    }

    fn flush_transactions(&self) -> Result<()> {
        self.calls.flushes.fetch_add(1, Ordering::SeqCst);
        self.calls
            .flush_threads
            .lock()
            .push(std::thread::current().id());
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.calls.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}
