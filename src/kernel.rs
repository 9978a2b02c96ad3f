//! Shared kernel state.
//!
//! [`Kernel`] owns every collection the dispatch loop, the control surface,
//! the query engine and the remote handlers share. Each collection guards
//! itself; callers never lock from outside. When more than one is held at a
//! time they are taken in this order:
//!
//! ```text
//! sources → filters → storages → sketches
//! ```
//!
//! Removal of reporters and storages is requested here and completed by the
//! dispatch loop, which confirms through a channel the caller blocks on.

use crate::backend::{Registry, Reporter, StorageEntry};
use crate::config::{Directive, KernelConfig, PipelineConfig};
use crate::error::{KernelError, Result};
use crate::graph::Graph;
use crate::pipeline::stages::{CommitStage, ResultStage};
use crate::pipeline::{Buffer, FilterChain, FlushBarrier, Forward};
use crate::sketch::{SketchEntry, SketchPayload};
use crate::types::Element;
use crossbeam_channel::{bounded, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A launched reporter and its arguments.
pub struct ReporterEntry {
    pub name: String,
    pub args: String,
    reporter: Box<dyn Reporter>,
}

/// A reporter's buffer as seen by the dispatch loop.
pub(crate) struct Source {
    pub name: String,
    pub buffer: Buffer,
    /// Set when removal was requested; signalled once the buffer is drained.
    pub removal: Option<Sender<()>>,
    pub finished: bool,
}

/// Snapshot of one storage for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub name: String,
    pub args: String,
    pub vertices: u64,
    pub edges: u64,
}

pub struct Kernel {
    config: KernelConfig,
    registry: Registry,
    reporters: Mutex<Vec<ReporterEntry>>,
    pub(crate) sources: Mutex<Vec<Source>>,
    pub(crate) storages: RwLock<Vec<Arc<StorageEntry>>>,
    pub(crate) storage_removals: Mutex<Vec<(Arc<StorageEntry>, Sender<()>)>>,
    pub(crate) filters: Mutex<FilterChain>,
    transformers: Mutex<FilterChain>,
    pub(crate) sketches: Mutex<Vec<SketchEntry>>,
    remote_sketches: RwLock<HashMap<String, SketchPayload>>,
    pub(crate) flush: FlushBarrier,
    shutdown: AtomicBool,
    terminated: Mutex<bool>,
    terminated_cv: Condvar,
}

impl Kernel {
    pub fn new(config: KernelConfig, registry: Registry) -> Self {
        Self {
            config,
            registry,
            reporters: Mutex::new(Vec::new()),
            sources: Mutex::new(Vec::new()),
            storages: RwLock::new(Vec::new()),
            storage_removals: Mutex::new(Vec::new()),
            filters: Mutex::new(FilterChain::new()),
            transformers: Mutex::new(FilterChain::new()),
            sketches: Mutex::new(Vec::new()),
            remote_sketches: RwLock::new(HashMap::new()),
            flush: FlushBarrier::new(),
            shutdown: AtomicBool::new(false),
            terminated: Mutex::new(false),
            terminated_cv: Condvar::new(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ==================== Reporters ====================

    /// Create, register and launch a reporter.
    pub fn add_reporter(&self, name: &str, args: &str) -> Result<()> {
        let mut reporter = self.registry.create_reporter(name)?;
        let buffer = Buffer::new();
        // Elements pushed during launch wait in the buffer until it is registered.
        reporter.launch(args, buffer.clone()).map_err(|e| {
            KernelError::Collaborator(format!("Reporter {} failed to launch: {}", name, e))
        })?;

        self.sources.lock().push(Source {
            name: name.to_string(),
            buffer,
            removal: None,
            finished: false,
        });
        self.reporters.lock().push(ReporterEntry {
            name: name.to_string(),
            args: args.to_string(),
            reporter,
        });
        tracing::info!("Added reporter {} ({})", name, args);
        Ok(())
    }

    /// Shut down a reporter and block until its buffer has been drained.
    ///
    /// Returns false if no reporter has that name.
    pub fn remove_reporter(&self, name: &str) -> Result<bool> {
        let entry = {
            let mut reporters = self.reporters.lock();
            match reporters.iter().position(|r| r.name == name) {
                Some(i) => reporters.remove(i),
                None => return Ok(false),
            }
        };
        let ReporterEntry { mut reporter, .. } = entry;
        if let Err(e) = reporter.shutdown() {
            tracing::warn!("Reporter {} shutdown failed: {}", name, e);
        }

        let (tx, rx) = bounded(1);
        {
            let mut sources = self.sources.lock();
            match sources
                .iter_mut()
                .find(|s| s.name == name && s.removal.is_none())
            {
                Some(source) => source.removal = Some(tx),
                None => return Ok(true),
            }
        }
        // Disconnection also means the source is gone.
        let _ = rx.recv();
        tracing::info!("Removed reporter {}", name);
        Ok(true)
    }

    /// (name, args) of every reporter.
    pub fn reporters(&self) -> Vec<(String, String)> {
        self.reporters
            .lock()
            .iter()
            .map(|r| (r.name.clone(), r.args.clone()))
            .collect()
    }

    // ==================== Storages ====================

    pub fn add_storage(&self, name: &str, args: &str) -> Result<()> {
        let mut storage = self.registry.create_storage(name)?;
        storage.initialize(args).map_err(|e| {
            KernelError::Collaborator(format!("Storage {} failed to initialize: {}", name, e))
        })?;
        self.storages
            .write()
            .push(Arc::new(StorageEntry::new(name, args, storage)));
        tracing::info!("Added storage {} ({})", name, args);
        Ok(())
    }

    /// Queue a storage for removal and block until the dispatch loop has shut
    /// it down. Returns its final (vertex, edge) counts, or `None` if absent.
    pub fn remove_storage(&self, name: &str) -> Result<Option<(u64, u64)>> {
        let Some(entry) = self.find_storage(name) else {
            return Ok(None);
        };
        let (tx, rx) = bounded(1);
        self.storage_removals.lock().push((entry.clone(), tx));
        let _ = rx.recv();
        tracing::info!("Removed storage {}", name);
        Ok(Some((entry.vertex_count(), entry.edge_count())))
    }

    pub fn find_storage(&self, name: &str) -> Option<Arc<StorageEntry>> {
        self.storages
            .read()
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    /// The storage used for sketch-related lookups.
    pub fn first_storage(&self) -> Option<Arc<StorageEntry>> {
        self.storages.read().first().cloned()
    }

    pub fn storages(&self) -> Vec<StorageInfo> {
        self.storages
            .read()
            .iter()
            .map(|s| StorageInfo {
                name: s.name.clone(),
                args: s.args.clone(),
                vertices: s.vertex_count(),
                edges: s.edge_count(),
            })
            .collect()
    }

    // ==================== Filters and Transformers ====================

    pub fn add_filter(&self, name: &str, index: usize) -> Result<()> {
        let filter = self.registry.create_filter(name)?;
        self.filters.lock().insert(index, filter)?;
        tracing::info!("Added filter {} at {}", name, index);
        Ok(())
    }

    /// Remove the filter at 1-based `position`, returning its name.
    pub fn remove_filter(&self, position: usize) -> Result<String> {
        let filter = self.filters.lock().remove(position)?;
        Ok(filter.name().to_string())
    }

    pub fn filters(&self) -> Vec<String> {
        self.filters.lock().names()
    }

    pub fn add_transformer(&self, name: &str, index: usize) -> Result<()> {
        let filter = self.registry.create_filter(name)?;
        self.transformers.lock().insert(index, filter)?;
        tracing::info!("Added transformer {} at {}", name, index);
        Ok(())
    }

    pub fn remove_transformer(&self, position: usize) -> Result<String> {
        let filter = self.transformers.lock().remove(position)?;
        Ok(filter.name().to_string())
    }

    pub fn transformers(&self) -> Vec<String> {
        self.transformers.lock().names()
    }

    // ==================== Sketches ====================

    pub fn add_sketch(&self, name: &str, storage: &str) -> Result<()> {
        if self.find_storage(storage).is_none() {
            return Err(KernelError::Collaborator(format!(
                "No storage {} for sketch {}",
                storage, name
            )));
        }
        let sketch = self.registry.create_sketch(name)?;
        self.sketches.lock().push(SketchEntry {
            name: name.to_string(),
            storage: storage.to_string(),
            sketch,
        });
        tracing::info!("Added sketch {} on {}", name, storage);
        Ok(())
    }

    pub fn remove_sketch(&self, name: &str) -> bool {
        let mut sketches = self.sketches.lock();
        match sketches.iter().position(|s| s.name == name) {
            Some(i) => {
                sketches.remove(i);
                true
            }
            None => false,
        }
    }

    /// (name, storage) of every sketch.
    pub fn sketches(&self) -> Vec<(String, String)> {
        self.sketches
            .lock()
            .iter()
            .map(|s| (s.name.clone(), s.storage.clone()))
            .collect()
    }

    /// Snapshot of the active local sketch.
    pub fn local_sketch(&self) -> Option<SketchPayload> {
        let mut sketches = self.sketches.lock();
        sketches
            .first_mut()
            .map(|s| SketchPayload::new(s.sketch.matrix_filter()))
    }

    /// Merge a received table; the latest sketch per host wins.
    pub fn merge_remote_sketches(&self, table: HashMap<String, SketchPayload>) {
        let mut remote = self.remote_sketches.write();
        for (host, sketch) in table {
            remote.insert(host, sketch);
        }
    }

    pub fn remote_sketches(&self) -> HashMap<String, SketchPayload> {
        self.remote_sketches.read().clone()
    }

    /// The table this host propagates: remote sketches plus its own.
    pub fn sketch_table(&self) -> HashMap<String, SketchPayload> {
        let mut table = self.remote_sketches();
        if let Some(local) = self.local_sketch() {
            table.insert(self.config.host_id.clone(), local);
        }
        table
    }

    // ==================== Pipeline ====================

    /// Run a batch through the filter chain into storages and sketches.
    pub(crate) fn commit(&self, batch: Vec<Element>) {
        if batch.is_empty() {
            return;
        }
        let mut filters = self.filters.lock();
        let storages = self.storages.read();
        let mut sketches = self.sketches.lock();
        let mut terminal = CommitStage::new(&storages, &mut sketches);
        let mut head = filters.chain(&mut terminal);
        for element in batch {
            match element {
                Element::Vertex(vertex) => head.put_vertex(vertex),
                Element::Edge(edge) => head.put_edge(edge),
                Element::EndOfStream => {}
            }
        }
    }

    /// Pass a query result through the transformer chain.
    pub fn transform(&self, graph: Graph) -> Graph {
        let mut transformers = self.transformers.lock();
        if transformers.is_empty() {
            return graph;
        }
        let mut result = Graph::new();
        {
            let mut terminal = ResultStage::new(&mut result);
            let mut head = transformers.chain(&mut terminal);
            for vertex in graph.vertices() {
                head.put_vertex(vertex.clone());
            }
            for edge in graph.edges() {
                head.put_edge(edge.clone());
            }
        }
        for (vertex, depth) in graph.network_map() {
            if result.contains_vertex(vertex) {
                result.put_network_vertex(vertex.clone(), *depth);
            }
        }
        result
    }

    /// Block until storages have flushed everything committed so far.
    pub fn flush_and_wait(&self) -> Result<()> {
        self.flush.request_and_wait(self.config.flush_timeout())
    }

    /// The current pipeline as directives.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut directives = Vec::new();
        for (index, name) in self.filters().into_iter().enumerate() {
            directives.push(Directive::Filter { name, index });
        }
        for (index, name) in self.transformers().into_iter().enumerate() {
            directives.push(Directive::Transformer { name, index });
        }
        for info in self.storages() {
            directives.push(Directive::Storage {
                name: info.name,
                args: info.args,
            });
        }
        for (name, storage) in self.sketches() {
            directives.push(Directive::Sketch { name, storage });
        }
        for (name, args) in self.reporters() {
            directives.push(Directive::Reporter { name, args });
        }
        PipelineConfig { directives }
    }

    pub fn save_pipeline(&self, path: impl AsRef<Path>) -> Result<()> {
        self.pipeline_config().save(path)
    }

    // ==================== Lifecycle ====================

    /// Save the pipeline, stop every reporter and start draining.
    ///
    /// The dispatch loop tears down once every buffer is empty.
    pub fn shutdown(&self) {
        if let Some(path) = self.config.pipeline_config_path() {
            match self.save_pipeline(&path) {
                Ok(()) => tracing::info!("Saved pipeline to {}", path.display()),
                Err(e) => tracing::warn!("Failed to save pipeline: {}", e),
            }
        }

        let reporters = std::mem::take(&mut *self.reporters.lock());
        for mut entry in reporters {
            if let Err(e) = entry.reporter.shutdown() {
                tracing::warn!("Reporter {} shutdown failed: {}", entry.name, e);
            }
        }
        self.shutdown.store(true, Ordering::SeqCst);
        tracing::info!("Shutdown requested");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_terminated(&self) {
        *self.terminated.lock() = true;
        self.terminated_cv.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminated.lock()
    }

    /// Block until teardown finished, or `timeout` elapses. Returns true if terminated.
    pub fn wait_for_termination(&self, timeout: Option<Duration>) -> bool {
        let mut terminated = self.terminated.lock();
        match timeout {
            Some(t) => {
                let deadline = Instant::now() + t;
                while !*terminated {
                    if self
                        .terminated_cv
                        .wait_until(&mut terminated, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }
            None => {
                while !*terminated {
                    self.terminated_cv.wait(&mut terminated);
                }
            }
        }
        *terminated
    }
}
