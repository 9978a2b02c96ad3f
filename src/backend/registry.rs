//! Name → factory tables for pluggable collaborators.
//!
//! The control surface creates reporters, storages, filters and sketches by
//! name. Built-ins are registered by [`Registry::with_builtins`]; embedders
//! and tests add their own before handing the registry to the kernel.

use crate::backend::memory_storage::MemoryStorage;
use crate::backend::reporter::{JsonLinesReporter, Reporter};
use crate::backend::storage::Storage;
use crate::error::{KernelError, Result};
use crate::pipeline::nodes::Deduplicate;
use crate::pipeline::Filter;
use crate::sketch::{MatrixSketch, Sketch};
use std::collections::BTreeMap;

pub type ReporterFactory = Box<dyn Fn() -> Box<dyn Reporter> + Send + Sync>;
pub type StorageFactory = Box<dyn Fn() -> Box<dyn Storage> + Send + Sync>;
pub type FilterFactory = Box<dyn Fn() -> Box<dyn Filter> + Send + Sync>;
pub type SketchFactory = Box<dyn Fn() -> Box<dyn Sketch> + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    reporters: BTreeMap<String, ReporterFactory>,
    storages: BTreeMap<String, StorageFactory>,
    filters: BTreeMap<String, FilterFactory>,
    sketches: BTreeMap<String, SketchFactory>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in collaborators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_reporter("JsonLines", || Box::new(JsonLinesReporter::new()));
        registry.register_storage("Memory", || Box::new(MemoryStorage::new()));
        registry.register_filter("Deduplicate", || Box::new(Deduplicate::new()));
        registry.register_sketch("Matrix", || Box::new(MatrixSketch::new()));
        registry
    }

    pub fn register_reporter<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Reporter> + Send + Sync + 'static,
    {
        self.reporters.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_storage<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Storage> + Send + Sync + 'static,
    {
        self.storages.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_filter<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        self.filters.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_sketch<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Sketch> + Send + Sync + 'static,
    {
        self.sketches.insert(name.to_string(), Box::new(factory));
    }

    pub fn create_reporter(&self, name: &str) -> Result<Box<dyn Reporter>> {
        self.reporters
            .get(name)
            .map(|f| f())
            .ok_or_else(|| unknown("reporter", name))
    }

    pub fn create_storage(&self, name: &str) -> Result<Box<dyn Storage>> {
        self.storages
            .get(name)
            .map(|f| f())
            .ok_or_else(|| unknown("storage", name))
    }

    pub fn create_filter(&self, name: &str) -> Result<Box<dyn Filter>> {
        self.filters
            .get(name)
            .map(|f| f())
            .ok_or_else(|| unknown("filter", name))
    }

    pub fn create_sketch(&self, name: &str) -> Result<Box<dyn Sketch>> {
        self.sketches
            .get(name)
            .map(|f| f())
            .ok_or_else(|| unknown("sketch", name))
    }

    pub fn reporter_names(&self) -> impl Iterator<Item = &str> {
        self.reporters.keys().map(String::as_str)
    }

    pub fn storage_names(&self) -> impl Iterator<Item = &str> {
        self.storages.keys().map(String::as_str)
    }
}

fn unknown(kind: &str, name: &str) -> KernelError {
    KernelError::Collaborator(format!("No {} registered as '{}'", kind, name))
}
