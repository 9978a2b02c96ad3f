//! Core provenance types for provd
//!
//! This module contains the elements that flow through the kernel:
//!
//! - [`Vertex`] - an annotation map describing one provenance object
//! - [`Edge`] - an annotated relation from a child (effect) to a parent (cause)
//! - [`Element`] - what a reporter pushes into its buffer
//!
//! # Identity
//!
//! Two vertices are the same vertex when their full annotation sets are equal.
//! Annotations added by the kernel or by a storage (`source_reporter`,
//! `storageId`) are host-local; [`Vertex::identity`] strips them so that
//! vertices can be compared across hosts.
//!
//! # String Form
//!
//! The display form of a vertex is `key:value|key:value` over its annotations
//! in key order. It is what the control surface prints. Sketches key their
//! filters by the display form of [`Vertex::sketch_key`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Annotation stamped by the dispatch loop with the originating reporter.
pub const SOURCE_REPORTER: &str = "source_reporter";

/// Annotation assigned by a storage to vertices it returns from queries.
pub const STORAGE_ID: &str = "storageId";

/// Type annotation for vertices and edges.
pub const TYPE: &str = "type";

/// Type value marking a host-boundary vertex.
pub const NETWORK_TYPE: &str = "Network";

/// On a network vertex, the identifier of the peer host.
pub const REMOTE_HOST: &str = "remote host";

/// Edge type for a process reading an artifact.
pub const USED: &str = "Used";

/// Edge type for an artifact written by a process.
pub const WAS_GENERATED_BY: &str = "WasGeneratedBy";

/// Annotations that are local to one host and excluded from identity.
const HOST_LOCAL_KEYS: &[&str] = &[STORAGE_ID, SOURCE_REPORTER];

/// A provenance vertex: a mapping of string annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vertex {
    annotations: BTreeMap<String, String>,
}

impl Vertex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style annotation
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotate(key, value);
        self
    }

    /// Set an annotation, replacing any previous value.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.annotations.remove(key)
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn vertex_type(&self) -> Option<&str> {
        self.get(TYPE)
    }

    /// Whether this vertex marks a boundary to another host.
    pub fn is_network(&self) -> bool {
        self.vertex_type() == Some(NETWORK_TYPE)
    }

    /// Peer host of a network vertex.
    pub fn remote_host(&self) -> Option<&str> {
        self.get(REMOTE_HOST)
    }

    pub fn storage_id(&self) -> Option<&str> {
        self.get(STORAGE_ID)
    }

    /// This vertex without host-local annotations.
    pub fn identity(&self) -> Vertex {
        let mut identity = self.clone();
        for key in HOST_LOCAL_KEYS {
            identity.annotations.remove(*key);
        }
        identity
    }

    /// The same boundary seen from either host: identity without the peer host.
    pub fn boundary_identity(&self) -> Vertex {
        let mut identity = self.identity();
        identity.annotations.remove(REMOTE_HOST);
        identity
    }

    /// Key used by sketches for a vertex.
    pub fn sketch_key(&self) -> String {
        self.boundary_identity().to_string()
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.annotations {
            if !first {
                f.write_str("|")?;
            }
            first = false;
            write!(f, "{}:{}", key, value)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Vertex {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            annotations: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A provenance edge from `child` (effect) to `parent` (cause).
///
/// An edge holds its endpoints by value; a graph may contain an edge whose
/// endpoints are not in its vertex set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub child: Vertex,
    pub parent: Vertex,
}

impl Edge {
    pub fn new(child: Vertex, parent: Vertex) -> Self {
        Self {
            annotations: BTreeMap::new(),
            child,
            parent,
        }
    }

    /// Builder-style annotation
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotate(key, value);
        self
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn edge_type(&self) -> Option<&str> {
        self.get(TYPE)
    }
}

/// An element pushed into a reporter's buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "element", rename_all = "snake_case")]
pub enum Element {
    Vertex(Vertex),
    Edge(Edge),
    /// No further elements will follow from this source.
    EndOfStream,
}

impl From<Vertex> for Element {
    fn from(vertex: Vertex) -> Self {
        Element::Vertex(vertex)
    }
}

impl From<Edge> for Element {
    fn from(edge: Edge) -> Self {
        Element::Edge(edge)
    }
}
