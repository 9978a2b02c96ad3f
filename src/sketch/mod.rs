//! Reachability sketches and the cross-host sketch protocol.
//!
//! Each host keeps one active local sketch: a [`MatrixFilter`] mapping each of
//! its network vertices to a bloom filter of the network vertices reachable
//! from it. Hosts flood their sketch tables to neighbours so that a path query
//! can rule out hosts before running exact traversals.
//!
//! # Components
//!
//! - [`BloomFilter`] / [`MatrixFilter`] - conservative membership structures
//! - [`Sketch`] - capability trait fed by the commit stage
//! - [`MatrixSketch`] - the built-in sketch
//! - [`protocol`] - propagation, rebuild notification, path fragments and
//!   path existence

pub mod bloom;
pub mod matrix_sketch;
pub mod protocol;

pub use bloom::{BloomFilter, MatrixFilter};
pub use matrix_sketch::MatrixSketch;

use crate::types::{Edge, Vertex};
use serde::{Deserialize, Serialize};

/// Capability contract for sketches.
pub trait Sketch: Send {
    /// Observe a committed vertex.
    fn put_vertex(&mut self, vertex: &Vertex);

    /// Observe a committed edge.
    fn put_edge(&mut self, edge: &Edge);

    /// Current vertex → filter mapping.
    fn matrix_filter(&mut self) -> MatrixFilter;
}

/// A sketch as exchanged between hosts.
///
/// The source and destination sets ride along with a path-fragment request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SketchPayload {
    pub matrix: MatrixFilter,
    #[serde(default)]
    pub src_vertices: Vec<Vertex>,
    #[serde(default)]
    pub dst_vertices: Vec<Vertex>,
}

impl SketchPayload {
    pub fn new(matrix: MatrixFilter) -> Self {
        Self {
            matrix,
            ..Default::default()
        }
    }
}

/// An active sketch and the storage it was added for.
pub struct SketchEntry {
    pub name: String,
    pub storage: String,
    pub sketch: Box<dyn Sketch>,
}
