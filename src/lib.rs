//! # provd: provenance collection and query daemon
//!
//! provd ingests streams of provenance vertices and edges from pluggable
//! reporters, runs them through an ordered filter chain into pluggable
//! storages and sketches, and answers lineage and path queries. Queries can
//! span several cooperating hosts: network vertices mark host boundaries and
//! are resolved on the peer they point at.
//!
//! ## Architecture
//!
//! - **Kernel**: shared state for reporters, storages, filters, transformers
//!   and sketches ([`kernel`])
//! - **Dispatch loop**: drains reporter buffers through the filter chain on a
//!   dedicated thread and serves the flush barrier ([`pipeline`])
//! - **Control surface**: text commands that reconfigure the running pipeline
//!   ([`control`])
//! - **Query engine**: local evaluation and cross-host lineage resolution
//!   ([`query`])
//! - **Remote services**: query and sketch services over TCP ([`net`])
//! - **Sketches**: bloom-filter reachability summaries and their exchange
//!   protocol ([`sketch`])
//!
//! ## Configuration
//!
//! Daemon settings are read from a TOML file, by default `provd.toml` in the
//! platform data directory under `provd`:
//!
//! - **Linux**: `~/.local/share/provd/`
//! - **macOS**: `~/Library/Application Support/provd/`
//! - **Windows**: `%APPDATA%\provd\`
//!
//! ## Example
//!
//! ```no_run
//! use provd::{backend::Registry, config::KernelConfig, ControlSurface, Dispatcher, Kernel};
//! use std::sync::Arc;
//!
//! let kernel = Arc::new(Kernel::new(KernelConfig::default(), Registry::with_builtins()));
//! Dispatcher::spawn(kernel.clone()).unwrap();
//!
//! let control = ControlSurface::new(kernel.clone());
//! let mut out = std::io::stdout();
//! control.execute("add storage Memory", &mut out);
//! control.execute("add reporter JsonLines /var/log/provenance.jsonl", &mut out);
//! control.execute("query Memory vertices type:Process", &mut out);
//! control.execute("shutdown", &mut out);
//! kernel.wait_for_termination(None);
//! ```

pub mod backend;
pub mod config;
pub mod control;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod net;
pub mod pipeline;
pub mod query;
pub mod sketch;
pub mod types;

// Re-export commonly used types
pub use config::{KernelConfig, PipelineConfig};
pub use control::ControlSurface;
pub use error::{KernelError, Result};
pub use graph::Graph;
pub use kernel::Kernel;
pub use pipeline::Dispatcher;
pub use query::{Query, QueryEngine, QueryResult};
pub use types::{Edge, Element, Vertex};
