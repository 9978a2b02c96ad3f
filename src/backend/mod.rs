//! Pluggable collaborators: reporters, storages and their registry.
//!
//! # Components
//!
//! - [`Reporter`] - data source pushing elements into its [`Buffer`](crate::pipeline::Buffer)
//! - [`Storage`] - provenance backend answering delegated queries
//! - [`StorageEntry`] - an active storage with its committed counters
//! - [`Registry`] - name → factory tables used by the control surface
//!
//! Built-ins: the [`JsonLinesReporter`] and the [`MemoryStorage`].

pub mod memory_storage;
pub mod registry;
pub mod reporter;
pub mod storage;

pub use memory_storage::MemoryStorage;
pub use registry::Registry;
pub use reporter::{JsonLinesReporter, Reporter};
pub use storage::{Direction, Storage, StorageEntry};
