//! Element pipeline.
//!
//! Elements flow from per-reporter buffers through the dispatch loop into an
//! ordered filter chain that ends in the commit stage. Query results flow
//! through a separate transformer chain that ends in a result graph.
//!
//! # Architecture
//!
//! ```text
//! [Buffer]─┐
//! [Buffer]─┼─► Dispatcher ──► [filter 0] ──► ... ──► CommitStage ──► storages
//! [Buffer]─┘                                                     └──► sketches
//!
//! query result ──► [transformer 0] ──► ... ──► ResultStage ──► Graph
//! ```
//!
//! # Design
//!
//! - **Implicit successors**: a chain is a `Vec` of boxed filters; the next
//!   stage is the rest of the slice, so insert and remove are single splices.
//! - **Fixed terminators**: the commit and result stages live outside the
//!   list and cannot be removed.
//! - **Dedicated thread**: the dispatcher is the only thread that flushes
//!   storage transactions.

pub mod barrier;
pub mod buffer;
pub mod executor;
pub mod filter;
pub mod nodes;
pub mod stages;

pub use barrier::FlushBarrier;
pub use buffer::Buffer;
pub use executor::{Dispatcher, TickState};
pub use filter::{Chain, Filter, FilterChain, Forward};
pub use stages::{CommitStage, ResultStage};
