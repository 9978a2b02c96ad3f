//! Built-in filter implementations.

pub mod deduplicate;

pub use deduplicate::Deduplicate;
