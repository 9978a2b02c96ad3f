//! Remote services and clients.
//!
//! Hosts talk over two TCP services: the query service answers query lines
//! with graphs, the sketch service exchanges sketches and path fragments.
//! Both speak the line-delimited JSON schema in [`wire`].

pub mod client;
pub mod listener;
pub mod wire;

pub use client::{sketch_call, QueryClient};
pub use listener::{spawn_query_service, spawn_sketch_service, ServiceHandle};
pub use wire::{QueryRequest, QueryResponse, SketchRequest, SketchResponse, PROTOCOL_VERSION};
