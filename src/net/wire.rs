//! Versioned wire schema for the query and sketch ports.
//!
//! Every message is one line of JSON:
//!
//! ```text
//! {"version":1,"body":{"kind":"query","line":"query Memory vertices type:Network"}}
//! ```
//!
//! Bodies are internally tagged enums, one per port and direction.

use crate::error::{KernelError, Result};
use crate::graph::Graph;
use crate::sketch::SketchPayload;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, Write};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Frame<T> {
    version: u32,
    body: T,
}

/// Request on the query port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryRequest {
    /// A query command line without an output file.
    Query {
        line: String,
        /// Resolve network vertices on their hosts before replying.
        #[serde(default)]
        resolve_remote: bool,
    },
}

/// Reply on the query port. The graph is empty when the query failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResponse {
    Graph {
        graph: Graph,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Request on the sketch port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SketchRequest {
    GiveSketch,
    PathFragment {
        sketch: SketchPayload,
    },
    NotifyRebuildSketches {
        level: u32,
        max_level: u32,
    },
    PropagateSketches {
        level: u32,
        max_level: u32,
        table: HashMap<String, SketchPayload>,
    },
}

/// Reply on the sketch port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SketchResponse {
    SketchTable {
        sketch: Option<SketchPayload>,
        table: HashMap<String, SketchPayload>,
    },
    Graph {
        graph: Graph,
    },
    Ack,
    Error {
        message: String,
    },
}

/// Write one framed message followed by a newline.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, body: &T) -> Result<()> {
    let frame = Frame {
        version: PROTOCOL_VERSION,
        body,
    };
    serde_json::to_writer(&mut *writer, &frame)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read one framed message. `None` at end of stream.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    let frame: Frame<serde_json::Value> = serde_json::from_str(&line)?;
    if frame.version != PROTOCOL_VERSION {
        return Err(KernelError::Protocol(format!(
            "unsupported protocol version {} (expected {})",
            frame.version, PROTOCOL_VERSION
        )));
    }
    let body = serde_json::from_value(frame.body)?;
    Ok(Some(body))
}
