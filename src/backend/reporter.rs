//! Reporter trait and the built-in JSON-lines reporter.
//!
//! A reporter is a data source. On launch it is handed the [`Buffer`] the
//! dispatch loop drains and pushes vertices and edges into it from its own
//! thread.

use crate::error::{KernelError, Result};
use crate::pipeline::Buffer;
use crate::types::Element;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Capability contract for data sources.
pub trait Reporter: Send {
    /// Start producing into `buffer`.
    fn launch(&mut self, args: &str, buffer: Buffer) -> Result<()>;

    /// Stop producing. Elements already pushed stay in the buffer.
    fn shutdown(&mut self) -> Result<()>;
}

/// Replays a file of newline-delimited JSON [`Element`]s.
///
/// Arguments: the file path. Unparseable lines are logged and skipped; an
/// end-of-stream marker is pushed once the file is exhausted.
#[derive(Default)]
pub struct JsonLinesReporter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl JsonLinesReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for JsonLinesReporter {
    fn launch(&mut self, args: &str, buffer: Buffer) -> Result<()> {
        let path = args.trim();
        if path.is_empty() {
            return Err(KernelError::Usage("JsonLines <file>".into()));
        }
        let file = File::open(path).map_err(|e| {
            KernelError::Collaborator(format!("Failed to open {}: {}", path, e))
        })?;

        let stop = self.stop.clone();
        let source = path.to_string();
        let handle = std::thread::Builder::new()
            .name("reporter-jsonlines".into())
            .spawn(move || {
                let reader = BufReader::new(file);
                for (number, line) in reader.lines().enumerate() {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let line = match line {
                        Ok(l) => l,
                        Err(e) => {
                            tracing::warn!("Read error in {} at line {}: {}", source, number + 1, e);
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Element>(&line) {
                        Ok(element) => {
                            buffer.push(element);
                        }
                        Err(e) => {
                            tracing::warn!("Skipping {} line {}: {}", source, number + 1, e);
                        }
                    }
                }
                buffer.close();
                tracing::debug!("Finished replaying {}", source);
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| KernelError::Collaborator("JsonLines reader panicked".into()))?;
        }
        Ok(())
    }
}
