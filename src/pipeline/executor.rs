//! Dispatch loop: the kernel's central scheduler.
//!
//! The loop runs on a dedicated thread. Each tick:
//! 1. If shutting down, drop drained buffers; tear down once none remain.
//! 2. Serve a pending transaction-flush request.
//! 3. Shut down and drop storages queued for removal.
//! 4. Drain up to `batch_size` elements from every buffer, stamp the
//!    originating reporter, and run the batch through the filter chain.
//! 5. Confirm reporter removals whose buffers are now empty.
//! 6. Sleep for the tick interval.
//!
//! A failing or panicking tick is logged; the loop keeps going until teardown.

use crate::kernel::Kernel;
use crate::types::{Element, SOURCE_REPORTER};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    Running,
    /// Teardown ran; the loop should exit.
    Terminated,
}

pub struct Dispatcher {
    kernel: Arc<Kernel>,
    torn_down: bool,
    tick: u64,
}

impl Dispatcher {
    pub fn new(kernel: Arc<Kernel>) -> Self {
        Self {
            kernel,
            torn_down: false,
            tick: 0,
        }
    }

    /// Run the loop on a new thread.
    pub fn spawn(kernel: Arc<Kernel>) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("dispatch".into())
            .spawn(move || Dispatcher::new(kernel).run())
    }

    pub fn run(&mut self) {
        tracing::info!("Dispatch loop started");
        let interval = self.kernel.config().tick_interval();

        loop {
            match catch_unwind(AssertUnwindSafe(|| self.tick())) {
                Ok(TickState::Terminated) => break,
                Ok(TickState::Running) => {}
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!("Dispatch tick {} panicked: {}", self.tick, message);
                }
            }
            std::thread::sleep(interval);
        }

        tracing::info!("Dispatch loop exiting after {} ticks", self.tick);
    }

    pub fn tick(&mut self) -> TickState {
        self.tick += 1;

        if self.kernel.is_shutting_down() && self.drop_drained_sources() {
            self.teardown();
            return TickState::Terminated;
        }

        let kernel = &self.kernel;
        kernel.flush.serve(|| Self::flush_storages(kernel));
        self.process_storage_removals();
        self.drain_sources();
        TickState::Running
    }

    /// Drop sources with empty buffers. Returns true when none remain.
    fn drop_drained_sources(&self) -> bool {
        let mut sources = self.kernel.sources.lock();
        sources.retain(|source| {
            let keep = !source.buffer.is_empty();
            if !keep {
                tracing::debug!("Dropped drained buffer of {}", source.name);
            }
            keep
        });
        sources.is_empty()
    }

    fn flush_storages(kernel: &Kernel) {
        for storage in kernel.storages.read().iter() {
            if let Err(e) = storage.storage().flush_transactions() {
                tracing::warn!("Flush of storage {} failed: {}", storage.name, e);
            }
        }
    }

    fn process_storage_removals(&self) {
        let removals = std::mem::take(&mut *self.kernel.storage_removals.lock());
        for (entry, confirm) in removals {
            self.kernel
                .storages
                .write()
                .retain(|s| !Arc::ptr_eq(s, &entry));
            if let Err(e) = entry.storage().shutdown() {
                tracing::warn!("Storage {} shutdown failed: {}", entry.name, e);
            }
            tracing::info!(
                "Storage {} shut down ({} vertices and {} edges added)",
                entry.name,
                entry.vertex_count(),
                entry.edge_count()
            );
            let _ = confirm.send(());
        }
    }

    fn drain_sources(&self) {
        let batch_size = self.kernel.config().batch_size;
        let mut batch = Vec::new();
        let mut confirmations = Vec::new();

        {
            let mut sources = self.kernel.sources.lock();
            sources.retain_mut(|source| {
                for _ in 0..batch_size {
                    match source.buffer.pop() {
                        Some(Element::Vertex(mut vertex)) => {
                            vertex.annotate(SOURCE_REPORTER, source.name.as_str());
                            batch.push(Element::Vertex(vertex));
                        }
                        Some(Element::Edge(mut edge)) => {
                            edge.annotate(SOURCE_REPORTER, source.name.as_str());
                            edge.child.annotate(SOURCE_REPORTER, source.name.as_str());
                            edge.parent.annotate(SOURCE_REPORTER, source.name.as_str());
                            batch.push(Element::Edge(edge));
                        }
                        Some(Element::EndOfStream) => {
                            if !source.finished {
                                tracing::info!("Reporter {} reached end of stream", source.name);
                                source.finished = true;
                            }
                        }
                        None => break,
                    }
                }

                if source.buffer.is_empty() {
                    if let Some(confirm) = source.removal.take() {
                        confirmations.push(confirm);
                        return false;
                    }
                }
                true
            });
        }

        self.kernel.commit(batch);
        for confirm in confirmations {
            let _ = confirm.send(());
        }
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let storages = std::mem::take(&mut *self.kernel.storages.write());
        for storage in storages {
            if let Err(e) = storage.storage().flush_transactions() {
                tracing::warn!("Final flush of {} failed: {}", storage.name, e);
            }
            if let Err(e) = storage.storage().shutdown() {
                tracing::warn!("Storage {} shutdown failed: {}", storage.name, e);
            }
            tracing::info!(
                "Shut down storage {} ({} vertices and {} edges added)",
                storage.name,
                storage.vertex_count(),
                storage.edge_count()
            );
        }
        for (entry, confirm) in std::mem::take(&mut *self.kernel.storage_removals.lock()) {
            tracing::debug!("Storage {} removed during teardown", entry.name);
            let _ = confirm.send(());
        }
        self.kernel.mark_terminated();
        tracing::info!("Teardown complete");
    }
}
