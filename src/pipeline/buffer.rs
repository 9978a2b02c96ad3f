//! Per-reporter element buffer.
//!
//! A thread-safe FIFO backed by an unbounded crossbeam channel. The reporter
//! holds one handle and pushes; the dispatch loop holds another and pops.

use crate::types::Element;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

#[derive(Debug, Clone)]
pub struct Buffer {
    tx: Sender<Element>,
    rx: Receiver<Element>,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append an element. Never blocks.
    pub fn push(&self, element: impl Into<Element>) -> bool {
        self.tx.send(element.into()).is_ok()
    }

    /// Mark the end of this source's stream.
    pub fn close(&self) -> bool {
        self.tx.send(Element::EndOfStream).is_ok()
    }

    /// Next element, or `None` when currently empty.
    pub fn pop(&self) -> Option<Element> {
        match self.rx.try_recv() {
            Ok(element) => Some(element),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}
