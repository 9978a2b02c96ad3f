//! Filter chain abstraction.
//!
//! A filter receives each vertex and edge along with the rest of the chain
//! as `next`. It may modify the element, drop it (by not forwarding), or
//! forward it one or more times. The stage after the last filter is a fixed
//! terminator supplied by the caller and is never part of the list.
//!
//! ```text
//! [filter 0] ──► [filter 1] ──► ... ──► terminator
//! ```

use crate::error::{KernelError, Result};
use crate::types::{Edge, Vertex};

/// Receiver of elements leaving a stage.
pub trait Forward {
    fn put_vertex(&mut self, vertex: Vertex);
    fn put_edge(&mut self, edge: Edge);
}

/// Trait for pluggable pipeline stages (filters and transformers).
pub trait Filter: Send {
    /// Registered name of this filter.
    fn name(&self) -> &str;

    /// Process a vertex; forward it with `next.put_vertex` to keep it.
    fn put_vertex(&mut self, vertex: Vertex, next: &mut dyn Forward);

    /// Process an edge; forward it with `next.put_edge` to keep it.
    fn put_edge(&mut self, edge: Edge, next: &mut dyn Forward);
}

/// The remainder of a chain, starting at its first stage.
pub struct Chain<'a, T: Forward + ?Sized> {
    stages: &'a mut [Box<dyn Filter>],
    terminal: &'a mut T,
}

impl<T: Forward + ?Sized> Forward for Chain<'_, T> {
    fn put_vertex(&mut self, vertex: Vertex) {
        match self.stages.split_first_mut() {
            Some((first, rest)) => {
                let mut next = Chain {
                    stages: rest,
                    terminal: &mut *self.terminal,
                };
                first.put_vertex(vertex, &mut next);
            }
            None => self.terminal.put_vertex(vertex),
        }
    }

    fn put_edge(&mut self, edge: Edge) {
        match self.stages.split_first_mut() {
            Some((first, rest)) => {
                let mut next = Chain {
                    stages: rest,
                    terminal: &mut *self.terminal,
                };
                first.put_edge(edge, &mut next);
            }
            None => self.terminal.put_edge(edge),
        }
    }
}

/// An ordered, mutable list of filters. Successors are implicit.
#[derive(Default)]
pub struct FilterChain {
    stages: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Insert at `index` in `[0, len]`; the filter previously there becomes the successor.
    pub fn insert(&mut self, index: usize, filter: Box<dyn Filter>) -> Result<()> {
        if index > self.stages.len() {
            return Err(KernelError::Usage(format!(
                "filter index {} out of range 0..={}",
                index,
                self.stages.len()
            )));
        }
        self.stages.insert(index, filter);
        Ok(())
    }

    /// Remove the filter at 1-based `position`.
    pub fn remove(&mut self, position: usize) -> Result<Box<dyn Filter>> {
        if position == 0 || position > self.stages.len() {
            return Err(KernelError::Usage(format!("bad index {}", position)));
        }
        Ok(self.stages.remove(position - 1))
    }

    /// Filter names in chain order.
    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// The chain ending in `terminal`.
    pub fn chain<'a, T: Forward + ?Sized>(&'a mut self, terminal: &'a mut T) -> Chain<'a, T> {
        Chain {
            stages: &mut self.stages,
            terminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::pipeline::stages::ResultStage;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Arc;

    /// Appends its name to a shared log, then forwards.
    struct Tracer {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Filter for Tracer {
        fn name(&self) -> &str {
            &self.name
        }

        fn put_vertex(&mut self, vertex: Vertex, next: &mut dyn Forward) {
            self.log.lock().push(self.name.clone());
            next.put_vertex(vertex);
        }

        fn put_edge(&mut self, edge: Edge, next: &mut dyn Forward) {
            self.log.lock().push(self.name.clone());
            next.put_edge(edge);
        }
    }

    /// Drops everything.
    struct Sink;

    impl Filter for Sink {
        fn name(&self) -> &str {
            "Sink"
        }
        fn put_vertex(&mut self, _vertex: Vertex, _next: &mut dyn Forward) {}
        fn put_edge(&mut self, _edge: Edge, _next: &mut dyn Forward) {}
    }

    fn tracer(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn Filter> {
        Box::new(Tracer {
            name: name.to_string(),
            log: log.clone(),
        })
    }

    #[test]
    fn test_empty_chain_reaches_terminator() {
        let mut chain = FilterChain::new();
        let mut graph = Graph::new();
        let mut result = ResultStage::new(&mut graph);
        chain.chain(&mut result).put_vertex(Vertex::new().with("n", "1"));
        assert_eq!(graph.vertex_count(), 1);
    }

    #[test]
    fn test_dropping_filter_stops_element() {
        let mut chain = FilterChain::new();
        chain.insert(0, Box::new(Sink)).unwrap();
        let mut graph = Graph::new();
        let mut result = ResultStage::new(&mut graph);
        chain.chain(&mut result).put_vertex(Vertex::new());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_insert_bounds() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = FilterChain::new();
        assert!(chain.insert(1, tracer("a", &log)).is_err());
        chain.insert(0, tracer("a", &log)).unwrap();
        chain.insert(1, tracer("b", &log)).unwrap();
        let err = chain.insert(3, tracer("c", &log)).unwrap_err();
        assert!(err.is_usage());
        assert_eq!(chain.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_is_one_based() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = FilterChain::new();
        chain.insert(0, tracer("a", &log)).unwrap();
        chain.insert(1, tracer("b", &log)).unwrap();
        assert!(chain.remove(0).is_err());
        assert!(chain.remove(3).is_err());
        assert_eq!(chain.remove(1).unwrap().name(), "a");
        assert_eq!(chain.names(), vec!["b"]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(usize),
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0usize..8).prop_map(Op::Insert), (0usize..8).prop_map(Op::Remove)]
    }

    proptest! {
        #[test]
        fn visit_order_matches_list_order(ops in proptest::collection::vec(op(), 1..24)) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut chain = FilterChain::new();
            let mut model: Vec<String> = Vec::new();

            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Insert(index) => {
                        let name = format!("f{}", i);
                        let ok = chain.insert(index, tracer(&name, &log)).is_ok();
                        prop_assert_eq!(ok, index <= model.len());
                        if ok {
                            model.insert(index, name);
                        }
                    }
                    Op::Remove(position) => {
                        let ok = chain.remove(position).is_ok();
                        prop_assert_eq!(ok, position >= 1 && position <= model.len());
                        if ok {
                            model.remove(position - 1);
                        }
                    }
                }
            }

            prop_assert_eq!(chain.names(), model.clone());

            let mut graph = Graph::new();
            let mut result = ResultStage::new(&mut graph);
            chain.chain(&mut result).put_edge(Edge::new(Vertex::new(), Vertex::new()));
            prop_assert_eq!(&*log.lock(), &model);
            prop_assert_eq!(graph.edge_count(), 1);
        }
    }
}
