// src/graph/context.rs

use crate::config::EngineConfig;
use crate::error::GradNetError;
use crate::graph::counting::CountingAccumulator;
use crate::graph::network::DagNetwork;
use crate::graph::node::{DagNode, NodeId};
use crate::graph::promise::Promise;
use crate::graph::result::EvalResult;
use rayon::prelude::*;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Slot = Arc<Promise<Result<EvalResult, GradNetError>>>;

struct Ledger {
    /// Memoized per-node values, single-assignment. An entry is removed on
    /// the fetch that reaches the node's expected count.
    calculated: HashMap<NodeId, Slot>,
    /// Fetches served so far, per node.
    consumed: HashMap<NodeId, usize>,
}

/// The ephemeral memoization table of one evaluation pass.
///
/// `get` returns a value valid only within this context, such that the
/// underlying layer's forward function runs exactly once per context no
/// matter how many distinct consumers ask, or from how many threads.
///
/// Fan-out bookkeeping: the expected count of a node is the number of edges
/// referencing it across the whole network, computed once up front. Each
/// successful `get` consumes one of those references; the fetch reaching the
/// expected count takes the memo entry with it, and one more fetch is a
/// graph-consistency error rather than a recomputation.
pub struct EvalContext<'net> {
    network: &'net DagNetwork,
    expected: HashMap<NodeId, usize>,
    ledger: Mutex<Ledger>,
    config: EngineConfig,
}

impl<'net> EvalContext<'net> {
    /// Builds a context over `network`, seeding the given input values.
    /// Seeding installs each value as already-resolved; it does not count
    /// as consumption.
    pub(crate) fn new(network: &'net DagNetwork, seeds: Vec<(NodeId, EvalResult)>) -> Self {
        let config = *network.config();
        let expected = network.expected_counts();
        let mut calculated = HashMap::new();
        for (id, result) in seeds {
            let links = expected.get(&id).copied().unwrap_or(0).max(1);
            let wrapped = CountingAccumulator::wrap(result, links, config.aggregation_size());
            let slot = Promise::new();
            slot.fulfill(Ok(wrapped));
            calculated.insert(id, Arc::new(slot));
        }
        EvalContext {
            network,
            expected,
            ledger: Mutex::new(Ledger {
                calculated,
                consumed: HashMap::new(),
            }),
            config,
        }
    }

    /// The number of fetches node `id` must serve in this context. A node
    /// no edge references (the evaluation head) serves exactly one: the
    /// external caller.
    fn expected_count(&self, id: NodeId) -> usize {
        self.expected.get(&id).copied().unwrap_or(0).max(1)
    }

    /// Resolves node `id`, computing it on first request and serving the
    /// memoized value to every later one. Blocks while another thread is
    /// computing; a computation error is cached and returned identically
    /// to every caller of the same node.
    pub fn get(&self, id: NodeId) -> Result<EvalResult, GradNetError> {
        let expected = self.expected_count(id);
        let (slot, is_computer) = {
            let mut ledger = self.ledger.lock().expect("context lock poisoned");
            let used = ledger.consumed.get(&id).copied().unwrap_or(0);
            if used >= expected {
                return Err(GradNetError::FanOutExceeded { id, expected });
            }
            let now_used = used + 1;
            ledger.consumed.insert(id, now_used);
            match ledger.calculated.entry(id) {
                Entry::Occupied(entry) => {
                    let slot = Arc::clone(entry.get());
                    if now_used == expected {
                        // Last expected fetch: the memo entry goes with it.
                        entry.remove();
                    }
                    (slot, false)
                }
                Entry::Vacant(entry) => {
                    let slot: Slot = Arc::new(Promise::new());
                    if now_used < expected {
                        entry.insert(Arc::clone(&slot));
                    }
                    (slot, true)
                }
            }
        };

        if is_computer {
            // Computation runs outside the ledger lock so that sibling
            // branches resolve concurrently.
            let outcome = self.compute(id);
            slot.fulfill(outcome);
        }
        slot.wait()
    }

    fn compute(&self, id: NodeId) -> Result<EvalResult, GradNetError> {
        let node = self.network.node(id)?;
        match node {
            // Inputs are seeded, never computed; reaching here means the
            // caller did not provide a value for this slot.
            DagNode::Input { index } => Err(GradNetError::UnboundInput { index: *index }),
            DagNode::Inner { layer, inputs } => {
                let resolved: Vec<EvalResult> =
                    if self.config.single_threaded || inputs.len() <= 1 {
                        inputs.iter().map(|input| self.get(*input)).collect::<Result<_, _>>()?
                    } else {
                        inputs
                            .par_iter()
                            .map(|input| self.get(*input))
                            .collect::<Result<_, _>>()?
                    };
                let raw = layer.eval(resolved)?;
                log::trace!("node {id} computed by layer {}", layer.name());
                Ok(CountingAccumulator::wrap(
                    raw,
                    self.expected_count(id),
                    self.config.aggregation_size(),
                ))
            }
        }
    }

    /// Tears the context down: every remaining memo entry missed its
    /// expected consumption count. Stragglers are surfaced and then
    /// force-released by clearing the table.
    pub fn finish(&self) {
        let mut ledger = self.ledger.lock().expect("context lock poisoned");
        if !ledger.calculated.is_empty() {
            for id in ledger.calculated.keys() {
                let used = ledger.consumed.get(id).copied().unwrap_or(0);
                let expected = self.expected_count(*id);
                log::warn!(
                    "node {id} under-consumed at teardown: {used}/{expected} fetches; releasing"
                );
            }
            ledger.calculated.clear();
        }
        ledger.consumed.clear();
    }
}

// --- Tests ---
#[cfg(test)]
#[path = "context_test.rs"]
mod tests; // Link to the test file
