// src/graph/network.rs

use crate::config::EngineConfig;
use crate::delta::{DeltaSet, PointSample, StateSet};
use crate::error::GradNetError;
use crate::graph::context::EvalContext;
use crate::graph::node::{DagNode, NodeId};
use crate::graph::result::{DeltaBuffer, EvalResult};
use crate::layer::Layer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A directed acyclic graph of computational layers.
///
/// Nodes are held in an id-addressed arena and refer to their inputs by id;
/// acyclicity holds by construction because a node may only reference ids
/// that already exist. Evaluation is driven through an ephemeral
/// [`EvalContext`] so that concurrent passes over the same network never
/// share memoized state.
#[derive(Debug)]
pub struct DagNetwork {
    nodes: HashMap<NodeId, DagNode>,
    order: Vec<NodeId>,
    input_ids: Vec<NodeId>,
    head: Option<NodeId>,
    next_id: u64,
    config: EngineConfig,
    /// Set on first evaluation; live nodes may no longer swap layers.
    evaluated: AtomicBool,
}

impl DagNetwork {
    pub fn new(config: EngineConfig) -> Self {
        DagNetwork {
            nodes: HashMap::new(),
            order: Vec::new(),
            input_ids: Vec::new(),
            head: None,
            next_id: 0,
            config,
            evaluated: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Declares a network input slot and returns its node id. Values for
    /// the slots are supplied to [`eval`](Self::eval) in declaration order.
    pub fn add_input(&mut self) -> NodeId {
        let id = self.next_id();
        let index = self.input_ids.len();
        self.nodes.insert(id, DagNode::Input { index });
        self.order.push(id);
        self.input_ids.push(id);
        id
    }

    /// Adds an inner node computing `layer` over `inputs`. The most
    /// recently added node is the evaluation head unless
    /// [`set_head`](Self::set_head) overrides it.
    ///
    /// # Errors
    /// [`GradNetError::UnknownNode`] if any input id is not part of this
    /// network.
    pub fn add(
        &mut self,
        layer: Arc<dyn Layer>,
        inputs: &[NodeId],
    ) -> Result<NodeId, GradNetError> {
        for input in inputs {
            if !self.nodes.contains_key(input) {
                return Err(GradNetError::UnknownNode { id: *input });
            }
        }
        let id = self.next_id();
        self.nodes.insert(
            id,
            DagNode::Inner {
                layer,
                inputs: inputs.to_vec(),
            },
        );
        self.order.push(id);
        Ok(id)
    }

    /// Chooses the node whose value [`eval`](Self::eval) returns.
    pub fn set_head(&mut self, id: NodeId) -> Result<(), GradNetError> {
        if !self.nodes.contains_key(&id) {
            return Err(GradNetError::UnknownNode { id });
        }
        self.head = Some(id);
        Ok(())
    }

    /// The current evaluation head: the explicit choice, or the most
    /// recently added node.
    pub fn head(&self) -> Option<NodeId> {
        self.head.or_else(|| self.order.last().copied())
    }

    /// Swaps the layer of an inner node. Rejected once the network has
    /// evaluated: a live node's semantics must not change under a result
    /// someone may still be backpropagating through.
    pub fn replace_layer(
        &mut self,
        id: NodeId,
        layer: Arc<dyn Layer>,
    ) -> Result<(), GradNetError> {
        if self.evaluated.load(Ordering::SeqCst) {
            return Err(GradNetError::NodeFrozen { id });
        }
        match self.nodes.get_mut(&id) {
            Some(DagNode::Inner { layer: slot, .. }) => {
                *slot = layer;
                Ok(())
            }
            Some(DagNode::Input { .. }) | None => Err(GradNetError::UnknownNode { id }),
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&DagNode, GradNetError> {
        self.nodes.get(&id).ok_or(GradNetError::UnknownNode { id })
    }

    /// Static fan-out of every node: the number of edges referencing it,
    /// over the whole node set. Branches not reachable from the head still
    /// contribute; a pass that leaves them unresolved is surfaced at
    /// context teardown.
    pub(crate) fn expected_counts(&self) -> HashMap<NodeId, usize> {
        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        for node in self.nodes.values() {
            for input in node.inputs() {
                *counts.entry(*input).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Builds an evaluation context seeded with the given input values, in
    /// declaration order. Useful for resolving several heads within one
    /// pass; remember to call [`EvalContext::finish`] when done.
    pub fn context(&self, inputs: Vec<EvalResult>) -> Result<EvalContext<'_>, GradNetError> {
        if inputs.len() != self.input_ids.len() {
            return Err(GradNetError::InputArity {
                expected: self.input_ids.len(),
                actual: inputs.len(),
            });
        }
        self.evaluated.store(true, Ordering::SeqCst);
        let seeds = self
            .input_ids
            .iter()
            .copied()
            .zip(inputs)
            .collect::<Vec<_>>();
        Ok(EvalContext::new(self, seeds))
    }

    /// Evaluates the head node over the given input values.
    ///
    /// Builds a fresh context, seeds the inputs, resolves the head and
    /// tears the context down. The returned value carries the backward
    /// capability of the whole pass: calling `accumulate` on it once drives
    /// gradients to every parameter and every input the head depends on.
    pub fn eval(&self, inputs: Vec<EvalResult>) -> Result<EvalResult, GradNetError> {
        let head = self.head().ok_or_else(|| {
            GradNetError::InternalError("eval on an empty network".to_string())
        })?;
        log::debug!("evaluating head {head}");
        let context = self.context(inputs)?;
        let result = context.get(head);
        context.finish();
        result
    }

    /// One full measurement: forward, backward with a unit seed gradient,
    /// and packaging of the touched parameters.
    ///
    /// `sum` is the scalar sum of the head output; the weight snapshot
    /// covers exactly the parameters the gradient touched, taken at their
    /// current (pre-step) values.
    pub fn measure(
        &self,
        inputs: Vec<EvalResult>,
        rate: f64,
    ) -> Result<PointSample, GradNetError> {
        let result = self.eval(inputs)?;
        let sum = result.data().sum();

        let buffer: DeltaBuffer = Arc::new(Mutex::new(DeltaSet::new()));
        let seed = result.data().ones_like();
        result.accumulate(&buffer, seed)?;

        let delta = Arc::try_unwrap(buffer)
            .map_err(|_| {
                GradNetError::InternalError(
                    "gradient buffer still shared after backward".to_string(),
                )
            })?
            .into_inner()
            .expect("gradient buffer lock poisoned");

        let mut weights = StateSet::new();
        for (key, entry) in delta.iter() {
            weights.get_or_insert(*key, entry.target())?;
        }
        PointSample::new(delta, weights, sum, rate, 1)
    }
}

impl Default for DagNetwork {
    fn default() -> Self {
        DagNetwork::new(EngineConfig::default())
    }
}

// --- Tests ---
#[cfg(test)]
#[path = "network_test.rs"]
mod tests; // Link to the test file
