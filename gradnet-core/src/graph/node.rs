// src/graph/node.rs

use crate::layer::Layer;
use std::fmt;
use std::sync::Arc;

/// Stable identifier of a node within one [`DagNetwork`](crate::DagNetwork).
///
/// Nodes live in an id-addressed arena and refer to each other by id only;
/// there are no back-pointers between the network and its nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A vertex of the computation graph.
#[derive(Debug, Clone)]
pub enum DagNode {
    /// Bound to one of the network's declared input slots; its value is
    /// seeded into each evaluation rather than computed.
    Input { index: usize },
    /// Computes a layer over the values of its input nodes.
    Inner {
        layer: Arc<dyn Layer>,
        inputs: Vec<NodeId>,
    },
}

impl DagNode {
    /// The ids this node consumes, in declaration order.
    pub fn inputs(&self) -> &[NodeId] {
        match self {
            DagNode::Input { .. } => &[],
            DagNode::Inner { inputs, .. } => inputs,
        }
    }
}
