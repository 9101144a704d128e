use crate::graph::node::NodeId;
use thiserror::Error;

/// Custom error type for the GradNet engine.
///
/// `Clone` matters here: an error raised while a node is being computed is
/// cached in the evaluation context and re-raised to every thread blocked on
/// that node, so the value must be cheap to duplicate. `PartialEq` is kept
/// for easier testing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradNetError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?} during operation {operation}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
        operation: String,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Tensor creation error: data length {data_len} does not match shape {shape:?}")]
    TensorCreation { data_len: usize, shape: Vec<usize> },

    #[error("Cannot build a tensor list from an empty set of tensors")]
    EmptyTensorList,

    #[error("Unknown node id {id} in this network")]
    UnknownNode { id: NodeId },

    #[error("Input slot {index} was not seeded with a value for this evaluation")]
    UnboundInput { index: usize },

    #[error("Input arity mismatch: expected {expected} inputs, got {actual}")]
    InputArity { expected: usize, actual: usize },

    #[error("Node {id} was fetched more than its expected {expected} times in one evaluation")]
    FanOutExceeded { id: NodeId, expected: usize },

    #[error("Accumulator received more than its expected {expected} contributions")]
    FanInExceeded { expected: usize },

    #[error("Node {id} can no longer be modified: the network has already evaluated")]
    NodeFrozen { id: NodeId },

    #[error("Accumulator key is already bound to different parameter storage during {operation}")]
    TargetMismatch { operation: String },

    #[error("Cannot combine samples measured at different rates: {left} vs {right}")]
    RateMismatch { left: f64, right: f64 },

    #[error("Point sample invariant violated: {message}")]
    SampleInvariant { message: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}
