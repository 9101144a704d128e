// src/graph/mod.rs
// The execution engine: memoized forward resolution over an id-addressed
// node arena, counted gradient finalization on the way back.

pub mod context;
pub mod counting;
pub mod network;
pub mod node;
pub(crate) mod promise;
pub mod result;

pub use context::EvalContext;
pub use network::DagNetwork;
pub use node::{DagNode, NodeId};
pub use result::{Accumulate, DeltaBuffer, EvalResult};
