//! Core execution engine for GradNet: a DAG of computational layers with
//! memoized, exactly-once forward evaluation and counted, exactly-once
//! gradient finalization, plus the delta/state buffer algebra an optimizer
//! consumes.

pub mod config;
pub mod delta;
pub mod error;
pub mod graph;
pub mod layer;
pub mod layers;
pub mod tensor;

// Re-export the main surface so callers can use `gradnet_core::DagNetwork`.
pub use config::EngineConfig;
pub use delta::{Delta, DeltaSet, PointSample, State, StateSet};
pub use error::GradNetError;
pub use graph::{Accumulate, DagNetwork, DeltaBuffer, EvalResult, NodeId};
pub use layer::Layer;
pub use tensor::{Tensor, TensorId, TensorList};
