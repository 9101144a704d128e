// src/layer.rs

use crate::error::GradNetError;
use crate::graph::result::EvalResult;
use std::fmt::Debug;

/// A computational layer: the payload of an inner graph node.
///
/// `eval` receives exactly as many inputs as the node declared incoming
/// edges and is invoked exactly once per evaluation context; the engine's
/// memoization guarantees the latter, the layer checks the former. The
/// returned value's backward capability is expected to send one gradient to
/// each input it captured, which is why implementations take their inputs
/// by value and move them into the capability.
///
/// The trait requires `Debug + Send + Sync`: layers are shared behind `Arc`
/// across the threads resolving a pass.
pub trait Layer: Debug + Send + Sync {
    /// A short human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Computes the forward value for one evaluation context.
    fn eval(&self, inputs: Vec<EvalResult>) -> Result<EvalResult, GradNetError>;
}
