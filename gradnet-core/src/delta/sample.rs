// src/delta/sample.rs

use crate::delta::delta::DeltaSet;
use crate::delta::state::StateSet;
use crate::error::GradNetError;
use crate::tensor::TensorId;

/// The result of one measurement: an aggregate gradient, a snapshot of the
/// weights it was measured at, and the scalar loss.
///
/// Invariant: the weight snapshot covers at least every parameter the
/// gradient touches, so a consumer can always step along `delta` and walk
/// back via `weights`.
#[derive(Debug)]
pub struct PointSample {
    /// Aggregate gradient of this measurement.
    pub delta: DeltaSet<TensorId>,
    /// Weight snapshot the measurement was taken at.
    pub weights: StateSet<TensorId>,
    /// Scalar loss, summed over the examples measured.
    pub sum: f64,
    /// Step size this sample was measured at.
    pub rate: f64,
    /// Number of examples folded into `delta` and `sum`.
    pub count: usize,
}

impl PointSample {
    /// Builds a sample, checking the weight-coverage invariant.
    pub fn new(
        delta: DeltaSet<TensorId>,
        weights: StateSet<TensorId>,
        sum: f64,
        rate: f64,
        count: usize,
    ) -> Result<Self, GradNetError> {
        for key in delta.keys() {
            if !weights.contains_key(key) {
                return Err(GradNetError::SampleInvariant {
                    message: format!("gradient key {key} has no weight snapshot"),
                });
            }
        }
        Ok(PointSample {
            delta,
            weights,
            sum,
            rate,
            count,
        })
    }

    /// Combines two measurements taken at the same rate: gradients and
    /// losses sum, weight snapshots union.
    pub fn add(self, other: PointSample) -> Result<PointSample, GradNetError> {
        if self.rate != other.rate {
            return Err(GradNetError::RateMismatch {
                left: self.rate,
                right: other.rate,
            });
        }
        let mut delta = self.delta;
        delta.add_in_place(&other.delta)?;
        let weights = StateSet::union(self.weights, other.weights)?;
        PointSample::new(
            delta,
            weights,
            self.sum + other.sum,
            self.rate,
            self.count + other.count,
        )
    }

    /// Converts an accumulated batch sum into a per-example mean: divides
    /// `delta` and `sum` by `count` and resets `count` to 1. Weights are
    /// untouched.
    pub fn normalize(self) -> PointSample {
        if self.count <= 1 {
            return self;
        }
        let factor = 1.0 / self.count as f64;
        PointSample {
            delta: self.delta.scale(factor),
            weights: self.weights,
            sum: self.sum * factor,
            rate: self.rate,
            count: 1,
        }
    }

    /// Deep copy of both buffer sets.
    pub fn copy_full(&self) -> Result<PointSample, GradNetError> {
        PointSample::new(
            self.delta.copy(),
            self.weights.copy(),
            self.sum,
            self.rate,
            self.count,
        )
    }
}
