// src/graph/counting.rs

use crate::error::GradNetError;
use crate::graph::result::{Accumulate, DeltaBuffer, EvalResult};
use crate::tensor::TensorList;
use std::sync::{Arc, Mutex};

/// Coalesces the fan-in of one node's backward edges.
///
/// A node feeding K downstream consumers receives K partial gradients; the
/// wrapped value's true capability must see their elementwise sum exactly
/// once, after the last expected contribution arrives. Contributions may
/// come from any thread in any order; summation order is unspecified and
/// mathematically exact modulo floating-point associativity.
#[derive(Debug)]
pub(crate) struct CountingAccumulator {
    fwd_links: usize,
    threshold: usize,
    inner: EvalResult,
    pending: Mutex<Pending>,
}

#[derive(Debug, Default)]
struct Pending {
    accumulations: usize,
    passback: Vec<TensorList>,
    finalized: bool,
}

impl CountingAccumulator {
    /// Wraps `inner` so that `fwd_links` consumers can each fetch the value
    /// and send back one gradient. A value without a backward capability
    /// needs no counting; it is passed through as-is.
    pub fn wrap(inner: EvalResult, fwd_links: usize, threshold: usize) -> EvalResult {
        if !inner.is_alive() {
            return inner;
        }
        let data = inner.data().clone();
        let accumulator = CountingAccumulator {
            fwd_links,
            threshold: threshold.max(1),
            inner,
            pending: Mutex::new(Pending::default()),
        };
        EvalResult::new(data, Arc::new(accumulator))
    }

    fn reduce(buffers: Vec<TensorList>) -> Result<TensorList, GradNetError> {
        let mut iter = buffers.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| GradNetError::InternalError("reduced an empty passback".to_string()))?;
        iter.try_fold(first, |acc, next| acc.add(&next))
    }
}

impl Accumulate for CountingAccumulator {
    fn accumulate(
        &self,
        buffer: &DeltaBuffer,
        gradient: TensorList,
    ) -> Result<(), GradNetError> {
        // Single-consumer values forward immediately, no buffering.
        if self.fwd_links <= 1 {
            {
                let mut pending = self.pending.lock().expect("accumulator lock poisoned");
                if pending.accumulations >= self.fwd_links {
                    return Err(GradNetError::FanInExceeded {
                        expected: self.fwd_links,
                    });
                }
                pending.accumulations += 1;
            }
            return self.inner.accumulate(buffer, gradient);
        }

        let combined = {
            let mut pending = self.pending.lock().expect("accumulator lock poisoned");
            if pending.finalized || pending.accumulations >= self.fwd_links {
                return Err(GradNetError::FanInExceeded {
                    expected: self.fwd_links,
                });
            }
            pending.passback.push(gradient);
            // Bound peak memory to O(threshold) pending lists: reduce early
            // instead of holding one buffer per fan-in edge.
            if pending.passback.len() > self.threshold {
                let merged = Self::reduce(std::mem::take(&mut pending.passback))?;
                pending.passback.push(merged);
            }
            pending.accumulations += 1;
            if pending.accumulations == self.fwd_links {
                let merged = Self::reduce(std::mem::take(&mut pending.passback))?;
                pending.accumulations = 0;
                pending.finalized = true;
                Some(merged)
            } else {
                None
            }
        };

        // The true accumulate runs outside the lock; it may recurse
        // arbitrarily deep into upstream capabilities.
        match combined {
            Some(merged) => self.inner.accumulate(buffer, merged),
            None => Ok(()),
        }
    }
}

// --- Tests ---
#[cfg(test)]
#[path = "counting_test.rs"]
mod tests; // Link to the test file
