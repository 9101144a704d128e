// src/graph/result.rs

use crate::delta::DeltaSet;
use crate::error::GradNetError;
use crate::tensor::{TensorId, TensorList};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

/// The shared gradient sink for one measurement. Every backward capability
/// in one pass deposits parameter gradients into the same buffer.
pub type DeltaBuffer = Arc<Mutex<DeltaSet<TensorId>>>;

/// The backward capability attached to a forward value.
///
/// Implementations compute gradients with respect to their inputs, deposit
/// parameter gradients into `buffer`, and forward the rest to the inputs'
/// own capabilities. The trait requires `Debug + Send + Sync`: capabilities
/// are shared behind `Arc` and invoked from whichever thread finalizes the
/// last fan-in contribution.
pub trait Accumulate: Debug + Send + Sync {
    fn accumulate(&self, buffer: &DeltaBuffer, gradient: TensorList)
        -> Result<(), GradNetError>;
}

/// A forward value paired with its backward capability.
///
/// Clones are cheap handles onto the same value; each logical consumer of a
/// node holds one and calls `accumulate` at most once.
#[derive(Debug, Clone)]
pub struct EvalResult {
    data: TensorList,
    accumulator: Option<Arc<dyn Accumulate>>,
}

impl EvalResult {
    /// A value with a backward capability.
    pub fn new(data: TensorList, accumulator: Arc<dyn Accumulate>) -> Self {
        EvalResult {
            data,
            accumulator: Some(accumulator),
        }
    }

    /// A value without a backward capability; `accumulate` is a no-op.
    pub fn constant(data: TensorList) -> Self {
        EvalResult {
            data,
            accumulator: None,
        }
    }

    pub fn data(&self) -> &TensorList {
        &self.data
    }

    /// Whether a backward capability is attached.
    pub fn is_alive(&self) -> bool {
        self.accumulator.is_some()
    }

    /// Sends one gradient contribution back through this value.
    pub fn accumulate(
        &self,
        buffer: &DeltaBuffer,
        gradient: TensorList,
    ) -> Result<(), GradNetError> {
        match &self.accumulator {
            Some(accumulator) => accumulator.accumulate(buffer, gradient),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CallCounter {
        calls: AtomicUsize,
    }

    impl Accumulate for CallCounter {
        fn accumulate(
            &self,
            _buffer: &DeltaBuffer,
            _gradient: TensorList,
        ) -> Result<(), GradNetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn list(values: Vec<f64>) -> TensorList {
        let len = values.len();
        TensorList::from_tensor(Tensor::new(values, vec![len]).unwrap())
    }

    #[test]
    fn constant_results_swallow_gradients() {
        let result = EvalResult::constant(list(vec![1.0]));
        assert!(!result.is_alive());
        let buffer: DeltaBuffer = Arc::new(Mutex::new(DeltaSet::new()));
        result.accumulate(&buffer, list(vec![1.0])).unwrap();
        assert!(buffer.lock().unwrap().is_empty());
    }

    #[test]
    fn clones_share_the_capability() {
        let counter = Arc::new(CallCounter::default());
        let result = EvalResult::new(list(vec![1.0]), counter.clone());
        assert!(result.is_alive());

        let buffer: DeltaBuffer = Arc::new(Mutex::new(DeltaSet::new()));
        result.clone().accumulate(&buffer, list(vec![1.0])).unwrap();
        result.accumulate(&buffer, list(vec![1.0])).unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
    }
}
