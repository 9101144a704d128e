// src/layers/mod.rs
// Reference layers over the batch payload. These are deliberately small:
// enough surface to exercise every engine path (pass-through gradients,
// fan-in sums, parameter deposits) without a numeric kernel library.

use crate::error::GradNetError;
use crate::graph::result::{Accumulate, DeltaBuffer, EvalResult};
use crate::layer::Layer;
use crate::tensor::{Tensor, TensorList};
use std::sync::Arc;

fn expect_arity(inputs: &[EvalResult], expected: usize) -> Result<(), GradNetError> {
    if inputs.len() != expected {
        return Err(GradNetError::InputArity {
            expected,
            actual: inputs.len(),
        });
    }
    Ok(())
}

/// Forwards its single input unchanged; gradients pass straight back.
#[derive(Debug, Default, Clone)]
pub struct Identity;

impl Identity {
    pub fn new() -> Self {
        Identity
    }
}

impl Layer for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn eval(&self, mut inputs: Vec<EvalResult>) -> Result<EvalResult, GradNetError> {
        expect_arity(&inputs, 1)?;
        let input = inputs.remove(0);
        let data = input.data().clone();
        Ok(EvalResult::new(data, Arc::new(PassThrough { input })))
    }
}

#[derive(Debug)]
struct PassThrough {
    input: EvalResult,
}

impl Accumulate for PassThrough {
    fn accumulate(
        &self,
        buffer: &DeltaBuffer,
        gradient: TensorList,
    ) -> Result<(), GradNetError> {
        self.input.accumulate(buffer, gradient)
    }
}

/// Elementwise sum of any number of same-shape inputs. The derivative with
/// respect to every input is one, so the upstream gradient is sent back
/// along each incoming edge unchanged.
#[derive(Debug, Default, Clone)]
pub struct Sum;

impl Sum {
    pub fn new() -> Self {
        Sum
    }
}

impl Layer for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    fn eval(&self, inputs: Vec<EvalResult>) -> Result<EvalResult, GradNetError> {
        if inputs.is_empty() {
            return Err(GradNetError::InputArity {
                expected: 1,
                actual: 0,
            });
        }
        let mut data = inputs[0].data().clone();
        for input in &inputs[1..] {
            data = data.add(input.data())?;
        }
        Ok(EvalResult::new(data, Arc::new(FanBack { inputs })))
    }
}

#[derive(Debug)]
struct FanBack {
    inputs: Vec<EvalResult>,
}

impl Accumulate for FanBack {
    fn accumulate(
        &self,
        buffer: &DeltaBuffer,
        gradient: TensorList,
    ) -> Result<(), GradNetError> {
        for input in &self.inputs {
            input.accumulate(buffer, gradient.clone())?;
        }
        Ok(())
    }
}

/// Multiplies its input by a fixed factor; gradients scale by the same
/// factor on the way back.
#[derive(Debug, Clone)]
pub struct Scale {
    factor: f64,
}

impl Scale {
    pub fn new(factor: f64) -> Self {
        Scale { factor }
    }
}

impl Layer for Scale {
    fn name(&self) -> &str {
        "scale"
    }

    fn eval(&self, mut inputs: Vec<EvalResult>) -> Result<EvalResult, GradNetError> {
        expect_arity(&inputs, 1)?;
        let input = inputs.remove(0);
        let data = input.data().scale(self.factor);
        Ok(EvalResult::new(
            data,
            Arc::new(ScaleBack {
                input,
                factor: self.factor,
            }),
        ))
    }
}

#[derive(Debug)]
struct ScaleBack {
    input: EvalResult,
    factor: f64,
}

impl Accumulate for ScaleBack {
    fn accumulate(
        &self,
        buffer: &DeltaBuffer,
        gradient: TensorList,
    ) -> Result<(), GradNetError> {
        self.input.accumulate(buffer, gradient.scale(self.factor))
    }
}

/// Adds a learnable bias tensor to every element of the batch.
///
/// The backward path deposits the bias gradient (summed across the batch)
/// into the pass's delta buffer under the bias tensor's identity, then
/// forwards the upstream gradient unchanged to the input.
#[derive(Debug, Clone)]
pub struct Bias {
    bias: Tensor,
}

impl Bias {
    pub fn new(bias: Tensor) -> Self {
        Bias { bias }
    }

    /// The live parameter storage this layer owns.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }
}

impl Layer for Bias {
    fn name(&self) -> &str {
        "bias"
    }

    fn eval(&self, mut inputs: Vec<EvalResult>) -> Result<EvalResult, GradNetError> {
        expect_arity(&inputs, 1)?;
        let input = inputs.remove(0);
        let shape = input.data().shape();
        if shape != self.bias.shape() {
            return Err(GradNetError::ShapeMismatch {
                expected: self.bias.shape(),
                actual: shape,
                operation: "Bias::eval".to_string(),
            });
        }
        let tensors = input
            .data()
            .iter()
            .map(|t| t.add(&self.bias))
            .collect::<Result<Vec<_>, _>>()?;
        let data = TensorList::new(tensors)?;
        Ok(EvalResult::new(
            data,
            Arc::new(BiasBack {
                input,
                bias: self.bias.clone(),
            }),
        ))
    }
}

#[derive(Debug)]
struct BiasBack {
    input: EvalResult,
    bias: Tensor,
}

impl Accumulate for BiasBack {
    fn accumulate(
        &self,
        buffer: &DeltaBuffer,
        gradient: TensorList,
    ) -> Result<(), GradNetError> {
        // d(out)/d(bias) = 1 per example: the bias gradient is the batch sum.
        let mut summed = vec![0.0; self.bias.numel()];
        for tensor in gradient.iter() {
            let guard = tensor.read_data();
            for (acc, v) in summed.iter_mut().zip(guard.values().iter()) {
                *acc += v;
            }
        }
        {
            let mut deltas = buffer.lock().expect("gradient buffer lock poisoned");
            deltas
                .get_or_insert(self.bias.id(), &self.bias)?
                .accumulate(&summed)?;
        }
        self.input.accumulate(buffer, gradient)
    }
}
