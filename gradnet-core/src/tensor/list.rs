// src/tensor/list.rs

use crate::error::GradNetError;
use crate::tensor::Tensor;

/// An ordered batch of same-shape tensors, the payload type carried along
/// every graph edge. Cloning a list clones handles, not storage.
#[derive(Debug, Clone)]
pub struct TensorList {
    tensors: Vec<Tensor>,
}

impl TensorList {
    /// Builds a list from tensors that must all share one shape.
    pub fn new(tensors: Vec<Tensor>) -> Result<Self, GradNetError> {
        let first = match tensors.first() {
            Some(t) => t.shape(),
            None => return Err(GradNetError::EmptyTensorList),
        };
        for tensor in &tensors[1..] {
            let shape = tensor.shape();
            if shape != first {
                return Err(GradNetError::ShapeMismatch {
                    expected: first,
                    actual: shape,
                    operation: "TensorList::new".to_string(),
                });
            }
        }
        Ok(TensorList { tensors })
    }

    /// Single-element list.
    pub fn from_tensor(tensor: Tensor) -> Self {
        TensorList {
            tensors: vec![tensor],
        }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Shape shared by every tensor in the list.
    pub fn shape(&self) -> Vec<usize> {
        self.tensors[0].shape()
    }

    pub fn get(&self, index: usize) -> &Tensor {
        &self.tensors[index]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.tensors.iter()
    }

    /// Elementwise sum of two equal-length, equal-shape lists.
    pub fn add(&self, other: &TensorList) -> Result<TensorList, GradNetError> {
        if self.len() != other.len() {
            return Err(GradNetError::DimensionMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        let tensors = self
            .tensors
            .iter()
            .zip(other.tensors.iter())
            .map(|(a, b)| a.add(b))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TensorList { tensors })
    }

    /// Elementwise scaling into a new list.
    pub fn scale(&self, factor: f64) -> TensorList {
        TensorList {
            tensors: self.tensors.iter().map(|t| t.scale(factor)).collect(),
        }
    }

    /// A list of the same arrangement filled with ones, the conventional
    /// seed gradient for a backward pass.
    pub fn ones_like(&self) -> TensorList {
        let shape = self.shape();
        let numel = self.tensors[0].numel();
        TensorList {
            tensors: (0..self.len())
                .map(|_| Tensor::from_parts(vec![1.0; numel], shape.clone()))
                .collect(),
        }
    }

    /// Scalar sum over every element of every tensor.
    pub fn sum(&self) -> f64 {
        self.tensors
            .iter()
            .map(|t| t.read_data().values.iter().sum::<f64>())
            .sum()
    }
}
