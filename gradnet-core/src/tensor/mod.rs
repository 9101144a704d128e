// src/tensor/mod.rs

use crate::error::GradNetError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod create;
pub mod list;
pub mod pool;

pub use create::{full, ones, randn, uniform, zeros};
pub use list::TensorList;
pub use pool::{BufferPool, PooledBuffer};

/// Stable identity of a tensor's backing storage, assigned lazily on first
/// request. Used as the parameter key when attributing gradients: two
/// `Tensor` handles cloned from each other share one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

static NEXT_TENSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Shared, lock-guarded contents of a [`Tensor`].
#[derive(Debug)]
pub struct TensorData {
    pub(crate) shape: Vec<usize>,
    pub(crate) values: Vec<f64>,
    id: Option<TensorId>,
}

impl TensorData {
    pub fn numel(&self) -> usize {
        self.values.len()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// A dense, fixed-shape buffer of `f64` values.
///
/// `Tensor` uses `Arc<RwLock<TensorData>>` internally to allow for:
/// 1.  **Shared Ownership:** Multiple `Tensor` instances can point to the
///     same underlying data without cloning the data itself (cheap clones).
///     The `Arc` strong count is the ownership count: storage is returned
///     when the last handle drops.
/// 2.  **Interior Mutability:** Live parameter storage is additively mutated
///     in place through shared handles; the `RwLock` keeps that thread safe.
pub struct Tensor {
    pub(crate) data: Arc<RwLock<TensorData>>,
}

impl Tensor {
    /// Creates a new Tensor with the given data and shape.
    ///
    /// # Errors
    /// Returns [`GradNetError::TensorCreation`] if the data length does not
    /// match the element count implied by `shape`.
    pub fn new(values: Vec<f64>, shape: Vec<usize>) -> Result<Self, GradNetError> {
        let numel: usize = shape.iter().product();
        if values.len() != numel {
            return Err(GradNetError::TensorCreation {
                data_len: values.len(),
                shape,
            });
        }
        Ok(Self::from_parts(values, shape))
    }

    /// Builds a tensor without re-validating `values.len()` against `shape`.
    pub(crate) fn from_parts(values: Vec<f64>, shape: Vec<usize>) -> Self {
        Tensor {
            data: Arc::new(RwLock::new(TensorData {
                shape,
                values,
                id: None,
            })),
        }
    }

    /// Returns a clone of the tensor's shape.
    pub fn shape(&self) -> Vec<usize> {
        self.read_data().shape.clone()
    }

    /// Returns the number of elements in the tensor.
    pub fn numel(&self) -> usize {
        self.read_data().values.len()
    }

    /// Copies the tensor's values out into a fresh `Vec`.
    pub fn to_vec(&self) -> Vec<f64> {
        self.read_data().values.clone()
    }

    /// Number of live handles sharing this tensor's storage.
    pub fn owners(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// True when both handles share the same backing storage.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Returns this tensor's identity, assigning one on first request.
    ///
    /// The id lives with the storage, not the handle: every clone of this
    /// tensor observes the same id once assigned.
    pub fn id(&self) -> TensorId {
        if let Some(id) = self.read_data().id {
            return id;
        }
        let mut guard = self.write_data();
        if let Some(id) = guard.id {
            // Another thread won the assignment race.
            return id;
        }
        let id = TensorId(NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed));
        guard.id = Some(id);
        id
    }

    /// Acquires a read lock on the tensor's data.
    ///
    /// Panics if the lock is poisoned.
    pub fn read_data(&self) -> RwLockReadGuard<'_, TensorData> {
        self.data.read().expect("tensor lock poisoned")
    }

    /// Acquires a write lock on the tensor's data.
    ///
    /// Panics if the lock is poisoned.
    pub fn write_data(&self) -> RwLockWriteGuard<'_, TensorData> {
        self.data.write().expect("tensor lock poisoned")
    }

    /// Elementwise sum into a new tensor.
    pub fn add(&self, other: &Tensor) -> Result<Tensor, GradNetError> {
        if self.shares_storage(other) {
            return Ok(self.scale(2.0));
        }
        let a = self.read_data();
        let b = other.read_data();
        if a.shape != b.shape {
            return Err(GradNetError::ShapeMismatch {
                expected: a.shape.clone(),
                actual: b.shape.clone(),
                operation: "add".to_string(),
            });
        }
        let values = a
            .values
            .iter()
            .zip(b.values.iter())
            .map(|(x, y)| x + y)
            .collect();
        Ok(Tensor::from_parts(values, a.shape.clone()))
    }

    /// Elementwise in-place addition: `self += other`.
    pub fn add_assign(&self, other: &Tensor) -> Result<(), GradNetError> {
        if self.shares_storage(other) {
            // x += x, single guard to avoid read/write on the same lock.
            let mut guard = self.write_data();
            for v in &mut guard.values {
                *v += *v;
            }
            return Ok(());
        }
        let b = other.read_data();
        let mut a = self.write_data();
        if a.shape != b.shape {
            return Err(GradNetError::ShapeMismatch {
                expected: a.shape.clone(),
                actual: b.shape.clone(),
                operation: "add_assign".to_string(),
            });
        }
        for (x, y) in a.values.iter_mut().zip(b.values.iter()) {
            *x += y;
        }
        Ok(())
    }

    /// Elementwise scaling into a new tensor.
    pub fn scale(&self, factor: f64) -> Tensor {
        let guard = self.read_data();
        let values = guard.values.iter().map(|v| v * factor).collect();
        Tensor::from_parts(values, guard.shape.clone())
    }

    /// Overwrites the tensor's values from a slice of the same length.
    pub fn fill_from(&self, values: &[f64]) -> Result<(), GradNetError> {
        let mut guard = self.write_data();
        if guard.values.len() != values.len() {
            return Err(GradNetError::DimensionMismatch {
                expected: guard.values.len(),
                actual: values.len(),
            });
        }
        guard.values.copy_from_slice(values);
        Ok(())
    }
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Tensor {
            data: Arc::clone(&self.data), // Clone the Arc, not the TensorData
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.read_data();
        f.debug_struct("Tensor")
            .field("shape", &guard.shape)
            .field("values", &guard.values)
            .finish()
    }
}
