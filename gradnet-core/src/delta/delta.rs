// src/delta/delta.rs

use crate::error::GradNetError;
use crate::tensor::pool::{BufferPool, PooledBuffer};
use crate::tensor::Tensor;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A gradient accumulator bound to one live parameter buffer.
///
/// `target` is the storage being optimized; `delta` is the running
/// elementwise sum of every contribution received so far. A shared parameter
/// can receive thousands of small backward contributions in one pass, so
/// additions run through Kahan-compensated summation with an explicit
/// compensation array. Both scratch arrays are on loan from the set's pool
/// and go back when the `Delta` drops.
#[derive(Debug)]
pub struct Delta<K> {
    key: K,
    target: Tensor,
    delta: PooledBuffer,
    compensation: PooledBuffer,
}

impl<K> Delta<K> {
    fn new(key: K, target: &Tensor, pool: &Arc<BufferPool>) -> Self {
        let numel = target.numel();
        Delta {
            key,
            target: target.clone(),
            delta: pool.loan(numel),
            compensation: pool.loan(numel),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// The live parameter storage this accumulator is bound to.
    pub fn target(&self) -> &Tensor {
        &self.target
    }

    /// The accumulated gradient, compensation already folded in.
    pub fn values(&self) -> &[f64] {
        &self.delta
    }

    pub fn len(&self) -> usize {
        self.delta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    /// Adds `data` elementwise into the accumulator.
    ///
    /// Non-finite contributions are sanitized to zero instead of poisoning
    /// the whole buffer: one corrupted element must not turn every later
    /// read into NaN.
    pub fn accumulate(&mut self, data: &[f64]) -> Result<(), GradNetError> {
        if data.len() != self.delta.len() {
            return Err(GradNetError::DimensionMismatch {
                expected: self.delta.len(),
                actual: data.len(),
            });
        }
        for i in 0..data.len() {
            let mut x = data[i];
            if !x.is_finite() {
                x = 0.0;
            }
            // Kahan step: the compensation array carries the low-order bits
            // lost by the previous additions at this index.
            let y = x - self.compensation[i];
            let t = self.delta[i] + y;
            self.compensation[i] = (t - self.delta[i]) - y;
            self.delta[i] = t;
            if !self.delta[i].is_finite() {
                self.delta[i] = 0.0;
                self.compensation[i] = 0.0;
            }
        }
        Ok(())
    }

    fn duplicate(&self, pool: &Arc<BufferPool>) -> Delta<K>
    where
        K: Clone,
    {
        let mut delta = pool.loan(self.delta.len());
        let mut compensation = pool.loan(self.compensation.len());
        delta.copy_from_slice(&self.delta);
        compensation.copy_from_slice(&self.compensation);
        Delta {
            key: self.key.clone(),
            target: self.target.clone(),
            delta,
            compensation,
        }
    }

    fn scale_in_place(&mut self, factor: f64) {
        for v in self.delta.iter_mut() {
            *v *= factor;
        }
        for v in self.compensation.iter_mut() {
            *v *= factor;
        }
    }
}

/// One measurement's aggregate gradient over a set of parameter buffers.
///
/// Entries are created lazily on first access and keyed by the identity of
/// the parameter they feed; rebinding a key to different storage is a
/// lifecycle error, never a silent overwrite.
#[derive(Debug)]
pub struct DeltaSet<K> {
    map: HashMap<K, Delta<K>>,
    pool: Arc<BufferPool>,
}

impl<K: Eq + Hash + Clone> DeltaSet<K> {
    pub fn new() -> Self {
        Self::with_pool(Arc::new(BufferPool::new()))
    }

    /// Builds a set whose scratch arrays are loaned from `pool`.
    pub fn with_pool(pool: Arc<BufferPool>) -> Self {
        DeltaSet {
            map: HashMap::new(),
            pool,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&Delta<K>> {
        self.map.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Delta<K>)> {
        self.map.iter()
    }

    /// Fetches the accumulator for `key`, creating it on first access.
    ///
    /// On reuse, asserts that `target` is the same storage the key was first
    /// bound to. This ties every gradient unambiguously to the exact live
    /// parameter buffer being optimized.
    pub fn get_or_insert(
        &mut self,
        key: K,
        target: &Tensor,
    ) -> Result<&mut Delta<K>, GradNetError> {
        match self.map.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let delta = entry.into_mut();
                if !delta.target.shares_storage(target) {
                    return Err(GradNetError::TargetMismatch {
                        operation: "DeltaSet::get_or_insert".to_string(),
                    });
                }
                Ok(delta)
            }
            Entry::Vacant(entry) => Ok(entry.insert(Delta::new(key, target, &self.pool))),
        }
    }

    /// Deep copy: fresh scratch arrays, same targets.
    pub fn copy(&self) -> DeltaSet<K> {
        let mut map = HashMap::with_capacity(self.map.len());
        for (key, delta) in &self.map {
            map.insert(key.clone(), delta.duplicate(&self.pool));
        }
        DeltaSet {
            map,
            pool: Arc::clone(&self.pool),
        }
    }

    /// Accumulates every entry of `other` into this set. Keys missing on
    /// this side are created against `other`'s targets.
    pub fn add_in_place(&mut self, other: &DeltaSet<K>) -> Result<(), GradNetError> {
        for (key, delta) in &other.map {
            self.get_or_insert(key.clone(), &delta.target)?
                .accumulate(&delta.delta)?;
        }
        Ok(())
    }

    /// Key-union elementwise sum into a new set; a key missing on one side
    /// is treated as zero.
    pub fn add(&self, other: &DeltaSet<K>) -> Result<DeltaSet<K>, GradNetError> {
        let mut result = self.copy();
        result.add_in_place(other)?;
        Ok(result)
    }

    /// `self - other` over the key union.
    pub fn subtract(&self, other: &DeltaSet<K>) -> Result<DeltaSet<K>, GradNetError> {
        self.add(&other.scale(-1.0))
    }

    /// Every entry scaled by `factor`, into a new set.
    pub fn scale(&self, factor: f64) -> DeltaSet<K> {
        let mut result = self.copy();
        for delta in result.map.values_mut() {
            delta.scale_in_place(factor);
        }
        result
    }

    /// Euclidean norm over every element of every entry.
    pub fn magnitude(&self) -> f64 {
        self.map
            .values()
            .flat_map(|delta| delta.delta.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }

    /// Inner product over the common keys; disjoint keys contribute zero.
    pub fn dot(&self, other: &DeltaSet<K>) -> Result<f64, GradNetError> {
        let mut sum = 0.0;
        for (key, delta) in &self.map {
            if let Some(them) = other.map.get(key) {
                if !delta.target.shares_storage(&them.target) {
                    return Err(GradNetError::TargetMismatch {
                        operation: "DeltaSet::dot".to_string(),
                    });
                }
                sum += delta
                    .delta
                    .iter()
                    .zip(them.delta.iter())
                    .map(|(a, b)| a * b)
                    .sum::<f64>();
            }
        }
        Ok(sum)
    }

    /// The set scaled to unit magnitude. A zero set is returned unchanged
    /// rather than filled with non-finite values.
    pub fn unit(&self) -> DeltaSet<K> {
        let magnitude = self.magnitude();
        if magnitude == 0.0 {
            return self.copy();
        }
        self.scale(1.0 / magnitude)
    }
}

impl<K: Eq + Hash + Clone> Default for DeltaSet<K> {
    fn default() -> Self {
        DeltaSet::new()
    }
}

// --- Tests ---
#[cfg(test)]
#[path = "delta_test.rs"]
mod tests; // Link to the test file
