// src/delta/state.rs

use crate::error::GradNetError;
use crate::tensor::pool::{BufferPool, PooledBuffer};
use crate::tensor::Tensor;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A snapshot of one live parameter buffer.
///
/// `backup` copies target into the snapshot, `restore` copies it back. The
/// snapshot array is on loan from the owning set's pool.
#[derive(Debug)]
pub struct State<K> {
    key: K,
    target: Tensor,
    snapshot: PooledBuffer,
}

impl<K> State<K> {
    fn new(key: K, target: &Tensor, pool: &Arc<BufferPool>) -> Self {
        let mut state = State {
            key,
            target: target.clone(),
            snapshot: pool.loan(target.numel()),
        };
        state.backup();
        state
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn target(&self) -> &Tensor {
        &self.target
    }

    /// The snapshot values as last backed up.
    pub fn values(&self) -> &[f64] {
        &self.snapshot
    }

    /// Copies the live target values into the snapshot.
    pub fn backup(&mut self) {
        let guard = self.target.read_data();
        self.snapshot.copy_from_slice(guard.values());
    }

    /// Writes the snapshot back over the live target values.
    pub fn restore(&self) -> Result<(), GradNetError> {
        self.target.fill_from(&self.snapshot)
    }

    fn duplicate(&self, pool: &Arc<BufferPool>) -> State<K>
    where
        K: Clone,
    {
        let mut snapshot = pool.loan(self.snapshot.len());
        snapshot.copy_from_slice(&self.snapshot);
        State {
            key: self.key.clone(),
            target: self.target.clone(),
            snapshot,
        }
    }
}

/// A weight snapshot across a set of parameters, keyed like
/// [`DeltaSet`](crate::delta::DeltaSet).
#[derive(Debug)]
pub struct StateSet<K> {
    map: HashMap<K, State<K>>,
    pool: Arc<BufferPool>,
}

impl<K: Eq + Hash + Clone> StateSet<K> {
    pub fn new() -> Self {
        Self::with_pool(Arc::new(BufferPool::new()))
    }

    pub fn with_pool(pool: Arc<BufferPool>) -> Self {
        StateSet {
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

    pub fn get(&self, key: &K) -> Option<&State<K>> {
        self.map.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &State<K>)> {
        self.map.iter()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Fetches the snapshot for `key`, creating it (and backing up the
    /// current target values) on first access. As with delta entries,
    /// rebinding a key to different storage is a lifecycle error.
    pub fn get_or_insert(
        &mut self,
        key: K,
        target: &Tensor,
    ) -> Result<&mut State<K>, GradNetError> {
        match self.map.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let state = entry.into_mut();
                if !state.target.shares_storage(target) {
                    return Err(GradNetError::TargetMismatch {
                        operation: "StateSet::get_or_insert".to_string(),
                    });
                }
                Ok(state)
            }
            Entry::Vacant(entry) => Ok(entry.insert(State::new(key, target, &self.pool))),
        }
    }

    /// Restores every snapshot back into its live target.
    pub fn restore(&self) -> Result<(), GradNetError> {
        for state in self.map.values() {
            state.restore()?;
        }
        Ok(())
    }

    /// Key-wise merge. When both sides define a key the targets must be the
    /// same storage and one copy is kept; this prevents double-counting a
    /// parameter reachable via two aggregation paths.
    pub fn union(a: StateSet<K>, b: StateSet<K>) -> Result<StateSet<K>, GradNetError> {
        let mut merged = a;
        for (key, state) in b.map {
            match merged.map.entry(key) {
                Entry::Occupied(entry) => {
                    if !entry.get().target.shares_storage(&state.target) {
                        return Err(GradNetError::TargetMismatch {
                            operation: "StateSet::union".to_string(),
                        });
                    }
                    // Keep the copy already present.
                }
                Entry::Vacant(entry) => {
                    entry.insert(state);
                }
            }
        }
        Ok(merged)
    }

    /// Deep copy: fresh snapshot arrays, same targets.
    pub fn copy(&self) -> StateSet<K> {
        let mut map = HashMap::with_capacity(self.map.len());
        for (key, state) in &self.map {
            map.insert(key.clone(), state.duplicate(&self.pool));
        }
        StateSet {
            map,
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for StateSet<K> {
    fn default() -> Self {
        StateSet::new()
    }
}
