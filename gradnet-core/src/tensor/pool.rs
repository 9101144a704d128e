// src/tensor/pool.rs

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Buffers kept per length before further returns are dropped on the floor.
const MAX_SHELF: usize = 64;

/// A thread-safe recycler for gradient and snapshot scratch arrays.
///
/// Accumulating over a large graph loans thousands of short-lived `f64`
/// arrays; recycling them by length keeps the allocator out of the backward
/// path. Every loan is released exactly once: the loan is a guard value and
/// the release happens in its `Drop`.
pub struct BufferPool {
    shelves: Mutex<HashMap<usize, Vec<Vec<f64>>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            shelves: Mutex::new(HashMap::new()),
        }
    }

    /// Loans a zeroed buffer of `len` elements, recycling a previously
    /// released one when available.
    pub fn loan(self: &Arc<Self>, len: usize) -> PooledBuffer {
        let recycled = {
            let mut shelves = self.shelves.lock().expect("pool lock poisoned");
            shelves.get_mut(&len).and_then(Vec::pop)
        };
        let values = match recycled {
            Some(mut values) => {
                values.iter_mut().for_each(|v| *v = 0.0);
                values
            }
            None => vec![0.0; len],
        };
        PooledBuffer {
            values,
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, values: Vec<f64>) {
        let mut shelves = self.shelves.lock().expect("pool lock poisoned");
        let shelf = shelves.entry(values.len()).or_default();
        if shelf.len() < MAX_SHELF {
            shelf.push(values);
        }
    }

    /// Number of idle buffers currently held for `len`.
    pub fn idle(&self, len: usize) -> usize {
        let shelves = self.shelves.lock().expect("pool lock poisoned");
        shelves.get(&len).map_or(0, Vec::len)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shelves = self.shelves.lock().expect("pool lock poisoned");
        let held: usize = shelves.values().map(Vec::len).sum();
        f.debug_struct("BufferPool").field("idle", &held).finish()
    }
}

/// A scratch array on loan from a [`BufferPool`]. Dereferences to `[f64]`
/// and returns itself to the pool when dropped.
pub struct PooledBuffer {
    values: Vec<f64>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Deref for PooledBuffer {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.values
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let values = std::mem::take(&mut self.values);
        self.pool.give_back(values);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values.iter()).finish()
    }
}
