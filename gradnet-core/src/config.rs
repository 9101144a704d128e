/// Engine configuration, passed explicitly to [`DagNetwork`](crate::DagNetwork)
/// at construction. There is deliberately no process-wide settings object:
/// two networks in the same process may run with different knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on the number of gradient buffers a fan-in accumulator
    /// keeps pending before reducing them into one. Peak backward memory per
    /// node is O(this) tensor lists instead of O(fan-in). Minimum 1.
    pub backprop_aggregation_size: usize,
    /// Forces strictly sequential resolution of input branches. Useful for
    /// debugging and for deterministic scheduling in tests.
    pub single_threaded: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            backprop_aggregation_size: 3,
            single_threaded: false,
        }
    }
}

impl EngineConfig {
    /// Returns the aggregation size clamped to its documented minimum.
    pub(crate) fn aggregation_size(&self) -> usize {
        self.backprop_aggregation_size.max(1)
    }
}
