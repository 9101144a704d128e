// src/graph/context_test.rs

use super::*;
use crate::graph::result::DeltaBuffer;
use crate::layers::Identity;
use crate::tensor::{Tensor, TensorList};
use crate::DagNetwork;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Identity-shaped layer that counts its forward invocations.
#[derive(Debug, Default)]
struct Probe {
    evals: AtomicUsize,
}

impl crate::layer::Layer for Probe {
    fn name(&self) -> &str {
        "probe"
    }

    fn eval(&self, mut inputs: Vec<EvalResult>) -> Result<EvalResult, GradNetError> {
        self.evals.fetch_add(1, Ordering::SeqCst);
        let input = inputs.remove(0);
        Ok(EvalResult::constant(input.data().clone()))
    }
}

/// Always fails; counts attempts.
#[derive(Debug, Default)]
struct Faulty {
    attempts: AtomicUsize,
}

impl crate::layer::Layer for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    fn eval(&self, _inputs: Vec<EvalResult>) -> Result<EvalResult, GradNetError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(GradNetError::InternalError("forward exploded".to_string()))
    }
}

fn value(values: Vec<f64>) -> EvalResult {
    let len = values.len();
    EvalResult::constant(TensorList::from_tensor(
        Tensor::new(values, vec![len]).unwrap(),
    ))
}

/// input -> probe, with `consumers` identity nodes referencing the probe.
fn shared_probe_network(
    config: EngineConfig,
    consumers: usize,
) -> (DagNetwork, NodeId, NodeId, Arc<Probe>) {
    let mut network = DagNetwork::new(config);
    let input = network.add_input();
    let probe = Arc::new(Probe::default());
    let shared = network.add(probe.clone(), &[input]).unwrap();
    for _ in 0..consumers {
        network.add(Arc::new(Identity::new()), &[shared]).unwrap();
    }
    (network, input, shared, probe)
}

#[test]
fn forward_runs_exactly_once_across_concurrent_getters() {
    let consumers = 4;
    let (network, input, shared, probe) =
        shared_probe_network(EngineConfig::default(), consumers);
    let context = EvalContext::new(&network, vec![(input, value(vec![1.0, 2.0]))]);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..consumers)
            .map(|_| {
                let context = &context;
                scope.spawn(move || context.get(shared))
            })
            .collect();
        for handle in handles {
            let result = handle.join().unwrap().unwrap();
            assert_eq!(result.data().get(0).to_vec(), vec![1.0, 2.0]);
        }
    });

    assert_eq!(probe.evals.load(Ordering::SeqCst), 1);
}

#[test]
fn fan_conservation_rejects_the_extra_fetch() {
    let consumers = 2;
    let (network, input, shared, probe) =
        shared_probe_network(EngineConfig::default(), consumers);
    let context = EvalContext::new(&network, vec![(input, value(vec![3.0]))]);

    context.get(shared).unwrap();
    context.get(shared).unwrap();
    let err = context.get(shared).unwrap_err();
    assert_eq!(
        err,
        GradNetError::FanOutExceeded {
            id: shared,
            expected: consumers,
        }
    );
    // The rejection never re-runs the layer.
    assert_eq!(probe.evals.load(Ordering::SeqCst), 1);
}

#[test]
fn a_layer_error_is_cached_and_shared_with_every_caller() {
    let mut network = DagNetwork::new(EngineConfig::default());
    let input = network.add_input();
    let faulty = Arc::new(Faulty::default());
    let failing = network.add(faulty.clone(), &[input]).unwrap();
    network.add(Arc::new(Identity::new()), &[failing]).unwrap();
    network.add(Arc::new(Identity::new()), &[failing]).unwrap();

    let context = EvalContext::new(&network, vec![(input, value(vec![1.0]))]);
    let first = context.get(failing).unwrap_err();
    let second = context.get(failing).unwrap_err();
    assert_eq!(first, second);
    // One attempt; the cached error served the second caller.
    assert_eq!(faulty.attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn an_unseeded_input_is_a_graph_error() {
    let mut network = DagNetwork::new(EngineConfig::default());
    let input = network.add_input();
    let head = network.add(Arc::new(Identity::new()), &[input]).unwrap();

    let context = EvalContext::new(&network, vec![]);
    let err = context.get(head).unwrap_err();
    assert_eq!(err, GradNetError::UnboundInput { index: 0 });
}

#[test]
fn single_threaded_resolution_matches_parallel() {
    for single_threaded in [false, true] {
        let config = EngineConfig {
            single_threaded,
            ..EngineConfig::default()
        };
        let (network, input, shared, probe) = shared_probe_network(config, 3);
        let context = EvalContext::new(&network, vec![(input, value(vec![5.0, 6.0]))]);
        for _ in 0..3 {
            let result = context.get(shared).unwrap();
            assert_eq!(result.data().get(0).to_vec(), vec![5.0, 6.0]);
        }
        assert_eq!(probe.evals.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn evaluating_one_head_of_two_surfaces_but_tolerates_the_other() {
    // `shared` feeds both heads; evaluating only the first leaves it one
    // fetch short of its expected count. That shortfall is released and
    // logged at teardown, never escalated to an evaluation failure.
    let mut network = DagNetwork::new(EngineConfig::default());
    let input = network.add_input();
    let probe = Arc::new(Probe::default());
    let shared = network.add(probe.clone(), &[input]).unwrap();
    let head_one = network.add(Arc::new(Identity::new()), &[shared]).unwrap();
    let _head_two = network.add(Arc::new(Identity::new()), &[shared]).unwrap();

    network.set_head(head_one).unwrap();
    let result = network.eval(vec![value(vec![9.0])]).unwrap();
    assert_eq!(result.data().get(0).to_vec(), vec![9.0]);
    assert_eq!(probe.evals.load(Ordering::SeqCst), 1);
}

#[test]
fn one_context_serves_two_heads() {
    let mut network = DagNetwork::new(EngineConfig::default());
    let input = network.add_input();
    let probe = Arc::new(Probe::default());
    let shared = network.add(probe.clone(), &[input]).unwrap();
    let head_one = network.add(Arc::new(Identity::new()), &[shared]).unwrap();
    let head_two = network.add(Arc::new(Identity::new()), &[shared]).unwrap();

    let context = network.context(vec![value(vec![2.0])]).unwrap();
    let first = context.get(head_one).unwrap();
    let second = context.get(head_two).unwrap();
    assert_eq!(first.data().get(0).to_vec(), vec![2.0]);
    assert_eq!(second.data().get(0).to_vec(), vec![2.0]);
    // Both heads share one resolution of the common subgraph.
    assert_eq!(probe.evals.load(Ordering::SeqCst), 1);
    context.finish();
}

#[test]
fn seeded_inputs_are_served_without_computation() {
    let mut network = DagNetwork::new(EngineConfig::default());
    let input = network.add_input();
    network.add(Arc::new(Identity::new()), &[input]).unwrap();

    let context = EvalContext::new(&network, vec![(input, value(vec![7.0]))]);
    let result = context.get(input).unwrap();
    assert_eq!(result.data().get(0).to_vec(), vec![7.0]);
}

#[test]
fn gradients_to_a_shared_input_coalesce_through_the_seed() {
    use crate::delta::DeltaSet;
    use crate::graph::result::Accumulate;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Capture {
        calls: AtomicUsize,
        received: Mutex<Option<Vec<f64>>>,
    }

    impl Accumulate for Capture {
        fn accumulate(
            &self,
            _buffer: &DeltaBuffer,
            gradient: TensorList,
        ) -> Result<(), GradNetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.received.lock().unwrap() = Some(gradient.get(0).to_vec());
            Ok(())
        }
    }

    // The input feeds two identity nodes; each sends one gradient back and
    // the seed's own capability must see a single summed call.
    let mut network = DagNetwork::new(EngineConfig::default());
    let input = network.add_input();
    let a = network.add(Arc::new(Identity::new()), &[input]).unwrap();
    let b = network.add(Arc::new(Identity::new()), &[input]).unwrap();

    let capture = Arc::new(Capture::default());
    let seeded = EvalResult::new(
        TensorList::from_tensor(Tensor::new(vec![1.0, 1.0], vec![2]).unwrap()),
        capture.clone(),
    );
    let context = EvalContext::new(&network, vec![(input, seeded)]);
    let result_a = context.get(a).unwrap();
    let result_b = context.get(b).unwrap();

    let buffer: DeltaBuffer = Arc::new(Mutex::new(DeltaSet::new()));
    let gradient = |values: Vec<f64>| {
        TensorList::from_tensor(Tensor::new(values, vec![2]).unwrap())
    };
    result_a.accumulate(&buffer, gradient(vec![1.0, 2.0])).unwrap();
    assert_eq!(capture.calls.load(Ordering::SeqCst), 0);
    result_b.accumulate(&buffer, gradient(vec![10.0, 20.0])).unwrap();
    assert_eq!(capture.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        capture.received.lock().unwrap().as_deref(),
        Some(&[11.0, 22.0][..])
    );
}
