// src/tensor/create.rs

use crate::error::GradNetError;
use crate::tensor::Tensor;
use rand::Rng;
use rand_distr::StandardNormal;

/// Creates a tensor filled with zeros.
pub fn zeros(shape: Vec<usize>) -> Tensor {
    full(shape, 0.0)
}

/// Creates a tensor filled with ones.
pub fn ones(shape: Vec<usize>) -> Tensor {
    full(shape, 1.0)
}

/// Creates a tensor filled with `value`.
pub fn full(shape: Vec<usize>, value: f64) -> Tensor {
    let numel: usize = shape.iter().product();
    Tensor::from_parts(vec![value; numel], shape)
}

/// Creates a tensor sampled from the standard normal distribution.
pub fn randn(shape: Vec<usize>) -> Tensor {
    let numel: usize = shape.iter().product();
    let mut rng = rand::thread_rng();
    let values = (0..numel).map(|_| rng.sample(StandardNormal)).collect();
    Tensor::from_parts(values, shape)
}

/// Creates a tensor sampled uniformly from `low..high`.
pub fn uniform(shape: Vec<usize>, low: f64, high: f64) -> Result<Tensor, GradNetError> {
    if !(low < high) {
        return Err(GradNetError::InternalError(format!(
            "uniform requires low < high, got {low}..{high}"
        )));
    }
    let numel: usize = shape.iter().product();
    let mut rng = rand::thread_rng();
    let distribution = rand::distributions::Uniform::new(low, high);
    let values = (0..numel).map(|_| rng.sample(distribution)).collect();
    Ok(Tensor::from_parts(values, shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_honor_shape() {
        let z = zeros(vec![2, 3]);
        assert_eq!(z.numel(), 6);
        assert!(z.to_vec().iter().all(|&v| v == 0.0));

        let o = ones(vec![4]);
        assert_eq!(o.to_vec(), vec![1.0; 4]);

        let f = full(vec![2, 2], 2.5);
        assert_eq!(f.to_vec(), vec![2.5; 4]);
    }

    #[test]
    fn uniform_respects_bounds() {
        let t = uniform(vec![100], -1.0, 1.0).unwrap();
        assert!(t.to_vec().iter().all(|&v| (-1.0..1.0).contains(&v)));
        assert!(uniform(vec![1], 1.0, 1.0).is_err());
    }

    #[test]
    fn randn_has_the_right_element_count() {
        assert_eq!(randn(vec![3, 5]).numel(), 15);
    }
}
