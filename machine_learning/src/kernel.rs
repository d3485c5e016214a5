use ndarray::{Array1, ArrayView1, ArrayView2};

use crate::linalg;

/// Turns the distance between rows and a subset's center into non-negative weights.
pub trait Kernel: Send + Sync {
    /// One weight per row of `points`.
    fn weights(&self, points: ArrayView2<f64>, center: ArrayView1<f64>) -> Array1<f64>;
}

impl<F> Kernel for F
where
    F: Fn(ArrayView2<f64>, ArrayView1<f64>) -> Array1<f64> + Send + Sync,
{
    fn weights(&self, points: ArrayView2<f64>, center: ArrayView1<f64>) -> Array1<f64> {
        self(points, center)
    }
}

/// Radial basis function over the euclidean distance, `exp(-coeff * ||x - center||)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rbf {
    pub coeff: f64,
}

impl Rbf {
    pub fn new(coeff: f64) -> Self {
        Self { coeff }
    }

    /// The default kernel for a partition of `n_subsets` subsets, `coeff = 1 / n_subsets²`.
    pub fn for_subsets(n_subsets: usize) -> Self {
        Self::new(1.0 / (n_subsets as f64).powi(2))
    }
}

impl Kernel for Rbf {
    fn weights(&self, points: ArrayView2<f64>, center: ArrayView1<f64>) -> Array1<f64> {
        points
            .outer_iter()
            .map(|row| (-self.coeff * linalg::euclidean(row, center)).exp())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn rbf_decays_with_distance() {
        let points = array![[0.0, 0.0], [3.0, 4.0], [6.0, 8.0]];
        let center = array![0.0, 0.0];

        let w = Rbf::new(0.5).weights(points.view(), center.view());

        assert_eq!(w[0], 1.0);
        assert!((w[1] - (-2.5_f64).exp()).abs() < 1e-15);
        assert!(w[2] < w[1]);
    }

    #[test]
    fn coefficient_shrinks_with_the_subset_count() {
        assert_eq!(Rbf::for_subsets(1).coeff, 1.0);
        assert_eq!(Rbf::for_subsets(4).coeff, 1.0 / 16.0);
    }

    #[test]
    fn closures_are_kernels() {
        let flat = |points: ArrayView2<f64>, _: ArrayView1<f64>| Array1::ones(points.nrows());
        let points = array![[1.0], [2.0]];

        assert_eq!(flat.weights(points.view(), array![0.0].view()), array![1.0, 1.0]);
    }
}
