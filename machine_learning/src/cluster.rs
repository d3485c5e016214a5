use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{
    Rng, SeedableRng,
    distr::{Distribution, weighted::WeightedIndex},
    rngs::StdRng,
};
use serde::{Deserialize, Serialize};

use crate::{MlErr, Result, linalg};

/// The outcome of clustering a data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clustering {
    /// One label per row. Labels need not be contiguous.
    pub labels: Vec<usize>,
    /// Row `l` is the centroid of label `l`, when the clusterer has centroids.
    pub centers: Option<Array2<f64>>,
}

/// Groups rows of a data set.
pub trait Clusterer: Send + Sync {
    /// Clusters the rows of `x`.
    ///
    /// # Arguments
    /// * `x` - The data set.
    /// * `seed` - Seed for stochastic clusterers, OS entropy is used when missing.
    fn fit(&self, x: ArrayView2<f64>, seed: Option<u64>) -> Result<Clustering>;

    /// Whether two fits on the same data can disagree.
    fn is_stochastic(&self) -> bool;

    /// The requested amount of clusters. The realized amount may be lower.
    fn n_clusters(&self) -> usize;
}

/// How `KMeans` picks its initial centroids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Init {
    /// Random picks weighted by the squared distance to the closest chosen centroid.
    #[default]
    PlusPlus,
    /// Starts at the row closest to the mean, then repeatedly takes the row farthest from
    /// every chosen centroid. Deterministic.
    Maximin,
}

/// Lloyd's k-means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeans {
    pub n_clusters: usize,
    pub init: Init,
    pub max_iter: usize,
    /// Convergence threshold on the centroid shift, relative to the data's mean variance.
    pub tol: f64,
}

impl KMeans {
    /// Creates a new `KMeans` with k-means++ initialization.
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            init: Init::PlusPlus,
            max_iter: 300,
            tol: 1e-4,
        }
    }

    pub fn init(mut self, init: Init) -> Self {
        self.init = init;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    fn check(&self, x: ArrayView2<f64>) -> Result<()> {
        if self.n_clusters == 0 {
            return Err(MlErr::InvalidParam {
                name: "n_clusters",
                detail: "must be at least 1".into(),
            });
        }

        if x.nrows() < self.n_clusters {
            return Err(MlErr::TooFewSamples {
                got: x.nrows(),
                needed: self.n_clusters,
            });
        }

        Ok(())
    }

    fn plus_plus(&self, x: ArrayView2<f64>, rng: &mut StdRng) -> Array2<f64> {
        let n = x.nrows();
        let mut centers = Array2::zeros((self.n_clusters, x.ncols()));

        let first = rng.random_range(0..n);
        centers.row_mut(0).assign(&x.row(first));

        let mut closest: Array1<f64> = x
            .outer_iter()
            .map(|row| linalg::squared_euclidean(row, x.row(first)))
            .collect();

        for c in 1..self.n_clusters {
            // Every weight is zero once all distinct rows are taken.
            let pick = match WeightedIndex::new(closest.iter().copied()) {
                Ok(dist) => dist.sample(rng),
                Err(_) => rng.random_range(0..n),
            };

            centers.row_mut(c).assign(&x.row(pick));
            update_closest(x, x.row(pick), &mut closest);
        }

        centers
    }

    fn maximin(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut centers = Array2::zeros((self.n_clusters, x.ncols()));

        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let first = argmin(x.outer_iter().map(|row| linalg::squared_euclidean(row, mean.view())));
        centers.row_mut(0).assign(&x.row(first));

        let mut closest: Array1<f64> = x
            .outer_iter()
            .map(|row| linalg::squared_euclidean(row, x.row(first)))
            .collect();

        for c in 1..self.n_clusters {
            let pick = argmin(closest.iter().map(|d| -d));
            centers.row_mut(c).assign(&x.row(pick));
            update_closest(x, x.row(pick), &mut closest);
        }

        centers
    }
}

/// The position of the smallest value, the first one on ties.
fn argmin(values: impl Iterator<Item = f64>) -> usize {
    values
        .enumerate()
        .fold((0, f64::INFINITY), |(best, min), (i, v)| {
            if v < min { (i, v) } else { (best, min) }
        })
        .0
}

fn update_closest(x: ArrayView2<f64>, center: ArrayView1<f64>, closest: &mut Array1<f64>) {
    for (row, d) in x.outer_iter().zip(closest.iter_mut()) {
        *d = d.min(linalg::squared_euclidean(row, center));
    }
}

fn assign(x: ArrayView2<f64>, centers: &Array2<f64>) -> Vec<usize> {
    x.outer_iter()
        .map(|row| {
            argmin(
                centers
                    .outer_iter()
                    .map(|center| linalg::squared_euclidean(row, center)),
            )
        })
        .collect()
}

impl Clusterer for KMeans {
    fn fit(&self, x: ArrayView2<f64>, seed: Option<u64>) -> Result<Clustering> {
        self.check(x)?;

        let mut centers = match self.init {
            Init::PlusPlus => {
                let mut rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_os_rng(),
                };
                self.plus_plus(x, &mut rng)
            }
            Init::Maximin => self.maximin(x),
        };

        let mean_var = x.var_axis(Axis(0), 0.0).mean().unwrap_or_default();
        let tol = self.tol * mean_var;

        let mut labels = assign(x, &centers);
        for iter in 0..self.max_iter {
            let mut sums = Array2::<f64>::zeros(centers.raw_dim());
            let mut counts = vec![0usize; self.n_clusters];

            for (row, &label) in x.outer_iter().zip(&labels) {
                sums.row_mut(label).scaled_add(1.0, &row);
                counts[label] += 1;
            }

            let mut shift = 0.0;
            for (c, &count) in counts.iter().enumerate() {
                // An empty cluster keeps its centroid and simply ends up unused.
                if count == 0 {
                    continue;
                }

                let new = sums.row(c).mapv(|v| v / count as f64);
                shift += linalg::squared_euclidean(new.view(), centers.row(c));
                centers.row_mut(c).assign(&new);
            }

            labels = assign(x, &centers);

            if shift <= tol {
                debug!(iterations = iter + 1, shift = shift; "k-means converged");
                break;
            }
        }

        Ok(Clustering {
            labels,
            centers: Some(centers),
        })
    }

    fn is_stochastic(&self) -> bool {
        self.init == Init::PlusPlus
    }

    fn n_clusters(&self) -> usize {
        self.n_clusters
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand_distr::Normal;

    use super::*;

    fn blobs(seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0_f64, 0.1).unwrap();
        let origins = [[0.0, 0.0], [10.0, 10.0], [-10.0, 10.0]];

        Array2::from_shape_fn((90, 2), |(i, j)| origins[i / 30][j] + noise.sample(&mut rng))
    }

    fn assert_blobs_separated(labels: &[usize]) {
        for blob in labels.chunks(30) {
            assert!(blob.iter().all(|&l| l == blob[0]));
        }
        assert_ne!(labels[0], labels[30]);
        assert_ne!(labels[30], labels[60]);
        assert_ne!(labels[0], labels[60]);
    }

    #[test]
    fn plus_plus_separates_blobs() {
        let x = blobs(1);
        let clustering = KMeans::new(3).fit(x.view(), Some(42)).unwrap();

        assert_eq!(clustering.labels.len(), 90);
        assert_blobs_separated(&clustering.labels);
    }

    #[test]
    fn maximin_separates_blobs() {
        let x = blobs(2);
        let clustering = KMeans::new(3).init(Init::Maximin).fit(x.view(), None).unwrap();

        assert_blobs_separated(&clustering.labels);
    }

    #[test]
    fn same_seed_same_clustering() {
        let x = blobs(3);
        let kmeans = KMeans::new(4);

        assert_eq!(
            kmeans.fit(x.view(), Some(9)).unwrap(),
            kmeans.fit(x.view(), Some(9)).unwrap()
        );
    }

    #[test]
    fn centers_are_indexed_by_label() {
        let x = blobs(4);
        let clustering = KMeans::new(3).fit(x.view(), Some(5)).unwrap();
        let centers = clustering.centers.unwrap();

        let label = clustering.labels[30];
        let center = centers.row(label);
        assert!((center[0] - 10.0).abs() < 0.5);
        assert!((center[1] - 10.0).abs() < 0.5);
    }

    #[test]
    fn one_cluster_holds_everything() {
        let x = blobs(5);
        let clustering = KMeans::new(1).init(Init::Maximin).fit(x.view(), None).unwrap();

        assert!(clustering.labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn duplicated_rows_leave_clusters_unused() {
        let x = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let clustering = KMeans::new(3).fit(x.view(), Some(1)).unwrap();

        let mut distinct = clustering.labels.clone();
        distinct.dedup();
        assert_eq!(distinct.len(), 1);
    }

    #[test]
    fn determinism_is_reported() {
        assert!(KMeans::new(2).is_stochastic());
        assert!(!KMeans::new(2).init(Init::Maximin).is_stochastic());
    }

    #[test]
    fn invalid_cluster_counts_are_rejected() {
        let x = blobs(6);

        assert!(matches!(
            KMeans::new(0).fit(x.view(), None),
            Err(MlErr::InvalidParam { .. })
        ));
        assert!(matches!(
            KMeans::new(91).fit(x.view(), None),
            Err(MlErr::TooFewSamples { got: 90, needed: 91 })
        ));
    }
}
