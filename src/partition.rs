//! Subset assignments for one replication.
//!
//! Everything here that draws randomness runs on the coordinator only. The results are plain
//! serializable values that get broadcast verbatim, so every rank partitions identically.

use std::sync::Arc;

use machine_learning::{Clusterer, Clustering, IndexBuilder, SpatialIndex, linalg};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, CowArray, Ix1, Ix2};
use rand::{Rng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{LessErr, Result, config::Layout};

/// The subsets of one replication, indexed by job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Partition {
    /// Row `j` holds the training rows of job `j`, nearest first.
    Neighborhoods { neighbors: Array2<usize> },
    /// Job `j` holds every training row labeled `ids[j]`.
    Clusters {
        labels: Vec<usize>,
        /// The distinct labels, sorted.
        ids: Vec<usize>,
        /// Row `l` is the centroid of label `l`.
        centers: Option<Array2<f64>>,
    },
}

impl Partition {
    /// Builds a partition out of a clustering of `n_rows` training rows with `n_features`
    /// columns. The centroids are only kept if there is one for every label.
    pub fn from_clustering(clustering: Clustering, n_rows: usize, n_features: usize) -> Result<Self> {
        let Clustering { labels, centers } = clustering;

        if labels.len() != n_rows {
            return Err(LessErr::SizeMismatch {
                what: "cluster labels",
                got: labels.len(),
                expected: n_rows,
            });
        }

        let mut ids = labels.clone();
        ids.sort_unstable();
        ids.dedup();

        let centers = centers.filter(|centers| {
            centers.ncols() == n_features && ids.last().is_some_and(|&id| id < centers.nrows())
        });

        Ok(Self::Clusters {
            labels,
            ids,
            centers,
        })
    }

    /// The amount of jobs.
    pub fn n_subsets(&self) -> usize {
        match self {
            Partition::Neighborhoods { neighbors } => neighbors.nrows(),
            Partition::Clusters { ids, .. } => ids.len(),
        }
    }

    /// The training rows of `job`.
    pub fn members(&self, job: usize) -> Vec<usize> {
        match self {
            Partition::Neighborhoods { neighbors } => neighbors.row(job).to_vec(),
            Partition::Clusters { labels, ids, .. } => {
                let id = ids[job];
                labels
                    .iter()
                    .enumerate()
                    .filter(|&(_, &label)| label == id)
                    .map(|(row, _)| row)
                    .collect()
            }
        }
    }

    /// The center of `job`: the clusterer's centroid when there is one, the mean of the
    /// members otherwise.
    ///
    /// # Arguments
    /// * `job` - The job index.
    /// * `members` - The feature rows of the job's members.
    pub fn center(&self, job: usize, members: ArrayView2<f64>) -> Array1<f64> {
        if let Partition::Clusters {
            ids,
            centers: Some(centers),
            ..
        } = self
        {
            return centers.row(ids[job]).to_owned();
        }

        linalg::column_means(members).unwrap_or_else(|| Array1::zeros(members.ncols()))
    }
}

/// Everything a rank needs to train its chunk of one replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub partition: Partition,
    /// One seed per job, present when the local estimator consumes seeds.
    pub seeds: Option<Vec<u64>>,
}

impl Plan {
    pub fn seed(&self, job: usize) -> Option<u64> {
        self.seeds.as_ref().and_then(|seeds| seeds.get(job).copied())
    }
}

/// A train/validation split of the row indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
}

impl Split {
    /// The train and validation sizes for `n` rows, `n_val = ceil(val_size * n)`.
    ///
    /// # Errors
    /// `LessErr::InvalidInput` if either part would be empty.
    pub fn sizes(n: usize, val_size: f64) -> Result<(usize, usize)> {
        let n_val = (val_size * n as f64).ceil() as usize;
        let n_train = n.saturating_sub(n_val);

        if n_val == 0 || n_train == 0 {
            return Err(LessErr::input(format!(
                "{n} samples can't be split with a validation size of {val_size}"
            )));
        }

        Ok((n_train, n_val))
    }

    /// Shuffles the `n` row indices and splits them.
    pub fn draw(n: usize, val_size: f64, rng: &mut StdRng) -> Result<Self> {
        let (_, n_val) = Self::sizes(n, val_size)?;

        let mut rows: Vec<usize> = (0..n).collect();
        rows.shuffle(rng);
        let train = rows.split_off(n_val);

        Ok(Self { train, val: rows })
    }

    /// Selects the rows of both parts.
    pub fn portions<'a>(&self, x: ArrayView2<'a, f64>, y: ArrayView1<'a, f64>) -> Portions<'a> {
        Portions {
            train_x: x.select(Axis(0), &self.train).into(),
            train_y: y.select(Axis(0), &self.train).into(),
            eval_x: x.select(Axis(0), &self.val).into(),
            eval_y: y.select(Axis(0), &self.val).into(),
        }
    }
}

/// The rows local models are fitted on and the rows the global model is fitted on.
pub struct Portions<'a> {
    pub train_x: CowArray<'a, f64, Ix2>,
    pub train_y: CowArray<'a, f64, Ix1>,
    pub eval_x: CowArray<'a, f64, Ix2>,
    pub eval_y: CowArray<'a, f64, Ix1>,
}

impl<'a> Portions<'a> {
    /// Uses the whole data set for both.
    pub fn whole(x: ArrayView2<'a, f64>, y: ArrayView1<'a, f64>) -> Self {
        Self {
            train_x: x.into(),
            train_y: y.into(),
            eval_x: x.into(),
            eval_y: y.into(),
        }
    }
}

/// The coordinator's partition factory for one fit.
pub struct Partitioner {
    tree_method: Arc<dyn IndexBuilder>,
    cluster_method: Option<Arc<dyn Clusterer>>,
    /// Whether the training rows change every replication.
    resample: bool,
    index: Option<Box<dyn SpatialIndex>>,
    reuse: Option<Partition>,
}

impl Partitioner {
    /// Creates a new `Partitioner`.
    ///
    /// # Arguments
    /// * `tree_method` - Builds the index neighborhoods are queried from.
    /// * `cluster_method` - Partitions by clustering instead, when present.
    /// * `resample` - Whether every replication trains on different rows, in which case no
    ///                index or clustering is reused across replications.
    pub fn new(
        tree_method: Arc<dyn IndexBuilder>,
        cluster_method: Option<Arc<dyn Clusterer>>,
        resample: bool,
    ) -> Self {
        Self {
            tree_method,
            cluster_method,
            resample,
            index: None,
            reuse: None,
        }
    }

    /// Draws the partition of the next replication.
    pub fn partition(
        &mut self,
        train_x: ArrayView2<f64>,
        layout: Layout,
        rng: &mut StdRng,
    ) -> Result<Partition> {
        match layout {
            Layout::Neighborhood {
                n_neighbors,
                n_subsets,
            } => self.neighborhoods(train_x, n_neighbors, n_subsets, rng),
            Layout::Clustering => self.clusters(train_x, rng),
        }
    }

    /// Queries the `n_neighbors` nearest rows around `n_subsets` rows drawn with replacement.
    fn neighborhoods(
        &mut self,
        train_x: ArrayView2<f64>,
        n_neighbors: usize,
        n_subsets: usize,
        rng: &mut StdRng,
    ) -> Result<Partition> {
        let index = match self.index.take() {
            Some(index) if !self.resample => index,
            _ => self.tree_method.build(train_x)?,
        };

        let n = train_x.nrows();
        let seeds: Vec<usize> = (0..n_subsets).map(|_| rng.random_range(0..n)).collect();
        let points = train_x.select(Axis(0), &seeds);

        let neighbors = index.query(points.view(), n_neighbors);
        self.index = Some(index);

        Ok(Partition::Neighborhoods {
            neighbors: neighbors?,
        })
    }

    fn clusters(&mut self, train_x: ArrayView2<f64>, rng: &mut StdRng) -> Result<Partition> {
        let Some(clusterer) = &self.cluster_method else {
            return Err(LessErr::config(
                "a clustering layout needs a clustering method",
            ));
        };

        if let Some(partition) = &self.reuse {
            return Ok(partition.clone());
        }

        let stochastic = clusterer.is_stochastic();
        let seed = stochastic.then(|| rng.random());
        let clustering = clusterer.fit(train_x, seed)?;
        let partition = Partition::from_clustering(clustering, train_x.nrows(), train_x.ncols())?;

        if !stochastic && !self.resample {
            self.reuse = Some(partition.clone());
        }

        Ok(partition)
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::{BruteForce, Init, KMeans, KdTree};
    use ndarray::array;
    use rand::SeedableRng;

    use super::*;

    fn grid(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { (i % 10) as f64 } else { (i / 10) as f64 })
    }

    fn neighborhood(n_neighbors: usize, n_subsets: usize) -> Layout {
        Layout::Neighborhood {
            n_neighbors,
            n_subsets,
        }
    }

    #[test]
    fn neighborhoods_have_the_requested_shape() {
        let x = grid(100);
        let mut partitioner = Partitioner::new(Arc::new(KdTree::default()), None, false);
        let mut rng = StdRng::seed_from_u64(0);

        let partition = partitioner
            .partition(x.view(), neighborhood(20, 5), &mut rng)
            .unwrap();

        assert_eq!(partition.n_subsets(), 5);
        for job in 0..5 {
            let members = partition.members(job);
            assert_eq!(members.len(), 20);
            assert!(members.iter().all(|&row| row < 100));
        }
    }

    #[test]
    fn same_seed_same_neighborhoods() {
        let x = grid(100);
        let draw = |tree: Arc<dyn IndexBuilder>| {
            let mut partitioner = Partitioner::new(tree, None, false);
            let mut rng = StdRng::seed_from_u64(11);
            (0..3)
                .map(|_| partitioner.partition(x.view(), neighborhood(7, 4), &mut rng).unwrap())
                .collect::<Vec<_>>()
        };

        let first = draw(Arc::new(KdTree::new(4)));
        assert_eq!(first, draw(Arc::new(KdTree::new(4))));
        assert_eq!(first, draw(Arc::new(BruteForce)));
        assert_ne!(first[0], first[1]);
    }

    #[test]
    fn neighborhood_center_is_the_member_mean() {
        let x = array![[0.0, 0.0], [2.0, 0.0], [0.0, 4.0], [100.0, 100.0]];
        let partition = Partition::Neighborhoods {
            neighbors: array![[0, 1, 2]],
        };

        let members = x.select(Axis(0), &partition.members(0));
        assert_eq!(partition.center(0, members.view()), array![2.0 / 3.0, 4.0 / 3.0]);
    }

    #[test]
    fn cluster_ids_are_sorted_and_distinct() {
        let clustering = Clustering {
            labels: vec![4, 1, 4, 1, 7],
            centers: None,
        };

        let partition = Partition::from_clustering(clustering, 5, 2).unwrap();

        assert_eq!(partition.n_subsets(), 3);
        assert_eq!(partition.members(0), vec![1, 3]);
        assert_eq!(partition.members(1), vec![0, 2]);
        assert_eq!(partition.members(2), vec![4]);
    }

    #[test]
    fn cluster_centers_are_used_when_complete() {
        let centers = array![[0.0, 0.0], [5.0, 5.0], [9.0, 9.0]];
        let clustering = Clustering {
            labels: vec![2, 1, 2],
            centers: Some(centers),
        };
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];

        let partition = Partition::from_clustering(clustering, 3, 2).unwrap();
        let members = x.select(Axis(0), &partition.members(1));

        assert_eq!(partition.center(1, members.view()), array![9.0, 9.0]);
    }

    #[test]
    fn incomplete_cluster_centers_fall_back_to_means() {
        let clustering = Clustering {
            labels: vec![0, 3],
            centers: Some(array![[0.0], [1.0]]),
        };
        let x = array![[1.0], [3.0]];

        let partition = Partition::from_clustering(clustering, 2, 1).unwrap();
        let members = x.select(Axis(0), &partition.members(1));

        assert_eq!(partition.center(1, members.view()), array![3.0]);
    }

    #[test]
    fn label_count_must_match_the_rows() {
        let clustering = Clustering {
            labels: vec![0, 0],
            centers: None,
        };

        assert!(matches!(
            Partition::from_clustering(clustering, 3, 1),
            Err(LessErr::SizeMismatch { got: 2, expected: 3, .. })
        ));
    }

    #[test]
    fn deterministic_clusterings_are_reused() {
        let x = grid(60);
        let mut partitioner = Partitioner::new(
            Arc::new(KdTree::default()),
            Some(Arc::new(KMeans::new(3).init(Init::Maximin))),
            false,
        );
        let mut rng = StdRng::seed_from_u64(2);

        let first = partitioner.partition(x.view(), Layout::Clustering, &mut rng).unwrap();
        let state = rng.clone();
        let second = partitioner.partition(x.view(), Layout::Clustering, &mut rng).unwrap();

        assert_eq!(first, second);
        assert_eq!(rng.random::<u64>(), state.clone().random::<u64>());
    }

    #[test]
    fn split_sizes_round_the_validation_part_up() {
        assert_eq!(Split::sizes(100, 0.3).unwrap(), (70, 30));
        assert_eq!(Split::sizes(10, 0.25).unwrap(), (7, 3));
        assert!(Split::sizes(1, 0.5).is_err());
        assert!(Split::sizes(0, 0.5).is_err());
    }

    #[test]
    fn split_partitions_the_rows() {
        let mut rng = StdRng::seed_from_u64(3);
        let split = Split::draw(50, 0.2, &mut rng).unwrap();

        assert_eq!(split.train.len(), 40);
        assert_eq!(split.val.len(), 10);

        let mut rows: Vec<usize> = split.train.iter().chain(&split.val).copied().collect();
        rows.sort_unstable();
        assert_eq!(rows, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn portions_select_the_split_rows() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![10.0, 11.0, 12.0, 13.0];
        let split = Split {
            train: vec![3, 0],
            val: vec![1, 2],
        };

        let portions = split.portions(x.view(), y.view());

        assert_eq!(portions.train_x, array![[3.0], [0.0]]);
        assert_eq!(portions.train_y, array![13.0, 10.0]);
        assert_eq!(portions.eval_y, array![11.0, 12.0]);
    }

    #[test]
    fn plan_seeds_follow_the_jobs() {
        let plan = Plan {
            partition: Partition::Neighborhoods {
                neighbors: array![[0], [1]],
            },
            seeds: Some(vec![5, 6]),
        };

        assert_eq!(plan.seed(1), Some(6));
        assert_eq!(plan.seed(2), None);
    }
}
