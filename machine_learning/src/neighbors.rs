//! k-nearest-neighbor search.
//!
//! Neighbors come back sorted by distance, ties broken by the lower row index, so every index
//! returns the same answer for the same data.

use std::{cmp::Ordering, collections::BinaryHeap};

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::{MlErr, Result, linalg};

/// A queryable index over a fixed set of rows.
pub trait SpatialIndex: Send + Sync {
    /// Finds the `k` nearest indexed rows of every row of `points`.
    ///
    /// # Returns
    /// A `(points.nrows(), k)` matrix of indexed row numbers.
    fn query(&self, points: ArrayView2<f64>, k: usize) -> Result<Array2<usize>>;
}

/// Builds a `SpatialIndex` over a data set.
pub trait IndexBuilder: Send + Sync {
    fn build(&self, data: ArrayView2<f64>) -> Result<Box<dyn SpatialIndex>>;
}

/// A neighbor candidate, ordered by distance then by row.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    dist: f64,
    row: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.row.cmp(&other.row))
    }
}

/// Keeps the `k` smallest candidates seen so far.
struct Best {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl Best {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn offer(&mut self, candidate: Candidate) {
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if self.heap.peek().is_some_and(|worst| candidate < *worst) {
            self.heap.pop();
            self.heap.push(candidate);
        }
    }

    /// The distance a candidate must not exceed to be worth looking at.
    fn bound(&self) -> f64 {
        match self.heap.peek() {
            Some(worst) if self.heap.len() == self.k => worst.dist,
            _ => f64::INFINITY,
        }
    }

    fn into_rows(self) -> Vec<usize> {
        self.heap.into_sorted_vec().into_iter().map(|c| c.row).collect()
    }
}

fn check_query(data: ArrayView2<f64>, points: ArrayView2<f64>, k: usize) -> Result<()> {
    if k == 0 {
        return Err(MlErr::InvalidParam {
            name: "k",
            detail: "must be at least 1".into(),
        });
    }

    if k > data.nrows() {
        return Err(MlErr::TooFewSamples {
            got: data.nrows(),
            needed: k,
        });
    }

    if points.ncols() != data.ncols() {
        return Err(MlErr::SizeMismatch {
            a: "query points",
            b: "indexed data",
            got: points.ncols(),
            expected: data.ncols(),
        });
    }

    Ok(())
}

/// Stacks one row of `k` neighbors per query point.
fn collect_rows(rows: Vec<Vec<usize>>, k: usize) -> Result<Array2<usize>> {
    let n = rows.len();
    let flat: Vec<usize> = rows.into_iter().flatten().collect();
    let got = flat.len();

    Array2::from_shape_vec((n, k), flat).map_err(|_| MlErr::SizeMismatch {
        a: "neighbors",
        b: "queries",
        got,
        expected: n * k,
    })
}

/// Exhaustive search, useful as a reference and for tiny data sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForce;

struct BruteForceIndex {
    data: Array2<f64>,
}

impl IndexBuilder for BruteForce {
    fn build(&self, data: ArrayView2<f64>) -> Result<Box<dyn SpatialIndex>> {
        if data.nrows() == 0 {
            return Err(MlErr::EmptyInput { what: "data set" });
        }

        Ok(Box::new(BruteForceIndex {
            data: data.to_owned(),
        }))
    }
}

impl SpatialIndex for BruteForceIndex {
    fn query(&self, points: ArrayView2<f64>, k: usize) -> Result<Array2<usize>> {
        check_query(self.data.view(), points, k)?;

        let rows = points
            .outer_iter()
            .map(|point| {
                let mut best = Best::new(k);
                for (row, other) in self.data.outer_iter().enumerate() {
                    let dist = linalg::squared_euclidean(point, other);
                    best.offer(Candidate { dist, row });
                }
                best.into_rows()
            })
            .collect();

        collect_rows(rows, k)
    }
}

/// A k-d tree over euclidean space.
#[derive(Debug, Clone, Copy)]
pub struct KdTree {
    /// Maximum amount of rows in a leaf.
    pub leaf_size: usize,
}

impl Default for KdTree {
    fn default() -> Self {
        Self { leaf_size: 40 }
    }
}

impl KdTree {
    /// Creates a new `KdTree` builder with the given leaf size.
    pub fn new(leaf_size: usize) -> Self {
        Self { leaf_size }
    }
}

#[derive(Debug)]
enum Node {
    Leaf {
        start: usize,
        end: usize,
    },
    Split {
        dim: usize,
        value: f64,
        left: usize,
        right: usize,
    },
}

struct KdIndex {
    data: Array2<f64>,
    /// Row numbers, permuted so every leaf owns a contiguous range.
    rows: Vec<usize>,
    nodes: Vec<Node>,
}

impl IndexBuilder for KdTree {
    fn build(&self, data: ArrayView2<f64>) -> Result<Box<dyn SpatialIndex>> {
        if self.leaf_size == 0 {
            return Err(MlErr::InvalidParam {
                name: "leaf_size",
                detail: "must be at least 1".into(),
            });
        }

        if data.nrows() == 0 {
            return Err(MlErr::EmptyInput { what: "data set" });
        }

        let mut index = KdIndex {
            data: data.to_owned(),
            rows: (0..data.nrows()).collect(),
            nodes: Vec::new(),
        };
        index.grow(0, data.nrows(), self.leaf_size);

        Ok(Box::new(index))
    }
}

impl KdIndex {
    /// Builds the subtree over `rows[start..end]` and returns its node id.
    fn grow(&mut self, start: usize, end: usize, leaf_size: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { start, end });

        if end - start <= leaf_size {
            return id;
        }

        let Some(dim) = self.widest_dim(start, end) else {
            return id;
        };

        let data = &self.data;
        let slice = &mut self.rows[start..end];
        slice.sort_unstable_by(|&a, &b| {
            data[[a, dim]]
                .total_cmp(&data[[b, dim]])
                .then(a.cmp(&b))
        });

        let mid = start + (end - start) / 2;
        let value = self.data[[self.rows[mid], dim]];

        let left = self.grow(start, mid, leaf_size);
        let right = self.grow(mid, end, leaf_size);
        self.nodes[id] = Node::Split {
            dim,
            value,
            left,
            right,
        };

        id
    }

    /// The dimension with the largest spread over `rows[start..end]`, `None` if every row is
    /// the same point.
    fn widest_dim(&self, start: usize, end: usize) -> Option<usize> {
        let rows = &self.rows[start..end];

        (0..self.data.ncols())
            .map(|dim| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = self.data[[r, dim]];
                    (lo.min(v), hi.max(v))
                });
                (dim, hi - lo)
            })
            .filter(|&(_, spread)| spread > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(dim, _)| dim)
    }

    fn search(&self, node: usize, point: ArrayView1<f64>, best: &mut Best) {
        match self.nodes[node] {
            Node::Leaf { start, end } => {
                for &row in &self.rows[start..end] {
                    let dist = linalg::squared_euclidean(point, self.data.row(row));
                    best.offer(Candidate { dist, row });
                }
            }
            Node::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = point[dim] - value;
                let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };

                self.search(near, point, best);

                // Equal distances must still be visited, a lower row on the far side wins ties.
                if diff * diff <= best.bound() {
                    self.search(far, point, best);
                }
            }
        }
    }
}

impl SpatialIndex for KdIndex {
    fn query(&self, points: ArrayView2<f64>, k: usize) -> Result<Array2<usize>> {
        check_query(self.data.view(), points, k)?;

        let rows = points
            .axis_iter(Axis(0))
            .map(|point| {
                let mut best = Best::new(k);
                self.search(0, point, &mut best);
                best.into_rows()
            })
            .collect();

        collect_rows(rows, k)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn short_neighbor_rows_are_rejected() {
        assert_eq!(
            collect_rows(vec![vec![0, 1], vec![2, 3]], 2).unwrap(),
            array![[0, 1], [2, 3]]
        );
        assert!(matches!(
            collect_rows(vec![vec![0, 1], vec![2]], 2),
            Err(MlErr::SizeMismatch { got: 3, expected: 4, .. })
        ));
    }

    fn random_data(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_simple_fn((rows, cols), || rng.random_range(-5.0..5.0))
    }

    #[test]
    fn kd_tree_agrees_with_brute_force() {
        let data = random_data(500, 3, 1);
        let points = random_data(50, 3, 2);

        let tree = KdTree::new(8).build(data.view()).unwrap();
        let brute = BruteForce.build(data.view()).unwrap();

        for k in [1, 7, 30] {
            assert_eq!(
                tree.query(points.view(), k).unwrap(),
                brute.query(points.view(), k).unwrap()
            );
        }
    }

    #[test]
    fn duplicated_points_are_ordered_by_row() {
        let data = array![[1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [1.0, 1.0], [5.0, 5.0]];

        let tree = KdTree::new(1).build(data.view()).unwrap();
        let neighbors = tree.query(array![[1.0, 1.0]].view(), 4).unwrap();

        assert_eq!(neighbors, array![[0, 2, 3, 1]]);
    }

    #[test]
    fn a_point_is_its_own_nearest_neighbor() {
        let data = random_data(100, 2, 3);
        let tree = KdTree::default().build(data.view()).unwrap();

        let neighbors = tree.query(data.view(), 1).unwrap();
        for (row, nearest) in neighbors.column(0).iter().enumerate() {
            assert_eq!(*nearest, row);
        }
    }

    #[test]
    fn query_arguments_are_checked() {
        let data = random_data(5, 2, 4);
        let tree = KdTree::default().build(data.view()).unwrap();

        assert!(matches!(
            tree.query(data.view(), 6),
            Err(MlErr::TooFewSamples { got: 5, needed: 6 })
        ));
        assert!(matches!(
            tree.query(data.view(), 0),
            Err(MlErr::InvalidParam { name: "k", .. })
        ));
        assert!(matches!(
            tree.query(Array2::zeros((1, 3)).view(), 1),
            Err(MlErr::SizeMismatch { .. })
        ));
    }

    #[test]
    fn empty_data_cannot_be_indexed() {
        let data = Array2::<f64>::zeros((0, 2));
        assert!(KdTree::default().build(data.view()).is_err());
        assert!(BruteForce.build(data.view()).is_err());
    }
}
