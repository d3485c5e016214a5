//! Degenerate configurations that don't stop a fit but change what it does.

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

/// A non fatal condition detected while validating or fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// Both a clusterer and `frac` were given, `frac` is ignored.
    ClusteringOverridesFrac { frac: f64 },
    /// A single cluster leaves nothing to stack, the global model is disabled.
    SingleClusterWithoutGlobal,
    /// Single cluster without validation split, every replication would be the same.
    NoRandomness,
    /// Deterministic clusterer without validation split, every replication would be the same.
    DeterministicClustering,
    NeighborsExceedSamples { n_neighbors: usize, n_samples: usize },
    SubsetsExceedSamples { n_subsets: usize, n_samples: usize },
    /// A single subset leaves nothing to stack, the global model is disabled.
    SingleSubsetWithoutGlobal,
    /// Evaluation rows whose kernel weights summed to zero got uniform weights instead.
    ZeroDistanceRows { replication: usize, rows: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::ClusteringOverridesFrac { frac } => write!(
                f,
                "both frac ({frac}) and a clustering method were given, proceeding with clustering"
            ),
            Diagnostic::SingleClusterWithoutGlobal => {
                write!(f, "there is only one cluster, the global estimator is disabled")
            }
            Diagnostic::NoRandomness => write!(
                f,
                "a single cluster without validation set has no randomness, using one replication"
            ),
            Diagnostic::DeterministicClustering => write!(
                f,
                "the clustering method is not random and no validation set is used, using one replication"
            ),
            Diagnostic::NeighborsExceedSamples {
                n_neighbors,
                n_samples,
            } => write!(
                f,
                "{n_neighbors} neighbors for {n_samples} samples, using a single subset"
            ),
            Diagnostic::SubsetsExceedSamples {
                n_subsets,
                n_samples,
            } => write!(
                f,
                "{n_subsets} subsets for {n_samples} samples, using one neighbor per subset"
            ),
            Diagnostic::SingleSubsetWithoutGlobal => {
                write!(f, "there is only one subset, the global estimator is disabled")
            }
            Diagnostic::ZeroDistanceRows { replication, rows } => write!(
                f,
                "{rows} rows of replication {replication} had zero total weight, using uniform weights"
            ),
        }
    }
}

/// An ordered record of diagnostics. Every push is also logged as a warning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        warn!("{diagnostic}");
        self.0.push(diagnostic);
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.0
    }

    pub fn contains(&self, diagnostic: &Diagnostic) -> bool {
        self.0.contains(diagnostic)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
