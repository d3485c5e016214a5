//! LESS: Learning by Ensembling Subset Stackers.
//!
//! A regression meta-algorithm that fits many local models on small subsets of the training
//! set, weights their predictions by the distance to each subset's center and stacks them
//! with a global model. The local models of a replication are trained in parallel over a
//! [`ProcessGroup`], where every rank runs the same program and the coordinator owns the
//! fitted ensemble.

pub mod aggregate;
pub mod config;
pub mod diagnostics;
pub mod distribution;
pub mod ensemble;
pub mod error;
pub mod partition;
pub mod predict;
pub mod regressor;
pub mod trainer;

pub use comms::{COORDINATOR, MemGroup, ProcessGroup, TcpGroup, in_memory};
pub use config::{LessConfig, ValidatedConfig};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use ensemble::{Ensemble, FittedSettings, LocalModel, Replication, Subsets};
pub use error::{LessErr, Result};
pub use machine_learning::{
    BruteForce, Clusterer, Clustering, IndexBuilder, Init, KMeans, KdTree, Kernel, LinearModel,
    LinearRegression, Predict, Rbf, Regressor, SpatialIndex,
};
pub use regressor::{FittedEnsemble, LessRegressor};
