//! Capabilities the LESS engine is built from, plus one default implementation of each.

pub mod cluster;
pub mod error;
pub mod estimator;
pub mod kernel;
pub mod linalg;
pub mod linear;
pub mod neighbors;

pub use cluster::{Clusterer, Clustering, Init, KMeans};
pub use error::{MlErr, Result};
pub use estimator::{Predict, Regressor};
pub use kernel::{Kernel, Rbf};
pub use linear::{LinearModel, LinearRegression};
pub use neighbors::{BruteForce, IndexBuilder, KdTree, SpatialIndex};
