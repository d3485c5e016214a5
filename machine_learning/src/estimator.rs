use std::fmt::Debug;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Serialize, de::DeserializeOwned};

use crate::Result;

/// A fitted model able to map feature rows to targets.
pub trait Predict {
    /// Predicts one target per row of `x`.
    ///
    /// # Errors
    /// Returns `MlErr::SizeMismatch` if the column count differs from fit time.
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>>;
}

/// A recipe for fitting regression models.
///
/// The recipe itself is never mutated by fitting, every call produces a fresh model, which lets
/// the same recipe be shared by every subset of every replication.
pub trait Regressor: Send + Sync {
    /// The fitted model. It travels between ranks, so it has to be serializable.
    type Model: Predict + Clone + Debug + Serialize + DeserializeOwned + Send + Sync;

    /// Fits a new model on `x` and `y`.
    ///
    /// # Arguments
    /// * `x` - The feature rows.
    /// * `y` - One target per row.
    /// * `seed` - A seed for the fit's randomness, only given when `accepts_seed` is true.
    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>, seed: Option<u64>)
    -> Result<Self::Model>;

    /// Whether the fit consumes a random seed.
    fn accepts_seed(&self) -> bool {
        false
    }
}
