//! The fitted state of a `LessRegressor`.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// A model fitted on one subset, plus the center its kernel weights are measured from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalModel<M> {
    model: M,
    center: Array1<f64>,
}

impl<M> LocalModel<M> {
    pub fn new(model: M, center: Array1<f64>) -> Self {
        Self { model, center }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn center(&self) -> ArrayView1<'_, f64> {
        self.center.view()
    }
}

/// One pass of partition, local fits and global fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replication<LM, GM> {
    global: Option<GM>,
    locals: Vec<LocalModel<LM>>,
    eval_size: usize,
}

impl<LM, GM> Replication<LM, GM> {
    pub fn new(global: Option<GM>, locals: Vec<LocalModel<LM>>, eval_size: usize) -> Self {
        Self {
            global,
            locals,
            eval_size,
        }
    }

    /// The stacking model, `None` when the weighted local predictions are summed instead.
    pub fn global(&self) -> Option<&GM> {
        self.global.as_ref()
    }

    /// The local models, in job order.
    pub fn locals(&self) -> &[LocalModel<LM>] {
        &self.locals
    }

    pub fn n_subsets(&self) -> usize {
        self.locals.len()
    }

    /// The amount of rows the global model was fitted on.
    pub fn eval_size(&self) -> usize {
        self.eval_size
    }
}

/// Subset counts of a fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subsets {
    /// The neighborhood count, shared by every replication.
    Fixed(usize),
    /// The realized cluster count of every replication.
    PerReplication(Vec<usize>),
}

/// The scalar configuration a fit actually ran with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedSettings {
    pub frac: Option<f64>,
    pub n_neighbors: Option<usize>,
    pub n_subsets: Subsets,
    pub n_replications: usize,
    pub d_normalize: bool,
    pub val_size: Option<f64>,
    pub random_state: Option<u64>,
    pub global: bool,
    pub n_features: usize,
}

/// Every replication of a successful fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensemble<LM, GM> {
    replications: Vec<Replication<LM, GM>>,
    settings: FittedSettings,
}

impl<LM, GM> Ensemble<LM, GM> {
    pub fn new(replications: Vec<Replication<LM, GM>>, settings: FittedSettings) -> Self {
        debug_assert_eq!(replications.len(), settings.n_replications);
        Self {
            replications,
            settings,
        }
    }

    pub fn replications(&self) -> &[Replication<LM, GM>] {
        &self.replications
    }

    pub fn settings(&self) -> &FittedSettings {
        &self.settings
    }
}
