//! Hyperparameters of a `LessRegressor`.
//!
//! A `LessConfig` is a plain builder, nothing is checked until `validate` turns it into a
//! `ValidatedConfig`, which is never mutated again. Quantities that depend on the training
//! set size are derived per fit by `ValidatedConfig::derive_sizing`.

use std::{fmt, sync::Arc};

use machine_learning::{Clusterer, IndexBuilder, KdTree, Kernel, LinearRegression};

use crate::{
    LessErr, Result,
    diagnostics::{Diagnostic, Diagnostics},
};

/// Fraction of the training set in each neighborhood when nothing else sizes them.
pub const DEFAULT_FRAC: f64 = 0.05;
pub const DEFAULT_REPLICATIONS: usize = 20;

/// Raw hyperparameters.
///
/// # Type parameters
/// * `L` - The local estimator, fitted once per subset.
/// * `G` - The global estimator, fitted once per replication on the weighted local predictions.
#[derive(Clone)]
pub struct LessConfig<L = LinearRegression, G = LinearRegression> {
    frac: Option<f64>,
    n_neighbors: Option<usize>,
    n_subsets: Option<usize>,
    n_replications: usize,
    d_normalize: bool,
    val_size: Option<f64>,
    random_state: Option<u64>,
    share_ensemble: bool,
    tree_method: Arc<dyn IndexBuilder>,
    cluster_method: Option<Arc<dyn Clusterer>>,
    local_estimator: Option<L>,
    global_estimator: Option<G>,
    distance_function: Option<Arc<dyn Kernel>>,
}

impl Default for LessConfig {
    fn default() -> Self {
        Self {
            frac: None,
            n_neighbors: None,
            n_subsets: None,
            n_replications: DEFAULT_REPLICATIONS,
            d_normalize: true,
            val_size: None,
            random_state: None,
            share_ensemble: false,
            tree_method: Arc::new(KdTree::default()),
            cluster_method: None,
            local_estimator: Some(LinearRegression::default()),
            global_estimator: Some(LinearRegression::default()),
            distance_function: None,
        }
    }
}

impl LessConfig {
    /// Creates a new `LessConfig` with linear local and global estimators.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<L, G> LessConfig<L, G> {
    /// Fraction of the training set in each neighborhood, in `(0, 1]`.
    pub fn frac(mut self, frac: f64) -> Self {
        self.frac = Some(frac);
        self
    }

    pub fn n_neighbors(mut self, n_neighbors: usize) -> Self {
        self.n_neighbors = Some(n_neighbors);
        self
    }

    pub fn n_subsets(mut self, n_subsets: usize) -> Self {
        self.n_subsets = Some(n_subsets);
        self
    }

    pub fn n_replications(mut self, n_replications: usize) -> Self {
        self.n_replications = n_replications;
        self
    }

    /// Whether each row of kernel weights is scaled to sum to one.
    pub fn d_normalize(mut self, d_normalize: bool) -> Self {
        self.d_normalize = d_normalize;
        self
    }

    /// Fraction of the data held out to fit the global estimator, in `(0, 1)`.
    pub fn val_size(mut self, val_size: f64) -> Self {
        self.val_size = Some(val_size);
        self
    }

    pub fn random_state(mut self, random_state: u64) -> Self {
        self.random_state = Some(random_state);
        self
    }

    /// Whether every rank receives the fitted ensemble, not only the coordinator.
    pub fn share_ensemble(mut self, share_ensemble: bool) -> Self {
        self.share_ensemble = share_ensemble;
        self
    }

    pub fn tree_method(mut self, tree_method: impl IndexBuilder + 'static) -> Self {
        self.tree_method = Arc::new(tree_method);
        self
    }

    /// Partitions by clustering instead of neighborhoods.
    pub fn cluster_method(mut self, cluster_method: impl Clusterer + 'static) -> Self {
        self.cluster_method = Some(Arc::new(cluster_method));
        self
    }

    /// Replaces the default RBF kernel.
    pub fn distance_function(mut self, distance_function: impl Kernel + 'static) -> Self {
        self.distance_function = Some(Arc::new(distance_function));
        self
    }

    pub fn local_estimator<L2>(self, local_estimator: L2) -> LessConfig<L2, G> {
        LessConfig {
            frac: self.frac,
            n_neighbors: self.n_neighbors,
            n_subsets: self.n_subsets,
            n_replications: self.n_replications,
            d_normalize: self.d_normalize,
            val_size: self.val_size,
            random_state: self.random_state,
            share_ensemble: self.share_ensemble,
            tree_method: self.tree_method,
            cluster_method: self.cluster_method,
            local_estimator: Some(local_estimator),
            global_estimator: self.global_estimator,
            distance_function: self.distance_function,
        }
    }

    pub fn global_estimator<G2>(self, global_estimator: G2) -> LessConfig<L, G2> {
        LessConfig {
            frac: self.frac,
            n_neighbors: self.n_neighbors,
            n_subsets: self.n_subsets,
            n_replications: self.n_replications,
            d_normalize: self.d_normalize,
            val_size: self.val_size,
            random_state: self.random_state,
            share_ensemble: self.share_ensemble,
            tree_method: self.tree_method,
            cluster_method: self.cluster_method,
            local_estimator: self.local_estimator,
            global_estimator: Some(global_estimator),
            distance_function: self.distance_function,
        }
    }

    /// Removes the local estimator. Such a configuration never validates.
    pub fn without_local_estimator(mut self) -> Self {
        self.local_estimator = None;
        self
    }

    /// Removes the global estimator, replications then sum their weighted local predictions.
    pub fn without_global_estimator(mut self) -> Self {
        self.global_estimator = None;
        self
    }

    /// Checks the hyperparameters and resolves the rules that don't depend on the data.
    ///
    /// # Errors
    /// `LessErr::InvalidConfiguration` when no local estimator is set, `val_size` is outside
    /// `(0, 1)`, `frac` is outside `(0, 1]`, `n_replications` is zero or a neighborhood or
    /// subset count of zero is requested.
    pub fn validate(self) -> Result<ValidatedConfig<L, G>> {
        let local_estimator = self
            .local_estimator
            .ok_or_else(|| LessErr::config("LESS does not work without a local estimator"))?;

        if let Some(val_size) = self.val_size
            && !(val_size > 0.0 && val_size < 1.0)
        {
            return Err(LessErr::config(format!(
                "val_size should be in the interval (0, 1), got {val_size}"
            )));
        }

        if let Some(frac) = self.frac
            && !(frac > 0.0 && frac <= 1.0)
        {
            return Err(LessErr::config(format!(
                "frac should be in the interval (0, 1], got {frac}"
            )));
        }

        if self.n_replications < 1 {
            return Err(LessErr::config("n_replications should be at least one"));
        }

        if self.n_neighbors == Some(0) || self.n_subsets == Some(0) {
            return Err(LessErr::config(
                "n_neighbors and n_subsets should be at least one",
            ));
        }

        let mut diagnostics = Diagnostics::default();
        let mut frac = self.frac;
        let mut global_estimator = self.global_estimator;
        let mut d_normalize = self.d_normalize;
        let mut n_replications = self.n_replications;

        match &self.cluster_method {
            Some(clusterer) => {
                if let Some(frac) = frac.take() {
                    diagnostics.push(Diagnostic::ClusteringOverridesFrac { frac });
                }

                if clusterer.n_clusters() == 1 {
                    global_estimator = None;
                    d_normalize = true;
                    diagnostics.push(Diagnostic::SingleClusterWithoutGlobal);

                    if self.val_size.is_none() {
                        n_replications = 1;
                        diagnostics.push(Diagnostic::NoRandomness);
                    }
                } else if !clusterer.is_stochastic() && self.val_size.is_none() {
                    n_replications = 1;
                    diagnostics.push(Diagnostic::DeterministicClustering);
                }
            }
            None if frac.is_none() && self.n_neighbors.is_none() && self.n_subsets.is_none() => {
                frac = Some(DEFAULT_FRAC);
            }
            None => {}
        }

        Ok(ValidatedConfig {
            frac,
            n_neighbors: self.n_neighbors,
            n_subsets: self.n_subsets,
            requested_replications: self.n_replications,
            n_replications,
            d_normalize,
            val_size: self.val_size,
            random_state: self.random_state,
            share_ensemble: self.share_ensemble,
            tree_method: self.tree_method,
            cluster_method: self.cluster_method,
            local_estimator,
            global_estimator,
            distance_function: self.distance_function,
            diagnostics,
        })
    }
}

impl<L: fmt::Debug, G: fmt::Debug> fmt::Debug for LessConfig<L, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LessConfig")
            .field("frac", &self.frac)
            .field("n_neighbors", &self.n_neighbors)
            .field("n_subsets", &self.n_subsets)
            .field("n_replications", &self.n_replications)
            .field("d_normalize", &self.d_normalize)
            .field("val_size", &self.val_size)
            .field("random_state", &self.random_state)
            .field("share_ensemble", &self.share_ensemble)
            .field("clustering", &self.cluster_method.is_some())
            .field("local_estimator", &self.local_estimator)
            .field("global_estimator", &self.global_estimator)
            .field("custom_kernel", &self.distance_function.is_some())
            .finish_non_exhaustive()
    }
}

/// How the subsets of a fit are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `n_subsets` neighborhoods of `n_neighbors` rows each.
    Neighborhood { n_neighbors: usize, n_subsets: usize },
    /// One subset per realized cluster, counted per replication.
    Clustering,
}

/// The per fit realization of a `ValidatedConfig` against a training set size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizing {
    pub layout: Layout,
    pub global: bool,
    pub d_normalize: bool,
}

/// Hyperparameters that passed validation.
#[derive(Clone)]
pub struct ValidatedConfig<L, G> {
    frac: Option<f64>,
    n_neighbors: Option<usize>,
    n_subsets: Option<usize>,
    requested_replications: usize,
    n_replications: usize,
    d_normalize: bool,
    val_size: Option<f64>,
    random_state: Option<u64>,
    share_ensemble: bool,
    tree_method: Arc<dyn IndexBuilder>,
    cluster_method: Option<Arc<dyn Clusterer>>,
    local_estimator: L,
    global_estimator: Option<G>,
    distance_function: Option<Arc<dyn Kernel>>,
    diagnostics: Diagnostics,
}

impl<L, G> ValidatedConfig<L, G> {
    /// Derives the neighborhood layout for a training set of `n_samples` rows.
    ///
    /// `n_neighbors = ceil(frac * n)`, then `n_subsets = n / n_neighbors` and `n_neighbors` is
    /// recomputed as `n / n_subsets`, so their product stays close to `n`. A count missing
    /// without `frac` is derived from the other one. Counts reaching `n_samples` collapse, and a
    /// single subset disables the global estimator.
    ///
    /// # Arguments
    /// * `n_samples` - The size of the training portion, at least 1.
    /// * `diagnostics` - Where the collapses are recorded.
    pub fn derive_sizing(&self, n_samples: usize, diagnostics: &mut Diagnostics) -> Sizing {
        let mut sizing = Sizing {
            layout: Layout::Clustering,
            global: self.global_estimator.is_some(),
            d_normalize: self.d_normalize,
        };

        if self.cluster_method.is_some() {
            return sizing;
        }

        let n = n_samples.max(1);
        let from_frac = |frac: f64| {
            let n_neighbors = ((frac * n as f64).ceil() as usize).clamp(1, n);
            let n_subsets = n / n_neighbors;
            (n / n_subsets, n_subsets)
        };

        let (mut n_neighbors, mut n_subsets) = match (self.frac, self.n_neighbors, self.n_subsets) {
            (Some(frac), ..) => from_frac(frac),
            (None, Some(n_neighbors), Some(n_subsets)) => (n_neighbors, n_subsets),
            (None, Some(n_neighbors), None) => (n_neighbors, n / n_neighbors),
            (None, None, Some(n_subsets)) => (n / n_subsets, n_subsets),
            (None, None, None) => from_frac(DEFAULT_FRAC),
        };

        if n_neighbors >= n {
            diagnostics.push(Diagnostic::NeighborsExceedSamples {
                n_neighbors,
                n_samples: n,
            });
            n_neighbors = n;
            n_subsets = 1;
        }

        if n_subsets >= n {
            diagnostics.push(Diagnostic::SubsetsExceedSamples {
                n_subsets,
                n_samples: n,
            });
            n_neighbors = 1;
            n_subsets = n;
        }

        if n_subsets == 1 {
            diagnostics.push(Diagnostic::SingleSubsetWithoutGlobal);
            sizing.global = false;
            sizing.d_normalize = true;
        }

        sizing.layout = Layout::Neighborhood {
            n_neighbors,
            n_subsets,
        };
        sizing
    }

    pub fn frac(&self) -> Option<f64> {
        self.frac
    }

    pub fn n_neighbors(&self) -> Option<usize> {
        self.n_neighbors
    }

    pub fn n_subsets(&self) -> Option<usize> {
        self.n_subsets
    }

    /// The replication count a fit realizes.
    pub fn n_replications(&self) -> usize {
        self.n_replications
    }

    /// The replication count that was asked for.
    pub fn requested_replications(&self) -> usize {
        self.requested_replications
    }

    pub fn d_normalize(&self) -> bool {
        self.d_normalize
    }

    pub fn val_size(&self) -> Option<f64> {
        self.val_size
    }

    pub fn random_state(&self) -> Option<u64> {
        self.random_state
    }

    pub fn share_ensemble(&self) -> bool {
        self.share_ensemble
    }

    pub fn is_clustering(&self) -> bool {
        self.cluster_method.is_some()
    }

    pub fn tree_method(&self) -> &Arc<dyn IndexBuilder> {
        &self.tree_method
    }

    pub fn cluster_method(&self) -> Option<&Arc<dyn Clusterer>> {
        self.cluster_method.as_ref()
    }

    pub fn local_estimator(&self) -> &L {
        &self.local_estimator
    }

    pub fn global_estimator(&self) -> Option<&G> {
        self.global_estimator.as_ref()
    }

    pub fn distance_function(&self) -> Option<&dyn Kernel> {
        self.distance_function.as_deref()
    }

    /// The diagnostics raised by validation.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

impl<L: fmt::Debug, G: fmt::Debug> fmt::Debug for ValidatedConfig<L, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("frac", &self.frac)
            .field("n_neighbors", &self.n_neighbors)
            .field("n_subsets", &self.n_subsets)
            .field("n_replications", &self.n_replications)
            .field("d_normalize", &self.d_normalize)
            .field("val_size", &self.val_size)
            .field("random_state", &self.random_state)
            .field("clustering", &self.cluster_method.is_some())
            .field("global_estimator", &self.global_estimator)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}
