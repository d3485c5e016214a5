//! The distributed fit and the public estimator.
//!
//! Every rank runs `LessRegressor::fit` with the same configuration and the same data. The
//! coordinator takes every random or single-authority decision (splits, partitions, seeds) and
//! broadcasts it, each rank trains its chunk of local models and the coordinator gathers the
//! chunks back to fit the global model.
//!
//! A failure anywhere fails the fit on every rank: the coordinator aborts its peers, a failing
//! worker reports its error in the gather and waits for that abort, so every stream stays
//! aligned and no rank is left waiting.

use std::hash::{DefaultHasher, Hash, Hasher};

use comms::{Gathered, Part, ProcessGroup};
use log::{debug, info, warn};
use machine_learning::{LinearRegression, Regressor};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    LessErr, Result, aggregate,
    config::{Layout, LessConfig, ValidatedConfig},
    diagnostics::{Diagnostic, Diagnostics},
    distribution::WorkChunk,
    ensemble::{Ensemble, FittedSettings, Subsets},
    partition::{Partitioner, Plan, Portions, Split},
    predict, trainer,
};

/// The ensemble fitted by a `LessRegressor<L, G>`.
pub type FittedEnsemble<L, G> = Ensemble<<L as Regressor>::Model, <G as Regressor>::Model>;

/// Learning by Ensembling Subset Stackers.
///
/// # Type parameters
/// * `L` - The local estimator.
/// * `G` - The global estimator.
#[derive(Debug)]
pub struct LessRegressor<L = LinearRegression, G = LinearRegression>
where
    L: Regressor,
    G: Regressor,
{
    config: ValidatedConfig<L, G>,
    ensemble: Option<FittedEnsemble<L, G>>,
    diagnostics: Diagnostics,
}

impl<L, G> LessRegressor<L, G>
where
    L: Regressor,
    G: Regressor,
{
    /// Creates a new `LessRegressor`.
    ///
    /// # Errors
    /// `LessErr::InvalidConfiguration` if `config` doesn't validate.
    pub fn new(config: LessConfig<L, G>) -> Result<Self> {
        let config = config.validate()?;
        let diagnostics = config.diagnostics().clone();

        Ok(Self {
            config,
            ensemble: None,
            diagnostics,
        })
    }

    /// Fits the ensemble. Must be called by every rank of `group` with the same data.
    ///
    /// Any previous ensemble is discarded first, a failed fit leaves none. Only the coordinator
    /// holds the ensemble afterwards unless the configuration shares it.
    ///
    /// # Arguments
    /// * `group` - The process group the fit is distributed over.
    /// * `x` - The feature rows.
    /// * `y` - One target per row.
    pub async fn fit<P: ProcessGroup>(
        &mut self,
        group: &mut P,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<&mut Self> {
        self.ensemble = None;
        self.diagnostics = self.config.diagnostics().clone();

        match fit_ensemble(&self.config, &mut self.diagnostics, group, x, y).await {
            Ok(ensemble) => {
                self.ensemble = ensemble;
                Ok(self)
            }
            Err(e) => {
                warn!(rank = group.rank(); "fit failed: {e}");
                Err(e)
            }
        }
    }

    /// Predicts one target per row of `x0`.
    ///
    /// # Errors
    /// `LessErr::NotFitted` without a fitted ensemble, `LessErr::SizeMismatch` if the column
    /// count differs from fit time.
    pub fn predict(&self, x0: ArrayView2<f64>) -> Result<Array1<f64>> {
        let ensemble = self.ensemble.as_ref().ok_or(LessErr::NotFitted)?;
        predict::predict(ensemble, x0, self.config.distance_function())
    }

    pub fn is_fitted(&self) -> bool {
        self.ensemble.is_some()
    }

    pub fn ensemble(&self) -> Option<&FittedEnsemble<L, G>> {
        self.ensemble.as_ref()
    }

    pub fn config(&self) -> &ValidatedConfig<L, G> {
        &self.config
    }

    /// The diagnostics of validation and of the last fit.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.as_slice()
    }

    fn settings(&self) -> Option<&FittedSettings> {
        self.ensemble.as_ref().map(Ensemble::settings)
    }

    /// The fixed subset count, or the count of every replication under clustering.
    pub fn get_n_subsets(&self) -> Option<Subsets> {
        if let Some(settings) = self.settings() {
            return Some(settings.n_subsets.clone());
        }

        warn!("You need to fit LESS first");
        self.config.n_subsets().map(Subsets::Fixed)
    }

    pub fn get_n_neighbors(&self) -> Option<usize> {
        if self.config.is_clustering() {
            warn!("The number of neighbors is not fixed when clustering is used");
            return None;
        }

        if let Some(settings) = self.settings() {
            return settings.n_neighbors;
        }

        warn!("You need to fit LESS first");
        self.config.n_neighbors()
    }

    pub fn get_frac(&self) -> Option<f64> {
        if self.config.is_clustering() {
            warn!("Parameter frac is not set when clustering is used");
        }

        self.config.frac()
    }

    pub fn get_n_replications(&self) -> usize {
        self.settings()
            .map_or(self.config.n_replications(), |s| s.n_replications)
    }

    pub fn get_d_normalize(&self) -> bool {
        self.settings()
            .map_or(self.config.d_normalize(), |s| s.d_normalize)
    }

    pub fn get_val_size(&self) -> Option<f64> {
        self.config.val_size()
    }

    pub fn get_random_state(&self) -> Option<u64> {
        self.config.random_state()
    }
}

/// What every rank reports about its data before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct DataShape {
    rows: usize,
    cols: usize,
    fingerprint: u64,
}

impl DataShape {
    fn of(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Self {
        let mut hasher = DefaultHasher::new();
        x.iter()
            .chain(y.iter())
            .for_each(|v| v.to_bits().hash(&mut hasher));

        Self {
            rows: x.nrows(),
            cols: x.ncols(),
            fingerprint: hasher.finish(),
        }
    }
}

fn check_input(x: ArrayView2<f64>, y: ArrayView1<f64>, val_size: Option<f64>) -> Result<()> {
    if x.nrows() == 0 {
        return Err(LessErr::input("the training set is empty"));
    }

    if x.ncols() == 0 {
        return Err(LessErr::input("the training set has no features"));
    }

    if y.len() != x.nrows() {
        return Err(LessErr::SizeMismatch {
            what: "targets",
            got: y.len(),
            expected: x.nrows(),
        });
    }

    if !x.iter().chain(y.iter()).all(|v| v.is_finite()) {
        return Err(LessErr::input("the training set holds non finite values"));
    }

    if let Some(val_size) = val_size {
        Split::sizes(x.nrows(), val_size)?;
    }

    Ok(())
}

/// Best effort, tells every peer the current fit failed.
async fn abort_peers<P: ProcessGroup>(group: &mut P, err: &LessErr) {
    if let Err(e) = group.abort(&err.to_string()).await {
        warn!(rank = group.rank(); "failed to abort the peers: {e}");
    }
}

/// Runs `step` on the coordinator and broadcasts its outcome to every rank.
///
/// If `step` fails the peers are aborted instead. Other ranks never call `step`.
async fn decide<P, T, F>(group: &mut P, step: F) -> Result<T>
where
    P: ProcessGroup,
    T: Serialize + DeserializeOwned + Send + Sync,
    F: FnOnce() -> Result<T>,
{
    if !group.is_coordinator() {
        return Ok(group.broadcast(None).await?);
    }

    match step() {
        Ok(value) => Ok(group.broadcast(Some(&value)).await?),
        Err(e) => {
            abort_peers(group, &e).await;
            Err(e)
        }
    }
}

/// Contributes this rank's part to a gather.
///
/// A rank whose part failed still takes part in the gather. The coordinator aborts its peers
/// on any failure and a failed worker consumes that abort before returning its own error.
///
/// # Returns
/// Every part ordered by rank on the coordinator, `None` elsewhere.
async fn submit<P, T>(
    group: &mut P,
    part: Result<(&T, &[f64])>,
) -> Result<Option<Vec<Gathered<T>>>>
where
    P: ProcessGroup,
    T: Serialize + DeserializeOwned + Send + Sync,
{
    let (gathered, own) = match part {
        Ok((meta, floats)) => (group.gather(Ok(Part { meta, floats })).await, None),
        Err(e) => {
            let detail = e.to_string();
            (group.gather(Err(&detail)).await, Some(e))
        }
    };

    let err = match (gathered, own) {
        (Ok(parts), None) => return Ok(parts),
        (Ok(_), Some(own)) => {
            if let Err(e) = group.broadcast::<serde_json::Value>(None).await {
                debug!(rank = group.rank(); "fit aborted by the coordinator: {e}");
            }
            own
        }
        (Err(e), own) => own.unwrap_or_else(|| e.into()),
    };

    if group.is_coordinator() {
        abort_peers(group, &err).await;
    }

    Err(err)
}

/// Checks the data on every rank and makes sure every rank holds the same data set.
async fn handshake<P: ProcessGroup>(
    group: &mut P,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    val_size: Option<f64>,
) -> Result<DataShape> {
    let shape = DataShape::of(x, y);
    let none: &[f64] = &[];
    let part = check_input(x, y, val_size).map(|()| (&shape, none));

    let parts = submit(group, part).await?;

    decide(group, || {
        for (rank, part) in parts.iter().flatten().enumerate() {
            if part.meta != shape {
                return Err(LessErr::input(format!(
                    "rank {rank} holds a different data set, {}x{} samples against {}x{}",
                    part.meta.rows, part.meta.cols, shape.rows, shape.cols
                )));
            }
        }

        Ok(shape)
    })
    .await
}

async fn fit_ensemble<L, G, P>(
    config: &ValidatedConfig<L, G>,
    diagnostics: &mut Diagnostics,
    group: &mut P,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<Option<FittedEnsemble<L, G>>>
where
    L: Regressor,
    G: Regressor,
    P: ProcessGroup,
{
    let rank = group.rank();
    let coordinator = group.is_coordinator();

    handshake(group, x, y, config.val_size()).await?;

    let n_train = match config.val_size() {
        Some(val_size) => Split::sizes(x.nrows(), val_size)?.0,
        None => x.nrows(),
    };
    let sizing = config.derive_sizing(n_train, diagnostics);

    let global = config.global_estimator().filter(|_| sizing.global);
    let n_replications = config.n_replications();

    let mut rng = match config.random_state() {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut partitioner = Partitioner::new(
        config.tree_method().clone(),
        config.cluster_method().cloned(),
        config.val_size().is_some(),
    );

    if coordinator {
        info!(
            ranks = group.size(),
            rows = x.nrows(),
            cols = x.ncols(),
            replications = n_replications;
            "fitting LESS"
        );
    }

    let mut replications = Vec::with_capacity(n_replications);
    let mut subset_counts = Vec::with_capacity(n_replications);

    for i in 0..n_replications {
        let portions = match config.val_size() {
            Some(val_size) => decide(group, || Split::draw(x.nrows(), val_size, &mut rng))
                .await?
                .portions(x, y),
            None => Portions::whole(x, y),
        };

        let plan = decide(group, || {
            let partition =
                partitioner.partition(portions.train_x.view(), sizing.layout, &mut rng)?;

            let seeds = config
                .local_estimator()
                .accepts_seed()
                .then(|| (0..partition.n_subsets()).map(|_| rng.random()).collect());

            Ok(Plan { partition, seeds })
        })
        .await?;

        let n_subsets = plan.partition.n_subsets();
        subset_counts.push(n_subsets);

        let chunk = WorkChunk::new(n_subsets, rank, group.size());
        debug!(
            rank = rank,
            replication = i,
            jobs = chunk.len();
            "training chunk"
        );

        let output = trainer::train_chunk(
            config.local_estimator(),
            config.distance_function(),
            &plan,
            &chunk,
            portions.train_x.view(),
            portions.train_y.view(),
            portions.eval_x.view(),
        );

        let (locals, floats, failure) = match output {
            Ok(output) => {
                let floats = aggregate::pack(&output);
                (output.locals, floats, None)
            }
            Err(e) => (Vec::new(), Vec::new(), Some(e)),
        };

        let part = match failure {
            None => Ok((&locals, floats.as_slice())),
            Some(e) => Err(e),
        };

        let Some(parts) = submit(group, part).await? else {
            continue;
        };

        let seed = global
            .is_some_and(|global| global.accepts_seed())
            .then(|| rng.random());

        let aggregated = aggregate::assemble(parts, portions.eval_x.nrows()).and_then(|assembled| {
            aggregate::fit_replication(
                assembled,
                portions.eval_y.view(),
                global,
                sizing.d_normalize,
                seed,
            )
        });

        let (replication, zero_rows) = match aggregated {
            Ok(aggregated) => aggregated,
            Err(e) => {
                abort_peers(group, &e).await;
                return Err(e);
            }
        };

        if zero_rows > 0 {
            diagnostics.push(Diagnostic::ZeroDistanceRows {
                replication: i,
                rows: zero_rows,
            });
        }

        info!(
            replication = i,
            subsets = n_subsets,
            eval_rows = replication.eval_size();
            "replication fitted"
        );
        replications.push(replication);
    }

    if !coordinator {
        return Ok(group.broadcast(None).await?);
    }

    let (frac, n_neighbors, n_subsets) = match sizing.layout {
        Layout::Neighborhood {
            n_neighbors,
            n_subsets,
        } => (config.frac(), Some(n_neighbors), Subsets::Fixed(n_subsets)),
        Layout::Clustering => (None, None, Subsets::PerReplication(subset_counts)),
    };

    let settings = FittedSettings {
        frac,
        n_neighbors,
        n_subsets,
        n_replications,
        d_normalize: sizing.d_normalize,
        val_size: config.val_size(),
        random_state: config.random_state(),
        global: global.is_some(),
        n_features: x.ncols(),
    };

    let ensemble = Ensemble::new(replications, settings);

    if config.share_ensemble() {
        let shared = Some(ensemble);
        group.broadcast(Some(&shared)).await?;
        return Ok(shared);
    }

    group
        .broadcast::<Option<FittedEnsemble<L, G>>>(Some(&None))
        .await?;

    Ok(Some(ensemble))
}
