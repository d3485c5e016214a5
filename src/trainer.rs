use log::debug;
use machine_learning::{Kernel, Predict, Rbf, Regressor};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::{LessErr, Result, distribution::WorkChunk, ensemble::LocalModel, partition::Plan};

/// What a rank produces for its chunk of one replication.
#[derive(Debug, Clone)]
pub struct ChunkOutput<M> {
    /// The chunk's local models, in job order.
    pub locals: Vec<LocalModel<M>>,
    /// `(n_eval, chunk.len())` local predictions over the evaluation rows.
    pub predictions: Array2<f64>,
    /// `(n_eval, chunk.len())` kernel weights of the evaluation rows.
    pub distances: Array2<f64>,
}

/// Predictions and kernel weights of one local model over `x`.
///
/// # Arguments
/// * `model` - The fitted local model.
/// * `center` - The model's center.
/// * `x` - The rows to evaluate.
/// * `kernel` - A custom kernel, `Rbf::for_subsets(n_subsets)` when missing.
/// * `n_subsets` - The subset count of the model's replication.
pub fn evaluate<M: Predict>(
    model: &M,
    center: ArrayView1<f64>,
    x: ArrayView2<f64>,
    kernel: Option<&dyn Kernel>,
    n_subsets: usize,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let predictions = model.predict(x)?;
    let weights = match kernel {
        Some(kernel) => kernel.weights(x, center),
        None => Rbf::for_subsets(n_subsets).weights(x, center),
    };

    if predictions.len() != x.nrows() {
        return Err(LessErr::SizeMismatch {
            what: "local predictions",
            got: predictions.len(),
            expected: x.nrows(),
        });
    }

    if weights.len() != x.nrows() {
        return Err(LessErr::SizeMismatch {
            what: "kernel weights",
            got: weights.len(),
            expected: x.nrows(),
        });
    }

    Ok((predictions, weights))
}

/// Fits the local models of `chunk` and evaluates them.
///
/// # Arguments
/// * `estimator` - The local estimator.
/// * `kernel` - A custom kernel, if any.
/// * `plan` - The replication's partition and per job seeds.
/// * `chunk` - This rank's jobs.
/// * `train_x`, `train_y` - The rows the partition indexes into.
/// * `eval_x` - The rows predictions and weights are recorded for.
pub fn train_chunk<L: Regressor>(
    estimator: &L,
    kernel: Option<&dyn Kernel>,
    plan: &Plan,
    chunk: &WorkChunk,
    train_x: ArrayView2<f64>,
    train_y: ArrayView1<f64>,
    eval_x: ArrayView2<f64>,
) -> Result<ChunkOutput<L::Model>> {
    let n_subsets = plan.partition.n_subsets();
    let n_eval = eval_x.nrows();

    let mut locals = Vec::with_capacity(chunk.len());
    let mut predictions = Array2::zeros((n_eval, chunk.len()));
    let mut distances = Array2::zeros((n_eval, chunk.len()));

    for (col, job) in chunk.jobs().enumerate() {
        let members = plan.partition.members(job);
        let sub_x = train_x.select(Axis(0), &members);
        let sub_y = train_y.select(Axis(0), &members);

        let center = plan.partition.center(job, sub_x.view());
        let seed = estimator.accepts_seed().then(|| plan.seed(job)).flatten();
        let model = estimator.fit(sub_x.view(), sub_y.view(), seed)?;

        let (pred, dist) = evaluate(&model, center.view(), eval_x, kernel, n_subsets)?;
        predictions.column_mut(col).assign(&pred);
        distances.column_mut(col).assign(&dist);

        locals.push(LocalModel::new(model, center));
    }

    debug!(rank = chunk.rank, jobs = chunk.len(), eval_rows = n_eval; "chunk trained");

    Ok(ChunkOutput {
        locals,
        predictions,
        distances,
    })
}
