//! Coordinator side of a replication: reassembling the chunks and fitting the global model.

use comms::Gathered;
use log::debug;
use machine_learning::Regressor;
use ndarray::{Array2, ArrayView1, ArrayView2, s};

use crate::{
    LessErr, Result,
    ensemble::{LocalModel, Replication},
    trainer::ChunkOutput,
};

/// The float tail a rank sends for its chunk: predictions then distances, both row major.
pub fn pack<M>(output: &ChunkOutput<M>) -> Vec<f64> {
    output
        .predictions
        .iter()
        .chain(output.distances.iter())
        .copied()
        .collect()
}

/// Every chunk of a replication, concatenated in job order.
#[derive(Debug)]
pub struct Assembled<M> {
    pub locals: Vec<LocalModel<M>>,
    pub predictions: Array2<f64>,
    pub distances: Array2<f64>,
}

/// Concatenates the gathered chunks along the subset axis, in rank order.
///
/// # Arguments
/// * `parts` - One part per rank, each carrying its local models and packed matrices.
/// * `n_eval` - The amount of evaluation rows.
pub fn assemble<M>(parts: Vec<Gathered<Vec<LocalModel<M>>>>, n_eval: usize) -> Result<Assembled<M>> {
    let total = parts.iter().map(|part| part.meta.len()).sum();

    let mut locals = Vec::with_capacity(total);
    let mut predictions = Array2::zeros((n_eval, total));
    let mut distances = Array2::zeros((n_eval, total));

    let mut col = 0;
    for Gathered { meta, floats } in parts {
        let width = meta.len();
        let half = n_eval * width;

        if floats.len() != 2 * half {
            return Err(LessErr::SizeMismatch {
                what: "gathered chunk",
                got: floats.len(),
                expected: 2 * half,
            });
        }

        let (pred, dist) = floats.split_at(half);
        let pred = ArrayView2::from_shape((n_eval, width), pred)?;
        let dist = ArrayView2::from_shape((n_eval, width), dist)?;

        predictions.slice_mut(s![.., col..col + width]).assign(&pred);
        distances.slice_mut(s![.., col..col + width]).assign(&dist);

        locals.extend(meta);
        col += width;
    }

    Ok(Assembled {
        locals,
        predictions,
        distances,
    })
}

/// Scales every row of `distances` to sum to one.
///
/// A row summing to zero carries no information about which subset is closer, it gets the
/// uniform weight `1 / n_subsets` on every subset instead.
///
/// # Returns
/// The amount of rows that summed to zero.
pub fn normalize_rows(distances: &mut Array2<f64>) -> usize {
    let uniform = 1.0 / distances.ncols() as f64;
    let mut zero_rows = 0;

    for mut row in distances.rows_mut() {
        let sum = row.sum();

        if sum == 0.0 {
            row.fill(uniform);
            zero_rows += 1;
        } else {
            row.mapv_inplace(|d| d / sum);
        }
    }

    zero_rows
}

/// Builds the replication out of the assembled chunks.
///
/// # Arguments
/// * `assembled` - The concatenated chunks.
/// * `eval_y` - The evaluation targets.
/// * `global` - The global estimator, `None` when disabled.
/// * `d_normalize` - Whether to normalize the distance rows.
/// * `seed` - The global estimator's seed, if it takes one.
///
/// # Returns
/// The replication and the amount of zero distance rows that were made uniform.
pub fn fit_replication<LM, G: Regressor>(
    assembled: Assembled<LM>,
    eval_y: ArrayView1<f64>,
    global: Option<&G>,
    d_normalize: bool,
    seed: Option<u64>,
) -> Result<(Replication<LM, G::Model>, usize)> {
    let Assembled {
        locals,
        predictions,
        mut distances,
    } = assembled;

    let n_eval = predictions.nrows();
    if n_eval != eval_y.len() {
        return Err(LessErr::SizeMismatch {
            what: "evaluation targets",
            got: eval_y.len(),
            expected: n_eval,
        });
    }

    let zero_rows = if d_normalize {
        normalize_rows(&mut distances)
    } else {
        0
    };

    let global = match global {
        Some(global) => {
            let weighted = &distances * &predictions;
            Some(global.fit(weighted.view(), eval_y, seed)?)
        }
        None => None,
    };

    debug!(subsets = locals.len(), eval_rows = n_eval, zero_rows = zero_rows; "replication aggregated");

    Ok((Replication::new(global, locals, n_eval), zero_rows))
}
