use log::warn;
use machine_learning::{Kernel, Predict};
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::{
    LessErr, Result, aggregate,
    ensemble::{Ensemble, Replication},
    trainer,
};

/// The prediction of a single replication.
///
/// Local predictions and kernel weights are recomputed for `x0` exactly as they were for the
/// evaluation rows at fit time, then either stacked by the global model or summed.
pub fn predict_replication<LM: Predict, GM: Predict>(
    replication: &Replication<LM, GM>,
    x0: ArrayView2<f64>,
    kernel: Option<&dyn Kernel>,
    d_normalize: bool,
) -> Result<Array1<f64>> {
    let n_subsets = replication.n_subsets();
    let mut predictions = Array2::zeros((x0.nrows(), n_subsets));
    let mut distances = Array2::zeros((x0.nrows(), n_subsets));

    for (col, local) in replication.locals().iter().enumerate() {
        let (pred, dist) = trainer::evaluate(local.model(), local.center(), x0, kernel, n_subsets)?;
        predictions.column_mut(col).assign(&pred);
        distances.column_mut(col).assign(&dist);
    }

    if d_normalize {
        let zero_rows = aggregate::normalize_rows(&mut distances);
        if zero_rows > 0 {
            warn!(rows = zero_rows; "rows with zero total weight got uniform weights");
        }
    }

    let weighted = distances * predictions;
    match replication.global() {
        Some(global) => Ok(global.predict(weighted.view())?),
        None => Ok(weighted.sum_axis(Axis(1))),
    }
}

/// Averages the predictions of every replication of `ensemble` over `x0`.
///
/// The average is taken over the replications the fit actually produced.
pub fn predict<LM: Predict, GM: Predict>(
    ensemble: &Ensemble<LM, GM>,
    x0: ArrayView2<f64>,
    kernel: Option<&dyn Kernel>,
) -> Result<Array1<f64>> {
    let settings = ensemble.settings();
    if x0.ncols() != settings.n_features {
        return Err(LessErr::SizeMismatch {
            what: "features",
            got: x0.ncols(),
            expected: settings.n_features,
        });
    }

    let mut total = Array1::zeros(x0.nrows());
    for replication in ensemble.replications() {
        total += &predict_replication(replication, x0, kernel, settings.d_normalize)?;
    }

    Ok(total / ensemble.replications().len() as f64)
}
