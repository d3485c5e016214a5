use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::{MlErr, Predict, Regressor, Result, linalg};

/// Ordinary least squares.
///
/// Rank deficient problems (fewer rows than columns, duplicated features) don't fail, the
/// directions the data doesn't span get a zero coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    pub fit_intercept: bool,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self {
            fit_intercept: true,
        }
    }
}

impl LinearRegression {
    /// Creates a new `LinearRegression` that fits an intercept.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the model fits an intercept.
    pub fn fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }
}

/// A fitted linear model, `y = x . coef + intercept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coef: Array1<f64>,
    pub intercept: f64,
}

impl Regressor for LinearRegression {
    type Model = LinearModel;

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>, _: Option<u64>) -> Result<LinearModel> {
        if x.nrows() == 0 {
            return Err(MlErr::EmptyInput { what: "feature matrix" });
        }

        if x.nrows() != y.len() {
            return Err(MlErr::SizeMismatch {
                a: "features",
                b: "targets",
                got: y.len(),
                expected: x.nrows(),
            });
        }

        let ncols = x.ncols();
        let (x_mean, y_mean) = if self.fit_intercept {
            let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(ncols));
            let y_mean = y.mean().unwrap_or_default();
            (x_mean, y_mean)
        } else {
            (Array1::zeros(ncols), 0.0)
        };

        let xc = &x - &x_mean;
        let yc = &y - y_mean;

        let gram = xc.t().dot(&xc);
        let rhs = xc.t().dot(&yc);
        let coef = linalg::solve_psd(gram.view(), rhs.view());
        let intercept = y_mean - x_mean.dot(&coef);

        Ok(LinearModel { coef, intercept })
    }
}

impl Predict for LinearModel {
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.coef.len() {
            return Err(MlErr::SizeMismatch {
                a: "features",
                b: "coefficients",
                got: x.ncols(),
                expected: self.coef.len(),
            });
        }

        Ok(x.dot(&self.coef) + self.intercept)
    }
}
