//! Small dense linear algebra helpers.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

const PIVOT_TOL: f64 = 1e-10;

/// Solves `a * w = b` for a symmetric positive semi-definite `a`.
///
/// Gauss-Jordan elimination with partial pivoting. A column whose best pivot falls below a
/// tolerance relative to the largest diagonal entry has no support in the data and its
/// coefficient is left at zero, so rank deficient systems still get a finite solution.
///
/// # Arguments
/// * `a` - A square matrix.
/// * `b` - The right hand side, one entry per row of `a`.
pub fn solve_psd(a: ArrayView2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());
    debug_assert_eq!(n, b.len());

    let mut m = a.to_owned();
    let mut rhs = b.to_owned();

    let scale = a.diag().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tol = scale * PIVOT_TOL;

    let mut pivots = Vec::with_capacity(n);
    let mut row = 0;

    for col in 0..n {
        if row == n {
            break;
        }

        let mut best = row;
        for r in row + 1..n {
            if m[[r, col]].abs() > m[[best, col]].abs() {
                best = r;
            }
        }

        if m[[best, col]].abs() <= tol {
            continue;
        }

        if best != row {
            for c in 0..n {
                m.swap([best, c], [row, c]);
            }
            rhs.swap(best, row);
        }

        let p = m[[row, col]];
        for c in col..n {
            m[[row, c]] /= p;
        }
        rhs[row] /= p;

        for r in 0..n {
            if r == row {
                continue;
            }

            let f = m[[r, col]];
            if f == 0.0 {
                continue;
            }

            for c in col..n {
                let v = m[[row, c]];
                m[[r, c]] -= f * v;
            }
            let v = rhs[row];
            rhs[r] -= f * v;
        }

        pivots.push((row, col));
        row += 1;
    }

    let mut w = Array1::zeros(n);
    for (r, c) in pivots {
        w[c] = rhs[r];
    }

    w
}

/// The euclidean distance between `a` and `b`.
pub fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    squared_euclidean(a, b).sqrt()
}

/// The squared euclidean distance between `a` and `b`.
pub fn squared_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// The mean of every column of `x`, `None` if `x` has no rows.
pub fn column_means(x: ArrayView2<f64>) -> Option<Array1<f64>> {
    x.mean_axis(Axis(0))
}
