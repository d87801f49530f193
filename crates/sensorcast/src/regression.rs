//! Polynomial regression over calendar features.
//!
//! Every fit starts from scratch: inputs are standardized per dimension,
//! expanded into all monomials up to the requested total degree, and solved
//! as a minimum-norm least-squares problem. Nothing is carried between fits,
//! so identical input always yields an identical model.
//!
//! Input dimensions that are constant across the samples carry no signal and
//! are left out of the expansion. The remaining monomial count is the
//! *effective* basis dimension, and a fit needs at least that many samples.

use serde::{Deserialize, Serialize};

use crate::features::{FeatureVector, FEATURE_DIM};
use crate::types::{ForecastError, ForecastResult};

/// Polynomial degree used by the pipeline.
pub const DEFAULT_DEGREE: usize = 3;

/// Highest degree [`fit`] accepts.
pub const MAX_DEGREE: usize = 8;

/// Relative eigenvalue cutoff for the pseudo-inverse.
const EIGEN_CUTOFF: f64 = 1e-10;

/// Upper bound on Jacobi sweeps; convergence is quadratic, this is never hit in practice.
const MAX_JACOBI_SWEEPS: usize = 100;

/// Monomial exponents over the feature inputs, bias first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialBasis {
    degree: usize,
    terms: Vec<[u8; FEATURE_DIM]>,
}

impl PolynomialBasis {
    /// All monomials of total degree ≤ `degree` over every input.
    pub fn new(degree: usize) -> Self {
        Self::over_inputs(degree, &[true; FEATURE_DIM])
    }

    /// Monomials restricted to the inputs flagged `active`.
    ///
    /// Ordered by total degree, then lexicographically by input index.
    pub fn over_inputs(degree: usize, active: &[bool; FEATURE_DIM]) -> Self {
        let inputs: Vec<usize> = (0..FEATURE_DIM).filter(|&i| active[i]).collect();
        let mut terms = Vec::new();
        for d in 0..=degree {
            push_combinations(&inputs, d, 0, &mut [0u8; FEATURE_DIM], &mut terms);
        }
        Self { degree, terms }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of terms, bias included.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Evaluate every term at `z`.
    pub fn expand(&self, z: &[f64; FEATURE_DIM]) -> Vec<f64> {
        self.terms
            .iter()
            .map(|exps| {
                exps.iter()
                    .zip(z.iter())
                    .map(|(&e, &x)| x.powi(e as i32))
                    .product()
            })
            .collect()
    }
}

fn push_combinations(
    inputs: &[usize],
    remaining: usize,
    start: usize,
    current: &mut [u8; FEATURE_DIM],
    out: &mut Vec<[u8; FEATURE_DIM]>,
) {
    if remaining == 0 {
        out.push(*current);
        return;
    }
    for idx in start..inputs.len() {
        current[inputs[idx]] += 1;
        push_combinations(inputs, remaining - 1, idx, current, out);
        current[inputs[idx]] -= 1;
    }
}

/// Number of monomials of total degree ≤ `degree` over `inputs` variables.
///
/// `None` when the count does not fit in `usize`.
pub fn basis_size(inputs: usize, degree: usize) -> Option<usize> {
    // C(inputs + degree, degree), computed incrementally to stay exact.
    (1..=degree).try_fold(1usize, |acc, k| {
        Some(acc.checked_mul(inputs.checked_add(k)?)? / k)
    })
}

/// Per-input standardization fitted on the training samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Scaler {
    mean: [f64; FEATURE_DIM],
    scale: [f64; FEATURE_DIM],
}

impl Scaler {
    fn fit(rows: &[[f64; FEATURE_DIM]]) -> (Self, [bool; FEATURE_DIM]) {
        let n = rows.len() as f64;
        let mut mean = [0.0; FEATURE_DIM];
        let mut scale = [1.0; FEATURE_DIM];
        let mut varying = [false; FEATURE_DIM];

        for dim in 0..FEATURE_DIM {
            let first = rows[0][dim];
            varying[dim] = rows.iter().any(|r| r[dim] != first);
            mean[dim] = rows.iter().map(|r| r[dim]).sum::<f64>() / n;
            let var = rows.iter().map(|r| (r[dim] - mean[dim]).powi(2)).sum::<f64>() / n;
            if varying[dim] && var > 0.0 {
                scale[dim] = var.sqrt();
            }
        }

        (Self { mean, scale }, varying)
    }

    fn transform(&self, x: &[f64; FEATURE_DIM]) -> [f64; FEATURE_DIM] {
        let mut z = [0.0; FEATURE_DIM];
        for dim in 0..FEATURE_DIM {
            z[dim] = (x[dim] - self.mean[dim]) / self.scale[dim];
        }
        z
    }
}

/// A fitted polynomial regression and its feature transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialModel {
    basis: PolynomialBasis,
    scaler: Scaler,
    intercept: f64,
    /// One coefficient per non-bias term of `basis`.
    coefficients: Vec<f64>,
    n_samples: usize,
    r_squared: f64,
}

impl PolynomialModel {
    /// Predict a single scalar for one feature vector.
    pub fn predict_one(&self, features: &FeatureVector) -> f64 {
        let z = self.scaler.transform(&features.as_array());
        let expanded = self.basis.expand(&z);
        self.intercept
            + expanded[1..]
                .iter()
                .zip(self.coefficients.iter())
                .map(|(x, b)| x * b)
                .sum::<f64>()
    }

    /// Predict one scalar per feature vector, in order.
    pub fn predict(&self, features: &[FeatureVector]) -> Vec<f64> {
        features.iter().map(|f| self.predict_one(f)).collect()
    }

    pub fn degree(&self) -> usize {
        self.basis.degree()
    }

    /// Effective basis dimension, bias included.
    pub fn basis_len(&self) -> usize {
        self.basis.len()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Coefficient of determination on the training samples.
    pub fn r_squared(&self) -> f64 {
        self.r_squared
    }
}

/// Fit a polynomial regression of the given degree.
///
/// Returns [`ForecastError::InsufficientSamples`] when no input varies or
/// when there are fewer samples than effective basis terms.
pub fn fit(
    features: &[FeatureVector],
    values: &[f64],
    degree: usize,
) -> ForecastResult<PolynomialModel> {
    if features.len() != values.len() {
        return Err(ForecastError::NumericalError(format!(
            "{} feature vectors for {} values",
            features.len(),
            values.len()
        )));
    }
    if degree == 0 || degree > MAX_DEGREE {
        return Err(ForecastError::NumericalError(format!(
            "polynomial degree must be between 1 and {MAX_DEGREE}, got {degree}"
        )));
    }

    let n = features.len();
    let required_for = |inputs: usize| {
        basis_size(inputs, degree).ok_or_else(|| {
            ForecastError::NumericalError(format!("basis size overflows for degree {degree}"))
        })
    };
    if n == 0 {
        return Err(ForecastError::InsufficientSamples {
            required: required_for(1)?,
            actual: 0,
        });
    }

    let rows: Vec<[f64; FEATURE_DIM]> = features.iter().map(|f| f.as_array()).collect();
    let (scaler, varying) = Scaler::fit(&rows);
    let varying_count = varying.iter().filter(|&&v| v).count();
    let required = required_for(varying_count.max(1))?;
    if varying_count == 0 || n < required {
        return Err(ForecastError::InsufficientSamples {
            required,
            actual: n,
        });
    }

    let basis = PolynomialBasis::over_inputs(degree, &varying);
    let k = basis.len() - 1;

    // Design matrix without the bias column, row-major.
    let design: Vec<Vec<f64>> = rows
        .iter()
        .map(|r| basis.expand(&scaler.transform(r)).split_off(1))
        .collect();

    let col_mean: Vec<f64> = (0..k)
        .map(|j| design.iter().map(|row| row[j]).sum::<f64>() / n as f64)
        .collect();
    let y_mean = values.iter().sum::<f64>() / n as f64;

    // Gram matrix and moment vector of the centered problem.
    let mut gram = vec![0.0; k * k];
    let mut moment = vec![0.0; k];
    for (row, &y) in design.iter().zip(values.iter()) {
        let yc = y - y_mean;
        for i in 0..k {
            let xi = row[i] - col_mean[i];
            moment[i] += xi * yc;
            for j in i..k {
                gram[i * k + j] += xi * (row[j] - col_mean[j]);
            }
        }
    }
    for i in 0..k {
        for j in 0..i {
            gram[i * k + j] = gram[j * k + i];
        }
    }

    let coefficients = min_norm_solve(gram, &moment, k);
    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(ForecastError::NumericalError(
            "non-finite regression coefficient".to_string(),
        ));
    }

    let intercept = y_mean
        - coefficients
            .iter()
            .zip(col_mean.iter())
            .map(|(b, m)| b * m)
            .sum::<f64>();

    let mut model = PolynomialModel {
        basis,
        scaler,
        intercept,
        coefficients,
        n_samples: n,
        r_squared: 0.0,
    };

    let ss_tot: f64 = values.iter().map(|y| (y - y_mean).powi(2)).sum();
    let ss_res: f64 = features
        .iter()
        .zip(values.iter())
        .map(|(f, y)| (y - model.predict_one(f)).powi(2))
        .sum();
    model.r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        1.0
    };

    tracing::trace!(
        samples = n,
        terms = model.basis_len(),
        r_squared = model.r_squared,
        "polynomial model fitted"
    );

    Ok(model)
}

/// Minimum-norm solution of `gram · x = moment` for a symmetric PSD `gram`.
fn min_norm_solve(gram: Vec<f64>, moment: &[f64], k: usize) -> Vec<f64> {
    let (eigenvalues, eigenvectors) = symmetric_eigen(gram, k);
    let max_eigen = eigenvalues.iter().cloned().fold(0.0f64, f64::max);
    let cutoff = max_eigen * EIGEN_CUTOFF;

    let mut solution = vec![0.0; k];
    if max_eigen <= 0.0 {
        return solution;
    }

    for (j, &lambda) in eigenvalues.iter().enumerate() {
        if lambda <= cutoff {
            continue;
        }
        let proj: f64 = (0..k).map(|i| eigenvectors[i * k + j] * moment[i]).sum();
        let weight = proj / lambda;
        for (i, s) in solution.iter_mut().enumerate() {
            *s += weight * eigenvectors[i * k + j];
        }
    }
    solution
}

/// Cyclic Jacobi eigendecomposition of a symmetric `k × k` matrix.
///
/// Returns eigenvalues and the eigenvector matrix (column `j` pairs with
/// eigenvalue `j`), both row-major.
fn symmetric_eigen(mut a: Vec<f64>, k: usize) -> (Vec<f64>, Vec<f64>) {
    let mut v = vec![0.0; k * k];
    for i in 0..k {
        v[i * k + i] = 1.0;
    }

    let total: f64 = a.iter().map(|x| x * x).sum();
    for _ in 0..MAX_JACOBI_SWEEPS {
        let mut off = 0.0;
        for p in 0..k {
            for q in (p + 1)..k {
                off += a[p * k + q] * a[p * k + q];
            }
        }
        if off <= total * 1e-30 {
            break;
        }

        for p in 0..k {
            for q in (p + 1)..k {
                let apq = a[p * k + q];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[q * k + q] - a[p * k + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for r in 0..k {
                    let arp = a[r * k + p];
                    let arq = a[r * k + q];
                    a[r * k + p] = c * arp - s * arq;
                    a[r * k + q] = s * arp + c * arq;
                }
                for r in 0..k {
                    let apr = a[p * k + r];
                    let aqr = a[q * k + r];
                    a[p * k + r] = c * apr - s * aqr;
                    a[q * k + r] = s * apr + c * aqr;
                }
                for r in 0..k {
                    let vrp = v[r * k + p];
                    let vrq = v[r * k + q];
                    v[r * k + p] = c * vrp - s * vrq;
                    v[r * k + q] = s * vrp + c * vrq;
                }
            }
        }
    }

    let eigenvalues = (0..k).map(|i| a[i * k + i]).collect();
    (eigenvalues, v)
}
