//! Conditional-logit log-likelihood and analytic gradient.
//!
//! For linear predictors `v = X · theta`, each occasion contributes the
//! chosen row's `v` minus the log of its partition value (the sum of
//! `exp(v)` over the occasion's available rows). The reported log-likelihood
//! is the mean of those contributions minus `ridge · θ·θ`; its gradient is
//! the mean of (chosen feature vector − probability-weighted average feature
//! vector) minus `2 · ridge · θ`, which vanishes exactly at the maximum-
//! likelihood point.
//!
//! Exponentiation is stabilized by subtracting the per-occasion maximum
//! predictor first; this changes no mathematical result, only overflow
//! behavior. Per-occasion terms are independent and evaluated in parallel;
//! only the final order-independent reduction joins them.

use crate::design::{OccasionRows, SparseDesignMatrix};
use ndarray::Array1;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LikelihoodError {
    #[error(
        "Parameter vector has {found} entries, but the design matrix has {expected} feature columns."
    )]
    DimensionMismatch { expected: usize, found: usize },
    #[error(
        "Occasion {occasion} has no available alternatives; its partition value is undefined. This indicates an upstream data defect."
    )]
    EmptyChoiceSet { occasion: u64 },
    #[error("The occasion selection is empty; nothing to evaluate.")]
    EmptySelection,
}

/// Evaluates the mean log-likelihood and gradient over every occasion.
pub fn evaluate(
    matrix: &SparseDesignMatrix,
    theta: &Array1<f64>,
    ridge: f64,
) -> Result<(f64, Array1<f64>), LikelihoodError> {
    evaluate_occasions(matrix, theta, ridge, None)
}

/// Evaluates the mean log-likelihood and gradient restricted to the
/// occasions named by `selection` (indices into `matrix.occasions()`), or to
/// every occasion when `selection` is `None`. Used for mini-batch gradients.
pub fn evaluate_occasions(
    matrix: &SparseDesignMatrix,
    theta: &Array1<f64>,
    ridge: f64,
    selection: Option<&[usize]>,
) -> Result<(f64, Array1<f64>), LikelihoodError> {
    if theta.len() != matrix.n_features() {
        return Err(LikelihoodError::DimensionMismatch {
            expected: matrix.n_features(),
            found: theta.len(),
        });
    }

    let n_occasions = matrix.n_occasions();
    let active: Vec<bool> = match selection {
        None => vec![true; n_occasions],
        Some(indices) => {
            let mut active = vec![false; n_occasions];
            for &index in indices {
                active[index] = true;
            }
            active
        }
    };
    let n_active = active.iter().filter(|&&a| a).count();
    if n_active == 0 {
        return Err(LikelihoodError::EmptySelection);
    }

    let v = matrix.features().matrix_vector_multiply(theta);

    // Per-row weights (chosen indicator minus choice probability). Occasion
    // ranges tile the row space, so the weight vector splits into disjoint
    // mutable slices that parallel workers fill independently.
    let mut w = vec![0.0f64; matrix.n_rows()];
    let mut jobs: Vec<(&OccasionRows, &mut [f64], bool)> = Vec::with_capacity(n_occasions);
    let mut rest = w.as_mut_slice();
    for (index, occasion) in matrix.occasions().iter().enumerate() {
        let (head, tail) = rest.split_at_mut(occasion.rows.len());
        rest = tail;
        jobs.push((occasion, head, active[index]));
    }

    let available = matrix.available();
    let ll_sum = jobs
        .into_par_iter()
        .map(|(occasion, w_local, is_active)| {
            if !is_active {
                return Ok(0.0);
            }
            occasion_term(occasion, available, &v, w_local)
        })
        .try_reduce(|| 0.0, |a, b| Ok(a + b))?;

    let scale = 1.0 / n_active as f64;
    let mut gradient = matrix.features().transpose_vector_multiply(&w);
    gradient.mapv_inplace(|g| g * scale);
    let mut log_likelihood = ll_sum * scale;
    if ridge != 0.0 {
        log_likelihood -= ridge * theta.dot(theta);
        gradient.scaled_add(-2.0 * ridge, theta);
    }
    Ok((log_likelihood, gradient))
}

/// One occasion's log-likelihood term; fills `w_local` with the row weights
/// (chosen indicator minus softmax probability, zero on unavailable rows).
fn occasion_term(
    occasion: &OccasionRows,
    available: &[bool],
    v: &Array1<f64>,
    w_local: &mut [f64],
) -> Result<f64, LikelihoodError> {
    let base = occasion.rows.start;

    let mut v_max = f64::NEG_INFINITY;
    for row in occasion.rows.clone() {
        if available[row] && v[row] > v_max {
            v_max = v[row];
        }
    }
    if v_max == f64::NEG_INFINITY {
        return Err(LikelihoodError::EmptyChoiceSet {
            occasion: occasion.id,
        });
    }

    let mut partition = 0.0;
    for row in occasion.rows.clone() {
        if available[row] {
            let e = (v[row] - v_max).exp();
            partition += e;
            w_local[row - base] = e;
        }
    }
    for row in occasion.rows.clone() {
        if available[row] {
            w_local[row - base] = -w_local[row - base] / partition;
        }
    }
    // The chosen row is available by the dataset invariant.
    w_local[occasion.chosen_row - base] += 1.0;

    Ok(v[occasion.chosen_row] - (v_max + partition.ln()))
}
