//! Hit-rate metrics for fitted scores and a frequency-based baseline.
//!
//! Ranking is by linear predictor, descending, restricted to each occasion's
//! available rows. The chosen alternative's rank counts only strictly higher
//! scores, so exact ties do not push it down.

use crate::design::SparseDesignMatrix;
use crate::likelihood::LikelihoodError;
use ndarray::Array1;
use std::collections::HashMap;

/// Fraction of occasions where the chosen alternative has the highest
/// predicted score among the available ones.
pub fn top_one_accuracy(
    matrix: &SparseDesignMatrix,
    theta: &Array1<f64>,
) -> Result<f64, LikelihoodError> {
    top_k_accuracy(matrix, theta, 1)
}

/// Fraction of occasions where the chosen alternative's rank by predicted
/// score is at most `k`.
pub fn top_k_accuracy(
    matrix: &SparseDesignMatrix,
    theta: &Array1<f64>,
    k: usize,
) -> Result<f64, LikelihoodError> {
    if theta.len() != matrix.n_features() {
        return Err(LikelihoodError::DimensionMismatch {
            expected: matrix.n_features(),
            found: theta.len(),
        });
    }
    let v = matrix.features().matrix_vector_multiply(theta);
    let available = matrix.available();
    let mut hits = 0usize;
    for occasion in matrix.occasions() {
        let chosen_v = v[occasion.chosen_row];
        let rank = 1 + occasion
            .rows
            .clone()
            .filter(|&row| available[row] && v[row] > chosen_v)
            .count();
        if rank <= k {
            hits += 1;
        }
    }
    Ok(hits as f64 / matrix.n_occasions() as f64)
}

/// Naive baseline curve: alternatives ranked by how often they are chosen
/// overall (covariates ignored), and entry `k - 1` is the fraction of
/// occasions whose chosen alternative falls in the top `k` of that ranking.
/// The final entry is always 1.0.
pub fn frequency_baseline(matrix: &SparseDesignMatrix) -> Vec<f64> {
    let mut chosen_counts: HashMap<u64, usize> = matrix
        .alternatives()
        .iter()
        .map(|&alt| (alt, 0))
        .collect();
    for occasion in matrix.occasions() {
        let alt = matrix.alternative_id()[occasion.chosen_row];
        *chosen_counts.entry(alt).or_insert(0) += 1;
    }

    // Descending by frequency, ascending id as the deterministic tie-break.
    let mut ranked: Vec<(u64, usize)> = chosen_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let n_occasions = matrix.n_occasions() as f64;
    let mut covered = 0usize;
    ranked
        .iter()
        .map(|&(_, count)| {
            covered += count;
            covered as f64 / n_occasions
        })
        .collect()
}
