//! Adaptive stochastic-gradient fitting of the conditional-logit model.
//!
//! The scheme is a per-parameter adaptive ascent driven by gradient-sign
//! oscillation rather than magnitude accumulation:
//!
//! - two warm-up iterations apply full-matrix gradient steps of
//!   `lr / age` with age = 1, then 2;
//! - each epoch draws a fresh partition of the occasion ids into
//!   `fold_count` near-equal folds and applies one mini-batch gradient step
//!   per fold, stepping each component by `lr / (2 + sign_flips[i])`, where
//!   the counter increments whenever that component's gradient changed sign
//!   since the previous update. Step sizes therefore shrink monotonically,
//!   and fastest for components that keep oscillating.
//!
//! A true log-likelihood of a probability model is never positive, so a
//! positive full-matrix value after an epoch signals numerical failure; the
//! fit stops in the `Diverged` state carrying the offending value so the
//! caller can diagnose partial progress instead of losing it. Hitting the
//! epoch cap is likewise a terminal state, not an error, and returns the
//! best parameters seen at any epoch boundary.
//!
//! Mini-batch updates are strictly sequential: every update depends on the
//! parameter vector produced by the one before it. Parallelism lives inside
//! each gradient evaluation only.

use crate::design::SparseDesignMatrix;
use crate::likelihood::{self, LikelihoodError};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitError {
    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),
    #[error("Invalid optimizer configuration: {0}")]
    InvalidConfig(String),
}

/// Which gradient the stopping rule inspects after each epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConvergenceScope {
    /// The last processed mini-batch's gradient; cheap but noisy.
    #[default]
    LastBatch,
    /// The full-matrix gradient.
    FullBatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub base_learning_rate: f64,
    /// Number of mini-batch folds drawn per epoch.
    pub fold_count: usize,
    /// L2 penalty weight passed through to the likelihood engine.
    pub ridge: f64,
    /// Stop once the inspected max-|gradient| falls below this value.
    pub tolerance: f64,
    /// Hard cap on epochs; guarantees termination.
    pub max_epochs: usize,
    pub convergence_scope: ConvergenceScope,
    /// Seed for the per-epoch fold partitions; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            base_learning_rate: 0.1,
            fold_count: 10,
            ridge: 0.0,
            tolerance: 1e-4,
            max_epochs: 500,
            convergence_scope: ConvergenceScope::default(),
            seed: None,
        }
    }
}

/// Terminal state of one fit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    Converged,
    /// The epoch cap was reached; the result carries the best parameters
    /// seen at any epoch boundary.
    MaxEpochsReached,
    /// The full-matrix log-likelihood went positive, which only a numerical
    /// failure can produce.
    Diverged,
    Cancelled,
}

/// A fitted parameter vector with its diagnostics. Frozen once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Feature-column names, aligned with `theta`.
    pub names: Vec<String>,
    pub theta: Array1<f64>,
    /// Per-parameter count of gradient-sign changes across updates.
    /// Components that never stopped oscillating indicate instability.
    pub sign_flips: Vec<u32>,
    /// Full-matrix log-likelihood at `theta`.
    pub log_likelihood: f64,
    /// Full-matrix max-|gradient| at `theta`.
    pub max_gradient: f64,
    pub status: FitStatus,
    pub epochs: usize,
}

impl FitResult {
    /// Looks up a fitted parameter by feature-column name.
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.theta[i])
    }
}

/// Per-parameter adaptive state, threaded explicitly through every update
/// step and discarded after the fit.
struct OptimizerState {
    age: f64,
    sign_flips: Vec<u32>,
    prev_sign: Vec<i8>,
}

impl OptimizerState {
    fn new(n_params: usize) -> Self {
        Self {
            age: 1.0,
            sign_flips: vec![0; n_params],
            prev_sign: vec![0; n_params],
        }
    }

    /// Applies one elementwise ascent step `theta[i] += lr / (age +
    /// flips[i]) * g[i]`, counting a sign flip for every component whose
    /// gradient direction reversed since the previous update. Zero gradient
    /// components neither flip nor overwrite the recorded sign.
    fn apply_update(
        &mut self,
        theta: &mut Array1<f64>,
        gradient: &Array1<f64>,
        learning_rate: f64,
        track_flips: bool,
    ) {
        for i in 0..theta.len() {
            let g = gradient[i];
            let sign: i8 = if g > 0.0 {
                1
            } else if g < 0.0 {
                -1
            } else {
                0
            };
            if track_flips && sign != 0 && self.prev_sign[i] != 0 && sign != self.prev_sign[i] {
                self.sign_flips[i] += 1;
            }
            if sign != 0 {
                self.prev_sign[i] = sign;
            }
            theta[i] += learning_rate / (self.age + self.sign_flips[i] as f64) * g;
        }
    }

    fn max_flips(&self) -> u32 {
        self.sign_flips.iter().copied().max().unwrap_or(0)
    }
}

/// Fits `theta` by adaptive stochastic gradient ascent.
pub fn fit(
    matrix: &SparseDesignMatrix,
    theta0: Array1<f64>,
    config: &OptimizerConfig,
) -> Result<FitResult, FitError> {
    let cancel = AtomicBool::new(false);
    fit_with_cancel(matrix, theta0, config, &cancel)
}

/// Like [`fit`], with a cooperative cancellation flag checked at the top of
/// each epoch. A cancelled fit returns its current parameters under the
/// `Cancelled` status.
pub fn fit_with_cancel(
    matrix: &SparseDesignMatrix,
    theta0: Array1<f64>,
    config: &OptimizerConfig,
    cancel: &AtomicBool,
) -> Result<FitResult, FitError> {
    validate_config(config)?;
    let lr = config.base_learning_rate;
    let ridge = config.ridge;
    let mut theta = theta0;
    let mut state = OptimizerState::new(matrix.n_features());
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    log::info!(
        "Starting adaptive fit: {} occasions, {} parameters, {} folds per epoch.",
        matrix.n_occasions(),
        matrix.n_features(),
        config.fold_count
    );

    // Warm-up: two full-matrix gradient steps with ages 1 and 2.
    for age in 1..=2 {
        state.age = age as f64;
        let (_, gradient) = likelihood::evaluate(matrix, &theta, ridge)?;
        state.apply_update(&mut theta, &gradient, lr, false);
    }
    // The age freezes at 2 from here on; only sign-flip counters grow.
    state.age = 2.0;

    let (mut best_ll, _) = likelihood::evaluate(matrix, &theta, ridge)?;
    let mut best_theta = theta.clone();
    let mut occasion_indices: Vec<usize> = (0..matrix.n_occasions()).collect();
    let mut status = FitStatus::MaxEpochsReached;
    let mut epochs_run = 0;

    for epoch in 1..=config.max_epochs {
        if cancel.load(Ordering::Relaxed) {
            log::warn!("Fit cancelled at the start of epoch {epoch}.");
            status = FitStatus::Cancelled;
            best_theta = theta.clone();
            break;
        }
        epochs_run = epoch;

        // A fresh without-replacement partition of the occasions per epoch,
        // cycling through every fold in turn.
        occasion_indices.shuffle(&mut rng);
        let mut last_batch_max_gradient = f64::INFINITY;
        for fold in partition_folds(&occasion_indices, config.fold_count) {
            let (_, gradient) =
                likelihood::evaluate_occasions(matrix, &theta, ridge, Some(fold))?;
            state.apply_update(&mut theta, &gradient, lr, true);
            last_batch_max_gradient = max_abs(&gradient);
        }

        let (ll_full, gradient_full) = likelihood::evaluate(matrix, &theta, ridge)?;
        if ll_full > 0.0 {
            log::warn!(
                "Log-likelihood became positive ({ll_full:.6e}) after epoch {epoch}; stopping as diverged."
            );
            status = FitStatus::Diverged;
            let max_gradient = max_abs(&gradient_full);
            return Ok(finish(
                matrix, theta, state, ll_full, max_gradient, status, epochs_run,
            ));
        }
        if ll_full > best_ll {
            best_ll = ll_full;
            best_theta = theta.clone();
        }

        let stopping_gradient = match config.convergence_scope {
            ConvergenceScope::LastBatch => last_batch_max_gradient,
            ConvergenceScope::FullBatch => max_abs(&gradient_full),
        };
        log::debug!(
            "Epoch {epoch}: log-likelihood {ll_full:.6}, stopping gradient {stopping_gradient:.3e}, max sign flips {}.",
            state.max_flips()
        );
        if stopping_gradient < config.tolerance {
            status = FitStatus::Converged;
            best_theta = theta.clone();
            break;
        }
    }

    if status == FitStatus::MaxEpochsReached {
        log::warn!(
            "Epoch cap of {} reached without convergence; returning the best parameters seen.",
            config.max_epochs
        );
    }
    let (ll, gradient) = likelihood::evaluate(matrix, &best_theta, ridge)?;
    let max_gradient = max_abs(&gradient);
    Ok(finish(
        matrix,
        best_theta,
        state,
        ll,
        max_gradient,
        status,
        epochs_run,
    ))
}

fn finish(
    matrix: &SparseDesignMatrix,
    theta: Array1<f64>,
    state: OptimizerState,
    log_likelihood: f64,
    max_gradient: f64,
    status: FitStatus,
    epochs: usize,
) -> FitResult {
    FitResult {
        names: matrix.column_names().to_vec(),
        theta,
        sign_flips: state.sign_flips,
        log_likelihood,
        max_gradient,
        status,
        epochs,
    }
}

fn validate_config(config: &OptimizerConfig) -> Result<(), FitError> {
    if config.base_learning_rate <= 0.0 || !config.base_learning_rate.is_finite() {
        return Err(FitError::InvalidConfig(format!(
            "base_learning_rate must be positive and finite, got {}",
            config.base_learning_rate
        )));
    }
    if config.fold_count == 0 {
        return Err(FitError::InvalidConfig(
            "fold_count must be at least 1".to_string(),
        ));
    }
    if config.tolerance < 0.0 || !config.tolerance.is_finite() {
        return Err(FitError::InvalidConfig(format!(
            "tolerance must be non-negative and finite, got {}",
            config.tolerance
        )));
    }
    if config.max_epochs == 0 {
        return Err(FitError::InvalidConfig(
            "max_epochs must be at least 1".to_string(),
        ));
    }
    if config.ridge < 0.0 {
        return Err(FitError::InvalidConfig(format!(
            "ridge must be non-negative, got {}",
            config.ridge
        )));
    }
    Ok(())
}

/// Splits the (already shuffled) occasion indices into `fold_count`
/// near-equal contiguous folds, dropping empty ones when there are fewer
/// occasions than folds.
fn partition_folds(indices: &[usize], fold_count: usize) -> Vec<&[usize]> {
    let n = indices.len();
    let folds = fold_count.min(n);
    let base = n / folds;
    let remainder = n % folds;
    let mut out = Vec::with_capacity(folds);
    let mut start = 0;
    for fold in 0..folds {
        let size = base + usize::from(fold < remainder);
        out.push(&indices[start..start + size]);
        start += size;
    }
    out
}

fn max_abs(values: &Array1<f64>) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}
