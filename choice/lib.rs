//! Sparse conditional-logit estimation for repeat-purchase choice data.
//!
//! The crate turns a validated table of (occasion, alternative) rows into a
//! sparse design matrix with alternative intercepts, repeat-subject effects
//! and covariate interactions, evaluates the McFadden conditional-logit
//! log-likelihood and its analytic gradient over that matrix, and fits the
//! parameters with a per-parameter adaptive stochastic-gradient scheme whose
//! step sizes decay with gradient-sign oscillation.
//!
//! Data flows one way:
//! `data::ChoiceDataset` → `design::build_design_matrix` →
//! `design::SparseDesignMatrix` → `likelihood` ⇄ `optimize::fit` →
//! `optimize::FitResult` → `evaluate`.

pub mod data;
pub mod design;
pub mod evaluate;
pub mod likelihood;
pub mod matrix;
pub mod optimize;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use data::{ChoiceDataset, DataError, load_choice_data};
pub use design::{DesignError, DesignSpec, SparseDesignMatrix, build_design_matrix};
pub use likelihood::LikelihoodError;
pub use optimize::{
    ConvergenceScope, FitError, FitResult, FitStatus, OptimizerConfig, fit, fit_with_cancel,
};
