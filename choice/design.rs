//! Sparse design-matrix construction for the conditional-logit model.
//!
//! The builder expands a [`ChoiceDataset`] into four additive feature blocks:
//!
//! 1. alternative intercepts (one indicator per alternative);
//! 2. subject × alternative intercepts for repeat subjects only — a subject
//!    with a single occasion cannot identify an alternative effect of its own,
//!    so no columns are generated for it rather than fitted and dropped;
//! 3. subject-varying covariates: one pooled column plus one deviation column
//!    per repeat subject;
//! 4. alternative-varying covariates: one interaction column per alternative.
//!
//! Columns whose generating identity matches the baseline subject or baseline
//! alternative are never emitted (reference-level removal), keeping the
//! matrix full rank. Alternative membership is read from the explicit
//! alternative-id column, never inferred from row position, so occasions may
//! list alternatives in any order. Column and row ordering are fully
//! deterministic: building twice from the same inputs yields bit-identical
//! matrices.

use crate::data::ChoiceDataset;
use crate::matrix::CscMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use thiserror::Error;

/// Configuration for one design-matrix build. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignSpec {
    /// Reference-level subject: its deviation columns are dropped.
    pub baseline_subject: u64,
    /// Reference-level alternative: its intercept and interaction columns are
    /// dropped.
    pub baseline_alternative: u64,
    /// Covariates that vary by subject (pooled effect + repeat-subject
    /// deviations).
    pub subject_covariates: Vec<String>,
    /// Covariates that vary by alternative (per-alternative interactions).
    pub alternative_covariates: Vec<String>,
}

/// Errors raised while assembling the design matrix.
#[derive(Error, Debug)]
pub enum DesignError {
    #[error("The {role} covariate '{name}' is not a column of the dataset.")]
    UnknownCovariate { name: String, role: &'static str },
    #[error(
        "Occasion {occasion} lists alternative {alternative} more than once; each alternative may appear at most once per occasion."
    )]
    DuplicateAlternative { occasion: u64, alternative: u64 },
    #[error("An internal error occurred during design-matrix layout: {0}")]
    Layout(String),
}

/// Rows of a single choice occasion within the row-sorted matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct OccasionRows {
    pub id: u64,
    pub subject: u64,
    /// Contiguous row range; occasion ranges tile `0..n_rows` in order.
    pub rows: Range<usize>,
    /// Absolute row index of the chosen alternative.
    pub chosen_row: usize,
}

/// The built design matrix: named sparse feature columns plus the five
/// identifier columns, grouped by occasion. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseDesignMatrix {
    pub(crate) features: CscMatrix,
    pub(crate) column_names: Vec<String>,
    pub(crate) occasion_id: Vec<u64>,
    pub(crate) chosen: Vec<bool>,
    pub(crate) subject_id: Vec<u64>,
    pub(crate) alternative_id: Vec<u64>,
    pub(crate) available: Vec<bool>,
    pub(crate) occasions: Vec<OccasionRows>,
    /// Sorted universe of alternative ids observed in the dataset.
    pub(crate) alternatives: Vec<u64>,
}

impl SparseDesignMatrix {
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn n_occasions(&self) -> usize {
        self.occasions.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn alternatives(&self) -> &[u64] {
        &self.alternatives
    }

    pub fn occasions(&self) -> &[OccasionRows] {
        &self.occasions
    }

    pub fn features(&self) -> &CscMatrix {
        &self.features
    }

    pub fn available(&self) -> &[bool] {
        &self.available
    }

    pub fn alternative_id(&self) -> &[u64] {
        &self.alternative_id
    }

    pub fn occasion_id(&self) -> &[u64] {
        &self.occasion_id
    }

    pub fn subject_id(&self) -> &[u64] {
        &self.subject_id
    }

    pub fn chosen(&self) -> &[bool] {
        &self.chosen
    }
}

/// Builds the sparse design matrix for `dataset` under `spec`.
pub fn build_design_matrix(
    dataset: &ChoiceDataset,
    spec: &DesignSpec,
) -> Result<SparseDesignMatrix, DesignError> {
    for name in &spec.subject_covariates {
        if dataset.covariate(name).is_none() {
            return Err(DesignError::UnknownCovariate {
                name: name.clone(),
                role: "subject-varying",
            });
        }
    }
    for name in &spec.alternative_covariates {
        if dataset.covariate(name).is_none() {
            return Err(DesignError::UnknownCovariate {
                name: name.clone(),
                role: "alternative-varying",
            });
        }
    }

    // Stable row order: by occasion id, then alternative id. Occasions become
    // contiguous row ranges, which the likelihood engine relies on.
    let n = dataset.n_rows();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&row| (dataset.occasion_id()[row], dataset.alternative_id()[row]));

    let occasion_id: Vec<u64> = order.iter().map(|&r| dataset.occasion_id()[r]).collect();
    let chosen: Vec<bool> = order.iter().map(|&r| dataset.chosen()[r]).collect();
    let subject_id: Vec<u64> = order.iter().map(|&r| dataset.subject_id()[r]).collect();
    let alternative_id: Vec<u64> = order
        .iter()
        .map(|&r| dataset.alternative_id()[r])
        .collect();
    let available: Vec<bool> = order.iter().map(|&r| dataset.available()[r]).collect();

    // Group rows into occasions and reject duplicate alternatives.
    let mut occasions: Vec<OccasionRows> = Vec::new();
    let mut start = 0;
    while start < n {
        let id = occasion_id[start];
        let mut end = start + 1;
        while end < n && occasion_id[end] == id {
            if alternative_id[end] == alternative_id[end - 1] {
                return Err(DesignError::DuplicateAlternative {
                    occasion: id,
                    alternative: alternative_id[end],
                });
            }
            end += 1;
        }
        let chosen_row = (start..end).find(|&r| chosen[r]).ok_or_else(|| {
            DesignError::Layout(format!("occasion {id} lost its chosen row during sorting"))
        })?;
        occasions.push(OccasionRows {
            id,
            subject: subject_id[start],
            rows: start..end,
            chosen_row,
        });
        start = end;
    }

    // Alternative universe and repeat subjects, both in sorted order.
    let mut alternatives: Vec<u64> = alternative_id.clone();
    alternatives.sort_unstable();
    alternatives.dedup();
    if !alternatives.contains(&spec.baseline_alternative) {
        log::warn!(
            "Baseline alternative {} does not occur in the data; no alternative column will be dropped.",
            spec.baseline_alternative
        );
    }

    let mut occasions_per_subject: HashMap<u64, usize> = HashMap::new();
    for occasion in &occasions {
        *occasions_per_subject.entry(occasion.subject).or_insert(0) += 1;
    }
    let mut repeat_subjects: Vec<u64> = occasions_per_subject
        .iter()
        .filter(|(_, &count)| count > 1)
        .map(|(&subject, _)| subject)
        .collect();
    repeat_subjects.sort_unstable();

    // Row lookup tables for sparse column assembly, in ascending row order.
    let mut rows_by_alternative: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut rows_by_subject: HashMap<u64, Vec<usize>> = HashMap::new();
    for row in 0..n {
        rows_by_alternative
            .entry(alternative_id[row])
            .or_default()
            .push(row);
        rows_by_subject.entry(subject_id[row]).or_default().push(row);
    }

    let non_baseline_alts: Vec<u64> = alternatives
        .iter()
        .copied()
        .filter(|&a| a != spec.baseline_alternative)
        .collect();
    let non_baseline_repeats: Vec<u64> = repeat_subjects
        .iter()
        .copied()
        .filter(|&s| s != spec.baseline_subject)
        .collect();

    let mut column_names: Vec<String> = Vec::new();
    let mut columns: Vec<Vec<(usize, f64)>> = Vec::new();

    // Block 1: alternative intercepts.
    for &alt in &non_baseline_alts {
        column_names.push(format!("alt[{alt}]"));
        columns.push(
            rows_by_alternative[&alt]
                .iter()
                .map(|&row| (row, 1.0))
                .collect(),
        );
    }

    // Block 2: subject x alternative intercepts, repeat subjects only.
    for &subject in &non_baseline_repeats {
        for &alt in &non_baseline_alts {
            column_names.push(format!("subj[{subject}]:alt[{alt}]"));
            columns.push(
                rows_by_subject[&subject]
                    .iter()
                    .filter(|&&row| alternative_id[row] == alt)
                    .map(|&row| (row, 1.0))
                    .collect(),
            );
        }
    }

    // Block 3: subject-varying covariates, pooled + repeat-subject deviations.
    for name in &spec.subject_covariates {
        let source = dataset
            .covariate(name)
            .ok_or_else(|| DesignError::Layout(format!("covariate '{name}' vanished")))?;
        let values: Vec<f64> = order.iter().map(|&r| source[r]).collect();
        column_names.push(name.clone());
        columns.push(nonzero_entries(values.iter().copied().enumerate()));
        for &subject in &non_baseline_repeats {
            column_names.push(format!("{name}:subj[{subject}]"));
            columns.push(nonzero_entries(
                rows_by_subject[&subject].iter().map(|&row| (row, values[row])),
            ));
        }
    }

    // Block 4: alternative-varying covariates, one interaction per alternative.
    for name in &spec.alternative_covariates {
        let source = dataset
            .covariate(name)
            .ok_or_else(|| DesignError::Layout(format!("covariate '{name}' vanished")))?;
        let values: Vec<f64> = order.iter().map(|&r| source[r]).collect();
        for &alt in &non_baseline_alts {
            column_names.push(format!("{name}:alt[{alt}]"));
            columns.push(nonzero_entries(
                rows_by_alternative[&alt].iter().map(|&row| (row, values[row])),
            ));
        }
    }

    let features = CscMatrix::from_columns(n, columns);
    log::info!(
        "Design matrix built: {} rows, {} occasions, {} feature columns, density {:.4}.",
        n,
        occasions.len(),
        features.ncols(),
        features.density()
    );

    Ok(SparseDesignMatrix {
        features,
        column_names,
        occasion_id,
        chosen,
        subject_id,
        alternative_id,
        available,
        occasions,
        alternatives,
    })
}

/// Structural zeros carry no information, so covariate columns store only
/// nonzero cells.
fn nonzero_entries(pairs: impl Iterator<Item = (usize, f64)>) -> Vec<(usize, f64)> {
    pairs.filter(|&(_, value)| value != 0.0).collect()
}
