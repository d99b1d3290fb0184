//! Choice data loading and validation.
//!
//! This module is the exclusive entry point for user-provided data. A
//! [`ChoiceDataset`] holds one record per (occasion, alternative) pair and is
//! only constructible through validating constructors, so every downstream
//! consumer can rely on its invariants:
//!
//! - all columns have the same length and the table is non-empty;
//! - within an occasion exactly one row is marked chosen, and that row is
//!   marked available;
//! - an occasion belongs to exactly one subject;
//! - covariate values are finite.
//!
//! Failures are assumed to be user-input errors, so [`DataError`] messages
//! name the offending column or occasion.

use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Validated tabular input for the design-matrix builder.
#[derive(Debug, Clone)]
pub struct ChoiceDataset {
    occasion_id: Vec<u64>,
    chosen: Vec<bool>,
    subject_id: Vec<u64>,
    alternative_id: Vec<u64>,
    available: Vec<bool>,
    covariates: HashMap<String, Vec<f64>>,
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This engine requires complete data."
    )]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the covariate column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error("The dataset contains no rows.")]
    EmptyDataset,
    #[error("Column '{column}' has {found} rows, but the occasion id column has {expected}.")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error(
        "Occasion {occasion} has {found} rows marked chosen; exactly one is required per occasion."
    )]
    ChosenCountInvalid { occasion: u64, found: usize },
    #[error("The chosen row of occasion {occasion} is marked unavailable.")]
    ChosenUnavailable { occasion: u64 },
    #[error("Occasion {occasion} spans more than one subject (saw {first} and {second}).")]
    OccasionSpansSubjects {
        occasion: u64,
        first: u64,
        second: u64,
    },
}

impl ChoiceDataset {
    /// Builds a dataset from in-memory columns, validating every invariant.
    pub fn from_columns(
        occasion_id: Vec<u64>,
        chosen: Vec<bool>,
        subject_id: Vec<u64>,
        alternative_id: Vec<u64>,
        available: Vec<bool>,
        covariates: HashMap<String, Vec<f64>>,
    ) -> Result<Self, DataError> {
        let dataset = Self {
            occasion_id,
            chosen,
            subject_id,
            alternative_id,
            available,
            covariates,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    fn validate(&self) -> Result<(), DataError> {
        let n = self.occasion_id.len();
        if n == 0 {
            return Err(DataError::EmptyDataset);
        }
        let lengths = [
            ("chosen", self.chosen.len()),
            ("subject_id", self.subject_id.len()),
            ("alternative_id", self.alternative_id.len()),
            ("available", self.available.len()),
        ];
        for (column, found) in lengths {
            if found != n {
                return Err(DataError::LengthMismatch {
                    column: column.to_string(),
                    expected: n,
                    found,
                });
            }
        }
        for (name, values) in &self.covariates {
            if values.len() != n {
                return Err(DataError::LengthMismatch {
                    column: name.clone(),
                    expected: n,
                    found: values.len(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(name.clone()));
            }
        }

        // Per-occasion bookkeeping: chosen count, subject consistency, and
        // the chosen-implies-available invariant.
        let mut chosen_count: HashMap<u64, usize> = HashMap::new();
        let mut occasion_subject: HashMap<u64, u64> = HashMap::new();
        for row in 0..n {
            let occasion = self.occasion_id[row];
            let subject = self.subject_id[row];
            match occasion_subject.get(&occasion) {
                None => {
                    occasion_subject.insert(occasion, subject);
                }
                Some(&first) if first != subject => {
                    return Err(DataError::OccasionSpansSubjects {
                        occasion,
                        first,
                        second: subject,
                    });
                }
                Some(_) => {}
            }
            if self.chosen[row] {
                *chosen_count.entry(occasion).or_insert(0) += 1;
                if !self.available[row] {
                    return Err(DataError::ChosenUnavailable { occasion });
                }
            }
        }
        for (&occasion, _) in &occasion_subject {
            let found = chosen_count.get(&occasion).copied().unwrap_or(0);
            if found != 1 {
                return Err(DataError::ChosenCountInvalid { occasion, found });
            }
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.occasion_id.len()
    }

    pub fn occasion_id(&self) -> &[u64] {
        &self.occasion_id
    }

    pub fn chosen(&self) -> &[bool] {
        &self.chosen
    }

    pub fn subject_id(&self) -> &[u64] {
        &self.subject_id
    }

    pub fn alternative_id(&self) -> &[u64] {
        &self.alternative_id
    }

    pub fn available(&self) -> &[bool] {
        &self.available
    }

    pub fn covariate(&self, name: &str) -> Option<&[f64]> {
        self.covariates.get(name).map(Vec::as_slice)
    }
}

/// Loads a tab-separated table into a validated [`ChoiceDataset`].
///
/// Required columns: `occasion_id`, `chosen`, `subject_id`, `alternative_id`,
/// `available` (ids as unsigned integers, flags as 0/1). Every name in
/// `covariate_names` must be present as a numeric column.
pub fn load_choice_data(path: &str, covariate_names: &[&str]) -> Result<ChoiceDataset, DataError> {
    const REQUIRED: [&str; 5] = [
        "occasion_id",
        "chosen",
        "subject_id",
        "alternative_id",
        "available",
    ];

    log::info!("Loading choice data from '{path}'");
    let df = CsvReader::new(File::open(Path::new(path))?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let column_names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for required in REQUIRED.iter().chain(covariate_names.iter()) {
        if !column_names.iter().any(|c| c == required) {
            return Err(DataError::ColumnNotFound(required.to_string()));
        }
    }

    let occasion_id = extract_id_column(&df, "occasion_id")?;
    let chosen = extract_flag_column(&df, "chosen")?;
    let subject_id = extract_id_column(&df, "subject_id")?;
    let alternative_id = extract_id_column(&df, "alternative_id")?;
    let available = extract_flag_column(&df, "available")?;

    let mut covariates = HashMap::new();
    for name in covariate_names {
        covariates.insert(name.to_string(), extract_numeric_column(&df, name)?);
    }

    log::info!(
        "Loaded {} rows across {} columns; validating.",
        df.height(),
        REQUIRED.len() + covariate_names.len()
    );
    ChoiceDataset::from_columns(
        occasion_id,
        chosen,
        subject_id,
        alternative_id,
        available,
        covariates,
    )
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let casted = match series.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        });
    }
    let chunked = casted.f64()?.rechunk();
    Ok(chunked.into_no_null_iter().collect())
}

fn extract_id_column(df: &DataFrame, column_name: &str) -> Result<Vec<u64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let casted = match series.cast(&DataType::UInt64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "u64 (unsigned id)",
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "u64 (unsigned id)",
            found_type: format!("{:?}", series.dtype()),
        });
    }
    let chunked = casted.u64()?.rechunk();
    Ok(chunked.into_no_null_iter().collect())
}

fn extract_flag_column(df: &DataFrame, column_name: &str) -> Result<Vec<bool>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let casted = match series.cast(&DataType::Int64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "boolean flag (0/1)",
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "boolean flag (0/1)",
            found_type: format!("{:?}", series.dtype()),
        });
    }
    let chunked = casted.i64()?.rechunk();
    Ok(chunked.into_no_null_iter().map(|v| v != 0).collect())
}
