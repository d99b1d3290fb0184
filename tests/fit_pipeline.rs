//! End-to-end pipeline: TSV → ChoiceDataset → SparseDesignMatrix → fit →
//! evaluation, exercised through the public API only.

use clogit::evaluate::{frequency_baseline, top_k_accuracy, top_one_accuracy};
use clogit::likelihood;
use clogit::{
    ChoiceDataset, DesignSpec, FitStatus, OptimizerConfig, build_design_matrix, fit,
    load_choice_data,
};
use ndarray::Array1;
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

/// Fifteen occasions over alternatives {1, 2, 3}. Subjects 1 and 2 are
/// repeat subjects (four occasions each); the rest buy once. A `price`
/// covariate makes the chosen alternative systematically cheaper, so the
/// model has real signal to pick up.
fn synthetic_dataset() -> ChoiceDataset {
    let occasion_subject: [(u64, u64); 15] = [
        (1, 1),
        (2, 1),
        (3, 1),
        (4, 1),
        (5, 2),
        (6, 2),
        (7, 2),
        (8, 2),
        (9, 3),
        (10, 4),
        (11, 5),
        (12, 6),
        (13, 7),
        (14, 8),
        (15, 9),
    ];
    let mut occasion_id = Vec::new();
    let mut chosen = Vec::new();
    let mut subject_id = Vec::new();
    let mut alternative_id = Vec::new();
    let mut available = Vec::new();
    let mut price = Vec::new();
    for (i, &(occasion, subject)) in occasion_subject.iter().enumerate() {
        // Alternative 1 dominates, with occasional switches to 2 and 3.
        let chosen_alt = match i % 5 {
            0 | 1 | 2 => 1u64,
            3 => 2,
            _ => 3,
        };
        for alt in 1..=3u64 {
            occasion_id.push(occasion);
            chosen.push(alt == chosen_alt);
            subject_id.push(subject);
            alternative_id.push(alt);
            available.push(true);
            let base = 1.0 + alt as f64 * 0.5;
            let discount = if alt == chosen_alt { 0.8 } else { 0.0 };
            price.push(base - discount + 0.05 * (i % 3) as f64);
        }
    }
    let mut covariates = HashMap::new();
    covariates.insert("price".to_string(), price);
    ChoiceDataset::from_columns(
        occasion_id,
        chosen,
        subject_id,
        alternative_id,
        available,
        covariates,
    )
    .unwrap()
}

fn spec() -> DesignSpec {
    DesignSpec {
        baseline_subject: 9,
        baseline_alternative: 3,
        subject_covariates: vec![],
        alternative_covariates: vec!["price".to_string()],
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn full_pipeline_improves_on_the_initial_guess() {
    init_logging();
    let dataset = synthetic_dataset();
    let matrix = build_design_matrix(&dataset, &spec()).unwrap();

    let theta0 = Array1::zeros(matrix.n_features());
    let (initial_ll, _) = likelihood::evaluate(&matrix, &theta0, 0.0).unwrap();

    let config = OptimizerConfig {
        base_learning_rate: 0.05,
        fold_count: 5,
        tolerance: 1e-4,
        max_epochs: 300,
        seed: Some(2024),
        ..OptimizerConfig::default()
    };
    let result = fit(&matrix, theta0, &config).unwrap();

    assert_ne!(result.status, FitStatus::Diverged);
    assert!(result.log_likelihood.is_finite());
    assert!(result.log_likelihood <= 0.0);
    assert!(
        result.log_likelihood >= initial_ll - 1e-9,
        "fit must not end below its starting point: {} < {}",
        result.log_likelihood,
        initial_ll
    );
    assert_eq!(result.theta.len(), matrix.n_features());
    assert_eq!(result.names, matrix.column_names());
    assert!(result.theta.iter().all(|v| v.is_finite()));

    let top_one = top_one_accuracy(&matrix, &result.theta).unwrap();
    assert!((0.0..=1.0).contains(&top_one));
    let baseline = frequency_baseline(&matrix);
    assert_eq!(baseline.len(), matrix.alternatives().len());
    assert!((baseline.last().unwrap() - 1.0).abs() < 1e-12);
    let top_all = top_k_accuracy(&matrix, &result.theta, matrix.alternatives().len()).unwrap();
    assert!((top_all - 1.0).abs() < 1e-12);
}

#[test]
fn ridge_shrinks_the_fitted_parameters() {
    init_logging();
    let dataset = synthetic_dataset();
    let matrix = build_design_matrix(&dataset, &spec()).unwrap();
    let config = |ridge: f64| OptimizerConfig {
        base_learning_rate: 0.05,
        fold_count: 5,
        ridge,
        tolerance: 1e-4,
        max_epochs: 150,
        seed: Some(7),
        ..OptimizerConfig::default()
    };
    let free = fit(&matrix, Array1::zeros(matrix.n_features()), &config(0.0)).unwrap();
    let penalized = fit(&matrix, Array1::zeros(matrix.n_features()), &config(0.5)).unwrap();
    let norm = |theta: &Array1<f64>| theta.dot(theta);
    assert!(
        norm(&penalized.theta) <= norm(&free.theta) + 1e-6,
        "a heavy ridge penalty should not grow the parameter norm"
    );
}

#[test]
fn pipeline_from_a_tsv_file() {
    init_logging();
    let dataset = synthetic_dataset();
    // Serialize the synthetic dataset to a TSV and reload it.
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "occasion_id\tchosen\tsubject_id\talternative_id\tavailable\tprice"
    )
    .unwrap();
    let price = dataset.covariate("price").unwrap();
    for row in 0..dataset.n_rows() {
        writeln!(
            file,
            "{}\t{}\t{}\t{}\t{}\t{}",
            dataset.occasion_id()[row],
            dataset.chosen()[row] as u8,
            dataset.subject_id()[row],
            dataset.alternative_id()[row],
            dataset.available()[row] as u8,
            price[row],
        )
        .unwrap();
    }
    file.flush().unwrap();

    let reloaded = load_choice_data(file.path().to_str().unwrap(), &["price"]).unwrap();
    let direct = build_design_matrix(&dataset, &spec()).unwrap();
    let from_file = build_design_matrix(&reloaded, &spec()).unwrap();
    assert_eq!(direct.column_names(), from_file.column_names());
    assert_eq!(direct.n_rows(), from_file.n_rows());
    assert_eq!(direct.n_occasions(), from_file.n_occasions());
}
