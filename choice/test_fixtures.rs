//! Shared fixtures for unit tests.

use crate::data::ChoiceDataset;
use std::collections::HashMap;

/// A small mixed panel: subject 1 owns occasions {1, 2}, subject 3
/// owns {4, 5, 6}, subjects 2, 4, 5 own one occasion each. Every occasion
/// offers alternatives {1, 2, 3}, all available, with a `price` covariate.
pub(crate) fn scenario_a_dataset() -> ChoiceDataset {
    let occasion_subject: [(u64, u64); 8] = [
        (1, 1),
        (2, 1),
        (3, 2),
        (4, 3),
        (5, 3),
        (6, 3),
        (7, 4),
        (8, 5),
    ];
    let mut occasion_id = Vec::new();
    let mut chosen = Vec::new();
    let mut subject_id = Vec::new();
    let mut alternative_id = Vec::new();
    let mut available = Vec::new();
    let mut price = Vec::new();
    for (i, &(occasion, subject)) in occasion_subject.iter().enumerate() {
        let chosen_alt = (i as u64 % 3) + 1;
        for alt in 1..=3u64 {
            occasion_id.push(occasion);
            chosen.push(alt == chosen_alt);
            subject_id.push(subject);
            alternative_id.push(alt);
            available.push(true);
            price.push(alt as f64 + 0.1 * i as f64);
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

/// A dataset where alternative 1 is chosen in every occasion, each occasion
/// owned by a distinct singleton subject so the design reduces to the two
/// non-baseline alternative intercepts.
pub(crate) fn always_alternative_one_dataset(n_occasions: usize) -> ChoiceDataset {
    let mut occasion_id = Vec::new();
    let mut chosen = Vec::new();
    let mut subject_id = Vec::new();
    let mut alternative_id = Vec::new();
    let mut available = Vec::new();
    for occasion in 1..=n_occasions as u64 {
        for alt in 1..=3u64 {
            occasion_id.push(occasion);
            chosen.push(alt == 1);
            subject_id.push(100 + occasion);
            alternative_id.push(alt);
            available.push(true);
        }
    }
    ChoiceDataset::from_columns(
        occasion_id,
        chosen,
        subject_id,
        alternative_id,
        available,
        HashMap::new(),
    )
    .unwrap()
}
