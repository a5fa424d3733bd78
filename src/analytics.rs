//! Summaries the front end charts next to a score.

use crate::models::{
    AcceptedDescription, ApplicantRecord, FeatureImportance, SplitTable, ValueCounts,
    COUNT_COLUMNS, FEATURE_COUNT, FEATURE_NAMES, LABEL_ACCEPTED,
};

/// Importance table sorted from most to least important.
pub fn importance_table(feature_names: &[String], importances: &[f64]) -> Vec<FeatureImportance> {
    let mut table: Vec<FeatureImportance> = feature_names
        .iter()
        .zip(importances)
        .map(|(feature, importance)| FeatureImportance {
            feature: feature.clone(),
            importance: *importance,
        })
        .collect();
    table.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    table
}

/// Mean/min/max of continuous columns and value counts of count columns,
/// over accepted records only. Missing cells are skipped.
pub fn describe_accepted(records: &[ApplicantRecord]) -> AcceptedDescription {
    let accepted: Vec<[f64; FEATURE_COUNT]> = records
        .iter()
        .filter(|r| r.target == Some(LABEL_ACCEPTED))
        .map(|r| r.features.to_vector())
        .collect();

    let continuous: Vec<(usize, &str)> = FEATURE_NAMES
        .iter()
        .enumerate()
        .filter(|(_, name)| !COUNT_COLUMNS.contains(*name))
        .map(|(i, name)| (i, *name))
        .collect();

    let mut means = Vec::with_capacity(continuous.len());
    let mut mins = Vec::with_capacity(continuous.len());
    let mut maxs = Vec::with_capacity(continuous.len());

    for &(index, _) in &continuous {
        let values: Vec<f64> = accepted
            .iter()
            .map(|row| row[index])
            .filter(|v| !v.is_nan())
            .collect();

        if values.is_empty() {
            means.push(None);
            mins.push(None);
            maxs.push(None);
            continue;
        }

        means.push(Some(values.iter().sum::<f64>() / values.len() as f64));
        mins.push(values.iter().copied().reduce(f64::min));
        maxs.push(values.iter().copied().reduce(f64::max));
    }

    let counts = COUNT_COLUMNS
        .iter()
        .map(|name| {
            let index = FEATURE_NAMES
                .iter()
                .position(|f| f == name)
                .unwrap_or_default();
            value_counts(name, accepted.iter().map(|row| row[index]))
        })
        .collect();

    AcceptedDescription {
        summary: SplitTable {
            columns: continuous.iter().map(|(_, name)| name.to_string()).collect(),
            index: vec!["mean".to_string(), "min".to_string(), "max".to_string()],
            data: vec![means, mins, maxs],
        },
        counts,
        accepted_records: accepted.len(),
    }
}

fn value_counts(name: &str, values: impl Iterator<Item = f64>) -> ValueCounts {
    let mut sorted: Vec<f64> = values.filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut index: Vec<f64> = Vec::new();
    let mut data: Vec<u64> = Vec::new();
    for value in sorted {
        match index.last() {
            Some(last) if *last == value => {
                if let Some(count) = data.last_mut() {
                    *count += 1;
                }
            }
            _ => {
                index.push(value);
                data.push(1);
            }
        }
    }

    ValueCounts {
        name: name.to_string(),
        index,
        data,
    }
}
