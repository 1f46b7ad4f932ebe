use mongodb::bson::{Bson, Document};
use serde::Serialize;

use crate::aggregation::average;
use crate::error::AppError;
use crate::models::fields;
use crate::store::{collections, get_number, get_path, get_text, DocumentStore, Filter, FindOptions};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionAverage {
    pub criterion: String,
    pub average: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub count: u64,
    pub average_score: f64,
    pub criteria: Vec<CriterionAverage>,
}

fn criteria(evaluation: &Document) -> Vec<(String, f64)> {
    match get_path(evaluation, fields::CRITERIA) {
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Bson::Document(c) => {
                    let name = get_text(c, "nom").or_else(|| get_text(c, "name"))?;
                    Some((name.to_string(), get_number(c, "note")?))
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Overall score: `noteGlobale`, else the mean of the criterion notes.
fn overall_score(evaluation: &Document) -> Option<f64> {
    get_number(evaluation, fields::OVERALL_SCORE).or_else(|| {
        let notes: Vec<f64> = criteria(evaluation).into_iter().map(|(_, n)| n).collect();
        (!notes.is_empty()).then(|| notes.iter().sum::<f64>() / notes.len() as f64)
    })
}

pub fn summarize(evaluations: &[Document]) -> EvaluationSummary {
    let scores: Vec<f64> = evaluations.iter().filter_map(overall_score).collect();

    let mut per_criterion: Vec<(String, Vec<f64>)> = Vec::new();
    for (name, note) in evaluations.iter().flat_map(criteria) {
        match per_criterion.iter_mut().find(|(n, _)| *n == name) {
            Some((_, notes)) => notes.push(note),
            None => per_criterion.push((name, vec![note])),
        }
    }

    EvaluationSummary {
        count: evaluations.len() as u64,
        average_score: average(&scores),
        criteria: per_criterion
            .into_iter()
            .map(|(criterion, notes)| CriterionAverage {
                average: average(&notes),
                count: notes.len() as u64,
                criterion,
            })
            .collect(),
    }
}

pub async fn evaluation_summary<S: DocumentStore>(
    store: &S,
    scope: &Filter,
) -> Result<EvaluationSummary, AppError> {
    let evaluations = store
        .find(collections::EVALUATIONS, scope, &FindOptions::default())
        .await?;
    Ok(summarize(&evaluations))
}
