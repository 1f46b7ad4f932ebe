// src/aggregation.rs
//
// Parameterized query-and-reduce routines behind every dashboard.
//
// An `AggregationSpec` names a collection, a scope filter, a bucket key
// and an optional top-N cut. `aggregate` fetches the scoped documents and
// hands them to `reduce`, which is pure: each document lands in exactly one
// bucket, so bucket counts always sum to the number of documents fetched.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use log::{debug, error};
use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{ApplicationStatus, AssociationStatus, InternshipStatus, Role};
use crate::store::{get_path, get_text, DocumentStore, Filter, FindOptions};

/// Label of documents whose key cannot be extracted.
pub const UNKNOWN_LABEL: &str = "Inconnu";

/// How a document is assigned to a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupKey {
    /// Literal value at a dotted path.
    Field { path: String },
    /// First non-empty value among `paths`, else `default`.
    Fallback { paths: Vec<String>, default: String },
    /// `YYYY-MM` of a date field.
    Month { path: String },
    InternshipStatus { path: String },
    ApplicationStatus { path: String },
    AssociationStatus { path: String },
    Role { path: String },
}

impl GroupKey {
    pub fn field(path: &str) -> Self {
        GroupKey::Field {
            path: path.to_string(),
        }
    }

    pub fn fallback(paths: &[&str], default: &str) -> Self {
        GroupKey::Fallback {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            default: default.to_string(),
        }
    }

    pub fn month(path: &str) -> Self {
        GroupKey::Month {
            path: path.to_string(),
        }
    }

    /// Enterprise display name carried on internships and offers.
    pub fn enterprise_name() -> Self {
        Self::fallback(
            &[
                crate::models::fields::ENTERPRISE_NAME,
                crate::models::fields::ENTERPRISE_NAME_FR,
            ],
            UNKNOWN_LABEL,
        )
    }

    pub fn extract(&self, document: &Document) -> String {
        match self {
            GroupKey::Field { path } => scalar_label(get_path(document, path))
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            GroupKey::Fallback { paths, default } => paths
                .iter()
                .find_map(|p| get_text(document, p))
                .map(String::from)
                .unwrap_or_else(|| default.clone()),
            GroupKey::Month { path } => get_path(document, path)
                .and_then(month_label)
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            GroupKey::InternshipStatus { path } => {
                InternshipStatus::parse(get_text(document, path).unwrap_or("")).into()
            }
            GroupKey::ApplicationStatus { path } => {
                ApplicationStatus::parse(get_text(document, path).unwrap_or("")).into()
            }
            GroupKey::AssociationStatus { path } => {
                AssociationStatus::parse(get_text(document, path).unwrap_or("")).into()
            }
            GroupKey::Role { path } => get_text(document, path)
                .and_then(Role::parse)
                .map(|r| r.as_str().to_string())
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
        }
    }

    /// Category labels displayed in a fixed order, when the key has one.
    pub fn fixed_labels(&self) -> Option<Vec<String>> {
        let labels = match self {
            GroupKey::InternshipStatus { .. } => InternshipStatus::ORDER
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            GroupKey::ApplicationStatus { .. } => ApplicationStatus::ORDER
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            GroupKey::AssociationStatus { .. } => AssociationStatus::ORDER
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            GroupKey::Role { .. } => Role::ALL.iter().map(|r| r.as_str().to_string()).collect(),
            _ => return None,
        };
        Some(labels)
    }

    fn default_order(&self) -> BucketOrder {
        match self {
            GroupKey::Month { .. } => BucketOrder::Chronological,
            _ if self.fixed_labels().is_some() => BucketOrder::Fixed,
            _ => BucketOrder::CountDesc,
        }
    }
}

fn scalar_label(value: Option<&Bson>) -> Option<String> {
    match value? {
        Bson::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Bson::String(_) | Bson::Null => None,
        Bson::Int32(v) => Some(v.to_string()),
        Bson::Int64(v) => Some(v.to_string()),
        Bson::Double(v) => Some(v.to_string()),
        Bson::Boolean(v) => Some(v.to_string()),
        other => Some(other.to_string()),
    }
}

/// `YYYY-MM` for BSON dates, RFC 3339 / `YYYY-MM-DD` strings, epoch millis,
/// and `{seconds, nanoseconds}` timestamp objects.
pub fn month_label(value: &Bson) -> Option<String> {
    let date: DateTime<Utc> = match value {
        Bson::DateTime(dt) => Utc.timestamp_millis_opt(dt.timestamp_millis()).single()?,
        Bson::Int64(millis) => Utc.timestamp_millis_opt(*millis).single()?,
        Bson::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                dt.with_timezone(&Utc)
            } else {
                let day = NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()?;
                Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0)?)
            }
        }
        Bson::Document(ts) => {
            let seconds = match ts.get("seconds").or_else(|| ts.get("_seconds"))? {
                Bson::Int64(v) => *v,
                Bson::Int32(v) => *v as i64,
                Bson::Double(v) => *v as i64,
                _ => return None,
            };
            Utc.timestamp_opt(seconds, 0).single()?
        }
        _ => return None,
    };
    Some(date.format("%Y-%m").to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketOrder {
    /// Descending count, ties in first-seen order.
    CountDesc,
    /// The key's fixed category order; unknown labels follow in first-seen order.
    Fixed,
    /// Ascending label; the unknown bucket goes last.
    Chronological,
    FirstSeen,
}

/// Configuration of one grouping reducer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSpec {
    pub collection: String,
    #[serde(default)]
    pub scope: Filter,
    pub group_key: GroupKey,
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default)]
    pub order: Option<BucketOrder>,
    /// Keep zero-count categories of a fixed order.
    #[serde(default)]
    pub keep_empty: bool,
}

impl AggregationSpec {
    pub fn new(collection: &str, scope: Filter, group_key: GroupKey) -> Self {
        Self {
            collection: collection.to_string(),
            scope,
            group_key,
            top_n: None,
            order: None,
            keep_empty: false,
        }
    }

    pub fn top(mut self, n: usize) -> Self {
        self.top_n = Some(n);
        self
    }

    pub fn keep_empty(mut self) -> Self {
        self.keep_empty = true;
        self
    }

    fn effective_order(&self) -> BucketOrder {
        if self.top_n.is_some() {
            return BucketOrder::CountDesc;
        }
        self.order.unwrap_or_else(|| self.group_key.default_order())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub label: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub total: u64,
    pub buckets: Vec<Bucket>,
}

impl Breakdown {
    pub fn count_of(&self, label: &str) -> u64 {
        self.buckets
            .iter()
            .find(|b| b.label == label)
            .map(|b| b.count)
            .unwrap_or(0)
    }
}

/// Share of `count` in `total`, in percent with one decimal; 0 when empty.
pub fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Mean with one decimal; 0 for no values.
pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (mean * 10.0).round() / 10.0
}

/// Frequency of each key, in order of first appearance.
pub fn group_counts<'a>(
    documents: impl IntoIterator<Item = &'a Document>,
    key: &GroupKey,
) -> Vec<(String, u64)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<(String, u64)> = Vec::new();
    for document in documents {
        let label = key.extract(document);
        match index.get(&label) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(label.clone(), counts.len());
                counts.push((label, 1));
            }
        }
    }
    counts
}

/// The `n` largest buckets, ties kept in input order.
pub fn top_n(mut counts: Vec<(String, u64)>, n: usize) -> Vec<(String, u64)> {
    // sort_by is stable
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(n);
    counts
}

pub fn fixed_order(
    counts: Vec<(String, u64)>,
    labels: &[String],
    keep_empty: bool,
) -> Vec<(String, u64)> {
    let mut ordered: Vec<(String, u64)> = labels
        .iter()
        .map(|label| {
            let count = counts
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            (label.clone(), count)
        })
        .filter(|(_, count)| keep_empty || *count > 0)
        .collect();
    ordered.extend(counts.into_iter().filter(|(l, _)| !labels.contains(l)));
    ordered
}

pub fn chronological(mut counts: Vec<(String, u64)>) -> Vec<(String, u64)> {
    counts.sort_by(|a, b| {
        let unknown_a = a.0 == UNKNOWN_LABEL;
        let unknown_b = b.0 == UNKNOWN_LABEL;
        unknown_a.cmp(&unknown_b).then_with(|| a.0.cmp(&b.0))
    });
    counts
}

fn into_breakdown(counts: Vec<(String, u64)>, total: u64) -> Breakdown {
    Breakdown {
        total,
        buckets: counts
            .into_iter()
            .map(|(label, count)| Bucket {
                percentage: percentage(count, total),
                label,
                count,
            })
            .collect(),
    }
}

/// Groups an already fetched snapshot according to `spec`.
pub fn reduce(documents: &[Document], spec: &AggregationSpec) -> Breakdown {
    let total = documents.len() as u64;
    let counts = group_counts(documents, &spec.group_key);
    let ordered = match spec.effective_order() {
        BucketOrder::CountDesc => top_n(counts, spec.top_n.unwrap_or(usize::MAX)),
        BucketOrder::Fixed => match spec.group_key.fixed_labels() {
            Some(labels) => fixed_order(counts, &labels, spec.keep_empty),
            None => counts,
        },
        BucketOrder::Chronological => chronological(counts),
        BucketOrder::FirstSeen => counts,
    };
    into_breakdown(ordered, total)
}

/// Number of documents in `collection` matching `filter`.
pub async fn count<S: DocumentStore>(
    store: &S,
    collection: &str,
    filter: &Filter,
) -> Result<u64, AppError> {
    store.count(collection, filter).await
}

/// Fetches the scope of `spec` and reduces it.
pub async fn aggregate<S: DocumentStore>(
    store: &S,
    spec: &AggregationSpec,
) -> Result<Breakdown, AppError> {
    let documents = store
        .find(&spec.collection, &spec.scope, &FindOptions::default())
        .await?;
    debug!(
        "aggregating {} documents from '{}'",
        documents.len(),
        spec.collection
    );
    Ok(reduce(&documents, spec))
}

/// Outcome of one independent statistic. Keeps "nothing there" apart from
/// "could not fetch".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Fetched<T> {
    Ok { value: T },
    Failed { error: String },
}

impl<T> Fetched<T> {
    pub fn from_result(what: &str, result: Result<T, AppError>) -> Self {
        match result {
            Ok(value) => Fetched::Ok { value },
            Err(e) => {
                error!("Error computing {}: {}", what, e);
                Fetched::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Fetched::Ok { value } => Some(value),
            Fetched::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Fetched::Failed { .. })
    }

    /// Derives a statistic from this one; a failure carries over.
    pub fn derive<U>(&self, f: impl FnOnce(&T) -> U) -> Fetched<U> {
        match self {
            Fetched::Ok { value } => Fetched::Ok { value: f(value) },
            Fetched::Failed { error } => Fetched::Failed {
                error: error.clone(),
            },
        }
    }
}
