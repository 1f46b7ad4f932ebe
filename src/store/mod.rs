// src/store/mod.rs
//
// Document store abstraction.
//
// Every read and write the service performs goes through `DocumentStore`:
// collection-scoped equality / `in` queries with optional ordering and limit,
// single reads by id, inserts, conditional patches and deletes. Documents are
// schema-less BSON; ids are passed around as strings and may be stored under
// `_id` either as strings or as ObjectIds.

mod memory;
mod mongo;

use std::cmp::Ordering;
use std::future::Future;

use mongodb::bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Collection names as they exist in the store.
pub mod collections {
    pub const USERS: &str = "users";
    pub const INTERNSHIPS: &str = "stages";
    pub const OFFERS: &str = "offres";
    pub const APPLICATIONS: &str = "candidatures";
    pub const ENTERPRISES: &str = "entreprises";
    pub const UNIVERSITIES: &str = "universites";
    pub const EVALUATIONS: &str = "evaluations";
    pub const ASSOCIATIONS: &str = "associations";

    pub const ALL: [&str; 8] = [
        USERS,
        INTERNSHIPS,
        OFFERS,
        APPLICATIONS,
        ENTERPRISES,
        UNIVERSITIES,
        EVALUATIONS,
        ASSOCIATIONS,
    ];
}

/// One predicate of a [`Filter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Eq { field: String, value: Bson },
    In { field: String, values: Vec<Bson> },
}

/// Conjunction of equality / inclusion predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.conditions.push(Condition::Eq {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn is_in<V: Into<Bson>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.conditions.push(Condition::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Renders the filter as a MongoDB query document. Conditions on a
    /// repeated field are combined under `$and`.
    pub fn to_document(&self) -> Document {
        let clauses: Vec<(String, Bson)> = self
            .conditions
            .iter()
            .map(|condition| match condition {
                Condition::Eq { field, value } => (field.clone(), value.clone()),
                Condition::In { field, values } => {
                    (field.clone(), Bson::Document(doc! { "$in": values.clone() }))
                }
            })
            .collect();

        let repeated = clauses
            .iter()
            .enumerate()
            .any(|(i, (field, _))| clauses[..i].iter().any(|(seen, _)| seen == field));
        if !repeated {
            return clauses.into_iter().collect();
        }
        let all: Vec<Bson> = clauses
            .into_iter()
            .map(|(field, clause)| {
                let mut single = Document::new();
                single.insert(field, clause);
                Bson::Document(single)
            })
            .collect();
        doc! { "$and": all }
    }

    /// Evaluates the filter against a document the same way the store would.
    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Eq { field, value } => field_matches(document, field, |v| bson_eq(v, value)),
            Condition::In { field, values } => {
                field_matches(document, field, |v| values.iter().any(|x| bson_eq(v, x)))
            }
        })
    }
}

fn field_matches(document: &Document, field: &str, pred: impl Fn(&Bson) -> bool) -> bool {
    match get_path(document, field) {
        Some(Bson::Array(items)) => items.iter().any(&pred),
        Some(value) => pred(value),
        None => pred(&Bson::Null),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<i64>,
}

impl FindOptions {
    pub fn sorted(field: &str, order: SortOrder) -> Self {
        Self {
            sort: Some((field.to_string(), order)),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub trait DocumentStore: Send + Sync {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> impl Future<Output = Result<Vec<Document>, AppError>> + Send;

    fn find_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>, AppError>> + Send;

    fn count(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Inserts a document and returns its id. A missing `_id` is generated;
    /// an existing `_id` that is already taken yields [`AppError::Conflict`].
    fn insert(
        &self,
        collection: &str,
        document: Document,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Applies `$set: patch` to the document `id` only if it also matches
    /// `expected`. Returns whether a document matched.
    fn update_where(
        &self,
        collection: &str,
        id: &str,
        expected: &Filter,
        patch: Document,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn delete(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Resolves a dotted path (`enterprise.companyName`) inside a document.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        match current {
            Bson::Document(inner) => current = inner.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

/// String value at `path`, trimmed; empty strings count as absent.
pub fn get_text<'a>(document: &'a Document, path: &str) -> Option<&'a str> {
    match get_path(document, path) {
        Some(Bson::String(s)) if !s.trim().is_empty() => Some(s.trim()),
        _ => None,
    }
}

/// Numeric value at `path`, accepting any BSON number representation.
pub fn get_number(document: &Document, path: &str) -> Option<f64> {
    match get_path(document, path)? {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) if v.is_finite() => Some(*v),
        Bson::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Document id as a string, whatever type it was stored with.
pub fn document_id(document: &Document) -> Option<String> {
    match document.get("_id")? {
        Bson::String(s) => Some(s.clone()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        other => Some(other.to_string()),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Equality with numeric widening, so `Int32(3)` equals `Int64(3)`.
pub(crate) fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

pub(crate) fn bson_cmp(a: &Bson, b: &Bson) -> Ordering {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::Null, Bson::Null) => Ordering::Equal,
        (Bson::Null, _) => Ordering::Less,
        (_, Bson::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_path_lookup() {
        let d = doc! { "enterprise": { "companyName": "Acme", "nom": "" } };
        assert_eq!(get_text(&d, "enterprise.companyName"), Some("Acme"));
        assert_eq!(get_text(&d, "enterprise.nom"), None);
        assert!(get_path(&d, "enterprise.companyName.x").is_none());
        assert!(get_path(&d, "missing").is_none());
    }

    #[test]
    fn filter_renders_mongo_query() {
        let f = Filter::new()
            .eq("universiteId", "u1")
            .is_in("statut", ["en_cours", "in_progress"]);
        assert_eq!(
            f.to_document(),
            doc! { "universiteId": "u1", "statut": { "$in": ["en_cours", "in_progress"] } }
        );
    }

    #[test]
    fn repeated_field_conditions_are_all_kept() {
        let f = Filter::new()
            .eq("universiteId", "u2")
            .eq("universiteId", "u1");
        assert_eq!(
            f.to_document(),
            doc! { "$and": [{ "universiteId": "u2" }, { "universiteId": "u1" }] }
        );
        assert!(!f.matches(&doc! { "universiteId": "u1" }));
    }

    #[test]
    fn filter_matches_documents() {
        let f = Filter::new().eq("universiteId", "u1").is_in("statut", ["a", "b"]);
        assert!(f.matches(&doc! { "universiteId": "u1", "statut": "b" }));
        assert!(!f.matches(&doc! { "universiteId": "u2", "statut": "b" }));
        assert!(!f.matches(&doc! { "universiteId": "u1" }));
        assert!(Filter::new().matches(&doc! {}));
    }

    #[test]
    fn numeric_equality_widens() {
        let f = Filter::new().eq("note", 3_i64);
        assert!(f.matches(&doc! { "note": 3_i32 }));
    }

    #[test]
    fn array_fields_match_any_element() {
        let f = Filter::new().eq("tags", "java");
        assert!(f.matches(&doc! { "tags": ["rust", "java"] }));
    }

    #[test]
    fn condition_deserializes_from_json() {
        let f: Filter = serde_json::from_str(
            r#"[{"op":"eq","field":"universiteId","value":"u1"},
                {"op":"in","field":"statut","values":["en_cours","termine"]}]"#,
        )
        .unwrap();
        assert_eq!(f.conditions().len(), 2);
        assert!(f.matches(&doc! { "universiteId": "u1", "statut": "termine" }));
    }

    #[test]
    fn numbers_parse_from_strings() {
        let d = doc! { "a": "14.5", "b": 12_i32, "c": "n/a" };
        assert_eq!(get_number(&d, "a"), Some(14.5));
        assert_eq!(get_number(&d, "b"), Some(12.0));
        assert_eq!(get_number(&d, "c"), None);
    }
}
