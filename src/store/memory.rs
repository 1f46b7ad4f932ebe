use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use log::debug;
use mongodb::bson::{Bson, Document};
use uuid::Uuid;

use super::{bson_cmp, document_id, DocumentStore, Filter, FindOptions, SortOrder};
use crate::error::AppError;

/// In-process store with the same query semantics as the MongoDB backend.
/// Documents keep insertion order, which makes "first seen" deterministic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends documents to a collection without id checks.
    pub fn seed(&self, collection: &str, documents: impl IntoIterator<Item = Document>) {
        if let Ok(mut guard) = self.collections.lock() {
            guard
                .entry(collection.to_string())
                .or_default()
                .extend(documents);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<Document>>>, AppError> {
        self.collections
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }
}

fn same_id(document: &Document, id: &str) -> bool {
    document_id(document).as_deref() == Some(id)
}

impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, AppError> {
        let guard = self.lock()?;
        let mut found: Vec<Document> = guard
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default();

        if let Some((field, order)) = &options.sort {
            found.sort_by(|a, b| {
                let x = super::get_path(a, field).unwrap_or(&Bson::Null);
                let y = super::get_path(b, field).unwrap_or(&Bson::Null);
                match order {
                    SortOrder::Asc => bson_cmp(x, y),
                    SortOrder::Desc => bson_cmp(y, x),
                }
            });
        }
        if let Some(limit) = options.limit {
            found.truncate(limit.max(0) as usize);
        }
        Ok(found)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, AppError> {
        let guard = self.lock()?;
        Ok(guard
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| same_id(d, id)).cloned()))
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, AppError> {
        let guard = self.lock()?;
        Ok(guard
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert(&self, collection: &str, mut document: Document) -> Result<String, AppError> {
        let id = match document_id(&document) {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                document.insert("_id", id.clone());
                id
            }
        };
        let mut guard = self.lock()?;
        let docs = guard.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| same_id(d, &id)) {
            return Err(AppError::Conflict(format!(
                "document {} already exists in {}",
                id, collection
            )));
        }
        debug!("memory store: insert {}/{}", collection, id);
        docs.push(document);
        Ok(id)
    }

    async fn update_where(
        &self,
        collection: &str,
        id: &str,
        expected: &Filter,
        patch: Document,
    ) -> Result<bool, AppError> {
        let mut guard = self.lock()?;
        let target = guard
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| same_id(d, id) && expected.matches(d)));
        match target {
            Some(document) => {
                for (key, value) in patch {
                    document.insert(key, value);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, AppError> {
        let mut guard = self.lock()?;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| !same_id(d, id));
        Ok(docs.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId};

    #[tokio::test]
    async fn object_ids_resolve_by_hex() {
        let oid = ObjectId::parse_str("65f1c2a4b7e8d90123456789").unwrap();
        let store = MemoryStore::new();
        store.seed("entreprises", vec![doc! { "_id": oid, "companyName": "Acme" }]);
        let found = store
            .find_by_id("entreprises", "65f1c2a4b7e8d90123456789")
            .await
            .unwrap();
        assert_eq!(found.unwrap().get_str("companyName").unwrap(), "Acme");
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            "stages",
            vec![
                doc! { "_id": "s1", "statut": "en_cours", "rang": 2 },
                doc! { "_id": "s2", "statut": "termine", "rang": 1 },
                doc! { "_id": "s3", "statut": "en_cours", "rang": 3 },
            ],
        );
        store
    }

    #[tokio::test]
    async fn find_filters_sorts_and_limits() {
        let store = store();
        let filter = Filter::new().eq("statut", "en_cours");
        let found = store
            .find("stages", &filter, &FindOptions::sorted("rang", SortOrder::Desc).limit(1))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("_id").unwrap(), "s3");
    }

    #[tokio::test]
    async fn unknown_collection_is_empty() {
        let store = store();
        assert_eq!(store.count("nope", &Filter::new()).await.unwrap(), 0);
        assert!(store.find_by_id("nope", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_generates_id_and_rejects_duplicates() {
        let store = store();
        let id = store.insert("stages", doc! { "statut": "actif" }).await.unwrap();
        assert!(store.find_by_id("stages", &id).await.unwrap().is_some());

        let dup = store.insert("stages", doc! { "_id": "s1" }).await;
        assert!(matches!(dup, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn conditional_update_only_applies_on_match() {
        let store = store();
        let expected = Filter::new().eq("statut", "termine");
        let applied = store
            .update_where("stages", "s1", &expected, doc! { "statut": "annule" })
            .await
            .unwrap();
        assert!(!applied);

        let expected = Filter::new().eq("statut", "en_cours");
        let applied = store
            .update_where("stages", "s1", &expected, doc! { "statut": "termine" })
            .await
            .unwrap();
        assert!(applied);
        let s1 = store.find_by_id("stages", "s1").await.unwrap().unwrap();
        assert_eq!(s1.get_str("statut").unwrap(), "termine");
    }

    #[tokio::test]
    async fn delete_reports_removal() {
        let store = store();
        assert!(store.delete("stages", "s2").await.unwrap());
        assert!(!store.delete("stages", "s2").await.unwrap());
        assert_eq!(store.count("stages", &Filter::new()).await.unwrap(), 2);
    }
}
