// src/store/mongo.rs

use futures_util::TryStreamExt;
use log::info;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, Document},
    error::{ErrorKind, WriteFailure},
    options::ClientOptions,
    Client, Collection, Database,
};
use uuid::Uuid;

use super::{document_id, DocumentStore, Filter, FindOptions, SortOrder};
use crate::error::AppError;

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoStore {
    pub client: Client,
    pub db: Database,
}

impl MongoStore {
    pub async fn init(uri: &str, db_name: &str) -> Result<Self, AppError> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        info!("Connected to MongoDB database '{}'", db_name);
        Ok(MongoStore { client, db })
    }

    fn coll(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

/// Matches `id` stored either as a string or, when it is 24 hex digits, as
/// an ObjectId.
fn id_filter(id: &str) -> Document {
    match ObjectId::parse_str(id) {
        Ok(oid) => doc! { "_id": { "$in": [Bson::String(id.to_string()), Bson::ObjectId(oid)] } },
        Err(_) => doc! { "_id": id },
    }
}

impl DocumentStore for MongoStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, AppError> {
        let coll = self.coll(collection);
        let mut action = coll.find(filter.to_document());
        if let Some((field, order)) = &options.sort {
            let mut sort = Document::new();
            sort.insert(
                field.clone(),
                match order {
                    SortOrder::Asc => 1,
                    SortOrder::Desc => -1,
                },
            );
            action = action.sort(sort);
        }
        if let Some(limit) = options.limit {
            action = action.limit(limit);
        }
        let docs: Vec<Document> = action.await?.try_collect().await?;
        Ok(docs)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, AppError> {
        Ok(self.coll(collection).find_one(id_filter(id)).await?)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, AppError> {
        Ok(self
            .coll(collection)
            .count_documents(filter.to_document())
            .await?)
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
        match self.coll(collection).insert_one(&document).await {
            Ok(_) => Ok(id),
            Err(e) if is_duplicate_key(&e) => Err(AppError::Conflict(format!(
                "document {} already exists in {}",
                id, collection
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_where(
        &self,
        collection: &str,
        id: &str,
        expected: &Filter,
        patch: Document,
    ) -> Result<bool, AppError> {
        let expected = expected.to_document();
        let filter = if expected.is_empty() {
            id_filter(id)
        } else {
            doc! { "$and": [id_filter(id), expected] }
        };
        let res = self
            .coll(collection)
            .update_one(filter, doc! { "$set": patch })
            .await?;
        Ok(res.matched_count > 0)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, AppError> {
        let res = self.coll(collection).delete_one(id_filter(id)).await?;
        Ok(res.deleted_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_ids_also_match_object_ids() {
        let hex = "65f1c2a4b7e8d90123456789";
        let filter = id_filter(hex);
        let oid = ObjectId::parse_str(hex).unwrap();
        assert_eq!(
            filter,
            doc! { "_id": { "$in": [Bson::String(hex.to_string()), Bson::ObjectId(oid)] } }
        );
        assert_eq!(id_filter("c1"), doc! { "_id": "c1" });
    }
}
