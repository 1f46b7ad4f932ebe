// src/internships.rs

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::{current_user, ensure_enterprise_access, ensure_university_access, CurrentUser};
use crate::enrichment::{enrich_internship, enrich_internships, InternshipView};
use crate::error::AppError;
use crate::models::{fields, InternshipStatus, Role};
use crate::store::{collections, get_text, DocumentStore, Filter, FindOptions, SortOrder};

#[derive(Debug, Deserialize)]
pub struct InternshipQuery {
    pub statut: Option<String>,
}

pub async fn internship_details<S: DocumentStore>(
    store: &S,
    internship_id: &str,
) -> Result<InternshipView, AppError> {
    let document = store
        .find_by_id(collections::INTERNSHIPS, internship_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("stage {}", internship_id)))?;
    Ok(enrich_internship(store, &document).await)
}

pub async fn university_internships<S: DocumentStore>(
    store: &S,
    universite_id: &str,
    status: Option<InternshipStatus>,
) -> Result<Vec<InternshipView>, AppError> {
    let mut documents = store
        .find(
            collections::INTERNSHIPS,
            &Filter::new().eq(fields::UNIVERSITY_ID, universite_id),
            &FindOptions::sorted(fields::CREATED_AT, SortOrder::Desc),
        )
        .await?;
    if let Some(status) = status {
        documents.retain(|d| InternshipStatus::parse(get_text(d, fields::STATUS).unwrap_or("")) == status);
    }
    Ok(enrich_internships(store, &documents).await)
}

/// The intern, staff of either institution, or an admin.
async fn ensure_internship_access<S: DocumentStore>(
    store: &S,
    user: &CurrentUser,
    view: &InternshipView,
) -> Result<(), AppError> {
    if user.role.is_admin() {
        return Ok(());
    }
    match user.role {
        Role::Student if user.id == view.student_id => Ok(()),
        _ if user.role.is_academic() => {
            ensure_university_access(store, user, &view.university_id).await
        }
        _ if user.role.is_corporate() => {
            ensure_enterprise_access(store, user, &view.enterprise_id).await
        }
        _ => Err(AppError::Forbidden(format!("no access to stage {}", view.id))),
    }
}

/// GET /internships/{internship_id}
pub async fn get_internship<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    let view = internship_details(data.store.as_ref(), &path.into_inner()).await?;
    ensure_internship_access(data.store.as_ref(), &user, &view).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// GET /universities/{universite_id}/internships
pub async fn list_university_internships<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
    path: web::Path<String>,
    query: web::Query<InternshipQuery>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    let universite_id = path.into_inner();
    ensure_university_access(data.store.as_ref(), &user, &universite_id).await?;

    let status = query
        .statut
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(InternshipStatus::parse);
    let views = university_internships(data.store.as_ref(), &universite_id, status).await?;
    Ok(HttpResponse::Ok().json(views))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mongodb::bson::doc;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            collections::INTERNSHIPS,
            vec![
                doc! { "_id": "i1", "universiteId": "U", "etudiantId": "s1", "entrepriseId": "e1",
                       "statut": "en_cours", "createdAt": "2024-01-01" },
                doc! { "_id": "i2", "universiteId": "U", "etudiantId": "s2", "entrepriseId": "e2",
                       "statut": "completed", "createdAt": "2024-02-01" },
                doc! { "_id": "i3", "universiteId": "V", "statut": "en_cours" },
            ],
        );
        store.seed(
            collections::USERS,
            vec![
                doc! { "_id": "t1", "universiteId": "U" },
                doc! { "_id": "tut", "entrepriseId": "e2" },
            ],
        );
        store
    }

    #[tokio::test]
    async fn listing_is_scoped_and_newest_first() {
        let store = seeded();
        let all = university_internships(&store, "U", None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["i2", "i1"]);

        let done = university_internships(&store, "U", Some(InternshipStatus::parse("termine")))
            .await
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].statut, InternshipStatus::Completed);
    }

    #[tokio::test]
    async fn status_filter_ignores_case_and_accents() {
        let store = MemoryStore::new();
        store.seed(
            collections::INTERNSHIPS,
            vec![
                doc! { "_id": "a", "universiteId": "U", "statut": "En cours" },
                doc! { "_id": "b", "universiteId": "U", "statut": "IN_PROGRESS" },
                doc! { "_id": "c", "universiteId": "U", "statut": "Terminé" },
            ],
        );
        let running = university_internships(&store, "U", Some(InternshipStatus::parse("en_cours")))
            .await
            .unwrap();
        let mut ids: Vec<&str> = running.iter().map(|v| v.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn missing_internship_is_not_found() {
        let store = seeded();
        assert!(internship_details(&store, "nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn access_follows_participation() {
        let store = seeded();
        let i1 = internship_details(&store, "i1").await.unwrap();
        let user = |id: &str, role| CurrentUser {
            id: id.to_string(),
            role,
        };

        assert!(ensure_internship_access(&store, &user("s1", Role::Student), &i1).await.is_ok());
        assert!(ensure_internship_access(&store, &user("s2", Role::Student), &i1).await.is_err());
        assert!(ensure_internship_access(&store, &user("t1", Role::Teacher), &i1).await.is_ok());
        assert!(ensure_internship_access(&store, &user("tut", Role::Tutor), &i1).await.is_err());
        assert!(ensure_internship_access(&store, &user("a", Role::Admin), &i1).await.is_ok());
    }
}
