// src/applications.rs

use actix_web::{web, HttpRequest, HttpResponse};
use log::{error, info, warn};
use mongodb::bson::{doc, Bson, DateTime};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::{current_user, ensure_enterprise_access};
use crate::error::AppError;
use crate::models::{fields, Application, ApplicationStatus, NewInternship, Offer, Role};
use crate::store::{collections, DocumentStore, Filter, FindOptions};

/// Result of a status update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub application_id: String,
    pub previous: ApplicationStatus,
    pub current: ApplicationStatus,
    /// Internship tied to an accepted application.
    pub internship_id: Option<String>,
    /// Whether this call wrote the internship.
    pub internship_created: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

/// Matches the application only while its status is still `raw`.
fn status_guard(raw: &str) -> Filter {
    if raw.is_empty() {
        Filter::new().is_in(fields::STATUS, [Bson::Null, Bson::String(String::new())])
    } else {
        Filter::new().eq(fields::STATUS, raw)
    }
}

fn check_transition(from: &ApplicationStatus, to: &ApplicationStatus) -> Result<(), AppError> {
    if let ApplicationStatus::Other(raw) = to {
        return Err(AppError::Validation(format!("unknown application status '{}'", raw)));
    }
    if from == to {
        return Ok(());
    }
    if from.is_terminal() || *from == ApplicationStatus::Accepted {
        return Err(AppError::InvalidTransition(format!(
            "application is already {}",
            from.as_str()
        )));
    }
    Ok(())
}

async fn load_application<S: DocumentStore>(store: &S, id: &str) -> Result<Application, AppError> {
    store
        .find_by_id(collections::APPLICATIONS, id)
        .await?
        .map(|d| Application::from_document(&d))
        .ok_or_else(|| AppError::NotFound(format!("candidature {}", id)))
}

async fn load_offer<S: DocumentStore>(store: &S, application: &Application) -> Result<Offer, AppError> {
    if application.offre_id.is_empty() {
        return Err(AppError::NotFound(format!(
            "candidature {} references no offre",
            application.id
        )));
    }
    store
        .find_by_id(collections::OFFERS, &application.offre_id)
        .await?
        .map(Offer::from_document)
        .ok_or_else(|| AppError::NotFound(format!("offre {}", application.offre_id)))
}

/// Internship already produced by this application, under the derived id or,
/// for records written before ids were derived, by back-reference.
async fn existing_internship<S: DocumentStore>(
    store: &S,
    application_id: &str,
) -> Result<Option<String>, AppError> {
    let derived = NewInternship::id_for_application(application_id);
    if store.find_by_id(collections::INTERNSHIPS, &derived).await?.is_some() {
        return Ok(Some(derived));
    }
    let linked = store
        .find(
            collections::INTERNSHIPS,
            &Filter::new().eq(fields::APPLICATION_ID, application_id),
            &FindOptions::default().limit(1),
        )
        .await?;
    Ok(linked.first().and_then(crate::store::document_id))
}

/// Writes the internship for an accepted application. A concurrent or earlier
/// write of the same derived id counts as done.
async fn write_internship<S: DocumentStore>(
    store: &S,
    offer: &Offer,
    application: &Application,
) -> Result<(String, bool), AppError> {
    let internship = NewInternship::from_acceptance(offer, application);
    match store
        .insert(collections::INTERNSHIPS, internship.to_document(offer))
        .await
    {
        Ok(id) => Ok((id, true)),
        Err(AppError::Conflict(_)) => Ok((internship.id, false)),
        Err(e) => Err(e),
    }
}

/// Moves an application to `target`.
///
/// Accepting reads the linked offer first; if it is missing nothing is
/// written. The status is then swapped conditionally on its previous value
/// and the internship inserted under an id derived from the application. If
/// that insert fails the status is put back. Accepting an already accepted
/// application returns its internship, creating it if an earlier run never
/// did.
pub async fn update_application_status<S: DocumentStore>(
    store: &S,
    application_id: &str,
    target: ApplicationStatus,
) -> Result<StatusChange, AppError> {
    let application = load_application(store, application_id).await?;
    let previous = application.statut.clone();
    check_transition(&previous, &target)?;

    if target != ApplicationStatus::Accepted {
        if previous != target {
            let patch = doc! {
                (fields::STATUS): target.as_str(),
                (fields::UPDATED_AT): DateTime::now(),
            };
            let swapped = store
                .update_where(
                    collections::APPLICATIONS,
                    application_id,
                    &status_guard(&application.raw_status),
                    patch,
                )
                .await?;
            if !swapped {
                return Err(AppError::Conflict(format!(
                    "candidature {} was modified concurrently",
                    application_id
                )));
            }
            info!(
                "Candidature {} moved from {} to {}",
                application_id,
                previous.as_str(),
                target.as_str()
            );
        }
        return Ok(StatusChange {
            application_id: application_id.to_string(),
            previous,
            current: target,
            internship_id: None,
            internship_created: false,
        });
    }

    if previous == ApplicationStatus::Accepted {
        if let Some(id) = existing_internship(store, application_id).await? {
            return Ok(StatusChange {
                application_id: application_id.to_string(),
                previous,
                current: target,
                internship_id: Some(id),
                internship_created: false,
            });
        }
        warn!(
            "Candidature {} is accepted but has no stage, creating it",
            application_id
        );
        let offer = load_offer(store, &application).await?;
        let (id, created) = write_internship(store, &offer, &application).await?;
        return Ok(StatusChange {
            application_id: application_id.to_string(),
            previous,
            current: target,
            internship_id: Some(id),
            internship_created: created,
        });
    }

    let offer = load_offer(store, &application).await?;

    let patch = doc! {
        (fields::STATUS): target.as_str(),
        (fields::UPDATED_AT): DateTime::now(),
    };
    let swapped = store
        .update_where(
            collections::APPLICATIONS,
            application_id,
            &status_guard(&application.raw_status),
            patch,
        )
        .await?;
    if !swapped {
        return Err(AppError::Conflict(format!(
            "candidature {} was modified concurrently",
            application_id
        )));
    }

    match write_internship(store, &offer, &application).await {
        Ok((id, created)) => {
            info!(
                "Candidature {} accepted, stage {} {}",
                application_id,
                id,
                if created { "created" } else { "already present" }
            );
            Ok(StatusChange {
                application_id: application_id.to_string(),
                previous,
                current: target,
                internship_id: Some(id),
                internship_created: created,
            })
        }
        Err(e) => {
            error!(
                "Error creating stage for candidature {}: {}, restoring status",
                application_id, e
            );
            let restore = doc! {
                (fields::STATUS): &application.raw_status,
                (fields::UPDATED_AT): DateTime::now(),
            };
            let restored = store
                .update_where(
                    collections::APPLICATIONS,
                    application_id,
                    &Filter::new().eq(fields::STATUS, target.as_str()),
                    restore,
                )
                .await;
            match restored {
                Ok(true) => {}
                Ok(false) => warn!(
                    "Candidature {} changed again before its status could be restored",
                    application_id
                ),
                Err(re) => error!(
                    "Error restoring status of candidature {}: {}",
                    application_id, re
                ),
            }
            Err(e)
        }
    }
}

/// PUT /applications/{application_id}/status
///
/// Enterprise staff decide on applications to their own offers; students may
/// only withdraw their own; admins may do anything.
pub async fn update_status<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
    path: web::Path<String>,
    payload: web::Json<StatusUpdateRequest>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    let application_id = path.into_inner();
    let target = ApplicationStatus::parse(&payload.status);

    let application = load_application(data.store.as_ref(), &application_id).await?;
    match user.role {
        r if r.is_admin() => {}
        r if r.is_corporate() => {
            let owner = if application.entreprise_id.is_empty() {
                load_offer(data.store.as_ref(), &application).await?.entreprise_id
            } else {
                application.entreprise_id.clone()
            };
            ensure_enterprise_access(data.store.as_ref(), &user, &owner).await?;
        }
        Role::Student => {
            if user.id != application.etudiant_id || target != ApplicationStatus::Withdrawn {
                return Err(AppError::Forbidden(
                    "students may only withdraw their own candidatures".to_string(),
                ));
            }
        }
        _ => {
            return Err(AppError::Forbidden(
                "role cannot change candidature status".to_string(),
            ))
        }
    }

    let change = update_application_status(data.store.as_ref(), &application_id, target).await?;
    Ok(HttpResponse::Ok().json(change))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mongodb::bson::Document;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            collections::OFFERS,
            vec![doc! {
                "_id": "o1", "titre": "Stage Rust", "entrepriseId": "e1",
                "enterprise": { "companyName": "Acme" },
            }],
        );
        store.seed(
            collections::APPLICATIONS,
            vec![
                doc! { "_id": "c1", "offreId": "o1", "etudiantId": "st1", "universiteId": "u1", "statut": "pending" },
                doc! { "_id": "c2", "offreId": "o404", "etudiantId": "st2", "statut": "en_attente" },
                doc! { "_id": "c3", "offreId": "o1", "etudiantId": "st3", "statut": "refusée" },
                doc! { "_id": "c4", "offreId": "o1", "etudiantId": "st4" },
            ],
        );
        store
    }

    async fn status_of(store: &MemoryStore, id: &str) -> String {
        store
            .find_by_id(collections::APPLICATIONS, id)
            .await
            .unwrap()
            .unwrap()
            .get_str("statut")
            .unwrap_or("")
            .to_string()
    }

    async fn internships(store: &MemoryStore) -> Vec<Document> {
        store
            .find(collections::INTERNSHIPS, &Filter::new(), &FindOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn accepting_creates_one_internship() {
        let store = seeded();
        let change = update_application_status(&store, "c1", ApplicationStatus::Accepted)
            .await
            .unwrap();
        assert!(change.internship_created);
        assert_eq!(change.previous, ApplicationStatus::Pending);
        assert_eq!(status_of(&store, "c1").await, "acceptée");

        let stages = internships(&store).await;
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].get_str("candidatureId").unwrap(), "c1");
        assert_eq!(stages[0].get_str("universiteId").unwrap(), "u1");
        assert_eq!(stages[0].get_str("statut").unwrap(), "en_cours");
    }

    #[tokio::test]
    async fn accepting_twice_is_idempotent() {
        let store = seeded();
        let first = update_application_status(&store, "c1", ApplicationStatus::Accepted)
            .await
            .unwrap();
        let second = update_application_status(&store, "c1", ApplicationStatus::parse("accepted"))
            .await
            .unwrap();
        assert!(!second.internship_created);
        assert_eq!(first.internship_id, second.internship_id);
        assert_eq!(internships(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn missing_offer_leaves_status_unchanged() {
        let store = seeded();
        let err = update_application_status(&store, "c2", ApplicationStatus::parse("acceptée"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(status_of(&store, "c2").await, "en_attente");
        assert!(internships(&store).await.is_empty());
    }

    #[tokio::test]
    async fn refusing_only_patches_status() {
        let store = seeded();
        let change = update_application_status(&store, "c1", ApplicationStatus::Refused)
            .await
            .unwrap();
        assert_eq!(change.internship_id, None);
        assert_eq!(status_of(&store, "c1").await, "refusée");
        assert!(internships(&store).await.is_empty());
    }

    #[tokio::test]
    async fn terminal_states_do_not_move() {
        let store = seeded();
        let err = update_application_status(&store, "c3", ApplicationStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(status_of(&store, "c3").await, "refusée");
    }

    #[tokio::test]
    async fn unknown_target_is_rejected() {
        let store = seeded();
        let err = update_application_status(&store, "c1", ApplicationStatus::parse("maybe"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_status_field_can_be_accepted() {
        let store = seeded();
        update_application_status(&store, "c4", ApplicationStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(status_of(&store, "c4").await, "acceptée");
    }

    #[tokio::test]
    async fn unknown_application_is_not_found() {
        let store = seeded();
        let err = update_application_status(&store, "nope", ApplicationStatus::Accepted)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn accepted_without_internship_is_repaired() {
        let store = seeded();
        store.seed(
            collections::APPLICATIONS,
            vec![doc! { "_id": "c5", "offreId": "o1", "etudiantId": "st5", "statut": "accepted" }],
        );
        let change = update_application_status(&store, "c5", ApplicationStatus::Accepted)
            .await
            .unwrap();
        assert!(change.internship_created);
        assert_eq!(internships(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn legacy_internship_is_recognized() {
        let store = seeded();
        store.seed(
            collections::APPLICATIONS,
            vec![doc! { "_id": "c6", "offreId": "o1", "statut": "acceptée" }],
        );
        store.seed(
            collections::INTERNSHIPS,
            vec![doc! { "_id": "legacy-1", "candidatureId": "c6" }],
        );
        let change = update_application_status(&store, "c6", ApplicationStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(change.internship_id.as_deref(), Some("legacy-1"));
        assert!(!change.internship_created);
    }

    /// Delegates to a memory store but refuses internship inserts.
    struct FailingInserts(MemoryStore);

    impl DocumentStore for FailingInserts {
        async fn find(&self, c: &str, f: &Filter, o: &FindOptions) -> Result<Vec<Document>, AppError> {
            self.0.find(c, f, o).await
        }
        async fn find_by_id(&self, c: &str, id: &str) -> Result<Option<Document>, AppError> {
            self.0.find_by_id(c, id).await
        }
        async fn count(&self, c: &str, f: &Filter) -> Result<u64, AppError> {
            self.0.count(c, f).await
        }
        async fn insert(&self, c: &str, d: Document) -> Result<String, AppError> {
            if c == collections::INTERNSHIPS {
                return Err(AppError::Internal("write refused".into()));
            }
            self.0.insert(c, d).await
        }
        async fn update_where(
            &self,
            c: &str,
            id: &str,
            f: &Filter,
            p: Document,
        ) -> Result<bool, AppError> {
            self.0.update_where(c, id, f, p).await
        }
        async fn delete(&self, c: &str, id: &str) -> Result<bool, AppError> {
            self.0.delete(c, id).await
        }
    }

    #[tokio::test]
    async fn failed_internship_write_restores_status() {
        let store = FailingInserts(seeded());
        let err = update_application_status(&store, "c1", ApplicationStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(status_of(&store.0, "c1").await, "pending");
        assert!(internships(&store.0).await.is_empty());
    }
}
