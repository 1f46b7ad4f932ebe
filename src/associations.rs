// src/associations.rs
//
// Enterprise–university partnership requests. An enterprise asks to become a
// partner of a university; the university's staff accept or reject it.

use actix_web::{web, HttpRequest, HttpResponse};
use log::{error, info, warn};
use mongodb::bson::{doc, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::{current_user, ensure_enterprise_access, ensure_university_access};
use crate::enrichment::enterprise_name;
use crate::error::AppError;
use crate::models::{fields, AssociationStatus};
use crate::store::{collections, document_id, get_text, DocumentStore, Filter, FindOptions, SortOrder};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    pub id: String,
    pub entreprise_id: String,
    pub universite_id: String,
    pub statut: AssociationStatus,
}

impl Association {
    fn from_document(document: &Document) -> Self {
        Self {
            id: document_id(document).unwrap_or_default(),
            entreprise_id: get_text(document, fields::ENTERPRISE_ID).unwrap_or_default().to_string(),
            universite_id: get_text(document, fields::UNIVERSITY_ID).unwrap_or_default().to_string(),
            statut: AssociationStatus::parse(get_text(document, fields::STATUS).unwrap_or("")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationView {
    #[serde(flatten)]
    pub association: Association,
    pub enterprise_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

async fn associations_where<S: DocumentStore>(
    store: &S,
    filter: &Filter,
) -> Result<Vec<Association>, AppError> {
    let documents = store
        .find(
            collections::ASSOCIATIONS,
            filter,
            &FindOptions::sorted(fields::CREATED_AT, SortOrder::Desc),
        )
        .await?;
    Ok(documents.iter().map(Association::from_document).collect())
}

/// An enterprise belongs to at most one university: it may not be linked
/// already, nor hold an accepted association with any university other than
/// through `except`.
async fn ensure_unlinked<S: DocumentStore>(
    store: &S,
    entreprise_id: &str,
    except: Option<&str>,
) -> Result<(), AppError> {
    let enterprise = store
        .find_by_id(collections::ENTERPRISES, entreprise_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("entreprise {}", entreprise_id)))?;
    if let Some(linked) = get_text(&enterprise, fields::UNIVERSITY_ID) {
        return Err(AppError::Conflict(format!(
            "entreprise {} is already associated with universite {}",
            entreprise_id, linked
        )));
    }

    let accepted = associations_where(store, &Filter::new().eq(fields::ENTERPRISE_ID, entreprise_id))
        .await?
        .into_iter()
        .find(|a| a.statut == AssociationStatus::Accepted && Some(a.id.as_str()) != except);
    match accepted {
        Some(a) => Err(AppError::Conflict(format!(
            "entreprise {} is already associated with universite {}",
            entreprise_id, a.universite_id
        ))),
        None => Ok(()),
    }
}

pub async fn request_association<S: DocumentStore>(
    store: &S,
    entreprise_id: &str,
    universite_id: &str,
) -> Result<Association, AppError> {
    if store.find_by_id(collections::UNIVERSITIES, universite_id).await?.is_none() {
        return Err(AppError::NotFound(format!("universite {}", universite_id)));
    }
    ensure_unlinked(store, entreprise_id, None).await?;

    let pending = associations_where(
        store,
        &Filter::new()
            .eq(fields::ENTERPRISE_ID, entreprise_id)
            .eq(fields::UNIVERSITY_ID, universite_id),
    )
    .await?
    .into_iter()
    .any(|a| a.statut == AssociationStatus::Pending);
    if pending {
        return Err(AppError::Conflict(format!(
            "entreprise {} already has a pending association with universite {}",
            entreprise_id, universite_id
        )));
    }

    let id = store
        .insert(
            collections::ASSOCIATIONS,
            doc! {
                (fields::ENTERPRISE_ID): entreprise_id,
                (fields::UNIVERSITY_ID): universite_id,
                (fields::STATUS): AssociationStatus::Pending.as_str(),
                (fields::CREATED_AT): DateTime::now(),
            },
        )
        .await?;
    info!(
        "Association {} requested: entreprise {} -> universite {}",
        id, entreprise_id, universite_id
    );
    Ok(Association {
        id,
        entreprise_id: entreprise_id.to_string(),
        universite_id: universite_id.to_string(),
        statut: AssociationStatus::Pending,
    })
}

async fn load_association<S: DocumentStore>(store: &S, id: &str) -> Result<(Association, String), AppError> {
    let document = store
        .find_by_id(collections::ASSOCIATIONS, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("association {}", id)))?;
    let raw = get_text(&document, fields::STATUS).unwrap_or_default().to_string();
    Ok((Association::from_document(&document), raw))
}

/// Puts an association back to `raw` after a failed accept.
async fn restore_status<S: DocumentStore>(store: &S, association_id: &str, target: &AssociationStatus, raw: &str) {
    let restored = store
        .update_where(
            collections::ASSOCIATIONS,
            association_id,
            &Filter::new().eq(fields::STATUS, target.as_str()),
            doc! { (fields::STATUS): raw, "respondedAt": Bson::Null },
        )
        .await;
    match restored {
        Ok(true) => {}
        Ok(false) => warn!(
            "Association {} changed again before its status could be restored",
            association_id
        ),
        Err(e) => error!("Error restoring status of association {}: {}", association_id, e),
    }
}

/// Accepts or rejects a pending association. Accepting links the enterprise
/// to the university; if that link cannot be written the association stays
/// pending.
pub async fn respond_association<S: DocumentStore>(
    store: &S,
    association_id: &str,
    decision: Decision,
) -> Result<Association, AppError> {
    let (association, raw_status) = load_association(store, association_id).await?;
    if association.statut != AssociationStatus::Pending {
        return Err(AppError::InvalidTransition(format!(
            "association is already {}",
            association.statut.as_str()
        )));
    }

    let target = match decision {
        Decision::Accept => AssociationStatus::Accepted,
        Decision::Reject => AssociationStatus::Rejected,
    };
    if target == AssociationStatus::Accepted {
        ensure_unlinked(store, &association.entreprise_id, Some(association_id)).await?;
    }

    let swapped = store
        .update_where(
            collections::ASSOCIATIONS,
            association_id,
            &Filter::new().eq(fields::STATUS, raw_status.as_str()),
            doc! {
                (fields::STATUS): target.as_str(),
                "respondedAt": DateTime::now(),
            },
        )
        .await?;
    if !swapped {
        return Err(AppError::Conflict(format!(
            "association {} was answered concurrently",
            association_id
        )));
    }

    if target == AssociationStatus::Accepted {
        let unlinked = Filter::new().is_in(
            fields::UNIVERSITY_ID,
            [Bson::Null, Bson::String(String::new())],
        );
        let linked = store
            .update_where(
                collections::ENTERPRISES,
                &association.entreprise_id,
                &unlinked,
                doc! { (fields::UNIVERSITY_ID): &association.universite_id },
            )
            .await;
        match linked {
            Ok(true) => {}
            Ok(false) => {
                restore_status(store, association_id, &target, &raw_status).await;
                return Err(AppError::Conflict(format!(
                    "entreprise {} is gone or was linked concurrently",
                    association.entreprise_id
                )));
            }
            Err(e) => {
                error!(
                    "Error linking entreprise {} to universite {}: {}, restoring association",
                    association.entreprise_id, association.universite_id, e
                );
                restore_status(store, association_id, &target, &raw_status).await;
                return Err(e);
            }
        }
    }
    info!("Association {} {}", association_id, target.as_str());

    Ok(Association {
        statut: target,
        ..association
    })
}

pub async fn list_associations<S: DocumentStore>(
    store: &S,
    universite_id: &str,
    status: Option<AssociationStatus>,
) -> Result<Vec<AssociationView>, AppError> {
    let mut associations =
        associations_where(store, &Filter::new().eq(fields::UNIVERSITY_ID, universite_id)).await?;
    if let Some(status) = status {
        associations.retain(|a| a.statut == status);
    }

    let mut views = Vec::with_capacity(associations.len());
    for association in associations {
        let name = enterprise_name(store, Some(&association.entreprise_id)).await;
        views.push(AssociationView {
            association,
            enterprise_name: name,
        });
    }
    Ok(views)
}

// ─── HANDLERS ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationRequest {
    pub entreprise_id: String,
    pub universite_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AssociationResponse {
    pub decision: Decision,
}

#[derive(Debug, Deserialize)]
pub struct AssociationQuery {
    pub statut: Option<String>,
}

/// POST /associations
pub async fn create_association<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
    payload: web::Json<AssociationRequest>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    ensure_enterprise_access(data.store.as_ref(), &user, &payload.entreprise_id).await?;
    let association =
        request_association(data.store.as_ref(), &payload.entreprise_id, &payload.universite_id).await?;
    Ok(HttpResponse::Created().json(association))
}

/// PUT /associations/{association_id}
pub async fn answer_association<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
    path: web::Path<String>,
    payload: web::Json<AssociationResponse>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    let association_id = path.into_inner();
    let (association, _) = load_association(data.store.as_ref(), &association_id).await?;
    ensure_university_access(data.store.as_ref(), &user, &association.universite_id).await?;

    let updated = respond_association(data.store.as_ref(), &association_id, payload.decision).await?;
    Ok(HttpResponse::Ok().json(updated))
}

/// GET /universities/{universite_id}/associations
pub async fn university_associations<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
    path: web::Path<String>,
    query: web::Query<AssociationQuery>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    let universite_id = path.into_inner();
    ensure_university_access(data.store.as_ref(), &user, &universite_id).await?;

    let status = query.statut.as_deref().map(AssociationStatus::parse);
    let views = list_associations(data.store.as_ref(), &universite_id, status).await?;
    Ok(HttpResponse::Ok().json(views))
}
