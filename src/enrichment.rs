// src/enrichment.rs
//
// Foreign-key lookups that turn ids into display names.
//
// Lookups never fail: an absent key renders as an empty string, and a key
// that does not resolve (missing document or store error) renders as the raw
// id so the record still shows something traceable.

use futures::future::join_all;
use log::{error, warn};
use mongodb::bson::Document;
use serde::Serialize;

use crate::models::{fields, user::person_display_name, ApplicationStatus, InternshipStatus};
use crate::store::{collections, document_id, get_text, DocumentStore};

pub fn university_label(university: &Document) -> Option<String> {
    get_text(university, "nom")
        .or_else(|| get_text(university, "name"))
        .map(String::from)
}

pub fn enterprise_label(enterprise: &Document) -> Option<String> {
    get_text(enterprise, "companyName")
        .or_else(|| get_text(enterprise, "nom"))
        .or_else(|| get_text(enterprise, "name"))
        .map(String::from)
}

fn offer_label(offer: &Document) -> Option<String> {
    get_text(offer, "titre")
        .or_else(|| get_text(offer, "title"))
        .map(String::from)
}

/// Resolves `id` in `collection` and extracts a label from the document.
pub async fn resolve_label<S: DocumentStore>(
    store: &S,
    collection: &str,
    id: Option<&str>,
    label: fn(&Document) -> Option<String>,
) -> String {
    let id = match id.map(str::trim) {
        Some(id) if !id.is_empty() => id,
        _ => return String::new(),
    };
    match store.find_by_id(collection, id).await {
        Ok(Some(document)) => label(&document).unwrap_or_else(|| id.to_string()),
        Ok(None) => {
            warn!("{} '{}' not found, showing raw id", collection, id);
            id.to_string()
        }
        Err(e) => {
            error!("Error resolving {} '{}': {}", collection, id, e);
            id.to_string()
        }
    }
}

pub async fn university_name<S: DocumentStore>(store: &S, id: Option<&str>) -> String {
    resolve_label(store, collections::UNIVERSITIES, id, university_label).await
}

pub async fn enterprise_name<S: DocumentStore>(store: &S, id: Option<&str>) -> String {
    resolve_label(store, collections::ENTERPRISES, id, enterprise_label).await
}

pub async fn person_name<S: DocumentStore>(store: &S, id: Option<&str>) -> String {
    resolve_label(store, collections::USERS, id, person_display_name).await
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternshipView {
    pub id: String,
    pub titre: String,
    pub statut: InternshipStatus,
    pub program: String,
    pub university_id: String,
    pub university_name: String,
    pub student_id: String,
    pub student_name: String,
    pub enterprise_id: String,
    pub enterprise_name: String,
}

/// Internship document with its university, student and enterprise names.
pub async fn enrich_internship<S: DocumentStore>(store: &S, internship: &Document) -> InternshipView {
    let university_id = get_text(internship, fields::UNIVERSITY_ID);
    let student_id = get_text(internship, fields::STUDENT_ID);
    let enterprise_id = get_text(internship, fields::ENTERPRISE_ID);

    // Internships usually embed the enterprise; only look it up when they don't.
    let embedded_enterprise = get_text(internship, fields::ENTERPRISE_NAME)
        .or_else(|| get_text(internship, fields::ENTERPRISE_NAME_FR))
        .map(String::from);

    let (university_name, student_name, enterprise_name) = futures::join!(
        university_name(store, university_id),
        person_name(store, student_id),
        async {
            match embedded_enterprise {
                Some(name) => name,
                None => enterprise_name(store, enterprise_id).await,
            }
        },
    );

    InternshipView {
        id: document_id(internship).unwrap_or_default(),
        titre: get_text(internship, "titre").unwrap_or_default().to_string(),
        statut: InternshipStatus::parse(get_text(internship, fields::STATUS).unwrap_or("")),
        program: get_text(internship, fields::PROGRAM).unwrap_or_default().to_string(),
        university_id: university_id.unwrap_or_default().to_string(),
        university_name,
        student_id: student_id.unwrap_or_default().to_string(),
        student_name,
        enterprise_id: enterprise_id.unwrap_or_default().to_string(),
        enterprise_name,
    }
}

pub async fn enrich_internships<S: DocumentStore>(
    store: &S,
    internships: &[Document],
) -> Vec<InternshipView> {
    join_all(internships.iter().map(|d| enrich_internship(store, d))).await
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationView {
    pub id: String,
    pub statut: ApplicationStatus,
    pub offer_id: String,
    pub offer_title: String,
    pub student_name: String,
    pub enterprise_name: String,
}

pub async fn enrich_application<S: DocumentStore>(
    store: &S,
    application: &Document,
) -> ApplicationView {
    let offer_id = get_text(application, fields::OFFER_ID);
    let (offer_title, student_name, enterprise_name) = futures::join!(
        resolve_label(store, collections::OFFERS, offer_id, offer_label),
        person_name(store, get_text(application, fields::STUDENT_ID)),
        enterprise_name(store, get_text(application, fields::ENTERPRISE_ID)),
    );
    ApplicationView {
        id: document_id(application).unwrap_or_default(),
        statut: ApplicationStatus::parse(get_text(application, fields::STATUS).unwrap_or("")),
        offer_id: offer_id.unwrap_or_default().to_string(),
        offer_title,
        student_name,
        enterprise_name,
    }
}
