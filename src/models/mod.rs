pub mod status;
pub mod user;

use mongodb::bson::{doc, Bson, DateTime, Document};
use serde::Serialize;
use uuid::Uuid;

use crate::store::{document_id, get_path, get_text};
pub use status::{ApplicationStatus, AssociationStatus, InternshipStatus};
pub use user::Role;

/// Field names shared by several collections.
pub mod fields {
    pub const STATUS: &str = "statut";
    pub const UNIVERSITY_ID: &str = "universiteId";
    pub const ENTERPRISE_ID: &str = "entrepriseId";
    pub const STUDENT_ID: &str = "etudiantId";
    pub const OFFER_ID: &str = "offreId";
    pub const APPLICATION_ID: &str = "candidatureId";
    pub const ROLE: &str = "role";
    pub const PROGRAM: &str = "program";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const ENTERPRISE_NAME: &str = "enterprise.companyName";
    pub const ENTERPRISE_NAME_FR: &str = "enterprise.nom";
    pub const OVERALL_SCORE: &str = "noteGlobale";
    pub const CRITERIA: &str = "criteres";
}

/// Fixed namespace for ids of internships derived from an application.
const INTERNSHIP_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_0e3a_55a4_4b8e_9d0e_2f7c_41a8_b3d2);

fn text(document: &Document, path: &str) -> String {
    get_text(document, path).unwrap_or_default().to_string()
}

/// An internship offer posted by an enterprise.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: String,
    pub titre: String,
    pub description: String,
    pub entreprise_id: String,
    pub universite_id: String,
    pub lieu: String,
    pub statut: InternshipStatus,
    #[serde(skip)]
    raw: Document,
}

impl Offer {
    pub fn from_document(document: Document) -> Self {
        Self {
            id: document_id(&document).unwrap_or_default(),
            titre: text(&document, "titre"),
            description: text(&document, "description"),
            entreprise_id: text(&document, fields::ENTERPRISE_ID),
            universite_id: text(&document, fields::UNIVERSITY_ID),
            lieu: text(&document, "lieu"),
            statut: InternshipStatus::parse(get_text(&document, fields::STATUS).unwrap_or("")),
            raw: document,
        }
    }

    /// Field as stored, whatever its type (dates, nested enterprise).
    pub fn raw_field(&self, path: &str) -> Option<&Bson> {
        get_path(&self.raw, path)
    }
}

/// A student's application to an offer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub offre_id: String,
    pub etudiant_id: String,
    pub entreprise_id: String,
    pub universite_id: String,
    pub program: String,
    /// Status token exactly as stored, used for compare-and-swap writes.
    pub raw_status: String,
    pub statut: ApplicationStatus,
}

impl Application {
    pub fn from_document(document: &Document) -> Self {
        let raw_status = match get_path(document, fields::STATUS) {
            Some(Bson::String(s)) => s.clone(),
            _ => String::new(),
        };
        Self {
            id: document_id(document).unwrap_or_default(),
            offre_id: text(document, fields::OFFER_ID),
            etudiant_id: text(document, fields::STUDENT_ID),
            entreprise_id: text(document, fields::ENTERPRISE_ID),
            universite_id: text(document, fields::UNIVERSITY_ID),
            program: text(document, fields::PROGRAM),
            statut: ApplicationStatus::parse(&raw_status),
            raw_status,
        }
    }
}

/// Internship record created when an application is accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInternship {
    pub id: String,
    pub titre: String,
    pub entreprise_id: String,
    pub universite_id: String,
    pub etudiant_id: String,
    pub offre_id: String,
    pub candidature_id: String,
    pub program: String,
    pub statut: InternshipStatus,
}

impl NewInternship {
    /// Id of the internship an application produces; stable across retries.
    pub fn id_for_application(application_id: &str) -> String {
        Uuid::new_v5(&INTERNSHIP_NAMESPACE, application_id.as_bytes()).to_string()
    }

    /// Copies offer fields, filling gaps from the application.
    pub fn from_acceptance(offer: &Offer, application: &Application) -> Self {
        let pick = |a: &str, b: &str| if a.is_empty() { b.to_string() } else { a.to_string() };
        Self {
            id: Self::id_for_application(&application.id),
            titre: offer.titre.clone(),
            entreprise_id: pick(&offer.entreprise_id, &application.entreprise_id),
            universite_id: pick(&application.universite_id, &offer.universite_id),
            etudiant_id: application.etudiant_id.clone(),
            offre_id: pick(&offer.id, &application.offre_id),
            candidature_id: application.id.clone(),
            program: application.program.clone(),
            statut: InternshipStatus::InProgress,
        }
    }

    pub fn to_document(&self, offer: &Offer) -> Document {
        let mut d = doc! {
            "_id": &self.id,
            "titre": &self.titre,
            "description": &offer.description,
            "lieu": &offer.lieu,
            (fields::ENTERPRISE_ID): &self.entreprise_id,
            (fields::UNIVERSITY_ID): &self.universite_id,
            (fields::STUDENT_ID): &self.etudiant_id,
            (fields::OFFER_ID): &self.offre_id,
            (fields::APPLICATION_ID): &self.candidature_id,
            (fields::PROGRAM): &self.program,
            (fields::STATUS): self.statut.as_str(),
            (fields::CREATED_AT): DateTime::now(),
        };
        for key in ["enterprise", "dateDebut", "dateFin", "duree", "remuneration"] {
            if let Some(value) = offer.raw_field(key) {
                d.insert(key, value.clone());
            }
        }
        d
    }
}
