// src/lib.rs

pub mod aggregation;
pub mod app_state;
pub mod applications;
pub mod associations;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod enrichment;
pub mod error;
pub mod evaluations;
pub mod internships;
pub mod models;
pub mod store;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::applications::update_status;
use crate::associations::{answer_association, create_association, university_associations};
use crate::dashboard::{
    get_admin_dashboard, get_enterprise_dashboard, get_student_dashboard,
    get_university_dashboard, run_aggregation,
};
use crate::internships::{get_internship, list_university_internships};
use crate::store::DocumentStore;

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Registers every route against the store type `S`.
pub fn configure<S: DocumentStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/aggregate", web::post().to(run_aggregation::<S>))
        // DASHBOARDS
        .service(
            web::scope("/dashboard")
                .route("/admin", web::get().to(get_admin_dashboard::<S>))
                .route("/university/{universite_id}", web::get().to(get_university_dashboard::<S>))
                .route("/enterprise/{entreprise_id}", web::get().to(get_enterprise_dashboard::<S>))
                .route("/student/{student_id}", web::get().to(get_student_dashboard::<S>)),
        )
        // INTERNSHIPS
        .service(
            web::scope("/internships")
                .route("/{internship_id}", web::get().to(get_internship::<S>)),
        )
        // APPLICATIONS
        .service(
            web::scope("/applications")
                .route("/{application_id}/status", web::put().to(update_status::<S>)),
        )
        // ASSOCIATIONS
        .service(
            web::scope("/associations")
                .route("", web::post().to(create_association::<S>))
                .route("/{association_id}", web::put().to(answer_association::<S>)),
        )
        // UNIVERSITIES
        .service(
            web::scope("/universities/{universite_id}")
                .route("/internships", web::get().to(list_university_internships::<S>))
                .route("/associations", web::get().to(university_associations::<S>)),
        );
}
