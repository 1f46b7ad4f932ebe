// src/dashboard.rs
//
// Role dashboards. Each statistic is an independent query fanned out in
// parallel; one failing query marks only its own field as failed.

use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use mongodb::bson::Document;
use serde::Serialize;

use crate::aggregation::{
    aggregate, count, percentage, AggregationSpec, Breakdown, Fetched, GroupKey,
};
use crate::app_state::AppState;
use crate::auth::{
    current_user, ensure_admin, ensure_enterprise_access, ensure_university_access, load_scope,
    CurrentUser,
};
use crate::enrichment::{
    enrich_application, enrich_internship, university_name, ApplicationView, InternshipView,
};
use crate::error::AppError;
use crate::evaluations::{evaluation_summary, EvaluationSummary};
use crate::models::{fields, ApplicationStatus, InternshipStatus, Role};
use crate::store::{collections, get_text, DocumentStore, Filter, FindOptions, SortOrder};

const RECENT_APPLICATIONS: i64 = 10;

fn internship_status_key() -> GroupKey {
    GroupKey::InternshipStatus {
        path: fields::STATUS.to_string(),
    }
}

fn application_status_key() -> GroupKey {
    GroupKey::ApplicationStatus {
        path: fields::STATUS.to_string(),
    }
}

fn role_key() -> GroupKey {
    GroupKey::Role {
        path: fields::ROLE.to_string(),
    }
}

/// Count of one normalized category of a breakdown.
fn bucket_count(breakdown: &Fetched<Breakdown>, label: &str) -> Fetched<u64> {
    breakdown.derive(|b| b.count_of(label))
}

/// Share of accepted applications in a status breakdown.
fn acceptance_rate(statuses: &Fetched<Breakdown>) -> Fetched<f64> {
    statuses.derive(|b| percentage(b.count_of(ApplicationStatus::Accepted.as_str()), b.total))
}

// ─── UNIVERSITY ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniversityDashboard {
    pub university_id: String,
    pub university_name: String,
    pub students: Fetched<u64>,
    pub teachers: Fetched<u64>,
    pub partner_enterprises: Fetched<u64>,
    pub internships_in_progress: Fetched<u64>,
    pub internship_statuses: Fetched<Breakdown>,
    pub top_enterprises: Fetched<Breakdown>,
    pub top_programs: Fetched<Breakdown>,
    pub application_statuses: Fetched<Breakdown>,
    pub acceptance_rate: Fetched<f64>,
    pub monthly_applications: Fetched<Breakdown>,
    pub evaluations: Fetched<EvaluationSummary>,
}

pub async fn university_dashboard<S: DocumentStore>(
    store: &S,
    universite_id: &str,
    top_n: usize,
) -> UniversityDashboard {
    let scope = Filter::new().eq(fields::UNIVERSITY_ID, universite_id);
    let roles_spec = AggregationSpec::new(collections::USERS, scope.clone(), role_key());
    let statuses_spec =
        AggregationSpec::new(collections::INTERNSHIPS, scope.clone(), internship_status_key());
    let enterprises_spec =
        AggregationSpec::new(collections::INTERNSHIPS, scope.clone(), GroupKey::enterprise_name())
            .top(top_n);
    let programs_spec = AggregationSpec::new(
        collections::INTERNSHIPS,
        scope.clone(),
        GroupKey::field(fields::PROGRAM),
    )
    .top(top_n);
    let applications_spec =
        AggregationSpec::new(collections::APPLICATIONS, scope.clone(), application_status_key());
    let monthly_spec = AggregationSpec::new(
        collections::APPLICATIONS,
        scope.clone(),
        GroupKey::month(fields::CREATED_AT),
    );

    let (
        name,
        roles,
        partners,
        statuses,
        enterprises,
        programs,
        applications,
        monthly,
        evaluations,
    ) = futures::join!(
        university_name(store, Some(universite_id)),
        aggregate(store, &roles_spec),
        count(store, collections::ENTERPRISES, &scope),
        aggregate(store, &statuses_spec),
        aggregate(store, &enterprises_spec),
        aggregate(store, &programs_spec),
        aggregate(store, &applications_spec),
        aggregate(store, &monthly_spec),
        evaluation_summary(store, &scope),
    );

    let roles = Fetched::from_result("users by role", roles);
    let internship_statuses = Fetched::from_result("internship statuses", statuses);
    let application_statuses = Fetched::from_result("application statuses", applications);
    UniversityDashboard {
        university_id: universite_id.to_string(),
        university_name: name,
        students: bucket_count(&roles, Role::Student.as_str()),
        teachers: bucket_count(&roles, Role::Teacher.as_str()),
        partner_enterprises: Fetched::from_result("partner count", partners),
        internships_in_progress: bucket_count(
            &internship_statuses,
            InternshipStatus::InProgress.as_str(),
        ),
        internship_statuses,
        top_enterprises: Fetched::from_result("top enterprises", enterprises),
        top_programs: Fetched::from_result("top programs", programs),
        acceptance_rate: acceptance_rate(&application_statuses),
        application_statuses,
        monthly_applications: Fetched::from_result("monthly applications", monthly),
        evaluations: Fetched::from_result("evaluations", evaluations),
    }
}

// ─── ENTERPRISE ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterpriseDashboard {
    pub enterprise_id: String,
    pub offer_statuses: Fetched<Breakdown>,
    pub application_statuses: Fetched<Breakdown>,
    pub acceptance_rate: Fetched<f64>,
    pub internship_statuses: Fetched<Breakdown>,
    pub active_interns: Fetched<u64>,
    pub top_programs: Fetched<Breakdown>,
    pub monthly_applications: Fetched<Breakdown>,
    pub evaluations: Fetched<EvaluationSummary>,
}

pub async fn enterprise_dashboard<S: DocumentStore>(
    store: &S,
    entreprise_id: &str,
    top_n: usize,
) -> EnterpriseDashboard {
    let scope = Filter::new().eq(fields::ENTERPRISE_ID, entreprise_id);

    let offers_spec =
        AggregationSpec::new(collections::OFFERS, scope.clone(), internship_status_key());
    let applications_spec =
        AggregationSpec::new(collections::APPLICATIONS, scope.clone(), application_status_key());
    let internships_spec =
        AggregationSpec::new(collections::INTERNSHIPS, scope.clone(), internship_status_key());
    let programs_spec = AggregationSpec::new(
        collections::APPLICATIONS,
        scope.clone(),
        GroupKey::field(fields::PROGRAM),
    )
    .top(top_n);
    let monthly_spec = AggregationSpec::new(
        collections::APPLICATIONS,
        scope.clone(),
        GroupKey::month(fields::CREATED_AT),
    );

    let (offers, applications, internships, programs, monthly, evaluations) = futures::join!(
        aggregate(store, &offers_spec),
        aggregate(store, &applications_spec),
        aggregate(store, &internships_spec),
        aggregate(store, &programs_spec),
        aggregate(store, &monthly_spec),
        evaluation_summary(store, &scope),
    );

    let application_statuses = Fetched::from_result("application statuses", applications);
    let internship_statuses = Fetched::from_result("internship statuses", internships);
    EnterpriseDashboard {
        enterprise_id: entreprise_id.to_string(),
        offer_statuses: Fetched::from_result("offer statuses", offers),
        acceptance_rate: acceptance_rate(&application_statuses),
        application_statuses,
        active_interns: bucket_count(&internship_statuses, InternshipStatus::InProgress.as_str()),
        internship_statuses,
        top_programs: Fetched::from_result("top programs", programs),
        monthly_applications: Fetched::from_result("monthly applications", monthly),
        evaluations: Fetched::from_result("evaluations", evaluations),
    }
}

// ─── STUDENT ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDashboard {
    pub student_id: String,
    pub application_statuses: Fetched<Breakdown>,
    pub recent_applications: Fetched<Vec<ApplicationView>>,
    pub current_internship: Fetched<Option<InternshipView>>,
}

async fn recent_applications<S: DocumentStore>(
    store: &S,
    scope: &Filter,
) -> Result<Vec<ApplicationView>, AppError> {
    let documents = store
        .find(
            collections::APPLICATIONS,
            scope,
            &FindOptions::sorted(fields::CREATED_AT, SortOrder::Desc).limit(RECENT_APPLICATIONS),
        )
        .await?;
    let mut views = Vec::with_capacity(documents.len());
    for document in &documents {
        views.push(enrich_application(store, document).await);
    }
    Ok(views)
}

/// The running internship if any, else the most recent one.
async fn current_internship<S: DocumentStore>(
    store: &S,
    scope: &Filter,
) -> Result<Option<InternshipView>, AppError> {
    let documents = store
        .find(
            collections::INTERNSHIPS,
            scope,
            &FindOptions::sorted(fields::CREATED_AT, SortOrder::Desc),
        )
        .await?;
    let chosen: Option<&Document> = documents
        .iter()
        .find(|d| {
            InternshipStatus::parse(get_text(d, fields::STATUS).unwrap_or(""))
                == InternshipStatus::InProgress
        })
        .or_else(|| documents.first());
    match chosen {
        Some(document) => Ok(Some(enrich_internship(store, document).await)),
        None => Ok(None),
    }
}

pub async fn student_dashboard<S: DocumentStore>(store: &S, student_id: &str) -> StudentDashboard {
    let scope = Filter::new().eq(fields::STUDENT_ID, student_id);
    let statuses_spec =
        AggregationSpec::new(collections::APPLICATIONS, scope.clone(), application_status_key());

    let (statuses, recent, current) = futures::join!(
        aggregate(store, &statuses_spec),
        recent_applications(store, &scope),
        current_internship(store, &scope),
    );

    StudentDashboard {
        student_id: student_id.to_string(),
        application_statuses: Fetched::from_result("application statuses", statuses),
        recent_applications: Fetched::from_result("recent applications", recent),
        current_internship: Fetched::from_result("current internship", current),
    }
}

// ─── ADMIN ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDashboard {
    pub users_by_role: Fetched<Breakdown>,
    pub universities: Fetched<u64>,
    pub enterprises: Fetched<u64>,
    pub association_statuses: Fetched<Breakdown>,
    pub internship_statuses: Fetched<Breakdown>,
    pub monthly_registrations: Fetched<Breakdown>,
}

pub async fn admin_dashboard<S: DocumentStore>(store: &S) -> AdminDashboard {
    let all = Filter::new();
    let roles_spec = AggregationSpec::new(
        collections::USERS,
        all.clone(),
        GroupKey::Role {
            path: fields::ROLE.to_string(),
        },
    )
    .keep_empty();
    let associations_spec = AggregationSpec::new(
        collections::ASSOCIATIONS,
        all.clone(),
        GroupKey::AssociationStatus {
            path: fields::STATUS.to_string(),
        },
    )
    .keep_empty();
    let internships_spec =
        AggregationSpec::new(collections::INTERNSHIPS, all.clone(), internship_status_key());
    let registrations_spec = AggregationSpec::new(
        collections::USERS,
        all.clone(),
        GroupKey::month(fields::CREATED_AT),
    );

    let (roles, universities, enterprises, associations, internships, registrations) = futures::join!(
        aggregate(store, &roles_spec),
        count(store, collections::UNIVERSITIES, &all),
        count(store, collections::ENTERPRISES, &all),
        aggregate(store, &associations_spec),
        aggregate(store, &internships_spec),
        aggregate(store, &registrations_spec),
    );

    AdminDashboard {
        users_by_role: Fetched::from_result("users by role", roles),
        universities: Fetched::from_result("university count", universities),
        enterprises: Fetched::from_result("enterprise count", enterprises),
        association_statuses: Fetched::from_result("association statuses", associations),
        internship_statuses: Fetched::from_result("internship statuses", internships),
        monthly_registrations: Fetched::from_result("monthly registrations", registrations),
    }
}

// ─── HANDLERS ─────────────────────────────────────────────────────────────────

/// GET /dashboard/university/{universite_id}
pub async fn get_university_dashboard<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    let universite_id = path.into_inner();
    ensure_university_access(data.store.as_ref(), &user, &universite_id).await?;

    let dashboard =
        university_dashboard(data.store.as_ref(), &universite_id, data.config.dashboard_top_n).await;
    Ok(HttpResponse::Ok().json(dashboard))
}

/// GET /dashboard/enterprise/{entreprise_id}
pub async fn get_enterprise_dashboard<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    let entreprise_id = path.into_inner();
    ensure_enterprise_access(data.store.as_ref(), &user, &entreprise_id).await?;

    let dashboard =
        enterprise_dashboard(data.store.as_ref(), &entreprise_id, data.config.dashboard_top_n).await;
    Ok(HttpResponse::Ok().json(dashboard))
}

/// GET /dashboard/student/{student_id}
pub async fn get_student_dashboard<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    let student_id = path.into_inner();
    if !user.role.is_admin() && !(user.role == Role::Student && user.id == student_id) {
        return Err(AppError::Forbidden(
            "students can only view their own dashboard".to_string(),
        ));
    }
    Ok(HttpResponse::Ok().json(student_dashboard(data.store.as_ref(), &student_id).await))
}

/// GET /dashboard/admin
pub async fn get_admin_dashboard<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    ensure_admin(&user)?;
    Ok(HttpResponse::Ok().json(admin_dashboard(data.store.as_ref()).await))
}

/// Narrows an ad hoc aggregation to what the caller may see.
async fn scoped_spec<S: DocumentStore>(
    store: &S,
    user: &CurrentUser,
    mut spec: AggregationSpec,
) -> Result<AggregationSpec, AppError> {
    if !collections::ALL.contains(&spec.collection.as_str()) {
        return Err(AppError::Validation(format!(
            "unknown collection '{}'",
            spec.collection
        )));
    }
    if user.role.is_admin() {
        return Ok(spec);
    }
    let scope = load_scope(store, user).await?;
    let restricted = if user.role.is_academic() {
        scope
            .universite_id
            .map(|id| (fields::UNIVERSITY_ID, id))
    } else if user.role.is_corporate() {
        scope
            .entreprise_id
            .map(|id| (fields::ENTERPRISE_ID, id))
    } else {
        None
    };
    match restricted {
        Some((field, id)) => {
            spec.scope = spec.scope.eq(field, id);
            Ok(spec)
        }
        None => Err(AppError::Forbidden(
            "role cannot run aggregations".to_string(),
        )),
    }
}

/// POST /aggregate
pub async fn run_aggregation<S: DocumentStore + 'static>(
    req: HttpRequest,
    data: web::Data<AppState<S>>,
    payload: web::Json<AggregationSpec>,
) -> Result<HttpResponse, AppError> {
    let user = current_user(&req)?;
    let spec = scoped_spec(data.store.as_ref(), &user, payload.into_inner()).await?;
    info!(
        "Aggregation on '{}' requested by {} ({})",
        spec.collection,
        user.id,
        user.role.as_str()
    );
    let breakdown = aggregate(data.store.as_ref(), &spec).await?;
    Ok(HttpResponse::Ok().json(breakdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mongodb::bson::doc;

    fn campus() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(collections::UNIVERSITIES, vec![doc! { "_id": "U", "nom": "Université U" }]);
        store.seed(
            collections::USERS,
            vec![
                doc! { "_id": "s1", "role": "student", "universiteId": "U", "prenom": "Lea", "nom": "Martin" },
                doc! { "_id": "s2", "role": "etudiant", "universiteId": "U" },
                doc! { "_id": "t1", "role": "teacher", "universiteId": "U" },
                doc! { "_id": "a1", "role": "admin" },
            ],
        );
        store.seed(
            collections::ENTERPRISES,
            vec![doc! { "_id": "e1", "companyName": "A", "universiteId": "U" }],
        );
        store.seed(
            collections::INTERNSHIPS,
            vec![
                doc! { "_id": "i1", "universiteId": "U", "statut": "en_cours", "etudiantId": "s1",
                       "enterprise": { "companyName": "A" }, "program": "Info", "entrepriseId": "e1" },
                doc! { "_id": "i2", "universiteId": "U", "statut": "en_cours",
                       "enterprise": { "companyName": "A" }, "program": "Info" },
                doc! { "_id": "i3", "universiteId": "U", "statut": "termine",
                       "enterprise": { "nom": "B" }, "program": "Maths" },
            ],
        );
        store.seed(
            collections::APPLICATIONS,
            vec![
                doc! { "_id": "c1", "universiteId": "U", "entrepriseId": "e1", "etudiantId": "s1",
                       "statut": "acceptée", "createdAt": "2024-02-10", "program": "Info" },
                doc! { "_id": "c2", "universiteId": "U", "entrepriseId": "e1", "etudiantId": "s2",
                       "statut": "pending", "createdAt": "2024-03-01", "program": "Maths" },
                doc! { "_id": "c3", "universiteId": "U", "entrepriseId": "e1", "etudiantId": "s1",
                       "statut": "refused", "createdAt": "2024-03-15", "program": "Info" },
                doc! { "_id": "c4", "universiteId": "U", "entrepriseId": "e1", "etudiantId": "s2",
                       "statut": "accepted", "createdAt": "2024-03-20", "program": "Maths" },
            ],
        );
        store.seed(
            collections::EVALUATIONS,
            vec![doc! { "universiteId": "U", "entrepriseId": "e1", "noteGlobale": 15 }],
        );
        store
    }

    #[tokio::test]
    async fn university_dashboard_counts() {
        let store = campus();
        let d = university_dashboard(&store, "U", 5).await;
        assert_eq!(d.university_name, "Université U");
        assert_eq!(d.students.value(), Some(&2));
        assert_eq!(d.teachers.value(), Some(&1));
        assert_eq!(d.partner_enterprises.value(), Some(&1));
        assert_eq!(d.internships_in_progress.value(), Some(&2));

        let statuses = d.internship_statuses.value().unwrap();
        assert_eq!(statuses.total, 3);
        assert_eq!(statuses.count_of("en_cours"), 2);
        assert_eq!(statuses.count_of("termine"), 1);

        let top = d.top_enterprises.value().unwrap();
        assert_eq!(top.buckets[0].label, "A");
        assert_eq!(top.buckets[0].count, 2);
        assert_eq!(top.buckets[1].label, "B");

        assert_eq!(d.acceptance_rate.value(), Some(&50.0));
        let monthly = d.monthly_applications.value().unwrap();
        assert_eq!(monthly.count_of("2024-03"), 3);
        assert_eq!(d.evaluations.value().unwrap().average_score, 15.0);
    }

    #[tokio::test]
    async fn counts_agree_with_breakdowns_on_mixed_spellings() {
        let store = MemoryStore::new();
        store.seed(
            collections::INTERNSHIPS,
            vec![
                doc! { "universiteId": "U", "entrepriseId": "e1", "statut": "en_cours" },
                doc! { "universiteId": "U", "entrepriseId": "e1", "statut": "En cours" },
                doc! { "universiteId": "U", "entrepriseId": "e1", "statut": "IN_PROGRESS" },
                doc! { "universiteId": "U", "statut": "Terminé" },
            ],
        );
        store.seed(
            collections::USERS,
            vec![
                doc! { "universiteId": "U", "role": "student" },
                doc! { "universiteId": "U", "role": "Etudiant" },
                doc! { "universiteId": "U", "role": " Enseignant " },
            ],
        );

        let d = university_dashboard(&store, "U", 5).await;
        assert_eq!(d.internships_in_progress.value(), Some(&3));
        assert_eq!(d.internship_statuses.value().unwrap().count_of("en_cours"), 3);
        assert_eq!(d.students.value(), Some(&2));
        assert_eq!(d.teachers.value(), Some(&1));

        let admin = admin_dashboard(&store).await;
        assert_eq!(admin.users_by_role.value().unwrap().count_of("student"), 2);

        let e = enterprise_dashboard(&store, "e1", 5).await;
        assert_eq!(e.active_interns.value(), Some(&3));
    }

    #[tokio::test]
    async fn empty_university_has_zero_rate() {
        let store = MemoryStore::new();
        let d = university_dashboard(&store, "nowhere", 5).await;
        assert_eq!(d.acceptance_rate.value(), Some(&0.0));
        assert_eq!(d.university_name, "nowhere");
        assert_eq!(d.internship_statuses.value().unwrap().buckets.len(), 0);
    }

    #[tokio::test]
    async fn enterprise_dashboard_counts() {
        let store = campus();
        let d = enterprise_dashboard(&store, "e1", 3).await;
        assert_eq!(d.active_interns.value(), Some(&1));
        assert_eq!(d.application_statuses.value().unwrap().total, 4);
        assert_eq!(d.acceptance_rate.value(), Some(&50.0));
        let programs = d.top_programs.value().unwrap();
        assert_eq!(programs.buckets.len(), 2);
        assert_eq!(programs.buckets[0].count, 2);
    }

    #[tokio::test]
    async fn student_dashboard_picks_running_internship() {
        let store = campus();
        let d = student_dashboard(&store, "s1").await;
        let current = d.current_internship.value().unwrap().as_ref().unwrap();
        assert_eq!(current.id, "i1");
        assert_eq!(current.student_name, "Lea Martin");
        assert_eq!(d.recent_applications.value().unwrap().len(), 2);
        assert_eq!(d.application_statuses.value().unwrap().count_of("refusée"), 1);
    }

    #[tokio::test]
    async fn admin_dashboard_lists_every_role() {
        let store = campus();
        let d = admin_dashboard(&store).await;
        let roles = d.users_by_role.value().unwrap();
        assert_eq!(roles.buckets.len(), Role::ALL.len());
        assert_eq!(roles.count_of("student"), 2);
        assert_eq!(roles.count_of("super_admin"), 0);
        assert_eq!(d.universities.value(), Some(&1));
        assert_eq!(d.association_statuses.value().unwrap().total, 0);
    }

    #[tokio::test]
    async fn aggregation_scope_is_forced_for_staff() {
        let store = campus();
        store.seed(
            collections::USERS,
            vec![doc! { "_id": "r1", "role": "responsable", "universiteId": "U" }],
        );
        let user = CurrentUser {
            id: "r1".to_string(),
            role: Role::Responsible,
        };
        let spec = AggregationSpec::new(collections::INTERNSHIPS, Filter::new(), GroupKey::field("program"));
        let scoped = scoped_spec(&store, &user, spec).await.unwrap();
        assert!(scoped.scope.matches(&doc! { "universiteId": "U" }));
        assert!(!scoped.scope.matches(&doc! { "universiteId": "V" }));

        let bad = AggregationSpec::new("secrets", Filter::new(), GroupKey::field("x"));
        assert!(matches!(
            scoped_spec(&store, &user, bad).await,
            Err(AppError::Validation(_))
        ));

        let student = CurrentUser {
            id: "s1".to_string(),
            role: Role::Student,
        };
        let spec = AggregationSpec::new(collections::INTERNSHIPS, Filter::new(), GroupKey::field("program"));
        assert!(matches!(
            scoped_spec(&store, &student, spec).await,
            Err(AppError::Forbidden(_))
        ));
    }
}
