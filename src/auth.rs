// src/auth.rs
//
// Tokens are issued by the identity provider; this service only verifies them
// and exposes the caller's id and role to the handlers.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http, Error, HttpMessage, HttpRequest, HttpResponse,
};
use chrono::{Duration, Utc};
use futures::future::{ok, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{fields, Role};
use crate::store::{collections, get_text, DocumentStore};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// Authenticated caller, stored in the request extensions.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub id: String,
    pub role: Role,
}

/// Institutions the caller belongs to, read from their user document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserScope {
    pub universite_id: Option<String>,
    pub entreprise_id: Option<String>,
}

pub fn create_jwt(user_id: &str, role: Role, secret: &str) -> Result<String, AppError> {
    let expiration = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.as_str().to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
        .map_err(|e| AppError::Internal(format!("Token encode error: {}", e)))
}

pub fn verify_token(token: &str, secret: &str) -> Result<CurrentUser, String> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|e| format!("Token decode error: {}", e))?;
    let role = Role::parse(&data.claims.role)
        .ok_or_else(|| format!("Unknown role '{}'", data.claims.role))?;
    Ok(CurrentUser {
        id: data.claims.sub,
        role,
    })
}

pub fn current_user(req: &HttpRequest) -> Result<CurrentUser, AppError> {
    req.extensions()
        .get::<CurrentUser>()
        .cloned()
        .ok_or(AppError::Unauthorized)
}

pub async fn load_scope<S: DocumentStore>(store: &S, user: &CurrentUser) -> Result<UserScope, AppError> {
    match store.find_by_id(collections::USERS, &user.id).await? {
        Some(profile) => Ok(UserScope {
            universite_id: get_text(&profile, fields::UNIVERSITY_ID).map(String::from),
            entreprise_id: get_text(&profile, fields::ENTERPRISE_ID).map(String::from),
        }),
        None => {
            warn!("No profile for user {}", user.id);
            Ok(UserScope::default())
        }
    }
}

/// Admins, or teachers and responsables of that university.
pub async fn ensure_university_access<S: DocumentStore>(
    store: &S,
    user: &CurrentUser,
    universite_id: &str,
) -> Result<(), AppError> {
    if user.role.is_admin() {
        return Ok(());
    }
    if user.role.is_academic() {
        let scope = load_scope(store, user).await?;
        if scope.universite_id.as_deref() == Some(universite_id) {
            return Ok(());
        }
    }
    Err(AppError::Forbidden(format!(
        "no access to universite {}",
        universite_id
    )))
}

/// Admins, or enterprise accounts and tutors of that enterprise.
pub async fn ensure_enterprise_access<S: DocumentStore>(
    store: &S,
    user: &CurrentUser,
    entreprise_id: &str,
) -> Result<(), AppError> {
    if user.role.is_admin() {
        return Ok(());
    }
    if user.role.is_corporate() {
        let scope = load_scope(store, user).await?;
        if scope.entreprise_id.as_deref() == Some(entreprise_id) {
            return Ok(());
        }
    }
    Err(AppError::Forbidden(format!(
        "no access to entreprise {}",
        entreprise_id
    )))
}

pub fn ensure_admin(user: &CurrentUser) -> Result<(), AppError> {
    if user.role.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("admin role required".to_string()))
    }
}

/// Verifies `Authorization: Bearer <token>` when present. Requests without a
/// token pass through; handlers that need a caller reject them.
#[derive(Debug, Clone)]
pub struct Authentication {
    secret: Rc<String>,
}

impl Authentication {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Rc::new(secret.to_string()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        if let Some(token) = token {
            match verify_token(&token, &self.secret) {
                Ok(user) => {
                    req.extensions_mut().insert(user);
                }
                Err(e) => {
                    let (req_parts, _payload) = req.into_parts();
                    let resp = HttpResponse::Unauthorized()
                        .body(format!("Invalid token: {}", e))
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mongodb::bson::doc;

    #[test]
    fn token_round_trip_carries_role() {
        let token = create_jwt("u42", Role::Responsible, "s3cret").unwrap();
        let user = verify_token(&token, "s3cret").unwrap();
        assert_eq!(user.id, "u42");
        assert_eq!(user.role, Role::Responsible);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_jwt("u42", Role::Admin, "s3cret").unwrap();
        assert!(verify_token(&token, "other").is_err());
    }

    #[tokio::test]
    async fn scope_comes_from_profile() {
        let store = MemoryStore::new();
        store.seed(
            collections::USERS,
            vec![doc! { "_id": "r1", "role": "responsable", "universiteId": "u1" }],
        );
        let user = CurrentUser {
            id: "r1".to_string(),
            role: Role::Responsible,
        };
        let scope = load_scope(&store, &user).await.unwrap();
        assert_eq!(scope.universite_id.as_deref(), Some("u1"));
        assert_eq!(scope.entreprise_id, None);

        let ghost = CurrentUser {
            id: "ghost".to_string(),
            role: Role::Student,
        };
        assert_eq!(load_scope(&store, &ghost).await.unwrap(), UserScope::default());
    }

    #[tokio::test]
    async fn university_access_requires_matching_scope() {
        let store = MemoryStore::new();
        store.seed(
            collections::USERS,
            vec![
                doc! { "_id": "r1", "universiteId": "u1" },
                doc! { "_id": "t1", "entrepriseId": "e1", "universiteId": "u1" },
            ],
        );
        let responsable = CurrentUser { id: "r1".into(), role: Role::Responsible };
        let tutor = CurrentUser { id: "t1".into(), role: Role::Tutor };
        let admin = CurrentUser { id: "a".into(), role: Role::SuperAdmin };

        assert!(ensure_university_access(&store, &responsable, "u1").await.is_ok());
        assert!(ensure_university_access(&store, &responsable, "u2").await.is_err());
        assert!(ensure_university_access(&store, &tutor, "u1").await.is_err());
        assert!(ensure_university_access(&store, &admin, "u2").await.is_ok());
        assert!(ensure_enterprise_access(&store, &tutor, "e1").await.is_ok());
        assert!(ensure_enterprise_access(&store, &responsable, "e1").await.is_err());
        assert!(ensure_admin(&tutor).is_err());
    }
}
