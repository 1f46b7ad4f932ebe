use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use super::status::normalize_token;
use crate::store::get_text;

/// Portal roles. Stored as snake_case tokens; French spellings are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Responsible,
    Enterprise,
    Tutor,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Student,
        Role::Teacher,
        Role::Responsible,
        Role::Enterprise,
        Role::Tutor,
        Role::Admin,
        Role::SuperAdmin,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_token(raw).as_str() {
            "student" | "etudiant" => Some(Role::Student),
            "teacher" | "enseignant" | "professeur" => Some(Role::Teacher),
            "responsible" | "responsable" => Some(Role::Responsible),
            "enterprise" | "entreprise" | "company" => Some(Role::Enterprise),
            "tutor" | "tuteur" => Some(Role::Tutor),
            "admin" => Some(Role::Admin),
            "super_admin" | "superadmin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Responsible => "responsible",
            Role::Enterprise => "enterprise",
            Role::Tutor => "tutor",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    /// Staff of a university: may read that university's dashboards.
    pub fn is_academic(&self) -> bool {
        matches!(self, Role::Teacher | Role::Responsible)
    }

    /// Staff of an enterprise.
    pub fn is_corporate(&self) -> bool {
        matches!(self, Role::Enterprise | Role::Tutor)
    }
}

/// Person display name: `firstName lastName`, then `prenom nom`, then
/// `displayName`, then `email`.
pub fn person_display_name(user: &Document) -> Option<String> {
    let join = |first: Option<&str>, last: Option<&str>| match (first, last) {
        (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
        (Some(one), None) | (None, Some(one)) => Some(one.to_string()),
        (None, None) => None,
    };
    join(get_text(user, "firstName"), get_text(user, "lastName"))
        .or_else(|| join(get_text(user, "prenom"), get_text(user, "nom")))
        .or_else(|| get_text(user, "displayName").map(String::from))
        .or_else(|| get_text(user, "email").map(String::from))
}
