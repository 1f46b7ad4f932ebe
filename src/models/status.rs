// src/models/status.rs
//
// Canonical lifecycle statuses.
//
// The store holds French and English spellings of the same status side by
// side (`termine` / `completed`, `acceptée` / `accepted`). Raw tokens are
// normalized here, once, when a document is read; everything past this point
// branches on the enums. Tokens that match no known spelling are preserved
// verbatim in `Other` so they are still counted under their own label.
// Status filters are applied to parsed values, never to raw store tokens.

use log::debug;
use serde::{Deserialize, Serialize};

/// Lowercases, trims, strips French accents and folds separators to `_`.
pub fn normalize_token(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'à' | 'â' => 'a',
            'î' | 'ï' => 'i',
            'ô' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            ' ' | '-' => '_',
            other => other,
        })
        .collect()
}

fn log_normalized(kind: &str, raw: &str, canonical: &str) {
    if raw != canonical {
        debug!("normalized {} status '{}' -> '{}'", kind, raw, canonical);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InternshipStatus {
    Draft,
    Active,
    Published,
    InProgress,
    Completed,
    Cancelled,
    Expired,
    Other(String),
}

impl InternshipStatus {
    /// Display order of the status breakdown.
    pub const ORDER: [InternshipStatus; 7] = [
        InternshipStatus::Draft,
        InternshipStatus::Active,
        InternshipStatus::Published,
        InternshipStatus::InProgress,
        InternshipStatus::Completed,
        InternshipStatus::Cancelled,
        InternshipStatus::Expired,
    ];

    pub fn parse(raw: &str) -> Self {
        let status = match normalize_token(raw).as_str() {
            "draft" | "brouillon" => Self::Draft,
            "active" | "actif" | "ouvert" | "open" => Self::Active,
            "published" | "publie" => Self::Published,
            "in_progress" | "en_cours" | "ongoing" => Self::InProgress,
            "completed" | "termine" | "finished" | "done" => Self::Completed,
            "cancelled" | "canceled" | "annule" => Self::Cancelled,
            "expired" | "expire" => Self::Expired,
            _ => Self::Other(raw.trim().to_string()),
        };
        log_normalized("internship", raw, status.as_str());
        status
    }

    /// Token written to the store for this status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Draft => "brouillon",
            Self::Active => "actif",
            Self::Published => "publie",
            Self::InProgress => "en_cours",
            Self::Completed => "termine",
            Self::Cancelled => "annule",
            Self::Expired => "expire",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for InternshipStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<InternshipStatus> for String {
    fn from(status: InternshipStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApplicationStatus {
    Pending,
    Interview,
    Accepted,
    Refused,
    Withdrawn,
    Other(String),
}

impl ApplicationStatus {
    pub const ORDER: [ApplicationStatus; 5] = [
        ApplicationStatus::Pending,
        ApplicationStatus::Interview,
        ApplicationStatus::Accepted,
        ApplicationStatus::Refused,
        ApplicationStatus::Withdrawn,
    ];

    pub fn parse(raw: &str) -> Self {
        let status = match normalize_token(raw).as_str() {
            "pending" | "en_attente" | "submitted" | "soumise" | "" => Self::Pending,
            "interview" | "entretien" => Self::Interview,
            "accepted" | "acceptee" | "accepte" => Self::Accepted,
            "refused" | "rejected" | "refusee" | "refuse" | "rejetee" => Self::Refused,
            "withdrawn" | "retiree" | "annulee" => Self::Withdrawn,
            _ => Self::Other(raw.trim().to_string()),
        };
        log_normalized("application", raw, status.as_str());
        status
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "en_attente",
            Self::Interview => "entretien",
            Self::Accepted => "acceptée",
            Self::Refused => "refusée",
            Self::Withdrawn => "retirée",
            Self::Other(raw) => raw,
        }
    }

    /// A decision has been made; the application no longer moves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Refused | Self::Withdrawn)
    }
}

impl From<String> for ApplicationStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<ApplicationStatus> for String {
    fn from(status: ApplicationStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssociationStatus {
    Pending,
    Accepted,
    Rejected,
    Other(String),
}

impl AssociationStatus {
    pub const ORDER: [AssociationStatus; 3] = [
        AssociationStatus::Pending,
        AssociationStatus::Accepted,
        AssociationStatus::Rejected,
    ];

    pub fn parse(raw: &str) -> Self {
        let status = match normalize_token(raw).as_str() {
            "pending" | "en_attente" => Self::Pending,
            "accepted" | "acceptee" | "accepte" => Self::Accepted,
            "rejected" | "refused" | "refusee" | "rejetee" => Self::Rejected,
            _ => Self::Other(raw.trim().to_string()),
        };
        log_normalized("association", raw, status.as_str());
        status
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "en_attente",
            Self::Accepted => "acceptee",
            Self::Rejected => "refusee",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for AssociationStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<AssociationStatus> for String {
    fn from(status: AssociationStatus) -> Self {
        status.as_str().to_string()
    }
}
