//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sector reference embedded in problem responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorRef {
    pub id: i64,
    pub name: String,
}

/// A climbable problem from the canonical catalog
///
/// Owned by the catalog; submissions reference it by id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub name: String,
    pub grade: String,
    pub sector: SectorRef,
}

/// Respondent gender, serialized lowercase on the wire and in the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Gender> {
        match s {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            _ => None,
        }
    }
}

/// A persisted survey submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub fingerprint: String,
    pub email: Option<String>,
    pub update_code: String,
    pub gender: Option<Gender>,
    pub height_cm: Option<i64>,
    pub arm_span_cm: Option<i64>,
    pub subscribe_newsletter: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
