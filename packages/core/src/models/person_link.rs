//! Person-Entity Relationship Edge
//!
//! People exist only as opaque ids; the link row carries the role a
//! person plays on an entity. At most one row per
//! `(entity_id, person_id, role)` triple - re-adding overwrites.

use crate::models::ValidationError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Closed enumeration of roles a person can hold on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonRole {
    Seller,
    Buyer,
    Staff,
    Driver,
    Host,
    Instructor,
    Student,
    Doctor,
    Patient,
    Landlord,
    Tenant,
    Agent,
    Manager,
    Support,
}

impl FromStr for PersonRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seller" => Ok(Self::Seller),
            "buyer" => Ok(Self::Buyer),
            "staff" => Ok(Self::Staff),
            "driver" => Ok(Self::Driver),
            "host" => Ok(Self::Host),
            "instructor" => Ok(Self::Instructor),
            "student" => Ok(Self::Student),
            "doctor" => Ok(Self::Doctor),
            "patient" => Ok(Self::Patient),
            "landlord" => Ok(Self::Landlord),
            "tenant" => Ok(Self::Tenant),
            "agent" => Ok(Self::Agent),
            "manager" => Ok(Self::Manager),
            "support" => Ok(Self::Support),
            _ => Err(ValidationError::unknown_tag("person role", s)),
        }
    }
}

impl std::fmt::Display for PersonRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Seller => "seller",
            Self::Buyer => "buyer",
            Self::Staff => "staff",
            Self::Driver => "driver",
            Self::Host => "host",
            Self::Instructor => "instructor",
            Self::Student => "student",
            Self::Doctor => "doctor",
            Self::Patient => "patient",
            Self::Landlord => "landlord",
            Self::Tenant => "tenant",
            Self::Agent => "agent",
            Self::Manager => "manager",
            Self::Support => "support",
        };
        write!(f, "{}", tag)
    }
}

/// Role-tagged edge between an opaque person id and an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonLink {
    pub entity_id: String,
    pub person_id: String,
    pub role: PersonRole,
}

impl PersonLink {
    pub fn new(
        entity_id: impl Into<String>,
        person_id: impl Into<String>,
        role: PersonRole,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            person_id: person_id.into(),
            role,
        }
    }

    /// Both foreign keys are required.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.entity_id.trim().is_empty() {
            return Err(ValidationError::missing_field("entity_id"));
        }
        if self.person_id.trim().is_empty() {
            return Err(ValidationError::missing_field("person_id"));
        }
        Ok(())
    }
}

/// A person surfaced by role-scoped semantic search: the person id plus
/// the most relevant entity that produced the match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonHit {
    pub person_id: String,
    pub role: PersonRole,
    pub entity_id: String,
    pub similarity: f32,
}
