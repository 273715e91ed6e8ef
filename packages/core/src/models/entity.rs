//! Entity Data Structures
//!
//! This module defines the core `Entity` struct: the universal record for
//! commerce listings (products, services, bookings, ...) and the internal
//! structural records that back carts, stores and saved searches.
//!
//! # Architecture
//!
//! - **Closed kind enumeration**: commerce kinds plus structural kinds;
//!   structural kinds are excluded from default commerce listings
//! - **Typed payload**: free-form entity data is parsed once at the store
//!   boundary into [`EntityPayload`] (description, tags, extension map);
//!   a payload that fails to parse degrades to the empty payload instead
//!   of propagating a parse error into business logic
//! - **Query-only similarity**: search results carry a `similarity` score
//!   that plain listings never populate
//!
//! # Examples
//!
//! ```rust
//! use mercato_core::models::{Entity, EntityKind, EntityPayload};
//!
//! let payload = EntityPayload {
//!     description: Some("Pipe repair and installation".to_string()),
//!     tags: vec!["plumbing".to_string()],
//!     ..Default::default()
//! };
//!
//! let entity = Entity::new(EntityKind::Service, "Selvam Plumbing", payload)
//!     .with_value(500.0);
//!
//! assert!(entity.validate().is_ok());
//! assert!(entity.similarity.is_none());
//! ```

use crate::models::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Closed enumeration of entity kinds.
///
/// The structural kinds (`Variant`, `Inventory`, `Store`, `Cart`,
/// `Search`) exist for internal bookkeeping and are excluded from default
/// commerce listings; see [`EntityKind::is_structural`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Product,
    Service,
    Booking,
    Transport,
    Food,
    Event,
    Rental,
    Digital,
    Subscription,
    Education,
    RealEstate,
    Healthcare,
    // Internal structural kinds
    Variant,
    Inventory,
    Store,
    Cart,
    Search,
}

impl EntityKind {
    /// Structural kinds back internal records (cart lines, saved
    /// searches, ...) and never appear in default commerce listings.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Variant | Self::Inventory | Self::Store | Self::Cart | Self::Search
        )
    }
}

impl FromStr for EntityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(Self::Product),
            "service" => Ok(Self::Service),
            "booking" => Ok(Self::Booking),
            "transport" => Ok(Self::Transport),
            "food" => Ok(Self::Food),
            "event" => Ok(Self::Event),
            "rental" => Ok(Self::Rental),
            "digital" => Ok(Self::Digital),
            "subscription" => Ok(Self::Subscription),
            "education" => Ok(Self::Education),
            "realestate" => Ok(Self::RealEstate),
            "healthcare" => Ok(Self::Healthcare),
            "variant" => Ok(Self::Variant),
            "inventory" => Ok(Self::Inventory),
            "store" => Ok(Self::Store),
            "cart" => Ok(Self::Cart),
            "search" => Ok(Self::Search),
            _ => Err(ValidationError::unknown_tag("entity kind", s)),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Product => "product",
            Self::Service => "service",
            Self::Booking => "booking",
            Self::Transport => "transport",
            Self::Food => "food",
            Self::Event => "event",
            Self::Rental => "rental",
            Self::Digital => "digital",
            Self::Subscription => "subscription",
            Self::Education => "education",
            Self::RealEstate => "realestate",
            Self::Healthcare => "healthcare",
            Self::Variant => "variant",
            Self::Inventory => "inventory",
            Self::Store => "store",
            Self::Cart => "cart",
            Self::Search => "search",
        };
        write!(f, "{}", tag)
    }
}

/// Entity lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Pending,
    Completed,
    Cancelled,
}

impl FromStr for EntityStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ValidationError::unknown_tag("entity status", s)),
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Typed entity payload.
///
/// Known fields (`description`, `tags`) are first-class; anything else an
/// app version stored lands in the `extra` extension map and round-trips
/// untouched. Parsed once at the store boundary; see
/// [`EntityPayload::parse`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPayload {
    /// Free-text description; the main input to semantic indexing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form tags, also fed to the semantic index
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Extension fields preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EntityPayload {
    /// Parse a raw payload column value.
    ///
    /// A malformed payload degrades to the empty payload (logged, not
    /// raised): a broken blob must never make the owning row unreadable.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str(raw) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Dropping malformed entity payload: {}", e);
                Self::default()
            }
        }
    }

    /// Serialize for the payload column.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Universal commerce entity.
///
/// # Fields
///
/// - `id`: opaque unique string, assigned at creation, immutable
/// - `kind`: closed [`EntityKind`] enumeration
/// - `title`: required non-empty display string
/// - `payload`: typed free-form data ([`EntityPayload`])
/// - `value`: currency-agnostic amount; zero means "free"
/// - `quantity`: non-negative count, defaults to 1
/// - `location`: optional free text
/// - `status`: lifecycle status
/// - `created_at` / `updated_at`: `updated_at >= created_at` always
/// - `similarity`: present only on search results, never on listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub title: String,
    pub payload: EntityPayload,
    pub value: f64,
    pub quantity: i64,
    pub location: Option<String>,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Relevance score attached by semantic search only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl Entity {
    /// Create a new entity with a generated UUID and fresh timestamps.
    pub fn new(kind: EntityKind, title: impl Into<String>, payload: EntityPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            payload,
            value: 0.0,
            quantity: 1,
            location: None,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
            similarity: None,
        }
    }

    /// Set the amount (builder style).
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// Set the quantity (builder style).
    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    /// Set the location (builder style).
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the status (builder style).
    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.status = status;
        self
    }

    /// Validate invariants enforced at the store boundary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::missing_field("title"));
        }
        if self.quantity < 0 {
            return Err(ValidationError::invalid_value(format!(
                "quantity must be non-negative, got {}",
                self.quantity
            )));
        }
        Ok(())
    }

    /// Text fed to the chunker and embedding pipeline: title,
    /// description, tags and location joined by newlines.
    pub fn index_text(&self) -> String {
        let mut text = self.title.clone();
        if let Some(description) = &self.payload.description {
            if !description.trim().is_empty() {
                text.push('\n');
                text.push_str(description);
            }
        }
        if !self.payload.tags.is_empty() {
            text.push('\n');
            text.push_str(&self.payload.tags.join(" "));
        }
        if let Some(location) = &self.location {
            if !location.trim().is_empty() {
                text.push('\n');
                text.push_str(location);
            }
        }
        text
    }
}

/// Partial update for an entity. `None` leaves a field untouched;
/// `location` uses the nested-option pattern so it can be cleared.
#[derive(Debug, Clone, Default)]
pub struct EntityUpdate {
    pub kind: Option<EntityKind>,
    pub title: Option<String>,
    pub payload: Option<EntityPayload>,
    pub value: Option<f64>,
    pub quantity: Option<i64>,
    pub location: Option<Option<String>>,
    pub status: Option<EntityStatus>,
}

/// Status/kind filter shared by listings and search.
///
/// The default filter hides structural kinds; explicitly filtering on a
/// structural kind (or setting `include_structural`) reveals them.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub status: Option<EntityStatus>,
    pub kind: Option<EntityKind>,
    pub include_structural: bool,
}

impl EntityFilter {
    /// Whether an entity passes this filter.
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(status) = self.status {
            if entity.status != status {
                return false;
            }
        }
        match self.kind {
            Some(kind) => entity.kind == kind,
            None => self.include_structural || !entity.kind.is_structural(),
        }
    }
}
