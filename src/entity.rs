use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum_macros::{Display, EnumString};

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EntityKind {
    Bike,
    Terminal,
}

/// Identifier of a tracked entity. Numeric identifiers from the backend are
/// kept in their decimal form so `39` and `"39"` refer to the same entity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn bike(id: impl Into<EntityId>) -> Self {
        Self::new(EntityKind::Bike, id)
    }

    pub fn terminal(id: impl Into<EntityId>) -> Self {
        Self::new(EntityKind::Terminal, id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)
    }
}

/// WGS84 coordinate in degrees.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// True when either axis moved by more than `epsilon` degrees.
    pub fn differs_from(&self, other: &Coordinate, epsilon: f64) -> bool {
        (self.latitude - other.latitude).abs() > epsilon
            || (self.longitude - other.longitude).abs() > epsilon
    }
}

/// A normalized tracking update, as produced by the update router.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackingUpdate {
    pub kind: EntityKind,
    pub id: EntityId,
    pub latitude: f64,
    pub longitude: f64,
    pub status_active: Option<bool>,
    /// backend timestamp of the reading, when the payload carries one
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl TrackingUpdate {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>, latitude: f64, longitude: f64) -> Self {
        Self {
            kind,
            id: id.into(),
            latitude,
            longitude,
            status_active: None,
            updated_at: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn with_status_active(mut self, status_active: bool) -> Self {
        self.status_active = Some(status_active);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind, self.id.clone())
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// One bike or terminal as known by the location store.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub latitude: f64,
    pub longitude: f64,
    pub status_active: bool,
    pub metadata: BTreeMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TrackedEntity {
    pub fn from_update(update: TrackingUpdate) -> Self {
        Self {
            id: update.id,
            kind: update.kind,
            latitude: update.latitude,
            longitude: update.longitude,
            status_active: update.status_active.unwrap_or(false),
            metadata: update.metadata,
            updated_at: update.updated_at,
        }
    }

    /// Field-wise merge: present fields override, absent ones are kept.
    pub fn merge(&mut self, update: TrackingUpdate) {
        self.latitude = update.latitude;
        self.longitude = update.longitude;
        if let Some(status_active) = update.status_active {
            self.status_active = status_active;
        }
        if update.updated_at.is_some() {
            self.updated_at = update.updated_at;
        }
        self.metadata.extend(update.metadata);
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind, self.id.clone())
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
