use crate::config::EventNames;
use crate::connection::TransportError;
use crate::entity::{Coordinate, EntityId, EntityKind, TrackingUpdate};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

// lookup order for the entity identifier
const ID_FIELDS: [&str; 4] = ["entity_id", "order_id", "terminal_id", "id"];
const KIND_FIELD: &str = "kind";
const LATITUDE_FIELD: &str = "latitude";
const LONGITUDE_FIELD: &str = "longitude";
const STATUS_ACTIVE_FIELD: &str = "status_active";
const UPDATED_AT_FIELD: &str = "updated_at";
const TERMINAL_TO_FIELD: &str = "terminal_to";
// the backend sometimes sends this misspelled variant
const TERMINAL_TO_TYPO_FIELD: &str = "termina_to";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PayloadError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no usable entity identifier")]
    MissingId,
    #[error("payload has no numeric `{0}`")]
    MissingCoordinate(&'static str),
    #[error("coordinate out of range: ({latitude}, {longitude})")]
    CoordinateOutOfRange { latitude: f64, longitude: f64 },
    #[error("unknown entity kind: {0}")]
    UnknownKind(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RoutedEvent {
    TrackingUpdate(TrackingUpdate),
    TrackingError(TransportError),
    Unauthorized,
}

/// Decodes raw transport events. Holds configuration only, no state carries
/// over from one event to the next.
#[derive(Clone, Debug)]
pub struct UpdateRouter {
    events: EventNames,
    debug: bool,
}

impl UpdateRouter {
    pub fn new(events: EventNames, debug: bool) -> Self {
        Self { events, debug }
    }

    pub fn route(&self, event_name: &str, payload: &Value) -> Option<RoutedEvent> {
        if event_name == self.events.tracking_update {
            match normalize_update(payload) {
                Ok(update) => Some(RoutedEvent::TrackingUpdate(update)),
                Err(e) => {
                    warn!("dropping malformed tracking update: {} ({})", e, payload);
                    None
                }
            }
        } else if event_name == self.events.tracking_error {
            Some(RoutedEvent::TrackingError(TransportError::from_payload(
                payload,
            )))
        } else if event_name == self.events.unauthorized {
            Some(RoutedEvent::Unauthorized)
        } else {
            if self.debug {
                debug!("ignoring event '{}': {}", event_name, payload);
            }
            None
        }
    }
}

/// Validates a raw tracking payload and turns it into a `TrackingUpdate`.
pub fn normalize_update(payload: &Value) -> Result<TrackingUpdate, PayloadError> {
    let object = payload.as_object().ok_or(PayloadError::NotAnObject)?;

    let (id_field, id) = ID_FIELDS
        .iter()
        .find_map(|field| object.get(*field).and_then(parse_id).map(|id| (*field, id)))
        .ok_or(PayloadError::MissingId)?;

    let kind = match object.get(KIND_FIELD) {
        Some(Value::String(kind)) => {
            EntityKind::from_str(kind).map_err(|_| PayloadError::UnknownKind(kind.clone()))?
        }
        Some(other) => return Err(PayloadError::UnknownKind(other.to_string())),
        None if id_field == "terminal_id" => EntityKind::Terminal,
        None => EntityKind::Bike,
    };

    let latitude = parse_coordinate(object, LATITUDE_FIELD)?;
    let longitude = parse_coordinate(object, LONGITUDE_FIELD)?;
    if !Coordinate::new(latitude, longitude).is_valid() {
        return Err(PayloadError::CoordinateOutOfRange {
            latitude,
            longitude,
        });
    }

    let status_active = match object.get(STATUS_ACTIVE_FIELD) {
        Some(Value::Bool(active)) => Some(*active),
        Some(Value::Number(n)) => n.as_i64().map(|n| n != 0),
        _ => None,
    };

    let updated_at = match object.get(UPDATED_AT_FIELD) {
        Some(Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(e) => {
                debug!("ignoring unparsable updated_at '{}': {}", s, e);
                None
            }
        },
        _ => None,
    };

    Ok(TrackingUpdate {
        kind,
        id,
        latitude,
        longitude,
        status_active,
        updated_at,
        metadata: collect_metadata(object),
    })
}

fn parse_id(value: &Value) -> Option<EntityId> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(EntityId::new(s))
            }
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(EntityId::new(i.to_string()))
            } else if let Some(u) = n.as_u64() {
                Some(EntityId::from(u))
            } else {
                let f = n.as_f64()?;
                if !f.is_finite() {
                    None
                } else if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Some(EntityId::new((f as i64).to_string()))
                } else {
                    Some(EntityId::new(f.to_string()))
                }
            }
        }
        _ => None,
    }
}

fn parse_coordinate(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<f64, PayloadError> {
    object
        .get(field)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or(PayloadError::MissingCoordinate(field))
}

fn collect_metadata(object: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    for (key, value) in object {
        if ID_FIELDS.contains(&key.as_str())
            || key == KIND_FIELD
            || key == LATITUDE_FIELD
            || key == LONGITUDE_FIELD
            || key == STATUS_ACTIVE_FIELD
            || key == UPDATED_AT_FIELD
            || key == TERMINAL_TO_FIELD
            || key == TERMINAL_TO_TYPO_FIELD
        {
            continue;
        }
        if let Some(value) = scalar_string(value) {
            metadata.insert(key.clone(), value);
        }
    }

    // an empty destination falls through to the misspelled field
    let terminal_to = [TERMINAL_TO_FIELD, TERMINAL_TO_TYPO_FIELD]
        .iter()
        .filter_map(|field| object.get(*field).and_then(scalar_string))
        .find(|value| !value.is_empty());
    if let Some(terminal_to) = terminal_to {
        metadata.insert(TERMINAL_TO_FIELD.to_string(), terminal_to);
    }
    metadata
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
