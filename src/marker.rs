use crate::animator::AnimationState;
use crate::entity::{Coordinate, EntityId, EntityKind, TrackedEntity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

const UNKNOWN_TERMINAL: &str = "Unknown Terminal";
const DEFAULT_TERMINAL_LABEL: &str = "Terminal";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    BikeInUse,
    BikeIdle,
    Terminal,
}

impl MarkerStyle {
    pub fn for_entity(entity: &TrackedEntity) -> Self {
        match entity.kind {
            EntityKind::Bike if entity.status_active => MarkerStyle::BikeInUse,
            EntityKind::Bike => MarkerStyle::BikeIdle,
            EntityKind::Terminal => MarkerStyle::Terminal,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            MarkerStyle::BikeInUse => "#2563eb",
            MarkerStyle::BikeIdle => "#374151",
            MarkerStyle::Terminal => "#7c3aed",
        }
    }
}

/// What the map draws for one entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: EntityId,
    pub kind: EntityKind,
    /// where the marker is drawn right now
    pub display: Coordinate,
    /// latest position reported by the backend
    pub position: Coordinate,
    pub style: MarkerStyle,
    pub color: &'static str,
    pub label: String,
    pub animating: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl Marker {
    pub fn project(
        entity: &TrackedEntity,
        display: Option<Coordinate>,
        state: AnimationState,
    ) -> Self {
        let style = MarkerStyle::for_entity(entity);
        Self {
            id: entity.id.clone(),
            kind: entity.kind,
            display: display.unwrap_or_else(|| entity.coordinate()),
            position: entity.coordinate(),
            style,
            color: style.color(),
            label: label_for(entity),
            animating: state == AnimationState::Animating,
            updated_at: entity.updated_at,
            metadata: entity.metadata.clone(),
        }
    }
}

pub fn label_for(entity: &TrackedEntity) -> String {
    match entity.kind {
        EntityKind::Bike => format!(
            "to: {}",
            entity
                .metadata("terminal_to")
                .filter(|s| !s.is_empty())
                .unwrap_or(UNKNOWN_TERMINAL)
        ),
        EntityKind::Terminal => ["fullname", "terminal_name", "terminal_to"]
            .iter()
            .find_map(|key| entity.metadata(key).filter(|s| !s.is_empty()))
            .unwrap_or(DEFAULT_TERMINAL_LABEL)
            .to_string(),
    }
}

/// Latest marker snapshot shared with readers on other threads.
#[derive(Default)]
pub struct MarkerBoard {
    markers: Vec<Marker>,
    version: u64,
}

impl MarkerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, markers: Vec<Marker>) {
        self.markers = markers;
        self.version = self.version.wrapping_add(1);
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn version_string(&self) -> String {
        format!("\"{:x}\"", self.version)
    }

    pub fn parse_version_string(version_str: &str) -> Option<u64> {
        let cleaned = version_str.trim_matches('"');
        u64::from_str_radix(cleaned, 16).ok()
    }
}
