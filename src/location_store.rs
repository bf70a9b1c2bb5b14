use crate::entity::{Coordinate, EntityKey, EntityKind, TrackedEntity, TrackingUpdate};
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UpsertOutcome {
    Inserted,
    Updated {
        from: Coordinate,
        to: Coordinate,
        /// the coordinate changed by more than the store's epsilon
        moved: bool,
    },
}

/// Current known position of every tracked entity, in insertion order.
/// `upsert` and `clear` are the only mutations.
pub struct LocationStore {
    entities: Vec<TrackedEntity>,
    index: HashMap<EntityKey, usize>,
    epsilon: f64,
    version: u64,
}

impl LocationStore {
    pub fn new(epsilon: f64) -> Self {
        Self {
            entities: Vec::new(),
            index: HashMap::new(),
            epsilon,
            version: 0,
        }
    }

    pub fn upsert(&mut self, update: TrackingUpdate) -> UpsertOutcome {
        self.version = self.version.wrapping_add(1);
        let key = update.key();
        match self.index.get(&key) {
            Some(&idx) => {
                let entity = &mut self.entities[idx];
                let from = entity.coordinate();
                entity.merge(update);
                let to = entity.coordinate();
                UpsertOutcome::Updated {
                    from,
                    to,
                    moved: to.differs_from(&from, self.epsilon),
                }
            }
            None => {
                debug!("tracking new entity {}", key);
                self.index.insert(key, self.entities.len());
                self.entities.push(TrackedEntity::from_update(update));
                UpsertOutcome::Inserted
            }
        }
    }

    pub fn get(&self, key: &EntityKey) -> Option<&TrackedEntity> {
        self.index.get(key).map(|&idx| &self.entities[idx])
    }

    pub fn list(&self, kind: Option<EntityKind>) -> Vec<&TrackedEntity> {
        self.iter()
            .filter(|entity| kind.map_or(true, |kind| entity.kind == kind))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.iter()
    }

    pub fn clear(&mut self) {
        self.version = self.version.wrapping_add(1);
        self.entities.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}
