use crate::config::AnimationConfig;
use crate::entity::{Coordinate, EntityKey};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub fn ease_out_cubic(progress: f64) -> f64 {
    1.0 - (1.0 - progress).powi(3)
}

pub fn lerp(from: Coordinate, to: Coordinate, t: f64) -> Coordinate {
    Coordinate::new(
        from.latitude + (to.latitude - from.latitude) * t,
        from.longitude + (to.longitude - from.longitude) * t,
    )
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AnimationState {
    Idle,
    Animating,
}

#[derive(Copy, Clone, Debug)]
struct Animation {
    from: Coordinate,
    to: Coordinate,
    started_at: Instant,
}

impl Animation {
    fn progress(&self, now: Instant, duration: Duration) -> f64 {
        if duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
    }

    fn position_at(&self, now: Instant, duration: Duration) -> Coordinate {
        let progress = self.progress(now, duration);
        if progress >= 1.0 {
            self.to
        } else {
            lerp(self.from, self.to, ease_out_cubic(progress))
        }
    }
}

/// Smooths marker movement between authoritative positions. The display
/// coordinate of every entity is owned here; each entity animates on its own.
pub struct MarkerAnimator {
    duration: Duration,
    epsilon: f64,
    animations: HashMap<EntityKey, Animation>,
    display: HashMap<EntityKey, Coordinate>,
}

impl MarkerAnimator {
    pub fn new(config: &AnimationConfig) -> Self {
        Self {
            duration: config.duration(),
            epsilon: config.epsilon,
            animations: HashMap::new(),
            display: HashMap::new(),
        }
    }

    /// Puts a marker at `at` without animating, e.g. for a newly seen entity.
    pub fn place(&mut self, key: &EntityKey, at: Coordinate) {
        self.animations.remove(key);
        self.display.insert(key.clone(), at);
    }

    /// Starts animating `key` towards `to`. An animation already in flight is
    /// superseded and the new one starts from where the marker currently is.
    /// Returns false for moves within epsilon, which are not animated.
    pub fn on_position_change(
        &mut self,
        key: &EntityKey,
        from: Coordinate,
        to: Coordinate,
        now: Instant,
    ) -> bool {
        if !to.differs_from(&from, self.epsilon) {
            return false;
        }
        let start = match self.animations.get(key) {
            Some(animation) => animation.position_at(now, self.duration),
            None => from,
        };
        self.animations.insert(
            key.clone(),
            Animation {
                from: start,
                to,
                started_at: now,
            },
        );
        self.display.insert(key.clone(), start);
        true
    }

    /// Advances every running animation to `now`. Returns whether another
    /// frame is needed.
    pub fn step(&mut self, now: Instant) -> bool {
        let duration = self.duration;
        let display = &mut self.display;
        self.animations.retain(|key, animation| {
            display.insert(key.clone(), animation.position_at(now, duration));
            animation.progress(now, duration) < 1.0
        });
        !self.animations.is_empty()
    }

    pub fn display_position(&self, key: &EntityKey) -> Option<Coordinate> {
        self.display.get(key).copied()
    }

    pub fn state(&self, key: &EntityKey) -> AnimationState {
        if self.animations.contains_key(key) {
            AnimationState::Animating
        } else {
            AnimationState::Idle
        }
    }

    /// Stops the animation, leaving the marker at its last rendered position.
    pub fn cancel(&mut self, key: &EntityKey) {
        self.animations.remove(key);
    }

    pub fn remove(&mut self, key: &EntityKey) {
        self.animations.remove(key);
        self.display.remove(key);
    }

    pub fn clear(&mut self) {
        self.animations.clear();
        self.display.clear();
    }

    pub fn is_animating(&self) -> bool {
        !self.animations.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}
