use crate::animator::MarkerAnimator;
use crate::config::TrackingConfig;
use crate::connection::{
    BoxedHandler, ConnectionManager, ConnectionState, Subscription, Transport, TransportEvent,
};
use crate::entity::{EntityKind, TrackingUpdate};
use crate::location_store::{LocationStore, UpsertOutcome};
use crate::marker::{Marker, MarkerBoard};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// One tracking view: a connection, the store it feeds and the animator that
/// renders it. Instances are independent of each other.
pub struct TrackingClient<T: Transport> {
    connection: ConnectionManager<T>,
    store: LocationStore,
    animator: MarkerAnimator,
    frame_interval: Duration,
    board: Option<Arc<Mutex<MarkerBoard>>>,
}

impl<T: Transport> TrackingClient<T> {
    pub fn new(transport: T, config: &TrackingConfig) -> Self {
        Self {
            connection: ConnectionManager::new(transport, config),
            store: LocationStore::new(config.animation.epsilon),
            animator: MarkerAnimator::new(&config.animation),
            frame_interval: config.animation.frame_interval(),
            board: None,
        }
    }

    pub fn initialize(&mut self, handler: BoxedHandler, now: Instant) -> Subscription {
        self.connection.initialize(handler, now)
    }

    /// Tears the view down: unregisters, disconnects and forgets all entities.
    pub fn dispose(&mut self, subscription: Subscription) {
        self.connection.dispose(subscription);
        self.reset();
    }

    /// Returns whether the event carried an update. Only then is the board
    /// republished.
    pub fn handle_event(&mut self, now: Instant, event: TransportEvent) -> bool {
        match self.connection.handle_event(now, event) {
            Some(update) => {
                self.apply(update, now);
                self.publish();
                true
            }
            None => false,
        }
    }

    /// Writes an update into the store and starts the matching animation.
    pub fn apply(&mut self, update: TrackingUpdate, now: Instant) {
        let key = update.key();
        match self.store.upsert(update) {
            UpsertOutcome::Inserted => {
                if let Some(entity) = self.store.get(&key) {
                    self.animator.place(&key, entity.coordinate());
                }
            }
            UpsertOutcome::Updated {
                from,
                to,
                moved: true,
            } => {
                self.animator.on_position_change(&key, from, to, now);
            }
            UpsertOutcome::Updated { moved: false, .. } => (),
        }
    }

    /// Loads a snapshot without animating anything.
    pub fn seed(&mut self, updates: impl IntoIterator<Item = TrackingUpdate>) {
        let mut count = 0;
        for update in updates {
            let key = update.key();
            self.store.upsert(update);
            if let Some(entity) = self.store.get(&key) {
                self.animator.place(&key, entity.coordinate());
            }
            count += 1;
        }
        info!("seeded {} tracked entities", count);
        self.publish();
    }

    pub fn poll(&mut self, now: Instant) {
        self.connection.poll(now);
    }

    pub fn step_frame(&mut self, now: Instant) -> bool {
        self.animator.step(now)
    }

    pub fn markers(&self, kind: Option<EntityKind>) -> Vec<Marker> {
        self.store
            .list(kind)
            .into_iter()
            .map(|entity| {
                let key = entity.key();
                Marker::project(
                    entity,
                    self.animator.display_position(&key),
                    self.animator.state(&key),
                )
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.store.clear();
        self.animator.clear();
        self.publish();
    }

    pub fn reconnect(&mut self, now: Instant) {
        self.connection.reconnect(now);
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    pub fn status(&self) -> ConnectionState {
        self.connection.status()
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<T> {
        &mut self.connection
    }

    pub fn store(&self) -> &LocationStore {
        &self.store
    }

    pub fn animator(&self) -> &MarkerAnimator {
        &self.animator
    }

    /// Every change is mirrored into `board` from now on.
    pub fn attach_board(&mut self, board: Arc<Mutex<MarkerBoard>>) {
        self.board = Some(board);
        self.publish();
    }

    fn publish(&self) {
        if let Some(board) = &self.board {
            let markers = self.markers(None);
            board.lock().unwrap().replace(markers);
        }
    }

    /// Event loop: applies transport events, fires scheduled reconnects and
    /// steps animations while any are running. Returns on `shutdown` or when
    /// the event channel closes.
    pub async fn run(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut frames = tokio::time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let retry_at = self.connection.next_deadline();
            let retry_sleep = tokio::time::sleep_until(
                retry_at
                    .map(tokio::time::Instant::from_std)
                    .unwrap_or_else(tokio::time::Instant::now),
            );
            let animating = self.animator.is_animating();

            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(Instant::now(), event);
                    }
                    None => {
                        info!("transport event channel closed");
                        break;
                    }
                },
                _ = retry_sleep, if retry_at.is_some() => {
                    self.poll(Instant::now());
                }
                _ = frames.tick(), if animating => {
                    self.step_frame(Instant::now());
                    self.publish();
                }
                _ = &mut shutdown => {
                    info!("tracking client shutting down");
                    break;
                }
            }
        }
    }
}
