use crate::config::{EventNames, RetryConfig, TrackingConfig};
use crate::entity::{Coordinate, EntityId, TrackingUpdate};
use crate::router::{RoutedEvent, UpdateRouter};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Instant;
use strum_macros::Display;
use thiserror::Error;
use uuid::Uuid;

const UNAUTHORIZED_STATUS: u16 = 401;
const UNAUTHORIZED_ERROR_TYPE: &str = "UnauthorizedError";

/// An error reported by the transport, either while connecting or on an
/// established connection.
#[derive(Clone, Debug, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            error_type: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Reads the error shapes the backend is known to send: a bare string, or
    /// an object with `status`/`code`, `message` and `type`.
    pub fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::String(message) => Self::new(message.clone()),
            Value::Object(object) => {
                let mut status = None;
                let mut code = None;
                for field in ["status", "code", "statusCode"] {
                    match object.get(field) {
                        Some(Value::Number(n)) => {
                            if status.is_none() {
                                status = n.as_u64().and_then(|n| u16::try_from(n).ok());
                            }
                        }
                        Some(Value::String(s)) => {
                            if code.is_none() {
                                code = Some(s.clone());
                            }
                        }
                        _ => (),
                    }
                }
                let message = ["message", "responseMessage", "error"]
                    .iter()
                    .find_map(|field| object.get(*field).and_then(Value::as_str))
                    .unwrap_or("tracking error")
                    .to_string();
                Self {
                    status,
                    code,
                    error_type: object
                        .get("type")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    message,
                }
            }
            other => Self::new(other.to_string()),
        }
    }

    /// Authorization failures are terminal for the session and never retried.
    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(UNAUTHORIZED_STATUS)
            || self.code.as_deref() == Some("401")
            || self.error_type.as_deref() == Some(UNAUTHORIZED_ERROR_TYPE)
            || self.message.to_lowercase().contains("unauthorized")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub retry_count: u32,
    pub last_error: Option<TransportError>,
    /// automatic retries gave up, a manual `reconnect` is required
    pub retries_exhausted: bool,
    pub unauthorized: bool,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            retry_count: 0,
            last_error: None,
            retries_exhausted: false,
            unauthorized: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientRequested,
    ServerRequested,
    TransportClosed,
    PingTimeout,
    Other(String),
}

impl DisconnectReason {
    /// Maps the reason strings used by socket.io style transports.
    pub fn from_transport_reason(reason: &str) -> Self {
        match reason {
            "io client disconnect" => DisconnectReason::ClientRequested,
            "io server disconnect" => DisconnectReason::ServerRequested,
            "transport close" | "transport error" => DisconnectReason::TransportClosed,
            "ping timeout" => DisconnectReason::PingTimeout,
            other => DisconnectReason::Other(other.to_string()),
        }
    }

    pub fn should_retry(&self) -> bool {
        !matches!(
            self,
            DisconnectReason::ClientRequested | DisconnectReason::ServerRequested
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientRequested => f.write_str("io client disconnect"),
            DisconnectReason::ServerRequested => f.write_str("io server disconnect"),
            DisconnectReason::TransportClosed => f.write_str("transport close"),
            DisconnectReason::PingTimeout => f.write_str("ping timeout"),
            DisconnectReason::Other(reason) => f.write_str(reason),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected(DisconnectReason),
    ConnectError(TransportError),
    Error(TransportError),
    Message { event: String, payload: Value },
}

/// The wire connection to the tracking backend. Implementations report what
/// happens on the wire back as `TransportEvent`s, typically through a channel
/// that the client driver drains.
pub trait Transport {
    fn open(&mut self) -> Result<(), TransportError>;
    fn close(&mut self);
    fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError>;
}

/// Callbacks of the tracking connection. Every method has a logging default
/// so callers only override what they care about.
pub trait TrackingHandler {
    fn on_connect(&mut self) {
        info!("tracking connection established");
    }

    fn on_disconnect(&mut self, reason: &DisconnectReason) {
        info!("tracking connection closed: {}", reason);
    }

    fn on_connection_error(&mut self, error: &TransportError) {
        error!("tracking connection error: {}", error);
    }

    fn on_unauthorized(&mut self) {
        warn!("tracking connection unauthorized");
    }

    fn on_tracking_update(&mut self, update: &TrackingUpdate) {
        debug!("tracking update for {}", update.key());
    }
}

pub struct LoggingHandler;

impl TrackingHandler for LoggingHandler {}

/// Returned by `initialize`; hand it back to `dispose` to unregister.
#[derive(Debug, PartialEq, Eq)]
pub struct Subscription {
    id: Uuid,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

pub type BoxedHandler = Box<dyn TrackingHandler + Send>;

pub struct ConnectionManager<T: Transport> {
    transport: T,
    router: UpdateRouter,
    events: EventNames,
    retry: RetryConfig,
    state: ConnectionState,
    handler: Option<(Uuid, BoxedHandler)>,
    pending_connect: Option<Instant>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, config: &TrackingConfig) -> Self {
        Self {
            transport,
            router: UpdateRouter::new(config.events.clone(), config.debug),
            events: config.events.clone(),
            retry: config.retry.clone(),
            state: ConnectionState::new(),
            handler: None,
            pending_connect: None,
        }
    }

    /// Replaces any previously registered handler, then connects.
    pub fn initialize(&mut self, handler: BoxedHandler, now: Instant) -> Subscription {
        if let Some((old, _)) = self.handler.take() {
            debug!("replacing tracking handler {}", old);
        }
        let id = Uuid::new_v4();
        info!("initializing tracking connection, subscription {}", id);
        self.handler = Some((id, handler));
        self.state.retries_exhausted = false;
        self.state.unauthorized = false;
        self.connect(now);
        Subscription { id }
    }

    /// Unregisters the handler and closes the connection. A subscription that
    /// was already superseded by a later `initialize` is ignored.
    pub fn dispose(&mut self, subscription: Subscription) {
        match &self.handler {
            Some((id, _)) if *id == subscription.id => {
                info!("disposing tracking subscription {}", subscription.id);
                self.handler = None;
                self.disconnect();
            }
            _ => debug!("ignoring stale subscription {}", subscription.id),
        }
    }

    pub fn connect(&mut self, now: Instant) {
        if self.state.status != ConnectionStatus::Disconnected {
            debug!("already {}, skipping connect", self.state.status);
            return;
        }
        self.pending_connect = None;
        self.state.status = ConnectionStatus::Connecting;
        info!("connecting to tracking backend");
        if let Err(e) = self.transport.open() {
            self.on_connect_error(now, e);
        }
    }

    /// Closes the transport. Events arriving afterwards are ignored until the
    /// next `connect`.
    pub fn disconnect(&mut self) {
        self.pending_connect = None;
        if self.state.status != ConnectionStatus::Disconnected {
            info!("disconnecting from tracking backend");
        }
        self.transport.close();
        self.state.status = ConnectionStatus::Disconnected;
    }

    /// User initiated retry: resets the retry bound and connects again after
    /// the manual reconnect delay.
    pub fn reconnect(&mut self, now: Instant) {
        info!("manual reconnect requested");
        self.state.retry_count = 0;
        self.state.retries_exhausted = false;
        self.state.unauthorized = false;
        self.disconnect();
        self.pending_connect = Some(now + self.retry.manual_reconnect_delay());
    }

    pub fn status(&self) -> ConnectionState {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.status == ConnectionStatus::Connected
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_connect
    }

    /// Fires a scheduled connect attempt once its deadline has passed.
    pub fn poll(&mut self, now: Instant) {
        if let Some(deadline) = self.pending_connect {
            if deadline <= now {
                self.pending_connect = None;
                self.connect(now);
            }
        }
    }

    pub fn handle_event(&mut self, now: Instant, event: TransportEvent) -> Option<TrackingUpdate> {
        if self.state.status == ConnectionStatus::Disconnected {
            debug!("ignoring {:?} while disconnected", event);
            return None;
        }
        match event {
            TransportEvent::Connected => {
                info!("connected to tracking backend");
                self.state.status = ConnectionStatus::Connected;
                self.state.retry_count = 0;
                self.state.last_error = None;
                self.state.retries_exhausted = false;
                self.state.unauthorized = false;
                self.with_handler(|h| h.on_connect());
            }
            TransportEvent::Disconnected(reason) => {
                info!("disconnected from tracking backend: {}", reason);
                self.state.status = ConnectionStatus::Disconnected;
                self.with_handler(|h| h.on_disconnect(&reason));
                if reason.should_retry() {
                    self.schedule_retry(now);
                }
            }
            TransportEvent::ConnectError(error) => self.on_connect_error(now, error),
            TransportEvent::Error(error) => self.on_error(error),
            TransportEvent::Message { event, payload } => {
                match self.router.route(&event, &payload)? {
                    RoutedEvent::TrackingUpdate(update) => {
                        self.with_handler(|h| h.on_tracking_update(&update));
                        return Some(update);
                    }
                    RoutedEvent::TrackingError(error) => self.on_error(error),
                    RoutedEvent::Unauthorized => self.on_unauthorized(),
                }
            }
        }
        None
    }

    /// Sends an event to the backend. Only possible while connected.
    pub fn emit(&mut self, event: &str, payload: Value) -> bool {
        if !self.is_connected() {
            warn!("cannot emit '{}': not connected", event);
            return false;
        }
        match self.transport.emit(event, payload) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to emit '{}': {}", event, e);
                false
            }
        }
    }

    pub fn join_tracking_room(&mut self, order_id: &EntityId) -> bool {
        let event = self.events.join_tracking_room.clone();
        self.emit(&event, json!({ "orderId": order_id }))
    }

    pub fn leave_tracking_room(&mut self, order_id: &EntityId) -> bool {
        let event = self.events.leave_tracking_room.clone();
        self.emit(&event, json!({ "orderId": order_id }))
    }

    /// Reports a position for `order_id` to the backend.
    pub fn send_tracking_update(&mut self, order_id: &EntityId, at: Coordinate) -> bool {
        let event = self.events.send_tracking_update.clone();
        self.emit(
            &event,
            json!({
                "orderId": order_id,
                "latitude": at.latitude,
                "longitude": at.longitude,
            }),
        )
    }

    /// Uploads a recorded trail for `order_id`, oldest point first.
    pub fn send_tracking_history(&mut self, order_id: &EntityId, points: &[Coordinate]) -> bool {
        let event = self.events.send_tracking_history.clone();
        self.emit(&event, json!({ "orderId": order_id, "history": points }))
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn on_connect_error(&mut self, now: Instant, error: TransportError) {
        error!("tracking connection error: {}", error);
        self.state.status = ConnectionStatus::Disconnected;
        self.state.last_error = Some(error.clone());
        if error.is_unauthorized() {
            self.on_unauthorized();
            return;
        }
        self.with_handler(|h| h.on_connection_error(&error));
        self.schedule_retry(now);
    }

    fn on_error(&mut self, error: TransportError) {
        error!("tracking error: {}", error);
        if error.is_unauthorized() {
            self.state.last_error = Some(error);
            self.on_unauthorized();
            return;
        }
        self.with_handler(|h| h.on_connection_error(&error));
        self.state.last_error = Some(error);
    }

    fn on_unauthorized(&mut self) {
        warn!("unauthorized, stopping tracking connection");
        self.disconnect();
        self.state.unauthorized = true;
        self.with_handler(|h| h.on_unauthorized());
    }

    fn schedule_retry(&mut self, now: Instant) {
        if self.state.retry_count >= self.retry.max_retries {
            error!(
                "max retry attempts reached ({}), waiting for manual reconnect",
                self.retry.max_retries
            );
            self.state.retries_exhausted = true;
            self.pending_connect = None;
            return;
        }
        self.state.retry_count += 1;
        let delay = self.retry.delay_for(self.state.retry_count);
        info!(
            "retrying connection in {}ms (attempt {}/{})",
            delay.as_millis(),
            self.state.retry_count,
            self.retry.max_retries
        );
        self.pending_connect = Some(now + delay);
    }

    fn with_handler(&mut self, f: impl FnOnce(&mut dyn TrackingHandler)) {
        if let Some((_, handler)) = self.handler.as_mut() {
            f(handler.as_mut());
        }
    }
}
