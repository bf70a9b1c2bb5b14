#![allow(dead_code)]

use fleet_tracking_core::connection::{
    DisconnectReason, TrackingHandler, Transport, TransportError, TransportEvent,
};
use fleet_tracking_core::entity::TrackingUpdate;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default, Debug)]
pub struct TransportLog {
    pub opens: usize,
    pub closes: usize,
    pub emitted: Vec<(String, Value)>,
}

/// Records what the connection manager asks of the wire. Optionally fails to
/// open, or reports `Connected` through `events` as soon as it is opened.
pub struct MockTransport {
    log: Arc<Mutex<TransportLog>>,
    fail_open: Option<TransportError>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
}

impl MockTransport {
    pub fn new() -> (Self, Arc<Mutex<TransportLog>>) {
        let log = Arc::new(Mutex::new(TransportLog::default()));
        (
            Self {
                log: log.clone(),
                fail_open: None,
                events: None,
            },
            log,
        )
    }

    pub fn failing(error: TransportError) -> (Self, Arc<Mutex<TransportLog>>) {
        let (mut transport, log) = Self::new();
        transport.fail_open = Some(error);
        (transport, log)
    }

    pub fn auto_connect(
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> (Self, Arc<Mutex<TransportLog>>) {
        let (mut transport, log) = Self::new();
        transport.events = Some(events);
        (transport, log)
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        self.log.lock().unwrap().opens += 1;
        if let Some(error) = &self.fail_open {
            return Err(error.clone());
        }
        if let Some(events) = &self.events {
            let _ = events.send(TransportEvent::Connected);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
    }

    fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        self.log
            .lock()
            .unwrap()
            .emitted
            .push((event.to_string(), payload));
        Ok(())
    }
}

#[derive(Default, Debug)]
pub struct HandlerLog {
    pub connects: usize,
    pub disconnects: Vec<DisconnectReason>,
    pub errors: Vec<TransportError>,
    pub unauthorized: usize,
    pub updates: Vec<TrackingUpdate>,
}

pub struct RecordingHandler {
    log: Arc<Mutex<HandlerLog>>,
}

impl RecordingHandler {
    pub fn new() -> (Box<Self>, Arc<Mutex<HandlerLog>>) {
        let log = Arc::new(Mutex::new(HandlerLog::default()));
        (Box::new(Self { log: log.clone() }), log)
    }
}

impl TrackingHandler for RecordingHandler {
    fn on_connect(&mut self) {
        self.log.lock().unwrap().connects += 1;
    }

    fn on_disconnect(&mut self, reason: &DisconnectReason) {
        self.log.lock().unwrap().disconnects.push(reason.clone());
    }

    fn on_connection_error(&mut self, error: &TransportError) {
        self.log.lock().unwrap().errors.push(error.clone());
    }

    fn on_unauthorized(&mut self) {
        self.log.lock().unwrap().unauthorized += 1;
    }

    fn on_tracking_update(&mut self, update: &TrackingUpdate) {
        self.log.lock().unwrap().updates.push(update.clone());
    }
}

pub fn tracking_message(payload: Value) -> TransportEvent {
    TransportEvent::Message {
        event: "fetch-tracking-update".to_string(),
        payload,
    }
}

pub fn bike_payload(id: u64, latitude: f64, longitude: f64) -> Value {
    json!({
        "order_id": id,
        "latitude": latitude,
        "longitude": longitude,
    })
}
