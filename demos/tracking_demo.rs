use fleet_tracking_core::client::TrackingClient;
use fleet_tracking_core::config::TrackingConfig;
use fleet_tracking_core::connection::{LoggingHandler, Transport, TransportError, TransportEvent};
use fleet_tracking_core::entity::{EntityKind, TrackingUpdate};
use fleet_tracking_core::logs;
use fleet_tracking_core::marker::MarkerBoard;
use fleet_tracking_core::renderer::MarkerServer;
use log::LevelFilter;
use serde_json::{json, Value};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

const START_LAT: f64 = -7.7479;
const START_LNG: f64 = 110.3898;

/// Stands in for the socket: reports itself connected as soon as it is
/// opened and prints whatever the client emits.
struct SimulatedTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Transport for SimulatedTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        self.events
            .send(TransportEvent::Connected)
            .map_err(|e| TransportError::new(e.to_string()))
    }

    fn close(&mut self) {}

    fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        println!("-> {event} {payload}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // usage: tracking_demo [--log-dir <dir>] [config.json]
    let mut log_dir = None;
    let mut config_path = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log-dir" => log_dir = args.next(),
            _ => config_path = Some(arg),
        }
    }

    match log_dir {
        Some(dir) => {
            logs::init(&dir, LevelFilter::Info)?;
            let (sink, lines) = std_mpsc::channel::<String>();
            logs::set_sink(sink);
            std::thread::spawn(move || {
                while let Ok(line) = lines.recv() {
                    println!("{line}");
                }
            });
            println!("Logging to {dir}/tracking.log");
        }
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .format_timestamp(None)
                .format_module_path(false)
                .init();
        }
    }

    let config = match config_path {
        Some(path) => TrackingConfig::load(path)?,
        None => TrackingConfig::default(),
    };

    let mut server = MarkerServer::new("localhost", 0);
    server.start()?;
    let board = Arc::new(Mutex::new(MarkerBoard::new()));
    let token = server.register(Arc::downgrade(&board));

    println!("================================================");
    println!("[Marker Board]:  {}", token.url());
    println!("Press Ctrl+C to exit");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = TrackingClient::new(SimulatedTransport { events: tx.clone() }, &config);
    client.attach_board(board.clone());
    client.seed(vec![
        TrackingUpdate::new(EntityKind::Terminal, "T-01", START_LAT - 0.002, START_LNG)
            .with_metadata("fullname", "Terminal Tugu"),
        TrackingUpdate::new(EntityKind::Terminal, "T-02", START_LAT, START_LNG + 0.004)
            .with_metadata("fullname", "Terminal Malioboro"),
    ]);
    client.initialize(Box::new(LoggingHandler), Instant::now());

    // a few bikes riding in circles around the start point
    tokio::spawn(async move {
        let mut step: u32 = 0;
        loop {
            for bike in 0..3u32 {
                let angle = f64::from(step) / 10.0 + f64::from(bike) * 2.0;
                let radius = 0.001 * f64::from(bike + 1);
                let terminal = if bike == 0 {
                    "Terminal Tugu"
                } else {
                    "Terminal Malioboro"
                };
                let payload = json!({
                    "order_id": 100 + bike,
                    "latitude": START_LAT + radius * angle.sin(),
                    "longitude": START_LNG + radius * angle.cos(),
                    "status_active": bike != 2,
                    "terminal_to": terminal,
                });
                let event = TransportEvent::Message {
                    event: "fetch-tracking-update".to_string(),
                    payload,
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            step = step.wrapping_add(1);
            tokio::time::sleep(Duration::from_millis(1000)).await;
        }
    });

    let (stop, shutdown) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Ctrl+C pressed. Stopping...");
        }
        let _ = stop.send(());
    });

    client.run(&mut rx, shutdown).await;
    server.stop();
    Ok(())
}
