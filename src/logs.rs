use std::{
    path::Path,
    sync::{mpsc, LazyLock, Mutex},
    thread,
};

use anyhow::Result;
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    {ContentLimit, FileRotate},
};
use log::Log;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

/// Where the host application wants log lines delivered (e.g. a debug panel).
static LOG_SINK: LazyLock<Mutex<Option<mpsc::Sender<String>>>> =
    LazyLock::new(|| Mutex::new(None));

/// Feeds the dispatcher thread, which forwards to `LOG_SINK`.
static LOG_SENDER: LazyLock<Mutex<Option<mpsc::Sender<String>>>> =
    LazyLock::new(|| Mutex::new(None));

pub struct MainLogger {
    write_logger: Box<WriteLogger<FileRotate<AppendTimestamp>>>,
}

impl MainLogger {
    fn new(write_logger: Box<WriteLogger<FileRotate<AppendTimestamp>>>) -> Self {
        Self { write_logger }
    }
}

impl Log for MainLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.write_logger.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.write_logger.log(record);

        let message = format!(
            "{}:{} -- {}",
            record.level(),
            record.target(),
            record.args()
        );

        match LOG_SENDER.lock() {
            Ok(guard) => match guard.as_ref() {
                // dispatcher gone means nobody is listening, dropping is fine
                Some(tx) => {
                    let _ = tx.send(message);
                }
                None => eprintln!("{}", message),
            },
            Err(_) => eprintln!("{}", message),
        }
    }

    fn flush(&self) {
        self.write_logger.flush();
    }
}

/// Installs the global logger: a rolling file under `<log_dir>/tracking.log`
/// plus forwarding to the sink registered with `set_sink`.
pub fn init(log_dir: &str, level: LevelFilter) -> Result<()> {
    let path = Path::new(log_dir).join("tracking.log");
    let log = FileRotate::new(
        path,
        AppendTimestamp::default(FileLimit::MaxFiles(3)),
        ContentLimit::Lines(1000),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let write_logger = WriteLogger::new(level, config, log);
    let main_logger = MainLogger::new(write_logger);
    log::set_boxed_logger(Box::new(main_logger))?;
    log::set_max_level(level);

    init_dispatcher();

    Ok(())
}

fn init_dispatcher() {
    let mut guard = match LOG_SENDER.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if guard.is_some() {
        return;
    }

    let (tx, rx) = mpsc::channel::<String>();
    *guard = Some(tx);

    thread::spawn(move || {
        while let Ok(msg) = rx.recv() {
            // clone the sender out so a slow sink never holds the lock
            let sink = LOG_SINK.lock().ok().and_then(|guard| guard.clone());
            if let Some(sink) = sink {
                if sink.send(msg).is_err() {
                    clear_sink();
                }
            }
        }
    });
}

pub fn set_sink(sink: mpsc::Sender<String>) {
    if let Ok(mut guard) = LOG_SINK.lock() {
        *guard = Some(sink);
    }
}

pub fn clear_sink() {
    if let Ok(mut guard) = LOG_SINK.lock() {
        *guard = None;
    }
}
