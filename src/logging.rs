//! Logging for simulated devices.
//!
//! Every device owns a [`Logger`] that stamps its events with the device id
//! and the component that raised them, and drops them when the device's
//! [`Verbosity`] is too low. Events go through `tracing`; nothing is printed
//! until a subscriber is installed, for example with [`init_events`] or
//! [`init_file_events`].

use crate::{id::DeviceId, packet::Packet};
use std::{
    fmt::Display,
    fs::{create_dir_all, OpenOptions},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How much a device reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Verbosity {
    /// Only warnings and errors.
    Silent = 0,
    /// Protocol events: requests sent, replies received, drops.
    #[default]
    Traffic = 1,
    /// Traffic plus a dump of every packet sent and received.
    Packets = 2,
}

impl From<u8> for Verbosity {
    fn from(level: u8) -> Self {
        match level {
            0 => Self::Silent,
            1 => Self::Traffic,
            _ => Self::Packets,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Normal protocol progress.
    Info,
    /// Something unexpected that the device shrugged off.
    Warn,
    /// A packet or request that had to be dropped.
    Error,
    /// Packet dumps.
    Debug,
}

/// The per-device logging handle. Clones share the verbosity setting.
#[derive(Debug, Clone)]
pub struct Logger {
    device: DeviceId,
    verbosity: Arc<AtomicU8>,
}

impl Logger {
    pub fn new(device: DeviceId, verbosity: Verbosity) -> Self {
        Self {
            device,
            verbosity: Arc::new(AtomicU8::new(verbosity as u8)),
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from(self.verbosity.load(Ordering::Relaxed))
    }

    pub fn set_verbosity(&self, verbosity: Verbosity) {
        self.verbosity.store(verbosity as u8, Ordering::Relaxed);
    }

    fn enabled(&self, severity: Severity) -> bool {
        match severity {
            Severity::Warn | Severity::Error => true,
            Severity::Info => self.verbosity() >= Verbosity::Traffic,
            Severity::Debug => self.verbosity() >= Verbosity::Packets,
        }
    }

    pub fn log(&self, severity: Severity, component: &str, message: impl Display) {
        if !self.enabled(severity) {
            return;
        }
        let device = self.device;
        match severity {
            Severity::Info => tracing::info!(device = %device, component, "{message}"),
            Severity::Warn => tracing::warn!(device = %device, component, "{message}"),
            Severity::Error => tracing::error!(device = %device, component, "{message}"),
            Severity::Debug => tracing::debug!(device = %device, component, "{message}"),
        }
    }

    pub fn info(&self, component: &str, message: impl Display) {
        self.log(Severity::Info, component, message)
    }

    pub fn warn(&self, component: &str, message: impl Display) {
        self.log(Severity::Warn, component, message)
    }

    pub fn error(&self, component: &str, message: impl Display) {
        self.log(Severity::Error, component, message)
    }

    /// Dumps a packet crossing this device, when the verbosity asks for it.
    pub fn packet(&self, direction: &str, packet: &Packet) {
        if self.enabled(Severity::Debug) {
            tracing::debug!(device = %self.device, component = "Packet", direction, "{packet:?}");
        }
    }
}

/// Installs a human-readable subscriber on stdout. The `RUST_LOG` environment
/// variable filters it, defaulting to `info`.
pub fn init_events() -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Installs a subscriber writing JSON lines to a new
/// `debug-<timestamp>.log` file under `dir`. Returns the file's path.
pub fn init_file_events(dir: impl AsRef<Path>) -> Result<PathBuf, LoggingError> {
    let dir = dir.as_ref();
    create_dir_all(dir)?;
    let file_path = dir.join(format!(
        "debug-{}.log",
        chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
    ));
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&file_path)?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(Arc::new(file))
        .json()
        .finish();
    // Global so events from every device task land in the same file
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(file_path)
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("could not open the log file: {0}")]
    Io(#[from] std::io::Error),
    #[error("a global subscriber is already installed")]
    AlreadyInstalled(#[from] SetGlobalDefaultError),
}
