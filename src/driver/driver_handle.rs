//! Driver Handle - lifecycle of one attached controller
//!
//! Models the attach/start/terminate/stop hooks of a device driver as a typestate
//! machine. Each transition consumes the previous state, so start-up cannot run twice
//! and a destroyed driver cannot be restarted.
//!
//! # State Machine
//!
//! ```text
//! Unattached ──► Attached ──► Started ──► Terminating ──► Destroyed
//!   (probe)       (start)        │           (stop)           ▲
//!                                └────────────(stop)──────────┘
//! ```
//!
//! `start` brings the device up in a fixed order and unwinds everything it opened if
//! any step fails:
//!
//! ```text
//! open device ─► select config 1 ─► open interface ─► bind in/out pipes
//!             ─► init sequence ─► first read ─► read loop task
//! ```

use crate::protocol::{PIPE_TIMEOUT, PROBE_SCORE, PRODUCT_ID, VENDOR_ID};
use crate::transport::{DeviceIdentity, TransportError, UsbDevice};
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::emitter::{HidSink, ReportEmitter};
use super::init_sequencer::InitError;
use super::session::{DeviceSession, SessionStatus};

/// Runtime settings; protocol values stay constants in [`crate::protocol`]
///
/// # Examples
///
/// ```rust
/// use xbo_controller::driver::DriverSettings;
///
/// let settings = DriverSettings {
///     write_timeout_ms: 500,
///     ..DriverSettings::default()
/// };
/// assert_eq!(settings.stats_interval_secs, 30);
/// ```
#[derive(Clone, Debug)]
pub struct DriverSettings {
    /// Bound applied to each init write
    pub write_timeout_ms: u64,

    /// How often the read loop logs its counters
    pub stats_interval_secs: i64,
}

const DEFAULT_STATS_INTERVAL_SECS: i64 = 30;

impl DriverSettings {
    /// Stats window for the read loop; falls back to the default for non-positive
    /// or out-of-range values
    pub fn stats_interval(&self) -> chrono::Duration {
        match chrono::Duration::try_seconds(self.stats_interval_secs) {
            Some(interval) if self.stats_interval_secs > 0 => interval,
            _ => {
                warn!(
                    "Invalid stats interval of {}s, using {}s",
                    self.stats_interval_secs, DEFAULT_STATS_INTERVAL_SECS
                );
                chrono::Duration::seconds(DEFAULT_STATS_INTERVAL_SECS)
            }
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: PIPE_TIMEOUT.as_millis() as u64,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The device is not the supported controller; a normal "do not attach" outcome
    #[error("Device {0} is not a supported controller")]
    NotSupported(DeviceIdentity),

    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),

    #[error("{0}")]
    InitError(#[from] InitError),

    #[error("Failed to submit first read: {0}")]
    ReadLoopStart(TransportError),

    #[error("Session is not ready to {0}")]
    InvalidState(&'static str),
}

/// Match predicate for the controller; returns the match score when suitable
pub fn probe(identity: &DeviceIdentity) -> Option<i32> {
    let suitable = identity.vendor_id == VENDOR_ID && identity.product_id == PRODUCT_ID;
    if suitable {
        info!("Device {} is suitable, score {}", identity, PROBE_SCORE);
        Some(PROBE_SCORE)
    } else {
        debug!("Device {} is not suitable", identity);
        None
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum DriverState {
    Unattached,
    Attached,
    Started,
    Terminating,
    Destroyed,
}

#[machine]
pub struct XboDriver<S: DriverState> {
    session: DeviceSession,
    settings: DriverSettings,
}

impl<S: DriverState> XboDriver<S> {
    pub fn identity(&self) -> DeviceIdentity {
        self.session.identity()
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Status updates for this device, including the termination acknowledgement
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.session.subscribe()
    }

    pub fn is_terminated(&self) -> bool {
        self.session.is_terminated()
    }

    async fn shutdown(&mut self) {
        if self.session.is_terminated() {
            debug!("Termination already tore the session down");
        } else {
            self.session.destroy().await;
        }
        self.session.publish(SessionStatus::Destroyed);
    }
}

impl XboDriver<Unattached> {
    pub fn create(device: Box<dyn UsbDevice>, settings: Option<DriverSettings>) -> Self {
        let settings = settings.unwrap_or_default();
        debug!("Creating driver with settings: {:?}", settings);
        Self::new(DeviceSession::new(device), settings)
    }

    pub fn probe(self) -> Result<XboDriver<Attached>, DriverError> {
        match probe(&self.identity()) {
            Some(_) => Ok(self.transition()),
            None => Err(DriverError::NotSupported(self.identity())),
        }
    }
}

impl XboDriver<Attached> {
    /// Brings the device up and starts streaming reports into `sink`
    ///
    /// On failure every handle opened so far is released before the error is returned.
    pub async fn start(mut self, sink: Box<dyn HidSink>) -> Result<XboDriver<Started>, DriverError> {
        info!("Starting driver for {}", self.identity());

        match self.bring_up(sink).await {
            Ok(()) => {
                info!("Driver started for {}", self.identity());
                Ok(self.transition())
            }
            Err(e) => {
                error!("Error starting driver: {}", e);
                self.session.destroy().await;
                Err(e)
            }
        }
    }

    async fn bring_up(&mut self, sink: Box<dyn HidSink>) -> Result<(), DriverError> {
        self.session.open_device()?;
        self.session.select_configuration()?;
        self.session.open_interface()?;
        self.session.bind_endpoints()?;
        self.session
            .send_init_sequence(Duration::from_millis(self.settings.write_timeout_ms))
            .await?;
        self.session.start_read_loop(
            ReportEmitter::new(sink),
            self.settings.stats_interval(),
        )?;
        Ok(())
    }
}

impl XboDriver<Started> {
    /// Removal path: flag, tear down, then acknowledge to subscribers
    pub async fn terminate(mut self) -> XboDriver<Terminating> {
        info!("Device {} terminated", self.identity());
        if self.session.mark_terminated() {
            self.session.destroy().await;
        } else {
            debug!("Termination already signalled");
        }
        self.session.publish(SessionStatus::Terminated);
        self.transition()
    }

    pub async fn stop(mut self) -> XboDriver<Destroyed> {
        info!("Stopping driver for {}", self.identity());
        self.shutdown().await;
        self.transition()
    }
}

impl XboDriver<Terminating> {
    pub async fn stop(mut self) -> XboDriver<Destroyed> {
        info!("Stopping terminated driver for {}", self.identity());
        self.shutdown().await;
        self.transition()
    }
}
