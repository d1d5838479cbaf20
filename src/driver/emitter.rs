//! Boundary to the host HID subsystem
//!
//! The read loop hands every decoded [`ControllerState`] to a [`ReportEmitter`], which
//! serialises it into the fixed [`HidReport`] blob and forwards it to a [`HidSink`].
//! A failed forward is logged and counted; the next report is attempted independently.

use crate::protocol::{ControllerState, HidReport, REPORT_DESCRIPTOR};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("Report channel is full")]
    ChannelFull,

    #[error("Report channel closed")]
    ChannelClosed,

    #[error("Host rejected report: {0}")]
    Rejected(String),
}

/// Receiver of finished reports, i.e. the host input subsystem
pub trait HidSink: Send {
    /// The descriptor the host uses to parse every report; queried once at start-up
    fn report_descriptor(&self) -> &'static [u8] {
        REPORT_DESCRIPTOR
    }

    fn handle_report(&mut self, report: HidReport) -> Result<(), EmitError>;
}

/// Forwards reports over a bounded channel without blocking the read loop
pub struct ChannelSink {
    sender: mpsc::Sender<HidReport>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<HidReport>) -> Self {
        Self { sender }
    }
}

impl HidSink for ChannelSink {
    fn handle_report(&mut self, report: HidReport) -> Result<(), EmitError> {
        self.sender.try_send(report).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EmitError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => EmitError::ChannelClosed,
        })
    }
}

pub struct ReportEmitter {
    sink: Box<dyn HidSink>,
    emitted: u64,
    failed: u64,
}

impl ReportEmitter {
    pub fn new(sink: Box<dyn HidSink>) -> Self {
        debug!(
            "Report emitter using {}-byte report descriptor",
            sink.report_descriptor().len()
        );
        Self {
            sink,
            emitted: 0,
            failed: 0,
        }
    }

    /// Forwards a copy of `state`; returns whether the sink accepted it
    pub fn emit(&mut self, state: &ControllerState) -> bool {
        match self.sink.handle_report(HidReport::from(state)) {
            Ok(()) => {
                self.emitted += 1;
                true
            }
            Err(e) => {
                self.failed += 1;
                warn!("Error forwarding HID report: {}", e);
                false
            }
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}
