//! Ownership of the opened device handles
//!
//! A [`DeviceSession`] owns the device, its interface, both pipes and the read-loop
//! task (which owns the in-pipe while it runs and gives it back when it stops). Every
//! handle is acquired at most once during start-up and released exactly once by
//! [`DeviceSession::destroy`], however many times teardown is requested.

use crate::protocol::{
    CONFIGURATION_VALUE, EXPECTED_ENDPOINTS, IN_ENDPOINT_INTERVAL, IN_ENDPOINT_PACKET_SIZE,
};
use crate::transport::{
    find_endpoint, DeviceIdentity, Direction, EndpointRequest, InPipe, OutPipe, TransportError,
    UsbDevice, UsbInterface,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::driver_handle::DriverError;
use super::emitter::ReportEmitter;
use super::init_sequencer::run_init_sequence;
use super::read_loop::{run_read_loop, Idle, ReadLoop, StopReason, Stopped};

/// Session state published to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Starting,
    Running,
    /// The read loop ended on its own or during teardown
    ReadLoopStopped(StopReason),
    /// Removal acknowledged; no more reports will be delivered
    Terminated,
    Destroyed,
}

/// Interrupt endpoint with the controller's fixed packet size and poll interval
fn interrupt_request(direction: Direction) -> EndpointRequest {
    EndpointRequest {
        max_packet_size: Some(IN_ENDPOINT_PACKET_SIZE),
        interval: Some(IN_ENDPOINT_INTERVAL),
        ..EndpointRequest::interrupt(direction)
    }
}

pub struct DeviceSession {
    identity: DeviceIdentity,
    device: Box<dyn UsbDevice>,
    device_open: bool,
    interface: Option<Box<dyn UsbInterface>>,
    in_pipe: Option<Box<dyn InPipe>>,
    out_pipe: Option<Box<dyn OutPipe>>,
    read_task: Option<JoinHandle<ReadLoop<Stopped>>>,
    terminated: Arc<AtomicBool>,
    cancel: CancellationToken,
    status: Arc<watch::Sender<SessionStatus>>,
    destroyed: bool,
}

impl DeviceSession {
    pub fn new(device: Box<dyn UsbDevice>) -> Self {
        let identity = device.identity();
        let (status, _) = watch::channel(SessionStatus::Starting);
        Self {
            identity,
            device,
            device_open: false,
            interface: None,
            in_pipe: None,
            out_pipe: None,
            read_task: None,
            terminated: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            status: Arc::new(status),
            destroyed: false,
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn publish(&self, status: SessionStatus) {
        debug!("Session status: {:?}", status);
        self.status.send_replace(status);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Flips the terminated flag; returns `false` if it was already set
    pub fn mark_terminated(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    pub fn open_device(&mut self) -> Result<(), DriverError> {
        self.device.open()?;
        self.device_open = true;
        Ok(())
    }

    pub fn select_configuration(&mut self) -> Result<(), DriverError> {
        self.device.set_configuration(CONFIGURATION_VALUE)?;
        debug!("Selected configuration {}", CONFIGURATION_VALUE);
        Ok(())
    }

    pub fn open_interface(&mut self) -> Result<(), DriverError> {
        let mut interface = self.device.find_interface()?;
        interface.open()?;
        self.interface = Some(interface);
        Ok(())
    }

    /// Requires exactly one interrupt-in and one interrupt-out endpoint (64-byte packets,
    /// interval 4) and opens both pipes
    pub fn bind_endpoints(&mut self) -> Result<(), DriverError> {
        let interface = self
            .interface
            .as_mut()
            .ok_or(DriverError::InvalidState("bind endpoints"))?;

        let endpoints = interface.endpoints();
        if endpoints.len() != EXPECTED_ENDPOINTS {
            error!(
                "Expected {} endpoints, got {}",
                EXPECTED_ENDPOINTS,
                endpoints.len()
            );
            return Err(TransportError::EndpointCount {
                expected: EXPECTED_ENDPOINTS,
                actual: endpoints.len(),
            }
            .into());
        }

        let in_endpoint = find_endpoint(&endpoints, &interrupt_request(Direction::In))
            .ok_or(TransportError::EndpointMissing(Direction::In))?;
        let out_endpoint = find_endpoint(&endpoints, &interrupt_request(Direction::Out))
            .ok_or(TransportError::EndpointMissing(Direction::Out))?;

        debug!(
            "Binding in endpoint {:#04x} (interval {}) and out endpoint {:#04x}",
            in_endpoint.address, in_endpoint.interval, out_endpoint.address
        );

        self.in_pipe = Some(interface.open_in_pipe(in_endpoint)?);
        self.out_pipe = Some(interface.open_out_pipe(out_endpoint)?);
        Ok(())
    }

    pub async fn send_init_sequence(&mut self, timeout: Duration) -> Result<(), DriverError> {
        let out_pipe = self
            .out_pipe
            .as_deref_mut()
            .ok_or(DriverError::InvalidState("send init sequence"))?;
        run_init_sequence(out_pipe, timeout).await?;
        Ok(())
    }

    /// Submits the first read and hands the loop to its own task
    pub fn start_read_loop(
        &mut self,
        emitter: ReportEmitter,
        stats_interval: chrono::Duration,
    ) -> Result<(), DriverError> {
        let pipe = self
            .in_pipe
            .take()
            .ok_or(DriverError::InvalidState("start read loop"))?;

        let idle = ReadLoop::<Idle>::create(pipe, emitter, self.terminated.clone(), self.cancel.clone());
        let pending = match idle.start_read() {
            Ok(pending) => pending,
            Err(stopped) => {
                let error = match stopped.stop_reason() {
                    Some(StopReason::SubmitFailed(e)) => e.clone(),
                    _ => TransportError::Aborted,
                };
                self.in_pipe = Some(stopped.into_pipe());
                return Err(DriverError::ReadLoopStart(error));
            }
        };

        self.publish(SessionStatus::Running);

        let status = self.status.clone();
        let task = tokio::spawn(async move {
            let stopped = run_read_loop(pending, stats_interval).await;
            if let Some(reason) = stopped.stop_reason() {
                status.send_replace(SessionStatus::ReadLoopStopped(reason.clone()));
            }
            stopped
        });
        debug!("Read loop task spawned");

        self.read_task = Some(task);
        Ok(())
    }

    /// Aborts and releases both pipes, then closes the interface and the device
    ///
    /// Only the first call does anything.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            debug!("Session for {} already destroyed", self.identity);
            return;
        }
        self.destroyed = true;
        info!("Destroying session for {}", self.identity);

        if let Some(mut out_pipe) = self.out_pipe.take() {
            out_pipe.abort();
            out_pipe.release();
        }

        self.cancel.cancel();
        if let Some(task) = self.read_task.take() {
            match task.await {
                Ok(stopped) => {
                    debug!("Read loop drained: {:?}", stopped.stop_reason());
                    self.in_pipe = Some(stopped.into_pipe());
                }
                Err(e) => error!("Read loop task failed, in-pipe lost: {}", e),
            }
        }

        if let Some(mut in_pipe) = self.in_pipe.take() {
            in_pipe.abort();
            in_pipe.release();
        }

        if let Some(mut interface) = self.interface.take() {
            interface.close();
        }

        if self.device_open {
            self.device.close();
            self.device_open = false;
        }

        info!("Done destroying session for {}", self.identity);
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if !self.destroyed && (self.device_open || self.read_task.is_some()) {
            warn!("Session for {} dropped without teardown", self.identity);
            self.cancel.cancel();
        }
    }
}
