//! Transport adapter boundary
//!
//! The driver never talks to a USB stack directly. It goes through four small traits
//! that mirror the handles it has to own:
//!
//! ```text
//! UsbDevice ──► UsbInterface ──┬──► InPipe   (async interrupt-in reads)
//!                              └──► OutPipe  (bounded interrupt-out writes)
//! ```
//!
//! Pipes are released by consuming their box, so each pipe reference can be given
//! back to the stack at most once. [`nusb_backend`] implements the traits on top of
//! the `nusb` crate; tests substitute their own implementations.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub mod nusb_backend;

pub use nusb_backend::NusbDevice;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to open device: {0}")]
    OpenError(String),

    #[error("Failed to select configuration {value}: {message}")]
    ConfigurationError { value: u8, message: String },

    #[error("No interface found on device")]
    InterfaceNotFound,

    #[error("Expected {expected} endpoints, got {actual}")]
    EndpointCount { expected: usize, actual: usize },

    #[error("No matching {0} endpoint")]
    EndpointMissing(Direction),

    #[error("Short write: {actual} of {expected} bytes")]
    ShortWrite { expected: usize, actual: usize },

    #[error("Read buffer of {actual} bytes rejected, pipe expects {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Transfer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transfer aborted")]
    Aborted,

    #[error("Endpoint stalled")]
    Stall,

    #[error("Device disconnected")]
    Disconnected,

    #[error("{operation} failed: {message} (status {status:?})")]
    Io {
        operation: &'static str,
        message: String,
        status: Option<i32>,
    },
}

impl TransportError {
    /// Errors that mean the pipe is gone rather than a single transfer failing
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportError::Aborted | TransportError::Disconnected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "interrupt-in"),
            Direction::Out => write!(f, "interrupt-out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: usize,
    pub interval: u8,
}

/// Endpoint query; `None` fields match anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRequest {
    pub transfer_type: TransferType,
    pub direction: Direction,
    pub max_packet_size: Option<usize>,
    pub interval: Option<u8>,
}

impl EndpointRequest {
    pub fn interrupt(direction: Direction) -> Self {
        Self {
            transfer_type: TransferType::Interrupt,
            direction,
            max_packet_size: None,
            interval: None,
        }
    }

    pub fn matches(&self, endpoint: &EndpointDescriptor) -> bool {
        endpoint.transfer_type == self.transfer_type
            && endpoint.direction == self.direction
            && self
                .max_packet_size
                .map_or(true, |size| endpoint.max_packet_size == size)
            && self.interval.map_or(true, |interval| endpoint.interval == interval)
    }
}

/// Finds the first endpoint matching `request`
pub fn find_endpoint<'a>(
    endpoints: &'a [EndpointDescriptor],
    request: &EndpointRequest,
) -> Option<&'a EndpointDescriptor> {
    endpoints.iter().find(|endpoint| request.matches(endpoint))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

/// Result of one interrupt-in read
///
/// `data` holds the bytes the transport actually delivered. On failure it is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCompletion {
    pub data: Vec<u8>,
    pub status: Result<(), TransportError>,
}

impl ReadCompletion {
    pub fn success(data: Vec<u8>) -> Self {
        Self {
            data,
            status: Ok(()),
        }
    }

    pub fn failed(error: TransportError) -> Self {
        Self {
            data: Vec::new(),
            status: Err(error),
        }
    }
}

pub trait UsbDevice: Send {
    fn identity(&self) -> DeviceIdentity;

    fn open(&mut self) -> Result<(), TransportError>;

    fn set_configuration(&mut self, value: u8) -> Result<(), TransportError>;

    /// Returns the device's first interface, not yet opened
    fn find_interface(&mut self) -> Result<Box<dyn UsbInterface>, TransportError>;

    fn close(&mut self);
}

pub trait UsbInterface: Send {
    fn open(&mut self) -> Result<(), TransportError>;

    fn endpoints(&self) -> Vec<EndpointDescriptor>;

    fn open_in_pipe(
        &mut self,
        endpoint: &EndpointDescriptor,
    ) -> Result<Box<dyn InPipe>, TransportError>;

    fn open_out_pipe(
        &mut self,
        endpoint: &EndpointDescriptor,
    ) -> Result<Box<dyn OutPipe>, TransportError>;

    fn close(&mut self);
}

#[async_trait]
pub trait OutPipe: Send {
    /// Writes `data` as one transfer and returns the number of bytes the device accepted
    async fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    fn abort(&mut self);

    fn release(self: Box<Self>);
}

#[async_trait]
pub trait InPipe: Send {
    /// Queues one read into `buffer`'s capacity
    fn submit(&mut self, buffer: Vec<u8>) -> Result<(), TransportError>;

    /// Waits for the oldest submitted read. Must be cancel safe.
    async fn next_complete(&mut self) -> ReadCompletion;

    /// Forces every outstanding read to complete with [`TransportError::Aborted`]
    fn abort(&mut self);

    fn release(self: Box<Self>);
}
