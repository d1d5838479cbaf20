//! Transport adapter over `nusb`
//!
//! Pipes are `nusb` transfer queues. The driver keeps at most one read queued on
//! the interrupt-in queue, and `cancel_all` provides the abort that forces it to
//! complete during teardown.

use super::{
    DeviceIdentity, Direction, EndpointDescriptor, InPipe, OutPipe, ReadCompletion,
    TransferType, TransportError, UsbDevice, UsbInterface,
};
use async_trait::async_trait;
use nusb::transfer::{EndpointType, Queue, RequestBuffer, TransferError};
use std::time::Duration;
use tracing::{debug, info, warn};

fn io_error(operation: &'static str, error: &std::io::Error) -> TransportError {
    TransportError::Io {
        operation,
        message: error.to_string(),
        status: error.raw_os_error(),
    }
}

fn transfer_error(error: TransferError) -> TransportError {
    match error {
        TransferError::Cancelled => TransportError::Aborted,
        TransferError::Stall => TransportError::Stall,
        TransferError::Disconnected => TransportError::Disconnected,
        other => TransportError::Io {
            operation: "transfer",
            message: other.to_string(),
            status: None,
        },
    }
}

fn endpoint_descriptor(endpoint: &nusb::descriptors::Endpoint<'_>) -> EndpointDescriptor {
    EndpointDescriptor {
        address: endpoint.address(),
        direction: match endpoint.direction() {
            nusb::transfer::Direction::In => Direction::In,
            nusb::transfer::Direction::Out => Direction::Out,
        },
        transfer_type: match endpoint.transfer_type() {
            EndpointType::Control => TransferType::Control,
            EndpointType::Isochronous => TransferType::Isochronous,
            EndpointType::Bulk => TransferType::Bulk,
            EndpointType::Interrupt => TransferType::Interrupt,
        },
        max_packet_size: endpoint.max_packet_size(),
        interval: endpoint.interval(),
    }
}

/// A USB device discovered through `nusb`, not yet opened
pub struct NusbDevice {
    info: nusb::DeviceInfo,
    device: Option<nusb::Device>,
}

impl NusbDevice {
    /// Lists every device currently on the bus
    pub fn list() -> Result<Vec<Self>, TransportError> {
        let devices = nusb::list_devices().map_err(|e| io_error("list devices", &e))?;
        Ok(devices
            .map(|info| Self { info, device: None })
            .collect())
    }

    fn opened(&self) -> Result<&nusb::Device, TransportError> {
        self.device.as_ref().ok_or_else(|| TransportError::Io {
            operation: "device access",
            message: "device is not open".to_string(),
            status: None,
        })
    }
}

impl UsbDevice for NusbDevice {
    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: self.info.vendor_id(),
            product_id: self.info.product_id(),
        }
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let device = self
            .info
            .open()
            .map_err(|e| TransportError::OpenError(e.to_string()))?;
        info!(
            "Opened USB device {} on bus {} address {}",
            self.identity(),
            self.info.bus_number(),
            self.info.device_address()
        );
        self.device = Some(device);
        Ok(())
    }

    fn set_configuration(&mut self, value: u8) -> Result<(), TransportError> {
        let device = self.opened()?;

        if let Ok(active) = device.active_configuration() {
            if active.configuration_value() == value {
                debug!("Configuration {} already active", value);
                return Ok(());
            }
        }

        device
            .set_configuration(value)
            .map_err(|e| TransportError::ConfigurationError {
                value,
                message: e.to_string(),
            })
    }

    fn find_interface(&mut self) -> Result<Box<dyn UsbInterface>, TransportError> {
        let device = self.opened()?;
        let configuration = device
            .active_configuration()
            .map_err(|e| TransportError::ConfigurationError {
                value: 0,
                message: e.to_string(),
            })?;

        let alt_setting = configuration
            .interface_alt_settings()
            .next()
            .ok_or(TransportError::InterfaceNotFound)?;

        let endpoints: Vec<EndpointDescriptor> = alt_setting
            .endpoints()
            .map(|endpoint| endpoint_descriptor(&endpoint))
            .collect();
        debug!(
            "Interface {} exposes endpoints: {:?}",
            alt_setting.interface_number(),
            endpoints
        );

        Ok(Box::new(NusbInterface {
            device: device.clone(),
            number: alt_setting.interface_number(),
            endpoints,
            interface: None,
        }))
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            debug!("Closed USB device {}", self.identity());
        }
    }
}

struct NusbInterface {
    device: nusb::Device,
    number: u8,
    endpoints: Vec<EndpointDescriptor>,
    interface: Option<nusb::Interface>,
}

impl NusbInterface {
    fn claimed(&self) -> Result<&nusb::Interface, TransportError> {
        self.interface.as_ref().ok_or_else(|| TransportError::Io {
            operation: "pipe open",
            message: format!("interface {} is not claimed", self.number),
            status: None,
        })
    }
}

impl UsbInterface for NusbInterface {
    fn open(&mut self) -> Result<(), TransportError> {
        #[cfg(target_os = "linux")]
        let claimed = self.device.detach_and_claim_interface(self.number);
        #[cfg(not(target_os = "linux"))]
        let claimed = self.device.claim_interface(self.number);

        let interface = claimed.map_err(|e| io_error("claim interface", &e))?;
        debug!("Claimed interface {}", self.number);
        self.interface = Some(interface);
        Ok(())
    }

    fn endpoints(&self) -> Vec<EndpointDescriptor> {
        self.endpoints.clone()
    }

    fn open_in_pipe(
        &mut self,
        endpoint: &EndpointDescriptor,
    ) -> Result<Box<dyn InPipe>, TransportError> {
        let queue = self.claimed()?.interrupt_in_queue(endpoint.address);
        Ok(Box::new(NusbInPipe {
            queue,
            address: endpoint.address,
        }))
    }

    fn open_out_pipe(
        &mut self,
        endpoint: &EndpointDescriptor,
    ) -> Result<Box<dyn OutPipe>, TransportError> {
        let queue = self.claimed()?.interrupt_out_queue(endpoint.address);
        Ok(Box::new(NusbOutPipe {
            queue,
            address: endpoint.address,
        }))
    }

    fn close(&mut self) {
        if self.interface.take().is_some() {
            debug!("Released interface {}", self.number);
        }
    }
}

struct NusbInPipe {
    queue: Queue<RequestBuffer>,
    address: u8,
}

#[async_trait]
impl InPipe for NusbInPipe {
    fn submit(&mut self, buffer: Vec<u8>) -> Result<(), TransportError> {
        let capacity = buffer.capacity();
        if capacity == 0 {
            return Err(TransportError::BufferSize {
                expected: crate::protocol::READ_BUFFER_SIZE,
                actual: 0,
            });
        }
        self.queue.submit(RequestBuffer::reuse(buffer, capacity));
        Ok(())
    }

    async fn next_complete(&mut self) -> ReadCompletion {
        // nusb panics when waiting on an empty queue
        if self.queue.pending() == 0 {
            return ReadCompletion::failed(TransportError::Aborted);
        }

        let completion = self.queue.next_complete().await;
        match completion.status {
            Ok(()) => ReadCompletion::success(completion.data),
            Err(e) => ReadCompletion::failed(transfer_error(e)),
        }
    }

    fn abort(&mut self) {
        debug!(
            "Aborting {} pending reads on endpoint {:#04x}",
            self.queue.pending(),
            self.address
        );
        self.queue.cancel_all();
    }

    fn release(self: Box<Self>) {
        debug!("Released in-pipe {:#04x}", self.address);
    }
}

struct NusbOutPipe {
    queue: Queue<Vec<u8>>,
    address: u8,
}

#[async_trait]
impl OutPipe for NusbOutPipe {
    async fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        self.queue.submit(data.to_vec());

        let outcome = tokio::time::timeout(timeout, self.queue.next_complete()).await;
        match outcome {
            Ok(completion) => {
                completion.status.map_err(transfer_error)?;
                Ok(completion.data.actual_length())
            }
            Err(_) => {
                warn!(
                    "Write to endpoint {:#04x} timed out after {:?}",
                    self.address, timeout
                );
                self.queue.cancel_all();
                let _cancelled = self.queue.next_complete().await;
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    fn abort(&mut self) {
        self.queue.cancel_all();
    }

    fn release(self: Box<Self>) {
        debug!("Released out-pipe {:#04x}", self.address);
    }
}
