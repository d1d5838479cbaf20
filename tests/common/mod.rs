#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use xbo_controller::driver::{EmitError, HidSink};
use xbo_controller::protocol::{HidReport, PRODUCT_ID, VENDOR_ID};
use xbo_controller::transport::{
    DeviceIdentity, Direction, EndpointDescriptor, InPipe, OutPipe, ReadCompletion, TransferType,
    TransportError, UsbDevice, UsbInterface,
};

pub const CONTROLLER: DeviceIdentity = DeviceIdentity {
    vendor_id: VENDOR_ID,
    product_id: PRODUCT_ID,
};

/// Pipe-level calls and sink deliveries, in the order they happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Write,
    Submit,
    Report,
    InAbort,
    OutAbort,
    InRelease,
    OutRelease,
}

/// Everything the driver did to the mock transport
#[derive(Debug, Default, Clone)]
pub struct TransportLog {
    pub events: Vec<Event>,
    pub device_opens: usize,
    pub device_closes: usize,
    pub configurations: Vec<u8>,
    pub interface_opens: usize,
    pub interface_closes: usize,
    /// Every write attempt, including failed ones
    pub writes: Vec<Vec<u8>>,
    pub submits: usize,
    pub in_aborts: usize,
    pub out_aborts: usize,
    pub in_releases: usize,
    pub out_releases: usize,
}

pub type SharedLog = Arc<Mutex<TransportLog>>;

pub fn snapshot(log: &SharedLog) -> TransportLog {
    log.lock().unwrap().clone()
}

/// Host sink that records each delivered report in the transport log
pub struct LoggingSink {
    log: SharedLog,
}

impl LoggingSink {
    pub fn new(log: SharedLog) -> Self {
        Self { log }
    }
}

impl HidSink for LoggingSink {
    fn handle_report(&mut self, _report: HidReport) -> Result<(), EmitError> {
        self.log.lock().unwrap().events.push(Event::Report);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub identity: DeviceIdentity,
    pub endpoints: Vec<EndpointDescriptor>,
    /// 0-based index of the write that times out
    pub fail_write_at: Option<usize>,
    /// 0-based index of the write that only gets part of its bytes through
    pub short_write_at: Option<usize>,
    /// 0-based index of the submit that is rejected
    pub fail_submit_at: Option<usize>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            identity: CONTROLLER,
            endpoints: vec![
                interrupt_endpoint(0x81, Direction::In),
                interrupt_endpoint(0x01, Direction::Out),
            ],
            fail_write_at: None,
            short_write_at: None,
            fail_submit_at: None,
        }
    }
}

pub fn interrupt_endpoint(address: u8, direction: Direction) -> EndpointDescriptor {
    EndpointDescriptor {
        address,
        direction,
        transfer_type: TransferType::Interrupt,
        max_packet_size: 64,
        interval: 4,
    }
}

/// Test side of a mock device: the call log and the feed of read completions
pub struct MockHandle {
    pub log: SharedLog,
    pub completions: mpsc::UnboundedSender<ReadCompletion>,
}

impl MockHandle {
    pub fn complete(&self, data: Vec<u8>) {
        self.completions
            .send(ReadCompletion::success(data))
            .expect("in-pipe dropped");
    }

    pub fn fail(&self, error: TransportError) {
        self.completions
            .send(ReadCompletion::failed(error))
            .expect("in-pipe dropped");
    }

    pub fn log(&self) -> TransportLog {
        snapshot(&self.log)
    }
}

pub fn mock_device(config: MockConfig) -> (MockDevice, MockHandle) {
    let log = SharedLog::default();
    let (sender, receiver) = mpsc::unbounded_channel();
    let device = MockDevice {
        config,
        log: log.clone(),
        completions: Some(receiver),
        open: false,
    };
    (
        device,
        MockHandle {
            log,
            completions: sender,
        },
    )
}

pub struct MockDevice {
    config: MockConfig,
    log: SharedLog,
    completions: Option<mpsc::UnboundedReceiver<ReadCompletion>>,
    open: bool,
}

impl UsbDevice for MockDevice {
    fn identity(&self) -> DeviceIdentity {
        self.config.identity
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.open = true;
        self.log.lock().unwrap().device_opens += 1;
        Ok(())
    }

    fn set_configuration(&mut self, value: u8) -> Result<(), TransportError> {
        assert!(self.open, "configuration selected on a closed device");
        self.log.lock().unwrap().configurations.push(value);
        Ok(())
    }

    fn find_interface(&mut self) -> Result<Box<dyn UsbInterface>, TransportError> {
        Ok(Box::new(MockInterface {
            config: self.config.clone(),
            log: self.log.clone(),
            completions: self.completions.take(),
        }))
    }

    fn close(&mut self) {
        self.open = false;
        self.log.lock().unwrap().device_closes += 1;
    }
}

pub struct MockInterface {
    config: MockConfig,
    log: SharedLog,
    completions: Option<mpsc::UnboundedReceiver<ReadCompletion>>,
}

impl UsbInterface for MockInterface {
    fn open(&mut self) -> Result<(), TransportError> {
        self.log.lock().unwrap().interface_opens += 1;
        Ok(())
    }

    fn endpoints(&self) -> Vec<EndpointDescriptor> {
        self.config.endpoints.clone()
    }

    fn open_in_pipe(
        &mut self,
        _endpoint: &EndpointDescriptor,
    ) -> Result<Box<dyn InPipe>, TransportError> {
        let completions = self.completions.take().ok_or(TransportError::Io {
            operation: "open in-pipe",
            message: "in-pipe already opened".to_string(),
            status: None,
        })?;
        Ok(Box::new(MockInPipe::new(
            self.log.clone(),
            completions,
            self.config.fail_submit_at,
        )))
    }

    fn open_out_pipe(
        &mut self,
        _endpoint: &EndpointDescriptor,
    ) -> Result<Box<dyn OutPipe>, TransportError> {
        Ok(Box::new(MockOutPipe::new(
            self.log.clone(),
            self.config.fail_write_at,
            self.config.short_write_at,
        )))
    }

    fn close(&mut self) {
        self.log.lock().unwrap().interface_closes += 1;
    }
}

/// In-pipe fed from a channel; a closed channel reads as a disconnected device
pub struct MockInPipe {
    log: SharedLog,
    completions: mpsc::UnboundedReceiver<ReadCompletion>,
    fail_submit_at: Option<usize>,
    submitted: usize,
    pending: usize,
    aborted: bool,
}

impl MockInPipe {
    pub fn new(
        log: SharedLog,
        completions: mpsc::UnboundedReceiver<ReadCompletion>,
        fail_submit_at: Option<usize>,
    ) -> Self {
        Self {
            log,
            completions,
            fail_submit_at,
            submitted: 0,
            pending: 0,
            aborted: false,
        }
    }

    /// A standalone pipe and the sender that feeds it
    pub fn channel(log: SharedLog) -> (Self, mpsc::UnboundedSender<ReadCompletion>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(log, receiver, None), sender)
    }
}

#[async_trait]
impl InPipe for MockInPipe {
    fn submit(&mut self, buffer: Vec<u8>) -> Result<(), TransportError> {
        let index = self.submitted;
        self.submitted += 1;
        if self.fail_submit_at == Some(index) {
            return Err(TransportError::Stall);
        }
        assert!(buffer.capacity() >= 64, "read buffer too small");
        assert_eq!(self.pending, 0, "more than one read in flight");
        self.pending += 1;
        let mut log = self.log.lock().unwrap();
        log.submits += 1;
        log.events.push(Event::Submit);
        Ok(())
    }

    async fn next_complete(&mut self) -> ReadCompletion {
        if self.pending == 0 {
            return ReadCompletion::failed(TransportError::Aborted);
        }
        if self.aborted {
            self.pending -= 1;
            self.aborted = self.pending > 0;
            return ReadCompletion::failed(TransportError::Aborted);
        }

        let completion = match self.completions.recv().await {
            Some(completion) => completion,
            None => ReadCompletion::failed(TransportError::Disconnected),
        };
        self.pending -= 1;
        completion
    }

    fn abort(&mut self) {
        self.aborted = self.pending > 0;
        let mut log = self.log.lock().unwrap();
        log.in_aborts += 1;
        log.events.push(Event::InAbort);
    }

    fn release(self: Box<Self>) {
        let mut log = self.log.lock().unwrap();
        log.in_releases += 1;
        log.events.push(Event::InRelease);
    }
}

pub struct MockOutPipe {
    log: SharedLog,
    fail_write_at: Option<usize>,
    short_write_at: Option<usize>,
}

impl MockOutPipe {
    pub fn new(log: SharedLog, fail_write_at: Option<usize>, short_write_at: Option<usize>) -> Self {
        Self {
            log,
            fail_write_at,
            short_write_at,
        }
    }
}

#[async_trait]
impl OutPipe for MockOutPipe {
    async fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        let index = {
            let mut log = self.log.lock().unwrap();
            log.writes.push(data.to_vec());
            log.events.push(Event::Write);
            log.writes.len() - 1
        };

        if self.fail_write_at == Some(index) {
            return Err(TransportError::Timeout(timeout));
        }
        if self.short_write_at == Some(index) {
            return Ok(data.len() - 1);
        }
        Ok(data.len())
    }

    fn abort(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.out_aborts += 1;
        log.events.push(Event::OutAbort);
    }

    fn release(self: Box<Self>) {
        let mut log = self.log.lock().unwrap();
        log.out_releases += 1;
        log.events.push(Event::OutRelease);
    }
}

/// An 18-byte input report with the given buttons, triggers and sticks
pub fn input_report(b4: u8, b5: u8, triggers: (u16, u16), sticks: [i16; 4]) -> Vec<u8> {
    let mut report = vec![0x20, 0x00, 0x05, 0x0e, b4, b5];
    report.extend_from_slice(&triggers.0.to_le_bytes());
    report.extend_from_slice(&triggers.1.to_le_bytes());
    for axis in sticks {
        report.extend_from_slice(&axis.to_le_bytes());
    }
    report
}
