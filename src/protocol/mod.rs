//! Wire protocol of the Xbox One controller (045E:02D1)
//!
//! Everything in here is fixed protocol data or a pure function over it:
//!
//! 1. [`INIT_SEQUENCES`] - the four vendor commands that switch the pad into input-reporting mode
//! 2. [`report`] - decoding of tag `0x20` input reports into [`ControllerState`]
//! 3. [`descriptor`] - the HID report descriptor handed to the host input subsystem
//!
//! # Data Flow
//!
//! ```text
//! interrupt-in ──► decode() ──► ControllerState ──► HidReport ──► host HID
//!   (64 bytes)     (tag 0x20)                      (14 bytes)
//! ```

use std::time::Duration;

pub mod descriptor;
pub mod report;

pub use descriptor::REPORT_DESCRIPTOR;
pub use report::{
    decode, ButtonType, ControllerState, DecodeError, HatSwitch, HidReport, StickState,
    HID_REPORT_SIZE,
};

/// USB vendor id of the controller (Microsoft)
pub const VENDOR_ID: u16 = 0x045E;

/// USB product id of the controller
pub const PRODUCT_ID: u16 = 0x02D1;

/// Match score reported by [`crate::driver::probe`], high enough to outrank generic HID drivers
pub const PROBE_SCORE: i32 = 90_000;

/// The device exposes exactly one configuration
pub const CONFIGURATION_VALUE: u8 = 1;

/// Number of endpoints the single interface must expose
pub const EXPECTED_ENDPOINTS: usize = 2;

/// Packet size both interrupt pipes are requested with
pub const IN_ENDPOINT_PACKET_SIZE: usize = 64;

/// Poll interval both interrupt pipes are requested with
pub const IN_ENDPOINT_INTERVAL: u8 = 4;

/// Capacity of every interrupt-in read
pub const READ_BUFFER_SIZE: usize = 64;

/// Bound applied to each init write by the transport
pub const PIPE_TIMEOUT: Duration = Duration::from_millis(200);

/// First byte of an input (button/axis state) report
pub const INPUT_REPORT_TAG: u8 = 0x20;

/// Shortest buffer that carries a complete input report
pub const INPUT_REPORT_MIN_LEN: usize = 18;

const INIT_SEQUENCE_1: &[u8] = &[
    0x05, 0x20, 0x00, 0x09, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x55, 0x53,
];
const INIT_SEQUENCE_2: &[u8] = &[0x05, 0x20, 0x01, 0x01, 0x00];
const INIT_SEQUENCE_3: &[u8] = &[0x0a, 0x20, 0x02, 0x03, 0x00, 0x01, 0x14];
const INIT_SEQUENCE_4: &[u8] = &[
    0x09, 0x00, 0x03, 0x09, 0x00, 0x0f, 0x00, 0x00, 0x1d, 0x1d, 0xff, 0x00, 0x00,
];

/// Commands written to the interrupt-out endpoint, in this order, before the pad reports input
pub const INIT_SEQUENCES: [&[u8]; 4] = [
    INIT_SEQUENCE_1,
    INIT_SEQUENCE_2,
    INIT_SEQUENCE_3,
    INIT_SEQUENCE_4,
];
