//! Input report decoding
//!
//! The pad sends several report types over its interrupt-in endpoint. Only tag `0x20`
//! carries button and axis state; every other tag is ignored. A tag `0x20` report is
//! laid out as:
//!
//! ```text
//! byte  0      tag (0x20)
//! bytes 1-3    header / sequence, unused
//! byte  4      low nibble: sync, -, menu, view   high nibble: A, B, X, Y
//! byte  5      low nibble: d-pad up/down/left/right   high nibble: LB, RB, LS, RS
//! bytes 6-9    left / right trigger, u16 LE
//! bytes 10-17  left x/y, right x/y, i16 LE
//! ```

use super::{INPUT_REPORT_MIN_LEN, INPUT_REPORT_TAG};

/// Size of the blob forwarded to the host HID subsystem
pub const HID_REPORT_SIZE: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Input report too short: expected at least {expected} bytes, got {actual}")]
    ShortReport { expected: usize, actual: usize },
}

/// Position of one analog stick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StickState {
    pub x: i16,
    pub y: i16,
}

/// Decoded controller state
///
/// `buttons` packs twelve button bits (see [`ButtonType::bit`]) in bits 0-11 and the
/// [`HatSwitch`] value in bits 12-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerState {
    pub buttons: u16,
    pub left_trigger: u16,
    pub right_trigger: u16,
    pub left_stick: StickState,
    pub right_stick: StickState,
}

impl ControllerState {
    pub fn hat(&self) -> HatSwitch {
        HatSwitch::from_value((self.buttons >> 12) as u8)
    }

    pub fn is_pressed(&self, button: ButtonType) -> bool {
        self.buttons & (1 << button.bit()) != 0
    }

    /// All buttons currently held, in bit order
    pub fn pressed_buttons(&self) -> Vec<ButtonType> {
        ButtonType::ALL
            .iter()
            .copied()
            .filter(|button| self.is_pressed(*button))
            .collect()
    }
}

/// Hat switch value, clockwise from up; 0 is the null state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum HatSwitch {
    #[default]
    Centered = 0,
    Up = 1,
    UpRight = 2,
    Right = 3,
    DownRight = 4,
    Down = 5,
    DownLeft = 6,
    Left = 7,
    UpLeft = 8,
}

impl HatSwitch {
    // Diagonals must be tested before the cardinals they contain
    const DPAD_PRIORITY: [(u8, HatSwitch); 8] = [
        (0x09, HatSwitch::UpRight),
        (0x0a, HatSwitch::DownRight),
        (0x06, HatSwitch::DownLeft),
        (0x05, HatSwitch::UpLeft),
        (0x01, HatSwitch::Up),
        (0x08, HatSwitch::Right),
        (0x02, HatSwitch::Down),
        (0x04, HatSwitch::Left),
    ];

    /// Resolves the d-pad bits of report byte 5 (only the low nibble is looked at)
    pub fn from_dpad_bits(bits: u8) -> Self {
        Self::DPAD_PRIORITY
            .iter()
            .find(|(mask, _)| bits & mask == *mask)
            .map(|(_, hat)| *hat)
            .unwrap_or(HatSwitch::Centered)
    }

    /// Values outside 1-8 map to the null state
    pub fn from_value(value: u8) -> Self {
        match value {
            1 => HatSwitch::Up,
            2 => HatSwitch::UpRight,
            3 => HatSwitch::Right,
            4 => HatSwitch::DownRight,
            5 => HatSwitch::Down,
            6 => HatSwitch::DownLeft,
            7 => HatSwitch::Left,
            8 => HatSwitch::UpLeft,
            _ => HatSwitch::Centered,
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

// Button type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonType {
    A,
    B,
    X,
    Y,
    LeftBumper,
    RightBumper,
    LeftStick,
    RightStick,
    Sync,
    Start,
    Select,
}

impl ButtonType {
    pub const ALL: [ButtonType; 11] = [
        ButtonType::A,
        ButtonType::B,
        ButtonType::X,
        ButtonType::Y,
        ButtonType::LeftBumper,
        ButtonType::RightBumper,
        ButtonType::LeftStick,
        ButtonType::RightStick,
        ButtonType::Sync,
        ButtonType::Start,
        ButtonType::Select,
    ];

    /// Bit index inside [`ControllerState::buttons`]; bit 9 is never set by the pad
    pub fn bit(self) -> u16 {
        match self {
            ButtonType::A => 0,
            ButtonType::B => 1,
            ButtonType::X => 2,
            ButtonType::Y => 3,
            ButtonType::LeftBumper => 4,
            ButtonType::RightBumper => 5,
            ButtonType::LeftStick => 6,
            ButtonType::RightStick => 7,
            ButtonType::Sync => 8,
            ButtonType::Start => 10,
            ButtonType::Select => 11,
        }
    }
}

/// Decodes one interrupt-in buffer
///
/// Returns `Ok(None)` for anything that is not an input report (including an empty
/// buffer). A tag `0x20` buffer shorter than [`INPUT_REPORT_MIN_LEN`] is rejected
/// without producing any state.
pub fn decode(buffer: &[u8]) -> Result<Option<ControllerState>, DecodeError> {
    if buffer.first() != Some(&INPUT_REPORT_TAG) {
        return Ok(None);
    }

    let report: &[u8; INPUT_REPORT_MIN_LEN] = buffer
        .get(..INPUT_REPORT_MIN_LEN)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(DecodeError::ShortReport {
            expected: INPUT_REPORT_MIN_LEN,
            actual: buffer.len(),
        })?;

    let hat = HatSwitch::from_dpad_bits(report[5]);
    let buttons = u16::from(hat.value() & 0x0f) << 12
        | u16::from(report[4] & 0xf0) >> 4
        | u16::from(report[5] & 0xf0)
        | u16::from(report[4] & 0x0f) << 8;

    Ok(Some(ControllerState {
        buttons,
        left_trigger: u16::from_le_bytes([report[6], report[7]]),
        right_trigger: u16::from_le_bytes([report[8], report[9]]),
        left_stick: StickState {
            x: i16::from_le_bytes([report[10], report[11]]),
            y: i16::from_le_bytes([report[12], report[13]]),
        },
        right_stick: StickState {
            x: i16::from_le_bytes([report[14], report[15]]),
            y: i16::from_le_bytes([report[16], report[17]]),
        },
    }))
}

/// Fixed-size blob handed to the host HID subsystem, laid out as described by
/// [`super::REPORT_DESCRIPTOR`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidReport([u8; HID_REPORT_SIZE]);

impl HidReport {
    pub fn from_bytes(bytes: [u8; HID_REPORT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HID_REPORT_SIZE] {
        &self.0
    }

    fn word(&self, index: usize) -> [u8; 2] {
        [self.0[index * 2], self.0[index * 2 + 1]]
    }
}

impl From<&ControllerState> for HidReport {
    fn from(state: &ControllerState) -> Self {
        let words = [
            state.buttons.to_le_bytes(),
            state.left_trigger.to_le_bytes(),
            state.right_trigger.to_le_bytes(),
            state.left_stick.x.to_le_bytes(),
            state.left_stick.y.to_le_bytes(),
            state.right_stick.x.to_le_bytes(),
            state.right_stick.y.to_le_bytes(),
        ];

        let mut bytes = [0u8; HID_REPORT_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word);
        }
        Self(bytes)
    }
}

impl From<&HidReport> for ControllerState {
    fn from(report: &HidReport) -> Self {
        Self {
            buttons: u16::from_le_bytes(report.word(0)),
            left_trigger: u16::from_le_bytes(report.word(1)),
            right_trigger: u16::from_le_bytes(report.word(2)),
            left_stick: StickState {
                x: i16::from_le_bytes(report.word(3)),
                y: i16::from_le_bytes(report.word(4)),
            },
            right_stick: StickState {
                x: i16::from_le_bytes(report.word(5)),
                y: i16::from_le_bytes(report.word(6)),
            },
        }
    }
}
