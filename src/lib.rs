//! Userspace driver for the wired Xbox One controller (045E:02D1)
//!
//! Turns a USB interrupt transport into a stream of decoded controller reports:
//!
//! ```text
//! USB ──► transport ──► driver (init, read loop) ──► protocol::decode ──► HidSink
//! ```

pub mod driver;
pub mod protocol;
pub mod transport;
