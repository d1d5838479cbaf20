//! Driver subsystem for one attached controller
//!
//! Four components share the work:
//!
//! 1. [`init_sequencer`] - writes the vendor init commands, in order, before any read
//! 2. [`read_loop`] - keeps exactly one interrupt-in read in flight and decodes each completion
//! 3. [`emitter`] - serialises decoded state and forwards it to the host HID subsystem
//! 4. [`session`] / [`driver_handle`] - handle ownership, start-up, and idempotent teardown
//!
//! # Architecture
//!
//! ```text
//! XboDriver ──► DeviceSession ──► init sequence ──► ReadLoop task
//!                    ▲                                  │
//!                    │ (in-pipe handed back)     decode ─► emit ─► resubmit
//!                    └──────────── destroy ◄── terminated / cancel
//! ```

pub mod driver_handle;
pub mod emitter;
pub mod init_sequencer;
pub mod read_loop;
pub mod session;

pub use driver_handle::{
    probe, Attached, Destroyed, DriverError, DriverSettings, Started, Terminating, Unattached,
    XboDriver,
};
pub use emitter::{ChannelSink, EmitError, HidSink, ReportEmitter};
pub use init_sequencer::{run_init_sequence, InitError};
pub use read_loop::{run_read_loop, ReadLoop, ReadStats, ReadStep, StopReason};
pub use session::{DeviceSession, SessionStatus};
