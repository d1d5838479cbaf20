//! Interrupt-in read loop
//!
//! Exactly one read is outstanding at any time. Each completion is decoded and emitted
//! before the next read is submitted, so the receive buffer and [`ControllerState`]
//! never have more than one writer.
//!
//! # State Machine
//!
//! ```text
//! Idle ──► ReadPending ──► Completed ──► ReadPending ──► ...
//!                               │
//!                               └──► Stopped  (terminated, cancelled, error/abort)
//! ```
//!
//! Cancellation while a read is pending aborts the in-pipe and drains the aborted
//! completion, so the loop always ends with no transfer in flight.

use crate::protocol::{decode, ControllerState, DecodeError, READ_BUFFER_SIZE};
use crate::transport::{InPipe, ReadCompletion, TransportError};
use chrono::{DateTime, Local};
use statum::{machine, state};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::emitter::ReportEmitter;

/// Bookkeeping for the single in-flight read
#[derive(Debug, Clone)]
pub struct ReadContext {
    pub id: u64,
    pub submitted_at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Completion observed with the terminated flag set
    Terminated,
    /// Cancellation observed; the in-pipe was aborted by the loop
    Cancelled,
    /// Read completed with an error, including an abort from teardown
    ReadFailed(TransportError),
    /// Submitting the next read failed
    SubmitFailed(TransportError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub submitted: u64,
    pub completed: u64,
    pub reports: u64,
    pub ignored: u64,
    pub decode_errors: u64,
}

#[state]
#[derive(Debug, Clone)]
pub enum ReadState {
    Idle,
    ReadPending(ReadContext),
    Completed(ReadCompletion),
    Stopped,
}

#[machine]
pub struct ReadLoop<S: ReadState> {
    pipe: Box<dyn InPipe>,
    emitter: ReportEmitter,
    controller_state: ControllerState,
    terminated: Arc<AtomicBool>,
    cancel: CancellationToken,
    stats: ReadStats,
    stop_reason: Option<StopReason>,
}

/// Outcome of dispatching one completion
pub enum ReadStep {
    Continue(ReadLoop<ReadPending>),
    Stopped(ReadLoop<Stopped>),
}

impl<S: ReadState> ReadLoop<S> {
    /// Last decoded state; unchanged by reports that are not input reports
    pub fn controller_state(&self) -> ControllerState {
        self.controller_state
    }

    pub fn stats(&self) -> &ReadStats {
        &self.stats
    }

    pub fn emitter(&self) -> &ReportEmitter {
        &self.emitter
    }

    fn submit(&mut self) -> Result<ReadContext, TransportError> {
        let buffer = Vec::with_capacity(READ_BUFFER_SIZE);
        self.pipe.submit(buffer)?;
        self.stats.submitted += 1;

        let context = ReadContext {
            id: self.stats.submitted,
            submitted_at: Local::now(),
        };
        debug!("Submitted read #{}", context.id);
        Ok(context)
    }

    fn handle_decoded(
        &mut self,
        decoded: Result<Option<ControllerState>, DecodeError>,
        len: usize,
        tag: Option<u8>,
    ) {
        match decoded {
            Ok(Some(decoded)) => {
                self.controller_state = decoded;
                self.stats.reports += 1;
                debug!("Decoded input report: {:?}", decoded);
                self.emitter.emit(&decoded);
            }
            Ok(None) => {
                self.stats.ignored += 1;
                debug!("Ignoring {}-byte report with tag {:02x?}", len, tag);
            }
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!("Dropping malformed input report: {}", e);
            }
        }
    }
}

impl ReadLoop<Idle> {
    pub fn create(
        pipe: Box<dyn InPipe>,
        emitter: ReportEmitter,
        terminated: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        debug!("Creating read loop");
        Self::new(
            pipe,
            emitter,
            ControllerState::default(),
            terminated,
            cancel,
            ReadStats::default(),
            None, // stop_reason
        )
    }

    /// Submits the first read
    ///
    /// On failure the loop is returned stopped so its pipe can still be released.
    pub fn start_read(mut self) -> Result<ReadLoop<ReadPending>, ReadLoop<Stopped>> {
        match self.submit() {
            Ok(context) => Ok(self.transition_with(context)),
            Err(e) => {
                error!("Error submitting first read: {}", e);
                self.stop_reason = Some(StopReason::SubmitFailed(e));
                Err(self.transition())
            }
        }
    }
}

impl ReadLoop<ReadPending> {
    pub fn context(&self) -> Option<&ReadContext> {
        self.get_state_data()
    }

    /// Waits for the outstanding read, or aborts and drains it once cancelled
    pub async fn await_completion(mut self) -> ReadLoop<Completed> {
        let completion = tokio::select! {
            completion = self.pipe.next_complete() => Some(completion),
            _ = self.cancel.cancelled() => None,
        };

        let completion = match completion {
            Some(completion) => completion,
            None => {
                debug!("Cancellation observed with a read in flight, aborting in-pipe");
                self.pipe.abort();
                self.pipe.next_complete().await
            }
        };

        if let Some(context) = self.get_state_data() {
            debug!(
                "Read #{} completed after {}ms",
                context.id,
                (Local::now() - context.submitted_at).num_milliseconds()
            );
        }
        self.transition_with(completion)
    }
}

impl ReadLoop<Completed> {
    /// Decodes the completed buffer, then resubmits unless the loop has to stop
    pub fn dispatch(mut self) -> ReadStep {
        let outcome = match self.get_state_data() {
            Some(completion) => match &completion.status {
                Ok(()) => Ok((
                    decode(&completion.data),
                    completion.data.len(),
                    completion.data.first().copied(),
                )),
                Err(e) => Err(e.clone()),
            },
            None => {
                warn!("Completed state without completion data, this should not happen");
                Err(TransportError::Aborted)
            }
        };

        let (decoded, len, tag) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_terminal() {
                    info!("In-pipe read ended: {}", e);
                } else {
                    warn!("Error in in-pipe read: {}", e);
                }
                self.stop_reason = Some(StopReason::ReadFailed(e));
                return ReadStep::Stopped(self.transition());
            }
        };

        self.stats.completed += 1;
        self.handle_decoded(decoded, len, tag);

        if self.terminated.load(Ordering::Acquire) {
            debug!("Device terminated, not resubmitting");
            self.stop_reason = Some(StopReason::Terminated);
            return ReadStep::Stopped(self.transition());
        }
        if self.cancel.is_cancelled() {
            debug!("Read loop cancelled, not resubmitting");
            self.stop_reason = Some(StopReason::Cancelled);
            return ReadStep::Stopped(self.transition());
        }

        match self.submit() {
            Ok(context) => ReadStep::Continue(self.transition_with(context)),
            Err(e) => {
                error!("Error resubmitting read: {}", e);
                self.stop_reason = Some(StopReason::SubmitFailed(e));
                ReadStep::Stopped(self.transition())
            }
        }
    }
}

impl ReadLoop<Stopped> {
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Hands the in-pipe back to its owner for release
    pub fn into_pipe(self) -> Box<dyn InPipe> {
        self.pipe
    }
}

/// Drives the loop until it stops, logging stats every `stats_interval`
pub async fn run_read_loop(
    mut pending: ReadLoop<ReadPending>,
    stats_interval: chrono::Duration,
) -> ReadLoop<Stopped> {
    info!("Starting read loop");
    let mut last_stats_time = Local::now();

    loop {
        let completed = pending.await_completion().await;
        match completed.dispatch() {
            ReadStep::Continue(next) => pending = next,
            ReadStep::Stopped(stopped) => {
                info!(
                    "Read loop stopped ({:?}) after {} reads, {} reports emitted",
                    stopped.stop_reason(),
                    stopped.stats().completed,
                    stopped.emitter().emitted()
                );
                return stopped;
            }
        }

        let now = Local::now();
        if now - last_stats_time > stats_interval {
            let stats = pending.stats();
            info!(
                "Read loop stats: {} reads, {} reports, {} ignored, {} malformed, {} emit failures",
                stats.completed,
                stats.reports,
                stats.ignored,
                stats.decode_errors,
                pending.emitter().failed()
            );
            last_stats_time = now;
        }
    }
}
