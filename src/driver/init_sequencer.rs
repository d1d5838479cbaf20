use crate::protocol::INIT_SEQUENCES;
use crate::transport::{OutPipe, TransportError};
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Init sequence {step}/{total} failed: {source}")]
pub struct InitError {
    /// 1-based index of the sequence that failed
    pub step: usize,
    pub total: usize,
    #[source]
    pub source: TransportError,
}

/// Writes the four init sequences to the out-pipe, strictly in order
///
/// Each sequence is a single write bounded by `timeout`. A write counts only if the
/// transport accepted every byte. The first failure aborts the whole sequence; later
/// sequences are never attempted and nothing is retried.
pub async fn run_init_sequence(
    out_pipe: &mut dyn OutPipe,
    timeout: Duration,
) -> Result<(), InitError> {
    let total = INIT_SEQUENCES.len();
    info!("Sending {} init sequences", total);

    for (index, sequence) in INIT_SEQUENCES.iter().enumerate() {
        let step = index + 1;
        debug!("Writing init sequence {}/{}: {:02x?}", step, total, sequence);

        let written = out_pipe
            .write(sequence, timeout)
            .await
            .and_then(|written| {
                if written == sequence.len() {
                    Ok(written)
                } else {
                    Err(TransportError::ShortWrite {
                        expected: sequence.len(),
                        actual: written,
                    })
                }
            });

        match written {
            Ok(_) => debug!("Done writing init sequence {}/{}", step, total),
            Err(e) => {
                error!("Error writing init sequence {}/{}: {}", step, total, e);
                return Err(InitError {
                    step,
                    total,
                    source: e,
                });
            }
        }
    }

    info!("Init sequence accepted, controller is reporting input");
    Ok(())
}
