mod common;

use common::{snapshot, MockOutPipe, SharedLog};
use xbo_controller::driver::run_init_sequence;
use xbo_controller::protocol::{INIT_SEQUENCES, PIPE_TIMEOUT};
use xbo_controller::transport::TransportError;

#[tokio::test]
async fn writes_all_sequences_in_order() {
    let log = SharedLog::default();
    let mut pipe = MockOutPipe::new(log.clone(), None, None);

    run_init_sequence(&mut pipe, PIPE_TIMEOUT).await.unwrap();

    let expected: Vec<Vec<u8>> = INIT_SEQUENCES.iter().map(|s| s.to_vec()).collect();
    assert_eq!(snapshot(&log).writes, expected);
}

#[tokio::test]
async fn failed_write_stops_the_sequence() {
    let log = SharedLog::default();
    let mut pipe = MockOutPipe::new(log.clone(), Some(1), None);

    let err = run_init_sequence(&mut pipe, PIPE_TIMEOUT).await.unwrap_err();

    assert_eq!(err.step, 2);
    assert_eq!(err.total, 4);
    assert_eq!(err.source, TransportError::Timeout(PIPE_TIMEOUT));

    let writes = snapshot(&log).writes;
    assert_eq!(writes.len(), 2, "sequences 3 and 4 must not be attempted");
    assert_eq!(writes[1], INIT_SEQUENCES[1]);
}

#[tokio::test]
async fn short_write_counts_as_failure() {
    let log = SharedLog::default();
    let mut pipe = MockOutPipe::new(log.clone(), None, Some(0));

    let err = run_init_sequence(&mut pipe, PIPE_TIMEOUT).await.unwrap_err();

    assert_eq!(err.step, 1);
    assert_eq!(
        err.source,
        TransportError::ShortWrite {
            expected: INIT_SEQUENCES[0].len(),
            actual: INIT_SEQUENCES[0].len() - 1,
        }
    );
    assert_eq!(snapshot(&log).writes.len(), 1);
}
