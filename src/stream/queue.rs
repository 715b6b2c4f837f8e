//! Input and output queues shared by a stream and its worker threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crossbeam::channel::{Receiver, Sender, TrySendError};

use crate::error::Result;

/// Producer side of a stream's input queue.
///
/// The queue is bounded; when it is full the oldest report is dropped to
/// make room, so a slow consumer sees the most recent device state.
pub(crate) struct InputSink {
    tx: Sender<Vec<u8>>,
    // Second handle on the queue, used only to evict the oldest report.
    evict: Receiver<Vec<u8>>,
    dropped: AtomicU64,
}

impl InputSink {
    pub(crate) fn new(tx: Sender<Vec<u8>>, evict: Receiver<Vec<u8>>) -> Self {
        Self {
            tx,
            evict,
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn push(&self, report: Vec<u8>) {
        let mut report = report;
        loop {
            match self.tx.try_send(report) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    let _ = self.evict.try_recv();
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if total.is_power_of_two() {
                        tracing::warn!(dropped = total, "input queue full; dropping oldest reports");
                    }
                    report = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// What a backend reader sees while it runs.
pub struct ReaderContext<'a> {
    sink: &'a InputSink,
    shutdown: &'a AtomicBool,
}

impl<'a> ReaderContext<'a> {
    pub(crate) fn new(sink: &'a InputSink, shutdown: &'a AtomicBool) -> Self {
        Self { sink, shutdown }
    }

    /// Queues one input report. The first byte must be the Report ID.
    pub fn push(&self, report: Vec<u8>) {
        self.sink.push(report);
    }

    /// True once the stream is closing; the reader should return promptly.
    pub fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputKind {
    Output,
    Feature,
}

/// One queued output or feature report and its completion channel.
pub(crate) struct OutputReport {
    pub(crate) bytes: Vec<u8>,
    pub(crate) kind: OutputKind,
    pub(crate) deadline: Option<Instant>,
    pub(crate) done: Sender<Result<()>>,
}

impl OutputReport {
    /// The submitting caller has already timed out.
    pub(crate) fn is_orphaned(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub(crate) fn complete(self, result: Result<()>) {
        // The caller may have given up; nobody to tell then.
        let _ = self.done.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use std::time::Duration;

    #[test]
    fn full_queue_drops_oldest() {
        let (tx, rx) = bounded(2);
        let sink = InputSink::new(tx, rx.clone());
        sink.push(vec![1]);
        sink.push(vec![2]);
        sink.push(vec![3]);
        assert_eq!(rx.try_recv().unwrap(), vec![2]);
        assert_eq!(rx.try_recv().unwrap(), vec![3]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn orphan_detection() {
        let (done, _rx) = bounded(1);
        let now = Instant::now();
        let report = OutputReport {
            bytes: vec![0],
            kind: OutputKind::Output,
            deadline: Some(now + Duration::from_millis(5)),
            done,
        };
        assert!(!report.is_orphaned(now));
        assert!(report.is_orphaned(now + Duration::from_millis(5)));

        let (done, _rx) = bounded(1);
        let forever = OutputReport {
            deadline: None,
            done,
            ..report
        };
        assert!(!forever.is_orphaned(now + Duration::from_secs(3600)));
    }
}
