//! Operations running in the background.
//!
//! [`Pending`] is returned by [`HidStream::begin_read`](super::HidStream::begin_read)
//! and [`HidStream::begin_write`](super::HidStream::begin_write). The blocking
//! call runs on its own thread; the caller polls or waits for the result.

use std::fmt;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{HidError, Result};

pub struct Pending<T> {
    rx: Receiver<Result<T>>,
    ready: Option<Result<T>>,
}

impl<T: Send + 'static> Pending<T> {
    pub(crate) fn spawn(op: impl FnOnce() -> Result<T> + Send + 'static) -> Self {
        let (tx, rx) = bounded(1);
        let spawned = thread::Builder::new()
            .name("hidlink-pending".into())
            .spawn(move || {
                let _ = tx.send(op());
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to start background operation");
        }
        Self { rx, ready: None }
    }
}

impl<T> Pending<T> {
    fn poll(&mut self) {
        if self.ready.is_some() {
            return;
        }
        match self.rx.try_recv() {
            Ok(result) => self.ready = Some(result),
            Err(TryRecvError::Disconnected) => self.ready = Some(Err(worker_lost())),
            Err(TryRecvError::Empty) => {}
        }
    }

    pub fn is_complete(&mut self) -> bool {
        self.poll();
        self.ready.is_some()
    }

    /// Takes the result if the operation has finished.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        self.poll();
        self.ready.take()
    }

    /// Blocks until the operation finishes.
    pub fn wait(mut self) -> Result<T> {
        if let Some(result) = self.ready.take() {
            return result;
        }
        self.rx.recv().unwrap_or_else(|_| Err(worker_lost()))
    }

    /// Blocks for at most `timeout`. `None` if the operation is still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<T>> {
        if let Some(result) = self.ready.take() {
            return Some(result);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(worker_lost())),
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("ready", &self.ready.is_some())
            .finish()
    }
}

fn worker_lost() -> HidError {
    HidError::io("background operation ended without a result")
}
