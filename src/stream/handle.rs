//! Reference-counted lifetime of a stream's OS handle.
//!
//! The count starts at 1 when the stream opens (the stream's own reference).
//! Every in-flight operation, including the reader and writer threads, holds
//! one more. `close` marks the stream closed and drops the stream's own
//! reference; whoever brings the count to zero frees the handle. Once the
//! count reaches zero it can never be raised again, so the handle is freed
//! at most once and never while an operation is still using it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{HidError, Result};

#[derive(Debug, Default)]
pub(crate) struct HandleLifecycle {
    opened: AtomicBool,
    closed: AtomicBool,
    refs: AtomicUsize,
}

impl HandleLifecycle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Called once the OS handle exists. Takes the stream's own reference.
    pub(crate) fn mark_open(&self) {
        self.refs.store(1, Ordering::Release);
        self.opened.store(true, Ordering::Release);
    }

    /// Takes a reference unless the count already reached zero.
    pub(crate) fn acquire(&self) -> bool {
        let mut current = self.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Takes a reference for a caller-initiated operation.
    pub(crate) fn acquire_if_open(&self) -> Result<()> {
        if self.is_closed() || !self.acquire() {
            return Err(HidError::Closed);
        }
        Ok(())
    }

    /// Drops a reference. Returns `true` when the caller must free the handle.
    pub(crate) fn release(&self) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "handle reference released twice");
        prev == 1 && self.opened.load(Ordering::Acquire)
    }

    /// Marks the stream closed. Only the first call on an opened stream
    /// returns `true`; that caller owns the stream's reference.
    pub(crate) fn close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            && self.opened.load(Ordering::Acquire)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unopened_handle_refuses_references() {
        let h = HandleLifecycle::new();
        assert!(!h.acquire());
        assert!(matches!(h.acquire_if_open(), Err(HidError::Closed)));
        assert!(!h.close());
    }

    #[test]
    fn close_then_last_release_frees() {
        let h = HandleLifecycle::new();
        h.mark_open();
        assert!(h.acquire());
        assert_eq!(h.refs(), 2);

        assert!(h.close());
        assert!(!h.close(), "second close must be a no-op");
        assert!(matches!(h.acquire_if_open(), Err(HidError::Closed)));

        // Stream's own reference goes first; the in-flight op frees.
        assert!(!h.release());
        assert!(h.release());
        assert!(!h.acquire(), "count at zero stays at zero");
    }

    #[test]
    fn frees_exactly_once_under_contention() {
        let h = Arc::new(HandleLifecycle::new());
        h.mark_open();
        let frees = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let h = Arc::clone(&h);
                let frees = Arc::clone(&frees);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if h.acquire_if_open().is_ok() && h.release() {
                            frees.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        if h.close() && h.release() {
            frees.fetch_add(1, Ordering::SeqCst);
        }
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(frees.load(Ordering::SeqCst), 1);
        assert_eq!(h.refs(), 0);
    }
}
