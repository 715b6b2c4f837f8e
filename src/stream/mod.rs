//! Open connections to HID devices.
//!
//! A [`HidStream`] owns one OS handle and two worker threads:
//!
//! - the **reader** runs the backend's input loop and queues every input
//!   report in arrival order;
//! - the **writer** drains the output queue in submission order, handing each
//!   output or feature report to the backend and reporting the result back
//!   through a oneshot channel.
//!
//! Callers block in [`read`](HidStream::read), [`write`](HidStream::write) and
//! [`set_feature`](HidStream::set_feature) on a `select` over their data
//! channel and the stream's cancellation channel, bounded by the configured
//! timeout. [`close`](HidStream::close) drops the cancellation sender, which
//! wakes every waiter at once.
//!
//! # Report IDs
//! The first byte of every buffer is the Report ID, `0` for devices that do
//! not use IDs. Backends normalise this so buffers look the same on every
//! platform.
//!
//! # Example
//! ```no_run
//! use hidlink::{DeviceFilter, Manager};
//!
//! let mgr = Manager::new();
//! if let Some(dev) = mgr.find_first(&DeviceFilter::vid_pid(0x046D, 0xC52B)).unwrap() {
//!     let stream = dev.open().unwrap();
//!     let mut buf = vec![0u8; dev.max_input_len];
//!     let n = stream.read(&mut buf).unwrap();
//!     println!("report: {:02X?}", &buf[..n]);
//!     stream.close();
//! }
//! ```

mod handle;
mod pending;
mod queue;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{bounded, select, unbounded, Receiver, Select, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::backends::PlatformStream;
use crate::config::{StreamConfig, Timeout};
use crate::device::DeviceDescriptor;
use crate::error::{HidError, Result};

use handle::HandleLifecycle;
use queue::{InputSink, OutputKind, OutputReport};

pub use pending::Pending;
pub use queue::ReaderContext;

/// State shared between a stream's handles and its worker threads.
struct Shared {
    descriptor: Arc<DeviceDescriptor>,
    platform: Box<dyn PlatformStream>,
    lifecycle: HandleLifecycle,
    shutdown: AtomicBool,
    fault: Mutex<Option<String>>,
    input: Receiver<Vec<u8>>,
    output: Sender<OutputReport>,
    cancel: Receiver<()>,
    cancel_tx: Mutex<Option<Sender<()>>>,
}

/// Holds one reference on the handle for its lifetime.
struct OpRef<'a> {
    shared: &'a Shared,
}

impl Drop for OpRef<'_> {
    fn drop(&mut self) {
        self.shared.release();
    }
}

impl Shared {
    /// Reference for a caller operation; fails once the stream is closed.
    fn op_ref(&self) -> Result<OpRef<'_>> {
        self.lifecycle.acquire_if_open()?;
        Ok(OpRef { shared: self })
    }

    /// Reference for a worker thread; only fails once the handle is gone.
    fn worker_ref(&self) -> Option<OpRef<'_>> {
        self.lifecycle.acquire().then_some(OpRef { shared: self })
    }

    fn release(&self) {
        if self.lifecycle.release() {
            trace!(path = %self.descriptor.path, "freeing device handle");
            self.platform.free();
        }
    }

    fn check_fault(&self) -> Result<()> {
        match self.fault.lock().as_deref() {
            Some(msg) => Err(HidError::io(msg)),
            None => Ok(()),
        }
    }

    /// Error for a closed or disconnected channel.
    fn gone(&self) -> HidError {
        if self.lifecycle.is_closed() {
            return HidError::Closed;
        }
        match self.check_fault() {
            Err(e) => e,
            Ok(()) => HidError::io("input reader stopped"),
        }
    }

    fn next_input(&self, deadline: Option<Instant>) -> Result<Vec<u8>> {
        let mut sel = Select::new();
        let input = sel.recv(&self.input);
        let cancel = sel.recv(&self.cancel);
        let oper = match deadline {
            Some(d) => sel.select_deadline(d).map_err(|_| HidError::Timeout)?,
            None => sel.select(),
        };
        if oper.index() == input {
            oper.recv(&self.input).map_err(|_| self.gone())
        } else {
            debug_assert_eq!(oper.index(), cancel);
            let _ = oper.recv(&self.cancel);
            Err(HidError::Closed)
        }
    }

    fn wait_done(&self, done: &Receiver<Result<()>>, deadline: Option<Instant>) -> Result<()> {
        let mut sel = Select::new();
        let finished = sel.recv(done);
        let cancel = sel.recv(&self.cancel);
        let oper = match deadline {
            Some(d) => sel.select_deadline(d).map_err(|_| HidError::Timeout)?,
            None => sel.select(),
        };
        if oper.index() == finished {
            oper.recv(done).unwrap_or(Err(HidError::Closed))
        } else {
            debug_assert_eq!(oper.index(), cancel);
            let _ = oper.recv(&self.cancel);
            Err(HidError::Closed)
        }
    }
}

struct Inner {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    read_timeout: Mutex<Timeout>,
    write_timeout: Mutex<Timeout>,
}

impl Inner {
    fn close(&self) {
        let shared = &self.shared;
        if !shared.lifecycle.close() {
            return;
        }
        debug!(path = %shared.descriptor.path, "closing stream");

        shared.shutdown.store(true, Ordering::Release);
        drop(shared.cancel_tx.lock().take());
        shared.platform.cancel_io();

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!(path = %shared.descriptor.path, "stream worker panicked");
            }
        }

        shared.release();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

/// An open connection to a HID device.
///
/// Cloning is cheap and yields another handle on the same connection. The
/// connection closes on [`close`](Self::close) or when the last clone drops.
#[derive(Clone)]
pub struct HidStream {
    inner: Arc<Inner>,
}

impl HidStream {
    /// Takes ownership of an opened platform stream and starts its workers.
    pub(crate) fn start(
        descriptor: Arc<DeviceDescriptor>,
        platform: Box<dyn PlatformStream>,
        config: &StreamConfig,
    ) -> Result<Self> {
        let (input_tx, input_rx) = bounded(config.input_queue_capacity.max(1));
        let (output_tx, output_rx) = unbounded();
        let (cancel_tx, cancel_rx) = bounded(0);

        let lifecycle = HandleLifecycle::new();
        lifecycle.mark_open();

        let shared = Arc::new(Shared {
            descriptor,
            platform,
            lifecycle,
            shutdown: AtomicBool::new(false),
            fault: Mutex::new(None),
            input: input_rx.clone(),
            output: output_tx,
            cancel: cancel_rx,
            cancel_tx: Mutex::new(Some(cancel_tx)),
        });

        let inner = Inner {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::with_capacity(2)),
            read_timeout: Mutex::new(config.read_timeout),
            write_timeout: Mutex::new(config.write_timeout),
        };

        let sink = InputSink::new(input_tx, input_rx);
        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("hidlink-reader".into())
                .spawn(move || reader_loop(&shared, sink))
        };
        // On error `inner` drops here and closes whatever did start.
        inner.workers.lock().push(reader.map_err(worker_spawn_error)?);

        let writer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("hidlink-writer".into())
                .spawn(move || writer_loop(&shared, output_rx))
        };
        inner.workers.lock().push(writer.map_err(worker_spawn_error)?);

        debug!(path = %shared.descriptor.path, "stream opened");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        &self.shared().descriptor
    }

    pub fn read_timeout(&self) -> Timeout {
        *self.inner.read_timeout.lock()
    }

    pub fn set_read_timeout(&self, timeout: impl Into<Timeout>) {
        *self.inner.read_timeout.lock() = timeout.into();
    }

    pub fn write_timeout(&self) -> Timeout {
        *self.inner.write_timeout.lock()
    }

    pub fn set_write_timeout(&self, timeout: impl Into<Timeout>) {
        *self.inner.write_timeout.lock() = timeout.into();
    }

    pub fn is_closed(&self) -> bool {
        self.shared().lifecycle.is_closed()
    }

    /// Number of output and feature reports waiting for the writer.
    pub fn pending_output(&self) -> usize {
        self.shared().output.len()
    }

    /// Reads the next input report into `buf`.
    ///
    /// Copies `min(buf.len(), report.len())` bytes and returns that count.
    /// Blocks for at most the read timeout.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let start = Instant::now();
        let shared = self.shared();
        let _op = shared.op_ref()?;
        shared.check_fault()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let report = shared.next_input(self.read_timeout().deadline_from(start))?;
        let n = buf.len().min(report.len());
        buf[..n].copy_from_slice(&report[..n]);
        Ok(n)
    }

    /// Reads the next input report into a buffer sized for the device.
    pub fn read_report(&self) -> Result<Vec<u8>> {
        let shared = self.shared();
        let _op = shared.op_ref()?;
        shared.check_fault()?;
        let max = shared.descriptor.max_input_len;
        if max == 0 {
            return Err(HidError::Unsupported("device has no input reports".into()));
        }
        let mut buf = vec![0u8; max];
        let n = self.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Sends an output report. `report[0]` is the Report ID.
    ///
    /// The payload is truncated to the device's maximum output length.
    pub fn write(&self, report: &[u8]) -> Result<()> {
        self.submit(report, OutputKind::Output)
    }

    /// Sends a feature report. `report[0]` is the Report ID.
    pub fn set_feature(&self, report: &[u8]) -> Result<()> {
        self.submit(report, OutputKind::Feature)
    }

    /// Requests a feature report. Set `buf[0]` to the Report ID first.
    ///
    /// Issued directly against the device, not through the output queue.
    pub fn get_feature(&self, buf: &mut [u8]) -> Result<usize> {
        let shared = self.shared();
        let _op = shared.op_ref()?;
        if buf.is_empty() {
            return Ok(0);
        }
        shared.platform.get_feature(buf)
    }

    fn submit(&self, report: &[u8], kind: OutputKind) -> Result<()> {
        let start = Instant::now();
        let shared = self.shared();
        let _op = shared.op_ref()?;
        shared.check_fault()?;
        if report.is_empty() {
            return Ok(());
        }
        let max = match kind {
            OutputKind::Output => shared.descriptor.max_output_len,
            OutputKind::Feature => shared.descriptor.max_feature_len,
        };
        if max == 0 {
            let what = match kind {
                OutputKind::Output => "output",
                OutputKind::Feature => "feature",
            };
            return Err(HidError::Unsupported(format!("device has no {what} reports")));
        }

        let deadline = self.write_timeout().deadline_from(start);
        let (done_tx, done_rx) = bounded(1);
        let bytes = report[..report.len().min(max)].to_vec();
        shared
            .output
            .send(OutputReport {
                bytes,
                kind,
                deadline,
                done: done_tx,
            })
            .map_err(|_| HidError::Closed)?;

        shared.wait_done(&done_rx, deadline)
    }

    /// Starts a read of up to `len` bytes in the background.
    pub fn begin_read(&self, len: usize) -> Pending<Vec<u8>> {
        let stream = self.clone();
        Pending::spawn(move || {
            let mut buf = vec![0u8; len];
            let n = stream.read(&mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
    }

    /// Starts a write in the background.
    pub fn begin_write(&self, report: Vec<u8>) -> Pending<()> {
        let stream = self.clone();
        Pending::spawn(move || stream.write(&report))
    }

    /// Closes the stream. Idempotent.
    ///
    /// Wakes every blocked caller (they fail with [`HidError::Closed`]),
    /// stops the workers, and releases the stream's own handle reference.
    /// The OS handle is freed once no operation is using it.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl fmt::Debug for HidStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidStream")
            .field("path", &self.shared().descriptor.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn worker_spawn_error(e: std::io::Error) -> HidError {
    HidError::io(format!("failed to start stream worker: {e}"))
}

fn reader_loop(shared: &Shared, sink: InputSink) {
    let Some(_op) = shared.worker_ref() else {
        return;
    };
    let ctx = ReaderContext::new(&sink, &shared.shutdown);
    match shared.platform.run_reader(&ctx) {
        Ok(()) => trace!(path = %shared.descriptor.path, "reader stopped"),
        Err(e) if shared.shutdown.load(Ordering::Acquire) => {
            trace!(path = %shared.descriptor.path, error = %e, "reader stopped during close");
        }
        Err(e) => {
            warn!(path = %shared.descriptor.path, error = %e, "input reader failed");
            *shared.fault.lock() = Some(e.to_string());
        }
    }
}

fn writer_loop(shared: &Shared, queue: Receiver<OutputReport>) {
    if let Some(_op) = shared.worker_ref() {
        loop {
            let next = select! {
                recv(queue) -> msg => msg.ok(),
                recv(shared.cancel) -> _ => None,
            };
            let Some(report) = next else {
                break;
            };

            if report.is_orphaned(Instant::now()) {
                trace!(path = %shared.descriptor.path, "discarding timed-out report");
                report.complete(Err(HidError::Timeout));
                continue;
            }

            let result = match report.kind {
                OutputKind::Output => shared.platform.write_output(&report.bytes),
                OutputKind::Feature => shared.platform.set_feature(&report.bytes),
            };
            if let Err(e) = &result {
                debug!(path = %shared.descriptor.path, error = %e, kind = ?report.kind, "report write failed");
            }
            report.complete(result);
        }
    }

    for report in queue.try_iter() {
        report.complete(Err(HidError::Closed));
    }
}
