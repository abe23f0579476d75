//! Playback buffer: the single-producer/single-consumer handoff between the pipeline
//! driver and the real-time output callback.
//!
//! The buffer is a bounded byte ring (`ringbuf`) split into a [`BufferProducer`] and a
//! [`BufferConsumer`]. Neither handle is `Clone`, so there is exactly one writer and one
//! reader. Both sides publish monotonically increasing cursors through the shared
//! [`BufferShared`] state:
//!
//! - write cursor: total bytes appended, advanced only by the producer
//! - read cursor: total bytes consumed, advanced only by the consumer
//!
//! `read <= write` and `write - read <= capacity` hold at every observation.
//!
//! The consumer never blocks. When fewer bytes are available than requested it emits
//! silence and leaves the read cursor where it was. The producer applies
//! [`Backpressure`] when the ring is full.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::error::{PipelineError, Result};
use crate::format::{SampleFormat, mix_into};

/// Upper bound on a single producer wait before re-checking cancellation.
const SPACE_WAIT_SLICE: Duration = Duration::from_millis(50);

/// What the producer does when a block does not fit in the free space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// Wait for the consumer to free space. Cancellation aborts the wait.
    #[default]
    Block,
    /// Fail the append with [`PipelineError::CapacityExceeded`] and write nothing.
    Reject,
}

/// Snapshot of both cursors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCursors {
    pub read: u64,
    pub write: u64,
    pub capacity: usize,
}

impl BufferCursors {
    /// Bytes produced but not yet consumed.
    pub fn available(&self) -> u64 {
        self.write.saturating_sub(self.read)
    }
}

/// Result of one [`BufferConsumer::consume`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consumed {
    /// The whole request was served from the buffer.
    Full,
    /// Not enough data yet; the output is silence and nothing was consumed.
    Underrun,
    /// The producer has finished; the remaining tail (this many bytes) was served
    /// and the rest of the output is silence.
    Tail(usize),
}

/// State shared by both halves. Only atomics: no locks are taken on the consumer path.
#[derive(Debug)]
pub struct BufferShared {
    capacity: usize,
    format: SampleFormat,
    written: AtomicU64,
    read: AtomicU64,
    closed: AtomicBool,
    underrun_events: AtomicU64,
    underrun_bytes: AtomicU64,
}

impl BufferShared {
    pub fn cursors(&self) -> BufferCursors {
        // Load `read` first: it can only move towards `write`, never past it.
        let read = self.read.load(Ordering::Acquire);
        let write = self.written.load(Ordering::Acquire);
        BufferCursors {
            read,
            write,
            capacity: self.capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Whether the producer has finished appending.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closed and fully consumed.
    pub fn is_finished(&self) -> bool {
        self.is_closed() && self.cursors().available() == 0
    }

    pub fn underrun_events(&self) -> u64 {
        self.underrun_events.load(Ordering::Relaxed)
    }

    pub fn underrun_bytes(&self) -> u64 {
        self.underrun_bytes.load(Ordering::Relaxed)
    }
}

/// Create a playback buffer holding at most `capacity` outstanding bytes of `format`
/// audio.
///
/// Returns the producer half (for the pipeline thread), the consumer half (for the
/// output callback) and a monitor the controlling thread can wait on.
pub fn playback_buffer(
    capacity: usize,
    format: SampleFormat,
    policy: Backpressure,
) -> (BufferProducer, BufferConsumer, BufferMonitor) {
    let capacity = capacity.max(1);
    let (ring_prod, ring_cons) = HeapRb::<u8>::new(capacity).split();
    let shared = Arc::new(BufferShared {
        capacity,
        format,
        written: AtomicU64::new(0),
        read: AtomicU64::new(0),
        closed: AtomicBool::new(false),
        underrun_events: AtomicU64::new(0),
        underrun_bytes: AtomicU64::new(0),
    });

    // Both wake channels hold a single token: repeated signals coalesce and
    // `try_send` from the callback never blocks.
    let (space_tx, space_rx) = crossbeam_channel::bounded(1);
    let (drained_tx, drained_rx) = crossbeam_channel::bounded(1);

    let producer = BufferProducer {
        ring: ring_prod,
        shared: shared.clone(),
        policy,
        cancel: None,
        space_rx,
    };
    let consumer = BufferConsumer {
        ring: ring_cons,
        shared: shared.clone(),
        scratch: vec![0u8; capacity],
        space_tx,
        drained_tx,
        drained_sent: false,
    };
    let monitor = BufferMonitor { shared, drained_rx };
    (producer, consumer, monitor)
}

/// Writing half. Owned by the pipeline driver.
pub struct BufferProducer {
    ring: HeapProd<u8>,
    shared: Arc<BufferShared>,
    policy: Backpressure,
    cancel: Option<Arc<AtomicBool>>,
    space_rx: Receiver<()>,
}

impl BufferProducer {
    /// Abort blocking appends once `cancel` is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn policy(&self) -> Backpressure {
        self.policy
    }

    /// Total bytes appended so far.
    pub fn write_cursor(&self) -> u64 {
        self.shared.written.load(Ordering::Acquire)
    }

    pub fn cursors(&self) -> BufferCursors {
        self.shared.cursors()
    }

    /// Copy `bytes` in at the write cursor and advance it by `bytes.len()`.
    ///
    /// A block larger than the whole ring can never fit and always fails with
    /// [`PipelineError::CapacityExceeded`]. Otherwise the configured
    /// [`Backpressure`] decides what happens when the free space is short.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let capacity = self.shared.capacity;
        if bytes.len() > capacity {
            return Err(PipelineError::CapacityExceeded {
                requested: bytes.len(),
                free: self.ring.vacant_len(),
                capacity,
            });
        }

        match self.policy {
            Backpressure::Reject => {
                let free = self.ring.vacant_len();
                if free < bytes.len() {
                    return Err(PipelineError::CapacityExceeded {
                        requested: bytes.len(),
                        free,
                        capacity,
                    });
                }
                self.push(bytes);
            }
            Backpressure::Block => {
                let mut offset = 0;
                while offset < bytes.len() {
                    offset += self.push(&bytes[offset..]);
                    if offset < bytes.len() {
                        self.wait_for_space()?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Mark the end of the stream. The consumer plays out the remaining bytes.
    ///
    /// Idempotent; also done on drop.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    fn push(&mut self, bytes: &[u8]) -> usize {
        let n = self.ring.push_slice(bytes);
        if n > 0 {
            self.shared.written.fetch_add(n as u64, Ordering::Release);
        }
        n
    }

    fn wait_for_space(&self) -> Result<()> {
        loop {
            if self
                .cancel
                .as_ref()
                .is_some_and(|c| c.load(Ordering::Relaxed))
            {
                return Err(PipelineError::Cancelled);
            }
            if self.ring.vacant_len() > 0 {
                return Ok(());
            }
            match self.space_rx.recv_timeout(SPACE_WAIT_SLICE) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                // The consumer is gone; nothing will ever free space.
                Err(RecvTimeoutError::Disconnected) => return Err(PipelineError::Cancelled),
            }
        }
    }
}

impl Drop for BufferProducer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reading half. Owned by the output callback.
pub struct BufferConsumer {
    ring: HeapCons<u8>,
    shared: Arc<BufferShared>,
    scratch: Vec<u8>,
    space_tx: Sender<()>,
    drained_tx: Sender<()>,
    drained_sent: bool,
}

impl BufferConsumer {
    /// Total bytes consumed so far.
    pub fn read_cursor(&self) -> u64 {
        self.shared.read.load(Ordering::Acquire)
    }

    pub fn cursors(&self) -> BufferCursors {
        self.shared.cursors()
    }

    pub fn format(&self) -> SampleFormat {
        self.shared.format
    }

    /// Fill `out` from the buffer without blocking.
    ///
    /// `out` is first silenced. If at least `out.len()` bytes are available they are
    /// mixed onto it at full volume and the read cursor advances by `out.len()`.
    /// Otherwise this is an underrun: `out` stays silent and the read cursor does not
    /// move. Once the producer has closed, a short tail is served instead of
    /// underrunning so the stream can finish.
    pub fn consume(&mut self, out: &mut [u8]) -> Consumed {
        let format = self.shared.format;
        out.fill(format.silence_byte());

        let wanted = out.len();
        let closed = self.shared.closed.load(Ordering::Acquire);
        // Counted bytes only: the producer publishes `written` after the ring push,
        // so anything counted is already in the ring.
        let written = self.shared.written.load(Ordering::Acquire);
        let read = self.shared.read.load(Ordering::Relaxed);
        let available = written.saturating_sub(read) as usize;

        let outcome = if available >= wanted {
            self.take_into(out);
            Consumed::Full
        } else if closed {
            let n = available;
            if n > 0 {
                self.take_into(&mut out[..n]);
            }
            Consumed::Tail(n)
        } else {
            self.shared.underrun_events.fetch_add(1, Ordering::Relaxed);
            self.shared
                .underrun_bytes
                .fetch_add(wanted as u64, Ordering::Relaxed);
            Consumed::Underrun
        };

        if closed && !self.drained_sent && self.shared.cursors().available() == 0 {
            self.drained_sent = true;
            let _ = self.drained_tx.try_send(());
        }
        outcome
    }

    fn take_into(&mut self, out: &mut [u8]) {
        let n = out.len();
        if n == 0 {
            return;
        }
        if self.scratch.len() < n {
            self.scratch.resize(n, 0);
        }
        let got = self.ring.pop_slice(&mut self.scratch[..n]);
        mix_into(self.shared.format, &mut out[..got], &self.scratch[..got]);
        self.shared.read.fetch_add(got as u64, Ordering::Release);
        let _ = self.space_tx.try_send(());
    }
}

/// Read-only view for the controlling thread.
#[derive(Clone)]
pub struct BufferMonitor {
    shared: Arc<BufferShared>,
    drained_rx: Receiver<()>,
}

impl BufferMonitor {
    pub fn shared(&self) -> &BufferShared {
        &self.shared
    }

    pub fn cursors(&self) -> BufferCursors {
        self.shared.cursors()
    }

    /// Receives one message once the producer has closed and the consumer has
    /// played out every byte.
    pub fn drained(&self) -> &Receiver<()> {
        &self.drained_rx
    }
}
