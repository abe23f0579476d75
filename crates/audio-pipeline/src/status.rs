use std::fmt;

use crate::buffer::BufferMonitor;
use crate::format::OutputSpec;

/// Point-in-time view of a playback session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackStatus {
    /// Audio handed to the device so far, in milliseconds.
    pub elapsed_ms: u64,
    /// Audio produced but not yet played, in milliseconds.
    pub buffered_ms: u64,
    /// Bytes produced but not yet played.
    pub buffered_bytes: u64,
    /// Buffer capacity in bytes.
    pub capacity_bytes: usize,
    /// Number of callbacks that had to output silence.
    pub underrun_events: u64,
    /// Total bytes emitted as silence due to underruns.
    pub underrun_bytes: u64,
    /// Whether the producer has finished appending.
    pub producer_done: bool,
}

impl PlaybackStatus {
    /// Take a snapshot from the buffer's shared counters.
    pub fn capture(monitor: &BufferMonitor, spec: &OutputSpec) -> Self {
        let shared = monitor.shared();
        let cursors = shared.cursors();
        let buffered = cursors.available();
        Self {
            elapsed_ms: spec.bytes_to_ms(cursors.read),
            buffered_ms: spec.bytes_to_ms(buffered),
            buffered_bytes: buffered,
            capacity_bytes: cursors.capacity,
            underrun_events: shared.underrun_events(),
            underrun_bytes: shared.underrun_bytes(),
            producer_done: shared.is_closed(),
        }
    }

    /// Buffer fill level in percent.
    pub fn fill_percent(&self) -> u64 {
        if self.capacity_bytes == 0 {
            return 0;
        }
        self.buffered_bytes.saturating_mul(100) / self.capacity_bytes as u64
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ms played, {} ms buffered ({}%), {} underruns",
            self.elapsed_ms,
            self.buffered_ms,
            self.fill_percent(),
            self.underrun_events
        )
    }
}
