//! Inbound line buffering and link timing
//!
//! The transport hands over arbitrary chunks of bytes. `LineBuffer` holds them until a
//! line terminator arrives, so a line split across two reads is only released once it
//! is complete. `ConnectionTiming` tracks silence on the link for the optional keepalive.

use std::time::Duration;
use tokio::time::Instant;

/// Default upper bound for a single buffered line (RFC 1459 allows 512, IRCv3 tags more)
pub const DEFAULT_MAX_LINE: usize = 16 * 1024;

/// Receive buffer - accumulates bytes and releases complete lines in arrival order
#[derive(Debug)]
pub struct LineBuffer {
    /// Bytes not yet terminated by `\n`
    buffer: Vec<u8>,
    /// Maximum size of an unterminated line in bytes
    max_size: usize,
    /// Number of bytes dropped because a line grew past `max_size`
    dropped_bytes: u64,
    /// Whether the rest of an oversized line is being skipped
    discarding: bool,
}

impl LineBuffer {
    /// Create a new line buffer with the given per-line limit
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_size,
            dropped_bytes: 0,
            discarding: false,
        }
    }

    /// Append raw bytes from the transport
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract complete lines, terminators stripped, retaining any incomplete tail
    ///
    /// Lines are split on `\n`; a `\r` right before it is removed. Invalid UTF-8 is
    /// replaced rather than rejected, since servers relay whatever their users send.
    pub fn extract_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let raw = &self.buffer[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

            if self.discarding {
                self.dropped_bytes += raw.len() as u64;
                self.discarding = false;
            } else if !raw.is_empty() {
                lines.push(String::from_utf8_lossy(raw).into_owned());
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_size {
            tracing::warn!(
                "Line exceeds {} bytes without a terminator, dropping {} bytes",
                self.max_size,
                self.buffer.len()
            );
            self.dropped_bytes += self.buffer.len() as u64;
            self.buffer.clear();
            self.discarding = true;
        }

        lines
    }

    /// Get current buffer size in bytes
    pub fn current_size(&self) -> usize {
        self.buffer.len()
    }

    /// Get number of dropped bytes
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Check if buffer contains an incomplete line
    pub fn has_incomplete_data(&self) -> bool {
        !self.buffer.is_empty()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}

/// Link timing information for the keepalive
#[derive(Debug, Clone)]
pub struct ConnectionTiming {
    /// Last time we received data
    pub last_activity: Instant,
    /// Last time we sent a PING
    pub last_ping_sent: Option<Instant>,
    /// Silence after which a PING is sent
    pub ping_interval: Duration,
    /// Silence after which the link is considered dead
    pub timeout: Duration,
}

impl ConnectionTiming {
    /// Create new timing state starting now
    pub fn new(ping_interval: Duration, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            last_activity: now,
            last_ping_sent: None,
            ping_interval,
            timeout,
        }
    }

    /// Update last activity timestamp
    pub fn update_activity(&mut self) {
        self.last_activity = Instant::now();
        self.last_ping_sent = None;
    }

    /// Record that we sent a PING
    pub fn record_ping_sent(&mut self) {
        self.last_ping_sent = Some(Instant::now());
    }

    /// Check if it's time to send a PING
    pub fn should_send_ping(&self) -> bool {
        self.last_ping_sent.is_none() && self.last_activity.elapsed() >= self.ping_interval
    }

    /// Check if the link has been silent for too long
    pub fn is_timed_out(&self) -> bool {
        self.last_activity.elapsed() >= self.timeout
    }

    /// Get time since last activity
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.elapsed()
    }
}
