//! Static transport policy: window sizes, timeouts, cadence, simulated loss.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diagram::MAX_PAYLOAD_LEN;
use crate::error::{RdtError, Result};

/// Which byte-stream operations a connection permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Only `write` is legal.
    SenderOnly,
    /// Only `read` is legal.
    ReceiverOnly,
    /// Fully bidirectional.
    #[default]
    Both,
}

/// Per-connection transport policy. Immutable once a connection is built.
///
/// Deserialized from persisted settings and checked by
/// [`RdtConfig::validate`] before any socket is bound. An invalid
/// configuration is rejected outright, never clamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RdtConfig {
    /// Pipelining hint for callers driving several transfers at once; the
    /// transport itself does not consult it.
    pub parallelism: u16,
    /// Polling frequency of the retransmission and window scans, in Hz
    /// (1..=1000).
    pub refresh_rate: u32,
    /// Probability, in percent (0..=99), that an outgoing datagram is
    /// silently dropped before transmission. Fault injection for resilience
    /// testing, not a real network property.
    pub loss_percent: u8,
    /// Seed for the loss dice; `None` seeds from the OS.
    pub loss_seed: Option<u64>,
    /// Which byte-stream operations this connection permits.
    pub direction: Direction,
    /// Send window length (1..=125). 1 selects stop-and-wait/Go-Back-N,
    /// anything larger a pipelined window.
    pub send_window: u8,
    /// Receive window length (1..=62). 1 selects the Go-Back-N receiver
    /// (in-order only, cumulative ACK), anything larger the Selective-Repeat
    /// receiver (out-of-order buffering, per-packet ACK).
    pub recv_window: u8,
    /// Largest payload carried by a single datagram (1..=65534).
    pub max_payload: u16,
    /// Write deadline in milliseconds; negative means no deadline.
    pub write_timeout_ms: i64,
    /// Read deadline in milliseconds; negative means no deadline.
    pub read_timeout_ms: i64,
    /// Age after which an unacknowledged datagram is retransmitted.
    pub retransmit_timeout_ms: u64,
}

impl Default for RdtConfig {
    fn default() -> Self {
        Self {
            parallelism: 60,
            refresh_rate: 1000,
            loss_percent: 0,
            loss_seed: None,
            direction: Direction::Both,
            send_window: 1,
            recv_window: 1,
            max_payload: 1000,
            write_timeout_ms: -1,
            read_timeout_ms: -1,
            retransmit_timeout_ms: 100,
        }
    }
}

impl RdtConfig {
    /// Check every bound. Call before building a connection; a failing
    /// configuration must never reach a socket.
    pub fn validate(&self) -> Result<()> {
        if !(1..=125).contains(&self.send_window) {
            return Err(RdtError::ConfigInvalid(format!(
                "send_window must be in 1..=125, got {}",
                self.send_window
            )));
        }
        if !(1..=62).contains(&self.recv_window) {
            return Err(RdtError::ConfigInvalid(format!(
                "recv_window must be in 1..=62, got {}",
                self.recv_window
            )));
        }
        if !(1..=1000).contains(&self.refresh_rate) {
            return Err(RdtError::ConfigInvalid(format!(
                "refresh_rate must be in 1..=1000 Hz, got {}",
                self.refresh_rate
            )));
        }
        if self.loss_percent > 99 {
            return Err(RdtError::ConfigInvalid(format!(
                "loss_percent must be in 0..=99, got {}",
                self.loss_percent
            )));
        }
        if !(1..=MAX_PAYLOAD_LEN as u16).contains(&self.max_payload) {
            return Err(RdtError::ConfigInvalid(format!(
                "max_payload must be in 1..={MAX_PAYLOAD_LEN}, got {}",
                self.max_payload
            )));
        }
        if self.retransmit_timeout_ms == 0 {
            return Err(RdtError::ConfigInvalid(
                "retransmit_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Interval between polls of the retransmission and readiness loops.
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(u64::from(1000 / self.refresh_rate.max(1)))
    }

    /// Write deadline, or `None` when writes never time out.
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms >= 0).then(|| Duration::from_millis(self.write_timeout_ms as u64))
    }

    /// Read deadline, or `None` when reads never time out.
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms >= 0).then(|| Duration::from_millis(self.read_timeout_ms as u64))
    }

    /// Age threshold before an unacknowledged datagram is resent.
    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }
}
