//! Send- and receive-side sliding-window state machines.
//!
//! Pure bookkeeping over the sequence ring, no sockets: the engine drives
//! these under its locks and performs the actual transmissions itself.

pub mod recv;
pub mod send;

/// Acknowledgment-ledger status of an in-flight diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// Transmitted, acknowledgment outstanding.
    Sent,
    /// Acknowledged; evicted once it reaches the window's trailing edge.
    Confirmed,
}
