//! rdtstream: a reliable, ordered byte stream over an unreliable,
//! unordered, loss-prone datagram channel.
//!
//! The crate hand-builds TCP's reliability mechanisms on top of UDP: cyclic
//! sequence numbering, sliding-window flow control with Go-Back-N and
//! Selective-Repeat delivery disciplines behind a single configuration
//! switch, timeout-driven retransmission, duplicate and out-of-order
//! detection, and demultiplexing of many remote peers behind one physical
//! socket.
//!
//! # Basic usage
//!
//! [`RdtListener::bind`] opens the rendezvous socket and
//! [`RdtListener::accept`] yields one [`RdtStream`] per remote peer;
//! [`RdtStream::connect`] opens an outbound connection. Either way the
//! stream is a bidirectional, ordered, reliable byte stream with blocking,
//! timeout-bounded [`RdtStream::read`] / [`RdtStream::write`], an explicit
//! [`RdtStream::flush`], and an idempotent [`RdtStream::close`].
//!
//! Delivery discipline is selected by [`RdtConfig`]: a send window of 1 is
//! stop-and-wait, larger windows pipeline; a receive window of 1
//! acknowledges cumulatively and discards out-of-order arrivals
//! (Go-Back-N), larger windows buffer them and acknowledge per packet
//! (Selective-Repeat). Simulated datagram loss can be injected for
//! resilience testing.

pub mod config;
pub mod diagram;
pub mod error;
pub mod listener;
pub mod seq;
pub mod stream;
pub mod window;

mod loss;

pub use crate::config::{Direction, RdtConfig};
pub use crate::diagram::Diagram;
pub use crate::error::{RdtError, Result};
pub use crate::listener::RdtListener;
pub use crate::stream::RdtStream;
