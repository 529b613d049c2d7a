//! Receiver-side window: in-order delivery, reordering, duplicate
//! suppression, and the acknowledgment policy.

use std::collections::HashMap;

use bytes::Bytes;

use crate::diagram::Diagram;
use crate::seq;

/// The receiver's reaction to one inbound data diagram.
#[derive(Debug, Default)]
pub struct RecvOutcome {
    /// Acknowledgment to transmit back, if any.
    pub reply: Option<Diagram>,
    /// Payloads now contiguous and ready for the application, oldest first.
    pub delivered: Vec<Bytes>,
}

/// The receiver half of a connection's window state.
///
/// With a window of 1 this is a Go-Back-N receiver: in-order only,
/// cumulative acknowledgments, and the reorder buffer stays empty. With a
/// larger window it is a Selective-Repeat receiver: out-of-order arrivals
/// are buffered until contiguous and every packet is acknowledged
/// individually.
pub struct RecvWindow {
    /// Next in-order sequence accepted into the delivered stream.
    expected: u8,
    window: u8,
    /// Out-of-order arrivals held until contiguous.
    reorder: HashMap<u8, Diagram>,
}

impl RecvWindow {
    pub fn new(window: u8) -> Self {
        Self {
            expected: 1,
            window,
            reorder: HashMap::new(),
        }
    }

    pub fn expected(&self) -> u8 {
        self.expected
    }

    fn selective(&self) -> bool {
        self.window > 1
    }

    /// Classify one inbound data diagram against the window edges.
    ///
    /// In-window arrivals are always acknowledged; the in-order one, plus
    /// any now-contiguous buffered successors, is delivered and the rest
    /// parked in the reorder buffer. Out-of-window arrivals either trigger
    /// the Go-Back-N duplicate acknowledgment restating the trailing edge,
    /// earn a selective re-acknowledgment when they straggle in from the
    /// just-vacated window, or are dropped outright.
    pub fn accept(&mut self, diagram: Diagram) -> RecvOutcome {
        let mut outcome = RecvOutcome::default();
        if seq::in_window(diagram.sequence, self.expected, self.window) {
            outcome.reply = Some(diagram.confirm(self.selective()));
            if diagram.sequence == self.expected {
                outcome.delivered.push(diagram.payload);
                self.expected = seq::successor(self.expected);
                while let Some(buffered) = self.reorder.remove(&self.expected) {
                    outcome.delivered.push(buffered.payload);
                    self.expected = seq::successor(self.expected);
                }
            } else {
                // A duplicate already parked under this sequence wins.
                self.reorder.entry(diagram.sequence).or_insert(diagram);
            }
        } else if self.window == 1 {
            // Go-Back-N: restate the true trailing edge so the sender
            // resumes from it.
            outcome.reply = Some(Diagram::cumulative_ack(seq::predecessor(self.expected)));
        } else if seq::in_prior_window(diagram.sequence, self.expected, self.window) {
            // Straggler from the window already slid past: the sender
            // retransmitted needlessly but still gets its confirmation.
            outcome.reply = Some(Diagram::selective_ack(diagram.sequence));
        }
        // Anything else is too far ahead or a long-dead duplicate.
        outcome
    }
}
