//! Sender-side window: in-flight queue, acknowledgment ledger, window slide.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::warn;

use super::AckState;
use crate::diagram::Diagram;
use crate::seq;

/// One transmitted diagram awaiting acknowledgment.
#[derive(Debug, Clone)]
struct InFlight {
    diagram: Diagram,
    sent_at: Instant,
}

/// What [`SendWindow::apply_ack`] did with an incoming acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The acknowledgment was applied to the ledger.
    Applied,
    /// The acknowledgment was outside the window or referenced an
    /// untracked sequence: a stale duplicate, silently dropped.
    Ignored,
}

/// The sender half of a connection's window state.
///
/// `left` is the oldest unacknowledged sequence (the window's trailing
/// edge), `next` the next sequence to assign. The queue holds in-flight
/// diagrams in assignment order; the ledger tracks each one's
/// acknowledgment status. Entries only ever move `Sent -> Confirmed`, via a
/// compare-and-set transition, and leave both structures together when the
/// window slides past them.
pub struct SendWindow {
    left: u8,
    next: u8,
    window: u8,
    queue: VecDeque<InFlight>,
    ledger: HashMap<u8, AckState>,
}

impl SendWindow {
    pub fn new(window: u8) -> Self {
        Self {
            left: 1,
            next: 1,
            window,
            queue: VecDeque::new(),
            ledger: HashMap::new(),
        }
    }

    /// Number of diagrams still occupying the window.
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// Number of ledger entries still awaiting acknowledgment.
    pub fn sent_count(&self) -> usize {
        self.ledger
            .values()
            .filter(|status| **status == AckState::Sent)
            .count()
    }

    /// Assign the next sequence to `payload` and record it as in flight.
    /// Returns the diagram ready for transmission.
    pub fn assign(&mut self, payload: Bytes) -> Diagram {
        let diagram = Diagram::data(self.next, payload);
        self.next = seq::successor(self.next);
        self.queue.push_back(InFlight {
            diagram: diagram.clone(),
            sent_at: Instant::now(),
        });
        if self
            .ledger
            .insert(diagram.sequence, AckState::Sent)
            .is_some()
        {
            warn!(
                sequence = diagram.sequence,
                "ack ledger already tracked an in-flight sequence"
            );
        }
        diagram
    }

    /// Apply an incoming acknowledgment.
    ///
    /// A cumulative acknowledgment confirms every tracked sequence from the
    /// trailing edge up to and including `sequence`; a selective one
    /// confirms exactly `sequence`. Anything outside the window, or absent
    /// from the ledger, is stale and ignored.
    pub fn apply_ack(&mut self, sequence: u8, cumulative: bool) -> AckOutcome {
        if !seq::in_window(sequence, self.left, self.window) || !self.ledger.contains_key(&sequence)
        {
            return AckOutcome::Ignored;
        }
        if cumulative {
            let mut j = self.left;
            while seq::in_closed_arc(j, self.left, sequence) {
                self.transition(j, AckState::Sent, AckState::Confirmed);
                j = seq::successor(j);
            }
        } else {
            self.transition(sequence, AckState::Sent, AckState::Confirmed);
        }
        AckOutcome::Applied
    }

    /// Compare-and-set status transition; the only mutation path for an
    /// existing ledger entry.
    fn transition(&mut self, sequence: u8, from: AckState, to: AckState) -> bool {
        match self.ledger.get_mut(&sequence) {
            Some(status) if *status == from => {
                *status = to;
                true
            }
            _ => false,
        }
    }

    /// Collect every `Sent` entry older than `timeout`, restarting its
    /// clock. The caller transmits the returned diagrams.
    pub fn due_for_retransmit(&mut self, timeout: Duration) -> Vec<Diagram> {
        let now = Instant::now();
        let mut due = Vec::new();
        for entry in &mut self.queue {
            if self.ledger.get(&entry.diagram.sequence) == Some(&AckState::Sent)
                && now.duration_since(entry.sent_at) > timeout
            {
                entry.sent_at = now;
                due.push(entry.diagram.clone());
            }
        }
        due
    }

    /// Evict the leading run of `Confirmed` entries, advancing the trailing
    /// edge one step per eviction. Returns how many slid out.
    pub fn slide(&mut self) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.queue.front() {
            let sequence = front.diagram.sequence;
            if self.ledger.get(&sequence) != Some(&AckState::Confirmed) {
                break;
            }
            self.queue.pop_front();
            if self.ledger.remove(&sequence).is_none() {
                warn!(sequence, "ack ledger lost an entry before the window slid past it");
            }
            self.left = seq::successor(self.left);
            evicted += 1;
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(window: u8, count: usize) -> SendWindow {
        let mut send = SendWindow::new(window);
        for _ in 0..count {
            send.assign(Bytes::from_static(b"x"));
        }
        send
    }

    #[test]
    fn assign_advances_sequence_and_tracks() {
        let mut send = SendWindow::new(5);
        let a = send.assign(Bytes::from_static(b"a"));
        let b = send.assign(Bytes::from_static(b"b"));
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(send.in_flight(), 2);
        assert_eq!(send.sent_count(), 2);
    }

    #[test]
    fn selective_ack_confirms_exactly_one() {
        let mut send = filled(5, 3);
        assert_eq!(send.apply_ack(2, false), AckOutcome::Applied);
        assert_eq!(send.sent_count(), 2);
        // Nothing slides: the trailing edge is still unconfirmed.
        assert_eq!(send.slide(), 0);
        assert_eq!(send.in_flight(), 3);
    }

    #[test]
    fn cumulative_ack_confirms_the_whole_arc() {
        let mut send = filled(5, 4);
        assert_eq!(send.apply_ack(3, true), AckOutcome::Applied);
        assert_eq!(send.sent_count(), 1);
        assert_eq!(send.slide(), 3);
        assert_eq!(send.in_flight(), 1);
    }

    #[test]
    fn stale_acks_are_ignored() {
        let mut send = filled(5, 2);
        // Out of window entirely.
        assert_eq!(send.apply_ack(100, true), AckOutcome::Ignored);
        // In window but never assigned.
        assert_eq!(send.apply_ack(4, false), AckOutcome::Ignored);
        assert_eq!(send.sent_count(), 2);

        // Confirm and slide, then replay the old ack: it is stale now.
        send.apply_ack(2, true);
        send.slide();
        assert_eq!(send.apply_ack(2, true), AckOutcome::Ignored);
    }

    #[test]
    fn slide_stops_at_first_unconfirmed() {
        let mut send = filled(5, 4);
        send.apply_ack(1, false);
        send.apply_ack(3, false);
        assert_eq!(send.slide(), 1);
        assert_eq!(send.in_flight(), 3);
        // Confirming the new trailing edge releases the buffered run.
        send.apply_ack(2, false);
        assert_eq!(send.slide(), 2);
        assert_eq!(send.in_flight(), 1);
    }

    #[test]
    fn sent_entries_never_exceed_window() {
        let window = 7u8;
        let mut send = SendWindow::new(window);
        // Emulate a long transfer: fill, confirm, slide, repeat past the
        // ring boundary.
        for round in 0..40 {
            while send.in_flight() < window as usize {
                send.assign(Bytes::from_static(b"chunk"));
                assert!(send.sent_count() <= window as usize, "round {round}");
            }
            let edge = (round % window as u16) as u8; // vary the ack pattern
            for _ in 0..=edge {
                let front = send.queue.front().map(|f| f.diagram.sequence);
                if let Some(sequence) = front {
                    send.apply_ack(sequence, false);
                    send.slide();
                }
            }
        }
    }

    #[test]
    fn retransmit_only_returns_overdue_sent_entries() {
        let mut send = filled(5, 3);
        // Nothing is overdue under a generous timeout.
        assert!(send.due_for_retransmit(Duration::from_secs(60)).is_empty());
        // Everything unconfirmed is overdue under a zero timeout.
        send.apply_ack(1, false);
        let due = send.due_for_retransmit(Duration::ZERO);
        let sequences: Vec<u8> = due.iter().map(|d| d.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[test]
    fn retransmit_resets_the_clock() {
        let mut send = filled(5, 1);
        assert_eq!(send.due_for_retransmit(Duration::ZERO).len(), 1);
        // Freshly stamped: not due again under a nonzero timeout.
        assert!(send.due_for_retransmit(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn sequences_wrap_around_the_ring() {
        let mut send = SendWindow::new(1);
        for expected in (1..=126u8).chain(1..=4) {
            let diagram = send.assign(Bytes::from_static(b"w"));
            assert_eq!(diagram.sequence, expected);
            send.apply_ack(expected, true);
            assert_eq!(send.slide(), 1);
        }
        assert_eq!(send.in_flight(), 0);
    }
}
