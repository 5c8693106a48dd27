//! Message channels for the remote invocation layer.
//!
//! * Reliable: every payload is retransmitted until acknowledged and the
//!   receiver releases payloads strictly in send order, dropping duplicates.
//! * Unreliable: payloads are stamped with a sequence number and the
//!   receiver keeps only the newest per key; late arrivals are discarded.
//!
//! Sequence numbers are `u16` and compared with wrap-around.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Sequence number carried by every channel payload.
pub type SequenceNumber = u16;

/// Returns `true` if `s1` is newer than `s2` under wrap-around.
///
/// `sequence_greater_than(2, 1)` is `true`, `sequence_greater_than(0, 65535)`
/// is `true`, `sequence_greater_than(1, 1)` is `false`.
pub fn sequence_greater_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    ((s1 > s2) && (s1 - s2 <= 32768)) || ((s1 < s2) && (s2 - s1 > 32768))
}

/// A payload stamped with its channel sequence number.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Sequenced<T> {
    /// Channel sequence number.
    pub seq: SequenceNumber,
    /// The payload.
    pub payload: T,
}

// ---------------------------------------------------------------------------
// Reliable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct InFlight<T> {
    seq: SequenceNumber,
    payload: T,
    last_sent: Option<f64>,
}

/// Sending half of a reliable, ordered channel.
#[derive(Debug, Clone)]
pub struct ReliableSender<T> {
    next_seq: SequenceNumber,
    unacked: VecDeque<InFlight<T>>,
    resend_interval: f64,
}

impl<T: Clone> ReliableSender<T> {
    /// Creates a sender that retransmits unacknowledged payloads every
    /// `resend_interval` seconds.
    pub fn new(resend_interval: f64) -> Self {
        Self {
            next_seq: 0,
            unacked: VecDeque::new(),
            resend_interval,
        }
    }

    /// Queues `payload` and returns its sequence number.
    pub fn send(&mut self, payload: T) -> SequenceNumber {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.unacked.push_back(InFlight {
            seq,
            payload,
            last_sent: None,
        });
        seq
    }

    /// Returns everything due for (re)transmission at time `now`.
    pub fn collect_outgoing(&mut self, now: f64) -> Vec<Sequenced<T>> {
        let interval = self.resend_interval;
        self.unacked
            .iter_mut()
            .filter(|f| f.last_sent.is_none_or(|sent| now - sent >= interval))
            .map(|f| {
                f.last_sent = Some(now);
                Sequenced {
                    seq: f.seq,
                    payload: f.payload.clone(),
                }
            })
            .collect()
    }

    /// Marks `seq` as delivered. Unknown or repeated acks are ignored.
    pub fn acknowledge(&mut self, seq: SequenceNumber) {
        self.unacked.retain(|f| f.seq != seq);
    }

    /// Number of payloads awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }
}

/// Receiving half of a reliable, ordered channel.
#[derive(Debug, Clone)]
pub struct ReliableReceiver<T> {
    next_expected: SequenceNumber,
    buffered: HashMap<SequenceNumber, T>,
}

impl<T> ReliableReceiver<T> {
    /// Creates a receiver expecting sequence number 0 first.
    pub fn new() -> Self {
        Self {
            next_expected: 0,
            buffered: HashMap::new(),
        }
    }

    /// Accepts one packet and returns every payload that is now deliverable,
    /// in send order. The caller acknowledges `packet.seq` regardless of the
    /// result so the sender stops retransmitting.
    pub fn receive(&mut self, packet: Sequenced<T>) -> Vec<T> {
        let Sequenced { seq, payload } = packet;
        let is_current = seq == self.next_expected;
        if is_current || sequence_greater_than(seq, self.next_expected) {
            self.buffered.entry(seq).or_insert(payload);
        }

        let mut ready = Vec::new();
        while let Some(payload) = self.buffered.remove(&self.next_expected) {
            ready.push(payload);
            self.next_expected = self.next_expected.wrapping_add(1);
        }
        ready
    }

    /// Number of payloads held back waiting for a gap to fill.
    pub fn pending(&self) -> usize {
        self.buffered.len()
    }
}

impl<T> Default for ReliableReceiver<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unreliable
// ---------------------------------------------------------------------------

/// Sending half of an unreliable channel. Never retransmits.
#[derive(Debug, Clone, Default)]
pub struct UnreliableSender {
    next_seq: SequenceNumber,
}

impl UnreliableSender {
    /// Creates a sender starting at sequence 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps `payload` with the next sequence number.
    pub fn stamp<T>(&mut self, payload: T) -> Sequenced<T> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        Sequenced { seq, payload }
    }
}

/// Newest-value-wins receiver, tracked independently per key.
#[derive(Debug, Clone)]
pub struct LatestWinsReceiver<K> {
    newest: HashMap<K, SequenceNumber>,
}

impl<K: Eq + Hash> LatestWinsReceiver<K> {
    /// Creates an empty receiver.
    pub fn new() -> Self {
        Self {
            newest: HashMap::new(),
        }
    }

    /// Returns the payload if it is newer than anything seen for `key`.
    pub fn accept<T>(&mut self, key: K, packet: Sequenced<T>) -> Option<T> {
        match self.newest.get(&key) {
            Some(&newest) if !sequence_greater_than(packet.seq, newest) => None,
            _ => {
                self.newest.insert(key, packet.seq);
                Some(packet.payload)
            }
        }
    }
}

impl<K: Eq + Hash> Default for LatestWinsReceiver<K> {
    fn default() -> Self {
        Self::new()
    }
}
