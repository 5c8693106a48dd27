//! In-memory packet transport with optional loss, duplication and
//! reordering. Used by the in-process session and by tests; any datagram
//! transport can stand in for it.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Impairments applied to packets crossing a [`LoopbackLink`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConditioner {
    /// Probability in `[0, 1]` that a packet is dropped.
    pub loss: f64,
    /// Probability in `[0, 1]` that a delivered packet is delivered twice.
    pub duplicate: f64,
    /// Probability in `[0, 1]` that a packet jumps ahead of the previous one.
    pub reorder: f64,
}

impl LinkConditioner {
    /// A perfect link.
    pub const PERFECT: Self = Self {
        loss: 0.0,
        duplicate: 0.0,
        reorder: 0.0,
    };
}

impl Default for LinkConditioner {
    fn default() -> Self {
        Self::PERFECT
    }
}

/// One direction of an in-memory connection.
#[derive(Debug)]
pub struct LoopbackLink {
    queue: VecDeque<Vec<u8>>,
    conditioner: LinkConditioner,
    rng: StdRng,
    sent: u64,
    dropped: u64,
}

impl LoopbackLink {
    /// A lossless, in-order link.
    pub fn perfect() -> Self {
        Self::conditioned(LinkConditioner::PERFECT, 0)
    }

    /// A link with the given impairments, seeded for reproducibility.
    pub fn conditioned(conditioner: LinkConditioner, seed: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            conditioner,
            rng: StdRng::seed_from_u64(seed),
            sent: 0,
            dropped: 0,
        }
    }

    /// Puts one packet on the wire.
    pub fn send(&mut self, packet: Vec<u8>) {
        self.sent += 1;
        let c = self.conditioner;
        if c.loss > 0.0 && self.rng.random_bool(c.loss.clamp(0.0, 1.0)) {
            self.dropped += 1;
            return;
        }
        if c.duplicate > 0.0 && self.rng.random_bool(c.duplicate.clamp(0.0, 1.0)) {
            self.queue.push_back(packet.clone());
        }
        if c.reorder > 0.0 && self.rng.random_bool(c.reorder.clamp(0.0, 1.0)) {
            let at = self.queue.len().saturating_sub(1);
            self.queue.insert(at, packet);
        } else {
            self.queue.push_back(packet);
        }
    }

    /// Takes every packet currently in flight.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.queue.drain(..).collect()
    }

    /// Packets handed to [`send`](Self::send) so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Packets the conditioner discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ReliableReceiver, ReliableSender, Sequenced};
    use crate::codec::{decode, encode};

    #[test]
    fn test_perfect_link_is_fifo() {
        let mut link = LoopbackLink::perfect();
        link.send(vec![1]);
        link.send(vec![2]);
        assert_eq!(link.drain(), vec![vec![1], vec![2]]);
        assert!(link.drain().is_empty());
    }

    #[test]
    fn test_reliable_channel_over_lossy_link() {
        let lossy = LinkConditioner {
            loss: 0.4,
            duplicate: 0.2,
            reorder: 0.3,
        };
        let mut forward = LoopbackLink::conditioned(lossy, 7);
        let mut backward = LoopbackLink::conditioned(lossy, 11);
        let mut sender = ReliableSender::new(0.05);
        let mut receiver = ReliableReceiver::new();

        for i in 0..50u32 {
            sender.send(i);
        }

        let mut delivered = Vec::new();
        let mut now = 0.0;
        for _ in 0..2_000 {
            for packet in sender.collect_outgoing(now) {
                forward.send(encode(&packet).unwrap());
            }
            for bytes in forward.drain() {
                let packet: Sequenced<u32> = decode(&bytes).unwrap();
                backward.send(encode(&packet.seq).unwrap());
                delivered.extend(receiver.receive(packet));
            }
            for bytes in backward.drain() {
                sender.acknowledge(decode(&bytes).unwrap());
            }
            if sender.in_flight() == 0 {
                break;
            }
            now += 0.05;
        }

        assert!(forward.dropped() > 0);
        assert_eq!(delivered, (0..50).collect::<Vec<_>>());
        assert_eq!(sender.in_flight(), 0);
    }
}
