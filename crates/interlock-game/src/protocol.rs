//! Packets exchanged between a client and the server.

use interlock_net::channel::SequenceNumber;
use interlock_net::{ReplicationMessages, Sequenced};
use serde::{Deserialize, Serialize};

use crate::commands::{Broadcast, Request};
use crate::spatial::Rotator;

/// Client → server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClientPacket {
    /// Reliable, ordered request.
    Request(Sequenced<Request>),
    /// Unreliable head rotation of the sender's character.
    HeadLook(Sequenced<Rotator>),
    /// Acknowledges a reliable replication packet.
    Ack(SequenceNumber),
}

/// Server → client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ServerPacket {
    /// Reliable, ordered replication batch.
    Replication(Sequenced<ReplicationMessages>),
    /// Unreliable, latest-wins broadcast.
    Broadcast(Sequenced<Broadcast>),
    /// Acknowledges a reliable request.
    Ack(SequenceNumber),
}
