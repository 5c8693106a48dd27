//! In-process session: one server and any number of clients wired together
//! through loopback links.
//!
//! Each participant gets an upstream and a downstream [`LoopbackLink`],
//! conditioned from `[network]` so that tests and the scripted server can run
//! the same traffic a real deployment would see, loss included.

use std::collections::BTreeMap;

use interlock_config::Config;
use interlock_net::{LinkConditioner, LoopbackLink, ParticipantId};
use tracing::{debug, warn};

use crate::client::Client;
use crate::level::LevelLayout;
use crate::server::Server;

struct Peer {
    client: Client,
    up: LoopbackLink,
    down: LoopbackLink,
}

/// A server and its clients in one process.
pub struct LocalSession {
    config: Config,
    server: Server,
    peers: BTreeMap<ParticipantId, Peer>,
    next_participant: u64,
}

impl LocalSession {
    /// A session already running `layout`.
    pub fn new(config: Config, layout: LevelLayout) -> Self {
        let server = Server::new(config.clone(), layout);
        Self::with_server(config, server)
    }

    /// A session that starts in the lobby and travels to `game_layout`.
    pub fn with_lobby(config: Config, game_layout: LevelLayout) -> Self {
        let server = Server::with_lobby(config.clone(), game_layout);
        Self::with_server(config, server)
    }

    fn with_server(config: Config, server: Server) -> Self {
        Self {
            config,
            server,
            peers: BTreeMap::new(),
            next_participant: 1,
        }
    }

    fn link(&self, seed_offset: u64) -> LoopbackLink {
        let conditioner = LinkConditioner {
            loss: self.config.network.link_loss,
            ..LinkConditioner::PERFECT
        };
        LoopbackLink::conditioned(
            conditioner,
            self.config.network.link_seed.wrapping_add(seed_offset),
        )
    }

    /// Connects a new client and returns its participant id.
    pub fn connect(&mut self) -> ParticipantId {
        let participant = ParticipantId(self.next_participant);
        self.next_participant += 1;
        let peer = Peer {
            client: Client::new(participant, &self.config),
            up: self.link(participant.0 * 2),
            down: self.link(participant.0 * 2 + 1),
        };
        self.peers.insert(participant, peer);
        self.server.connect(participant);
        participant
    }

    /// Disconnects `participant`; packets in flight are lost.
    pub fn disconnect(&mut self, participant: ParticipantId) {
        if self.peers.remove(&participant).is_some() {
            self.server.disconnect(participant);
        }
    }

    /// Advances every peer and the server by `dt` seconds and exchanges
    /// packets once in each direction.
    pub fn step(&mut self, dt: f32) {
        for peer in self.peers.values_mut() {
            peer.client.update(dt);
            for packet in peer.client.collect_outgoing() {
                peer.up.send(packet);
            }
        }

        for (participant, peer) in &mut self.peers {
            for bytes in peer.up.drain() {
                if let Err(err) = self.server.receive(*participant, &bytes) {
                    warn!(%participant, %err, "server dropped malformed packet");
                }
            }
        }

        let ticks = self.server.update(f64::from(dt));
        if ticks > 1 {
            debug!(ticks, "server caught up");
        }

        for (participant, peer) in &mut self.peers {
            for packet in self.server.collect_outgoing(*participant) {
                peer.down.send(packet);
            }
            for bytes in peer.down.drain() {
                if let Err(err) = peer.client.receive(&bytes) {
                    warn!(%participant, %err, "client dropped malformed packet");
                }
            }
        }
    }

    /// Steps for `seconds` of simulated time in increments of `dt`.
    pub fn run(&mut self, seconds: f32, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let steps = (seconds / dt).ceil() as u32;
        for _ in 0..steps {
            self.step(dt);
        }
    }

    /// The server.
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Mutable server access.
    pub fn server_mut(&mut self) -> &mut Server {
        &mut self.server
    }

    /// The client of `participant`.
    pub fn client(&self, participant: ParticipantId) -> Option<&Client> {
        self.peers.get(&participant).map(|p| &p.client)
    }

    /// Mutable client access.
    pub fn client_mut(&mut self, participant: ParticipantId) -> Option<&mut Client> {
        self.peers.get_mut(&participant).map(|p| &mut p.client)
    }

    /// Connected participants.
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.peers.keys().copied().collect()
    }

    /// Packets dropped on every link so far.
    pub fn dropped_packets(&self) -> u64 {
        self.peers
            .values()
            .map(|p| p.up.dropped() + p.down.dropped())
            .sum()
    }
}
