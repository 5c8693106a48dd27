//! The authoritative server: connections, channels and the fixed-rate loop.
//!
//! Received requests queue in arrival order across all connections and are
//! dispatched at the start of the next tick. After the tick, replication is
//! pushed on each connection's reliable channel and broadcasts go out on the
//! unreliable one.

use std::collections::BTreeMap;

use interlock_config::Config;
use interlock_net::{
    CodecError, LatestWinsReceiver, ParticipantId, ReliableReceiver, ReliableSender,
    ReplicationMessages, TickSchedule, UnreliableSender, decode, encode,
};
use tracing::{debug, info, warn};

use crate::authority::{Authority, AuthorityEvent};
use crate::commands::Request;
use crate::level::LevelLayout;
use crate::lobby::{Lobby, LobbyEvent};
use crate::protocol::{ClientPacket, ServerPacket};
use crate::spatial::Rotator;

/// Per-participant channel state.
#[derive(Debug)]
struct Connection {
    requests: ReliableReceiver<Request>,
    replication: ReliableSender<ReplicationMessages>,
    broadcasts: UnreliableSender,
    head_look: LatestWinsReceiver<()>,
    pending_head_look: Option<Rotator>,
    outbox: Vec<ServerPacket>,
}

impl Connection {
    fn new(resend_interval: f64) -> Self {
        Self {
            requests: ReliableReceiver::new(),
            replication: ReliableSender::new(resend_interval),
            broadcasts: UnreliableSender::new(),
            head_look: LatestWinsReceiver::new(),
            pending_head_look: None,
            outbox: Vec::new(),
        }
    }
}

/// Authoritative server for one session.
pub struct Server {
    authority: Authority,
    lobby: Option<Lobby>,
    game_layout: LevelLayout,
    connections: BTreeMap<ParticipantId, Connection>,
    inbox: Vec<(ParticipantId, Request)>,
    events: Vec<AuthorityEvent>,
    schedule: TickSchedule,
    clock: f64,
    resend_interval: f64,
}

impl Server {
    /// A server already running `layout`.
    pub fn new(config: Config, layout: LevelLayout) -> Self {
        let schedule = TickSchedule::with_tick_rate(config.session.tick_rate);
        let resend_interval = config.network.resend_interval_secs;
        Self {
            authority: Authority::new(config, layout.clone()),
            lobby: None,
            game_layout: layout,
            connections: BTreeMap::new(),
            inbox: Vec::new(),
            events: Vec::new(),
            schedule,
            clock: 0.0,
            resend_interval,
        }
    }

    /// A server waiting in the lobby map; `game_layout` loads once the lobby
    /// starts the session.
    pub fn with_lobby(config: Config, game_layout: LevelLayout) -> Self {
        let lobby_layout = LevelLayout::empty(config.session.lobby_map.clone());
        let lobby = Lobby::new(&config.session);
        let mut server = Self::new(config, lobby_layout);
        server.game_layout = game_layout;
        server.lobby = Some(lobby);
        server
    }

    /// The authoritative simulation.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Mutable simulation access for movement and tests.
    pub fn authority_mut(&mut self) -> &mut Authority {
        &mut self.authority
    }

    /// The lobby, while the session has not started.
    pub fn lobby(&self) -> Option<&Lobby> {
        self.lobby.as_ref()
    }

    /// Accepts a new participant.
    pub fn connect(&mut self, participant: ParticipantId) {
        if self.connections.contains_key(&participant) {
            warn!(%participant, "already connected");
            return;
        }
        self.connections
            .insert(participant, Connection::new(self.resend_interval));
        self.authority.join(participant);
        if let Some(lobby) = &mut self.lobby {
            lobby.post_login(participant);
        }
        info!(%participant, "connected");
    }

    /// Drops a participant.
    pub fn disconnect(&mut self, participant: ParticipantId) {
        if self.connections.remove(&participant).is_none() {
            return;
        }
        self.inbox.retain(|(sender, _)| *sender != participant);
        self.authority.leave(participant);
        if let Some(lobby) = &mut self.lobby {
            lobby.logout(participant);
        }
        info!(%participant, "disconnected");
    }

    /// Handles one datagram from `from`.
    pub fn receive(&mut self, from: ParticipantId, bytes: &[u8]) -> Result<(), CodecError> {
        let packet: ClientPacket = decode(bytes)?;
        let Some(connection) = self.connections.get_mut(&from) else {
            debug!(participant = %from, "packet from unknown participant dropped");
            return Ok(());
        };
        match packet {
            ClientPacket::Request(sequenced) => {
                connection.outbox.push(ServerPacket::Ack(sequenced.seq));
                for request in connection.requests.receive(sequenced) {
                    self.inbox.push((from, request));
                }
            }
            ClientPacket::HeadLook(sequenced) => {
                if let Some(rotation) = connection.head_look.accept((), sequenced) {
                    connection.pending_head_look = Some(rotation);
                }
            }
            ClientPacket::Ack(seq) => connection.replication.acknowledge(seq),
        }
        Ok(())
    }

    /// Advances real time by `dt` seconds, running as many fixed ticks as
    /// are due. Returns the number of ticks run.
    pub fn update(&mut self, dt: f64) -> u32 {
        self.clock += dt;
        let ticks = self.schedule.accumulate(dt);
        let tick_dt = self.schedule.tick_duration_secs();
        for _ in 0..ticks {
            self.run_tick(tick_dt);
        }
        ticks
    }

    fn run_tick(&mut self, dt: f64) {
        for (sender, request) in std::mem::take(&mut self.inbox) {
            self.authority.handle_request(sender, &request);
        }
        for (participant, connection) in &mut self.connections {
            if let Some(rotation) = connection.pending_head_look.take() {
                self.authority.receive_head_look(*participant, rotation);
            }
        }

        self.authority.tick(dt as f32);

        let lobby_events = self.lobby.as_mut().map(|l| l.tick(dt)).unwrap_or_default();
        for event in lobby_events {
            match event {
                LobbyEvent::SessionStarted => info!("session started"),
                LobbyEvent::Travel { map } => {
                    let mut layout = self.game_layout.clone();
                    layout.name = map;
                    self.authority.load_layout(layout);
                    self.lobby = None;
                }
            }
        }

        for event in self.authority.drain_events() {
            info!(?event, "authority event");
            self.events.push(event);
        }

        let mut batches = self.authority.replicate();
        for (participant, connection) in &mut self.connections {
            if let Some(batch) = batches.remove(participant)
                && !batch.is_empty()
            {
                connection.replication.send(batch);
            }
        }

        for (subject, broadcast) in self.authority.drain_broadcasts() {
            for (participant, connection) in &mut self.connections {
                if *participant != subject {
                    let stamped = connection.broadcasts.stamp(broadcast);
                    connection.outbox.push(ServerPacket::Broadcast(stamped));
                }
            }
        }
    }

    /// Serialized packets due for `participant`.
    pub fn collect_outgoing(&mut self, participant: ParticipantId) -> Vec<Vec<u8>> {
        let Some(connection) = self.connections.get_mut(&participant) else {
            return Vec::new();
        };
        let mut packets: Vec<ServerPacket> = connection.outbox.drain(..).collect();
        packets.extend(
            connection
                .replication
                .collect_outgoing(self.clock)
                .into_iter()
                .map(ServerPacket::Replication),
        );
        packets
            .iter()
            .filter_map(|packet| match encode(packet) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!(%err, "failed to encode server packet");
                    None
                }
            })
            .collect()
    }

    /// Replication batches not yet acknowledged by `participant`.
    pub fn unacknowledged(&self, participant: ParticipantId) -> usize {
        self.connections
            .get(&participant)
            .map_or(0, |c| c.replication.in_flight())
    }

    /// Authority events since the last call.
    pub fn drain_events(&mut self) -> Vec<AuthorityEvent> {
        std::mem::take(&mut self.events)
    }

    /// Connected participants.
    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.connections.keys().copied()
    }
}
