//! Lobby session controller.
//!
//! Counts participants and, the first time the count reaches the threshold,
//! arms a one-shot start timer. The timer is never re-armed or cancelled:
//! further joins and leaves only change the count. When it fires the
//! session starts once and travels to the game map.

use std::collections::BTreeSet;

use interlock_config::SessionConfig;
use interlock_net::{ParticipantId, TimerQueue};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LobbyTimer {
    StartSession,
}

/// Something the server must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    /// The session was marked started.
    SessionStarted,
    /// Every participant must travel to `map`.
    Travel {
        /// Destination map, with the listen option appended.
        map: String,
    },
}

/// Participant counter with a delayed one-time start.
#[derive(Debug)]
pub struct Lobby {
    participants: BTreeSet<ParticipantId>,
    threshold: u32,
    start_delay: f64,
    game_map: String,
    timers: TimerQueue<LobbyTimer>,
    armed: bool,
    started: bool,
}

impl Lobby {
    /// A lobby configured from the session settings.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            participants: BTreeSet::new(),
            threshold: config.player_threshold,
            start_delay: config.start_delay_secs,
            game_map: config.game_map.clone(),
            timers: TimerQueue::new(),
            armed: false,
            started: false,
        }
    }

    /// A participant entered the lobby.
    pub fn post_login(&mut self, participant: ParticipantId) {
        if !self.participants.insert(participant) {
            warn!(%participant, "participant joined the lobby twice");
            return;
        }
        let count = self.player_count();
        info!(%participant, count, "participant joined lobby");
        if count >= self.threshold && !self.armed && !self.started {
            self.armed = self.timers.arm(LobbyTimer::StartSession, self.start_delay);
            info!(delay_secs = self.start_delay, "session start armed");
        }
    }

    /// A participant left. Does not cancel an armed start.
    pub fn logout(&mut self, participant: ParticipantId) {
        if self.participants.remove(&participant) {
            info!(%participant, count = self.player_count(), "participant left lobby");
        }
    }

    /// Advances the start timer.
    pub fn tick(&mut self, dt: f64) -> Vec<LobbyEvent> {
        let mut events = Vec::new();
        for timer in self.timers.advance(dt) {
            match timer {
                LobbyTimer::StartSession if !self.started => {
                    self.started = true;
                    info!(map = %self.game_map, "starting session");
                    events.push(LobbyEvent::SessionStarted);
                    events.push(LobbyEvent::Travel {
                        map: format!("{}?listen", self.game_map),
                    });
                }
                LobbyTimer::StartSession => {}
            }
        }
        events
    }

    /// Participants currently in the lobby.
    pub fn player_count(&self) -> u32 {
        self.participants.len() as u32
    }

    /// Seconds until the start fires, if armed and pending.
    pub fn start_remaining(&self) -> Option<f64> {
        self.timers.remaining(&LobbyTimer::StartSession)
    }

    /// Returns `true` once the session has started.
    pub fn has_started(&self) -> bool {
        self.started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby() -> Lobby {
        Lobby::new(&SessionConfig::default())
    }

    #[test]
    fn test_second_join_arms_single_start() {
        let mut lobby = lobby();
        lobby.post_login(ParticipantId(1));
        assert_eq!(lobby.start_remaining(), None);
        lobby.post_login(ParticipantId(2));
        assert_eq!(lobby.start_remaining(), Some(10.0));
    }

    #[test]
    fn test_third_join_does_not_reset_delay() {
        let mut lobby = lobby();
        lobby.post_login(ParticipantId(1));
        lobby.post_login(ParticipantId(2));
        assert!(lobby.tick(4.0).is_empty());
        lobby.post_login(ParticipantId(3));
        assert_eq!(lobby.start_remaining(), Some(6.0));
        assert!(lobby.tick(5.9).is_empty());
        assert_eq!(lobby.tick(0.2).len(), 2);
    }

    #[test]
    fn test_leave_does_not_cancel_start() {
        let mut lobby = lobby();
        lobby.post_login(ParticipantId(1));
        lobby.post_login(ParticipantId(2));
        lobby.logout(ParticipantId(2));
        lobby.logout(ParticipantId(1));
        assert_eq!(lobby.player_count(), 0);

        let events = lobby.tick(10.0);
        assert_eq!(events, vec![
            LobbyEvent::SessionStarted,
            LobbyEvent::Travel {
                map: "/Game/ThirdPerson/Maps/ThirdPersonMap?listen".to_string(),
            },
        ]);
        assert!(lobby.has_started());
    }

    #[test]
    fn test_start_happens_once() {
        let mut lobby = lobby();
        lobby.post_login(ParticipantId(1));
        lobby.post_login(ParticipantId(2));
        lobby.tick(10.0);
        lobby.logout(ParticipantId(2));
        lobby.post_login(ParticipantId(2));
        assert_eq!(lobby.start_remaining(), None);
        assert!(lobby.tick(60.0).is_empty());
    }

    #[test]
    fn test_duplicate_join_counts_once() {
        let mut lobby = lobby();
        lobby.post_login(ParticipantId(1));
        lobby.post_login(ParticipantId(1));
        assert_eq!(lobby.player_count(), 1);
        assert_eq!(lobby.start_remaining(), None);
    }
}
