//! Gameplay on top of the replication core: the two-button door, the
//! pressable button, the draggable crate, resizable characters with head
//! look, the lobby countdown, and the server, client and in-process session
//! that carry them over the wire.

pub mod authority;
pub mod button;
pub mod character;
pub mod client;
pub mod commands;
pub mod door;
pub mod level;
pub mod lobby;
pub mod movable_crate;
pub mod presentation;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod session;
pub mod spatial;

pub use authority::{Authority, AuthorityEvent, LevelEntities};
pub use client::Client;
pub use commands::{Broadcast, Rejection, Request};
pub use door::{DoorTransition, Side};
pub use level::{DoorPlacement, LevelLayout};
pub use lobby::{Lobby, LobbyEvent};
pub use protocol::{ClientPacket, ServerPacket};
pub use server::Server;
pub use session::LocalSession;
pub use spatial::{Rotator, Transform, View};
