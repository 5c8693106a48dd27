//! Authority/replication core: schema-driven property replication, remote
//! invocation channels, command dispatch, generation-checked entity handles,
//! deferred timers, and an in-memory transport.

pub mod channel;
pub mod codec;
pub mod handle;
pub mod replication;
pub mod rpc;
pub mod tick;
pub mod timer;
pub mod transport;

pub use channel::{
    LatestWinsReceiver, ReliableReceiver, ReliableSender, Sequenced, UnreliableSender,
    sequence_greater_than,
};
pub use codec::{CodecError, PROTOCOL_VERSION, decode, encode};
pub use handle::{HandleError, NetworkRegistry, WeakEntity};
pub use replication::{
    DespawnEntity, EntityUpdate, FieldSpec, NetOwner, NetworkId, NotifyFn, ParticipantId,
    ReplicationClientSystem, ReplicationCondition, ReplicationMessages, ReplicationServerSystem,
    ReplicationSet, SpawnEntity,
};
pub use rpc::{Dispatch, RemoteCommand, RequestContext, dispatch};
pub use tick::TickSchedule;
pub use timer::TimerQueue;
pub use transport::{LinkConditioner, LoopbackLink};
