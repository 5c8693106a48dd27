//! Validated remote invocation.
//!
//! A non-authoritative participant asks the authority to change state by
//! sending a [`RemoteCommand`]. The authority first runs the command's
//! [`validate`](RemoteCommand::validate) against its current state; only if
//! that passes does [`apply`](RemoteCommand::apply) run. A rejected command
//! changes nothing and nothing is reported back to the sender: the sender
//! learns the outcome only through replication.
//!
//! `validate` takes `&State` and must stay free of side effects.

use std::fmt::Debug;

use tracing::{debug, trace};

use crate::replication::ParticipantId;

/// Per-request metadata supplied by the channel, not by the sender.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestContext {
    /// The participant the request arrived from.
    pub sender: ParticipantId,
    /// Authority tick the request is applied in.
    pub tick: u64,
    /// Length of that tick in seconds.
    pub dt: f32,
}

/// A command the authority may accept or reject.
pub trait RemoteCommand: Debug {
    /// Authoritative state the command reads and mutates.
    type State;
    /// Why a command was refused.
    type Rejection: std::error::Error;

    /// Checks the command against current state.
    fn validate(&self, state: &Self::State, ctx: &RequestContext) -> Result<(), Self::Rejection>;

    /// Mutates state. Only called after [`validate`](Self::validate) passed.
    fn apply(&self, state: &mut Self::State, ctx: &RequestContext);
}

/// Outcome of [`dispatch`], for the authority's own bookkeeping and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<E> {
    /// Validation passed and the handler ran.
    Applied,
    /// Validation failed; the handler did not run.
    Rejected(E),
}

impl<E> Dispatch<E> {
    /// Returns `true` if the handler ran.
    pub fn is_applied(&self) -> bool {
        matches!(self, Dispatch::Applied)
    }
}

/// Validates and, if accepted, applies `command`. The `&mut` borrow makes
/// each validate+apply pair atomic with respect to other requests.
pub fn dispatch<C: RemoteCommand>(
    command: &C,
    state: &mut C::State,
    ctx: &RequestContext,
) -> Dispatch<C::Rejection> {
    match command.validate(state, ctx) {
        Ok(()) => {
            trace!(sender = %ctx.sender, ?command, "request accepted");
            command.apply(state, ctx);
            Dispatch::Applied
        }
        Err(reason) => {
            debug!(sender = %ctx.sender, ?command, %reason, "request rejected");
            Dispatch::Rejected(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        value: i32,
        owner: Option<ParticipantId>,
    }

    #[derive(Debug, thiserror::Error, PartialEq)]
    enum CounterRejection {
        #[error("counter is held by someone else")]
        Held,
    }

    #[derive(Debug)]
    struct Increment;

    impl RemoteCommand for Increment {
        type State = Counter;
        type Rejection = CounterRejection;

        fn validate(&self, state: &Counter, ctx: &RequestContext) -> Result<(), CounterRejection> {
            match state.owner {
                Some(owner) if owner != ctx.sender => Err(CounterRejection::Held),
                _ => Ok(()),
            }
        }

        fn apply(&self, state: &mut Counter, ctx: &RequestContext) {
            state.value += 1;
            state.owner = Some(ctx.sender);
        }
    }

    fn ctx(sender: u64) -> RequestContext {
        RequestContext {
            sender: ParticipantId(sender),
            tick: 0,
            dt: 1.0 / 60.0,
        }
    }

    #[test]
    fn test_rejected_command_changes_nothing() {
        let mut state = Counter::default();
        assert!(dispatch(&Increment, &mut state, &ctx(1)).is_applied());
        assert_eq!(
            dispatch(&Increment, &mut state, &ctx(2)),
            Dispatch::Rejected(CounterRejection::Held)
        );
        assert_eq!(state.value, 1);
        assert_eq!(state.owner, Some(ParticipantId(1)));
    }
}
