//! Events emitted by the validator and the action dispatcher.
use strum_macros::{AsRefStr, Display};
use tracing::{error, info};

use crate::service::Action;

/// What a service event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    /// A start/stop/restart or rule-local command completed.
    Exec,
    /// Existence check outcome.
    Exist,
    /// Data rule (size, permission, checksum, space) outcome.
    Data,
    /// Resource rule (cpu, memory, children) outcome.
    Resource,
    /// Connection probe outcome.
    Connection,
    /// Program exit status outcome.
    Status,
    /// Daemon lifecycle (started, stopped, reloaded, budget exceeded).
    Instance,
}

/// Outcome recorded in an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EventState {
    Succeeded,
    Failed,
    Changed,
    Init,
}

/// One emitted event. Events are delivered to the alert sink (the log) in
/// emission order and, when their action is not `Alert`/`Ignore`, feed the
/// dispatcher.
#[derive(Debug, Clone)]
pub struct Event {
    pub service: String,
    pub kind: EventKind,
    pub state: EventState,
    pub action: Action,
    pub message: String,
}

impl Event {
    pub fn new(
        service: impl Into<String>,
        kind: EventKind,
        state: EventState,
        action: Action,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            kind,
            state,
            action,
            message: message.into(),
        }
    }

    /// Routes the event to the alert sink.
    pub fn post(&self) {
        match self.state {
            EventState::Failed => error!(
                service = %self.service,
                kind = %self.kind,
                action = %self.action,
                "'{}' {}",
                self.service,
                self.message
            ),
            _ => info!(
                service = %self.service,
                kind = %self.kind,
                state = %self.state,
                "'{}' {}",
                self.service,
                self.message
            ),
        }
    }
}
