//! Transport state machine.
//!
//! Pure transition table: events in, actions out. The driver in
//! [`crate::session`] performs the actions and feeds results back as events.

use thiserror::Error;
use url::Url;

use crate::endpoint::Endpoint;

/// Which transport the client is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    ConnectingPush,
    ConnectedPush,
    PollingPull,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::ConnectingPush => "connecting (push)",
            Self::ConnectedPush => "connected (push)",
            Self::PollingPull => "polling (pull)",
        })
    }
}

/// Input to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connect(Endpoint),
    HandshakeSucceeded,
    TransportFailed(String),
    RemoteClosed,
    Disconnect,
}

impl TransportEvent {
    const fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::HandshakeSucceeded => "handshake-succeeded",
            Self::TransportFailed(_) => "transport-failed",
            Self::RemoteClosed => "remote-closed",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    OpenPush(Url),
    ClosePush,
    /// Render the history received during the handshake.
    CatchUp,
    StartPolling(Url),
    StopPolling,
    Notify(String),
}

/// Event not allowed in the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{event} is not valid while {state}")]
pub struct InvalidTransition {
    pub state: TransportState,
    pub event: &'static str,
}

/// The client transport state machine.
#[derive(Debug, Clone)]
pub struct TransportMachine {
    state: TransportState,
    endpoint: Option<Endpoint>,
}

impl Default for TransportMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportMachine {
    /// Start disconnected.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: TransportState::Disconnected,
            endpoint: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TransportState {
        self.state
    }

    /// Endpoint of the current or last connection attempt.
    #[must_use]
    pub const fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Apply an event, returning the actions to perform in order.
    ///
    /// # Errors
    /// Returns error if the event is not valid in the current state; the
    /// state is left unchanged.
    pub fn handle(&mut self, event: TransportEvent) -> Result<Vec<Action>, InvalidTransition> {
        use TransportEvent as E;
        use TransportState as S;

        match (self.state, event) {
            (S::Disconnected, E::Connect(endpoint)) => Ok(self.open(endpoint)),
            (S::Disconnected, E::Disconnect | E::RemoteClosed | E::TransportFailed(_)) => {
                Ok(Vec::new())
            }

            (S::ConnectingPush, E::HandshakeSucceeded) => {
                self.state = S::ConnectedPush;
                let url = self.endpoint_url();
                Ok(vec![Action::Notify(format!("connected to {url}")), Action::CatchUp])
            }
            (S::ConnectingPush, E::TransportFailed(reason)) => {
                Ok(self.fall_back(None, &format!("push connection failed: {reason}")))
            }
            (S::ConnectingPush, E::RemoteClosed) => {
                Ok(self.fall_back(None, "push connection closed during handshake"))
            }

            (S::ConnectedPush, E::TransportFailed(reason)) => Ok(self.fall_back(
                Some(Action::ClosePush),
                &format!("push connection lost: {reason}"),
            )),
            (S::ConnectedPush, E::RemoteClosed) => Ok(self.fall_back(
                Some(Action::ClosePush),
                "push connection closed by relay",
            )),

            (S::ConnectingPush | S::ConnectedPush | S::PollingPull, E::Disconnect) => {
                Ok(self.teardown())
            }
            (S::ConnectingPush | S::ConnectedPush | S::PollingPull, E::Connect(endpoint)) => {
                let mut actions = self.teardown();
                actions.extend(self.open(endpoint));
                Ok(actions)
            }

            (state, event) => Err(InvalidTransition {
                state,
                event: event.name(),
            }),
        }
    }

    fn open(&mut self, endpoint: Endpoint) -> Vec<Action> {
        let action = match &endpoint {
            Endpoint::Push { url, .. } => {
                self.state = TransportState::ConnectingPush;
                Action::OpenPush(url.clone())
            }
            Endpoint::Pull(base) => {
                self.state = TransportState::PollingPull;
                Action::StartPolling(base.clone())
            }
        };
        self.endpoint = Some(endpoint);
        vec![action]
    }

    fn teardown(&mut self) -> Vec<Action> {
        let action = match self.state {
            TransportState::Disconnected => None,
            TransportState::ConnectingPush | TransportState::ConnectedPush => {
                Some(Action::ClosePush)
            }
            TransportState::PollingPull => Some(Action::StopPolling),
        };
        self.state = TransportState::Disconnected;
        action.into_iter().collect()
    }

    fn fall_back(&mut self, close: Option<Action>, reason: &str) -> Vec<Action> {
        self.state = TransportState::PollingPull;
        let mut actions: Vec<Action> = close.into_iter().collect();
        match self.endpoint.as_ref().map(Endpoint::pull_base) {
            Some(base) => {
                actions.push(Action::Notify(format!(
                    "{reason}; falling back to polling {base}"
                )));
                actions.push(Action::StartPolling(base.clone()));
            }
            None => {
                self.state = TransportState::Disconnected;
                actions.push(Action::Notify(reason.to_owned()));
            }
        }
        actions
    }

    fn endpoint_url(&self) -> String {
        self.endpoint
            .as_ref()
            .map_or_else(String::new, ToString::to_string)
    }
}
