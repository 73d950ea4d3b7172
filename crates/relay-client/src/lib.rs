//! Client side of the group relay.
//!
//! - `TransportMachine` - push-first transport state machine with pull fallback
//! - `ClientSession` - async driver performing the machine's actions
//! - `Feed` - history cursor and echo suppression
//! - `WsConnector` / `HttpPullApi` - the real transports

pub mod command;
pub mod endpoint;
pub mod error;
pub mod feed;
pub mod session;
pub mod state;
pub mod transport;

pub use command::{Command, CommandError};
pub use endpoint::{AddressError, Endpoint};
pub use error::TransportError;
pub use feed::Feed;
pub use session::{ClientConfig, ClientSession, Output};
pub use state::{Action, InvalidTransition, TransportEvent, TransportMachine, TransportState};
pub use transport::{HttpPullApi, PullApi, PushConnector, PushLink, WsConnector};
