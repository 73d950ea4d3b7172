//! Push session tracking for the group relay.
//!
//! Provides:
//! - `BroadcastHub` - Live push sessions, bounded fanout and heartbeat
//! - `PresenceTracker` - Recently seen pull-transport identities

pub mod hub;
pub mod presence;

pub use hub::{BroadcastHub, HubConfig, Outbound, PushSession, SessionId, SessionInfo};
pub use presence::PresenceTracker;
