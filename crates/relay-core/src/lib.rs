//! Core types for the group relay.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` - Validated chat message and its wire validation
//! - `MessageStore` - Bounded history with absolute positions
//! - `CredentialGuard` - One-time scoped credentials for the pull transport
//! - Wire protocol frames for the push transport
//! - Object storage and rendering traits

pub mod credentials;
pub mod message;
pub mod protocol;
pub mod store;
pub mod traits;

pub use credentials::{
    AdminKey, AuthorizationError, ClientCredentials, Credential, CredentialGuard, RotationReason,
    Scope,
};
pub use message::{Field, Message, Notice, ValidationError};
pub use store::{CatchUp, HistoryPage, MessageStore};
pub use traits::{ObjectStore, PlainRenderer, Renderer};
