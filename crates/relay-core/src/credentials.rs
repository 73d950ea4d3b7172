//! Short-lived, one-time credentials guarding the pull transport.
//!
//! Each [`Scope`] has exactly one live [`Credential`]. A credential is replaced
//! after its first successful use, when it grows older than the rotation
//! interval, or on an administrative request. All transitions, including the
//! admin snapshot, go through a single lock.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Number of random bytes in a secret.
const SECRET_BYTES: usize = 32;

/// Operation a credential authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Read history over the pull transport.
    Read,
    /// Publish over the pull transport.
    Write,
    /// Clear the history.
    Purge,
}

impl Scope {
    /// Every scope, in a fixed order.
    pub const ALL: [Self; 3] = [Self::Read, Self::Write, Self::Purge];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Purge => "purge",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a credential was re-issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationReason {
    /// Administrative request.
    Manual,
    /// Consumed by a successful validation.
    Use,
    /// Rotation interval elapsed.
    Timer,
}

impl RotationReason {
    /// Reason tag used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Use => "use",
            Self::Timer => "timer",
        }
    }
}

/// A live credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Authorized operation.
    pub scope: Scope,
    /// Hex-encoded secret.
    pub secret: String,
    /// When the credential was issued.
    pub issued_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("scope", &self.scope)
            .field("secret", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl Credential {
    fn generate(scope: Scope) -> Self {
        let mut bytes = [0u8; SECRET_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self {
            scope,
            secret: hex::encode(bytes),
            issued_at: Utc::now(),
        }
    }

    fn matches(&self, presented: &str) -> bool {
        bool::from(self.secret.as_bytes().ct_eq(presented.as_bytes()))
    }
}

/// Secrets handed to ordinary clients. Never includes the purge scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    /// Current read secret.
    pub read: String,
    /// Current write secret.
    pub write: String,
}

/// Missing or incorrect credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("missing {0} credential")]
    Missing(Scope),
    #[error("invalid {0} credential")]
    Invalid(Scope),
    #[error("invalid administrative key")]
    Admin,
}

/// Issues, validates and rotates scoped credentials.
pub struct CredentialGuard {
    live: Mutex<HashMap<Scope, Credential>>,
}

impl Default for CredentialGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialGuard {
    /// Create a guard with a fresh credential for every scope.
    #[must_use]
    pub fn new() -> Self {
        let live = Scope::ALL
            .into_iter()
            .map(|scope| (scope, Credential::generate(scope)))
            .collect();
        Self {
            live: Mutex::new(live),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Scope, Credential>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a new secret for `scope`, replacing the current one.
    pub fn issue(&self, scope: Scope) -> Credential {
        let credential = Credential::generate(scope);
        self.lock().insert(scope, credential.clone());
        credential
    }

    /// Check a presented secret. Succeeds at most once per issued secret.
    ///
    /// A failed check leaves the credential in place, so probing cannot force
    /// rotation.
    pub fn validate(&self, scope: Scope, presented: &str) -> bool {
        if presented.is_empty() {
            return false;
        }
        let mut live = self.lock();
        let valid = live.get(&scope).is_some_and(|c| c.matches(presented));
        if valid {
            live.insert(scope, Credential::generate(scope));
            tracing::debug!(%scope, reason = RotationReason::Use.as_str(), "credential rotated");
        }
        valid
    }

    /// Validate, mapping failure to an [`AuthorizationError`].
    ///
    /// # Errors
    /// Returns error if the secret is absent or does not match.
    pub fn authorize(&self, scope: Scope, presented: Option<&str>) -> Result<(), AuthorizationError> {
        match presented {
            None | Some("") => Err(AuthorizationError::Missing(scope)),
            Some(secret) if self.validate(scope, secret) => Ok(()),
            Some(_) => Err(AuthorizationError::Invalid(scope)),
        }
    }

    /// Explicitly re-issue `scope`.
    pub fn rotate(&self, scope: Scope, reason: RotationReason) -> Credential {
        let credential = self.issue(scope);
        tracing::info!(%scope, reason = reason.as_str(), "credential rotated");
        credential
    }

    /// Re-issue every scope.
    pub fn rotate_all(&self, reason: RotationReason) {
        let mut live = self.lock();
        for scope in Scope::ALL {
            live.insert(scope, Credential::generate(scope));
        }
        drop(live);
        tracing::info!(reason = reason.as_str(), "all credentials rotated");
    }

    /// Re-issue credentials issued at least `max_age` ago.
    pub fn rotate_expired(&self, max_age: Duration) -> Vec<Scope> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut live = self.lock();
        let expired: Vec<Scope> = Scope::ALL
            .into_iter()
            .filter(|scope| {
                live.get(scope)
                    .is_none_or(|c| now.signed_duration_since(c.issued_at) >= max_age)
            })
            .collect();
        for scope in &expired {
            live.insert(*scope, Credential::generate(*scope));
        }
        drop(live);
        for scope in &expired {
            tracing::debug!(%scope, reason = RotationReason::Timer.as_str(), "credential rotated");
        }
        expired
    }

    /// Every live credential. Only for the administrative path.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Credential> {
        let live = self.lock();
        Scope::ALL
            .into_iter()
            .filter_map(|scope| live.get(&scope).cloned())
            .collect()
    }

    /// The read and write secrets handed to ordinary clients.
    #[must_use]
    pub fn client_credentials(&self) -> ClientCredentials {
        let live = self.lock();
        let secret = |scope: Scope| {
            live.get(&scope)
                .map(|c| c.secret.clone())
                .unwrap_or_default()
        };
        ClientCredentials {
            read: secret(Scope::Read),
            write: secret(Scope::Write),
        }
    }

    /// Current secret for a scope.
    #[must_use]
    pub fn current(&self, scope: Scope) -> Option<String> {
        self.lock().get(&scope).map(|c| c.secret.clone())
    }
}

/// Long-lived administrative key. Never rotated.
#[derive(Clone)]
pub struct AdminKey {
    secret: String,
}

impl std::fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminKey(<redacted>)")
    }
}

impl AdminKey {
    /// Build the key from its seed. Returns `None` for a blank seed.
    #[must_use]
    pub fn from_seed(seed: &str) -> Option<Self> {
        let seed = seed.trim();
        (!seed.is_empty()).then(|| Self {
            secret: seed.to_owned(),
        })
    }

    /// Check a presented key.
    ///
    /// # Errors
    /// Returns error if the key is absent or wrong.
    pub fn verify(&self, presented: Option<&str>) -> Result<(), AuthorizationError> {
        match presented {
            Some(p) if bool::from(self.secret.as_bytes().ct_eq(p.as_bytes())) => Ok(()),
            _ => Err(AuthorizationError::Admin),
        }
    }
}
