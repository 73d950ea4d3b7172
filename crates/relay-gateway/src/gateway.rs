//! Transport-agnostic relay surface.
//!
//! Both transports go through [`RelayGateway`]: it validates incoming
//! payloads, feeds the [`MessageStore`] and [`BroadcastHub`], and enforces the
//! [`CredentialGuard`] on guarded pull calls.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use relay_core::{
    AdminKey, AuthorizationError, ClientCredentials, Credential, CredentialGuard, HistoryPage,
    Message, MessageStore, Notice, ObjectStore, RotationReason, Scope, ValidationError,
    traits::{Object, ObjectError, StoredObject},
};
use relay_hub::{BroadcastHub, HubConfig, Outbound, PresenceTracker, PushSession, SessionId};
use serde_json::Value;
use thiserror::Error;

/// Gateway error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthorizationError),
    #[error("Object storage: {0}")]
    Object(#[from] ObjectError),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Where a publish came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A push session; excluded from the fanout of its own message.
    Push(SessionId),
    /// A pull-transport request.
    Pull,
}

/// Gateway tuning.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    /// Retained history length.
    pub max_history: usize,
    /// Largest accepted upload.
    pub max_upload_bytes: usize,
    /// How long a pull client counts as present after its last call.
    pub pull_presence_ttl: Duration,
    /// Push session tuning.
    pub hub: HubConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_history: relay_core::store::DEFAULT_CAPACITY,
            max_upload_bytes: 5 * 1024 * 1024,
            pull_presence_ttl: Duration::from_secs(10),
            hub: HubConfig::default(),
        }
    }
}

/// The relay's boundary component.
pub struct RelayGateway {
    store: MessageStore,
    hub: Arc<BroadcastHub>,
    guard: CredentialGuard,
    admin: AdminKey,
    pull_presence: PresenceTracker,
    objects: Arc<dyn ObjectStore>,
    max_upload_bytes: usize,
}

impl RelayGateway {
    /// Create a gateway with empty history and fresh credentials.
    #[must_use]
    pub fn new(config: GatewayConfig, admin: AdminKey, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            store: MessageStore::with_capacity(config.max_history),
            hub: Arc::new(BroadcastHub::new(config.hub)),
            guard: CredentialGuard::new(),
            admin,
            pull_presence: PresenceTracker::new(config.pull_presence_ttl),
            objects,
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    /// The push session hub.
    #[must_use]
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// The credential guard.
    #[must_use]
    pub fn credentials(&self) -> &CredentialGuard {
        &self.guard
    }

    /// Largest accepted upload, in bytes.
    #[must_use]
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Validate and accept a message, returning its absolute history index.
    ///
    /// # Errors
    /// Returns error if the payload does not validate; nothing is stored or
    /// broadcast in that case.
    pub async fn publish(&self, raw: &Value, origin: Origin) -> Result<u64, ValidationError> {
        let message = Message::validate(raw).inspect_err(|e| {
            tracing::debug!(?origin, "rejected message: {e}");
        })?;

        if let Some(origin_id) = message.origin_id.as_deref() {
            match origin {
                Origin::Push(session_id) => self.hub.identify(session_id, origin_id),
                Origin::Pull => self.pull_presence.touch(origin_id),
            }
        }

        let exclude = match origin {
            Origin::Push(session_id) => Some(session_id),
            Origin::Pull => None,
        };
        let (index, delivered) = self
            .hub
            .fanout_with(
                || {
                    let index = self.store.append(message.clone()) - 1;
                    (index, Outbound::Chat { message, index })
                },
                exclude,
            )
            .await;

        tracing::debug!(index, delivered, ?origin, "message accepted");
        Ok(index)
    }

    /// Retained history, oldest first.
    #[must_use]
    pub fn history(&self) -> HistoryPage {
        self.store.page()
    }

    /// Clear history on behalf of a client holding the purge credential.
    ///
    /// # Errors
    /// Returns error if the credential is missing or wrong.
    pub async fn purge(&self, presented: Option<&str>) -> Result<(), AuthorizationError> {
        self.guard.authorize(Scope::Purge, presented)?;
        self.purge_internal("request").await;
        Ok(())
    }

    /// Clear history without a credential check and broadcast the notice.
    ///
    /// Only for triggers inside the process, such as the daily schedule.
    pub async fn purge_internal(&self, trigger: &str) {
        let notice = Notice::history_cleared();
        let ((), delivered) = self
            .hub
            .fanout_with(
                || {
                    self.store.clear(notice.clone());
                    ((), Outbound::Notice(notice))
                },
                None,
            )
            .await;
        tracing::info!(trigger, delivered, "history purged");
    }

    /// Distinct participants: live push sessions plus recent pull clients.
    #[must_use]
    pub fn presence(&self) -> usize {
        let mut identities = self.hub.identities();
        identities.extend(self.pull_presence.recent());
        identities.len()
    }

    /// Record a pull client as present.
    pub fn touch_pull(&self, identity: &str) {
        self.pull_presence.touch(identity);
    }

    /// Check a scoped credential, consuming it on success.
    ///
    /// # Errors
    /// Returns error if the credential is missing or wrong.
    pub fn authorize(&self, scope: Scope, presented: Option<&str>) -> Result<(), AuthorizationError> {
        self.guard.authorize(scope, presented).inspect_err(|e| {
            tracing::warn!(%scope, "authorization failed: {e}");
        })
    }

    /// Read and write secrets for ordinary clients.
    #[must_use]
    pub fn client_credentials(&self) -> ClientCredentials {
        self.guard.client_credentials()
    }

    /// Every scoped credential, for the administrative key only.
    ///
    /// # Errors
    /// Returns error if the admin key is missing or wrong.
    pub fn admin_credentials(&self, admin: Option<&str>) -> Result<Vec<Credential>, AuthorizationError> {
        self.admin.verify(admin)?;
        Ok(self.guard.snapshot())
    }

    /// Rotate one scope, or all of them, on administrative request.
    ///
    /// # Errors
    /// Returns error if the admin key is missing or wrong.
    pub fn admin_rotate(
        &self,
        admin: Option<&str>,
        scope: Option<Scope>,
    ) -> Result<Vec<Scope>, AuthorizationError> {
        self.admin.verify(admin)?;
        Ok(match scope {
            Some(scope) => {
                self.guard.rotate(scope, RotationReason::Manual);
                vec![scope]
            }
            None => {
                self.guard.rotate_all(RotationReason::Manual);
                Scope::ALL.to_vec()
            }
        })
    }

    /// Open a push session, queueing the current history as its catch-up.
    #[must_use]
    pub fn connect_push(&self, origin: Option<String>) -> PushSession {
        self.hub.register(origin, || self.store.catch_up())
    }

    /// Close a push session.
    pub fn disconnect_push(&self, session_id: SessionId) {
        self.hub.unregister(session_id);
    }

    /// Record a heartbeat acknowledgement.
    pub fn acknowledge(&self, session_id: SessionId) {
        self.hub.acknowledge(session_id);
    }

    /// Store an upload on behalf of a client holding the write credential.
    ///
    /// # Errors
    /// Returns error if the credential is wrong, the upload is empty or too
    /// large, or the object store fails.
    pub async fn upload(
        &self,
        presented: Option<&str>,
        data: Bytes,
        mime: &str,
    ) -> Result<StoredObject, GatewayError> {
        self.authorize(Scope::Write, presented)?;
        if data.is_empty() {
            return Err(ObjectError::Empty.into());
        }
        if data.len() > self.max_upload_bytes {
            return Err(ObjectError::TooLarge {
                size: data.len(),
                limit: self.max_upload_bytes,
            }
            .into());
        }
        let size = data.len();
        let stored = self.objects.put(data, mime).await?;
        tracing::info!(id = %stored.id, size, mime, "object stored");
        Ok(stored)
    }

    /// Fetch an uploaded object.
    ///
    /// # Errors
    /// Returns error if the object store fails.
    pub async fn object(&self, id: &str) -> Result<Option<Object>, GatewayError> {
        Ok(self.objects.get(id).await?)
    }
}
