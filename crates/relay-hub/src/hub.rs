//! Live push sessions and fanout.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, Instant},
};

use futures::future::join_all;
use relay_core::{CatchUp, Message, Notice};
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use uuid::Uuid;

/// Push session identifier.
pub type SessionId = Uuid;

/// Shortest heartbeat period accepted by [`BroadcastHub::spawn_heartbeat`].
pub const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

/// Item queued for delivery to a push session.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Initial state, always the first item of a session.
    CatchUp(CatchUp),
    /// A chat message and its absolute history index.
    Chat { message: Message, index: u64 },
    /// A system notice.
    Notice(Notice),
    /// Heartbeat ping.
    Ping,
}

/// Hub tuning.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Maximum time a fanout waits on one session's queue.
    pub send_timeout: Duration,
    /// Outbound queue length per session.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            queue_capacity: 256,
        }
    }
}

/// Receiving side of a registered session, owned by its connection task.
#[derive(Debug)]
pub struct PushSession {
    /// Session id.
    pub id: SessionId,
    /// Queue of items to write to the connection.
    pub outbound: mpsc::Receiver<Outbound>,
}

/// Public view of a tracked session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id.
    pub id: SessionId,
    /// Whether the last ping was acknowledged.
    pub alive: bool,
    /// Time of the last acknowledgement (or registration).
    pub last_heartbeat: Instant,
    /// Origin id of the client, once known.
    pub origin: Option<String>,
}

struct Entry {
    tx: mpsc::Sender<Outbound>,
    alive: bool,
    last_heartbeat: Instant,
    origin: Option<String>,
}

/// Tracks live push sessions and delivers accepted messages to them.
///
/// The hub is the only writer of session state. Session-set locks are never
/// held across an await; fanouts are serialized so every session observes
/// messages in acceptance order.
pub struct BroadcastHub {
    sessions: RwLock<HashMap<SessionId, Entry>>,
    fanout_order: tokio::sync::Mutex<()>,
    config: HubConfig,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            fanout_order: tokio::sync::Mutex::new(()),
            config,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Entry>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Entry>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new session and queue its catch-up.
    ///
    /// `catch_up` runs while the session set is locked for writing, so a
    /// concurrent fanout either lands in the snapshot or is delivered live.
    pub fn register(
        &self,
        origin: Option<String>,
        catch_up: impl FnOnce() -> CatchUp,
    ) -> PushSession {
        let id = Uuid::new_v4();
        let (tx, outbound) = mpsc::channel(self.config.queue_capacity.max(1));

        let mut sessions = self.write();
        // Fresh queue with capacity >= 1, cannot be full.
        let _ = tx.try_send(Outbound::CatchUp(catch_up()));
        sessions.insert(
            id,
            Entry {
                tx,
                alive: true,
                last_heartbeat: Instant::now(),
                origin,
            },
        );
        let live = sessions.len();
        drop(sessions);

        tracing::info!(session_id = %id, live, "push session registered");
        PushSession { id, outbound }
    }

    /// Stop tracking a session. Safe to call more than once.
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self.write().remove(&id).is_some();
        if removed {
            tracing::info!(session_id = %id, "push session unregistered");
        }
        removed
    }

    /// Record the origin id a session publishes under.
    pub fn identify(&self, id: SessionId, origin: &str) {
        if let Some(entry) = self.write().get_mut(&id) {
            if entry.origin.as_deref() != Some(origin) {
                entry.origin = Some(origin.to_owned());
            }
        }
    }

    /// Record a heartbeat acknowledgement.
    pub fn acknowledge(&self, id: SessionId) {
        if let Some(entry) = self.write().get_mut(&id) {
            entry.alive = true;
            entry.last_heartbeat = Instant::now();
        }
    }

    /// Deliver `event` to every session except `exclude`.
    ///
    /// Returns the number of sessions the event was queued for.
    pub async fn fanout(&self, event: Outbound, exclude: Option<SessionId>) -> usize {
        self.fanout_with(|| ((), event), exclude).await.1
    }

    /// Run `mutate` against a stable view of the session set, then deliver
    /// the event it returns.
    ///
    /// Sends are bounded by the configured timeout; sessions that time out or
    /// have gone away are unregistered.
    pub async fn fanout_with<T>(
        &self,
        mutate: impl FnOnce() -> (T, Outbound),
        exclude: Option<SessionId>,
    ) -> (T, usize) {
        let _order = self.fanout_order.lock().await;

        let (result, event, targets) = {
            let sessions = self.read();
            let (result, event) = mutate();
            let targets: Vec<(SessionId, mpsc::Sender<Outbound>)> = sessions
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(id, entry)| (*id, entry.tx.clone()))
                .collect();
            (result, event, targets)
        };

        let timeout = self.config.send_timeout;
        let outcomes = join_all(targets.into_iter().map(|(id, tx)| {
            let event = event.clone();
            async move {
                let delivered = matches!(tokio::time::timeout(timeout, tx.send(event)).await, Ok(Ok(())));
                (id, delivered)
            }
        }))
        .await;

        let mut delivered = 0;
        for (id, ok) in outcomes {
            if ok {
                delivered += 1;
            } else {
                tracing::warn!(session_id = %id, "dropping stalled push session");
                self.unregister(id);
            }
        }
        (result, delivered)
    }

    /// One heartbeat round.
    ///
    /// Sessions that did not acknowledge the previous ping are unregistered;
    /// the rest are pinged. Returns the removed session ids.
    pub fn heartbeat_tick(&self) -> Vec<SessionId> {
        let mut sessions = self.write();

        let dead: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, entry)| !entry.alive || entry.tx.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            sessions.remove(id);
        }

        for (id, entry) in sessions.iter_mut() {
            entry.alive = false;
            if entry.tx.try_send(Outbound::Ping).is_err() {
                tracing::debug!(session_id = %id, "ping not queued");
            }
        }
        drop(sessions);

        for id in &dead {
            tracing::info!(session_id = %id, "push session missed heartbeat");
        }
        dead
    }

    /// Ping sessions on a fixed interval until the handle is aborted.
    ///
    /// Intervals below [`MIN_HEARTBEAT`] are raised to it.
    pub fn spawn_heartbeat(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(MIN_HEARTBEAT);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.heartbeat_tick();
            }
        })
    }

    /// Number of tracked sessions.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.read().len()
    }

    /// Identity of each session: its origin id, or the session id if unknown.
    #[must_use]
    pub fn identities(&self) -> HashSet<String> {
        self.read()
            .iter()
            .map(|(id, entry)| entry.origin.clone().unwrap_or_else(|| id.to_string()))
            .collect()
    }

    /// Snapshot of tracked sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.read()
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                alive: entry.alive,
                last_heartbeat: entry.last_heartbeat,
                origin: entry.origin.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use relay_core::HistoryPage;

    use super::*;

    fn chat(body: &str, index: u64) -> Outbound {
        Outbound::Chat {
            message: Message::new("alice", body, None).unwrap(),
            index,
        }
    }

    fn register(hub: &BroadcastHub) -> PushSession {
        hub.register(None, CatchUp::default)
    }

    #[tokio::test]
    async fn test_register_sends_catch_up_first() {
        let hub = BroadcastHub::default();
        let page = HistoryPage {
            offset: 0,
            epoch: 0,
            messages: vec![Message::new("bob", "earlier", None).unwrap()],
        };
        let expected = CatchUp {
            page: page.clone(),
            notice: None,
        };
        let mut session = hub.register(None, || CatchUp { page, notice: None });

        assert_eq!(session.outbound.recv().await, Some(Outbound::CatchUp(expected)));
        assert_eq!(hub.live_count(), 1);
    }

    #[tokio::test]
    async fn test_fanout_excludes_origin() {
        let hub = BroadcastHub::default();
        let mut a = register(&hub);
        let mut b = register(&hub);
        a.outbound.recv().await;
        b.outbound.recv().await;

        let delivered = hub.fanout(chat("hi", 0), Some(a.id)).await;
        assert_eq!(delivered, 1);
        assert_eq!(b.outbound.recv().await, Some(chat("hi", 0)));
        assert!(a.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_twice_is_safe() {
        let hub = BroadcastHub::default();
        let a = register(&hub);
        let mut b = register(&hub);
        b.outbound.recv().await;

        assert!(hub.unregister(a.id));
        assert!(!hub.unregister(a.id));

        assert_eq!(hub.fanout(chat("still here", 0), None).await, 1);
        assert_eq!(b.outbound.recv().await, Some(chat("still here", 0)));
    }

    #[tokio::test]
    async fn test_stalled_session_is_dropped() {
        let hub = BroadcastHub::new(HubConfig {
            send_timeout: Duration::from_millis(20),
            queue_capacity: 1,
        });
        // Never drained: the catch-up fills its only slot.
        let stalled = register(&hub);
        let mut healthy = register(&hub);
        healthy.outbound.recv().await;

        let delivered = hub.fanout(chat("x", 0), None).await;
        assert_eq!(delivered, 1);
        assert_eq!(healthy.outbound.recv().await, Some(chat("x", 0)));
        assert_eq!(hub.live_count(), 1);
        assert!(!hub.unregister(stalled.id));
    }

    #[tokio::test]
    async fn test_closed_session_is_dropped_on_fanout() {
        let hub = BroadcastHub::default();
        let gone = register(&hub);
        drop(gone.outbound);

        assert_eq!(hub.fanout(chat("x", 0), None).await, 0);
        assert_eq!(hub.live_count(), 0);
    }

    #[tokio::test]
    async fn test_fanout_with_runs_mutation() {
        let hub = BroadcastHub::default();
        let mut a = register(&hub);
        a.outbound.recv().await;

        let (index, delivered) = hub.fanout_with(|| (7, chat("m", 7)), None).await;
        assert_eq!((index, delivered), (7, 1));
        assert_eq!(a.outbound.recv().await, Some(chat("m", 7)));
    }

    #[tokio::test]
    async fn test_heartbeat_drops_unacknowledged() {
        let hub = BroadcastHub::default();
        let mut quiet = register(&hub);
        let mut chatty = register(&hub);
        quiet.outbound.recv().await;
        chatty.outbound.recv().await;

        assert!(hub.heartbeat_tick().is_empty());
        assert_eq!(quiet.outbound.recv().await, Some(Outbound::Ping));
        assert_eq!(chatty.outbound.recv().await, Some(Outbound::Ping));

        hub.acknowledge(chatty.id);
        assert_eq!(hub.heartbeat_tick(), vec![quiet.id]);
        assert_eq!(hub.live_count(), 1);
        assert!(hub.sessions().iter().all(|s| s.id == chatty.id));
    }

    #[tokio::test]
    async fn test_identities_prefer_origin() {
        let hub = BroadcastHub::default();
        let a = hub.register(Some("user_a".into()), CatchUp::default);
        let b = register(&hub);
        hub.identify(b.id, "user_b");
        hub.identify(a.id, "user_a");

        let ids = hub.identities();
        assert!(ids.contains("user_a"));
        assert!(ids.contains("user_b"));
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_spawned_heartbeat_can_be_aborted() {
        let hub = Arc::new(BroadcastHub::default());
        let handle = Arc::clone(&hub).spawn_heartbeat(Duration::from_millis(5));
        handle.abort();
        let err = handle.await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(hub.live_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_heartbeat_interval_is_clamped() {
        let hub = Arc::new(BroadcastHub::default());
        let mut session = register(&hub);
        session.outbound.recv().await;

        let handle = Arc::clone(&hub).spawn_heartbeat(Duration::ZERO);
        tokio::time::sleep(MIN_HEARTBEAT * 3 + MIN_HEARTBEAT / 2).await;

        assert!(!handle.is_finished());
        assert_eq!(session.outbound.recv().await, Some(Outbound::Ping));
        assert_eq!(hub.live_count(), 0);
        handle.abort();
    }
}
