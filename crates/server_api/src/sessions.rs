use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use shared::domain::{OwnerId, SessionId};
use tokio::{
    task::{JoinError, JoinHandle},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    pub owner: Option<OwnerId>,
    pub chaos_enabled: bool,
}

#[derive(Debug)]
struct SessionRecord {
    state: SessionState,
    /// Live transport connections using this session. Attached sessions are never evicted.
    attached: usize,
    last_seen: Instant,
}

impl SessionRecord {
    fn new() -> Self {
        Self {
            state: SessionState::default(),
            attached: 0,
            last_seen: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

/// In-memory session records. Unknown ids read as a logged-out session with chaos off.
///
/// Every read or write refreshes a session. Sessions idle for longer than the
/// configured TTL with no attached connection are dropped by [`SessionStore::evict_idle`].
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<SessionId, SessionRecord>>,
    idle_ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_idle_ttl(DEFAULT_IDLE_TTL)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            idle_ttl,
        }
    }

    pub fn create(&self) -> SessionId {
        let id = SessionId::generate();
        self.sessions.insert(id.clone(), SessionRecord::new());
        id
    }

    pub fn exists(&self, id: &SessionId) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut record) => {
                record.touch();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &SessionId) -> SessionState {
        self.sessions
            .get_mut(id)
            .map(|mut record| {
                record.touch();
                record.state
            })
            .unwrap_or_default()
    }

    pub fn owner(&self, id: &SessionId) -> Option<OwnerId> {
        self.get(id).owner
    }

    pub fn chaos_enabled(&self, id: &SessionId) -> bool {
        self.get(id).chaos_enabled
    }

    pub fn bind_owner(&self, id: &SessionId, owner: OwnerId) {
        let mut record = self
            .sessions
            .entry(id.clone())
            .or_insert_with(SessionRecord::new);
        record.touch();
        record.state.owner = Some(owner);
    }

    pub fn clear_owner(&self, id: &SessionId) {
        if let Some(mut record) = self.sessions.get_mut(id) {
            record.touch();
            record.state.owner = None;
        }
    }

    /// Flips the chaos flag and returns the new value. Unknown sessions start from `false`.
    pub fn toggle_chaos(&self, id: &SessionId) -> bool {
        let mut record = self
            .sessions
            .entry(id.clone())
            .or_insert_with(SessionRecord::new);
        record.touch();
        record.state.chaos_enabled = !record.state.chaos_enabled;
        let enabled = record.state.chaos_enabled;
        drop(record);
        info!(
            session_id = %id,
            chaos = if enabled { "on" } else { "off" },
            "chaos mode toggled"
        );
        enabled
    }

    /// Pins a session while a connection uses it. Unknown ids are ignored.
    pub fn attach(&self, id: &SessionId) {
        if let Some(mut record) = self.sessions.get_mut(id) {
            record.touch();
            record.attached += 1;
        }
    }

    pub fn detach(&self, id: &SessionId) {
        if let Some(mut record) = self.sessions.get_mut(id) {
            record.touch();
            record.attached = record.attached.saturating_sub(1);
        }
    }

    /// Drops unattached sessions idle for at least the TTL and returns how many went.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        self.sessions.retain(|id, record| {
            let keep =
                record.attached > 0 || now.duration_since(record.last_seen) < self.idle_ttl;
            if !keep {
                debug!(session_id = %id, "idle session evicted");
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Starts a task that calls [`SessionStore::evict_idle`] every `every` until shut down.
    pub fn spawn_sweeper(&self, every: Duration) -> SweeperHandle {
        let store = self.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(every) => {}
                }
                let evicted = store.evict_idle();
                if evicted > 0 {
                    info!(evicted, remaining = store.len(), "idle sessions evicted");
                }
            }
        });
        SweeperHandle { cancel, join }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

pub struct SweeperHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.cancel.cancel();
        self.join.await
    }
}

#[cfg(test)]
#[path = "tests/sessions_tests.rs"]
mod tests;
