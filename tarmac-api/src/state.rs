use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tarmac_core::{FlightService, Session};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

struct Entry {
    session: Arc<Mutex<Session>>,
    last_used: Instant,
}

/// Open client sessions. Each one is behind its own mutex so operations from the
/// same client run one at a time while different clients proceed in parallel.
///
/// Sessions unused for longer than the idle timeout are dropped on the next
/// `open` or `get`.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Entry>>>,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_IDLE)
    }
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout,
        }
    }

    pub async fn open(&self) -> Uuid {
        let id = Uuid::new_v4();
        let now = Instant::now();
        let mut sessions = self.inner.write().await;
        self.evict_idle(&mut sessions, now);
        sessions.insert(
            id,
            Entry {
                session: Arc::new(Mutex::new(Session::new())),
                last_used: now,
            },
        );
        id
    }

    pub async fn get(&self, id: &Uuid) -> Option<Arc<Mutex<Session>>> {
        let now = Instant::now();
        let mut sessions = self.inner.write().await;
        self.evict_idle(&mut sessions, now);
        let entry = sessions.get_mut(id)?;
        entry.last_used = now;
        Some(Arc::clone(&entry.session))
    }

    pub async fn close(&self, id: &Uuid) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    fn evict_idle(&self, sessions: &mut HashMap<Uuid, Entry>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_used) < self.idle_timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!("Evicted {} idle session(s)", evicted);
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: FlightService,
    pub sessions: SessionRegistry,
    /// Mounts `POST /v1/admin/clear`. Off unless the deployment opts in.
    pub enable_admin: bool,
}

impl AppState {
    pub fn new(service: FlightService) -> Self {
        Self {
            service,
            sessions: SessionRegistry::default(),
            enable_admin: false,
        }
    }

    pub fn with_sessions(mut self, sessions: SessionRegistry) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_admin(mut self, enabled: bool) -> Self {
        self.enable_admin = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_session_is_evicted() {
        let registry = SessionRegistry::new(Duration::from_millis(50));
        let stale = registry.open().await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let fresh = registry.open().await;
        assert!(registry.get(&stale).await.is_none());
        assert!(registry.get(&fresh).await.is_some());
        assert!(!registry.close(&stale).await);
    }

    #[tokio::test]
    async fn test_use_keeps_session_alive() {
        let registry = SessionRegistry::new(Duration::from_millis(200));
        let id = registry.open().await;
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(80)).await;
            assert!(registry.get(&id).await.is_some());
        }
    }
}
