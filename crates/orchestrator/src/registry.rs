//! Three-tier session lookup.
//!
//! Status queries are answered by the first tier that knows the
//! session: the in-process map of live sessions, then the shared
//! cache, then the durable store. Tier order is fixed. A tier fault
//! degrades to the next tier instead of failing the query.

use std::collections::HashMap;
use std::sync::Arc;

use agentflow_core::{Session, SessionView, ViewSource};
use async_trait::async_trait;
use cache::{session_key, SessionCache};
use db::{SessionRepository, StageOutputRepository};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Shared handle to a live session. The pipeline driver is the only
/// writer; lookups take read access.
pub type SharedSession = Arc<RwLock<Session>>;

/// One tier able to answer a session status query.
#[async_trait]
pub trait SessionLookup: Send + Sync {
    /// Tier name, for logs.
    fn tier(&self) -> &'static str;

    async fn find(&self, id: Uuid) -> Option<SessionView>;
}

struct MemoryTier {
    active: Arc<RwLock<HashMap<Uuid, SharedSession>>>,
}

#[async_trait]
impl SessionLookup for MemoryTier {
    fn tier(&self) -> &'static str {
        "memory"
    }

    async fn find(&self, id: Uuid) -> Option<SessionView> {
        let handle = { self.active.read().await.get(&id).cloned() }?;
        let session = handle.read().await;
        Some(SessionView::from_session(&session, ViewSource::Memory))
    }
}

struct CacheTier {
    cache: Arc<dyn SessionCache>,
}

#[async_trait]
impl SessionLookup for CacheTier {
    fn tier(&self) -> &'static str {
        "cache"
    }

    async fn find(&self, id: Uuid) -> Option<SessionView> {
        let value = match self.cache.get(&session_key(id)).await {
            Ok(value) => value?,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Cache tier unavailable, falling through");
                return None;
            }
        };

        match serde_json::from_value::<Session>(value) {
            Ok(session) => Some(SessionView::from_session(&session, ViewSource::Cache)),
            Err(e) => {
                warn!(session_id = %id, error = %e, "Discarding malformed cached session");
                None
            }
        }
    }
}

struct StoreTier {
    sessions: SessionRepository,
    outputs: StageOutputRepository,
}

#[async_trait]
impl SessionLookup for StoreTier {
    fn tier(&self) -> &'static str {
        "store"
    }

    async fn find(&self, id: Uuid) -> Option<SessionView> {
        let record = match self.sessions.get_session(id).await {
            Ok(record) => record?,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Store tier lookup failed");
                return None;
            }
        };

        let results = if record.status.is_terminal() {
            match self.outputs.get_results(id).await {
                Ok(results) => Some(results),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Could not load stored stage outputs");
                    None
                }
            }
        } else {
            None
        };

        Some(SessionView {
            session_id: record.id,
            status: record.status,
            source: ViewSource::Store,
            last_stage: None,
            progress: record.progress,
            errors: record.errors.iter().map(|e| e.to_string()).collect(),
            results,
        })
    }
}

/// Owns the live-session map and the prioritized lookup chain.
pub struct SessionRegistry {
    active: Arc<RwLock<HashMap<Uuid, SharedSession>>>,
    cache: Arc<dyn SessionCache>,
    tiers: Vec<Arc<dyn SessionLookup>>,
}

impl SessionRegistry {
    pub fn new(
        cache: Arc<dyn SessionCache>,
        sessions: SessionRepository,
        outputs: StageOutputRepository,
    ) -> Self {
        let active: Arc<RwLock<HashMap<Uuid, SharedSession>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let tiers: Vec<Arc<dyn SessionLookup>> = vec![
            Arc::new(MemoryTier {
                active: active.clone(),
            }),
            Arc::new(CacheTier {
                cache: cache.clone(),
            }),
            Arc::new(StoreTier { sessions, outputs }),
        ];
        Self {
            active,
            cache,
            tiers,
        }
    }

    /// Admit a new live session. Rejects an id that is already live in
    /// this process; replays of retired ids are not its concern.
    pub async fn register(&self, session: Session) -> Result<SharedSession> {
        let id = session.id;
        let mut active = self.active.write().await;
        if active.contains_key(&id) {
            return Err(OrchestratorError::DuplicateSession(id));
        }
        let handle = Arc::new(RwLock::new(session));
        active.insert(id, handle.clone());
        Ok(handle)
    }

    /// Answer a status query from the first tier that knows the id.
    pub async fn lookup(&self, id: Uuid) -> Option<SessionView> {
        for tier in &self.tiers {
            if let Some(view) = tier.find(id).await {
                debug!(session_id = %id, tier = tier.tier(), "Session lookup hit");
                return Some(view);
            }
        }
        None
    }

    /// Drop the live entry and evict the cache copy. The durable record
    /// stays; later lookups are served from the store tier.
    pub async fn retire(&self, id: Uuid) {
        self.active.write().await.remove(&id);
        if let Err(e) = self.cache.delete(&session_key(id)).await {
            warn!(session_id = %id, error = %e, "Could not evict session from cache");
        }
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }
}
