//! Shared key/value cache collaborator.
//!
//! Used exclusively for cross-process session visibility, keyed as
//! `session:<id>`. The cache's own engine is replaceable; the in-memory
//! implementation here satisfies the same narrow contract.

mod error;
mod memory;

pub use error::CacheError;
pub use memory::MemoryCache;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

/// Cache key for a session record.
pub fn session_key(id: Uuid) -> String {
    format!("session:{id}")
}

/// Narrow interface the orchestrator needs from the shared cache.
///
/// Implementations are safe for concurrent use by many sessions; no
/// additional locking happens at the orchestrator level.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Reachability probe for health reporting.
    async fn ping(&self) -> Result<(), CacheError>;
}
