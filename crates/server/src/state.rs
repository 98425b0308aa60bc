use std::sync::Arc;

use cache::SessionCache;
use db::SessionRepository;
use events::EventBus;
use orchestrator::Orchestrator;

/// Shared handles behind every request handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: SessionRepository,
    pub cache: Arc<dyn SessionCache>,
    pub event_bus: EventBus,
}
