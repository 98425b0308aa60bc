//! Session orchestration for the analysis service.
//!
//! Owns the pipeline state machine, the live-session registry with its
//! three lookup tiers, and the facade the API server talks to. The
//! parser, cache, store and stages are collaborators injected at
//! construction.

mod error;
mod orchestrator;
mod pipeline;
mod registry;

pub use error::{OrchestratorError, Result};
pub use orchestrator::{AnalyzeRequest, Orchestrator, OrchestratorConfig};
pub use pipeline::{PipelineRunner, PipelineState, PARSING_STAGE};
pub use registry::{SessionLookup, SessionRegistry, SharedSession};
