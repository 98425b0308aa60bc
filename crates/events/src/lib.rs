//! Event system for the analysis service.
//!
//! This crate provides the event bus and event types used for
//! observability: pipeline progress is published here and streamed out
//! by the API server.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
