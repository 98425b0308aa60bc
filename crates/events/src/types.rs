//! Event types published by the session pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// All possible events in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An analysis session was registered and its pipeline launched
    #[serde(rename = "session.started")]
    SessionStarted {
        session_id: Uuid,
        subject_id: i64,
        file_count: usize,
    },

    /// A pipeline stage began running
    #[serde(rename = "stage.started")]
    StageStarted { session_id: Uuid, stage: String },

    /// A pipeline stage reached a terminal progress marker
    #[serde(rename = "stage.completed")]
    StageCompleted {
        session_id: Uuid,
        stage: String,
        status: String,
    },

    /// Session finished and its final record was persisted
    #[serde(rename = "session.ended")]
    SessionEnded {
        session_id: Uuid,
        subject_id: i64,
        success: bool,
    },

    /// Generic error event
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Get the session ID associated with this event, if any
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            Event::SessionStarted { session_id, .. } => Some(*session_id),
            Event::StageStarted { session_id, .. } => Some(*session_id),
            Event::StageCompleted { session_id, .. } => Some(*session_id),
            Event::SessionEnded { session_id, .. } => Some(*session_id),
            Event::Error { .. } => None,
        }
    }
}
