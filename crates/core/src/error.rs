use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Stage output already recorded for stage: {0}")]
    StageOutputExists(String),

    #[error("Invalid session status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },
}
