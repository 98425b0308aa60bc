//! Generative-text collaborator used by the analysis stages.
//!
//! The [`CompletionClient`] trait is the seam: stages depend on it, the
//! OpenRouter-compatible HTTP client implements it, and tests substitute
//! a canned client.

mod client;
mod types;

pub use client::OpenRouterClient;
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Completion API error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited by completion API")]
    RateLimited { retry_after: Option<u64> },
}

/// Chat-completion round trip against a generative text service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<String, CompletionError>;
}
