//! LLM collaborator: embeddings, chat completion/streaming, query
//! enhancement, and metadata extraction, all behind one trait so the
//! orchestrator and indexer never depend on a concrete provider SDK.

use crate::config::LlmModel;
use crate::error::AppError;
use crate::model::CatalogMetadata;
use async_trait::async_trait;
use futures::stream::BoxStream;

#[derive(Clone, Debug)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant", content: content.into() }
    }
}

pub type ChatStream = BoxStream<'static, Result<String, AppError>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;

    async fn complete(
        &self,
        model: LlmModel,
        messages: &[ChatTurn],
        temperature: Option<f32>,
    ) -> Result<String, AppError>;

    async fn stream(
        &self,
        model: LlmModel,
        messages: &[ChatTurn],
        temperature: Option<f32>,
    ) -> Result<ChatStream, AppError>;

    /// Rewrite `message` into a self-contained query given prior turns.
    /// Falls back to the raw message on any upstream failure (§4.6 step 4).
    async fn enhance_message(&self, message: &str, history: &[ChatTurn]) -> Result<String, AppError>;

    /// Extract structured catalog metadata from a fetched page (§4.3).
    /// Returns `Ok(None)` on extraction failure; the caller treats a `None`
    /// as "index for retrieval, skip catalog routing," not as an error.
    async fn extract_metadata(&self, url: &str, text_content: &str) -> Result<Option<CatalogMetadata>, AppError>;
}

/// Best-effort query enhancement with the orchestrator's fallback policy
/// applied uniformly: any error from the underlying client degrades to the
/// original message rather than failing the turn.
pub async fn enhance_user_message(client: &dyn LlmClient, message: &str, history: &[ChatTurn]) -> String {
    match client.enhance_message(message, history).await {
        Ok(enhanced) if !enhanced.trim().is_empty() => enhanced,
        Ok(_) => message.to_string(),
        Err(err) => {
            tracing::warn!(error = %err, "query enhancement failed, falling back to raw message");
            message.to_string()
        }
    }
}
