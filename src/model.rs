//! Core data model (§3). These types are the shared currency between the
//! ingestion pipeline, the retrieval engine, and the chat orchestrator; they
//! carry no storage-specific concerns (those live behind the `store` traits).

use serde::{Deserialize, Serialize};

pub type AgentId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Indexing,
    Updating,
    Inactive,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub owner: String,
    pub agent_name: Option<String>,
    pub agent_aliases: Vec<String>,
    pub llm_model: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub welcome_message: Option<String>,
    pub agent_status: AgentStatus,
    pub agent_current_task: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    Url,
    File,
    CustomText,
    CustomQa,
}

impl KnowledgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            KnowledgeType::Url => "url",
            KnowledgeType::File => "file",
            KnowledgeType::CustomText => "custom_text",
            KnowledgeType::CustomQa => "custom_qa",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Indexing,
    Indexed,
    Active,
    Failed,
}

/// A logical, per-agent unit of indexed content. `(agent_id, knowledge_type,
/// knowledge_source)` is unique; re-indexing atomically replaces all prior
/// points for that tuple.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub agent_id: AgentId,
    pub knowledge_type: KnowledgeType,
    pub knowledge_source: String,
    pub status: SourceStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Structured catalog metadata produced by the Metadata Extractor (§4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub page_type: PageType,
    pub summary: String,
    pub url: String,
    pub product_name: Option<String>,
    pub product_id: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub is_available: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Product,
    Content,
}

/// The per-source card returned by the Retrieval Engine (§4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceCard {
    pub knowledge_source: String,
    pub knowledge_type: Option<KnowledgeType>,
    pub page_type: Option<PageType>,
    pub summary: Option<String>,
    pub product_name: Option<String>,
    pub product_id: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub is_available: Option<bool>,
    pub score: f32,
    pub text_content: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatSession {
    pub agent_id: AgentId,
    pub chat_session_id: String,
    pub conversation_id: String,
    pub agent_name: Option<String>,
    pub channel: String,
    pub visitor_online: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_message_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub agent_id: AgentId,
    pub chat_session_id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub role: MessageRole,
    pub content: String,
    pub enhanced_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Derive the channel tag from a chat session id: the prefix before the
/// first `-`, or `"un"` if there is none.
pub fn channel_from_session_id(chat_session_id: &str) -> String {
    match chat_session_id.split_once('-') {
        Some((prefix, _)) if !prefix.is_empty() => prefix.to_string(),
        _ => "un".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_defaults_to_un_without_hyphen() {
        assert_eq!(channel_from_session_id("nohyphenhere"), "un");
        assert_eq!(channel_from_session_id(""), "un");
    }

    #[test]
    fn channel_is_prefix_before_first_hyphen() {
        assert_eq!(channel_from_session_id("web-abc123"), "web");
        assert_eq!(channel_from_session_id("wa-session-with-dashes"), "wa");
    }
}
