//! Chat session / history helpers (§4.6 steps 2-3): thin wrappers over the
//! `Database` contract plus the message-row construction the orchestrator
//! needs after a turn completes.

use crate::config::MAX_HISTORY_LIMIT;
use crate::error::AppError;
use crate::model::{Agent, ChatMessage, ChatSession, MessageRole};
use crate::store::Database;
use chrono::{DateTime, Utc};

pub async fn load_or_create(db: &dyn Database, agent: &Agent, chat_session_id: &str) -> Result<ChatSession, AppError> {
    db.get_or_create_chat_session(&agent.agent_id, chat_session_id, agent.agent_name.as_deref(), &agent.agent_aliases).await
}

/// History of the *current conversation*, not the whole session, capped at
/// `MAX_HISTORY_LIMIT` regardless of what the caller requests.
pub async fn fetch_history(
    db: &dyn Database,
    agent_id: &str,
    chat_session_id: &str,
    conversation_id: &str,
    requested_limit: usize,
) -> Result<Vec<ChatMessage>, AppError> {
    let limit = requested_limit.min(MAX_HISTORY_LIMIT);
    db.fetch_conversation_messages(agent_id, chat_session_id, conversation_id, limit).await
}

pub async fn rotate(db: &dyn Database, agent_id: &str, chat_session_id: &str) -> Result<ChatSession, AppError> {
    db.rotate_conversation_id(agent_id, chat_session_id).await
}

#[allow(clippy::too_many_arguments)]
pub fn build_turn_messages(
    agent_id: &str,
    chat_session_id: &str,
    conversation_id: &str,
    user_message_id: &str,
    user_content: &str,
    enhanced_message: Option<String>,
    user_created_at: DateTime<Utc>,
    agent_message_id: &str,
    agent_content: &str,
    agent_created_at: DateTime<Utc>,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            agent_id: agent_id.to_string(),
            chat_session_id: chat_session_id.to_string(),
            conversation_id: conversation_id.to_string(),
            message_id: user_message_id.to_string(),
            role: MessageRole::User,
            content: user_content.to_string(),
            enhanced_message,
            created_at: user_created_at,
        },
        ChatMessage {
            agent_id: agent_id.to_string(),
            chat_session_id: chat_session_id.to_string(),
            conversation_id: conversation_id.to_string(),
            message_id: agent_message_id.to_string(),
            role: MessageRole::Agent,
            content: agent_content.to_string(),
            enhanced_message: None,
            created_at: agent_created_at,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDatabase;

    #[tokio::test]
    async fn rotating_a_session_without_prior_history_returns_not_found() {
        let db = InMemoryDatabase::new();
        let result = rotate(&db, "agent-1", "web-xyz").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn load_or_create_is_idempotent_on_conversation_id() {
        let db = InMemoryDatabase::new();
        let agent = Agent {
            agent_id: "agent-1".into(),
            owner: "owner-1".into(),
            agent_name: Some("Atlas".into()),
            agent_aliases: vec![],
            llm_model: None,
            temperature: None,
            system_prompt: None,
            welcome_message: None,
            agent_status: crate::model::AgentStatus::Active,
            agent_current_task: None,
        };
        let first = load_or_create(&db, &agent, "web-xyz").await.unwrap();
        let second = load_or_create(&db, &agent, "web-xyz").await.unwrap();
        assert_eq!(first.conversation_id, second.conversation_id);
    }
}
