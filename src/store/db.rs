//! Database contract (§6): named collections with per-agent scoping,
//! compound cursor pagination, and the chat session / message operations
//! the orchestrator depends on.

use crate::error::AppError;
use crate::model::{Agent, AgentStatus, ChatMessage, ChatSession, KnowledgeSource, MessageRole};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use uuid::Uuid;

/// An opaque pagination cursor. Implementations encode `(updated_at, _id)`
/// so that pagination remains stable even when `updated_at` collides.
#[derive(Clone, Debug, Default)]
pub struct Cursor(pub Option<String>);

#[async_trait]
pub trait Database: Send + Sync {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, AppError>;
    async fn upsert_agent(&self, agent: Agent) -> Result<(), AppError>;
    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), AppError>;

    async fn upsert_knowledge_source(&self, source: KnowledgeSource) -> Result<(), AppError>;
    async fn list_knowledge_sources(
        &self,
        agent_id: &str,
        knowledge_type: crate::model::KnowledgeType,
        cursor: Cursor,
        limit: usize,
    ) -> Result<(Vec<KnowledgeSource>, Cursor), AppError>;

    /// Delete all rows (agent, knowledge sources, sessions, messages) owned
    /// by `agent_id`. Returns counts for observability; never partial — the
    /// in-memory store applies this atomically, a real Mongo-backed store
    /// would do so per-collection with accumulated errors per §7.
    async fn delete_agent_cascade(&self, agent_id: &str) -> Result<(), AppError>;

    /// Remove the knowledge-source rows for `sources` of the given type.
    /// Callers also filter-delete the corresponding vector points.
    async fn delete_knowledge_sources(
        &self,
        agent_id: &str,
        knowledge_type: crate::model::KnowledgeType,
        sources: &[String],
    ) -> Result<(), AppError>;

    /// Load the session identified by `(agent_id, chat_session_id)`, or
    /// create it if absent, assigning a fresh `conversation_id` and deriving
    /// the display name / channel per §4.6 step 2.
    async fn get_or_create_chat_session(
        &self,
        agent_id: &str,
        chat_session_id: &str,
        agent_name: Option<&str>,
        agent_aliases: &[String],
    ) -> Result<ChatSession, AppError>;

    async fn rotate_conversation_id(&self, agent_id: &str, chat_session_id: &str) -> Result<ChatSession, AppError>;

    /// Messages for the given conversation only, ascending by `created_at`,
    /// capped at `limit`.
    async fn fetch_conversation_messages(
        &self,
        agent_id: &str,
        chat_session_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, AppError>;

    async fn insert_messages(&self, messages: Vec<ChatMessage>) -> Result<(), AppError>;
}

/// In-process database used by tests and local development.
#[derive(Default)]
pub struct InMemoryDatabase {
    agents: DashMap<String, Agent>,
    sources: DashMap<(String, String, String), KnowledgeSource>,
    sessions: DashMap<(String, String), ChatSession>,
    messages: DashMap<String, Vec<ChatMessage>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn messages_key(agent_id: &str, chat_session_id: &str) -> String {
        format!("{agent_id}:{chat_session_id}")
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, AppError> {
        Ok(self.agents.get(agent_id).map(|a| a.clone()))
    }

    async fn upsert_agent(&self, agent: Agent) -> Result<(), AppError> {
        self.agents.insert(agent.agent_id.clone(), agent);
        Ok(())
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), AppError> {
        if let Some(mut a) = self.agents.get_mut(agent_id) {
            a.agent_status = status;
            Ok(())
        } else {
            Err(AppError::NotFound(format!("agent {agent_id} not found")))
        }
    }

    async fn upsert_knowledge_source(&self, source: KnowledgeSource) -> Result<(), AppError> {
        let key = (
            source.agent_id.clone(),
            source.knowledge_type.as_str().to_string(),
            source.knowledge_source.clone(),
        );
        self.sources.insert(key, source);
        Ok(())
    }

    async fn list_knowledge_sources(
        &self,
        agent_id: &str,
        knowledge_type: crate::model::KnowledgeType,
        cursor: Cursor,
        limit: usize,
    ) -> Result<(Vec<KnowledgeSource>, Cursor), AppError> {
        let resume = cursor.0.as_deref().map(decode_cursor).transpose()?;

        let mut rows: Vec<KnowledgeSource> = self
            .sources
            .iter()
            .filter(|e| e.key().0 == agent_id && e.value().knowledge_type == knowledge_type)
            .map(|e| e.value().clone())
            .collect();
        // (updated_at desc, knowledge_source desc) is the stable pagination key.
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.knowledge_source.cmp(&a.knowledge_source)));

        if let Some((after_updated_at, after_source)) = &resume {
            rows.retain(|r| match r.updated_at.cmp(after_updated_at) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal => r.knowledge_source.as_str() < after_source.as_str(),
                std::cmp::Ordering::Greater => false,
            });
        }

        rows.truncate(limit);
        let next = if rows.len() == limit {
            rows.last().map(|r| Cursor(Some(encode_cursor(r.updated_at, &r.knowledge_source)))).unwrap_or_default()
        } else {
            Cursor(None)
        };
        Ok((rows, next))
    }

    async fn delete_agent_cascade(&self, agent_id: &str) -> Result<(), AppError> {
        self.agents.remove(agent_id);
        self.sources.retain(|k, _| k.0 != agent_id);
        self.sessions.retain(|k, _| k.0 != agent_id);
        self.messages.retain(|k, _| !k.starts_with(&format!("{agent_id}:")));
        Ok(())
    }

    async fn delete_knowledge_sources(
        &self,
        agent_id: &str,
        knowledge_type: crate::model::KnowledgeType,
        sources: &[String],
    ) -> Result<(), AppError> {
        for source in sources {
            let key = (agent_id.to_string(), knowledge_type.as_str().to_string(), source.clone());
            self.sources.remove(&key);
        }
        Ok(())
    }

    async fn get_or_create_chat_session(
        &self,
        agent_id: &str,
        chat_session_id: &str,
        agent_name: Option<&str>,
        agent_aliases: &[String],
    ) -> Result<ChatSession, AppError> {
        let key = (agent_id.to_string(), chat_session_id.to_string());
        if let Some(existing) = self.sessions.get(&key) {
            return Ok(existing.clone());
        }

        let display_name = agent_aliases
            .choose(&mut rand::thread_rng())
            .cloned()
            .or_else(|| agent_name.map(|s| s.to_string()));

        let now = chrono::Utc::now();
        let session = ChatSession {
            agent_id: agent_id.to_string(),
            chat_session_id: chat_session_id.to_string(),
            conversation_id: Uuid::new_v4().to_string(),
            agent_name: display_name,
            channel: crate::model::channel_from_session_id(chat_session_id),
            visitor_online: false,
            created_at: now,
            last_message_at: now,
        };
        self.sessions.insert(key, session.clone());
        Ok(session)
    }

    async fn rotate_conversation_id(&self, agent_id: &str, chat_session_id: &str) -> Result<ChatSession, AppError> {
        let key = (agent_id.to_string(), chat_session_id.to_string());
        let mut entry = self
            .sessions
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound(format!("no chat session {chat_session_id} for agent {agent_id}")))?;
        entry.conversation_id = Uuid::new_v4().to_string();
        Ok(entry.clone())
    }

    async fn fetch_conversation_messages(
        &self,
        agent_id: &str,
        chat_session_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let key = Self::messages_key(agent_id, chat_session_id);
        let mut msgs: Vec<ChatMessage> = self
            .messages
            .get(&key)
            .map(|v| v.iter().filter(|m| m.conversation_id == conversation_id).cloned().collect())
            .unwrap_or_default();
        msgs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if msgs.len() > limit {
            let start = msgs.len() - limit;
            msgs = msgs.split_off(start);
        }
        Ok(msgs)
    }

    async fn insert_messages(&self, messages: Vec<ChatMessage>) -> Result<(), AppError> {
        for msg in messages {
            let key = Self::messages_key(&msg.agent_id, &msg.chat_session_id);
            self.messages.entry(key).or_default().push(msg);
        }
        Ok(())
    }
}

/// Encode a `(updated_at, knowledge_source)` resume point as an opaque token.
fn encode_cursor(updated_at: chrono::DateTime<chrono::Utc>, knowledge_source: &str) -> String {
    format!("{}|{}", updated_at.to_rfc3339(), knowledge_source)
}

fn decode_cursor(token: &str) -> Result<(chrono::DateTime<chrono::Utc>, String), AppError> {
    let (ts, source) = token.split_once('|').ok_or_else(|| AppError::Validation("malformed pagination cursor".into()))?;
    let updated_at = chrono::DateTime::parse_from_rfc3339(ts)
        .map_err(|e| AppError::Validation(format!("malformed pagination cursor: {e}")))?
        .with_timezone(&chrono::Utc);
    Ok((updated_at, source.to_string()))
}

pub fn remap_role_for_llm(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Agent => "assistant",
    }
}
