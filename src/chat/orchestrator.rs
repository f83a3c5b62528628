//! Chat Orchestrator (§4.6): resolve session + history, enhance the query,
//! retrieve, assemble the prompt, invoke the LLM, stream or return the
//! reply, and persist the turn without delaying the caller.

use crate::chat::session;
use crate::config::{self, DEFAULT_HISTORY_LIMIT, ModelMode};
use crate::error::AppError;
use crate::llm::{ChatStream, ChatTurn, LlmClient, enhance_user_message};
use crate::model::{Agent, ChatMessage, SourceCard};
use crate::retrieval::search_and_merge;
use crate::store::{Database, VectorStore, remap_role_for_llm};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct ChatDeps {
    pub vectors: Arc<dyn VectorStore>,
    pub db: Arc<dyn Database>,
    pub llm: Arc<dyn LlmClient>,
}

pub enum ChatReply {
    Complete { response_text: String, message_id: String, created_at: DateTime<Utc> },
    Streaming(ChatStream),
}

/// Format retrieved source cards into the single Knowledge-Base block the
/// prompt carries: one metadata line of truthy-only fields, a blank line,
/// then `text_content` if present; cards joined by `"\n\n###\n\n"`.
pub fn format_knowledge_base_string(cards: &[SourceCard]) -> String {
    cards
        .iter()
        .map(|card| {
            let mut parts = Vec::new();
            if card.page_type.is_some() {
                parts.push(card.knowledge_source.clone());
            }
            if let Some(s) = &card.summary {
                parts.push(s.clone());
            }
            if let Some(s) = &card.product_name {
                parts.push(s.clone());
            }
            if let Some(s) = &card.product_id {
                parts.push(s.clone());
            }
            if let Some(s) = &card.category {
                parts.push(s.clone());
            }
            if let Some(p) = card.price {
                parts.push(format!("price: {p}"));
            }
            if let Some(c) = &card.currency {
                parts.push(c.clone());
            }
            if let Some(a) = card.is_available {
                parts.push(format!("is_available: {a}"));
            }
            let metadata_line = parts.join(" ");
            match &card.text_content {
                Some(text) if !text.is_empty() => format!("{metadata_line}\n\n{text}"),
                _ => metadata_line,
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n###\n\n")
}

/// Assemble the LLM message list: instructional system message (with an
/// identity line if the agent has a name), the agent's own `system_prompt`
/// if any, the Knowledge-Base block wrapped as a user turn if non-empty,
/// the remapped history, and finally the (enhanced) query.
pub fn build_messages_list(agent: &Agent, history: &[ChatMessage], kb_string: &str, query: &str) -> Vec<ChatTurn> {
    let mut messages = Vec::with_capacity(history.len() + 3);

    let mut system = String::new();
    if let Some(name) = &agent.agent_name {
        system.push_str(&format!("You are a virtual assistant named **{name}**.\n\n"));
    }
    system.push_str(
        "Answer using only the knowledge base provided in this conversation. Never invent facts that are \
         not present in it; if the knowledge base does not cover the question, say so plainly rather than \
         guessing. Keep replies concise and use markdown where it improves readability.",
    );
    messages.push(ChatTurn::system(system));

    if let Some(prompt) = &agent.system_prompt {
        messages.push(ChatTurn::system(prompt.clone()));
    }

    if !kb_string.trim().is_empty() {
        messages.push(ChatTurn::user(format!("Knowledge base:\n\n{kb_string}")));
    }

    for msg in history {
        messages.push(ChatTurn { role: remap_role_for_llm(msg.role), content: msg.content.clone() });
    }

    messages.push(ChatTurn::user(query.to_string()));
    messages
}

pub async fn handle_turn(
    deps: ChatDeps,
    agent: Agent,
    chat_session_id: String,
    message: String,
    stream: bool,
) -> Result<ChatReply, AppError> {
    let user_message_id = Uuid::new_v4().to_string();
    let agent_message_id = Uuid::new_v4().to_string();
    let user_created_at = Utc::now();

    let chat_session = session::load_or_create(deps.db.as_ref(), &agent, &chat_session_id).await?;

    let history = session::fetch_history(
        deps.db.as_ref(),
        &agent.agent_id,
        &chat_session_id,
        &chat_session.conversation_id,
        DEFAULT_HISTORY_LIMIT,
    )
    .await?;

    let history_turns: Vec<ChatTurn> =
        history.iter().map(|m| ChatTurn { role: remap_role_for_llm(m.role), content: m.content.clone() }).collect();
    let enhanced = enhance_user_message(deps.llm.as_ref(), &message, &history_turns).await;

    let cards = search_and_merge(deps.vectors.as_ref(), deps.llm.as_ref(), &agent.agent_id, &enhanced).await?;
    let kb_string = format_knowledge_base_string(&cards);
    let messages = build_messages_list(&agent, &history, &kb_string, &enhanced);

    let model = config::LlmModel::resolve(agent.llm_model.as_deref().unwrap_or(config::DEFAULT_MODEL.name()));
    let temperature = match model.mode() {
        ModelMode::NonReasoning => agent.temperature,
        ModelMode::Reasoning => None,
    };

    if stream {
        let inner = deps.llm.stream(model, &messages, temperature).await?;
        let reply = spawn_streaming_turn(
            deps,
            agent.agent_id,
            chat_session_id,
            chat_session.conversation_id,
            user_message_id,
            message,
            Some(enhanced),
            user_created_at,
            agent_message_id,
            inner,
        );
        Ok(ChatReply::Streaming(reply))
    } else {
        let response_text = deps.llm.complete(model, &messages, temperature).await?;
        let agent_created_at = Utc::now();
        spawn_persistence(
            deps,
            agent.agent_id,
            chat_session_id,
            chat_session.conversation_id,
            user_message_id.clone(),
            message,
            Some(enhanced),
            user_created_at,
            agent_message_id.clone(),
            response_text.clone(),
            agent_created_at,
        );
        Ok(ChatReply::Complete { response_text, message_id: agent_message_id, created_at: agent_created_at })
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_persistence(
    deps: ChatDeps,
    agent_id: String,
    chat_session_id: String,
    conversation_id: String,
    user_message_id: String,
    user_content: String,
    enhanced_message: Option<String>,
    user_created_at: DateTime<Utc>,
    agent_message_id: String,
    agent_content: String,
    agent_created_at: DateTime<Utc>,
) {
    tokio::spawn(async move {
        let rows = session::build_turn_messages(
            &agent_id,
            &chat_session_id,
            &conversation_id,
            &user_message_id,
            &user_content,
            enhanced_message,
            user_created_at,
            &agent_message_id,
            &agent_content,
            agent_created_at,
        );
        if let Err(e) = deps.db.insert_messages(rows).await {
            tracing::warn!(agent_id, chat_session_id, error = %e, "failed to persist chat messages");
        }
    });
}

/// Proxy the LLM's chunk stream out as wire frames (§6), accumulating the
/// full reply; persist the turn only once the stream completes without
/// error. An upstream failure mid-stream emits a terminal fallback frame
/// and skips persisting an agent message, per §7.
#[allow(clippy::too_many_arguments)]
fn spawn_streaming_turn(
    deps: ChatDeps,
    agent_id: String,
    chat_session_id: String,
    conversation_id: String,
    user_message_id: String,
    user_content: String,
    enhanced_message: Option<String>,
    user_created_at: DateTime<Utc>,
    agent_message_id: String,
    mut inner: ChatStream,
) -> ChatStream {
    let (tx, rx) = futures::channel::mpsc::unbounded::<Result<String, AppError>>();

    tokio::spawn(async move {
        let mut response_text = String::new();

        while let Some(item) = inner.next().await {
            match item {
                Ok(chunk) => {
                    response_text.push_str(&chunk);
                    let frame = serde_json::json!({"chunk": chunk, "done": false}).to_string();
                    if tx.unbounded_send(Ok(frame)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(agent_id, chat_session_id, error = %e, "chat stream failed upstream");
                    let fallback = serde_json::json!({
                        "chunk": "I'm having trouble responding right now, please try again.",
                        "done": true,
                    })
                    .to_string();
                    let _ = tx.unbounded_send(Ok(fallback));
                    return;
                }
            }
        }

        let agent_created_at = Utc::now();
        let terminal = serde_json::json!({
            "chunk": "",
            "done": true,
            "full_response": response_text,
            "message_id": agent_message_id,
            "created_at": agent_created_at,
            "role": "agent",
        })
        .to_string();
        let _ = tx.unbounded_send(Ok(terminal));

        spawn_persistence(
            deps,
            agent_id,
            chat_session_id,
            conversation_id,
            user_message_id,
            user_content,
            enhanced_message,
            user_created_at,
            agent_message_id,
            response_text,
            agent_created_at,
        );
    });

    Box::pin(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeLlmClient;
    use crate::model::AgentStatus;
    use crate::store::{InMemoryDatabase, InMemoryVectorStore};

    fn test_agent(name: Option<&str>) -> Agent {
        Agent {
            agent_id: "agent-1".into(),
            owner: "owner-1".into(),
            agent_name: name.map(str::to_string),
            agent_aliases: vec![],
            llm_model: None,
            temperature: None,
            system_prompt: None,
            welcome_message: None,
            agent_status: AgentStatus::Active,
            agent_current_task: None,
        }
    }

    fn deps(llm: FakeLlmClient) -> ChatDeps {
        ChatDeps {
            vectors: Arc::new(InMemoryVectorStore::new()),
            db: Arc::new(InMemoryDatabase::new()),
            llm: Arc::new(llm),
        }
    }

    #[tokio::test]
    async fn fresh_session_greeting_has_no_knowledge_base_block_and_persists_under_new_conversation() {
        let deps = deps(FakeLlmClient::new().with_scripted_reply("Hello! How can I help?"));
        let db = deps.db.clone();

        let reply =
            handle_turn(deps, test_agent(Some("Atlas")), "web-session-1".to_string(), "hello".to_string(), false)
                .await
                .unwrap();

        match reply {
            ChatReply::Complete { response_text, .. } => assert_eq!(response_text, "Hello! How can I help?"),
            ChatReply::Streaming(_) => panic!("expected a non-streaming reply"),
        }

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let session = db.get_or_create_chat_session("agent-1", "web-session-1", None, &[]).await.unwrap();
        let messages =
            db.fetch_conversation_messages("agent-1", "web-session-1", &session.conversation_id, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn rotate_conversation_hides_prior_turns_from_history() {
        let deps = deps(FakeLlmClient::new());
        let db = deps.db.clone();

        handle_turn(deps.clone(), test_agent(Some("Atlas")), "web-session-2".to_string(), "first turn".to_string(), false)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let rotated = session::rotate(db.as_ref(), "agent-1", "web-session-2").await.unwrap();
        let history = session::fetch_history(db.as_ref(), "agent-1", "web-session-2", &rotated.conversation_id, 10)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn streaming_reply_ends_with_a_done_frame_carrying_full_response() {
        let deps = deps(FakeLlmClient::new().with_scripted_reply("part one part two"));
        let reply =
            handle_turn(deps, test_agent(Some("Atlas")), "web-session-3".to_string(), "hi".to_string(), true)
                .await
                .unwrap();

        let ChatReply::Streaming(mut stream) = reply else { panic!("expected a streaming reply") };
        let mut frames = Vec::new();
        while let Some(frame) = stream.next().await {
            frames.push(frame.unwrap());
        }
        let last: serde_json::Value = serde_json::from_str(frames.last().unwrap()).unwrap();
        assert_eq!(last["done"], true);
        assert!(last["full_response"].as_str().unwrap().contains("part one"));
    }
}
