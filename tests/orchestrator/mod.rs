use atlas_core::chat::{format_knowledge_base_string, handle_turn, ChatDeps, ChatReply};
use atlas_core::fakes::FakeLlmClient;
use atlas_core::ingest::{FetchResult, Indexer, MetadataResult};
use atlas_core::model::{Agent, AgentStatus, CatalogMetadata, PageType};
use atlas_core::retrieval::search_and_merge;
use atlas_core::store::{Database, InMemoryDatabase, InMemoryVectorStore};
use std::sync::Arc;

fn atlas(name: &str) -> Agent {
    Agent {
        agent_id: "agent-1".into(),
        owner: "owner-1".into(),
        agent_name: Some(name.into()),
        agent_aliases: vec![],
        llm_model: None,
        temperature: None,
        system_prompt: None,
        welcome_message: None,
        agent_status: AgentStatus::Active,
        agent_current_task: None,
    }
}

async fn index_widget(vectors: &InMemoryVectorStore, llm: &FakeLlmClient, db: &InMemoryDatabase) {
    let indexer = Indexer::new(vectors, llm, db);
    let metadata = CatalogMetadata {
        page_type: PageType::Product,
        summary: "a widget product page".to_string(),
        url: "https://shop/widget".to_string(),
        product_name: Some("Widget".to_string()),
        product_id: Some("w-1".to_string()),
        category: None,
        price: Some(9.99),
        currency: Some("USD".to_string()),
        is_available: Some(true),
    };
    let results = vec![MetadataResult {
        fetch: FetchResult {
            success: true,
            url: metadata.url.clone(),
            normalized_url: Some(metadata.url.clone()),
            text_content: Some("The Widget is our flagship product.".to_string()),
            ..Default::default()
        },
        metadata: Some(metadata),
    }];
    indexer.index_urls("agent-1", results).await;
}

// Scenario 3 (§8): a catalog-indexed product page surfaces its price both in
// the retrieved card and verbatim in the assembled prompt's knowledge-base
// block.
#[tokio::test]
async fn product_metadata_surfaces_price_in_card_and_prompt() {
    let vectors = InMemoryVectorStore::new();
    let db = InMemoryDatabase::new();
    let llm = FakeLlmClient::new();
    index_widget(&vectors, &llm, &db).await;

    let cards = search_and_merge(&vectors, &llm, "agent-1", "how much is the widget?").await.unwrap();
    let top = &cards[0];
    assert_eq!(top.product_name.as_deref(), Some("Widget"));
    assert_eq!(top.price, Some(9.99));

    let kb_string = format_knowledge_base_string(&cards);
    assert!(kb_string.contains("price: 9.99"));
}

// Scenario 1 (§8): a fresh session with no indexed sources produces a reply
// and persists exactly two messages under a freshly minted conversation id.
#[tokio::test]
async fn fresh_session_persists_two_messages_under_a_new_conversation() {
    let vectors = Arc::new(InMemoryVectorStore::new());
    let db = Arc::new(InMemoryDatabase::new());
    let llm = Arc::new(FakeLlmClient::new().with_scripted_reply("Hello! How can I help?"));
    let deps = ChatDeps { vectors, db: db.clone(), llm };

    let reply = handle_turn(deps, atlas("Atlas"), "web-session-fresh".to_string(), "hello".to_string(), false)
        .await
        .unwrap();
    let ChatReply::Complete { response_text, .. } = reply else { panic!("expected a non-streaming reply") };
    assert_eq!(response_text, "Hello! How can I help?");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let session = db.get_or_create_chat_session("agent-1", "web-session-fresh", None, &[]).await.unwrap();
    let messages = db.fetch_conversation_messages("agent-1", "web-session-fresh", &session.conversation_id, 10).await.unwrap();
    assert_eq!(messages.len(), 2);
}

// Scenario 2 (§8): a follow-up "again?" is resolved against prior history
// into a self-contained query, and the agent's reply is persisted under its
// own message id, distinct from the user turn's.
#[tokio::test]
async fn enhanced_query_resolves_a_follow_up_against_prior_history() {
    let vectors = Arc::new(InMemoryVectorStore::new());
    let db = Arc::new(InMemoryDatabase::new());
    let llm = Arc::new(FakeLlmClient::new().with_scripted_enhancement("Who are you?").with_scripted_reply("I am Atlas."));
    let deps = ChatDeps { vectors, db: db.clone(), llm };

    handle_turn(deps.clone(), atlas("Atlas"), "web-session-2".to_string(), "who are you?".to_string(), false)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let reply = handle_turn(deps, atlas("Atlas"), "web-session-2".to_string(), "again?".to_string(), false)
        .await
        .unwrap();
    let ChatReply::Complete { response_text, message_id: agent_message_id, .. } = reply else {
        panic!("expected a non-streaming reply")
    };
    assert_eq!(response_text, "I am Atlas.");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let session = db.get_or_create_chat_session("agent-1", "web-session-2", None, &[]).await.unwrap();
    let messages = db.fetch_conversation_messages("agent-1", "web-session-2", &session.conversation_id, 10).await.unwrap();
    assert_eq!(messages.len(), 4);

    let second_turn_user_message = &messages[2];
    let enhanced = second_turn_user_message.enhanced_message.as_deref().unwrap();
    assert!(enhanced.to_lowercase().contains("who") || enhanced.to_lowercase().contains("you"));

    let second_turn_agent_message = &messages[3];
    assert_eq!(second_turn_agent_message.message_id, agent_message_id);
    assert_ne!(second_turn_agent_message.message_id, second_turn_user_message.message_id);
}

// Scenario 6 (§8): deleting an agent clears both vector collections and the
// database's pagination-backed listings.
#[tokio::test]
async fn deleting_an_agent_clears_both_collections_and_listings() {
    let vectors = InMemoryVectorStore::new();
    let db = InMemoryDatabase::new();
    let llm = FakeLlmClient::new();
    index_widget(&vectors, &llm, &db).await;

    let indexer = Indexer::new(&vectors, &llm, &db);
    let summary = indexer.delete_agent("agent-1").await;
    assert!(summary.errors.is_empty());

    let cards = search_and_merge(&vectors, &llm, "agent-1", "widget").await.unwrap();
    assert!(cards.is_empty());

    let (rows, _) = db
        .list_knowledge_sources("agent-1", atlas_core::model::KnowledgeType::Url, atlas_core::store::Cursor(None), 50)
        .await
        .unwrap();
    assert!(rows.is_empty());
}
