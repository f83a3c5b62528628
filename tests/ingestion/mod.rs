use atlas_core::fakes::{FakeBrowserClient, FakeLlmClient};
use atlas_core::ingest::{extract_metadata_batch, fetcher, Indexer};
use atlas_core::model::KnowledgeType;
use atlas_core::store::{InMemoryDatabase, InMemoryVectorStore};
use std::sync::Arc;
use std::time::Duration;

// Scenario 5 (§8): a batch of [good, timeout, good] URLs with a 1s fetch
// timeout never aborts the batch; the hung URL records as a failure while
// the other two still index.
#[tokio::test(start_paused = true)]
async fn a_hung_fetch_does_not_abort_the_rest_of_the_batch() {
    let browser = Arc::new(
        FakeBrowserClient::new()
            .with_page("https://good-one.test/", "<html><body><p>first good page</p></body></html>")
            .with_hang("https://hung.test/")
            .with_page("https://good-two.test/", "<html><body><p>second good page</p></body></html>"),
    );

    let results = fetcher::fetch_urls(
        browser,
        vec!["https://good-one.test".to_string(), "https://hung.test".to_string(), "https://good-two.test".to_string()],
        3,
        Duration::from_secs(1),
        Vec::new(),
    )
    .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].success, "first url should succeed");
    assert!(!results[1].success, "hung url should fail");
    assert!(results[1].error.is_some());
    assert!(results[2].success, "third url should succeed");

    let llm = FakeLlmClient::new();
    let with_metadata = extract_metadata_batch(&llm, results).await;

    let vectors = InMemoryVectorStore::new();
    let db = InMemoryDatabase::new();
    let indexer = Indexer::new(&vectors, &llm, &db);
    let (kb, _catalog) = indexer.index_urls("agent-1", with_metadata).await;

    assert!(kb.total_chunks > 0, "the two good urls should produce indexed chunks");
    assert_eq!(kb.errors.len(), 1, "exactly the hung url should record an error");
}

// §8 delete-cascade scenario, scoped to a single knowledge type rather than
// the whole agent: removing a named subset of sources leaves the rest
// searchable and recorded.
#[tokio::test]
async fn removing_a_subset_of_sources_leaves_the_rest_indexed() {
    let vectors = InMemoryVectorStore::new();
    let db = InMemoryDatabase::new();
    let llm = FakeLlmClient::new();
    let indexer = Indexer::new(&vectors, &llm, &db);

    indexer
        .index_custom_texts(
            "agent-1",
            vec![("keep".to_string(), "keep this text".to_string()), ("drop".to_string(), "drop this text".to_string())],
        )
        .await;

    let summary = indexer.delete_sources("agent-1", KnowledgeType::CustomText, vec!["drop".to_string()]).await;
    assert!(summary.errors.is_empty());

    use atlas_core::store::{Cursor, Database};
    let (rows, _) = db.list_knowledge_sources("agent-1", KnowledgeType::CustomText, Cursor(None), 50).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].knowledge_source, "keep");
}
