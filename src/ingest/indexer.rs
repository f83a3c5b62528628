//! Indexer (§4.4): batched embed + upsert into the two vector collections
//! with idempotent point ids and atomic per-source replacement.

use crate::chunker::chunk_text;
use crate::config::{
    AGENT_KNOWLEDGE_BASE_COLLECTION, AGENT_WEB_CATALOG_COLLECTION, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
use crate::error::AppError;
use crate::ingest::metadata::MetadataResult;
use crate::llm::LlmClient;
use crate::model::{CatalogMetadata, KnowledgeSource, KnowledgeType, SourceStatus};
use crate::store::{Database, PointFilter, VectorPoint, VectorStore};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct IndexSummary {
    pub total_processed: usize,
    pub total_chunks: usize,
    pub errors: Vec<String>,
}

pub struct Indexer<'a> {
    pub vectors: &'a dyn VectorStore,
    pub llm: &'a dyn LlmClient,
    pub db: &'a dyn Database,
}

struct ChunkTuple {
    knowledge_source: String,
    text_index: usize,
    text_content: String,
}

impl<'a> Indexer<'a> {
    pub fn new(vectors: &'a dyn VectorStore, llm: &'a dyn LlmClient, db: &'a dyn Database) -> Self {
        Self { vectors, llm, db }
    }

    /// URL-derived chunks plus catalog metadata, mirroring the paired
    /// knowledge-base / web-catalog indexing steps of the reference
    /// implementation's link ingestion path.
    pub async fn index_urls(&self, agent_id: &str, results: Vec<MetadataResult>) -> (IndexSummary, IndexSummary) {
        let mut kb_summary = IndexSummary::default();
        let mut catalog_summary = IndexSummary::default();

        let mut chunk_tuples = Vec::new();
        let mut sources = Vec::new();

        for r in &results {
            if !r.fetch.success {
                kb_summary.errors.push(format!("{}: {}", r.fetch.url, r.fetch.error.clone().unwrap_or_default()));
                continue;
            }
            let Some(text) = &r.fetch.text_content else {
                kb_summary.errors.push(format!("{}: no text content", r.fetch.url));
                continue;
            };
            let source = r.fetch.normalized_url.clone().unwrap_or_else(|| r.fetch.url.clone());
            let chunks = chunk_text(text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
            for (i, c) in chunks.into_iter().enumerate() {
                chunk_tuples.push(ChunkTuple { knowledge_source: source.clone(), text_index: i, text_content: c });
            }
            sources.push(source);
            kb_summary.total_processed += 1;
        }

        if !chunk_tuples.is_empty() {
            match self.embed_and_upsert_url_chunks(agent_id, &chunk_tuples).await {
                Ok(n) => kb_summary.total_chunks = n,
                Err(e) => kb_summary.errors.push(e.to_string()),
            }
        }

        for source in &sources {
            self.mark_source(agent_id, KnowledgeType::Url, source, SourceStatus::Indexed).await;
        }

        for r in &results {
            catalog_summary.total_processed += 1;
            let Some(metadata) = &r.metadata else { continue };
            match self.upsert_catalog_point(agent_id, metadata).await {
                Ok(()) => catalog_summary.total_chunks += 1,
                Err(e) => catalog_summary.errors.push(format!("{}: {e}", metadata.url)),
            }
        }

        (kb_summary, catalog_summary)
    }

    /// `(file_name, extracted_text)` pairs — extraction happens upstream in
    /// the fetcher, this only chunks, embeds, and indexes.
    pub async fn index_files(&self, agent_id: &str, files: Vec<(String, String)>) -> IndexSummary {
        self.index_deterministic(agent_id, KnowledgeType::File, files).await
    }

    /// `(custom_text_alias, text)` pairs.
    pub async fn index_custom_texts(&self, agent_id: &str, texts: Vec<(String, String)>) -> IndexSummary {
        self.index_deterministic(agent_id, KnowledgeType::CustomText, texts).await
    }

    /// `(qna_alias, question, answer)` triples. No chunking: one point per
    /// pair, `text_index` always 0.
    pub async fn index_qa_pairs(&self, agent_id: &str, pairs: Vec<(String, String, String)>) -> IndexSummary {
        let mut summary = IndexSummary::default();
        for (alias, question, answer) in pairs {
            summary.total_processed += 1;
            let text_content = format!("Question: {question} Answer: {answer}");
            let composite = format!("{agent_id}:custom_qa:{alias}:0");
            let point_id = Uuid::new_v5(&Uuid::NAMESPACE_DNS, composite.as_bytes()).to_string();

            let embedding = match self.llm.embed(&[text_content.clone()]).await {
                Ok(mut v) => v.remove(0),
                Err(e) => {
                    summary.errors.push(format!("{alias}: {e}"));
                    continue;
                }
            };

            let filter = PointFilter::new()
                .eq("agent_id", agent_id)
                .eq("knowledge_type", KnowledgeType::CustomQa.as_str())
                .eq("knowledge_source", alias.clone());
            if let Err(e) = self.vectors.delete(AGENT_KNOWLEDGE_BASE_COLLECTION, filter).await {
                summary.errors.push(format!("{alias}: delete failed: {e}"));
                continue;
            }

            let point = VectorPoint {
                id: point_id,
                vector: embedding,
                payload: json!({
                    "agent_id": agent_id,
                    "knowledge_source": alias,
                    "knowledge_type": KnowledgeType::CustomQa.as_str(),
                    "text_index": 0,
                    "text_content": text_content,
                    "created_at": Utc::now(),
                }),
            };
            if let Err(e) = self.vectors.upsert(AGENT_KNOWLEDGE_BASE_COLLECTION, vec![point]).await {
                summary.errors.push(format!("{alias}: upsert failed: {e}"));
                continue;
            }
            summary.total_chunks += 1;
            self.mark_source(agent_id, KnowledgeType::CustomQa, &alias, SourceStatus::Indexed).await;
        }
        summary
    }

    async fn index_deterministic(&self, agent_id: &str, knowledge_type: KnowledgeType, items: Vec<(String, String)>) -> IndexSummary {
        let mut summary = IndexSummary::default();
        for (source, text) in items {
            summary.total_processed += 1;
            let chunks = chunk_text(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
            if chunks.is_empty() {
                continue;
            }

            let embeddings = match self.llm.embed(&chunks).await {
                Ok(v) => v,
                Err(e) => {
                    summary.errors.push(format!("{source}: {e}"));
                    continue;
                }
            };

            let filter = PointFilter::new()
                .eq("agent_id", agent_id)
                .eq("knowledge_type", knowledge_type.as_str())
                .eq("knowledge_source", source.clone());
            if let Err(e) = self.vectors.delete(AGENT_KNOWLEDGE_BASE_COLLECTION, filter).await {
                summary.errors.push(format!("{source}: delete failed: {e}"));
                continue;
            }

            let points: Vec<VectorPoint> = chunks
                .into_iter()
                .zip(embeddings)
                .enumerate()
                .map(|(i, (text_content, vector))| {
                    let composite = format!("{agent_id}:{}:{source}:{i}", knowledge_type.as_str());
                    VectorPoint {
                        id: Uuid::new_v5(&Uuid::NAMESPACE_DNS, composite.as_bytes()).to_string(),
                        vector,
                        payload: json!({
                            "agent_id": agent_id,
                            "knowledge_source": source,
                            "knowledge_type": knowledge_type.as_str(),
                            "text_index": i,
                            "text_content": text_content,
                            "created_at": Utc::now(),
                        }),
                    }
                })
                .collect();

            let n = points.len();
            if let Err(e) = self.vectors.upsert(AGENT_KNOWLEDGE_BASE_COLLECTION, points).await {
                summary.errors.push(format!("{source}: upsert failed: {e}"));
                continue;
            }
            summary.total_chunks += n;
            self.mark_source(agent_id, knowledge_type, &source, SourceStatus::Indexed).await;
        }
        summary
    }

    /// URL chunks use random point ids; the whole source's prior points are
    /// replaced en bloc by a `(agent_id, knowledge_source)` filter delete.
    async fn embed_and_upsert_url_chunks(&self, agent_id: &str, tuples: &[ChunkTuple]) -> Result<usize, AppError> {
        let texts: Vec<String> = tuples.iter().map(|t| t.text_content.clone()).collect();
        let embeddings = self.llm.embed(&texts).await?;

        let sources: HashSet<&str> = tuples.iter().map(|t| t.knowledge_source.as_str()).collect();
        for source in sources {
            let filter = PointFilter::new().eq("agent_id", agent_id).eq("knowledge_source", source);
            self.vectors.delete(AGENT_KNOWLEDGE_BASE_COLLECTION, filter).await?;
        }

        let points: Vec<VectorPoint> = tuples
            .iter()
            .zip(embeddings)
            .map(|(t, vector)| VectorPoint {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: json!({
                    "agent_id": agent_id,
                    "knowledge_source": t.knowledge_source,
                    "knowledge_type": KnowledgeType::Url.as_str(),
                    "text_index": t.text_index,
                    "text_content": t.text_content,
                    "created_at": Utc::now(),
                }),
            })
            .collect();

        let n = points.len();
        self.vectors.upsert(AGENT_KNOWLEDGE_BASE_COLLECTION, points).await?;
        Ok(n)
    }

    /// Catalog points embed the summary, not the chunk text, and key off
    /// `(agent_id, url)`; belt-and-braces filter-delete precedes the upsert
    /// even though the id is already deterministic.
    async fn upsert_catalog_point(&self, agent_id: &str, metadata: &CatalogMetadata) -> Result<(), AppError> {
        let embedding = self.llm.embed(&[metadata.summary.clone()]).await?.remove(0);
        let composite = format!("{agent_id}:{}", metadata.url);
        let point_id = Uuid::new_v5(&Uuid::NAMESPACE_DNS, composite.as_bytes()).to_string();

        let filter = PointFilter::new().eq("agent_id", agent_id).eq("knowledge_source", metadata.url.clone());
        self.vectors.delete(AGENT_WEB_CATALOG_COLLECTION, filter).await?;

        let point = VectorPoint {
            id: point_id,
            vector: embedding,
            payload: json!({
                "agent_id": agent_id,
                "knowledge_source": metadata.url,
                "knowledge_type": KnowledgeType::Url.as_str(),
                "page_type": metadata.page_type,
                "summary": metadata.summary,
                "product_name": metadata.product_name,
                "product_id": metadata.product_id,
                "category": metadata.category,
                "price": metadata.price,
                "currency": metadata.currency,
                "is_available": metadata.is_available,
                "created_at": Utc::now(),
            }),
        };
        self.vectors.upsert(AGENT_WEB_CATALOG_COLLECTION, vec![point]).await
    }

    async fn mark_source(&self, agent_id: &str, knowledge_type: KnowledgeType, source: &str, status: SourceStatus) {
        let now = Utc::now();
        let row = KnowledgeSource {
            agent_id: agent_id.to_string(),
            knowledge_type,
            knowledge_source: source.to_string(),
            status,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.db.upsert_knowledge_source(row).await {
            tracing::warn!(agent_id, source, error = %e, "failed to record knowledge source status");
        }
    }

    /// Remove a named subset of sources for one knowledge type — the
    /// `remove-agent-links` / `delete-agent-files` / `delete-agent-custom-data`
    /// batch operations of §6. Deletes vector points from the knowledge-base
    /// collection and, for URLs, the matching catalog entries too.
    pub async fn delete_sources(&self, agent_id: &str, knowledge_type: KnowledgeType, sources: Vec<String>) -> IndexSummary {
        let mut summary = IndexSummary::default();
        if sources.is_empty() {
            return summary;
        }

        let filter = PointFilter::new()
            .eq("agent_id", agent_id)
            .eq("knowledge_type", knowledge_type.as_str())
            .any("knowledge_source", sources.clone());
        match self.vectors.delete(AGENT_KNOWLEDGE_BASE_COLLECTION, filter).await {
            Ok(n) => summary.total_chunks += n as usize,
            Err(e) => summary.errors.push(format!("knowledge_base: {e}")),
        }

        if knowledge_type == KnowledgeType::Url {
            let catalog_filter = PointFilter::new().eq("agent_id", agent_id).any("knowledge_source", sources.clone());
            if let Err(e) = self.vectors.delete(AGENT_WEB_CATALOG_COLLECTION, catalog_filter).await {
                summary.errors.push(format!("web_catalog: {e}"));
            }
        }

        if let Err(e) = self.db.delete_knowledge_sources(agent_id, knowledge_type, &sources).await {
            summary.errors.push(format!("database: {e}"));
        }
        summary.total_processed = sources.len();
        summary
    }

    /// Cascade-delete every point owned by `agent_id` from both collections
    /// plus every database row. A failure on one collection does not block
    /// the attempt on the other (§4.4).
    pub async fn delete_agent(&self, agent_id: &str) -> IndexSummary {
        let mut summary = IndexSummary::default();

        match self.vectors.delete(AGENT_KNOWLEDGE_BASE_COLLECTION, PointFilter::new().eq("agent_id", agent_id)).await {
            Ok(n) => summary.total_chunks += n as usize,
            Err(e) => summary.errors.push(format!("knowledge_base: {e}")),
        }
        match self.vectors.delete(AGENT_WEB_CATALOG_COLLECTION, PointFilter::new().eq("agent_id", agent_id)).await {
            Ok(n) => summary.total_chunks += n as usize,
            Err(e) => summary.errors.push(format!("web_catalog: {e}")),
        }
        if let Err(e) = self.db.delete_agent_cascade(agent_id).await {
            summary.errors.push(format!("database: {e}"));
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeLlmClient;
    use crate::ingest::fetcher::FetchResult;
    use crate::store::{InMemoryDatabase, InMemoryVectorStore};

    fn fetch_ok(url: &str, text: &str) -> MetadataResult {
        MetadataResult {
            fetch: FetchResult {
                success: true,
                url: url.to_string(),
                normalized_url: Some(url.to_string()),
                text_content: Some(text.to_string()),
                ..Default::default()
            },
            metadata: None,
        }
    }

    #[tokio::test]
    async fn reindexing_a_file_leaves_no_duplicate_chunks() {
        let vectors = InMemoryVectorStore::new();
        let db = InMemoryDatabase::new();
        let llm = FakeLlmClient::new();
        let indexer = Indexer::new(&vectors, &llm, &db);

        let long_text = "sentence one. ".repeat(300);
        let first = indexer.index_files("agent-1", vec![("doc.pdf".to_string(), long_text.clone())]).await;
        assert!(first.total_chunks > 1);

        let second = indexer.index_files("agent-1", vec![("doc.pdf".to_string(), long_text)]).await;
        assert_eq!(first.total_chunks, second.total_chunks);

        let results = vectors
            .search(AGENT_KNOWLEDGE_BASE_COLLECTION, &[0.0; crate::config::EMBEDDING_DIM], PointFilter::new().eq("agent_id", "agent-1"), 1000)
            .await
            .unwrap();
        assert_eq!(results.len(), second.total_chunks);
    }

    #[tokio::test]
    async fn reindexing_with_shorter_content_drops_stale_chunks() {
        let vectors = InMemoryVectorStore::new();
        let db = InMemoryDatabase::new();
        let llm = FakeLlmClient::new();
        let indexer = Indexer::new(&vectors, &llm, &db);

        let long_text = "sentence one. ".repeat(300);
        indexer.index_files("agent-1", vec![("doc.pdf".to_string(), long_text)]).await;
        let second = indexer.index_files("agent-1", vec![("doc.pdf".to_string(), "short".to_string())]).await;
        assert_eq!(second.total_chunks, 1);

        let results = vectors
            .search(AGENT_KNOWLEDGE_BASE_COLLECTION, &[0.0; crate::config::EMBEDDING_DIM], PointFilter::new().eq("agent_id", "agent-1"), 1000)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn qa_pair_indexes_as_a_single_point_with_text_index_zero() {
        let vectors = InMemoryVectorStore::new();
        let db = InMemoryDatabase::new();
        let llm = FakeLlmClient::new();
        let indexer = Indexer::new(&vectors, &llm, &db);

        let summary = indexer
            .index_qa_pairs("agent-1", vec![("faq-1".to_string(), "hours?".to_string(), "9 to 5".to_string())])
            .await;
        assert_eq!(summary.total_chunks, 1);
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn delete_sources_removes_only_the_named_source() {
        let vectors = InMemoryVectorStore::new();
        let db = InMemoryDatabase::new();
        let llm = FakeLlmClient::new();
        let indexer = Indexer::new(&vectors, &llm, &db);

        indexer
            .index_files(
                "agent-1",
                vec![("keep.pdf".to_string(), "keep me".to_string()), ("drop.pdf".to_string(), "drop me".to_string())],
            )
            .await;

        let summary = indexer.delete_sources("agent-1", KnowledgeType::File, vec!["drop.pdf".to_string()]).await;
        assert!(summary.errors.is_empty());

        let results = vectors
            .search(AGENT_KNOWLEDGE_BASE_COLLECTION, &[0.0; crate::config::EMBEDDING_DIM], PointFilter::new().eq("agent_id", "agent-1"), 1000)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload.get("knowledge_source").and_then(|v| v.as_str()), Some("keep.pdf"));
    }

    #[tokio::test]
    async fn delete_agent_removes_points_from_both_collections() {
        let vectors = InMemoryVectorStore::new();
        let db = InMemoryDatabase::new();
        let llm = FakeLlmClient::new();
        let indexer = Indexer::new(&vectors, &llm, &db);

        indexer.index_files("agent-1", vec![("doc.pdf".to_string(), "hello world".to_string())]).await;
        let results = vec![fetch_ok("https://example.com/a", "some content about a widget")];
        let with_metadata = super::super::metadata::extract_metadata_batch(&llm, results.into_iter().map(|r| r.fetch).collect()).await;
        indexer.index_urls("agent-1", with_metadata).await;

        let summary = indexer.delete_agent("agent-1").await;
        assert!(summary.errors.is_empty());

        let kb = vectors
            .search(AGENT_KNOWLEDGE_BASE_COLLECTION, &[0.0; crate::config::EMBEDDING_DIM], PointFilter::new().eq("agent_id", "agent-1"), 1000)
            .await
            .unwrap();
        let catalog = vectors
            .search(AGENT_WEB_CATALOG_COLLECTION, &[0.0; crate::config::EMBEDDING_DIM], PointFilter::new().eq("agent_id", "agent-1"), 1000)
            .await
            .unwrap();
        assert!(kb.is_empty());
        assert!(catalog.is_empty());
    }
}
