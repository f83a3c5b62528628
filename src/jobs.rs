//! Background job queue (§10): a single `mpsc`-backed consumer loop that
//! runs ingestion off the request path. Chat-message persistence is fire-
//! and-forget via its own spawned task (see `chat::orchestrator`) rather
//! than routed through this queue — it carries no retry/backpressure needs
//! that would benefit from a shared consumer.

use crate::config::{DEFAULT_FETCH_CONCURRENCY, DEFAULT_FETCH_TIMEOUT_SECS};
use crate::error::AppError;
use crate::ingest::{BrowserClient, Indexer, extract_metadata_batch, fetcher};
use crate::llm::LlmClient;
use crate::model::AgentStatus;
use crate::store::{Database, VectorStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub enum Job {
    IndexUrls { agent_id: String, urls: Vec<String> },
    IndexFiles { agent_id: String, files: Vec<(String, String)> },
    IndexCustomTexts { agent_id: String, texts: Vec<(String, String)> },
    IndexQaPairs { agent_id: String, pairs: Vec<(String, String, String)> },
    DeleteAgent { agent_id: String },
}

#[derive(Clone)]
pub struct JobHandles {
    pub vectors: Arc<dyn VectorStore>,
    pub db: Arc<dyn Database>,
    pub llm: Arc<dyn LlmClient>,
    pub browser: Arc<dyn BrowserClient>,
}

#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn spawn(handles: JobHandles) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(256);
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                process_job(&handles, job).await;
            }
        });
        Self { sender }
    }

    pub async fn submit(&self, job: Job) -> Result<(), AppError> {
        self.sender.send(job).await.map_err(|_| AppError::internal("job queue is no longer accepting work"))
    }
}

async fn process_job(handles: &JobHandles, job: Job) {
    match job {
        Job::IndexUrls { agent_id, urls } => {
            tracing::info!(agent_id, count = urls.len(), "indexing urls");
            mark_indexing(handles, &agent_id).await;

            let fetches = fetcher::fetch_urls(
                handles.browser.clone(),
                urls,
                DEFAULT_FETCH_CONCURRENCY,
                Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
                Vec::new(),
            )
            .await;
            let with_metadata = extract_metadata_batch(handles.llm.as_ref(), fetches).await;

            let indexer = Indexer::new(handles.vectors.as_ref(), handles.llm.as_ref(), handles.db.as_ref());
            let (kb, catalog) = indexer.index_urls(&agent_id, with_metadata).await;
            tracing::info!(
                agent_id,
                kb_chunks = kb.total_chunks,
                catalog_entries = catalog.total_chunks,
                errors = kb.errors.len() + catalog.errors.len(),
                "url indexing complete"
            );
            mark_active(handles, &agent_id).await;
        }
        Job::IndexFiles { agent_id, files } => {
            tracing::info!(agent_id, count = files.len(), "indexing files");
            mark_indexing(handles, &agent_id).await;
            let indexer = Indexer::new(handles.vectors.as_ref(), handles.llm.as_ref(), handles.db.as_ref());
            let summary = indexer.index_files(&agent_id, files).await;
            tracing::info!(agent_id, chunks = summary.total_chunks, errors = summary.errors.len(), "file indexing complete");
            mark_active(handles, &agent_id).await;
        }
        Job::IndexCustomTexts { agent_id, texts } => {
            tracing::info!(agent_id, count = texts.len(), "indexing custom texts");
            mark_indexing(handles, &agent_id).await;
            let indexer = Indexer::new(handles.vectors.as_ref(), handles.llm.as_ref(), handles.db.as_ref());
            let summary = indexer.index_custom_texts(&agent_id, texts).await;
            tracing::info!(agent_id, chunks = summary.total_chunks, errors = summary.errors.len(), "custom text indexing complete");
            mark_active(handles, &agent_id).await;
        }
        Job::IndexQaPairs { agent_id, pairs } => {
            tracing::info!(agent_id, count = pairs.len(), "indexing qa pairs");
            mark_indexing(handles, &agent_id).await;
            let indexer = Indexer::new(handles.vectors.as_ref(), handles.llm.as_ref(), handles.db.as_ref());
            let summary = indexer.index_qa_pairs(&agent_id, pairs).await;
            tracing::info!(agent_id, chunks = summary.total_chunks, errors = summary.errors.len(), "qa pair indexing complete");
            mark_active(handles, &agent_id).await;
        }
        Job::DeleteAgent { agent_id } => {
            let indexer = Indexer::new(handles.vectors.as_ref(), handles.llm.as_ref(), handles.db.as_ref());
            let summary = indexer.delete_agent(&agent_id).await;
            if summary.errors.is_empty() {
                tracing::info!(agent_id, "agent deleted");
            } else {
                tracing::error!(agent_id, errors = ?summary.errors, "agent deletion completed with errors");
            }
        }
    }
}

/// Moves a cold `build-agent` agent to `Indexing`. An agent already marked
/// `Updating` (by `update-agent`, before this job was enqueued) is left
/// alone, so the transition stays `updating -> active` rather than being
/// forced through `indexing` in between (SPEC_FULL.md §4.4).
async fn mark_indexing(handles: &JobHandles, agent_id: &str) {
    match handles.db.get_agent(agent_id).await {
        Ok(Some(agent)) if agent.agent_status == AgentStatus::Updating => {}
        Ok(_) => {
            if let Err(e) = handles.db.set_agent_status(agent_id, AgentStatus::Indexing).await {
                tracing::warn!(agent_id, error = %e, "failed to mark agent indexing");
            }
        }
        Err(e) => tracing::warn!(agent_id, error = %e, "failed to read agent status before marking indexing"),
    }
}

async fn mark_active(handles: &JobHandles, agent_id: &str) {
    if let Err(e) = handles.db.set_agent_status(agent_id, AgentStatus::Active).await {
        tracing::warn!(agent_id, error = %e, "failed to mark agent active after indexing");
    }
}
