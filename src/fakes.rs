//! In-process fakes for the `VectorStore`/`Database`/`LlmClient`/`BrowserClient`
//! collaborator traits, used by unit and integration tests and by local
//! development without live provider credentials.

use crate::config::{EMBEDDING_DIM, LlmModel};
use crate::error::AppError;
use crate::ingest::fetcher::{BrowserClient, RenderedPage};
use crate::llm::{ChatStream, ChatTurn, LlmClient};
use crate::model::{CatalogMetadata, PageType};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Deterministic, content-derived "embedding": same text always produces the
/// same vector, and similar prefixes produce similar vectors, which is
/// enough to exercise ranking logic without a real embedding model.
fn fake_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for (i, byte) in text.bytes().enumerate() {
        v[i % EMBEDDING_DIM] += byte as f32;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

pub struct FakeLlmClient {
    extract_metadata_calls: AtomicUsize,
    enhance_calls: AtomicUsize,
    /// If set, `enhance_message` returns this value instead of the default
    /// pass-through-with-marker behavior.
    scripted_enhancement: Mutex<Option<String>>,
    /// If set, `extract_metadata` returns this value for every call.
    scripted_metadata: Mutex<Option<Option<CatalogMetadata>>>,
    /// If set, `complete`/`stream` return this text instead of echoing.
    scripted_reply: Mutex<Option<String>>,
    fail_enhance: Mutex<bool>,
    fail_extract: Mutex<bool>,
}

impl Default for FakeLlmClient {
    fn default() -> Self {
        Self {
            extract_metadata_calls: AtomicUsize::new(0),
            enhance_calls: AtomicUsize::new(0),
            scripted_enhancement: Mutex::new(None),
            scripted_metadata: Mutex::new(None),
            scripted_reply: Mutex::new(None),
            fail_enhance: Mutex::new(false),
            fail_extract: Mutex::new(false),
        }
    }
}

impl FakeLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract_metadata_calls(&self) -> usize {
        self.extract_metadata_calls.load(Ordering::SeqCst)
    }

    pub fn enhance_calls(&self) -> usize {
        self.enhance_calls.load(Ordering::SeqCst)
    }

    pub fn with_scripted_enhancement(self, enhancement: impl Into<String>) -> Self {
        *self.scripted_enhancement.lock().unwrap() = Some(enhancement.into());
        self
    }

    pub fn with_scripted_metadata(self, metadata: Option<CatalogMetadata>) -> Self {
        *self.scripted_metadata.lock().unwrap() = Some(metadata);
        self
    }

    pub fn with_scripted_reply(self, reply: impl Into<String>) -> Self {
        *self.scripted_reply.lock().unwrap() = Some(reply.into());
        self
    }

    pub fn failing_enhance(self) -> Self {
        *self.fail_enhance.lock().unwrap() = true;
        self
    }

    pub fn failing_extract(self) -> Self {
        *self.fail_extract.lock().unwrap() = true;
        self
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts.iter().map(|t| fake_embed(t)).collect())
    }

    async fn complete(&self, _model: LlmModel, messages: &[ChatTurn], _temperature: Option<f32>) -> Result<String, AppError> {
        if let Some(reply) = self.scripted_reply.lock().unwrap().clone() {
            return Ok(reply);
        }
        let last_user = messages.iter().rev().find(|m| m.role == "user").map(|m| m.content.clone()).unwrap_or_default();
        Ok(format!("echo: {last_user}"))
    }

    async fn stream(&self, model: LlmModel, messages: &[ChatTurn], temperature: Option<f32>) -> Result<ChatStream, AppError> {
        let full = self.complete(model, messages, temperature).await?;
        let words: Vec<Result<String, AppError>> =
            full.split_whitespace().map(|w| Ok(format!("{w} "))).collect();
        Ok(Box::pin(stream::iter(words)))
    }

    async fn enhance_message(&self, message: &str, _history: &[ChatTurn]) -> Result<String, AppError> {
        self.enhance_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_enhance.lock().unwrap() {
            return Err(AppError::Upstream("fake enhancer unavailable".into()));
        }
        if let Some(scripted) = self.scripted_enhancement.lock().unwrap().clone() {
            return Ok(scripted);
        }
        Ok(message.to_string())
    }

    async fn extract_metadata(&self, url: &str, _text_content: &str) -> Result<Option<CatalogMetadata>, AppError> {
        self.extract_metadata_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_extract.lock().unwrap() {
            return Err(AppError::Upstream("fake extractor unavailable".into()));
        }
        if let Some(scripted) = self.scripted_metadata.lock().unwrap().clone() {
            return Ok(scripted);
        }
        Ok(Some(CatalogMetadata {
            page_type: PageType::Content,
            summary: format!("summary of {url}"),
            url: url.to_string(),
            product_name: None,
            product_id: None,
            category: None,
            price: None,
            currency: None,
            is_available: None,
        }))
    }
}

/// Scripted headless-browser fake: each url maps to a canned outcome.
#[derive(Default)]
pub struct FakeBrowserClient {
    pages: Mutex<HashMap<String, FakeOutcome>>,
}

enum FakeOutcome {
    Page(RenderedPage),
    Error(String),
    Hang,
}

impl FakeBrowserClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        let url = url.into();
        let html = html.into();
        self.pages.lock().unwrap().insert(
            url.clone(),
            FakeOutcome::Page(RenderedPage { html, title: None, final_url: url, status_code: 200 }),
        );
        self
    }

    pub fn with_error(self, url: impl Into<String>, error: impl Into<String>) -> Self {
        self.pages.lock().unwrap().insert(url.into(), FakeOutcome::Error(error.into()));
        self
    }

    /// Simulate an unresponsive fetch that never completes on its own,
    /// exercising the per-item timeout.
    pub fn with_hang(self, url: impl Into<String>) -> Self {
        self.pages.lock().unwrap().insert(url.into(), FakeOutcome::Hang);
        self
    }
}

#[async_trait]
impl BrowserClient for FakeBrowserClient {
    async fn render(&self, url: &str) -> Result<RenderedPage, AppError> {
        let outcome = self.pages.lock().unwrap().remove(url);
        match outcome {
            Some(FakeOutcome::Page(page)) => Ok(page),
            Some(FakeOutcome::Error(e)) => Err(AppError::Upstream(e)),
            Some(FakeOutcome::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(AppError::Upstream(format!("no fake page registered for {url}"))),
        }
    }
}
