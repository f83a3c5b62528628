//! Metadata Extractor (§4.3): thin orchestration over [`LlmClient::extract_metadata`]
//! across a batch of fetch results. Extraction failures degrade to `None`
//! rather than aborting the batch — the source remains eligible for
//! knowledge-base indexing, just not catalog routing.

use crate::ingest::fetcher::FetchResult;
use crate::llm::LlmClient;
use crate::model::CatalogMetadata;

pub struct MetadataResult {
    pub fetch: FetchResult,
    pub metadata: Option<CatalogMetadata>,
}

pub async fn extract_metadata_batch(llm: &dyn LlmClient, fetches: Vec<FetchResult>) -> Vec<MetadataResult> {
    let mut out = Vec::with_capacity(fetches.len());
    for fetch in fetches {
        let metadata = extract_one(llm, &fetch).await;
        out.push(MetadataResult { fetch, metadata });
    }
    out
}

async fn extract_one(llm: &dyn LlmClient, fetch: &FetchResult) -> Option<CatalogMetadata> {
    if !fetch.success {
        return None;
    }
    let text = fetch.text_content.as_ref()?;
    if text.trim().is_empty() {
        return None;
    }
    let url = fetch.normalized_url.as_deref().unwrap_or(&fetch.url);

    match llm.extract_metadata(url, text).await {
        Ok(Some(mut metadata)) => {
            metadata.url = url.to_string();
            Some(metadata)
        }
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(url, error = %err, "metadata extraction failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeLlmClient;

    #[tokio::test]
    async fn skips_unsuccessful_fetches_without_calling_the_llm() {
        let llm = FakeLlmClient::new();
        let fetch = FetchResult { success: false, url: "https://example.com".into(), ..Default::default() };
        let results = extract_metadata_batch(&llm, vec![fetch]).await;
        assert!(results[0].metadata.is_none());
        assert_eq!(llm.extract_metadata_calls(), 0);
    }

    #[tokio::test]
    async fn skips_fetches_with_no_text_content() {
        let llm = FakeLlmClient::new();
        let fetch = FetchResult { success: true, url: "https://example.com".into(), text_content: None, ..Default::default() };
        let results = extract_metadata_batch(&llm, vec![fetch]).await;
        assert!(results[0].metadata.is_none());
        assert_eq!(llm.extract_metadata_calls(), 0);
    }

    #[tokio::test]
    async fn extracted_metadata_url_is_forced_to_the_fetch_url() {
        let llm = FakeLlmClient::new();
        let fetch = FetchResult {
            success: true,
            url: "https://example.com/widget".into(),
            normalized_url: Some("https://example.com/widget".into()),
            text_content: Some("a widget page".into()),
            ..Default::default()
        };
        let results = extract_metadata_batch(&llm, vec![fetch]).await;
        let metadata = results[0].metadata.as_ref().unwrap();
        assert_eq!(metadata.url, "https://example.com/widget");
    }
}
