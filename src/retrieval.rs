//! Retrieval Engine (§4.5): embed once, search catalog then the two
//! knowledge-base angles in parallel, dedup, group, and merge into ranked
//! source cards.

use crate::config::{
    AGENT_KNOWLEDGE_BASE_COLLECTION, AGENT_WEB_CATALOG_COLLECTION, DIRECT_KNOWLEDGE_LIMIT, SOURCE_BASED_KNOWLEDGE_LIMIT,
    WEB_CATALOG_LIMIT,
};
use crate::error::AppError;
use crate::llm::LlmClient;
use crate::model::{KnowledgeType, PageType, SourceCard};
use crate::store::{PointFilter, ScoredPoint, VectorStore};
use std::collections::HashMap;

pub async fn search_and_merge(
    vectors: &dyn VectorStore,
    llm: &dyn LlmClient,
    agent_id: &str,
    query: &str,
) -> Result<Vec<SourceCard>, AppError> {
    let vector = llm.embed(&[query.to_string()]).await?.remove(0);

    let catalog_points = vectors
        .search(AGENT_WEB_CATALOG_COLLECTION, &vector, PointFilter::new().eq("agent_id", agent_id), WEB_CATALOG_LIMIT)
        .await?;

    let catalog_sources: Vec<String> = catalog_points
        .iter()
        .filter_map(|p| p.payload.get("knowledge_source").and_then(|v| v.as_str()).map(str::to_string))
        .collect();

    let direct_fut = vectors.search(
        AGENT_KNOWLEDGE_BASE_COLLECTION,
        &vector,
        PointFilter::new().eq("agent_id", agent_id),
        DIRECT_KNOWLEDGE_LIMIT,
    );
    let source_biased_fut = async {
        if catalog_sources.is_empty() {
            Ok(Vec::new())
        } else {
            let filter = PointFilter::new().eq("agent_id", agent_id).any("knowledge_source", catalog_sources.clone());
            vectors.search(AGENT_KNOWLEDGE_BASE_COLLECTION, &vector, filter, SOURCE_BASED_KNOWLEDGE_LIMIT).await
        }
    };

    let (direct_points, source_biased_points) = tokio::try_join!(direct_fut, source_biased_fut)?;

    let kb_cards = dedup_and_group(direct_points, source_biased_points);
    Ok(merge(catalog_points, kb_cards))
}

fn point_source(point: &ScoredPoint) -> String {
    point.payload.get("knowledge_source").and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

fn point_text_index(point: &ScoredPoint) -> i64 {
    point.payload.get("text_index").and_then(|v| v.as_i64()).unwrap_or(0)
}

/// Deduplicate the union of the two knowledge-base searches by
/// `(knowledge_source, text_index)`, keeping the higher score on collision,
/// then group by source: max score, chunks concatenated in `text_index`
/// order as `"[Chunk {i}]\n{text}"`.
fn dedup_and_group(direct: Vec<ScoredPoint>, source_biased: Vec<ScoredPoint>) -> HashMap<String, (f32, String)> {
    let mut dedup: HashMap<(String, i64), ScoredPoint> = HashMap::new();
    for point in direct.into_iter().chain(source_biased) {
        let key = (point_source(&point), point_text_index(&point));
        match dedup.get(&key) {
            Some(existing) if existing.score >= point.score => {}
            _ => {
                dedup.insert(key, point);
            }
        }
    }

    let mut groups: HashMap<String, Vec<ScoredPoint>> = HashMap::new();
    for point in dedup.into_values() {
        groups.entry(point_source(&point)).or_default().push(point);
    }

    groups
        .into_iter()
        .map(|(source, mut points)| {
            points.sort_by_key(point_text_index);
            let max_score = points.iter().fold(0.0f32, |acc, p| acc.max(p.score));
            let text = points
                .iter()
                .map(|p| {
                    let text = p.payload.get("text_content").and_then(|v| v.as_str()).unwrap_or_default();
                    format!("[Chunk {}]\n{text}", point_text_index(p))
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            (source, (max_score, text))
        })
        .collect()
}

/// Merge catalog results with the grouped knowledge-base results keyed by
/// `knowledge_source`; a source present in both keeps the higher of the two
/// scores. Sorted descending by score.
fn merge(catalog_points: Vec<ScoredPoint>, kb_cards: HashMap<String, (f32, String)>) -> Vec<SourceCard> {
    let mut merged: HashMap<String, SourceCard> = HashMap::new();

    for point in &catalog_points {
        let source = point_source(point);
        merged.insert(
            source.clone(),
            SourceCard {
                knowledge_source: source,
                knowledge_type: Some(KnowledgeType::Url),
                page_type: point
                    .payload
                    .get("page_type")
                    .and_then(|v| serde_json::from_value::<PageType>(v.clone()).ok()),
                summary: point.payload.get("summary").and_then(|v| v.as_str()).map(str::to_string),
                product_name: point.payload.get("product_name").and_then(|v| v.as_str()).map(str::to_string),
                product_id: point.payload.get("product_id").and_then(|v| v.as_str()).map(str::to_string),
                category: point.payload.get("category").and_then(|v| v.as_str()).map(str::to_string),
                price: point.payload.get("price").and_then(|v| v.as_f64()),
                currency: point.payload.get("currency").and_then(|v| v.as_str()).map(str::to_string),
                is_available: point.payload.get("is_available").and_then(|v| v.as_bool()),
                score: point.score,
                text_content: None,
            },
        );
    }

    for (source, (score, text)) in kb_cards {
        merged
            .entry(source.clone())
            .and_modify(|card| {
                card.text_content = Some(text.clone());
                card.score = card.score.max(score);
            })
            .or_insert_with(|| SourceCard {
                knowledge_source: source,
                knowledge_type: None,
                page_type: None,
                summary: None,
                product_name: None,
                product_id: None,
                category: None,
                price: None,
                currency: None,
                is_available: None,
                score,
                text_content: Some(text),
            });
    }

    let mut cards: Vec<SourceCard> = merged.into_values().collect();
    cards.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    cards
}
