//! Vector database contract (§6): two collections, cosine distance, 1536-dim
//! vectors, filter-scoped search and delete.

use crate::error::AppError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[derive(Clone, Debug)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// A single equality condition in a `must` filter, mirroring the Qdrant-like
/// `{key, match: {value|any}}` shape from §6.
#[derive(Clone, Debug)]
pub enum FieldMatch {
    Value(String),
    Any(Vec<String>),
}

#[derive(Clone, Debug, Default)]
pub struct PointFilter {
    pub conditions: Vec<(String, FieldMatch)>,
}

impl PointFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((key.into(), FieldMatch::Value(value.into())));
        self
    }

    pub fn any(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.conditions.push((key.into(), FieldMatch::Any(values)));
        self
    }

    fn matches(&self, payload: &Value) -> bool {
        self.conditions.iter().all(|(key, m)| {
            let field = payload.get(key).and_then(Value::as_str);
            match (field, m) {
                (Some(v), FieldMatch::Value(want)) => v == want,
                (Some(v), FieldMatch::Any(wants)) => wants.iter().any(|w| w == v),
                (None, _) => false,
            }
        })
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Ensure the collection and its payload indexes exist. Idempotent.
    async fn ensure_collection(&self, collection: &str) -> Result<(), AppError>;

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<(), AppError>;

    /// Delete every point matching `filter`, returning the number removed.
    async fn delete(&self, collection: &str, filter: PointFilter) -> Result<u64, AppError>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: PointFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, AppError>;
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// In-process vector store used by integration tests and local development
/// without a live Qdrant-like deployment. Not wired to a real ANN index:
/// search is a linear scan, which is fine at test scale.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: DashMap<String, Arc<DashMap<String, VectorPoint>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, name: &str) -> Arc<DashMap<String, VectorPoint>> {
        self.collections.entry(name.to_string()).or_default().clone()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, collection: &str) -> Result<(), AppError> {
        self.collection(collection);
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<(), AppError> {
        let c = self.collection(collection);
        for point in points {
            c.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: PointFilter) -> Result<u64, AppError> {
        let c = self.collection(collection);
        let to_remove: Vec<String> = c
            .iter()
            .filter(|e| filter.matches(&e.value().payload))
            .map(|e| e.key().clone())
            .collect();
        let removed = to_remove.len() as u64;
        for id in to_remove {
            c.remove(&id);
        }
        Ok(removed)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: PointFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, AppError> {
        let c = self.collection(collection);
        let mut scored: Vec<ScoredPoint> = c
            .iter()
            .filter(|e| filter.matches(&e.value().payload))
            .map(|e| ScoredPoint {
                id: e.key().clone(),
                score: cosine(vector, &e.value().vector),
                payload: e.value().payload.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}
