pub mod db;
pub mod vector;

pub use db::{Cursor, Database, InMemoryDatabase, remap_role_for_llm};
pub use vector::{FieldMatch, InMemoryVectorStore, PointFilter, ScoredPoint, VectorPoint, VectorStore};
