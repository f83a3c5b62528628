pub mod fetcher;
pub mod indexer;
pub mod metadata;

pub use fetcher::{BrowserClient, FetchResult, RenderedPage};
pub use indexer::{IndexSummary, Indexer};
pub use metadata::{MetadataResult, extract_metadata_batch};
