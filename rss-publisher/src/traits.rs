use crate::types::{FeedEntry, Result};
use async_trait::async_trait;

/// Trait for pulling entries from a content source (RSS/Atom feeds, fixtures)
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Human-readable name for this source
    fn source_name(&self) -> String;

    /// Fetch the current entries, most recent first as the source orders them.
    /// An unreachable or unparseable source is an error; an empty one is not.
    async fn pull(&mut self) -> Result<Vec<FeedEntry>>;
}
