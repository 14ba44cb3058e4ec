use crate::types::{FeedEntry, PipelineError, Result};
use feed_rs::parser;
use std::collections::HashSet;
use tracing::{debug, info};

/// Parsed feed document: channel title plus entries in document order.
#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

pub struct FeedParser {
    seen_guids: HashSet<String>,
    seen_urls: HashSet<String>,
}

impl FeedParser {
    pub fn new() -> Self {
        Self {
            seen_guids: HashSet::new(),
            seen_urls: HashSet::new(),
        }
    }

    pub fn parse_feed(&mut self, content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| PipelineError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);

        // Repeats are tracked per document only; the ledger handles cross-run identity.
        self.clear_deduplication_cache();
        let entries: Vec<FeedEntry> = feed
            .entries
            .into_iter()
            .filter_map(|entry| self.parse_entry(entry))
            .collect();

        info!("Parsed feed with {} entries", entries.len());

        Ok(ParsedFeed { title, entries })
    }

    fn parse_entry(&mut self, entry: feed_rs::model::Entry) -> Option<FeedEntry> {
        let title = entry.title.map(|t| t.content).unwrap_or_default();
        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default();

        if !entry.id.is_empty() && !self.seen_guids.insert(entry.id.clone()) {
            debug!("Skipping duplicate entry with GUID: {}", entry.id);
            return None;
        }

        if !link.is_empty() && !self.seen_urls.insert(link.clone()) {
            debug!("Skipping duplicate entry with URL: {}", link);
            return None;
        }

        // Summary, falling back to the full content body.
        let summary = entry
            .summary
            .map(|s| s.content)
            .filter(|s| !s.trim().is_empty())
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();

        Some(FeedEntry {
            title,
            summary,
            link,
        })
    }

    pub fn clear_deduplication_cache(&mut self) {
        self.seen_guids.clear();
        self.seen_urls.clear();
    }
}

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}
