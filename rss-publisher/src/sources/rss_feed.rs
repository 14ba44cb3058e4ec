use crate::fetcher::Fetcher;
use crate::parser::FeedParser;
use crate::rss_utils::url::extract_domain;
use crate::traits::FeedSource;
use crate::types::{FeedEntry, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// RSS/Atom feed fetched over HTTP
pub struct RssFeedSource {
    pub url: String,
    pub title: Option<String>,
    fetcher: Arc<Fetcher>,
    parser: FeedParser,
}

impl RssFeedSource {
    pub fn new(url: String, fetcher: Arc<Fetcher>) -> Self {
        Self {
            url,
            title: None,
            fetcher,
            parser: FeedParser::new(),
        }
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    fn source_name(&self) -> String {
        self.title.clone().unwrap_or_else(|| match extract_domain(&self.url) {
            Some(domain) => format!("RSS Feed ({})", domain),
            None => "RSS Feed".to_string(),
        })
    }

    async fn pull(&mut self) -> Result<Vec<FeedEntry>> {
        info!("Reading feed: {}", self.url);

        let content = self.fetcher.fetch_text(&self.url).await?;
        let parsed = self.parser.parse_feed(&content)?;

        if self.title.is_none() {
            self.title = parsed.title;
        }
        if parsed.entries.is_empty() {
            warn!("No entries found in feed {}", self.url);
        }

        Ok(parsed.entries)
    }
}
