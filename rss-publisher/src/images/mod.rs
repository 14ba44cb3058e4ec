pub mod pixabay;
pub mod relevance;

pub use pixabay::PixabayClient;
pub use relevance::LlmRelevanceChecker;

use crate::config::ImageConfig;
use crate::rss_utils::text::{fold_to_ascii, truncate_on_word};
use crate::types::{ImageHit, ImageResult, Result};
use async_trait::async_trait;
use rand::seq::{IndexedRandom, SliceRandom};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stock photo search backend
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn provider_name(&self) -> String;

    /// Hits for `query`, best first. No hits is `Ok(vec![])`.
    async fn search(&self, query: &str) -> Result<Vec<ImageHit>>;

    /// Raw bytes of a full-resolution image.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelevanceVerdict {
    Match,
    Mismatch { replacement: Option<String> },
}

/// Judges whether a candidate's tags fit the article keyword
#[async_trait]
pub trait RelevanceChecker: Send + Sync {
    async fn check(&self, keyword: &str, hit: &ImageHit) -> Result<RelevanceVerdict>;
}

enum Pick {
    Chosen(ImageHit),
    Rejected { replacement: Option<String> },
}

/// Finds a featured image through a cascade of progressively broader queries.
pub struct ImageResolver {
    provider: Option<Arc<dyn ImageProvider>>,
    checker: Option<Arc<dyn RelevanceChecker>>,
    config: ImageConfig,
}

impl ImageResolver {
    pub fn new(provider: Option<Arc<dyn ImageProvider>>, config: ImageConfig) -> Self {
        Self {
            provider,
            checker: None,
            config,
        }
    }

    pub fn with_relevance_checker(mut self, checker: Arc<dyn RelevanceChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Never fails: provider errors are logged and the cascade moves on.
    pub async fn resolve(&self, keyword: &str, category: &str, title: &str) -> ImageResult {
        let Some(provider) = self.provider.as_ref().filter(|_| self.config.enabled) else {
            debug!("Image search disabled");
            return ImageResult::none();
        };

        let mut replacement_tried = false;
        for query in build_queries(keyword, category, title, &self.config) {
            let Some(hits) = self.search(provider, &query).await else {
                continue;
            };

            let subject = if keyword.trim().is_empty() { query.as_str() } else { keyword };
            match self.pick(&hits, subject).await {
                Pick::Chosen(hit) => {
                    info!("Image found for query '{}': {}", query, hit.image_url);
                    return ImageResult::found(&hit);
                }
                Pick::Rejected { replacement } => {
                    let Some(replacement) = replacement.filter(|_| !replacement_tried) else {
                        continue;
                    };
                    replacement_tried = true;
                    let replacement = normalize_query(&replacement, self.config.max_query_len);
                    if replacement.is_empty() {
                        continue;
                    }
                    debug!("Trying replacement query '{}'", replacement);
                    if let Some(hit) = self
                        .search(provider, &replacement)
                        .await
                        .and_then(|hits| choose_random(&hits))
                    {
                        info!("Image found for replacement query '{}': {}", replacement, hit.image_url);
                        return ImageResult::found(&hit);
                    }
                }
            }
        }

        warn!("No suitable image found for '{}'", title);
        ImageResult::none()
    }

    async fn search(&self, provider: &Arc<dyn ImageProvider>, query: &str) -> Option<Vec<ImageHit>> {
        match provider.search(query).await {
            Ok(hits) if !hits.is_empty() => Some(hits),
            Ok(_) => {
                debug!("No hits for query '{}'", query);
                None
            }
            Err(e) => {
                warn!("{} search failed for query '{}': {}", provider.provider_name(), query, e);
                None
            }
        }
    }

    async fn pick(&self, hits: &[ImageHit], keyword: &str) -> Pick {
        let Some(checker) = self.checker.as_ref().filter(|_| self.config.relevance_check) else {
            return match choose_random(hits) {
                Some(hit) => Pick::Chosen(hit),
                None => Pick::Rejected { replacement: None },
            };
        };

        let mut candidates = hits.to_vec();
        candidates.shuffle(&mut rand::rng());

        let mut replacement = None;
        for hit in candidates.into_iter().take(self.config.max_relevance_checks.max(1)) {
            match checker.check(keyword, &hit).await {
                Ok(RelevanceVerdict::Match) => return Pick::Chosen(hit),
                Ok(RelevanceVerdict::Mismatch { replacement: proposed }) => {
                    debug!("Candidate {} rejected for '{}'", hit.page_url, keyword);
                    if replacement.is_none() {
                        replacement = proposed;
                    }
                }
                Err(e) => {
                    warn!("Relevance check failed, accepting candidate: {}", e);
                    return Pick::Chosen(hit);
                }
            }
        }
        Pick::Rejected { replacement }
    }
}

fn choose_random(hits: &[ImageHit]) -> Option<ImageHit> {
    hits.choose(&mut rand::rng()).cloned()
}

/// Fold to ASCII, collapse whitespace, cap at `max_len` on a word boundary.
pub fn normalize_query(raw: &str, max_len: usize) -> String {
    truncate_on_word(&fold_to_ascii(raw), max_len)
}

/// Most specific first: title, keyword + category, keyword, category, fallback.
pub fn build_queries(keyword: &str, category: &str, title: &str, config: &ImageConfig) -> Vec<String> {
    let combined = format!("{} {}", keyword.trim(), category.trim());
    let candidates = [title, combined.as_str(), keyword, category, config.fallback_query.as_str()];

    let mut queries: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let query = normalize_query(candidate, config.max_query_len);
        if !query.is_empty() && !queries.iter().any(|q| q.eq_ignore_ascii_case(&query)) {
            queries.push(query);
        }
    }
    queries
}
