use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// One item read from a feed, before any processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub summary: String,
    pub link: String,
}

impl FeedEntry {
    pub fn new(title: impl Into<String>, summary: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            link: link.into(),
        }
    }

    /// Name of the first required field that is blank, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.title.trim().is_empty() {
            Some("title")
        } else if self.summary.trim().is_empty() {
            Some("summary")
        } else if self.link.trim().is_empty() {
            Some("link")
        } else {
            None
        }
    }
}

/// Parsed completion reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteResult {
    pub german_title: String,
    pub body_paragraphs: Vec<String>,
    pub category: String,
    pub focus_keyword: String,
}

/// A single candidate returned by the image provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHit {
    pub image_url: String,
    pub page_url: String,
    pub tags: Vec<String>,
}

/// Outcome of image resolution. `attribution_link` is only set together with `image_url`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageResult {
    pub image_url: Option<String>,
    pub attribution_link: Option<String>,
}

impl ImageResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn found(hit: &ImageHit) -> Self {
        Self {
            image_url: Some(hit.image_url.clone()),
            attribution_link: Some(hit.page_url.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image_url.is_none()
    }
}

/// Stage at which an entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rewrite,
    Publish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Rewrite => write!(f, "rewrite"),
            Stage::Publish => write!(f, "publish"),
        }
    }
}

/// Result of one orchestration pass over a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishRecord {
    Published { post_id: Option<u64> },
    SkippedDuplicate,
    SkippedMalformed { field: &'static str },
    Failed { stage: Stage, reason: String },
}

/// Aggregate counters for one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub feeds: usize,
    pub published: usize,
    pub skipped_duplicate: usize,
    pub skipped_malformed: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            feeds: 0,
            published: 0,
            skipped_duplicate: 0,
            skipped_malformed: 0,
            failed: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn record(&mut self, record: &PublishRecord) {
        match record {
            PublishRecord::Published { .. } => self.published += 1,
            PublishRecord::SkippedDuplicate => self.skipped_duplicate += 1,
            PublishRecord::SkippedMalformed { .. } => self.skipped_malformed += 1,
            PublishRecord::Failed { .. } => self.failed += 1,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped_duplicate + self.skipped_malformed
    }

    pub fn processed(&self) -> usize {
        self.published + self.skipped() + self.failed
    }
}

/// HTTP settings shared by every outbound client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_body_size_mb: usize,
    /// Minimum gap between two requests to the same host.
    pub min_host_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "RSS-Publisher/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 2,
            max_body_size_mb: 10,
            min_host_interval_ms: 1000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned HTTP {status}: {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Malformed response from {service}: {message}")]
    MalformedResponse { service: String, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Response body exceeds limit: {size_mb}MB")]
    BodyTooLarge { size_mb: usize },

    #[error("Ledger write to {} failed: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("General error: {0}")]
    General(String),
}

impl PipelineError {
    pub fn upstream(service: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            status,
            message: message.into(),
        }
    }

    pub fn malformed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Errors worth another attempt within the same run.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Only ledger failures stop the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
