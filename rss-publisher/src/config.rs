use crate::rss_utils::url::is_valid_feed_url;
use crate::types::{FetchConfig, PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Everything a run needs apart from secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub feeds_file: PathBuf,
    /// Directory holding the two ledger files.
    pub state_dir: PathBuf,
    pub max_entries_per_feed: usize,
    pub post_delay_secs: u64,
    pub media_delay_secs: u64,
    pub dedup_by_content_hash: bool,
    pub fetch: FetchConfig,
    pub completion: CompletionConfig,
    pub images: ImageConfig,
    pub categories: CategoryTable,
    pub post: PostConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feeds_file: PathBuf::from("rss_feeds.txt"),
            state_dir: PathBuf::from("."),
            max_entries_per_feed: 10,
            post_delay_secs: 10,
            media_delay_secs: 10,
            dedup_by_content_hash: true,
            fetch: FetchConfig::default(),
            completion: CompletionConfig::default(),
            images: ImageConfig::default(),
            categories: CategoryTable::default(),
            post: PostConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.categories.entries.is_empty() {
            return Err(PipelineError::config("category table is empty"));
        }
        if self.categories.lookup(&self.categories.default).is_none() {
            return Err(PipelineError::config(format!(
                "default category '{}' is not in the category table",
                self.categories.default
            )));
        }
        if self.images.max_query_len == 0 {
            return Err(PipelineError::config("images.max_query_len must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    /// Upper bound on sentences asked for in the rewritten body.
    pub target_sentences: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_tokens: 1500,
            system_prompt: "Du bist ein moderner, deutschsprachiger Tech-Redakteur.".to_string(),
            target_sentences: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    pub api_base: String,
    pub language: String,
    pub per_page: u32,
    pub safe_search: bool,
    pub max_query_len: usize,
    pub relevance_check: bool,
    pub max_relevance_checks: usize,
    pub fallback_query: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: "https://pixabay.com/api/".to_string(),
            language: "de".to_string(),
            per_page: 20,
            safe_search: true,
            max_query_len: 100,
            relevance_check: false,
            max_relevance_checks: 3,
            fallback_query: "Technologie".to_string(),
        }
    }
}

/// Category name to CMS category id, plus the name used when a reply names none of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryTable {
    pub entries: BTreeMap<String, u64>,
    pub default: String,
}

impl Default for CategoryTable {
    fn default() -> Self {
        let entries = [("Gaming", 2), ("IT", 3), ("Mobile", 4), ("Creator", 5)]
            .into_iter()
            .map(|(name, id)| (name.to_string(), id))
            .collect();
        Self {
            entries,
            default: "IT".to_string(),
        }
    }
}

impl CategoryTable {
    /// Case-insensitive lookup returning the canonical name and its id.
    pub fn lookup(&self, name: &str) -> Option<(&str, u64)> {
        let name = name.trim();
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(candidate, id)| (candidate.as_str(), *id))
    }

    /// Canonical category name for `name`, or the default.
    pub fn canonical(&self, name: &str) -> String {
        match self.lookup(name) {
            Some((canonical, _)) => canonical.to_string(),
            None => {
                debug!("Unknown category '{}', using '{}'", name, self.default);
                self.default.clone()
            }
        }
    }

    pub fn id_for(&self, name: &str) -> u64 {
        self.lookup(name)
            .or_else(|| self.lookup(&self.default))
            .map(|(_, id)| id)
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Publish,
    Draft,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Publish => "publish",
            PostStatus::Draft => "draft",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostConfig {
    pub status: PostStatus,
    pub newsletter_url: Option<String>,
    pub newsletter_label: String,
    pub share_links: bool,
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            status: PostStatus::Publish,
            newsletter_url: None,
            newsletter_label: "Jetzt Newsletter abonnieren!".to_string(),
            share_links: true,
        }
    }
}

/// Secrets read from the environment (and `.env`).
#[derive(Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub openai_org: Option<String>,
    pub wp_url: String,
    pub wp_user: String,
    pub wp_app_password: String,
    pub pixabay_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_org", &self.openai_org)
            .field("wp_url", &self.wp_url)
            .field("wp_user", &self.wp_user)
            .field("pixabay", &self.pixabay_api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            optional(key).ok_or_else(|| PipelineError::config(format!("missing required environment variable {}", key)))
        };

        Ok(Self {
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_org: optional("OPENAI_ORG"),
            wp_url: required("WP_URL")?.trim_end_matches('/').to_string(),
            wp_user: required("WP_USER")?,
            wp_app_password: required("WP_APP_PASSWORD")?,
            pixabay_api_key: optional("PIXABAY_API_KEY"),
        })
    }
}

/// Read the newline-delimited feed list. `#` lines and blanks are ignored.
pub fn load_feed_urls(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!("cannot read feed list {}: {}", path.display(), e))
    })?;
    Ok(parse_feed_list(&raw))
}

pub fn parse_feed_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| {
            let valid = is_valid_feed_url(line);
            if !valid {
                warn!("Ignoring invalid feed URL: {}", line);
            }
            valid
        })
        .map(str::to_string)
        .collect()
}
