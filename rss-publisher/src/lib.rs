pub mod types;
pub mod config;
pub mod fetcher;
pub mod parser;
pub mod rss_utils;
pub mod traits;
pub mod sources;
pub mod ledger;
pub mod llm_adapter;
pub mod rewriter;
pub mod images;
pub mod cms;
pub mod publisher;
pub mod pipeline;

pub use types::*;
pub use config::{Credentials, PipelineConfig};
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use traits::FeedSource;
pub use sources::RssFeedSource;
pub use ledger::{DedupKeys, DedupLedger};
pub use llm_adapter::{CompletionClient, MockCompletionClient, OpenAiCompletionClient};
pub use rewriter::{ContentRewriter, RewriteError};
pub use images::{ImageProvider, ImageResolver, RelevanceChecker};
pub use cms::{CmsClient, WordPressClient};
pub use publisher::{PublishError, PublishOutcome, Publisher};
pub use pipeline::{PipelineSettings, PublishingPipeline, RunContext};
