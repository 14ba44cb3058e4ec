use anyhow::Context;
use clap::Parser;
use rss_publisher::config::{load_feed_urls, PostStatus};
use rss_publisher::images::{ImageProvider, LlmRelevanceChecker, PixabayClient};
use rss_publisher::{
    CompletionClient, ContentRewriter, Credentials, DedupLedger, FeedSource, Fetcher, ImageResolver,
    OpenAiCompletionClient, PipelineConfig, PipelineSettings, Publisher, PublishingPipeline, RssFeedSource,
    RunContext, WordPressClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Rewrites feed entries into German articles and publishes them to WordPress
#[derive(Parser, Debug)]
#[command(name = "rss-publisher", version, about)]
struct Cli {
    /// Path to the TOML config file (missing file means defaults)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Feed list file, one URL per line
    #[arg(long)]
    feeds: Option<PathBuf>,

    /// Directory holding posted_titles.txt and posted_hashes.txt
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Maximum entries taken from each feed
    #[arg(long)]
    max_entries: Option<usize>,

    /// Create drafts instead of published posts
    #[arg(long)]
    draft: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    if let Some(feeds) = cli.feeds {
        config.feeds_file = feeds;
    }
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    if let Some(max_entries) = cli.max_entries {
        config.max_entries_per_feed = max_entries;
    }
    if cli.draft {
        config.post.status = PostStatus::Draft;
    }

    let credentials = Credentials::from_env().context("missing credentials")?;
    let feed_urls = load_feed_urls(&config.feeds_file)?;
    info!("Starting rss-publisher with {} feeds", feed_urls.len());

    let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);

    let completion: Arc<dyn CompletionClient> = Arc::new(OpenAiCompletionClient::new(
        &config.completion,
        config.fetch.clone(),
        credentials.openai_api_key.clone(),
        credentials.openai_org.clone(),
    )?);

    let image_provider: Option<Arc<dyn ImageProvider>> = match &credentials.pixabay_api_key {
        Some(key) => Some(Arc::new(PixabayClient::new(
            fetcher.clone(),
            key.clone(),
            config.images.clone(),
        ))),
        None => {
            warn!("PIXABAY_API_KEY not set, posts will go out without images");
            None
        }
    };

    let mut images = ImageResolver::new(image_provider.clone(), config.images.clone());
    if config.images.relevance_check {
        images = images.with_relevance_checker(Arc::new(LlmRelevanceChecker::new(
            completion.clone(),
            &config.completion,
        )));
    }

    let rewriter = ContentRewriter::new(completion, config.completion.clone(), config.categories.clone());
    let cms = Arc::new(WordPressClient::new(&credentials, config.fetch.clone())?);
    let publisher = Publisher::new(
        cms,
        image_provider,
        config.categories.clone(),
        config.post.clone(),
        Duration::from_secs(config.media_delay_secs),
    );

    let pipeline = PublishingPipeline::new(
        rewriter,
        images,
        publisher,
        PipelineSettings {
            max_entries_per_feed: config.max_entries_per_feed,
            post_delay: Duration::from_secs(config.post_delay_secs),
            dedup_by_content_hash: config.dedup_by_content_hash,
        },
    );

    let mut sources: Vec<Box<dyn FeedSource>> = feed_urls
        .into_iter()
        .map(|url| Box::new(RssFeedSource::new(url, fetcher.clone())) as Box<dyn FeedSource>)
        .collect();

    let ledger = DedupLedger::load(&config.state_dir)?;
    let mut ctx = RunContext::new(ledger);
    pipeline.run(&mut sources, &mut ctx).await?;
    Ok(())
}
