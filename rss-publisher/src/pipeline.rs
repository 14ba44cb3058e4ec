use crate::images::ImageResolver;
use crate::ledger::{DedupKeys, DedupLedger};
use crate::publisher::Publisher;
use crate::rewriter::ContentRewriter;
use crate::traits::FeedSource;
use crate::types::{FeedEntry, PublishRecord, Result, RunReport, Stage};
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-run state owned by the orchestrator: the ledger and the counters.
pub struct RunContext {
    pub ledger: DedupLedger,
    pub report: RunReport,
}

impl RunContext {
    pub fn new(ledger: DedupLedger) -> Self {
        Self {
            ledger,
            report: RunReport::new(Uuid::new_v4()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.report.run_id
    }

    /// Either key present means the entry was already handled.
    pub fn is_duplicate(&self, keys: &DedupKeys, check_hash: bool) -> bool {
        self.ledger.contains_title(&keys.title_key)
            || (check_hash && self.ledger.contains_hash(&keys.content_hash))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_entries_per_feed: usize,
    pub post_delay: Duration,
    pub dedup_by_content_hash: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_entries_per_feed: 10,
            post_delay: Duration::from_secs(10),
            dedup_by_content_hash: true,
        }
    }
}

/// Drives feed entries one at a time through rewrite, image and publish.
pub struct PublishingPipeline {
    rewriter: ContentRewriter,
    images: ImageResolver,
    publisher: Publisher,
    settings: PipelineSettings,
}

impl PublishingPipeline {
    pub fn new(
        rewriter: ContentRewriter,
        images: ImageResolver,
        publisher: Publisher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            rewriter,
            images,
            publisher,
            settings,
        }
    }

    /// Process every source in order. Only ledger persistence errors abort the run.
    pub async fn run(&self, sources: &mut [Box<dyn FeedSource>], ctx: &mut RunContext) -> Result<RunReport> {
        let span = info_span!("run", run_id = %ctx.run_id());
        self.run_sources(sources, ctx).instrument(span).await
    }

    async fn run_sources(&self, sources: &mut [Box<dyn FeedSource>], ctx: &mut RunContext) -> Result<RunReport> {
        let started = Instant::now();
        info!(
            "Starting run at {} over {} feeds ({} titles, {} hashes already recorded)",
            ctx.report.started_at.to_rfc3339(),
            sources.len(),
            ctx.ledger.titles_len(),
            ctx.ledger.hashes_len()
        );

        for source in sources.iter_mut() {
            self.run_source(source.as_mut(), ctx).await?;
        }

        ctx.report.duration = started.elapsed();
        let report = &ctx.report;
        info!(
            "Health: success={} error={} skipped={} duration={}s",
            report.published,
            report.failed,
            report.skipped(),
            report.duration.as_secs()
        );
        Ok(report.clone())
    }

    async fn run_source(&self, source: &mut dyn FeedSource, ctx: &mut RunContext) -> Result<()> {
        let entries = match source.pull().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(feed = %source.source_name(), "Failed to read feed: {}", e);
                return Ok(());
            }
        };
        ctx.report.feeds += 1;

        let feed = source.source_name();
        if entries.is_empty() {
            warn!(feed = %feed, "Feed has no entries");
            return Ok(());
        }
        info!(feed = %feed, "Processing up to {} of {} entries", self.settings.max_entries_per_feed, entries.len());

        for entry in entries.iter().take(self.settings.max_entries_per_feed) {
            let span = info_span!("entry", feed = %feed, title = %entry.title);
            let record = self.process_entry(entry, ctx).instrument(span).await?;
            ctx.report.record(&record);

            if matches!(record, PublishRecord::Published { .. }) && !self.settings.post_delay.is_zero() {
                tokio::time::sleep(self.settings.post_delay).await;
            }
        }
        Ok(())
    }

    /// Run one entry through the state machine.
    ///
    /// Stage failures come back as `PublishRecord::Failed`; `Err` means the
    /// ledger could not be written.
    pub async fn process_entry(&self, entry: &FeedEntry, ctx: &mut RunContext) -> Result<PublishRecord> {
        if let Some(field) = entry.missing_field() {
            warn!("Skipping entry without {}", field);
            return Ok(PublishRecord::SkippedMalformed { field });
        }

        let keys = DedupKeys::from_entry(entry);
        if ctx.is_duplicate(&keys, self.settings.dedup_by_content_hash) {
            info!("Already processed: {}", keys.title_key);
            return Ok(PublishRecord::SkippedDuplicate);
        }

        let rewrite = match self.rewriter.rewrite(entry).await {
            Ok(rewrite) => rewrite,
            Err(e) => {
                warn!(stage = %Stage::Rewrite, "Rewrite failed: {}", e);
                return Ok(PublishRecord::Failed {
                    stage: Stage::Rewrite,
                    reason: e.to_string(),
                });
            }
        };

        let image = self
            .images
            .resolve(&rewrite.focus_keyword, &rewrite.category, &rewrite.german_title)
            .await;

        let outcome = match self.publisher.publish(&rewrite, entry, &image).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(stage = %Stage::Publish, "Publishing failed: {}", e);
                return Ok(PublishRecord::Failed {
                    stage: Stage::Publish,
                    reason: e.to_string(),
                });
            }
        };

        ctx.ledger.record_title(&keys.title_key)?;
        ctx.ledger.record_hash(&keys.content_hash)?;

        Ok(PublishRecord::Published {
            post_id: outcome.post_id,
        })
    }
}
