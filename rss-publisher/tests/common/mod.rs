#![allow(dead_code)]

use async_trait::async_trait;
use rss_publisher::cms::{CmsClient, CreatedPost, MediaUpload, PostPayload, TagRef};
use rss_publisher::config::{CategoryTable, CompletionConfig, ImageConfig, PostConfig};
use rss_publisher::images::ImageProvider;
use rss_publisher::types::*;
use rss_publisher::{
    ContentRewriter, DedupLedger, FeedSource, ImageResolver, MockCompletionClient, PipelineSettings, Publisher,
    PublishingPipeline, RunContext,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub const GADGET_TITLE: &str = "Foo Launches Gadget X";
pub const GADGET_SUMMARY: &str = "Foo today announced Gadget X, a new widget...";
pub const GADGET_LINK: &str = "https://news.example.com/foo-gadget-x";
pub const GADGET_REPLY: &str =
    "Foo stellt Gadget X vor\nFoo hat heute Gadget X vorgestellt...\n[Kategorie: IT]\n[Schlagwort: Gadget X]";

pub fn gadget_entry() -> FeedEntry {
    FeedEntry::new(GADGET_TITLE, GADGET_SUMMARY, GADGET_LINK)
}

/// Well-formed reply for an arbitrary title.
pub fn reply_for(title: &str, category: &str, keyword: &str) -> String {
    format!(
        "{}\nErster Absatz über {}.\nZweiter Absatz.\n[Kategorie: {}]\n[Schlagwort: {}]",
        title, keyword, category, keyword
    )
}

pub fn image_hit(name: &str) -> ImageHit {
    ImageHit {
        image_url: format!("https://cdn.pixabay.example/{}_1280.jpg", name),
        page_url: format!("https://pixabay.example/photos/{}/", name),
        tags: vec![name.to_string()],
    }
}

/// In-memory feed
pub struct StaticFeedSource {
    name: String,
    entries: Vec<FeedEntry>,
    fail: bool,
}

impl StaticFeedSource {
    pub fn new(name: &str, entries: Vec<FeedEntry>) -> Self {
        Self {
            name: name.to_string(),
            entries,
            fail: false,
        }
    }

    pub fn unreachable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
            fail: true,
        }
    }

    pub fn boxed(self) -> Box<dyn FeedSource> {
        Box::new(self)
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    fn source_name(&self) -> String {
        self.name.clone()
    }

    async fn pull(&mut self) -> Result<Vec<FeedEntry>> {
        if self.fail {
            return Err(PipelineError::upstream(self.name.clone(), 503, "unreachable"));
        }
        Ok(self.entries.clone())
    }
}

/// Records everything sent to it; posts get ids from 1000 up, tags from 100 up.
#[derive(Default)]
pub struct FakeCms {
    pub tags: Mutex<Vec<TagRef>>,
    pub created_tags: Mutex<Vec<String>>,
    pub posts: Mutex<Vec<PostPayload>>,
    pub media: Mutex<Vec<MediaUpload>>,
    pub reject_posts_with: Mutex<Option<u16>>,
    pub fail_media: Mutex<bool>,
    /// Confirm posts without an id or link, as a 201 with an unreadable body does.
    pub anonymous_posts: Mutex<bool>,
    next_id: AtomicU64,
}

impl FakeCms {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_tag(self: Arc<Self>, id: u64, name: &str) -> Arc<Self> {
        self.tags.lock().unwrap().push(TagRef {
            id,
            name: name.to_string(),
        });
        self
    }

    pub fn reject_posts(&self, status: Option<u16>) {
        *self.reject_posts_with.lock().unwrap() = status;
    }

    pub fn posts(&self) -> Vec<PostPayload> {
        self.posts.lock().unwrap().clone()
    }

    fn next(&self, base: u64) -> u64 {
        base + self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl CmsClient for FakeCms {
    async fn search_tags(&self, query: &str) -> Result<Vec<TagRef>> {
        let query = query.to_lowercase();
        Ok(self
            .tags
            .lock()
            .unwrap()
            .iter()
            .filter(|tag| tag.name.to_lowercase().contains(&query) || query.contains(&tag.name.to_lowercase()))
            .cloned()
            .collect())
    }

    async fn create_tag(&self, name: &str) -> Result<TagRef> {
        let tag = TagRef {
            id: self.next(100),
            name: name.to_string(),
        };
        self.created_tags.lock().unwrap().push(name.to_string());
        self.tags.lock().unwrap().push(tag.clone());
        Ok(tag)
    }

    async fn upload_media(&self, upload: MediaUpload) -> Result<u64> {
        if *self.fail_media.lock().unwrap() {
            return Err(PipelineError::upstream("wordpress", 413, "too large"));
        }
        self.media.lock().unwrap().push(upload);
        Ok(self.next(500))
    }

    async fn create_post(&self, post: &PostPayload) -> Result<CreatedPost> {
        if let Some(status) = *self.reject_posts_with.lock().unwrap() {
            return Err(PipelineError::upstream("wordpress", status, "rejected"));
        }
        self.posts.lock().unwrap().push(post.clone());
        if *self.anonymous_posts.lock().unwrap() {
            return Ok(CreatedPost::default());
        }
        let id = self.next(1000);
        Ok(CreatedPost {
            id: Some(id),
            link: Some(format!("https://blog.example.com/?p={}", id)),
        })
    }
}

/// Image search answering from a fixed query table
#[derive(Default)]
pub struct FakeImages {
    pub hits: HashMap<String, Vec<ImageHit>>,
    pub queries: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<String>>,
}

impl FakeImages {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_hits(query: &str, hits: Vec<ImageHit>) -> Arc<Self> {
        let mut images = Self::default();
        images.hits.insert(query.to_string(), hits);
        Arc::new(images)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageProvider for FakeImages {
    fn provider_name(&self) -> String {
        "fake".to_string()
    }

    async fn search(&self, query: &str) -> Result<Vec<ImageHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.hits.get(query).cloned().unwrap_or_default())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.downloads.lock().unwrap().push(url.to_string());
        Ok(vec![0xFF, 0xD8, 0xFF, 0xE0])
    }
}

pub struct Harness {
    pub completion: Arc<MockCompletionClient>,
    pub cms: Arc<FakeCms>,
    pub images: Arc<FakeImages>,
    pub settings: PipelineSettings,
}

impl Harness {
    pub fn new(completion: MockCompletionClient, cms: Arc<FakeCms>, images: Arc<FakeImages>) -> Self {
        Self {
            completion: Arc::new(completion),
            cms,
            images,
            settings: PipelineSettings {
                max_entries_per_feed: 10,
                post_delay: Duration::ZERO,
                dedup_by_content_hash: true,
            },
        }
    }

    pub fn pipeline(&self) -> PublishingPipeline {
        let categories = CategoryTable::default();
        let rewriter = ContentRewriter::new(self.completion.clone(), CompletionConfig::default(), categories.clone());
        let provider: Arc<dyn ImageProvider> = self.images.clone();
        let images = ImageResolver::new(Some(provider.clone()), ImageConfig::default());
        let publisher = Publisher::new(
            self.cms.clone(),
            Some(provider),
            categories,
            PostConfig::default(),
            Duration::ZERO,
        );
        PublishingPipeline::new(rewriter, images, publisher, self.settings.clone())
    }

    /// One full run against a ledger loaded fresh from `state_dir`.
    pub async fn run(&self, state_dir: &Path, sources: Vec<Box<dyn FeedSource>>) -> Result<RunReport> {
        let mut sources = sources;
        let mut ctx = RunContext::new(DedupLedger::load(state_dir)?);
        self.pipeline().run(&mut sources, &mut ctx).await
    }
}
