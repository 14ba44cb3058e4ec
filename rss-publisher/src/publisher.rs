use crate::cms::{CmsClient, MediaUpload, PostPayload, TagRef};
use crate::config::{CategoryTable, PostConfig};
use crate::images::ImageProvider;
use crate::ledger::normalize_title;
use crate::rewriter::to_html_paragraphs;
use crate::rss_utils::text::slugify;
use crate::rss_utils::url::file_name;
use crate::types::{FeedEntry, ImageResult, PipelineError, RewriteResult};
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::sync::Arc;
use std::time::Duration;
use strsim::jaro_winkler;
use tracing::{debug, info, warn};

/// Minimum Jaro-Winkler similarity for reusing an existing tag.
pub const TAG_SIMILARITY_THRESHOLD: f64 = 0.9;

const FILENAME_MAX_LEN: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("CMS rejected post with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("post submission failed: {0}")]
    Transport(PipelineError),
}

impl From<PipelineError> for PublishError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Upstream { status, message, .. } => PublishError::Rejected { status, message },
            other => PublishError::Transport(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// `None` when the CMS confirmed creation without a readable id.
    pub post_id: Option<u64>,
    pub link: Option<String>,
    pub category_id: u64,
    pub tag_id: Option<u64>,
    pub featured_media: Option<u64>,
}

/// Turns a rewritten entry into a CMS post.
///
/// Tag and media problems only degrade the post; the post submission itself
/// is the single step that can fail the entry.
pub struct Publisher {
    cms: Arc<dyn CmsClient>,
    images: Option<Arc<dyn ImageProvider>>,
    categories: CategoryTable,
    post: PostConfig,
    media_delay: Duration,
}

impl Publisher {
    pub fn new(
        cms: Arc<dyn CmsClient>,
        images: Option<Arc<dyn ImageProvider>>,
        categories: CategoryTable,
        post: PostConfig,
        media_delay: Duration,
    ) -> Self {
        Self {
            cms,
            images,
            categories,
            post,
            media_delay,
        }
    }

    pub async fn publish(
        &self,
        rewrite: &RewriteResult,
        entry: &FeedEntry,
        image: &ImageResult,
    ) -> Result<PublishOutcome, PublishError> {
        let category_id = self.categories.id_for(&rewrite.category);
        let tag_id = self.resolve_tag(&rewrite.focus_keyword).await;
        let featured_media = self.attach_media(image, &rewrite.german_title).await;

        let attribution = featured_media.and(image.attribution_link.as_deref());
        let content = build_body(rewrite, entry, attribution, &self.post);

        let payload = PostPayload {
            title: rewrite.german_title.clone(),
            content,
            status: self.post.status.as_str().to_string(),
            categories: vec![category_id],
            tags: tag_id.into_iter().collect(),
            featured_media,
        };

        let created = self.cms.create_post(&payload).await?;
        info!(
            post_id = ?created.id,
            "Published '{}' ({} / {}) {}",
            rewrite.german_title,
            rewrite.category,
            rewrite.focus_keyword,
            created.link.as_deref().unwrap_or("")
        );

        Ok(PublishOutcome {
            post_id: created.id,
            link: created.link,
            category_id,
            tag_id,
            featured_media,
        })
    }

    /// Existing tag by exact then fuzzy name, else a new one. Failures yield `None`.
    pub async fn resolve_tag(&self, keyword: &str) -> Option<u64> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return None;
        }

        let existing = match self.cms.search_tags(keyword).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Tag search for '{}' failed: {}", keyword, e);
                return None;
            }
        };

        if let Some(tag) = best_tag_match(keyword, &existing) {
            debug!("Reusing tag '{}' (ID: {}) for '{}'", tag.name, tag.id, keyword);
            return Some(tag.id);
        }

        match self.cms.create_tag(keyword).await {
            Ok(tag) => Some(tag.id),
            Err(e) => {
                warn!("Creating tag '{}' failed: {}", keyword, e);
                None
            }
        }
    }

    async fn attach_media(&self, image: &ImageResult, title: &str) -> Option<u64> {
        let (Some(image_url), Some(provider)) = (image.image_url.as_deref(), self.images.as_ref()) else {
            return None;
        };

        let bytes = match provider.download(image_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Image download failed for {}: {}", image_url, e);
                return None;
            }
        };

        let extension = image_extension(image_url);
        let upload = MediaUpload {
            filename: media_filename(title, extension),
            content_type: content_type_for(extension).to_string(),
            alt_text: format!("Bildquelle: {}", image.attribution_link.as_deref().unwrap_or(image_url)),
            bytes,
        };

        match self.cms.upload_media(upload).await {
            Ok(media_id) => {
                if !self.media_delay.is_zero() {
                    tokio::time::sleep(self.media_delay).await;
                }
                Some(media_id)
            }
            Err(e) => {
                warn!("Image upload failed, posting without featured media: {}", e);
                None
            }
        }
    }
}

/// Case-insensitive exact match first, then the most similar name above the threshold.
pub fn best_tag_match<'a>(keyword: &str, tags: &'a [TagRef]) -> Option<&'a TagRef> {
    let wanted = keyword.to_lowercase();
    let name_of = |tag: &TagRef| html_escape::decode_html_entities(&tag.name).to_lowercase();

    if let Some(exact) = tags.iter().find(|tag| name_of(*tag) == wanted) {
        return Some(exact);
    }

    tags.iter()
        .map(|tag| (tag, jaro_winkler(&wanted, &name_of(tag))))
        .filter(|(_, score)| *score >= TAG_SIMILARITY_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(tag, _)| tag)
}

fn image_extension(url: &str) -> &'static str {
    let name = file_name(url).unwrap_or_default().to_lowercase();
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "png",
        Some("gif") => "gif",
        Some("webp") => "webp",
        _ => "jpg",
    }
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

fn media_filename(title: &str, extension: &str) -> String {
    let slug = slugify(title, FILENAME_MAX_LEN);
    let stem = if slug.is_empty() { "bild" } else { slug.as_str() };
    format!("{}.{}", stem, extension)
}

/// Post HTML: paragraphs, source block, optional image credit, newsletter and share links.
pub fn build_body(
    rewrite: &RewriteResult,
    entry: &FeedEntry,
    image_attribution: Option<&str>,
    post: &PostConfig,
) -> String {
    let link = entry.link.trim();
    let mut html = to_html_paragraphs(&rewrite.body_paragraphs.join("\n"));

    html.push_str(&format!(
        "<p><strong>Quelle:</strong> <a href=\"{}\" target=\"_blank\" rel=\"noopener\">{}</a></p>",
        encode_double_quoted_attribute(link),
        encode_text(&normalize_title(&entry.title))
    ));

    if let Some(attribution) = image_attribution {
        html.push_str(&format!(
            "<p><strong>Bildquelle:</strong> <a href=\"{}\" target=\"_blank\" rel=\"noopener\">Bildquelle</a></p>",
            encode_double_quoted_attribute(attribution)
        ));
    }

    if let Some(newsletter) = post.newsletter_url.as_deref() {
        html.push_str(&format!(
            "<div style=\"margin-top:24px;\"><a href=\"{}\" target=\"_blank\">{}</a></div>",
            encode_double_quoted_attribute(newsletter),
            encode_text(&post.newsletter_label)
        ));
    }

    if post.share_links {
        let text: String =
            url::form_urlencoded::byte_serialize(format!("{} - {}", rewrite.german_title, link).as_bytes()).collect();
        html.push_str(&format!(
            "<div style=\"margin-top:8px;\">Teile diesen Artikel: <a href=\"https://twitter.com/intent/tweet?text={}\">Twitter</a></div>",
            text
        ));
    }

    html
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite() -> RewriteResult {
        RewriteResult {
            german_title: "Foo stellt Gadget X vor".into(),
            body_paragraphs: vec!["Foo hat heute Gadget X vorgestellt.".into(), "Mehr <bald>.".into()],
            category: "IT".into(),
            focus_keyword: "Gadget X".into(),
        }
    }

    fn entry() -> FeedEntry {
        FeedEntry::new("Foo &amp; Co Launch Gadget X", "summary", "https://news.example.com/x?a=1&b=2")
    }

    fn tag(id: u64, name: &str) -> TagRef {
        TagRef { id, name: name.into() }
    }

    #[test]
    fn exact_match_beats_fuzzy() {
        let tags = vec![tag(1, "Gadget Xs"), tag(2, "gadget x")];
        assert_eq!(best_tag_match("Gadget X", &tags).map(|t| t.id), Some(2));
    }

    #[test]
    fn fuzzy_match_needs_threshold() {
        let tags = vec![tag(7, "Smartphones"), tag(8, "Tablet")];
        assert_eq!(best_tag_match("Smartphone", &tags).map(|t| t.id), Some(7));
        assert!(best_tag_match("Konsole", &tags).is_none());
    }

    #[test]
    fn escaped_tag_names_match() {
        let tags = vec![tag(3, "AT&amp;T")];
        assert_eq!(best_tag_match("AT&T", &tags).map(|t| t.id), Some(3));
    }

    #[test]
    fn body_has_source_block_and_no_image_credit_without_media() {
        let post = PostConfig {
            share_links: false,
            ..PostConfig::default()
        };
        let html = build_body(&rewrite(), &entry(), None, &post);
        assert!(html.starts_with("<p>Foo hat heute Gadget X vorgestellt.</p><p>Mehr &lt;bald&gt;.</p>"));
        assert!(html.contains(
            "<a href=\"https://news.example.com/x?a=1&amp;b=2\" target=\"_blank\" rel=\"noopener\">Foo &amp; Co Launch Gadget X</a>"
        ));
        assert!(!html.contains("Bildquelle"));
        assert!(!html.contains("twitter.com"));
    }

    #[test]
    fn body_includes_optional_blocks() {
        let post = PostConfig {
            newsletter_url: Some("https://blog.example.com/newsletter/".into()),
            ..PostConfig::default()
        };
        let html = build_body(&rewrite(), &entry(), Some("https://pixabay.com/photos/x"), &post);
        assert!(html.contains("<strong>Bildquelle:</strong> <a href=\"https://pixabay.com/photos/x\""));
        assert!(html.contains("https://blog.example.com/newsletter/"));
        assert!(html.contains("https://twitter.com/intent/tweet?text=Foo+stellt+Gadget+X+vor+-+https%3A%2F%2F"));
    }

    #[test]
    fn media_naming() {
        assert_eq!(image_extension("https://pixabay.com/get/abc_1280.PNG"), "png");
        assert_eq!(image_extension("https://pixabay.com/get/abc"), "jpg");
        assert_eq!(content_type_for("jpg"), "image/jpeg");
        assert_eq!(media_filename("Foo stellt Gadget X vor", "jpg"), "foo-stellt-gadget-x-vor.jpg");
        assert_eq!(media_filename("???", "png"), "bild.png");
    }

    #[test]
    fn upstream_errors_become_rejections() {
        let err: PublishError = PipelineError::upstream("wordpress", 403, "forbidden").into();
        assert!(matches!(err, PublishError::Rejected { status: 403, .. }));
        let err: PublishError = PipelineError::General("socket closed".into()).into();
        assert!(matches!(err, PublishError::Transport(_)));
    }
}
