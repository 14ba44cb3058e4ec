use crate::config::{CategoryTable, CompletionConfig};
use crate::llm_adapter::{CompletionClient, CompletionRequest};
use crate::rss_utils::text::extract_text_from_html;
use crate::types::{FeedEntry, PipelineError, RewriteResult};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Replies with fewer non-empty lines are rejected outright.
pub const MIN_REPLY_LINES: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("completion reply too short ({lines} non-empty lines)")]
    TooShort { lines: usize },

    #[error("completion reply has no body text")]
    EmptyBody,

    #[error("completion call failed: {0}")]
    UpstreamFailure(#[from] PipelineError),
}

fn category_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Kategorie:\s*(.*?)\]").expect("valid category regex"))
}

fn keyword_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Schlagwort:\s*(.*?)\]").expect("valid keyword regex"))
}

const TITLE_TRIM: &[char] = &['*', '"', '\'', '`', '[', ']', '#'];

/// Turns a feed entry into a German article through the completion service.
pub struct ContentRewriter {
    client: Arc<dyn CompletionClient>,
    config: CompletionConfig,
    categories: CategoryTable,
}

impl ContentRewriter {
    pub fn new(client: Arc<dyn CompletionClient>, config: CompletionConfig, categories: CategoryTable) -> Self {
        Self {
            client,
            config,
            categories,
        }
    }

    pub async fn rewrite(&self, entry: &FeedEntry) -> Result<RewriteResult, RewriteError> {
        let request = CompletionRequest {
            system: self.config.system_prompt.clone(),
            user: self.build_prompt(entry),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let reply = self.client.complete(&request).await?;
        debug!("Completion output:\n{}", reply);

        let result = parse_reply(&reply, &self.categories)?;
        info!(
            category = %result.category,
            keyword = %result.focus_keyword,
            "Rewrote '{}' as '{}'",
            entry.title,
            result.german_title
        );
        Ok(result)
    }

    pub fn build_prompt(&self, entry: &FeedEntry) -> String {
        let summary = extract_text_from_html(&html_escape::decode_html_entities(&entry.summary));
        let title = html_escape::decode_html_entities(entry.title.trim());
        format!(
            "Fasse die folgende News auf maximal {sentences} Sätze knackig zusammen. \
             Gib mir einen passenden deutschen Titel als erste Zeile und übernimm Produkt-, Firmen- und \
             Personennamen unverändert. Wähle genau eine Kategorie ({categories}) und ein SEO-Schlagwort, \
             das du im Text mehrfach verwendest. Beende die Antwort mit den zwei Zeilen \
             [Kategorie: ...] und [Schlagwort: ...]. Schreibe spannend, deutsch und mit Mehrwert für \
             Tech-affine Leser:\n\n{title}\n{summary}",
            sentences = self.config.target_sentences,
            categories = self.categories.names().join(", "),
        )
    }
}

/// Parse a completion reply into a typed result.
///
/// The first non-empty line is the title. Category and keyword come from the
/// first `[Kategorie: …]` / `[Schlagwort: …]` in the remaining lines; every
/// tag occurrence is stripped from the body.
pub fn parse_reply(reply: &str, categories: &CategoryTable) -> Result<RewriteResult, RewriteError> {
    let lines: Vec<&str> = reply.lines().filter(|line| !line.trim().is_empty()).collect();
    if lines.len() < MIN_REPLY_LINES {
        return Err(RewriteError::TooShort { lines: lines.len() });
    }

    let german_title = lines[0]
        .trim()
        .trim_matches(|c: char| c.is_whitespace() || TITLE_TRIM.contains(&c))
        .to_string();
    let rest = lines[1..].join("\n");

    let category_value = first_capture(category_tag(), &rest);
    let focus_keyword = first_capture(keyword_tag(), &rest).unwrap_or_default();
    let category = categories.canonical(category_value.as_deref().unwrap_or(""));

    let body = category_tag().replace_all(&rest, "");
    let body = keyword_tag().replace_all(&body, "");
    // Bracket residue is only trimmed from the ends of the whole block.
    let body = body.trim_matches(|c: char| c.is_whitespace() || c == '[' || c == ']');

    let body_paragraphs: Vec<String> = body
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().any(char::is_alphanumeric))
        .map(str::to_string)
        .collect();

    if body_paragraphs.is_empty() {
        return Err(RewriteError::EmptyBody);
    }

    Ok(RewriteResult {
        german_title,
        body_paragraphs,
        category,
        focus_keyword,
    })
}

fn first_capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

/// One escaped `<p>` per non-blank line, in order.
pub fn to_html_paragraphs(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| format!("<p>{}</p>", html_escape::encode_text(line)))
        .collect()
}
