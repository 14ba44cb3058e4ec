use super::{RelevanceChecker, RelevanceVerdict};
use crate::config::CompletionConfig;
use crate::llm_adapter::{CompletionClient, CompletionRequest};
use crate::types::{ImageHit, PipelineError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Asks the completion service whether an image's tags fit the keyword.
pub struct LlmRelevanceChecker {
    client: Arc<dyn CompletionClient>,
    system_prompt: String,
}

impl LlmRelevanceChecker {
    pub fn new(client: Arc<dyn CompletionClient>, config: &CompletionConfig) -> Self {
        Self {
            client,
            system_prompt: config.system_prompt.clone(),
        }
    }

    fn prompt(keyword: &str, hit: &ImageHit) -> String {
        format!(
            "Passt ein Bild mit den Schlagwörtern \"{}\" zu einem Artikel über \"{}\"? \
             Antworte nur mit JA oder mit NEIN: <besserer Suchbegriff>.",
            hit.tags.join(", "),
            keyword
        )
    }
}

#[async_trait]
impl RelevanceChecker for LlmRelevanceChecker {
    async fn check(&self, keyword: &str, hit: &ImageHit) -> Result<RelevanceVerdict> {
        let request = CompletionRequest {
            system: self.system_prompt.clone(),
            user: Self::prompt(keyword, hit),
            temperature: 0.0,
            max_tokens: 20,
        };
        let reply = self.client.complete(&request).await?;
        parse_verdict(&reply)
    }
}

/// `JA` accepts; `NEIN: <keyword>` rejects and may propose a replacement.
pub fn parse_verdict(reply: &str) -> Result<RelevanceVerdict> {
    let answer = reply.trim().trim_matches(|c: char| c == '"' || c == '*' || c == '`');
    let upper = answer.to_uppercase();

    if upper.starts_with("JA") {
        return Ok(RelevanceVerdict::Match);
    }
    if upper.starts_with("NEIN") {
        let replacement = answer
            .split_once(':')
            .map(|(_, rest)| rest.trim().trim_matches(|c: char| c == '.' || c == '"').trim().to_string())
            .filter(|rest| !rest.is_empty());
        return Ok(RelevanceVerdict::Mismatch { replacement });
    }
    Err(PipelineError::malformed(
        "relevance",
        format!("unexpected answer: {}", answer),
    ))
}
