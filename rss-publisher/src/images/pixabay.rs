use super::ImageProvider;
use crate::config::ImageConfig;
use crate::fetcher::Fetcher;
use crate::types::{ImageHit, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<PixabayHit>,
}

#[derive(Debug, Deserialize)]
struct PixabayHit {
    #[serde(rename = "largeImageURL", default)]
    large_image_url: String,
    #[serde(rename = "pageURL", default)]
    page_url: String,
    #[serde(default)]
    tags: String,
}

impl From<PixabayHit> for ImageHit {
    fn from(hit: PixabayHit) -> Self {
        ImageHit {
            image_url: hit.large_image_url,
            page_url: hit.page_url,
            tags: hit
                .tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Pixabay photo search
pub struct PixabayClient {
    fetcher: Arc<Fetcher>,
    api_key: String,
    config: ImageConfig,
}

impl PixabayClient {
    pub fn new(fetcher: Arc<Fetcher>, api_key: String, config: ImageConfig) -> Self {
        Self {
            fetcher,
            api_key,
            config,
        }
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.api_base)?;
        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("q", query)
            .append_pair("image_type", "photo")
            .append_pair("lang", &self.config.language)
            .append_pair("per_page", &self.config.per_page.to_string())
            .append_pair("safesearch", if self.config.safe_search { "true" } else { "false" });
        Ok(url)
    }
}

#[async_trait]
impl ImageProvider for PixabayClient {
    fn provider_name(&self) -> String {
        "Pixabay".to_string()
    }

    async fn search(&self, query: &str) -> Result<Vec<ImageHit>> {
        let url = self.search_url(query)?;
        let response: SearchResponse = self.fetcher.fetch_json(&url).await?;
        let hits: Vec<ImageHit> = response
            .hits
            .into_iter()
            .filter(|hit| !hit.large_image_url.is_empty())
            .map(ImageHit::from)
            .collect();
        debug!("Pixabay returned {} hits for '{}'", hits.len(), query);
        Ok(hits)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.fetcher.fetch_bytes(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FetchConfig;

    fn client() -> PixabayClient {
        let fetcher = Arc::new(Fetcher::new(FetchConfig::default()).unwrap());
        PixabayClient::new(fetcher, "k3y".into(), ImageConfig::default())
    }

    #[test]
    fn search_url_carries_filters() {
        let url = client().search_url("Gadget X IT").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(url.host_str(), Some("pixabay.com"));
        assert!(pairs.contains(&("q".into(), "Gadget X IT".into())));
        assert!(pairs.contains(&("lang".into(), "de".into())));
        assert!(pairs.contains(&("per_page".into(), "20".into())));
        assert!(pairs.contains(&("safesearch".into(), "true".into())));
        assert!(pairs.contains(&("image_type".into(), "photo".into())));
    }

    #[test]
    fn hits_map_to_image_hits() {
        let response: SearchResponse = serde_json::from_str(
            r#"{"total":1,"totalHits":1,"hits":[{"id":1,"previewURL":"https://cdn.pixabay.com/p_150.jpg",
            "largeImageURL":"https://pixabay.com/get/p_1280.jpg","pageURL":"https://pixabay.com/photos/p-1/",
            "tags":"smartphone, mobile ,  phone"}]}"#,
        )
        .unwrap();
        let hit: ImageHit = response.hits.into_iter().next().unwrap().into();
        assert_eq!(hit.image_url, "https://pixabay.com/get/p_1280.jpg");
        assert_eq!(hit.page_url, "https://pixabay.com/photos/p-1/");
        assert_eq!(hit.tags, vec!["smartphone", "mobile", "phone"]);
    }
}
