use crate::config::Credentials;
use crate::fetcher::{build_client, ensure_success, with_retry};
use crate::types::{FetchConfig, PipelineError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagRef {
    pub id: u64,
    pub name: String,
}

/// Binary media upload.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub filename: String,
    pub content_type: String,
    pub alt_text: String,
    pub bytes: Vec<u8>,
}

/// JSON body of a post creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostPayload {
    pub title: String,
    pub content: String,
    pub status: String,
    pub categories: Vec<u64>,
    pub tags: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured_media: Option<u64>,
}

/// What the CMS reported back for a created post.
///
/// Both fields stay empty when a 201 arrives with an unreadable body; the
/// post exists either way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreatedPost {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub link: Option<String>,
}

/// REST surface of the content-management system
///
/// Only `search_tags` is idempotent and may be retried; the create calls are
/// attempted once.
#[async_trait]
pub trait CmsClient: Send + Sync {
    async fn search_tags(&self, query: &str) -> Result<Vec<TagRef>>;

    async fn create_tag(&self, name: &str) -> Result<TagRef>;

    /// Upload media and return its id.
    async fn upload_media(&self, upload: MediaUpload) -> Result<u64>;

    /// Create a post. Anything other than HTTP 201 is an `Upstream` error.
    async fn create_post(&self, post: &PostPayload) -> Result<CreatedPost>;
}

#[derive(Debug, Deserialize)]
struct WpError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    data: Option<WpErrorData>,
}

#[derive(Debug, Deserialize)]
struct WpErrorData {
    #[serde(default)]
    term_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WpMedia {
    id: u64,
}

/// WordPress REST API client using application-password basic auth
pub struct WordPressClient {
    client: Client,
    fetch: FetchConfig,
    api_root: Url,
    user: String,
    password: String,
}

impl WordPressClient {
    pub fn new(credentials: &Credentials, fetch: FetchConfig) -> Result<Self> {
        let api_root = Url::parse(&format!("{}/wp-json/wp/v2/", credentials.wp_url))?;
        Ok(Self {
            client: build_client(&fetch)?,
            fetch,
            api_root,
            user: credentials.wp_user.clone(),
            password: credentials.wp_app_password.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.api_root.join(path)?)
    }

    async fn get_tags(&self, url: &Url) -> Result<Vec<TagRef>> {
        let response = self
            .client
            .get(url.clone())
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;
        let response = ensure_success("wordpress", response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CmsClient for WordPressClient {
    async fn search_tags(&self, query: &str) -> Result<Vec<TagRef>> {
        let mut url = self.endpoint("tags")?;
        url.query_pairs_mut()
            .append_pair("search", query)
            .append_pair("per_page", "100");
        let url = &url;
        with_retry(&self.fetch, "tag search", move || async move { self.get_tags(url).await }).await
    }

    async fn create_tag(&self, name: &str) -> Result<TagRef> {
        let response = self
            .client
            .post(self.endpoint("tags")?)
            .basic_auth(&self.user, Some(&self.password))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CREATED {
            let tag: TagRef = response.json().await?;
            info!("Created tag '{}' (ID: {})", tag.name, tag.id);
            return Ok(tag);
        }

        let body = response.text().await.unwrap_or_default();
        if let Some(term_id) = existing_term_id(&body) {
            debug!("Tag '{}' already exists as {}", name, term_id);
            return Ok(TagRef {
                id: term_id,
                name: name.to_string(),
            });
        }
        Err(PipelineError::upstream("wordpress", status.as_u16(), body))
    }

    async fn upload_media(&self, upload: MediaUpload) -> Result<u64> {
        let mut url = self.endpoint("media")?;
        url.query_pairs_mut().append_pair("alt_text", &upload.alt_text);

        let response = self
            .client
            .post(url)
            .basic_auth(&self.user, Some(&self.password))
            .header(
                reqwest::header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", upload.filename),
            )
            .header(reqwest::header::CONTENT_TYPE, upload.content_type)
            .body(upload.bytes)
            .send()
            .await?;

        let media: WpMedia = require_created(response).await?.json().await?;
        info!("Uploaded media {} (ID: {})", upload.filename, media.id);
        Ok(media.id)
    }

    async fn create_post(&self, post: &PostPayload) -> Result<CreatedPost> {
        let response = self
            .client
            .post(self.endpoint("posts")?)
            .basic_auth(&self.user, Some(&self.password))
            .json(post)
            .send()
            .await?;

        let response = require_created(response).await?;
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<CreatedPost>(&body) {
            Ok(created) => Ok(created),
            Err(e) => {
                warn!("Post created but the response body could not be decoded: {}", e);
                Ok(CreatedPost::default())
            }
        }
    }
}

/// Only 201 counts as created; any other status carries the body as message.
async fn require_created(response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::CREATED {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(PipelineError::upstream("wordpress", status.as_u16(), message))
}

fn existing_term_id(body: &str) -> Option<u64> {
    let error: WpError = serde_json::from_str(body).ok()?;
    if error.code != "term_exists" {
        return None;
    }
    error.data?.term_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn credentials() -> Credentials {
        Credentials {
            openai_api_key: "sk".into(),
            openai_org: None,
            wp_url: "https://blog.example.com".into(),
            wp_user: "bot".into(),
            wp_app_password: "pw".into(),
            pixabay_api_key: None,
        }
    }

    #[test]
    fn endpoints_resolve_under_api_root() {
        let client = WordPressClient::new(&credentials(), FetchConfig::default()).unwrap();
        assert_eq!(
            client.endpoint("posts").unwrap().as_str(),
            "https://blog.example.com/wp-json/wp/v2/posts"
        );
    }

    #[test]
    fn term_exists_yields_existing_id() {
        let body = r#"{"code":"term_exists","message":"A term with the name provided already exists.","data":{"status":400,"term_id":42}}"#;
        assert_eq!(existing_term_id(body), Some(42));
        assert_eq!(existing_term_id(r#"{"code":"rest_forbidden","data":{"status":403}}"#), None);
        assert_eq!(existing_term_id("<html>"), None);
    }

    #[test]
    fn post_payload_omits_missing_media() {
        let payload = PostPayload {
            title: "Titel".into(),
            content: "<p>x</p>".into(),
            status: "draft".into(),
            categories: vec![3],
            tags: vec![],
            featured_media: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("featured_media").is_none());
        assert_eq!(json["categories"], serde_json::json!([3]));
    }

    /// Answers exactly one request with a canned response and hands back the raw request.
    fn serve_once(status: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (base, handle)
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + body_len {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn client_for(base: &str) -> WordPressClient {
        let mut creds = credentials();
        creds.wp_url = base.to_string();
        let mut client = WordPressClient::new(&creds, FetchConfig::default()).unwrap();
        client.client = Client::builder().no_proxy().build().unwrap();
        client
    }

    fn payload() -> PostPayload {
        PostPayload {
            title: "Foo stellt Gadget X vor".into(),
            content: "<p>Foo hat heute Gadget X vorgestellt...</p>".into(),
            status: "publish".into(),
            categories: vec![2],
            tags: vec![],
            featured_media: None,
        }
    }

    #[tokio::test]
    async fn created_post_is_accepted() {
        let (base, server) = serve_once("201 Created", r#"{"id":1234,"link":"https://blog.example.com/?p=1234"}"#);
        let created = client_for(&base).create_post(&payload()).await.unwrap();
        assert_eq!(created.id, Some(1234));
        assert_eq!(created.link.as_deref(), Some("https://blog.example.com/?p=1234"));

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /wp-json/wp/v2/posts"));
        assert!(request.contains("Foo stellt Gadget X vor"));
    }

    #[tokio::test]
    async fn created_post_with_unreadable_body_still_counts() {
        let (base, server) = serve_once("201 Created", "<html>ok</html>");
        let created = client_for(&base).create_post(&payload()).await.unwrap();
        assert_eq!(created, CreatedPost::default());
        server.join().unwrap();
    }

    #[tokio::test]
    async fn ok_status_is_not_created() {
        let (base, server) = serve_once("200 OK", r#"{"id":1234}"#);
        let err = client_for(&base).create_post(&payload()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Upstream { status: 200, .. }));
        server.join().unwrap();
    }

    #[tokio::test]
    async fn existing_term_is_reused_on_tag_create() {
        let (base, server) = serve_once(
            "400 Bad Request",
            r#"{"code":"term_exists","message":"A term with the name provided already exists.","data":{"status":400,"term_id":42}}"#,
        );
        let tag = client_for(&base).create_tag("Gadget X").await.unwrap();
        assert_eq!(
            tag,
            TagRef {
                id: 42,
                name: "Gadget X".to_string()
            }
        );

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /wp-json/wp/v2/tags"));
    }

    #[tokio::test]
    async fn tag_create_rejection_without_term_is_an_error() {
        let (base, server) = serve_once("403 Forbidden", r#"{"code":"rest_cannot_create","data":{"status":403}}"#);
        let err = client_for(&base).create_tag("Gadget X").await.unwrap_err();
        assert!(matches!(err, PipelineError::Upstream { status: 403, .. }));
        server.join().unwrap();
    }
}
