//! The reqwest-backed [`ReleaseHost`] implementation.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use shelf_core::host::{
    AssetData, AssetUpload, ByteStream, HostError, HostResult, ReleaseData, ReleaseHost, RepoData,
    RepoId,
};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const ACCEPT_JSON: &str = "application/vnd.github+json";
const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("shelf/", env!("CARGO_PKG_VERSION"));

/// A GitHub REST client scoped to one request's credentials.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> HostResult<Self> {
        Self::with_api_base(DEFAULT_API_BASE, token)
    }

    pub fn with_api_base(api_base: impl Into<String>, token: Option<String>) -> HostResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| HostError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            api_base: api_base.into(),
            token,
        })
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header(ACCEPT, ACCEPT_JSON)
            .header(API_VERSION_HEADER, API_VERSION);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> HostResult<Response> {
        let response = self
            .request(builder)
            .send()
            .await
            .map_err(|err| HostError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(HostError::Status {
            status: status.as_u16(),
            message: error_message(&text),
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(&self, builder: RequestBuilder) -> HostResult<T> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|err| HostError::Transport(err.to_string()))
    }

    fn releases_url(&self, repo: &RepoId) -> String {
        format!("{}/repos/{}/{}/releases", self.api_base, repo.owner, repo.name)
    }
}

/// Tags carry `#` and `@`, which must not reach the URL parser raw.
fn encode_tag(tag: &str) -> String {
    url::form_urlencoded::byte_serialize(tag.as_bytes()).collect()
}

/// GitHub error bodies are JSON with a `message` field; anything else is
/// passed through as-is.
fn error_message(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| value.get("message")?.as_str().map(String::from))
        .unwrap_or_else(|| text.trim().to_string())
}

#[derive(Debug, Deserialize)]
struct SearchOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct SearchRepo {
    name: String,
    owner: SearchOwner,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchRepo>,
}

#[async_trait]
impl ReleaseHost for GithubClient {
    async fn release_by_tag(&self, repo: &RepoId, tag: &str) -> HostResult<ReleaseData> {
        let url = format!("{}/tags/{}", self.releases_url(repo), encode_tag(tag));
        self.json(self.http.get(url)).await
    }

    async fn release_by_id(&self, repo: &RepoId, id: u64) -> HostResult<ReleaseData> {
        let url = format!("{}/{id}", self.releases_url(repo));
        self.json(self.http.get(url)).await
    }

    async fn create_release(
        &self,
        repo: &RepoId,
        tag: &str,
        body: Option<&str>,
    ) -> HostResult<ReleaseData> {
        let mut payload = json!({ "tag_name": tag });
        if let Some(body) = body {
            payload["body"] = json!(body);
        }
        self.json(self.http.post(self.releases_url(repo)).json(&payload))
            .await
    }

    async fn update_release_body(&self, repo: &RepoId, id: u64, body: &str) -> HostResult<()> {
        let url = format!("{}/{id}", self.releases_url(repo));
        self.send(self.http.patch(url).json(&json!({ "body": body })))
            .await?;
        Ok(())
    }

    async fn delete_release(&self, repo: &RepoId, id: u64) -> HostResult<()> {
        let url = format!("{}/{id}", self.releases_url(repo));
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn delete_asset(&self, repo: &RepoId, asset_id: u64) -> HostResult<()> {
        let url = format!("{}/assets/{asset_id}", self.releases_url(repo));
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn upload_asset(
        &self,
        repo: &RepoId,
        upload: AssetUpload<'_>,
        stream: ByteStream,
    ) -> HostResult<AssetData> {
        let url = format!(
            "{}/repos/{}/{}/releases/{}/assets?name={}",
            upload.origin,
            repo.owner,
            repo.name,
            upload.release_id,
            encode_tag(upload.filename),
        );
        let builder = self
            .http
            .post(url)
            .header(CONTENT_TYPE, upload.mime_type)
            .header(CONTENT_LENGTH, upload.content_length)
            .body(Body::wrap_stream(stream));
        self.json(builder).await
    }

    async fn search_repositories(&self, query: &str) -> HostResult<Vec<RepoData>> {
        let url = format!("{}/search/repositories", self.api_base);
        let builder = self
            .http
            .get(url)
            .query(&[("q", query), ("sort", "stars"), ("order", "desc")]);
        let response: SearchResponse = self.json(builder).await?;
        Ok(response
            .items
            .into_iter()
            .map(|repo| {
                RepoData {
                    owner: repo.owner.login,
                    name: repo.name,
                }
            })
            .collect())
    }

    async fn list_releases(&self, repo: &RepoId) -> HostResult<Vec<ReleaseData>> {
        let url = format!("{}?per_page=100", self.releases_url(repo));
        self.json(self.http.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_tag() {
        assert_eq!(encode_tag("1.2.13"), "1.2.13");
        assert_eq!(encode_tag("1.2.13#abc123"), "1.2.13%23abc123");
        assert_eq!(encode_tag("1.2.13#abc@pkg#9f8e"), "1.2.13%23abc%40pkg%239f8e");
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"message": "Not Found", "documentation_url": "..."}"#),
            "Not Found"
        );
        assert_eq!(error_message("plain text\n"), "plain text");
        assert_eq!(error_message(""), "");
    }

    #[test]
    fn test_search_response_shape() {
        let json = r#"{
            "total_count": 2,
            "items": [
                {"name": "zlib", "owner": {"login": "alice"}},
                {"name": "zlabc", "owner": {"login": "bob"}}
            ]
        }"#;
        let response: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.items.len(), 2);
        assert_eq!(response.items[0].name, "zlib");
        assert_eq!(response.items[0].owner.login, "alice");
    }

    #[test]
    fn test_client_builds_without_token() {
        assert!(GithubClient::new(None).is_ok());
    }
}
