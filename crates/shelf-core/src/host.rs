//! The backing-platform capability boundary.
//!
//! Everything the registry asks of GitHub is expressed through the
//! [`ReleaseHost`] trait: release lookup and creation, body updates, asset
//! upload and deletion, repository search, and release listing. The trait
//! keeps the rest of the crate testable against [`crate::testing::FakeHost`]
//! and keeps the HTTP client out of the core entirely.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::error::RegistryError;

/// Repository coordinates on the backing platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A release as the platform reports it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseData {
    pub id: u64,
    pub tag_name: String,
    pub upload_url: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub assets: Vec<AssetData>,
}

/// A release asset as the platform reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetData {
    pub id: u64,
    pub name: String,
    pub browser_download_url: String,
}

/// A repository hit from the platform's search API, already ranked by the
/// platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoData {
    pub owner: String,
    pub name: String,
}

/// Parameters for a streaming asset upload.
#[derive(Debug)]
pub struct AssetUpload<'a> {
    /// Scheme and host of the platform's upload endpoint.
    pub origin: &'a str,
    pub release_id: u64,
    pub filename: &'a str,
    pub mime_type: &'a str,
    pub content_length: u64,
}

/// Request body bytes, pulled by the uploader at its own pace so inbound
/// backpressure propagates to the client.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Error, Diagnostic, Debug)]
pub enum HostError {
    #[error("HTTP {status}: {message}")]
    #[diagnostic(code(shelf::host::status))]
    Status { status: u16, message: String },

    #[error("transport failure: {0}")]
    #[diagnostic(
        code(shelf::host::transport),
        help("Check connectivity to the backing platform")
    )]
    Transport(String),
}

impl HostError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// GitHub answers 422 when a release already exists for the tag.
    pub fn is_tag_conflict(&self) -> bool {
        self.status() == Some(422)
    }
}

impl From<HostError> for RegistryError {
    /// Backing-store failures that no caller recovers from locally are the
    /// store's fault, not the client's.
    fn from(err: HostError) -> Self {
        RegistryError::BadGateway(err.to_string())
    }
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// The platform operations the registry is built on.
///
/// Implementations must not retry; the single recovery the registry
/// performs (tag-already-exists on create) lives above this boundary.
#[async_trait]
pub trait ReleaseHost: Send + Sync {
    async fn release_by_tag(&self, repo: &RepoId, tag: &str) -> HostResult<ReleaseData>;

    async fn release_by_id(&self, repo: &RepoId, id: u64) -> HostResult<ReleaseData>;

    /// Creates a release at `tag`, implicitly creating the tag itself at
    /// the tip of the default branch when it does not exist.
    async fn create_release(
        &self,
        repo: &RepoId,
        tag: &str,
        body: Option<&str>,
    ) -> HostResult<ReleaseData>;

    async fn update_release_body(&self, repo: &RepoId, id: u64, body: &str) -> HostResult<()>;

    async fn delete_release(&self, repo: &RepoId, id: u64) -> HostResult<()>;

    async fn delete_asset(&self, repo: &RepoId, asset_id: u64) -> HostResult<()>;

    async fn upload_asset(
        &self,
        repo: &RepoId,
        upload: AssetUpload<'_>,
        stream: ByteStream,
    ) -> HostResult<AssetData>;

    /// Repository search, ranked by popularity descending.
    async fn search_repositories(&self, query: &str) -> HostResult<Vec<RepoData>>;

    async fn list_releases(&self, repo: &RepoId) -> HostResult<Vec<ReleaseData>>;
}

/// Decorator that logs every capability call and its outcome.
///
/// Wrapped around the real client when the server is configured to trace
/// platform traffic.
pub struct Traced<H>(pub H);

fn outcome<T>(op: &str, detail: &str, result: &HostResult<T>) {
    match result {
        Ok(_) => debug!("{op} {detail}: ok"),
        Err(err) => debug!("{op} {detail}: {err}"),
    }
}

#[async_trait]
impl<H: ReleaseHost> ReleaseHost for Traced<H> {
    async fn release_by_tag(&self, repo: &RepoId, tag: &str) -> HostResult<ReleaseData> {
        let result = self.0.release_by_tag(repo, tag).await;
        outcome("release_by_tag", &format!("{repo} {tag}"), &result);
        result
    }

    async fn release_by_id(&self, repo: &RepoId, id: u64) -> HostResult<ReleaseData> {
        let result = self.0.release_by_id(repo, id).await;
        outcome("release_by_id", &format!("{repo} {id}"), &result);
        result
    }

    async fn create_release(
        &self,
        repo: &RepoId,
        tag: &str,
        body: Option<&str>,
    ) -> HostResult<ReleaseData> {
        let result = self.0.create_release(repo, tag, body).await;
        outcome("create_release", &format!("{repo} {tag}"), &result);
        result
    }

    async fn update_release_body(&self, repo: &RepoId, id: u64, body: &str) -> HostResult<()> {
        let result = self.0.update_release_body(repo, id, body).await;
        outcome("update_release_body", &format!("{repo} {id}"), &result);
        result
    }

    async fn delete_release(&self, repo: &RepoId, id: u64) -> HostResult<()> {
        let result = self.0.delete_release(repo, id).await;
        outcome("delete_release", &format!("{repo} {id}"), &result);
        result
    }

    async fn delete_asset(&self, repo: &RepoId, asset_id: u64) -> HostResult<()> {
        let result = self.0.delete_asset(repo, asset_id).await;
        outcome("delete_asset", &format!("{repo} {asset_id}"), &result);
        result
    }

    async fn upload_asset(
        &self,
        repo: &RepoId,
        upload: AssetUpload<'_>,
        stream: ByteStream,
    ) -> HostResult<AssetData> {
        let detail = format!("{repo} {} -> release {}", upload.filename, upload.release_id);
        let result = self.0.upload_asset(repo, upload, stream).await;
        outcome("upload_asset", &detail, &result);
        result
    }

    async fn search_repositories(&self, query: &str) -> HostResult<Vec<RepoData>> {
        let result = self.0.search_repositories(query).await;
        outcome("search_repositories", query, &result);
        result
    }

    async fn list_releases(&self, repo: &RepoId) -> HostResult<Vec<ReleaseData>> {
        let result = self.0.list_releases(repo).await;
        outcome("list_releases", &repo.to_string(), &result);
        result
    }
}
