//! In-memory stand-in for the backing platform.
//!
//! Used by tests across the workspace: stores releases and assets in a
//! mutex-guarded table, hands out ids, and reproduces the platform's
//! observable behaviors (404 on missing tags, 422 on duplicate tags,
//! substring-only repository search). It also records every call so tests
//! can assert on traffic.

use futures::StreamExt;
use parking_lot::Mutex;

use crate::host::{
    AssetData, AssetUpload, ByteStream, HostError, HostResult, ReleaseData, ReleaseHost, RepoData,
    RepoId,
};

#[derive(Debug, Clone)]
struct StoredRelease {
    repo: String,
    data: ReleaseData,
}

#[derive(Default)]
struct State {
    next_id: u64,
    releases: Vec<StoredRelease>,
    repos: Vec<RepoData>,
    calls: Vec<String>,
    fail_update: bool,
}

/// An in-memory [`ReleaseHost`].
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<State>,
}

fn not_found() -> HostError {
    HostError::Status {
        status: 404,
        message: "Not Found".into(),
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a searchable repository.
    pub fn add_repo(&self, owner: &str, name: &str) {
        self.state.lock().repos.push(RepoData {
            owner: owner.to_string(),
            name: name.to_string(),
        });
    }

    /// Seeds a release and returns its id.
    pub fn add_release(&self, repo: &RepoId, tag: &str, body: Option<&str>) -> u64 {
        let mut state = self.state.lock();
        state.insert(&repo.to_string(), tag, body.map(String::from))
    }

    /// Attaches an asset to a seeded release.
    pub fn add_asset(&self, release_id: u64, name: &str) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        let asset = AssetData {
            id,
            name: name.to_string(),
            browser_download_url: format!("https://downloads.test/{release_id}/{name}"),
        };
        let release = state
            .releases
            .iter_mut()
            .find(|stored| stored.data.id == release_id)
            .expect("seeding an asset on an unknown release");
        release.data.assets.push(asset);
        id
    }

    /// Rewrites a release body behind the registry's back.
    pub fn set_body(&self, release_id: u64, body: &str) {
        let mut state = self.state.lock();
        let release = state
            .releases
            .iter_mut()
            .find(|stored| stored.data.id == release_id)
            .expect("rewriting an unknown release");
        release.data.body = Some(body.to_string());
    }

    /// Makes every subsequent body update fail.
    pub fn fail_updates(&self) {
        self.state.lock().fail_update = true;
    }

    pub fn body(&self, release_id: u64) -> Option<String> {
        let state = self.state.lock();
        state
            .releases
            .iter()
            .find(|stored| stored.data.id == release_id)
            .and_then(|stored| stored.data.body.clone())
    }

    pub fn release_ids(&self) -> Vec<u64> {
        let state = self.state.lock();
        state.releases.iter().map(|stored| stored.data.id).collect()
    }

    pub fn asset_names(&self, release_id: u64) -> Vec<String> {
        let state = self.state.lock();
        state
            .releases
            .iter()
            .find(|stored| stored.data.id == release_id)
            .map(|stored| {
                stored
                    .data
                    .assets
                    .iter()
                    .map(|asset| asset.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }
}

impl State {
    fn insert(&mut self, repo: &str, tag: &str, body: Option<String>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let (owner, name) = repo.split_once('/').expect("repo keys are owner/name");
        self.releases.push(StoredRelease {
            repo: repo.to_string(),
            data: ReleaseData {
                id,
                tag_name: tag.to_string(),
                upload_url: format!(
                    "https://uploads.test/repos/{owner}/{name}/releases/{id}/assets{{?name,label}}"
                ),
                body,
                assets: Vec::new(),
            },
        });
        id
    }

    fn record(&mut self, call: String) {
        self.calls.push(call);
    }
}

#[async_trait::async_trait]
impl ReleaseHost for FakeHost {
    async fn release_by_tag(&self, repo: &RepoId, tag: &str) -> HostResult<ReleaseData> {
        let mut state = self.state.lock();
        state.record(format!("release_by_tag {repo} {tag}"));
        state
            .releases
            .iter()
            .find(|stored| stored.repo == repo.to_string() && stored.data.tag_name == tag)
            .map(|stored| stored.data.clone())
            .ok_or_else(not_found)
    }

    async fn release_by_id(&self, repo: &RepoId, id: u64) -> HostResult<ReleaseData> {
        let mut state = self.state.lock();
        state.record(format!("release_by_id {repo} {id}"));
        state
            .releases
            .iter()
            .find(|stored| stored.data.id == id)
            .map(|stored| stored.data.clone())
            .ok_or_else(not_found)
    }

    async fn create_release(
        &self,
        repo: &RepoId,
        tag: &str,
        body: Option<&str>,
    ) -> HostResult<ReleaseData> {
        let mut state = self.state.lock();
        state.record(format!("create_release {repo} {tag}"));
        let key = repo.to_string();
        if state
            .releases
            .iter()
            .any(|stored| stored.repo == key && stored.data.tag_name == tag)
        {
            return Err(HostError::Status {
                status: 422,
                message: "Validation Failed: already_exists".into(),
            });
        }
        let id = state.insert(&key, tag, body.map(String::from));
        let release = state
            .releases
            .iter()
            .find(|stored| stored.data.id == id)
            .map(|stored| stored.data.clone());
        release.ok_or_else(not_found)
    }

    async fn update_release_body(&self, repo: &RepoId, id: u64, body: &str) -> HostResult<()> {
        let mut state = self.state.lock();
        state.record(format!("update_release_body {repo} {id}"));
        if state.fail_update {
            return Err(HostError::Status {
                status: 500,
                message: "Internal Server Error".into(),
            });
        }
        let release = state
            .releases
            .iter_mut()
            .find(|stored| stored.data.id == id)
            .ok_or_else(not_found)?;
        release.data.body = Some(body.to_string());
        Ok(())
    }

    async fn delete_release(&self, repo: &RepoId, id: u64) -> HostResult<()> {
        let mut state = self.state.lock();
        state.record(format!("delete_release {repo} {id}"));
        let before = state.releases.len();
        state.releases.retain(|stored| stored.data.id != id);
        if state.releases.len() == before {
            return Err(not_found());
        }
        Ok(())
    }

    async fn delete_asset(&self, repo: &RepoId, asset_id: u64) -> HostResult<()> {
        let mut state = self.state.lock();
        state.record(format!("delete_asset {repo} {asset_id}"));
        for stored in &mut state.releases {
            let before = stored.data.assets.len();
            stored.data.assets.retain(|asset| asset.id != asset_id);
            if stored.data.assets.len() != before {
                return Ok(());
            }
        }
        Err(not_found())
    }

    async fn upload_asset(
        &self,
        repo: &RepoId,
        upload: AssetUpload<'_>,
        mut stream: ByteStream,
    ) -> HostResult<AssetData> {
        {
            let mut state = self.state.lock();
            state.record(format!(
                "upload_asset {repo} {} -> release {}",
                upload.filename, upload.release_id
            ));
        }
        while let Some(chunk) = stream.next().await {
            chunk.map_err(|err| HostError::Transport(err.to_string()))?;
        }
        let mut state = self.state.lock();
        state.next_id += 1;
        let asset = AssetData {
            id: state.next_id,
            name: upload.filename.to_string(),
            browser_download_url: format!(
                "https://downloads.test/{}/{}",
                upload.release_id, upload.filename
            ),
        };
        let release = state
            .releases
            .iter_mut()
            .find(|stored| stored.data.id == upload.release_id)
            .ok_or_else(not_found)?;
        release.data.assets.push(asset.clone());
        Ok(asset)
    }

    async fn search_repositories(&self, query: &str) -> HostResult<Vec<RepoData>> {
        let mut state = self.state.lock();
        state.record(format!("search_repositories {query}"));
        // Reproduce the platform's substring-only matching: only the text
        // before the first qualifier narrows the candidates.
        let needle = query.split(' ').next().unwrap_or("");
        let needle = if needle.contains(':') { "" } else { needle };
        Ok(state
            .repos
            .iter()
            .filter(|repo| repo.name.contains(needle))
            .cloned()
            .collect())
    }

    async fn list_releases(&self, repo: &RepoId) -> HostResult<Vec<ReleaseData>> {
        let mut state = self.state.lock();
        state.record(format!("list_releases {repo}"));
        let key = repo.to_string();
        Ok(state
            .releases
            .iter()
            .filter(|stored| stored.repo == key)
            .map(|stored| stored.data.clone())
            .collect())
    }
}
