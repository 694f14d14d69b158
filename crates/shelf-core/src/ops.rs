//! Release and asset operations over the revision tree.
//!
//! Releases are created lazily: a revision only gets one when its first
//! file arrives. Uploads stream straight through to the platform while a
//! digest accumulates on the side, and deletion cascades run bottom-up so
//! no release disappears before its descendants.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use url::Url;

use crate::error::{RegistryError, Result};
use crate::host::{AssetUpload, ByteStream, HostError, ReleaseData, ReleaseHost, RepoId};
use crate::model::{FileSum, PackageRevision, Recipe, RecipeRevision, ReleaseRef, Revision};
use crate::reference::{Level, LevelKind};

/// The asset that marks a genuine recipe release.
pub const MANIFEST_FILE: &str = "conanmanifest.txt";

/// Content types for the file kinds the package manager uploads.
pub fn mime_type(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext) {
        Some("txt") => "text/plain",
        Some("py") => "text/x-python",
        Some("tgz") => "application/gzip",
        _ => "application/octet-stream",
    }
}

fn upload_origin(upload_url: &str, reference: &str) -> Result<String> {
    let url = Url::parse(upload_url).map_err(|_| {
        RegistryError::BadGateway(format!("Bad upload URL for: {reference}"))
    })?;
    Ok(url.origin().ascii_serialization())
}

/// Returns the release backing a revision, creating it when forced.
///
/// The implicit recipe revision `0` is always backed by the root release
/// itself; it is never created and never deleted here. A forced create
/// that loses the tag race to a concurrent request falls back to the
/// release that request already created.
pub async fn ensure_release(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    root_release: &ReleaseData,
    level: &Level,
    revision: &mut Revision,
    force: bool,
) -> Result<ReleaseRef> {
    if let Some(release) = &revision.release {
        return Ok(release.clone());
    }
    let data = if level.kind == LevelKind::Recipe && revision.id == "0" {
        root_release.clone()
    } else if !force {
        return Err(RegistryError::NotFound(format!(
            "Missing release: {}",
            level.reference
        )));
    } else {
        match host.create_release(repo, &level.tag, None).await {
            Ok(data) => data,
            Err(err) if err.is_tag_conflict() => {
                host.release_by_tag(repo, &level.tag).await.map_err(|err| {
                    RegistryError::BadGateway(format!(
                        "Cannot create release: {}: {err}",
                        level.reference
                    ))
                })?
            }
            Err(err) => {
                return Err(RegistryError::BadGateway(format!(
                    "Cannot create release: {}: {err}",
                    level.reference
                )));
            }
        }
    };
    let release = ReleaseRef {
        id: data.id,
        origin: upload_origin(&data.upload_url, &level.reference)?,
    };
    revision.release = Some(release.clone());
    Ok(release)
}

/// Streams a request body into a release asset, digesting it on the way
/// through.
///
/// Nothing is buffered: the uploader pulls chunks at its own pace and the
/// hash is updated as each one passes. A mismatch between the declared
/// length and the bytes actually streamed is the client's error and
/// nothing is recorded. A rejected upload carries the platform's status
/// and error body back to the client.
pub async fn put_file(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    release: &ReleaseRef,
    filename: &str,
    declared_len: u64,
    stream: ByteStream,
) -> Result<FileSum> {
    let state = Arc::new(Mutex::new((Md5::new(), 0u64)));
    let tee = {
        let state = Arc::clone(&state);
        stream
            .inspect(move |chunk| {
                if let Ok(bytes) = chunk {
                    let mut state = state.lock();
                    state.0.update(bytes);
                    state.1 += bytes.len() as u64;
                }
            })
            .boxed()
    };
    let upload = AssetUpload {
        origin: &release.origin,
        release_id: release.id,
        filename,
        mime_type: mime_type(filename),
        content_length: declared_len,
    };
    let asset = match host.upload_asset(repo, upload, tee).await {
        Ok(asset) => asset,
        Err(HostError::Status { status, message }) => {
            return Err(RegistryError::Upstream { status, message });
        }
        Err(err) => return Err(err.into()),
    };
    let (md5, streamed) = {
        let state = state.lock();
        (format!("{:x}", state.0.clone().finalize()), state.1)
    };
    if streamed != declared_len {
        return Err(RegistryError::BadRequest(format!(
            "Content length does not match header: {streamed} != {declared_len}"
        )));
    }
    Ok(FileSum {
        md5,
        url: asset.browser_download_url,
    })
}

/// The name → digest/url map for a revision's uploaded files.
///
/// Assets are listed live from the release; digests recorded at upload
/// time are merged in where they exist.
pub async fn get_files(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
    recorded: &BTreeMap<String, FileSum>,
    release: &ReleaseRef,
) -> Result<BTreeMap<String, FileSum>> {
    let data = host
        .release_by_id(repo, release.id)
        .await
        .map_err(|_| level.missing())?;
    let mut files = BTreeMap::new();
    for asset in data.assets {
        let mut sum = recorded.get(&asset.name).cloned().unwrap_or_default();
        if sum.url.is_empty() {
            sum.url = asset.browser_download_url;
        }
        files.insert(asset.name, sum);
    }
    Ok(files)
}

async fn delete_revision(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    revision: &Revision,
) -> Option<String> {
    let release = revision.release.as_ref()?;
    match host.delete_release(repo, release.id).await {
        Ok(()) => None,
        Err(err) => Some(format!("Cannot delete release {}: {err}", release.id)),
    }
}

/// Deletes the release behind a single package revision.
pub async fn delete_package_revision(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    prev: &PackageRevision,
) -> Vec<String> {
    delete_revision(host, repo, &prev.revision)
        .await
        .into_iter()
        .collect()
}

/// Deletes the releases behind every package revision under a recipe
/// revision. Failures are collected, never short-circuited.
pub async fn delete_packages(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    rrev: &RecipeRevision,
) -> Vec<String> {
    let mut failures = Vec::new();
    for package in &rrev.packages {
        for prev in &package.revisions {
            if let Some(failure) = delete_revision(host, repo, &prev.revision).await {
                failures.push(failure);
            }
        }
    }
    failures
}

/// Bottom-up cascade for one recipe revision.
///
/// The implicit revision `0` shares the root release with the metadata
/// document, so only its assets are deleted, never the release itself.
pub async fn delete_recipe_revision(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    root_release: &ReleaseData,
    rrev: &RecipeRevision,
) -> Vec<String> {
    let mut failures = delete_packages(host, repo, rrev).await;
    if rrev.revision.id == "0" {
        for asset in &root_release.assets {
            if let Err(err) = host.delete_asset(repo, asset.id).await {
                failures.push(format!(
                    "Cannot delete asset {} ({}): {err}",
                    asset.name, asset.id
                ));
            }
        }
    } else if let Some(failure) = delete_revision(host, repo, &rrev.revision).await {
        failures.push(failure);
    }
    failures
}

/// Cascade over every revision of the recipe.
pub async fn delete_recipe(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    root_release: &ReleaseData,
    recipe: &Recipe,
) -> Vec<String> {
    let mut failures = Vec::new();
    for rrev in &recipe.revisions {
        failures.extend(delete_recipe_revision(host, repo, root_release, rrev).await);
    }
    failures
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::stream;

    use super::*;
    use crate::model::{resolve, Package, PackageRevision, Revised};
    use crate::reference::Level;
    use crate::store::Root;
    use crate::testing::FakeHost;

    fn coords() -> (RepoId, Level) {
        Level::recipe("zlib", "1.2.13", "github", "alice").unwrap()
    }

    fn byte_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
        stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok(Bytes::from_static(chunk))),
        )
        .boxed()
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_type("conanmanifest.txt"), "text/plain");
        assert_eq!(mime_type("conanfile.py"), "text/x-python");
        assert_eq!(mime_type("conan_export.tgz"), "application/gzip");
        assert_eq!(mime_type("data.bin"), "application/octet-stream");
        assert_eq!(mime_type("noextension"), "application/octet-stream");
    }

    #[test]
    fn test_upload_origin() {
        let origin = upload_origin(
            "https://uploads.github.com/repos/alice/zlib/releases/42/assets{?name,label}",
            "zlib/1.2.13@github/alice",
        )
        .unwrap();
        assert_eq!(origin, "https://uploads.github.com");
    }

    #[tokio::test]
    async fn test_ensure_release_returns_existing() {
        let host = FakeHost::new();
        let (repo, level) = coords();
        let root = ReleaseData::default();
        let mut revision = Revision::new("abc123");
        revision.release = Some(ReleaseRef {
            id: 5,
            origin: "https://uploads.test".into(),
        });
        let release = ensure_release(&host, &repo, &root, &level.revised("abc123"), &mut revision, false)
            .await
            .unwrap();
        assert_eq!(release.id, 5);
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_release_zero_uses_root() {
        let host = FakeHost::new();
        let (repo, level) = coords();
        let id = host.add_release(&repo, "1.2.13", None);
        let root = host.release_by_id(&repo, id).await.unwrap();
        let mut revision = Revision::new("0");
        let release = ensure_release(&host, &repo, &root, &level.revised("0"), &mut revision, false)
            .await
            .unwrap();
        assert_eq!(release.id, id);
        assert_eq!(release.origin, "https://uploads.test");
        // The pointer is cached on the revision for the next save.
        assert_eq!(revision.release.as_ref().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_ensure_release_missing_without_force() {
        let host = FakeHost::new();
        let (repo, level) = coords();
        let mut revision = Revision::new("abc123");
        let err = ensure_release(
            &host,
            &repo,
            &ReleaseData::default(),
            &level.revised("abc123"),
            &mut revision,
            false,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), 404);
        assert!(format!("{err}").starts_with("Missing release:"));
        assert!(revision.release.is_none());
    }

    #[tokio::test]
    async fn test_ensure_release_force_creates_tag() {
        let host = FakeHost::new();
        let (repo, level) = coords();
        let mut revision = Revision::new("abc123");
        let release = ensure_release(
            &host,
            &repo,
            &ReleaseData::default(),
            &level.revised("abc123"),
            &mut revision,
            true,
        )
        .await
        .unwrap();
        let created = host.release_by_id(&repo, release.id).await.unwrap();
        assert_eq!(created.tag_name, "1.2.13#abc123");
    }

    #[tokio::test]
    async fn test_ensure_release_recovers_from_tag_race() {
        let host = FakeHost::new();
        let (repo, level) = coords();
        // A prior request created the tag but crashed before the metadata
        // recorded it.
        let existing = host.add_release(&repo, "1.2.13#abc123", None);
        let mut revision = Revision::new("abc123");
        let release = ensure_release(
            &host,
            &repo,
            &ReleaseData::default(),
            &level.revised("abc123"),
            &mut revision,
            true,
        )
        .await
        .unwrap();
        assert_eq!(release.id, existing);
        let calls = host.calls();
        assert!(calls.iter().any(|call| call.starts_with("create_release")));
        assert!(calls.iter().any(|call| call.starts_with("release_by_tag")));
    }

    #[tokio::test]
    async fn test_put_file_digests_the_stream() {
        let host = FakeHost::new();
        let (repo, _) = coords();
        let id = host.add_release(&repo, "1.2.13#abc123", None);
        let release = ReleaseRef {
            id,
            origin: "https://uploads.test".into(),
        };
        let body: &[u8] = b"hello world\n";
        let sum = put_file(
            &host,
            &repo,
            &release,
            "conanmanifest.txt",
            body.len() as u64,
            byte_stream(vec![b"hello ", b"world\n"]),
        )
        .await
        .unwrap();
        // md5("hello world\n")
        assert_eq!(sum.md5, "6f5902ac237024bdd0c176cb93063dc4");
        assert!(sum.url.contains("conanmanifest.txt"));
        assert_eq!(host.asset_names(id), vec!["conanmanifest.txt"]);
    }

    #[tokio::test]
    async fn test_put_file_length_mismatch_is_bad_request() {
        let host = FakeHost::new();
        let (repo, _) = coords();
        let id = host.add_release(&repo, "1.2.13#abc123", None);
        let release = ReleaseRef {
            id,
            origin: "https://uploads.test".into(),
        };
        let err = put_file(
            &host,
            &repo,
            &release,
            "conanmanifest.txt",
            999,
            byte_stream(vec![b"short"]),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(format!("{err}").contains("5 != 999"));
    }

    #[tokio::test]
    async fn test_put_file_passes_platform_rejection_through() {
        let host = FakeHost::new();
        let (repo, _) = coords();
        // No release with this id exists, so the upload is rejected.
        let release = ReleaseRef {
            id: 777,
            origin: "https://uploads.test".into(),
        };
        let err = put_file(&host, &repo, &release, "x.bin", 1, byte_stream(vec![b"x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Upstream { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_get_files_merges_recorded_sums() {
        let host = FakeHost::new();
        let (repo, level) = coords();
        let id = host.add_release(&repo, "1.2.13", None);
        host.add_asset(id, "conanmanifest.txt");
        host.add_asset(id, "conanfile.py");

        let mut recorded = BTreeMap::new();
        recorded.insert(
            "conanmanifest.txt".to_string(),
            FileSum {
                md5: "abc".into(),
                url: "https://recorded.test/manifest".into(),
            },
        );
        let release = ReleaseRef {
            id,
            origin: "https://uploads.test".into(),
        };
        let files = get_files(&host, &repo, &level, &recorded, &release)
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["conanmanifest.txt"].md5, "abc");
        assert_eq!(files["conanmanifest.txt"].url, "https://recorded.test/manifest");
        assert_eq!(files["conanfile.py"].md5, "");
        assert!(files["conanfile.py"].url.contains("conanfile.py"));
    }

    #[tokio::test]
    async fn test_get_files_missing_release() {
        let host = FakeHost::new();
        let (repo, level) = coords();
        let release = ReleaseRef {
            id: 999,
            origin: "https://uploads.test".into(),
        };
        let err = get_files(&host, &repo, &level, &BTreeMap::new(), &release)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn test_delete_zero_revision_spares_the_root_release() {
        let host = FakeHost::new();
        let (repo, _) = coords();
        let root_id = host.add_release(&repo, "1.2.13", None);
        host.add_asset(root_id, "conanmanifest.txt");
        host.add_asset(root_id, "conan_sources.tgz");
        let root = host.release_by_id(&repo, root_id).await.unwrap();

        let rrev = RecipeRevision::new("0");
        let failures = delete_recipe_revision(&host, &repo, &root, &rrev).await;
        assert!(failures.is_empty());
        assert!(host.asset_names(root_id).is_empty());
        // The root release itself is still there.
        assert_eq!(host.release_ids(), vec![root_id]);
    }

    #[tokio::test]
    async fn test_delete_named_revision_removes_its_release() {
        let host = FakeHost::new();
        let (repo, _) = coords();
        let root_id = host.add_release(&repo, "1.2.13", None);
        let rrev_id = host.add_release(&repo, "1.2.13#abc123", None);
        let prev_id = host.add_release(&repo, "1.2.13#abc123@fedcba#9f8e", None);
        let root = host.release_by_id(&repo, root_id).await.unwrap();

        let mut rrev = RecipeRevision::new("abc123");
        rrev.revision.release = Some(ReleaseRef {
            id: rrev_id,
            origin: "https://uploads.test".into(),
        });
        let mut prev = PackageRevision::new("9f8e");
        prev.revision_mut().release = Some(ReleaseRef {
            id: prev_id,
            origin: "https://uploads.test".into(),
        });
        let mut package = Package::new("fedcba");
        package.revisions.push(prev);
        rrev.packages.push(package);

        let failures = delete_recipe_revision(&host, &repo, &root, &rrev).await;
        assert!(failures.is_empty());
        assert_eq!(host.release_ids(), vec![root_id]);

        // Descendants went first.
        let calls = host.calls();
        let prev_at = calls
            .iter()
            .position(|call| call == &format!("delete_release alice/zlib {prev_id}"))
            .unwrap();
        let rrev_at = calls
            .iter()
            .position(|call| call == &format!("delete_release alice/zlib {rrev_id}"))
            .unwrap();
        assert!(prev_at < rrev_at);
    }

    #[tokio::test]
    async fn test_delete_failures_do_not_stop_siblings() {
        let host = FakeHost::new();
        let (repo, _) = coords();
        let root_id = host.add_release(&repo, "1.2.13", None);
        let kept_id = host.add_release(&repo, "1.2.13#keep", None);
        let root = host.release_by_id(&repo, root_id).await.unwrap();

        let mut gone = RecipeRevision::new("gone");
        gone.revision.release = Some(ReleaseRef {
            id: 12345,
            origin: "https://uploads.test".into(),
        });
        let mut kept = RecipeRevision::new("keep");
        kept.revision.release = Some(ReleaseRef {
            id: kept_id,
            origin: "https://uploads.test".into(),
        });
        let recipe = Recipe {
            revisions: vec![gone, kept],
        };

        let failures = delete_recipe(&host, &repo, &root, &recipe).await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("12345"));
        // The second revision was still deleted.
        assert_eq!(host.release_ids(), vec![root_id]);
    }

    // The end-to-end flow of a first upload: the unforced read fails, the
    // forced upload creates the root, and the follow-up read sees files.
    #[tokio::test]
    async fn test_first_upload_flow() {
        let host = FakeHost::new();
        let (repo, level) = coords();

        let err = Root::open(&host, &repo, &level, false).await.unwrap_err();
        assert_eq!(err.status(), 404);

        // Forced upload of the first file.
        let mut root = Root::open(&host, &repo, &level, true).await.unwrap();
        let found = resolve(level.revised("0"), &mut root.recipe.revisions, "0", true, || {
            RecipeRevision::new("0")
        })
        .unwrap();
        let release = ensure_release(
            &host,
            &repo,
            &root.release,
            &found.level,
            &mut found.value.revision,
            true,
        )
        .await
        .unwrap();
        let body: &[u8] = b"manifest contents";
        let sum = put_file(
            &host,
            &repo,
            &release,
            MANIFEST_FILE,
            body.len() as u64,
            byte_stream(vec![body]),
        )
        .await
        .unwrap();
        found
            .value
            .revision
            .files
            .insert(MANIFEST_FILE.to_string(), sum);
        root.save(&host).await.unwrap();

        // Unforced read now succeeds and reports the file.
        let mut root = Root::open(&host, &repo, &level, false).await.unwrap();
        let found = resolve(level.revised("0"), &mut root.recipe.revisions, "0", false, || {
            RecipeRevision::new("0")
        })
        .unwrap();
        let release = ensure_release(
            &host,
            &repo,
            &root.release,
            &found.level,
            &mut found.value.revision,
            false,
        )
        .await
        .unwrap();
        let files = get_files(
            &host,
            &repo,
            &found.level,
            &found.value.revision.files,
            &release,
        )
        .await
        .unwrap();
        assert_eq!(files.len(), 1);
        assert!(!files[MANIFEST_FILE].md5.is_empty());
    }
}
