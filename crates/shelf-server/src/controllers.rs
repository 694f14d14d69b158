//! Request handlers over the core model, one per protocol endpoint.
//!
//! Every handler follows the same shape as the model it drives: parse the
//! reference (rejecting foreign hosts before any platform traffic), open
//! the root, walk the tree, and save once if anything changed.

use std::collections::BTreeMap;

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{BodyStream, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::http::HeaderMap;
use hyper::{Request, Response, StatusCode};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use serde_json::json;
use shelf_core::error::{RegistryError, Result};
use shelf_core::host::{ByteStream, ReleaseHost, RepoId, Traced};
use shelf_core::model::{
    self, Identified, Package, PackageRevision, RecipeRevision, Revised, RevisionSummary,
};
use shelf_core::ops;
use shelf_core::reference::Level;
use shelf_core::search;
use shelf_core::store::Root;
use shelf_github::GithubClient;
use tracing::{info, warn};

use crate::auth::{self, Credentials};
use crate::config::Config;
use crate::routes::{RecipeParams, RecipeRoute, Route};

pub type Body = Full<Bytes>;

pub struct App {
    pub config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// A platform client carrying this request's credentials, or the
    /// server's fallback token for anonymous reads.
    fn host(&self, credentials: Option<&Credentials>) -> Result<Box<dyn ReleaseHost>> {
        let token = credentials
            .map(|creds| creds.token.clone())
            .or_else(|| self.config.token.clone());
        let client = GithubClient::with_api_base(&self.config.api_base, token)?;
        Ok(if self.config.trace_host {
            Box::new(Traced(client))
        } else {
            Box::new(client)
        })
    }
}

pub async fn handle(app: &App, req: Request<Incoming>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = Route::parse(&method, &path);
    let response = match dispatch(app, route, req).await {
        Ok(response) => response,
        Err(err) => error_response(&err),
    };
    info!("{method} {path} -> {}", response.status());
    response
}

async fn dispatch(app: &App, route: Route, req: Request<Incoming>) -> Result<Response<Body>> {
    match route {
        Route::Ping => ping(),
        Route::Authenticate => authenticate(req.headers()),
        Route::CheckCredentials => {
            check_credentials(req.headers(), &auth::query_pairs(req.uri()))
        }
        Route::Search => search_conans(app, &req).await,
        Route::Recipe(params, route) => recipe_dispatch(app, params, route, req).await,
        Route::NotImplemented => Ok(status_response(StatusCode::NOT_IMPLEMENTED)),
    }
}

fn ping() -> Result<Response<Body>> {
    Ok(Response::builder()
        .header("X-Conan-Server-Capabilities", "complex_search,revisions")
        .body(Body::default())
        .expect("static response parts are valid"))
}

/// Echoes the Basic credential back; the client replays it as its bearer
/// token from then on.
fn authenticate(headers: &HeaderMap) -> Result<Response<Body>> {
    let credential = auth::parse_basic(headers)?;
    Ok(text_response(StatusCode::OK, credential))
}

fn check_credentials(headers: &HeaderMap, query: &[(String, String)]) -> Result<Response<Body>> {
    let creds = auth::parse_bearer(headers, query)?;
    if let Some(client_id) = headers.get("X-Client-Id").and_then(|value| value.to_str().ok()) {
        if client_id != creds.user {
            warn!(
                "bearer user ({}) does not match X-Client-Id ({client_id})",
                creds.user
            );
        }
    }
    Ok(text_response(StatusCode::OK, creds.user))
}

async fn search_conans(app: &App, req: &Request<Incoming>) -> Result<Response<Body>> {
    let query = auth::query_pairs(req.uri());
    let creds = auth::optional_bearer(req.headers(), &query);
    let host = app.host(creds.as_ref())?;
    let q = query
        .iter()
        .find(|(key, _)| key == "q")
        .map(|(_, value)| value.as_str())
        .unwrap_or("");
    let results = search::search(host.as_ref(), q).await?;
    Ok(json_response(&json!({ "results": results })))
}

async fn recipe_dispatch(
    app: &App,
    params: RecipeParams,
    route: RecipeRoute,
    req: Request<Incoming>,
) -> Result<Response<Body>> {
    let (parts, body) = req.into_parts();
    let query = auth::query_pairs(&parts.uri);
    let (repo, level) = Level::recipe(&params.name, &params.version, &params.user, &params.channel)?;

    let write = matches!(
        route,
        RecipeRoute::Delete
            | RecipeRoute::RevisionDelete { .. }
            | RecipeRoute::RevisionUpload { .. }
            | RecipeRoute::PackageRevisionDelete { .. }
            | RecipeRoute::PackageRevisionUpload { .. }
    );
    let creds = if write {
        Some(auth::parse_bearer(&parts.headers, &query)?)
    } else {
        auth::optional_bearer(&parts.headers, &query)
    };
    let host = app.host(creds.as_ref())?;
    let host = host.as_ref();

    match route {
        RecipeRoute::Files => recipe_files(host, &repo, &level).await,
        RecipeRoute::Delete => recipe_delete(host, &repo, &level).await,
        RecipeRoute::Latest => recipe_latest(host, &repo, &level).await,
        RecipeRoute::Revisions => recipe_revisions(host, &repo, &level).await,
        RecipeRoute::DownloadUrls => recipe_download_urls(host, &repo, &level).await,
        RecipeRoute::RevisionDelete { rrev } => {
            revision_delete(host, &repo, &level, &rrev).await
        }
        RecipeRoute::RevisionFiles { rrev } => revision_files(host, &repo, &level, &rrev).await,
        RecipeRoute::RevisionFile { rrev, filename } => {
            redirect_file(&repo, &level.revised(&rrev), &filename)
        }
        RecipeRoute::RevisionUpload { rrev, filename } => {
            let length = content_length(&parts.headers)?;
            revision_upload(host, &repo, &level, &rrev, &filename, length, body_stream(body))
                .await
        }
        RecipeRoute::PackageLatest { rrev, package } => {
            package_latest(host, &repo, &level, &rrev, &package).await
        }
        RecipeRoute::PackageRevisions { rrev, package } => {
            package_revisions(host, &repo, &level, &rrev, &package).await
        }
        RecipeRoute::PackageRevisionDelete { rrev, package, prev } => {
            package_revision_delete(host, &repo, &level, &rrev, &package, &prev).await
        }
        RecipeRoute::PackageRevisionFiles { rrev, package, prev } => {
            package_revision_files(host, &repo, &level, &rrev, &package, &prev).await
        }
        RecipeRoute::PackageRevisionFile {
            rrev,
            package,
            prev,
            filename,
        } => {
            let target = level.revised(&rrev).package(&package)?.revised(&prev);
            redirect_file(&repo, &target, &filename)
        }
        RecipeRoute::PackageRevisionUpload {
            rrev,
            package,
            prev,
            filename,
        } => {
            let length = content_length(&parts.headers)?;
            package_revision_upload(
                host,
                &repo,
                &level,
                &rrev,
                &package,
                &prev,
                &filename,
                length,
                body_stream(body),
            )
            .await
        }
    }
}

async fn recipe_files(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, false).await?;
    let (rrev_level, index) = {
        let latest = model::latest(level, &root.recipe.revisions)?;
        (latest.level, latest.index)
    };
    let rrev = &mut root.recipe.revisions[index];
    let release =
        ops::ensure_release(host, repo, &root.release, &rrev_level, &mut rrev.revision, false)
            .await?;
    let files = ops::get_files(host, repo, &rrev_level, &rrev.revision.files, &release).await?;
    Ok(json_response(&files))
}

async fn recipe_delete(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, false).await?;
    let failures = ops::delete_recipe(host, repo, &root.release, &root.recipe).await;
    report(&failures);
    root.recipe.revisions.clear();
    root.save(host).await?;
    Ok(status_response(StatusCode::OK))
}

async fn recipe_latest(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
) -> Result<Response<Body>> {
    let root = Root::open(host, repo, level, false).await?;
    let latest = model::latest(level, &root.recipe.revisions)?;
    Ok(json_response(&summary(latest.value)))
}

async fn recipe_revisions(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
) -> Result<Response<Body>> {
    let root = Root::open(host, repo, level, false).await?;
    let revisions = model::revision_summaries(level, &root.recipe.revisions)?;
    Ok(json_response(&json!({ "revisions": revisions })))
}

async fn recipe_download_urls(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, false).await?;
    let (rrev_level, index) = {
        let latest = model::latest(level, &root.recipe.revisions)?;
        (latest.level, latest.index)
    };
    let rrev = &mut root.recipe.revisions[index];
    let release =
        ops::ensure_release(host, repo, &root.release, &rrev_level, &mut rrev.revision, false)
            .await?;
    let files = ops::get_files(host, repo, &rrev_level, &rrev.revision.files, &release).await?;
    let urls: BTreeMap<String, String> = files
        .into_iter()
        .map(|(name, sum)| {
            let url = if sum.url.is_empty() {
                download_url(repo, &rrev_level.tag, &name)
            } else {
                sum.url
            };
            (name, url)
        })
        .collect();
    Ok(json_response(&urls))
}

async fn revision_delete(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
    rrev: &str,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, false).await?;
    let index = model::resolve(level.revised(rrev), &mut root.recipe.revisions, rrev, false, || {
        RecipeRevision::new(rrev)
    })?
    .index;
    let failures =
        ops::delete_recipe_revision(host, repo, &root.release, &root.recipe.revisions[index])
            .await;
    report(&failures);
    root.recipe.revisions.remove(index);
    root.save(host).await?;
    Ok(status_response(StatusCode::OK))
}

async fn revision_files(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
    rrev: &str,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, false).await?;
    let found = model::resolve(level.revised(rrev), &mut root.recipe.revisions, rrev, false, || {
        RecipeRevision::new(rrev)
    })?;
    let release = ops::ensure_release(
        host,
        repo,
        &root.release,
        &found.level,
        &mut found.value.revision,
        false,
    )
    .await?;
    let files =
        ops::get_files(host, repo, &found.level, &found.value.revision.files, &release).await?;
    Ok(json_response(&files))
}

#[allow(clippy::too_many_arguments)]
async fn revision_upload(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
    rrev: &str,
    filename: &str,
    length: u64,
    stream: ByteStream,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, true).await?;
    let found = model::resolve(level.revised(rrev), &mut root.recipe.revisions, rrev, true, || {
        RecipeRevision::new(rrev)
    })?;
    let release = ops::ensure_release(
        host,
        repo,
        &root.release,
        &found.level,
        &mut found.value.revision,
        true,
    )
    .await?;
    let sum = ops::put_file(host, repo, &release, filename, length, stream).await?;
    found.value.revision.files.insert(filename.to_string(), sum);
    root.save(host).await?;
    Ok(status_response(StatusCode::CREATED))
}

async fn package_latest(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
    rrev_id: &str,
    package_id: &str,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, false).await?;
    let rrev = model::resolve(
        level.revised(rrev_id),
        &mut root.recipe.revisions,
        rrev_id,
        false,
        || RecipeRevision::new(rrev_id),
    )?;
    let package_level = rrev.level.package(package_id)?;
    let package = model::resolve(package_level, &mut rrev.value.packages, package_id, false, || {
        Package::new(package_id)
    })?;
    let latest = model::latest(&package.level, &package.value.revisions)?;
    Ok(json_response(&summary(latest.value)))
}

async fn package_revisions(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
    rrev_id: &str,
    package_id: &str,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, false).await?;
    let rrev = model::resolve(
        level.revised(rrev_id),
        &mut root.recipe.revisions,
        rrev_id,
        false,
        || RecipeRevision::new(rrev_id),
    )?;
    let package_level = rrev.level.package(package_id)?;
    let package = model::resolve(package_level, &mut rrev.value.packages, package_id, false, || {
        Package::new(package_id)
    })?;
    let revisions = model::revision_summaries(&package.level, &package.value.revisions)?;
    Ok(json_response(&json!({ "revisions": revisions })))
}

async fn package_revision_delete(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
    rrev_id: &str,
    package_id: &str,
    prev_id: &str,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, false).await?;
    let rrev = model::resolve(
        level.revised(rrev_id),
        &mut root.recipe.revisions,
        rrev_id,
        false,
        || RecipeRevision::new(rrev_id),
    )?;
    let package_level = rrev.level.package(package_id)?;
    let package = model::resolve(package_level, &mut rrev.value.packages, package_id, false, || {
        Package::new(package_id)
    })?;
    let index = model::resolve(
        package.level.revised(prev_id),
        &mut package.value.revisions,
        prev_id,
        false,
        || PackageRevision::new(prev_id),
    )?
    .index;
    let failures =
        ops::delete_package_revision(host, repo, &package.value.revisions[index]).await;
    report(&failures);
    package.value.revisions.remove(index);
    root.save(host).await?;
    Ok(status_response(StatusCode::OK))
}

async fn package_revision_files(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
    rrev_id: &str,
    package_id: &str,
    prev_id: &str,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, false).await?;
    let rrev = model::resolve(
        level.revised(rrev_id),
        &mut root.recipe.revisions,
        rrev_id,
        false,
        || RecipeRevision::new(rrev_id),
    )?;
    let package_level = rrev.level.package(package_id)?;
    let package = model::resolve(package_level, &mut rrev.value.packages, package_id, false, || {
        Package::new(package_id)
    })?;
    let prev = model::resolve(
        package.level.revised(prev_id),
        &mut package.value.revisions,
        prev_id,
        false,
        || PackageRevision::new(prev_id),
    )?;
    let release = ops::ensure_release(
        host,
        repo,
        &root.release,
        &prev.level,
        &mut prev.value.revision,
        false,
    )
    .await?;
    let files =
        ops::get_files(host, repo, &prev.level, &prev.value.revision.files, &release).await?;
    Ok(json_response(&files))
}

#[allow(clippy::too_many_arguments)]
async fn package_revision_upload(
    host: &dyn ReleaseHost,
    repo: &RepoId,
    level: &Level,
    rrev_id: &str,
    package_id: &str,
    prev_id: &str,
    filename: &str,
    length: u64,
    stream: ByteStream,
) -> Result<Response<Body>> {
    let mut root = Root::open(host, repo, level, true).await?;
    let rrev = model::resolve(
        level.revised(rrev_id),
        &mut root.recipe.revisions,
        rrev_id,
        true,
        || RecipeRevision::new(rrev_id),
    )?;
    let package_level = rrev.level.package(package_id)?;
    let package = model::resolve(package_level, &mut rrev.value.packages, package_id, true, || {
        Package::new(package_id)
    })?;
    let prev = model::resolve(
        package.level.revised(prev_id),
        &mut package.value.revisions,
        prev_id,
        true,
        || PackageRevision::new(prev_id),
    )?;
    let release = ops::ensure_release(
        host,
        repo,
        &root.release,
        &prev.level,
        &mut prev.value.revision,
        true,
    )
    .await?;
    let sum = ops::put_file(host, repo, &release, filename, length, stream).await?;
    prev.value.revision.files.insert(filename.to_string(), sum);
    root.save(host).await?;
    Ok(status_response(StatusCode::CREATED))
}

fn summary<T: Revised>(value: &T) -> RevisionSummary {
    RevisionSummary {
        revision: value.id().to_string(),
        time: value.revision().time.clone(),
    }
}

fn report(failures: &[String]) {
    for failure in failures {
        warn!("{failure}");
    }
}

fn content_length(headers: &HeaderMap) -> Result<u64> {
    let header = headers.get(CONTENT_LENGTH).ok_or_else(|| {
        RegistryError::BadRequest("Missing header: Content-Length".into())
    })?;
    header
        .to_str()
        .ok()
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| RegistryError::BadRequest("Malformed header: Content-Length".into()))
}

/// The inbound body as a pull-paced byte stream; trailer frames are
/// dropped.
fn body_stream(body: Incoming) -> ByteStream {
    BodyStream::new(body)
        .filter_map(|frame| {
            async move {
                match frame {
                    Ok(frame) => frame.into_data().ok().map(Ok),
                    Err(err) => Some(Err(std::io::Error::other(err))),
                }
            }
        })
        .boxed()
}

/// Release tags carry `#`, which must be escaped in a download path.
const PATH_ESCAPES: &AsciiSet = &CONTROLS.add(b' ').add(b'#').add(b'%').add(b'?');

fn download_url(repo: &RepoId, tag: &str, filename: &str) -> String {
    format!(
        "https://github.com/{}/{}/releases/download/{}/{}",
        repo.owner,
        repo.name,
        utf8_percent_encode(tag, PATH_ESCAPES),
        utf8_percent_encode(filename, PATH_ESCAPES),
    )
}

fn redirect_file(repo: &RepoId, target: &Level, filename: &str) -> Result<Response<Body>> {
    let url = download_url(repo, &target.tag, filename);
    Ok(Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(LOCATION, url)
        .body(Body::default())
        .expect("static response parts are valid"))
}

fn status_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::default())
        .expect("static response parts are valid")
}

fn text_response(status: StatusCode, text: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::from(Bytes::from(text)))
        .expect("static response parts are valid")
}

fn json_response<T: Serialize>(value: &T) -> Response<Body> {
    let body = serde_json::to_vec(value).expect("response bodies are always serializable");
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::from(Bytes::from(body)))
        .expect("static response parts are valid")
}

fn error_response(err: &RegistryError) -> Response<Body> {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    text_response(status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_url_escapes_revision_tags() {
        let repo = RepoId {
            owner: "alice".into(),
            name: "zlib".into(),
        };
        assert_eq!(
            download_url(&repo, "1.2.13", "conanfile.py"),
            "https://github.com/alice/zlib/releases/download/1.2.13/conanfile.py"
        );
        assert_eq!(
            download_url(&repo, "1.2.13#abc@pkg", "conan_package.tgz"),
            "https://github.com/alice/zlib/releases/download/1.2.13%23abc@pkg/conan_package.tgz"
        );
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&RegistryError::NotFound("Recipe missing: x".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = error_response(&RegistryError::Upstream {
            status: 413,
            message: "too large".into(),
        });
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_content_length_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            format!("{}", content_length(&headers).unwrap_err()),
            "Missing header: Content-Length"
        );

        headers.insert(CONTENT_LENGTH, "1234".parse().unwrap());
        assert_eq!(content_length(&headers).unwrap(), 1234);

        headers.insert(CONTENT_LENGTH, "not-a-number".parse().unwrap());
        assert_eq!(
            format!("{}", content_length(&headers).unwrap_err()),
            "Malformed header: Content-Length"
        );
    }
}
