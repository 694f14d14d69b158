//! Translates package-manager search queries onto the platform's
//! repository search.
//!
//! The platform only does substring matching over repository names, so a
//! glob query runs in two passes: a substring seed narrows the candidates
//! server-side, then the full glob (compiled to an anchored regex) filters
//! them client-side. Candidate repositories advertise themselves with a
//! discovery topic; candidate tags must parse as recipe tags and carry the
//! manifest asset, or they are incidental repository tags.

use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::host::{ReleaseHost, RepoId};
use crate::ops::MANIFEST_FILE;
use crate::reference::HOST_USER;

/// Repositories advertise themselves to search with this topic.
pub const DISCOVERY_TOPIC: &str = "shelf";

/// Characters that separate hierarchy levels; none of them may appear in
/// a search glob or a recipe version.
const SEPARATORS: &[char] = &['#', '@', ':'];

/// A parsed `nameGlob[/versionGlob]` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub name_glob: String,
    pub version_glob: Option<String>,
}

impl SearchQuery {
    /// Parses a query. `*` is the only wildcard; a query carrying
    /// revision or package separators is not searchable and yields
    /// `None`.
    pub fn parse(query: &str) -> Option<SearchQuery> {
        let (name, version) = match query.split_once('/') {
            Some((name, version)) => (name, Some(version)),
            None => (query, None),
        };
        if name.is_empty() || !valid_glob(name) {
            return None;
        }
        if let Some(version) = version {
            if version.is_empty() || !valid_glob(version) {
                return None;
            }
        }
        Some(SearchQuery {
            name_glob: name.to_string(),
            version_glob: version.map(String::from),
        })
    }
}

fn valid_glob(glob: &str) -> bool {
    !glob.contains(SEPARATORS) && !glob.contains('/')
}

/// Compiles a `*` glob into an anchored regex.
fn glob_regex(glob: &str) -> Regex {
    let pattern = glob
        .split('*')
        .map(|part| regex::escape(part))
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{pattern}$")).expect("escaped glob patterns always compile")
}

/// The first non-empty literal run between asterisks: the substring the
/// platform search can actually match on.
fn substring_seed(glob: &str) -> Option<&str> {
    glob.split('*').find(|part| !part.is_empty())
}

/// Parses a tag against the recipe-tag grammar `version[#rrev]`.
///
/// Tags carrying package separators or path separators belong to deeper
/// levels (or to the repository's own unrelated tags) and are rejected.
pub fn parse_recipe_tag(tag: &str) -> Option<(&str, Option<&str>)> {
    let (version, rrev) = match tag.split_once('#') {
        Some((version, rrev)) => (version, Some(rrev)),
        None => (tag, None),
    };
    if version.is_empty() || !valid_glob(version) {
        return None;
    }
    if let Some(rrev) = rrev {
        if rrev.is_empty() || !valid_glob(rrev) {
            return None;
        }
    }
    Some((version, rrev))
}

/// Resolves a search query to reference strings, one per matching
/// (repository, version) pair.
///
/// Malformed queries quietly resolve to nothing: permissive clients send
/// them routinely and expect an empty result set, not an error. So do
/// platform search failures.
pub async fn search(host: &dyn ReleaseHost, raw: &str) -> Result<Vec<String>> {
    let Some(query) = SearchQuery::parse(raw) else {
        debug!("unsearchable query: {raw:?}");
        return Ok(Vec::new());
    };

    let platform_query = match substring_seed(&query.name_glob) {
        Some(seed) => format!("{seed} in:name topic:{DISCOVERY_TOPIC}"),
        None => format!("topic:{DISCOVERY_TOPIC}"),
    };
    let name_re = glob_regex(&query.name_glob);
    let version_re = query.version_glob.as_deref().map(glob_regex);

    let repos = match host.search_repositories(&platform_query).await {
        Ok(repos) => repos,
        Err(err) => {
            debug!("repository search failed: {err}");
            return Ok(Vec::new());
        }
    };

    let mut results = Vec::new();
    for repo in repos {
        if !name_re.is_match(&repo.name) {
            continue;
        }
        let id = RepoId {
            owner: repo.owner.clone(),
            name: repo.name.clone(),
        };
        let releases = match host.list_releases(&id).await {
            Ok(releases) => releases,
            Err(err) => {
                debug!("cannot list releases for {id}: {err}");
                continue;
            }
        };
        let mut versions: Vec<String> = Vec::new();
        for release in releases {
            let Some((version, _)) = parse_recipe_tag(&release.tag_name) else {
                continue;
            };
            if let Some(re) = &version_re {
                if !re.is_match(version) {
                    continue;
                }
            }
            if !release.assets.iter().any(|asset| asset.name == MANIFEST_FILE) {
                continue;
            }
            if versions.iter().any(|seen| seen == version) {
                continue;
            }
            versions.push(version.to_string());
            results.push(format!(
                "{}/{version}@{HOST_USER}/{}",
                repo.name, repo.owner
            ));
        }
    }
    Ok(results)
}
