//! The Conan route table.
//!
//! Paths follow the shape
//! `/{api}/conans/{name}/{version}/{user}/{channel}/…` where `{api}` is
//! the protocol version segment (`v1`, `v2`). Anything unrecognized is
//! intentionally unimplemented and answered with 501.

use hyper::Method;

/// Reference segments lifted from the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeParams {
    pub name: String,
    pub version: String,
    pub user: String,
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeRoute {
    /// `GET …/` — file map of the latest recipe revision.
    Files,
    /// `DELETE …/` — the whole recipe.
    Delete,
    /// `GET …/latest`
    Latest,
    /// `GET …/revisions`
    Revisions,
    /// `GET …/download_urls`
    DownloadUrls,
    /// `DELETE …/revisions/{rrev}`
    RevisionDelete { rrev: String },
    /// `GET …/revisions/{rrev}/files`
    RevisionFiles { rrev: String },
    /// `GET …/revisions/{rrev}/files/{filename}`
    RevisionFile { rrev: String, filename: String },
    /// `PUT …/revisions/{rrev}/files/{filename}`
    RevisionUpload { rrev: String, filename: String },
    /// `GET …/revisions/{rrev}/packages/{package}/latest`
    PackageLatest { rrev: String, package: String },
    /// `GET …/revisions/{rrev}/packages/{package}/revisions`
    PackageRevisions { rrev: String, package: String },
    /// `DELETE …/revisions/{rrev}/packages/{package}/revisions/{prev}`
    PackageRevisionDelete {
        rrev: String,
        package: String,
        prev: String,
    },
    /// `GET …/revisions/{rrev}/packages/{package}/revisions/{prev}/files`
    PackageRevisionFiles {
        rrev: String,
        package: String,
        prev: String,
    },
    /// `GET …/…/revisions/{prev}/files/{filename}`
    PackageRevisionFile {
        rrev: String,
        package: String,
        prev: String,
        filename: String,
    },
    /// `PUT …/…/revisions/{prev}/files/{filename}`
    PackageRevisionUpload {
        rrev: String,
        package: String,
        prev: String,
        filename: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Ping,
    Authenticate,
    CheckCredentials,
    Search,
    Recipe(RecipeParams, RecipeRoute),
    NotImplemented,
}

impl Route {
    pub fn parse(method: &Method, path: &str) -> Route {
        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        match (method.as_str(), segments.as_slice()) {
            ("GET", ["v1", "ping"]) => Route::Ping,
            ("GET", [_, "users", "authenticate"]) => Route::Authenticate,
            ("GET", [_, "users", "check_credentials"]) => Route::CheckCredentials,
            ("GET", [_, "conans", "search"]) => Route::Search,
            (method, [_, "conans", name, version, user, channel, rest @ ..]) => {
                let params = RecipeParams {
                    name: name.to_string(),
                    version: version.to_string(),
                    user: user.to_string(),
                    channel: channel.to_string(),
                };
                match recipe_route(method, rest) {
                    Some(route) => Route::Recipe(params, route),
                    None => Route::NotImplemented,
                }
            }
            _ => Route::NotImplemented,
        }
    }
}

fn recipe_route(method: &str, rest: &[&str]) -> Option<RecipeRoute> {
    let route = match (method, rest) {
        ("GET", []) => RecipeRoute::Files,
        ("DELETE", []) => RecipeRoute::Delete,
        ("GET", ["latest"]) => RecipeRoute::Latest,
        ("GET", ["revisions"]) => RecipeRoute::Revisions,
        ("GET", ["download_urls"]) => RecipeRoute::DownloadUrls,
        ("DELETE", ["revisions", rrev]) => {
            RecipeRoute::RevisionDelete {
                rrev: rrev.to_string(),
            }
        }
        ("GET", ["revisions", rrev, "files"]) => {
            RecipeRoute::RevisionFiles {
                rrev: rrev.to_string(),
            }
        }
        ("GET", ["revisions", rrev, "files", filename]) => {
            RecipeRoute::RevisionFile {
                rrev: rrev.to_string(),
                filename: filename.to_string(),
            }
        }
        ("PUT", ["revisions", rrev, "files", filename]) => {
            RecipeRoute::RevisionUpload {
                rrev: rrev.to_string(),
                filename: filename.to_string(),
            }
        }
        ("GET", ["revisions", rrev, "packages", package, "latest"]) => {
            RecipeRoute::PackageLatest {
                rrev: rrev.to_string(),
                package: package.to_string(),
            }
        }
        ("GET", ["revisions", rrev, "packages", package, "revisions"]) => {
            RecipeRoute::PackageRevisions {
                rrev: rrev.to_string(),
                package: package.to_string(),
            }
        }
        ("DELETE", ["revisions", rrev, "packages", package, "revisions", prev]) => {
            RecipeRoute::PackageRevisionDelete {
                rrev: rrev.to_string(),
                package: package.to_string(),
                prev: prev.to_string(),
            }
        }
        ("GET", ["revisions", rrev, "packages", package, "revisions", prev, "files"]) => {
            RecipeRoute::PackageRevisionFiles {
                rrev: rrev.to_string(),
                package: package.to_string(),
                prev: prev.to_string(),
            }
        }
        ("GET", ["revisions", rrev, "packages", package, "revisions", prev, "files", filename]) => {
            RecipeRoute::PackageRevisionFile {
                rrev: rrev.to_string(),
                package: package.to_string(),
                prev: prev.to_string(),
                filename: filename.to_string(),
            }
        }
        ("PUT", ["revisions", rrev, "packages", package, "revisions", prev, "files", filename]) => {
            RecipeRoute::PackageRevisionUpload {
                rrev: rrev.to_string(),
                package: package.to_string(),
                prev: prev.to_string(),
                filename: filename.to_string(),
            }
        }
        _ => return None,
    };
    Some(route)
}
