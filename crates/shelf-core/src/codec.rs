//! Embeds the recipe metadata document in a release body.
//!
//! The document rides inside an HTML comment so the release notes stay
//! readable on GitHub; whatever text surrounds the comment belongs to the
//! repository owner and must round-trip byte-for-byte on every save.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{RegistryError, Result};
use crate::model::Recipe;

/// A release body that is nothing but an HTML comment gets rendered by
/// GitHub instead of hidden. Leading with a non-whitespace token that
/// renders as whitespace keeps the comment invisible.
pub const HIDDEN_PREFIX: &str = "&nbsp;\n";

/// Greedy prefix, lazy comment interior, greedy suffix. Greediness makes
/// the last marker comment in the body the authoritative one.
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(.*)<!--\s*shelf\s*(.*?)\s*-->(.*)$")
        .expect("unable to compile metadata comment regex")
});

/// A decoded release body: the metadata document plus the untouched text
/// around it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub prefix: String,
    pub recipe: Recipe,
    pub suffix: String,
}

/// Wraps the recipe document in the comment form stored in a release body.
pub fn serialize(recipe: &Recipe) -> String {
    let json =
        serde_json::to_string_pretty(recipe).expect("recipe metadata is always serializable");
    format!("<!--shelf\nDo not edit or remove this comment.\n{json}\n-->")
}

/// Splits a release body around the embedded metadata comment.
///
/// A body without a comment decodes to an empty recipe with the whole body
/// preserved as prefix. Trailing text inside the comment after the JSON
/// document is tolerated; a document that cannot be recovered at all means
/// the backing store is in a bad state, not the caller.
pub fn deserialize(body: &str, reference: &str) -> Result<Decoded> {
    let Some(caps) = COMMENT_RE.captures(body) else {
        return Ok(Decoded {
            prefix: body.to_string(),
            recipe: Recipe::default(),
            suffix: String::new(),
        });
    };
    let prefix = caps[1].to_string();
    let suffix = caps[3].to_string();
    let inner = caps.get(2).map_or("", |m| m.as_str());
    let document = match inner.find('{') {
        Some(at) => &inner[at..],
        None => inner,
    };
    let recipe = json_prefix(document)
        .map_err(|_| RegistryError::BadGateway(format!("Bad metadata comment: {reference}")))?;
    Ok(Decoded {
        prefix,
        recipe,
        suffix,
    })
}

/// Parses the first complete JSON value in `text`, ignoring whatever
/// follows it.
fn json_prefix(text: &str) -> serde_json::Result<Recipe> {
    let mut values = serde_json::Deserializer::from_str(text).into_iter::<Recipe>();
    match values.next() {
        Some(result) => result,
        None => serde_json::from_str(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Package, PackageRevision, RecipeRevision, ReleaseRef};

    const REFERENCE: &str = "zlib/1.2.13@github/alice";

    fn sample_recipe() -> Recipe {
        let mut rrev = RecipeRevision::new("abc123");
        rrev.revision.release = Some(ReleaseRef {
            id: 17,
            origin: "https://uploads.github.com".into(),
        });
        let mut package = Package::new("fedcba");
        package.revisions.push(PackageRevision::new("9f8e"));
        rrev.packages.push(package);
        Recipe {
            revisions: vec![RecipeRevision::new("0"), rrev],
        }
    }

    #[test]
    fn test_round_trip_empty() {
        let recipe = Recipe::default();
        let decoded = deserialize(&serialize(&recipe), REFERENCE).unwrap();
        assert_eq!(decoded.recipe, recipe);
        assert_eq!(decoded.prefix, "");
        assert_eq!(decoded.suffix, "");
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let recipe = sample_recipe();
        let decoded = deserialize(&serialize(&recipe), REFERENCE).unwrap();
        assert_eq!(decoded.recipe, recipe);
    }

    #[test]
    fn test_prefix_and_suffix_survive() {
        let prefix = "Release notes with { braces } and <b>markup</b>.\n";
        let suffix = "\nMore notes: }{ not JSON.";
        let body = format!("{prefix}{}{suffix}", serialize(&sample_recipe()));
        let decoded = deserialize(&body, REFERENCE).unwrap();
        assert_eq!(decoded.prefix, prefix);
        assert_eq!(decoded.suffix, suffix);
        assert_eq!(decoded.recipe, sample_recipe());
    }

    #[test]
    fn test_body_without_comment_is_all_prefix() {
        let body = "Just some human-written release notes.";
        let decoded = deserialize(body, REFERENCE).unwrap();
        assert_eq!(decoded.prefix, body);
        assert_eq!(decoded.suffix, "");
        assert!(decoded.recipe.revisions.is_empty());
    }

    #[test]
    fn test_trailing_garbage_inside_comment_is_ignored() {
        let body = "<!--shelf\nDo not edit.\n{\"revisions\": []}\nappended by a bot\n-->";
        let decoded = deserialize(body, REFERENCE).unwrap();
        assert!(decoded.recipe.revisions.is_empty());
    }

    #[test]
    fn test_unparseable_document_is_bad_gateway() {
        let body = "<!--shelf\n{\"revisions\": [truncated-->";
        let err = deserialize(body, REFERENCE).unwrap_err();
        assert_eq!(err.status(), 502);
        assert!(format!("{err}").contains(REFERENCE));
    }

    #[test]
    fn test_comment_without_any_json_is_bad_gateway() {
        let body = "<!--shelf\nno document here\n-->";
        let err = deserialize(body, REFERENCE).unwrap_err();
        assert_eq!(err.status(), 502);
    }

    #[test]
    fn test_hidden_prefix_body_round_trips() {
        let body = format!("{HIDDEN_PREFIX}{}", serialize(&Recipe::default()));
        let decoded = deserialize(&body, REFERENCE).unwrap();
        assert_eq!(decoded.prefix, HIDDEN_PREFIX);
        assert_eq!(decoded.suffix, "");
    }

    #[test]
    fn test_last_marker_comment_wins() {
        let first = "<!--shelf\n{\"revisions\": [{\"id\": \"old\", \"time\": \"t\"}]}\n-->";
        let second = serialize(&Recipe::default());
        let body = format!("{first}\nmiddle\n{second}");
        let decoded = deserialize(&body, REFERENCE).unwrap();
        assert!(decoded.recipe.revisions.is_empty());
        assert!(decoded.prefix.contains("old"));
    }
}
