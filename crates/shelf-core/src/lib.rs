//! Core model and persistence for the shelf registry.
//!
//! A shelf registry serves the Conan repository protocol without a database
//! of its own: every recipe's revision tree is a JSON document embedded in
//! the body of a GitHub release, and every uploaded file is an asset of the
//! release whose tag encodes its position in the
//! recipe → recipe-revision → package → package-revision hierarchy.
//!
//! The crate is organized leaf-first:
//! - [`reference`] turns request parameters into platform tags,
//! - [`codec`] embeds and recovers the metadata document,
//! - [`model`] holds the revision tree and its get-or-create resolver,
//! - [`store`] loads and saves the one root release per recipe,
//! - [`ops`] creates releases, streams assets, and cascades deletions,
//! - [`search`] maps package globs onto the platform's repository search.
//!
//! Everything the backing platform does is reached through the
//! [`host::ReleaseHost`] trait, so the whole crate can run against the
//! in-memory host in [`testing`].

pub mod codec;
pub mod error;
pub mod host;
pub mod model;
pub mod ops;
pub mod reference;
pub mod search;
pub mod store;
pub mod testing;

pub use error::{RegistryError, Result};
