//! GitHub REST implementation of the shelf registry's release-host
//! capability.
//!
//! One [`GithubClient`] is built per inbound request, carrying that
//! request's token (or the server's fallback token for anonymous reads),
//! so no credentials are ever shared across requests.

pub mod client;

pub use client::GithubClient;
