//! Source-control integration: the Bitbucket Server REST client and the
//! temporary repository snapshot provider used by reviewer selection.

pub mod client;
pub mod snapshot;

pub use client::{BitbucketClient, ScmError};
pub use snapshot::{CloneRequest, RepositorySnapshot, SnapshotError};
