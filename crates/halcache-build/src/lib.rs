//! Turning request entries and cached objects into [`RemoteData`] streams.
//!
//! [`RemoteDataBuildService`] resolves a request's payload from the object
//! cache, promotes it to a typed instance or a paginated list, and projects
//! the `(entry, payload)` pair into a `RemoteData` snapshot. [`LinkService`]
//! attaches lazily resolved links to those instances.
//!
//! [`RemoteData`]: halcache_core::remote_data::RemoteData

mod build;
mod link;

pub use build::{RemoteDataBuildService, Resolved, aggregate, narrow};
pub use link::{LinkFetcher, LinkService};
