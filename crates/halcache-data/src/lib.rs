//! Data services over the remote-data cache.
//!
//! A [`DataContext`] owns the object cache and request service and hands out
//! [`BaseDataService`]s, one per resource type. Reads return live
//! `RemoteData` streams and follow the re-request-on-stale policy; writes
//! invalidate what they change.

pub mod config;
mod context;
mod endpoint;
pub mod error;
mod service;

pub use config::CacheConfig;
pub use context::DataContext;
pub use endpoint::HalEndpointService;
pub use error::{Error, Result};
pub use service::{BaseDataService, DataServiceCore, build_href_from_find_options, first_completed};
