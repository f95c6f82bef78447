//! In-memory request bookkeeping and object cache.
//!
//! Both stores keep their state in `tokio::sync::watch` channels, so every
//! read is a live stream that yields the current value and then each change.
//! Construct them explicitly and share them behind `Arc`.

mod normalize;
mod object_cache;
mod request;
mod slots;

pub mod error;

pub use error::{Error, Result};
pub use normalize::normalize_response;
pub use object_cache::MemoryObjectCache;
pub use request::MemoryRequestService;

#[cfg(test)]
mod tests;
