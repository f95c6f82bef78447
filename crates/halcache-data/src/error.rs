//! Error types for `halcache-data`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  /// The stream ended before the request completed.
  #[error("stream ended before the request completed")]
  Incomplete,

  #[error(transparent)]
  Core(#[from] halcache_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
