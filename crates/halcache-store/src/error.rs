//! Error type for `halcache-store`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] halcache_core::Error),

  /// A successful response body that cannot be read as a HAL resource.
  #[error("unexpected response body: {0}")]
  UnexpectedBody(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
