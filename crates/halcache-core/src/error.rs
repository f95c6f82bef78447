//! Error types for `halcache-core`.

use thiserror::Error;

/// Caller-contract violations. These end a stream; they are never carried
/// inside a `RemoteData`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
  /// A follow-link config named a link the resource type never declared.
  #[error("link {link:?} was followed on a {resource_type:?} which does not declare it")]
  UndeclaredLink {
    link:          String,
    resource_type: String,
  },

  /// The root resource has no endpoint for the requested link path.
  #[error("no endpoint configured for link path {0:?}")]
  NoEndpoint(String),

  #[error("object has no self link")]
  MissingSelfLink,

  /// A resolved link was opened after its data service was dropped.
  #[error("link service is not bound to a data service")]
  Unbound,

  #[error("transport error: {0}")]
  Transport(String),

  #[error("serialization error: {0}")]
  Serialization(String),
}

impl From<serde_json::Error> for Error {
  fn from(err: serde_json::Error) -> Self { Self::Serialization(err.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
