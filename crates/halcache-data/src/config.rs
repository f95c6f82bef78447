//! Cache configuration.

use serde::{Deserialize, Serialize};

/// Fifteen minutes.
pub const DEFAULT_RESPONSE_MS_TO_LIVE: u64 = 15 * 60 * 1000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
  /// The REST root resource, whose `_links` name every endpoint.
  pub rest_root:            String,
  /// How long GET responses stay valid, in milliseconds.
  #[serde(default = "default_response_ms_to_live")]
  pub response_ms_to_live:  u64,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

fn default_response_ms_to_live() -> u64 { DEFAULT_RESPONSE_MS_TO_LIVE }

fn default_request_timeout_secs() -> u64 { DEFAULT_REQUEST_TIMEOUT_SECS }

impl CacheConfig {
  pub fn new(rest_root: impl Into<String>) -> Self {
    Self {
      rest_root:            rest_root.into(),
      response_ms_to_live:  DEFAULT_RESPONSE_MS_TO_LIVE,
      request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn missing_fields_take_defaults() {
    let config: CacheConfig =
      serde_json::from_value(json!({ "rest_root": "https://rest.api/server/api" })).unwrap();
    assert_eq!(config, CacheConfig::new("https://rest.api/server/api"));
    assert_eq!(config.response_ms_to_live, 900_000);
  }
}
