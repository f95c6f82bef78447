//! Collaborator traits.
//!
//! The build and data layers only see these traits. `halcache-store` provides
//! the in-memory request service and object cache, `halcache-http` provides
//! the HTTP transport.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::{StreamExt, future, stream::BoxStream};
use serde_json::Value;

use crate::{
  Result,
  request::{RequestEntry, RestRequest},
  rx::{combine_latest_all, just},
};

/// A live view of one request entry. `None` while no entry exists.
pub type EntryStream = BoxStream<'static, Option<RequestEntry>>;

// ─── RequestService ──────────────────────────────────────────────────────────

/// Issues requests and tracks their entries by UUID and by href.
///
/// Hrefs are indexed without their `embed` parameters.
#[async_trait]
pub trait RequestService: Send + Sync {
  fn generate_request_id(&self) -> String;

  /// Dispatch `request` unless a cached or pending answer makes it
  /// unnecessary. Returns whether it was dispatched.
  fn send(&self, request: RestRequest, use_cached: bool) -> bool;

  /// The entry of the latest request for `href`.
  fn get_by_href(&self, href: &str) -> EntryStream;

  fn get_by_uuid(&self, uuid: &str) -> EntryStream;

  /// Whether a valid entry exists for `href`.
  fn has_by_href(&self, href: &str) -> bool;

  /// Mark the entry stale. Resolves once it is observed stale; `false` when
  /// there is no such entry.
  async fn set_stale_by_uuid(&self, uuid: &str) -> bool;

  /// Mark every entry whose href contains `substring` stale.
  async fn set_stale_by_href_substring(&self, substring: &str) -> bool;

  fn remove_by_href_substring(&self, substring: &str);
}

// ─── ObjectCache ─────────────────────────────────────────────────────────────

/// A normalized object and its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectCacheEntry {
  pub data:                    Value,
  pub time_completed:          DateTime<Utc>,
  pub ms_to_live:              Option<u64>,
  /// Requests that delivered this object, most recent first.
  pub request_uuids:           Vec<String>,
  /// Requests to stale when this object is invalidated.
  pub dependent_request_uuids: Vec<String>,
  pub alternative_links:       Vec<String>,
}

impl ObjectCacheEntry {
  pub fn self_link(&self) -> Option<&str> {
    self.data.pointer("/_links/self/href").and_then(Value::as_str)
  }

  /// Whether the object is still within its time-to-live.
  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    match self.ms_to_live {
      Some(ttl) => self.time_completed + Duration::milliseconds(ttl.min(i64::MAX as u64) as i64) > now,
      None => true,
    }
  }
}

/// Normalized JSON objects keyed by self link.
///
/// Every href argument may be a self link or an alternative link; `embed`
/// parameters are ignored.
pub trait ObjectCache: Send + Sync {
  /// Store `object` under its self link, recording `request_uuid` as its most
  /// recent request.
  fn add(
    &self,
    object: Value,
    ms_to_live: Option<u64>,
    request_uuid: &str,
    alternative_link: Option<&str>,
  ) -> Result<()>;

  /// The current entry for `href`, if any.
  fn entry(&self, href: &str) -> Option<ObjectCacheEntry>;

  /// A live view of the entry for `href`. `None` while absent.
  fn get_by_href(&self, href: &str) -> BoxStream<'static, Option<ObjectCacheEntry>>;

  /// The cached object for `href`, emitted whenever it is present.
  fn get_object_by_href(&self, href: &str) -> BoxStream<'static, Value> {
    self
      .get_by_href(href)
      .filter_map(|entry| future::ready(entry.map(|e| e.data)))
      .boxed()
  }

  /// Whether `href` is cached, and when `request_uuid` is given, whether that
  /// request delivered it.
  fn has_by_href(&self, href: &str, request_uuid: Option<&str>) -> bool {
    self.entry(href).is_some_and(|entry| {
      request_uuid.is_none_or(|uuid| entry.request_uuids.iter().any(|u| u == uuid))
    })
  }

  /// The objects for `hrefs`, in order, once all are present.
  fn get_list(&self, hrefs: &[String]) -> BoxStream<'static, Vec<Value>> {
    if hrefs.is_empty() {
      return just(Vec::new());
    }
    combine_latest_all(hrefs.iter().map(|href| self.get_object_by_href(href)).collect())
  }

  /// The most recent request UUID of the object with this self link.
  fn get_request_uuid_by_self_link(&self, self_link: &str) -> BoxStream<'static, Option<String>> {
    self
      .get_by_href(self_link)
      .map(|entry| entry.and_then(|e| e.request_uuids.first().cloned()))
      .boxed()
  }

  /// Register `request_uuid` as dependent on the object at `depends_on`.
  /// Returns `false` when that object is not cached.
  fn add_dependency(&self, depends_on: &str, request_uuid: &str) -> bool;

  /// Forget the dependents of the object at `href`.
  fn remove_dependents(&self, href: &str);

  fn remove(&self, href: &str);
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// What came back over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
  pub status: u16,
  pub body:   Option<Value>,
}

/// Executes requests. Only failures to get any HTTP response are errors;
/// non-2xx statuses are responses.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn execute(&self, request: &RestRequest) -> Result<RawResponse>;
}
