//! Request bookkeeping: the request descriptor, its lifecycle state, and the
//! response it produced.
//!
//! A [`RequestEntry`] is owned by the request service. It is never mutated in
//! place; each lifecycle transition publishes a fresh entry value to the
//! entry's subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hal::HalLink;

// ─── Request ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RestRequestMethod {
  Get,
  Post,
  Put,
  Patch,
  Delete,
  Head,
  Options,
}

impl RestRequestMethod {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
      Self::Head => "HEAD",
      Self::Options => "OPTIONS",
    }
  }
}

/// A request descriptor, identified by a caller-generated UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestRequest {
  pub uuid:                String,
  pub href:                String,
  pub method:              RestRequestMethod,
  pub body:                Option<serde_json::Value>,
  pub content_type:        Option<String>,
  /// How long a successful response stays valid, in milliseconds.
  pub response_ms_to_live: Option<u64>,
}

impl RestRequest {
  pub fn new(
    uuid: impl Into<String>,
    href: impl Into<String>,
    method: RestRequestMethod,
  ) -> Self {
    Self {
      uuid: uuid.into(),
      href: href.into(),
      method,
      body: None,
      content_type: None,
      response_ms_to_live: None,
    }
  }

  pub fn get(uuid: impl Into<String>, href: impl Into<String>) -> Self {
    Self::new(uuid, href, RestRequestMethod::Get)
  }

  pub fn post(
    uuid: impl Into<String>,
    href: impl Into<String>,
    body: serde_json::Value,
  ) -> Self {
    Self::new(uuid, href, RestRequestMethod::Post).with_body(body)
  }

  pub fn put(
    uuid: impl Into<String>,
    href: impl Into<String>,
    body: serde_json::Value,
  ) -> Self {
    Self::new(uuid, href, RestRequestMethod::Put).with_body(body)
  }

  pub fn delete(uuid: impl Into<String>, href: impl Into<String>) -> Self {
    Self::new(uuid, href, RestRequestMethod::Delete)
  }

  pub fn with_body(mut self, body: serde_json::Value) -> Self {
    self.body = Some(body);
    self.content_type.get_or_insert_with(|| "application/json".to_owned());
    self
  }

  pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
    self.content_type = Some(content_type.into());
    self
  }

  pub fn with_ms_to_live(mut self, ms_to_live: Option<u64>) -> Self {
    self.response_ms_to_live = ms_to_live;
    self
  }

  pub fn is_get(&self) -> bool { self.method == RestRequestMethod::Get }
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

/// The lifecycle of a request.
///
/// `RequestPending → ResponsePending → {Success, Error}`, after which a
/// completed entry can be marked stale. Stale entries are still completed;
/// their value is usable but should be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestEntryState {
  RequestPending,
  ResponsePending,
  Success,
  Error,
  SuccessStale,
  ErrorStale,
}

impl RequestEntryState {
  pub fn is_request_pending(self) -> bool { self == Self::RequestPending }

  pub fn is_response_pending(self) -> bool { self == Self::ResponsePending }

  pub fn is_success(self) -> bool { self == Self::Success }

  pub fn is_error(self) -> bool { self == Self::Error }

  pub fn is_success_stale(self) -> bool { self == Self::SuccessStale }

  pub fn is_error_stale(self) -> bool { self == Self::ErrorStale }

  pub fn is_loading(self) -> bool {
    self.is_request_pending() || self.is_response_pending()
  }

  pub fn has_completed(self) -> bool { !self.is_loading() }

  pub fn is_stale(self) -> bool {
    self.is_success_stale() || self.is_error_stale()
  }

  /// `None` while the request is still loading.
  pub fn has_succeeded(self) -> Option<bool> {
    self
      .has_completed()
      .then(|| self.is_success() || self.is_success_stale())
  }

  /// `None` while the request is still loading.
  pub fn has_failed(self) -> Option<bool> {
    self
      .has_completed()
      .then(|| self.is_error() || self.is_error_stale())
  }

  /// The state this one becomes when marked stale. Loading states are left
  /// untouched.
  pub fn to_stale(self) -> Self {
    match self {
      Self::Success => Self::SuccessStale,
      Self::Error => Self::ErrorStale,
      other => other,
    }
  }
}

// ─── Response ────────────────────────────────────────────────────────────────

/// Where the payload of a completed response can be found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResponsePayload {
  /// The payload was normalized into the object cache under this self link.
  Link(HalLink),
  /// The payload could not be cached and is carried inline.
  Uncacheable(serde_json::Value),
  /// No payload: a 204, or an error.
  None,
}

impl ResponsePayload {
  pub fn payload_link(&self) -> Option<&HalLink> {
    match self {
      Self::Link(link) => Some(link),
      _ => None,
    }
  }

  pub fn uncacheable_object(&self) -> Option<&serde_json::Value> {
    match self {
      Self::Uncacheable(value) => Some(value),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseState {
  pub time_completed: DateTime<Utc>,
  /// `None` only when the transport failed before an HTTP status arrived.
  pub status_code:    Option<u16>,
  pub error_message:  Option<String>,
  pub payload:        ResponsePayload,
}

impl ResponseState {
  pub fn is_successful(&self) -> bool {
    self.status_code.is_some_and(|code| (200..300).contains(&code))
  }
}

// ─── Entry ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEntry {
  pub request:      RestRequest,
  pub state:        RequestEntryState,
  pub response:     Option<ResponseState>,
  pub last_updated: DateTime<Utc>,
}

impl RequestEntry {
  /// A freshly dispatched entry.
  pub fn pending(request: RestRequest) -> Self {
    Self {
      request,
      state: RequestEntryState::RequestPending,
      response: None,
      last_updated: Utc::now(),
    }
  }

  /// The same entry in `state`, stamped now.
  pub fn with_state(&self, state: RequestEntryState) -> Self {
    Self { state, last_updated: Utc::now(), ..self.clone() }
  }

  /// The same entry completed with `response`, stamped now.
  pub fn completed(&self, response: ResponseState) -> Self {
    let state = if response.is_successful() {
      RequestEntryState::Success
    } else {
      RequestEntryState::Error
    };
    Self {
      state,
      response: Some(response),
      last_updated: Utc::now(),
      ..self.clone()
    }
  }

  /// A completed entry is valid while it is not stale and its response is
  /// younger than the request's time-to-live. Loading entries are valid.
  pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
    if self.state.is_loading() {
      return true;
    }
    if self.state.is_stale() {
      return false;
    }
    match (&self.response, self.request.response_ms_to_live) {
      (Some(response), Some(ttl)) => {
        let ttl = chrono::Duration::milliseconds(ttl.min(i64::MAX as u64) as i64);
        response.time_completed + ttl > now
      }
      _ => true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use RequestEntryState::*;

  #[test]
  fn succeeded_and_failed_are_undefined_while_loading() {
    for state in [RequestPending, ResponsePending] {
      assert_eq!(state.has_succeeded(), None);
      assert_eq!(state.has_failed(), None);
      assert!(state.is_loading());
    }
    for state in [Success, SuccessStale] {
      assert_eq!(state.has_succeeded(), Some(true));
      assert_eq!(state.has_failed(), Some(false));
    }
    for state in [Error, ErrorStale] {
      assert_eq!(state.has_failed(), Some(true));
      assert_eq!(state.has_succeeded(), Some(false));
    }
  }

  #[test]
  fn stale_transition_only_touches_completed_states() {
    assert_eq!(Success.to_stale(), SuccessStale);
    assert_eq!(Error.to_stale(), ErrorStale);
    assert_eq!(RequestPending.to_stale(), RequestPending);
    assert_eq!(ResponsePending.to_stale(), ResponsePending);
    assert_eq!(SuccessStale.to_stale(), SuccessStale);
  }

  #[test]
  fn expired_entries_are_invalid() {
    let request = RestRequest::get("u1", "https://rest.api/items/1").with_ms_to_live(Some(1_000));
    let entry = RequestEntry::pending(request.clone()).completed(ResponseState {
      time_completed: Utc::now() - chrono::Duration::seconds(5),
      status_code:    Some(200),
      error_message:  None,
      payload:        ResponsePayload::None,
    });

    assert!(!entry.is_valid(Utc::now()));
    assert!(RequestEntry::pending(request).is_valid(Utc::now()));
  }

  #[test]
  fn stale_entries_are_invalid() {
    let entry = RequestEntry::pending(RestRequest::get("u1", "https://rest.api/items/1"))
      .completed(ResponseState {
        time_completed: Utc::now(),
        status_code:    Some(200),
        error_message:  None,
        payload:        ResponsePayload::None,
      });
    assert!(entry.is_valid(Utc::now()));
    assert!(!entry.with_state(SuccessStale).is_valid(Utc::now()));
  }
}
