//! [`RemoteData`], the immutable snapshot handed to consumers.
//!
//! A `RemoteData<T>` pairs a request's lifecycle state with its resolved
//! payload. Consumers branch on the state, never on the payload alone: an
//! unresolved payload, an empty (204) payload, and a failed request are three
//! different things.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::{
  Result,
  request::{RequestEntry, RequestEntryState},
};

// ─── Payload ─────────────────────────────────────────────────────────────────

/// The payload slot of a [`RemoteData`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload<T> {
  /// Not resolved (yet): the request is loading, failed, or its object has
  /// not reached the cache.
  #[default]
  Unresolved,
  /// The request succeeded without content.
  NoContent,
  Value(T),
}

impl<T> Payload<T> {
  pub fn is_unresolved(&self) -> bool { matches!(self, Self::Unresolved) }

  pub fn is_no_content(&self) -> bool { matches!(self, Self::NoContent) }

  pub fn value(&self) -> Option<&T> {
    match self {
      Self::Value(v) => Some(v),
      _ => None,
    }
  }

  pub fn into_value(self) -> Option<T> {
    match self {
      Self::Value(v) => Some(v),
      _ => None,
    }
  }

  pub fn as_ref(&self) -> Payload<&T> {
    match self {
      Self::Unresolved => Payload::Unresolved,
      Self::NoContent => Payload::NoContent,
      Self::Value(v) => Payload::Value(v),
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Payload<U> {
    match self {
      Self::Unresolved => Payload::Unresolved,
      Self::NoContent => Payload::NoContent,
      Self::Value(v) => Payload::Value(f(v)),
    }
  }
}

// ─── RemoteData ──────────────────────────────────────────────────────────────

/// A live stream of [`RemoteData`] snapshots. An `Err` item is a
/// caller-contract violation and is always the last item of the stream.
pub type RemoteDataStream<T> = BoxStream<'static, Result<RemoteData<T>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteData<T> {
  pub time_completed: Option<DateTime<Utc>>,
  pub ms_to_live:     Option<u64>,
  pub last_updated:   Option<DateTime<Utc>>,
  pub state:          RequestEntryState,
  pub error_message:  Option<String>,
  pub payload:        Payload<T>,
  pub status_code:    Option<u16>,
}

impl<T> RemoteData<T> {
  pub fn new(
    time_completed: Option<DateTime<Utc>>,
    ms_to_live: Option<u64>,
    last_updated: Option<DateTime<Utc>>,
    state: RequestEntryState,
    error_message: Option<String>,
    payload: Payload<T>,
    status_code: Option<u16>,
  ) -> Self {
    Self {
      time_completed,
      ms_to_live,
      last_updated,
      state,
      error_message,
      payload,
      status_code,
    }
  }

  /// Project a request entry and its resolved payload into a snapshot.
  pub fn from_entry(entry: &RequestEntry, payload: Payload<T>) -> Self {
    let response = entry.response.as_ref();
    Self {
      time_completed: response.map(|r| r.time_completed),
      ms_to_live: entry.request.response_ms_to_live,
      last_updated: Some(entry.last_updated),
      state: entry.state,
      error_message: response.and_then(|r| r.error_message.clone()),
      payload,
      status_code: response.and_then(|r| r.status_code),
    }
  }

  /// A completed, successful snapshot stamped now.
  pub fn success(payload: Payload<T>) -> Self {
    let now = Utc::now();
    Self::new(
      Some(now),
      None,
      Some(now),
      RequestEntryState::Success,
      None,
      payload,
      Some(200),
    )
  }

  /// A snapshot of a request that has not been answered yet.
  pub fn pending() -> Self {
    Self::new(
      None,
      None,
      Some(Utc::now()),
      RequestEntryState::RequestPending,
      None,
      Payload::Unresolved,
      None,
    )
  }

  /// A completed, failed snapshot stamped now.
  pub fn failed(error_message: impl Into<String>, status_code: Option<u16>) -> Self {
    let now = Utc::now();
    Self::new(
      Some(now),
      None,
      Some(now),
      RequestEntryState::Error,
      Some(error_message.into()),
      Payload::Unresolved,
      status_code,
    )
  }

  pub fn is_request_pending(&self) -> bool { self.state.is_request_pending() }

  pub fn is_response_pending(&self) -> bool { self.state.is_response_pending() }

  pub fn is_loading(&self) -> bool { self.state.is_loading() }

  pub fn has_failed(&self) -> bool { self.state.has_failed().unwrap_or(false) }

  pub fn has_succeeded(&self) -> bool { self.state.has_succeeded().unwrap_or(false) }

  pub fn is_error_stale(&self) -> bool { self.state.is_error_stale() }

  pub fn is_success_stale(&self) -> bool { self.state.is_success_stale() }

  pub fn is_stale(&self) -> bool { self.state.is_stale() }

  pub fn has_completed(&self) -> bool { self.state.has_completed() }

  pub fn has_no_content(&self) -> bool { self.status_code == Some(204) }

  /// A new snapshot with the same metadata and a transformed payload.
  pub fn map_payload<U>(self, f: impl FnOnce(Payload<T>) -> Payload<U>) -> RemoteData<U> {
    RemoteData {
      time_completed: self.time_completed,
      ms_to_live:     self.ms_to_live,
      last_updated:   self.last_updated,
      state:          self.state,
      error_message:  self.error_message,
      payload:        f(self.payload),
      status_code:    self.status_code,
    }
  }

  pub fn with_payload<U>(self, payload: Payload<U>) -> RemoteData<U> {
    self.map_payload(|_| payload)
  }
}
