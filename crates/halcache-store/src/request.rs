//! The in-memory [`RequestService`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::{StreamExt, future::join_all};
use halcache_core::{
  hal::url_without_embed_params,
  request::{RequestEntry, RequestEntryState, ResponsePayload, ResponseState, RestRequest},
  rx::{RxStreamExt, just},
  service::{EntryStream, ObjectCache, RequestService, Transport},
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{normalize::normalize_response, slots::Slots};

#[derive(Default)]
struct Requests {
  entries: Slots<RequestEntry>,
  /// Embed-stripped href to the UUID of its latest request.
  hrefs:   Slots<String>,
}

impl Requests {
  fn slot(&mut self, uuid: &str) -> &watch::Sender<Option<RequestEntry>> { self.entries.slot(uuid) }

  fn href(&mut self, href: &str) -> &watch::Sender<Option<String>> { self.hrefs.slot(href) }

  fn get(&self, uuid: &str) -> Option<RequestEntry> { self.entries.current(uuid) }

  fn latest(&self, href: &str) -> Option<RequestEntry> {
    let uuid = self.hrefs.current(href)?;
    self.get(&uuid)
  }
}

fn watch_entry(requests: &Mutex<Requests>, uuid: &str) -> EntryStream {
  let rx = requests.lock().slot(uuid).subscribe();
  WatchStream::new(rx).boxed()
}

// ─── Service ─────────────────────────────────────────────────────────────────

/// Dispatches requests through a [`Transport`] on spawned tokio tasks and
/// normalizes their responses into the object cache. Must be used from
/// within a tokio runtime.
///
/// Cloning is cheap; clones share the same bookkeeping.
#[derive(Clone)]
pub struct MemoryRequestService {
  requests:  Arc<Mutex<Requests>>,
  cache:     Arc<dyn ObjectCache>,
  transport: Arc<dyn Transport>,
}

impl MemoryRequestService {
  pub fn new(cache: Arc<dyn ObjectCache>, transport: Arc<dyn Transport>) -> Self {
    Self { requests: Arc::default(), cache, transport }
  }

  #[cfg(test)]
  pub(crate) fn channel_counts(&self) -> (usize, usize) {
    let requests = self.requests.lock();
    (requests.entries.len(), requests.hrefs.len())
  }

  fn is_pending(&self, href: &str) -> bool {
    self
      .requests
      .lock()
      .latest(href)
      .is_some_and(|entry| entry.state.is_loading())
  }

  /// A GET for `href` can be answered without a new request: its latest
  /// request is still valid, or the object cache holds a fresh copy whose
  /// delivering request has not gone stale.
  fn is_cached(&self, href: &str) -> bool {
    let now = Utc::now();
    let requests = self.requests.lock();
    if requests.latest(href).is_some_and(|entry| entry.is_valid(now)) {
      return true;
    }
    match self.cache.entry(href) {
      Some(object) if object.is_fresh(now) => object
        .request_uuids
        .first()
        .and_then(|uuid| requests.get(uuid))
        .is_none_or(|entry| entry.is_valid(now)),
      _ => false,
    }
  }

  /// Store the pending entry and execute it. Only GET requests are indexed
  /// by href.
  fn dispatch(&self, request: RestRequest) {
    let entry = RequestEntry::pending(request);
    {
      let mut requests = self.requests.lock();
      requests.slot(&entry.request.uuid).send_replace(Some(entry.clone()));
      if entry.request.is_get() {
        let href = url_without_embed_params(&entry.request.href);
        requests.href(&href).send_replace(Some(entry.request.uuid.clone()));
      }
    }
    debug!(
      uuid = %entry.request.uuid,
      method = entry.request.method.as_str(),
      href = %entry.request.href,
      "dispatching request"
    );

    let service = self.clone();
    tokio::spawn(async move { service.execute(entry).await });
  }

  /// Publish a transition of an existing entry. Entries removed in the
  /// meantime stay removed.
  fn update(&self, entry: &RequestEntry) {
    let requests = self.requests.lock();
    if let Some(tx) = requests.entries.get(&entry.request.uuid) {
      tx.send_if_modified(|current| {
        if current.is_none() {
          return false;
        }
        *current = Some(entry.clone());
        true
      });
    }
  }

  async fn execute(self, entry: RequestEntry) {
    let entry = entry.with_state(RequestEntryState::ResponsePending);
    self.update(&entry);

    let response = match self.transport.execute(&entry.request).await {
      Ok(raw) => normalize_response(self.cache.as_ref(), &entry.request, raw),
      Err(err) => {
        warn!(%err, href = %entry.request.href, "request failed");
        ResponseState {
          time_completed: Utc::now(),
          status_code:    None,
          error_message:  Some(err.to_string()),
          payload:        ResponsePayload::None,
        }
      }
    };

    let entry = entry.completed(response);
    debug!(
      uuid = %entry.request.uuid,
      state = ?entry.state,
      status = ?entry.response.as_ref().and_then(|r| r.status_code),
      "request completed"
    );
    self.update(&entry);
  }
}

#[async_trait]
impl RequestService for MemoryRequestService {
  fn generate_request_id(&self) -> String { Uuid::new_v4().to_string() }

  fn send(&self, request: RestRequest, use_cached: bool) -> bool {
    if !request.is_get() {
      if use_cached {
        warn!(
          method = request.method.as_str(),
          href = %request.href,
          "cached versions only apply to GET requests"
        );
      }
      self.dispatch(request);
      return true;
    }

    let href = url_without_embed_params(&request.href);
    if self.is_pending(&href) {
      debug!(%href, "request already pending");
      return false;
    }
    if use_cached && self.is_cached(&href) {
      debug!(%href, "using cached response");
      return false;
    }
    self.dispatch(request);
    true
  }

  fn get_by_href(&self, href: &str) -> EntryStream {
    let href = url_without_embed_params(href);
    let uuids = self.requests.lock().href(&href).subscribe();
    let requests = Arc::clone(&self.requests);

    WatchStream::new(uuids)
      .switch_map(move |uuid| match uuid {
        Some(uuid) => watch_entry(&requests, &uuid),
        None => just(None),
      })
      .boxed()
  }

  fn get_by_uuid(&self, uuid: &str) -> EntryStream { watch_entry(&self.requests, uuid) }

  fn has_by_href(&self, href: &str) -> bool {
    let now = Utc::now();
    self
      .requests
      .lock()
      .latest(&url_without_embed_params(href))
      .is_some_and(|entry| entry.is_valid(now))
  }

  async fn set_stale_by_uuid(&self, uuid: &str) -> bool {
    let mut rx = {
      let requests = self.requests.lock();
      match requests.entries.get(uuid) {
        Some(tx) if tx.borrow().is_some() => tx.subscribe(),
        _ => return false,
      }
    };

    // A loading entry goes stale once it completes.
    let completed = rx
      .wait_for(|entry| entry.as_ref().is_none_or(|e| e.state.has_completed()))
      .await
      .is_ok();
    if !completed {
      return false;
    }

    {
      let requests = self.requests.lock();
      if let Some(tx) = requests.entries.get(uuid) {
        tx.send_if_modified(|current| match current {
          Some(entry) if entry.state.has_completed() && !entry.state.is_stale() => {
            *entry = entry.with_state(entry.state.to_stale());
            true
          }
          _ => false,
        });
      }
    }

    let stale = rx.borrow().as_ref().is_some_and(|e| e.state.is_stale());
    if stale {
      debug!(%uuid, "request marked stale");
    }
    stale
  }

  async fn set_stale_by_href_substring(&self, substring: &str) -> bool {
    let uuids: Vec<String> = {
      let requests = self.requests.lock();
      requests
        .entries
        .iter()
        .filter(|(_, tx)| {
          tx.borrow()
            .as_ref()
            .is_some_and(|e| e.request.href.contains(substring))
        })
        .map(|(uuid, _)| uuid.clone())
        .collect()
    };

    join_all(uuids.iter().map(|uuid| self.set_stale_by_uuid(uuid)))
      .await
      .into_iter()
      .all(|stale| stale)
  }

  fn remove_by_href_substring(&self, substring: &str) {
    let mut requests = self.requests.lock();
    let mut removed = Vec::new();
    for (uuid, tx) in requests.entries.iter() {
      let matched = tx.send_if_modified(|current| {
        if !current.as_ref().is_some_and(|e| e.request.href.contains(substring)) {
          return false;
        }
        *current = None;
        true
      });
      if matched {
        removed.push(uuid.clone());
      }
    }
    for tx in requests.hrefs.values() {
      tx.send_if_modified(|latest| {
        if !latest.as_ref().is_some_and(|uuid| removed.contains(uuid)) {
          return false;
        }
        *latest = None;
        true
      });
    }
    requests.entries.prune();
    requests.hrefs.prune();
    debug!(%substring, count = removed.len(), "removed requests");
  }
}
