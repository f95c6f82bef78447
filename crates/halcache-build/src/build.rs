//! The [`RemoteDataBuildService`]: request entries in, `RemoteData` out.

use std::{future::Future, sync::Arc};

use futures::{
  StreamExt, future,
  stream::{self, BoxStream},
};
use halcache_core::{
  Result,
  follow::{FollowLinkConfig, follow_link},
  hal::url_without_embed_params,
  list::{PAGE_LINK, PAGINATED_LIST, PaginatedList},
  remote_data::{Payload, RemoteData, RemoteDataStream},
  request::{RequestEntry, RequestEntryState, ResponsePayload},
  resource::{Instance, ResourceRegistry},
  rx::{RxStreamExt, combine_latest, combine_latest_all, just},
  service::{EntryStream, ObjectCache, RequestService},
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::link::LinkService;

// ─── Resolved payloads ───────────────────────────────────────────────────────

/// A resolved payload: a single instance or a paginated list of them.
#[derive(Debug, Clone)]
pub enum Resolved {
  Object(Instance),
  List(PaginatedList<Instance>),
}

impl Resolved {
  pub fn as_object(&self) -> Option<&Instance> {
    match self {
      Self::Object(instance) => Some(instance),
      Self::List(_) => None,
    }
  }

  pub fn into_object(self) -> Option<Instance> {
    match self {
      Self::Object(instance) => Some(instance),
      Self::List(_) => None,
    }
  }

  pub fn into_list(self) -> Option<PaginatedList<Instance>> {
    match self {
      Self::List(list) => Some(list),
      Self::Object(_) => None,
    }
  }

  /// The plain JSON form, without resolved links.
  pub fn to_value(&self) -> Value {
    match self {
      Self::Object(instance) => instance.to_value(),
      Self::List(list) => list.to_value_with(|element| element.to_value()),
    }
  }
}

/// Narrow the payloads of `stream` with `project`. Successful snapshots whose
/// payload does not narrow are dropped, so a success never arrives without a
/// payload.
pub fn narrow<S, T, F>(stream: RemoteDataStream<S>, project: F) -> RemoteDataStream<T>
where
  S: Send + 'static,
  T: Send + 'static,
  F: Fn(S) -> Option<T> + Send + 'static,
{
  stream
    .filter_map(move |item| {
      let out = match item {
        Ok(rd) => {
          let succeeded = rd.has_succeeded();
          let mut mismatched = false;
          let rd = rd.map_payload(|payload| match payload {
            Payload::Value(value) => project(value).map_or_else(
              || {
                mismatched = true;
                Payload::Unresolved
              },
              Payload::Value,
            ),
            Payload::NoContent => Payload::NoContent,
            Payload::Unresolved => Payload::Unresolved,
          });
          if mismatched {
            warn!(state = ?rd.state, "payload is not of the requested kind");
          }
          if succeeded && rd.payload.is_unresolved() { None } else { Some(Ok(rd)) }
        }
        Err(err) => Some(Err(err)),
      };
      future::ready(out)
    })
    .boxed()
}

// ─── Service ─────────────────────────────────────────────────────────────────

type Pair = (RequestEntry, Payload<Resolved>);

/// Cloning is cheap; clones share their collaborators.
#[derive(Clone)]
pub struct RemoteDataBuildService {
  cache:    Arc<dyn ObjectCache>,
  requests: Arc<dyn RequestService>,
  links:    Arc<LinkService>,
  registry: Arc<ResourceRegistry>,
}

impl RemoteDataBuildService {
  pub fn new(
    cache: Arc<dyn ObjectCache>,
    requests: Arc<dyn RequestService>,
    links: Arc<LinkService>,
    registry: Arc<ResourceRegistry>,
  ) -> Self {
    Self { cache, requests, links, registry }
  }

  pub fn link_service(&self) -> &Arc<LinkService> { &self.links }

  pub fn registry(&self) -> &Arc<ResourceRegistry> { &self.registry }

  // ── Payload resolution ────────────────────────────────────────────────

  /// The payload of each entry `entries` emits. Entries without a response
  /// resolve to `NoContent` when they succeeded and `Unresolved` otherwise.
  /// Emits nothing while there is no entry.
  pub fn build_payload(
    &self,
    entries: EntryStream,
    href: Option<String>,
    links: &[FollowLinkConfig],
  ) -> BoxStream<'static, Result<Payload<Resolved>>> {
    self
      .build_pairs(entries, href, links)
      .map(|item| item.map(|(_, payload)| payload))
      .boxed()
  }

  fn build_pairs(
    &self,
    entries: EntryStream,
    href: Option<String>,
    links: &[FollowLinkConfig],
  ) -> BoxStream<'static, Result<Pair>> {
    let service = self.clone();
    let links = links.to_vec();
    entries.switch_map(move |entry| match entry {
      Some(entry) => service.resolve_entry(href.clone(), entry, links.clone()),
      None => stream::empty().boxed(),
    })
  }

  fn resolve_entry(
    &self,
    href: Option<String>,
    entry: RequestEntry,
    links: Vec<FollowLinkConfig>,
  ) -> BoxStream<'static, Result<Pair>> {
    let fallback = if entry.state.has_succeeded() == Some(true) {
      Payload::NoContent
    } else {
      Payload::Unresolved
    };
    let exact = href
      .as_deref()
      .filter(|href| self.has_exact_match_in_object_cache(Some(*href), &entry));
    let objects = match entry.response.as_ref().map(|response| &response.payload) {
      None => None,
      Some(_) if exact.is_some() => exact.map(|href| self.cache.get_object_by_href(href)),
      Some(ResponsePayload::Link(link)) => Some(self.cache.get_object_by_href(&link.href)),
      Some(ResponsePayload::Uncacheable(object)) => Some(just(object.clone())),
      Some(ResponsePayload::None) => None,
    };
    let Some(objects) = objects else {
      return just(Ok((entry, fallback)));
    };

    let service = self.clone();
    objects.switch_map(move |object| {
      let entry = entry.clone();
      service
        .promote(object, &links)
        .map(move |resolved| resolved.map(|r| (entry.clone(), Payload::Value(r))))
        .boxed()
    })
  }

  /// Whether the object cache holds `href` as delivered by this entry's
  /// request.
  pub fn has_exact_match_in_object_cache(&self, href: Option<&str>, entry: &RequestEntry) -> bool {
    match href {
      Some(href) if !href.is_empty() && !entry.request.uuid.is_empty() => {
        self.cache.has_by_href(href, Some(entry.request.uuid.as_str()))
      }
      _ => false,
    }
  }

  /// Reinstantiate a plain object as its registered type.
  pub fn plain_object_to_instance(&self, object: &Value) -> Instance {
    self.registry.instantiate(object)
  }

  fn promote(&self, object: Value, links: &[FollowLinkConfig]) -> BoxStream<'static, Result<Resolved>> {
    if object.get("type").and_then(Value::as_str) == Some(PAGINATED_LIST) {
      return self
        .build_paginated_list(&object, links)
        .map(|list| list.map(Resolved::List))
        .boxed();
    }

    let instance = self.plain_object_to_instance(&object);
    let resolved = if links.is_empty() {
      Ok(instance)
    } else {
      self.links.resolve_links(&instance, links)
    };
    just(resolved.map(Resolved::Object))
  }

  /// Resolve a cached list. A populated inline page is used as-is, otherwise
  /// the elements are read from the object cache by their `page` links. The
  /// `page` config's nested links are resolved on each element, every other
  /// config on the list itself.
  pub fn build_paginated_list(
    &self,
    object: &Value,
    links: &[FollowLinkConfig],
  ) -> BoxStream<'static, Result<PaginatedList<Instance>>> {
    let list = match PaginatedList::from_value(object) {
      Ok(list) => list,
      Err(err) => return just(Err(err)),
    };
    let (page_links, list_links): (Vec<_>, Vec<_>) =
      links.iter().cloned().partition(|config| config.name == PAGE_LINK);
    let element_links: Vec<FollowLinkConfig> =
      page_links.into_iter().flat_map(|config| config.links_to_follow).collect();

    let elements = match list.populated_page() {
      Some(page) => just(page.to_vec()),
      None => self.cache.get_list(&list.page_hrefs()),
    };

    let service = self.clone();
    elements
      .map(move |objects| -> Result<PaginatedList<Instance>> {
        let page = objects
          .iter()
          .map(|object| {
            let instance = service.plain_object_to_instance(object);
            if element_links.is_empty() {
              Ok(instance)
            } else {
              service.links.resolve_links(&instance, &element_links)
            }
          })
          .collect::<Result<Vec<_>>>()?;

        let list = list.clone().with_page(page);
        if list_links.is_empty() {
          Ok(list)
        } else {
          service.links.resolve_links_on(list, &list_links)
        }
      })
      .boxed()
  }

  // ── Pipelines ─────────────────────────────────────────────────────────

  /// Snapshots of the request with `uuid`.
  pub fn build_from_request_uuid(
    &self,
    uuid: &str,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<Resolved> {
    let entries = self.requests.get_by_uuid(uuid);
    to_remote_data(self.build_pairs(entries, None, links))
  }

  /// Snapshots of the resource at `href`, reconciling its own latest request
  /// with the request that last delivered it to the object cache.
  pub fn build_from_href(&self, href: &str, links: &[FollowLinkConfig]) -> RemoteDataStream<Resolved> {
    let href = url_without_embed_params(href);

    let by_href = self
      .requests
      .get_by_href(&href)
      .filter_map(future::ready)
      .map(Some)
      .start_with(None);

    let requests = Arc::clone(&self.requests);
    let by_uuid = self
      .cache
      .get_request_uuid_by_self_link(&href)
      .switch_map(move |uuid| match uuid {
        Some(uuid) => requests.get_by_uuid(&uuid).filter_map(future::ready).boxed(),
        None => stream::empty().boxed(),
      })
      .map(Some)
      .start_with(None);

    let entries = combine_latest(by_href, by_uuid)
      .filter_map(|(r1, r2)| future::ready(pick_entry(r1, r2)))
      .distinct_until_changed_by(|entry| (entry.request.uuid.clone(), entry.last_updated))
      .map(Some)
      .boxed();

    to_remote_data(self.build_pairs(entries, Some(href), links))
  }

  pub fn build_single(&self, href: &str, links: &[FollowLinkConfig]) -> RemoteDataStream<Resolved> {
    self.build_from_href(href, links)
  }

  /// Snapshots of the list at `href`. The `page` link is always followed,
  /// without embedding, and `links` are resolved on its elements.
  pub fn build_list(
    &self,
    href: &str,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<PaginatedList<Instance>> {
    let page = follow_link(PAGE_LINK).embed(false).then(links.iter().cloned());
    narrow(self.build_from_href(href, &[page]), Resolved::into_list)
  }

  /// Snapshots of the request with `uuid`. The first completed snapshot is
  /// handed to `callback` when it succeeded; successful snapshots are held
  /// back until the callback has finished. Pending and failed snapshots pass
  /// straight through.
  pub fn build_from_request_uuid_and_await<F, Fut>(
    &self,
    uuid: &str,
    callback: F,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<Resolved>
  where
    F: FnOnce(RemoteData<Resolved>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let (done_tx, done_rx) = watch::channel(false);

    let mut first_completed = self
      .build_from_request_uuid(uuid, links)
      .filter(|item| future::ready(item.as_ref().map_or(true, RemoteData::has_completed)));
    let request_uuid = uuid.to_owned();
    tokio::spawn(async move {
      if let Some(Ok(rd)) = first_completed.next().await
        && rd.has_succeeded()
      {
        callback(rd).await;
        debug!(uuid = %request_uuid, "request callback finished");
      }
      done_tx.send_replace(true);
    });

    self
      .build_from_request_uuid(uuid, links)
      .switch_map(move |item| match item {
        Ok(rd) if rd.has_succeeded() => {
          let mut done = done_rx.clone();
          stream::once(async move {
            let _ = done.wait_for(|finished| *finished).await;
            Ok(rd)
          })
          .boxed()
        }
        other => just(other),
      })
  }

  /// See [`aggregate`].
  pub fn aggregate<T: Clone + Send + 'static>(
    &self,
    inputs: Vec<RemoteDataStream<T>>,
  ) -> RemoteDataStream<Vec<Payload<T>>> {
    aggregate(inputs)
  }
}

fn to_remote_data(pairs: BoxStream<'static, Result<Pair>>) -> RemoteDataStream<Resolved> {
  pairs
    .filter_map(|item| {
      future::ready(match item {
        Ok((entry, payload))
          if entry.state.has_succeeded() == Some(true) && payload.is_unresolved() =>
        {
          None
        }
        Ok((entry, payload)) => Some(Ok(RemoteData::from_entry(&entry, payload))),
        Err(err) => Some(Err(err)),
      })
    })
    .take_until_error()
}

/// Staleness first, then recency: a fresh entry beats a stale one, and
/// between two equally stale entries the most recently updated one wins.
fn pick_entry(r1: Option<RequestEntry>, r2: Option<RequestEntry>) -> Option<RequestEntry> {
  match (r1, r2) {
    (None, None) => None,
    (Some(r), None) | (None, Some(r)) => Some(r),
    (Some(r1), Some(r2)) => {
      if r1.state.is_stale() == r2.state.is_stale() {
        Some(if r1.last_updated >= r2.last_updated { r1 } else { r2 })
      } else if r1.state.is_stale() {
        Some(r2)
      } else {
        Some(r1)
      }
    }
  }
}

// ─── Aggregate ───────────────────────────────────────────────────────────────

const STATE_PRECEDENCE: [RequestEntryState; 6] = [
  RequestEntryState::RequestPending,
  RequestEntryState::ResponsePending,
  RequestEntryState::ErrorStale,
  RequestEntryState::Error,
  RequestEntryState::SuccessStale,
  RequestEntryState::Success,
];

/// Combine independent snapshot streams into one snapshot of all payloads.
///
/// Times take the latest value, the time-to-live the shortest, the state the
/// most pending or failing one. The payload holds one slot per input, in
/// input order, and error messages are prefixed with the same index. The
/// status code is shared by all inputs or `207`. No inputs yield a single
/// successful, empty snapshot.
pub fn aggregate<T: Clone + Send + 'static>(
  inputs: Vec<RemoteDataStream<T>>,
) -> RemoteDataStream<Vec<Payload<T>>> {
  if inputs.is_empty() {
    return just(Ok(RemoteData::success(Payload::Value(Vec::new()))));
  }
  combine_latest_all(inputs)
    .map(|snapshots| -> Result<RemoteData<Vec<Payload<T>>>> {
      let snapshots = snapshots.into_iter().collect::<Result<Vec<_>>>()?;
      Ok(combine_snapshots(snapshots))
    })
    .take_until_error()
}

fn combine_snapshots<T>(snapshots: Vec<RemoteData<T>>) -> RemoteData<Vec<Payload<T>>> {
  let time_completed = snapshots.iter().filter_map(|rd| rd.time_completed).max();
  let last_updated = snapshots.iter().filter_map(|rd| rd.last_updated).max();
  let ms_to_live = snapshots.iter().filter_map(|rd| rd.ms_to_live).min();
  let state = STATE_PRECEDENCE
    .into_iter()
    .find(|state| snapshots.iter().any(|rd| rd.state == *state))
    .unwrap_or(RequestEntryState::Success);

  let errors: Vec<String> = snapshots
    .iter()
    .enumerate()
    .filter_map(|(index, rd)| rd.error_message.as_ref().map(|msg| format!("[{index}]: {msg}")))
    .collect();
  let error_message = (!errors.is_empty()).then(|| errors.join(", "));

  let first_status = snapshots.first().and_then(|rd| rd.status_code);
  let status_code = if snapshots.iter().all(|rd| rd.status_code == first_status) {
    first_status
  } else {
    Some(207)
  };

  let payload = Payload::Value(snapshots.into_iter().map(|rd| rd.payload).collect());

  RemoteData::new(
    time_completed,
    ms_to_live,
    last_updated,
    state,
    error_message,
    payload,
    status_code,
  )
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use halcache_core::request::RestRequest;

  use super::*;

  fn entry(uuid: &str, state: RequestEntryState, at: i64) -> RequestEntry {
    RequestEntry {
      request:      RestRequest::get(uuid, "https://rest.api/items/1"),
      state,
      response:     None,
      last_updated: Utc.timestamp_opt(at, 0).unwrap(),
    }
  }

  fn snapshot(state: RequestEntryState, status: Option<u16>, msg: Option<&str>) -> RemoteData<u8> {
    let mut rd = RemoteData::success(Payload::Value(1));
    rd.state = state;
    rd.status_code = status;
    rd.error_message = msg.map(str::to_owned);
    rd
  }

  #[test]
  fn fresh_entries_beat_stale_ones_regardless_of_age() {
    let stale = entry("a", RequestEntryState::SuccessStale, 20);
    let fresh = entry("b", RequestEntryState::Success, 10);
    assert_eq!(pick_entry(Some(stale.clone()), Some(fresh.clone())).unwrap().request.uuid, "b");
    assert_eq!(pick_entry(Some(fresh), Some(stale)).unwrap().request.uuid, "b");
  }

  #[test]
  fn equally_stale_entries_pick_the_most_recent() {
    let older = entry("a", RequestEntryState::Success, 10);
    let newer = entry("b", RequestEntryState::Success, 20);
    assert_eq!(pick_entry(Some(older.clone()), Some(newer.clone())).unwrap().request.uuid, "b");
    assert_eq!(pick_entry(Some(newer), Some(older)).unwrap().request.uuid, "b");

    let tie_a = entry("a", RequestEntryState::ErrorStale, 5);
    let tie_b = entry("b", RequestEntryState::SuccessStale, 5);
    assert_eq!(pick_entry(Some(tie_a), Some(tie_b)).unwrap().request.uuid, "a");
    assert!(pick_entry(None, None).is_none());
  }

  #[test]
  fn aggregate_state_follows_precedence() {
    use RequestEntryState::*;
    let cases = [
      (vec![Success, SuccessStale], SuccessStale),
      (vec![SuccessStale, Error], Error),
      (vec![Error, ErrorStale], ErrorStale),
      (vec![ErrorStale, ResponsePending], ResponsePending),
      (vec![ResponsePending, RequestPending, Success], RequestPending),
    ];
    for (states, expected) in cases {
      let snapshots = states.into_iter().map(|s| snapshot(s, Some(200), None)).collect();
      assert_eq!(combine_snapshots(snapshots).state, expected);
    }
  }

  #[test]
  fn aggregate_merges_messages_and_status_codes() {
    let combined = combine_snapshots(vec![
      snapshot(RequestEntryState::Success, Some(200), None),
      snapshot(RequestEntryState::Error, Some(404), Some("missing")),
      snapshot(RequestEntryState::Error, Some(500), Some("boom")),
    ]);
    assert_eq!(combined.error_message.as_deref(), Some("[1]: missing, [2]: boom"));
    assert_eq!(combined.status_code, Some(207));

    let same = combine_snapshots(vec![
      snapshot(RequestEntryState::Success, Some(200), None),
      snapshot(RequestEntryState::Success, Some(200), None),
    ]);
    assert_eq!(same.status_code, Some(200));
    assert_eq!(same.error_message, None);
    assert_eq!(same.payload, Payload::Value(vec![Payload::Value(1), Payload::Value(1)]));
  }

  #[test]
  fn aggregate_takes_extreme_times() {
    let mut a = snapshot(RequestEntryState::Success, Some(200), None);
    let mut b = snapshot(RequestEntryState::Success, Some(200), None);
    a.time_completed = Some(Utc.timestamp_opt(100, 0).unwrap());
    b.time_completed = Some(Utc.timestamp_opt(200, 0).unwrap());
    a.ms_to_live = Some(1_000);
    b.ms_to_live = Some(500);

    let combined = combine_snapshots(vec![a, b]);
    assert_eq!(combined.time_completed, Some(Utc.timestamp_opt(200, 0).unwrap()));
    assert_eq!(combined.ms_to_live, Some(500));
  }
}
