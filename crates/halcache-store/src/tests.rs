//! Tests for the in-memory request service, object cache and response
//! normalization, against a scripted transport.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::{StreamExt, future};
use halcache_core::{
  Error,
  request::{RequestEntry, RequestEntryState, ResponsePayload, RestRequest},
  service::{EntryStream, ObjectCache, RawResponse, RequestService, Transport},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::{MemoryObjectCache, MemoryRequestService, normalize_response};

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// Answers from a fixed table. With a gate, every call first waits for a
/// permit.
#[derive(Default)]
struct ScriptedTransport {
  responses: Mutex<HashMap<String, RawResponse>>,
  calls:     Mutex<Vec<String>>,
  gate:      Option<Arc<Semaphore>>,
}

impl ScriptedTransport {
  fn respond(&self, href: &str, status: u16, body: Option<Value>) {
    self.responses.lock().insert(href.to_owned(), RawResponse { status, body });
  }

  fn calls(&self) -> Vec<String> { self.calls.lock().clone() }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn execute(&self, request: &RestRequest) -> halcache_core::Result<RawResponse> {
    self.calls.lock().push(request.href.clone());
    if let Some(gate) = &self.gate {
      gate.acquire().await.expect("gate open").forget();
    }
    let response = self.responses.lock().get(&request.href).cloned();
    response.ok_or_else(|| Error::Transport(format!("connection refused: {}", request.href)))
  }
}

fn item(id: &str) -> Value {
  json!({
    "type": "item",
    "uuid": id,
    "name": format!("Item {id}"),
    "_links": { "self": { "href": format!("https://rest.api/items/{id}") } },
  })
}

fn services(transport: Arc<ScriptedTransport>) -> (Arc<MemoryObjectCache>, MemoryRequestService) {
  let cache = Arc::new(MemoryObjectCache::new());
  let requests = MemoryRequestService::new(cache.clone(), transport);
  (cache, requests)
}

async fn first_completed(stream: EntryStream) -> RequestEntry {
  let mut stream =
    stream.filter(|e| future::ready(e.as_ref().is_some_and(|e| e.state.has_completed())));
  stream.next().await.flatten().expect("completed entry")
}

fn get(requests: &MemoryRequestService, href: &str) -> RestRequest {
  RestRequest::get(requests.generate_request_id(), href).with_ms_to_live(Some(60_000))
}

// ─── Normalization ───────────────────────────────────────────────────────────

#[test]
fn embedded_resources_are_cached_separately() {
  let cache = MemoryObjectCache::new();
  let request = RestRequest::get("r1", "https://rest.api/items/1?embed=bundles");
  let mut body = item("1");
  body["_embedded"] = json!({
    "bundles": {
      "page": { "size": 20, "totalElements": 1, "totalPages": 1, "number": 0 },
      "_embedded": { "bundles": [{
        "type": "bundle",
        "name": "ORIGINAL",
        "_links": { "self": { "href": "https://rest.api/bundles/b1" } },
      }]},
      "_links": { "self": { "href": "https://rest.api/items/1/bundles" } },
    },
  });

  let response = normalize_response(&cache, &request, RawResponse { status: 200, body: Some(body) });
  assert_eq!(
    response.payload.payload_link().map(|l| l.href.as_str()),
    Some("https://rest.api/items/1")
  );

  let cached = cache.entry("https://rest.api/items/1").expect("item cached");
  assert!(cached.data.get("_embedded").is_none());
  assert_eq!(cached.request_uuids, vec!["r1"]);

  let list = cache.entry("https://rest.api/items/1/bundles").expect("list cached");
  assert_eq!(list.data["type"], "paginated-list");
  assert_eq!(list.data["pageInfo"]["currentPage"], 1);
  assert_eq!(list.data["_links"]["page"][0]["href"], "https://rest.api/bundles/b1");
  assert!(cache.has_by_href("https://rest.api/bundles/b1", Some("r1")));
}

#[test]
fn embedded_resources_are_reachable_by_their_link() {
  let cache = MemoryObjectCache::new();
  let request = RestRequest::get("r1", "https://rest.api/items/1?embed=owningCollection");
  let mut body = item("1");
  body["_links"]["owningCollection"] =
    json!({ "href": "https://rest.api/items/1/owningCollection{?projection}", "templated": true });
  body["_embedded"] = json!({
    "owningCollection": {
      "type": "collection",
      "_links": { "self": { "href": "https://rest.api/collections/c1" } },
    },
  });

  normalize_response(&cache, &request, RawResponse { status: 200, body: Some(body) });
  let via_link = cache.entry("https://rest.api/items/1/owningCollection").expect("alternative link");
  assert_eq!(via_link.self_link(), Some("https://rest.api/collections/c1"));
}

#[test]
fn lists_without_self_link_stay_inline() {
  let cache = MemoryObjectCache::new();
  let request = RestRequest::get("r1", "https://rest.api/discover/search");
  let body = json!({
    "page": { "size": 2, "totalElements": 1, "totalPages": 1, "number": 0 },
    "_embedded": { "items": [item("7")] },
  });

  let response = normalize_response(&cache, &request, RawResponse { status: 200, body: Some(body) });
  let list = response.payload.uncacheable_object().expect("inline list");
  assert_eq!(list["type"], "paginated-list");
  assert_eq!(list["page"][0]["uuid"], "7");
  // the elements themselves are still cacheable
  assert!(cache.has_by_href("https://rest.api/items/7", None));
}

#[test]
fn error_bodies_supply_the_message() {
  let cache = MemoryObjectCache::new();
  let request = RestRequest::get("r1", "https://rest.api/items/404");
  let response = normalize_response(&cache, &request, RawResponse {
    status: 404,
    body:   Some(json!({ "message": "Item not found" })),
  });
  assert_eq!(response.status_code, Some(404));
  assert_eq!(response.error_message.as_deref(), Some("Item not found"));
  assert_eq!(response.payload, ResponsePayload::None);
}

#[test]
fn plain_values_are_uncacheable() {
  let cache = MemoryObjectCache::new();
  let request = RestRequest::get("r1", "https://rest.api/authn/status");
  let body = json!({ "authenticated": false });
  let response =
    normalize_response(&cache, &request, RawResponse { status: 200, body: Some(body.clone()) });
  assert_eq!(response.payload, ResponsePayload::Uncacheable(body));

  let empty = normalize_response(&cache, &request, RawResponse { status: 204, body: None });
  assert_eq!(empty.payload, ResponsePayload::None);
  assert!(empty.is_successful());
}

// ─── Object cache ────────────────────────────────────────────────────────────

#[test]
fn alternative_links_resolve_to_the_self_link() {
  let cache = MemoryObjectCache::new();
  cache.add(item("1"), None, "r1", Some("https://rest.api/items/handle/1")).unwrap();
  cache.add(item("1"), None, "r2", None).unwrap();

  let entry = cache.entry("https://rest.api/items/handle/1?embed=bundles").unwrap();
  assert_eq!(entry.self_link(), Some("https://rest.api/items/1"));
  assert_eq!(entry.request_uuids, vec!["r2", "r1"]);
  assert_eq!(entry.alternative_links, vec!["https://rest.api/items/handle/1"]);
  assert!(cache.has_by_href("https://rest.api/items/1", Some("r1")));
  assert!(!cache.has_by_href("https://rest.api/items/1", Some("r3")));
}

#[test]
fn objects_without_self_link_are_rejected() {
  let cache = MemoryObjectCache::new();
  let err = cache.add(json!({ "type": "item" }), None, "r1", None).unwrap_err();
  assert_eq!(err, Error::MissingSelfLink);
}

#[test]
fn dependencies_are_recorded_once_and_cleared() {
  let cache = MemoryObjectCache::new();
  cache.add(item("1"), None, "r1", None).unwrap();

  assert!(cache.add_dependency("https://rest.api/items/1", "r9"));
  assert!(cache.add_dependency("https://rest.api/items/1", "r9"));
  assert!(!cache.add_dependency("https://rest.api/items/2", "r9"));
  assert_eq!(cache.entry("https://rest.api/items/1").unwrap().dependent_request_uuids, vec!["r9"]);

  cache.remove_dependents("https://rest.api/items/1");
  assert!(cache.entry("https://rest.api/items/1").unwrap().dependent_request_uuids.is_empty());
}

#[tokio::test]
async fn streams_follow_adds_and_removals() {
  let cache = MemoryObjectCache::new();
  let mut objects = cache.get_by_href("https://rest.api/items/1");
  assert_eq!(objects.next().await, Some(None));

  cache.add(item("1"), None, "r1", None).unwrap();
  let entry = objects.next().await.flatten().expect("entry");
  assert_eq!(entry.data["uuid"], "1");

  cache.remove("https://rest.api/items/1");
  assert_eq!(objects.next().await, Some(None));
  assert!(!cache.has_by_href("https://rest.api/items/1", None));
}

#[test]
fn removed_and_unobserved_objects_release_their_channels() {
  let cache = MemoryObjectCache::new();
  for n in 0..1_000 {
    let id = n.to_string();
    cache.add(item(&id), None, &format!("r{n}"), None).unwrap();
    cache.remove(&format!("https://rest.api/items/{id}"));
    drop(cache.get_by_href(&format!("https://rest.api/missing/{n}")));
  }
  let (links, entries) = cache.channel_counts();
  assert!(links < 300, "{links} link channels left");
  assert!(entries < 300, "{entries} entry channels left");

  cache.add(item("kept"), None, "r-kept", None).unwrap();
  assert!(cache.has_by_href("https://rest.api/items/kept", None));
}

#[tokio::test]
async fn get_list_waits_for_every_object() {
  let cache = MemoryObjectCache::new();
  cache.add(item("1"), None, "r1", None).unwrap();
  let hrefs = vec!["https://rest.api/items/1".to_owned(), "https://rest.api/items/2".to_owned()];
  let mut list = cache.get_list(&hrefs);

  cache.add(item("2"), None, "r2", None).unwrap();
  let objects = list.next().await.expect("both present");
  assert_eq!(objects.len(), 2);
  assert_eq!(objects[0]["uuid"], "1");
  assert_eq!(objects[1]["uuid"], "2");

  assert_eq!(cache.get_list(&[]).next().await, Some(Vec::new()));
}

// ─── Request service ─────────────────────────────────────────────────────────

#[tokio::test]
async fn send_runs_the_request_to_completion() {
  let transport = Arc::new(ScriptedTransport::default());
  transport.respond("https://rest.api/items/1", 200, Some(item("1")));
  let (cache, requests) = services(transport.clone());

  let request = get(&requests, "https://rest.api/items/1");
  let uuid = request.uuid.clone();
  assert!(requests.send(request, false));

  let mut states = requests.get_by_uuid(&uuid);
  assert!(states.next().await.flatten().is_some());

  let entry = first_completed(requests.get_by_uuid(&uuid)).await;
  assert_eq!(entry.state, RequestEntryState::Success);
  assert_eq!(entry.response.as_ref().and_then(|r| r.status_code), Some(200));
  assert!(cache.has_by_href("https://rest.api/items/1", Some(uuid.as_str())));

  let by_href = first_completed(requests.get_by_href("https://rest.api/items/1?embed=x")).await;
  assert_eq!(by_href.request.uuid, uuid);
  assert!(requests.has_by_href("https://rest.api/items/1"));
}

#[tokio::test]
async fn transport_failures_become_error_entries() {
  let transport = Arc::new(ScriptedTransport::default());
  let (_, requests) = services(transport);

  let request = get(&requests, "https://rest.api/items/down");
  let uuid = request.uuid.clone();
  requests.send(request, false);

  let entry = first_completed(requests.get_by_uuid(&uuid)).await;
  assert_eq!(entry.state, RequestEntryState::Error);
  let response = entry.response.expect("response");
  assert_eq!(response.status_code, None);
  assert!(response.error_message.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn pending_gets_are_not_dispatched_twice() {
  let gate = Arc::new(Semaphore::new(0));
  let transport = Arc::new(ScriptedTransport { gate: Some(gate.clone()), ..Default::default() });
  transport.respond("https://rest.api/items/1", 200, Some(item("1")));
  let (_, requests) = services(transport.clone());

  let first = get(&requests, "https://rest.api/items/1");
  let uuid = first.uuid.clone();
  assert!(requests.send(first, false));
  assert!(!requests.send(get(&requests, "https://rest.api/items/1"), false));

  gate.add_permits(1);
  first_completed(requests.get_by_uuid(&uuid)).await;
  assert_eq!(transport.calls(), vec!["https://rest.api/items/1"]);
}

#[tokio::test]
async fn cached_gets_are_skipped_only_when_asked() {
  let transport = Arc::new(ScriptedTransport::default());
  transport.respond("https://rest.api/items/1", 200, Some(item("1")));
  let (_, requests) = services(transport.clone());

  let first = get(&requests, "https://rest.api/items/1");
  let uuid = first.uuid.clone();
  requests.send(first, true);
  first_completed(requests.get_by_uuid(&uuid)).await;

  assert!(!requests.send(get(&requests, "https://rest.api/items/1"), true));
  assert_eq!(transport.calls().len(), 1);

  let fresh = get(&requests, "https://rest.api/items/1");
  let fresh_uuid = fresh.uuid.clone();
  assert!(requests.send(fresh, false));
  first_completed(requests.get_by_uuid(&fresh_uuid)).await;
  assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn non_get_requests_always_dispatch() {
  let transport = Arc::new(ScriptedTransport::default());
  transport.respond("https://rest.api/items", 201, Some(item("3")));
  let (_, requests) = services(transport.clone());

  for _ in 0..2 {
    let post = RestRequest::post(requests.generate_request_id(), "https://rest.api/items", json!({}));
    let uuid = post.uuid.clone();
    assert!(requests.send(post, true));
    first_completed(requests.get_by_uuid(&uuid)).await;
  }
  assert_eq!(transport.calls().len(), 2);
  // writes are not indexed by href
  assert!(!requests.has_by_href("https://rest.api/items"));
}

#[tokio::test]
async fn stale_entries_are_requested_again() {
  let transport = Arc::new(ScriptedTransport::default());
  transport.respond("https://rest.api/items/1", 200, Some(item("1")));
  let (_, requests) = services(transport.clone());

  let first = get(&requests, "https://rest.api/items/1");
  let uuid = first.uuid.clone();
  requests.send(first, true);
  first_completed(requests.get_by_uuid(&uuid)).await;

  assert!(requests.set_stale_by_uuid(&uuid).await);
  let entry = first_completed(requests.get_by_uuid(&uuid)).await;
  assert_eq!(entry.state, RequestEntryState::SuccessStale);
  assert!(!requests.has_by_href("https://rest.api/items/1"));

  assert!(requests.send(get(&requests, "https://rest.api/items/1"), true));
}

#[tokio::test]
async fn staling_unknown_requests_reports_false() {
  let (_, requests) = services(Arc::new(ScriptedTransport::default()));
  assert!(!requests.set_stale_by_uuid("missing").await);
}

#[tokio::test]
async fn loading_entries_go_stale_once_completed() {
  let gate = Arc::new(Semaphore::new(0));
  let transport = Arc::new(ScriptedTransport { gate: Some(gate.clone()), ..Default::default() });
  transport.respond("https://rest.api/items/1", 200, Some(item("1")));
  let (_, requests) = services(transport);

  let request = get(&requests, "https://rest.api/items/1");
  let uuid = request.uuid.clone();
  requests.send(request, false);

  let stale = tokio::spawn({
    let requests = requests.clone();
    let uuid = uuid.clone();
    async move { requests.set_stale_by_uuid(&uuid).await }
  });
  gate.add_permits(1);
  assert!(stale.await.unwrap());
}

#[tokio::test]
async fn href_substrings_stale_and_remove_entries() {
  let transport = Arc::new(ScriptedTransport::default());
  transport.respond("https://rest.api/items/1", 200, Some(item("1")));
  transport.respond("https://rest.api/items/2", 200, Some(item("2")));
  transport.respond("https://rest.api/bundles/b1", 404, None);
  let (_, requests) = services(transport);

  let mut uuids = Vec::new();
  for href in ["https://rest.api/items/1", "https://rest.api/items/2", "https://rest.api/bundles/b1"] {
    let request = get(&requests, href);
    uuids.push(request.uuid.clone());
    requests.send(request, false);
  }
  for uuid in &uuids {
    first_completed(requests.get_by_uuid(uuid)).await;
  }

  assert!(requests.set_stale_by_href_substring("/items/").await);
  assert!(requests.get_by_uuid(&uuids[0]).next().await.flatten().unwrap().state.is_stale());
  assert!(requests.get_by_uuid(&uuids[1]).next().await.flatten().unwrap().state.is_stale());
  let untouched = requests.get_by_uuid(&uuids[2]).next().await.flatten().unwrap();
  assert_eq!(untouched.state, RequestEntryState::Error);

  requests.remove_by_href_substring("/items/1");
  assert_eq!(requests.get_by_uuid(&uuids[0]).next().await, Some(None));
  assert_eq!(requests.get_by_href("https://rest.api/items/1").next().await, Some(None));
  assert!(requests.get_by_uuid(&uuids[1]).next().await.flatten().is_some());
}

#[tokio::test]
async fn removed_requests_release_their_channels() {
  let transport = Arc::new(ScriptedTransport::default());
  transport.respond("https://rest.api/items/1", 200, Some(item("1")));
  let (_, requests) = services(transport);

  let request = get(&requests, "https://rest.api/items/1");
  let uuid = request.uuid.clone();
  requests.send(request, false);
  first_completed(requests.get_by_uuid(&uuid)).await;
  for n in 0..1_000 {
    drop(requests.get_by_uuid(&format!("unknown-{n}")));
  }

  requests.remove_by_href_substring("/items/1");
  assert_eq!(requests.channel_counts(), (0, 0));
  assert_eq!(requests.get_by_uuid(&uuid).next().await, Some(None));
}
