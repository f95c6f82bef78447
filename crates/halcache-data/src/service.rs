//! Data services: cached reads, writes, and invalidation.
//!
//! [`DataServiceCore`] works on type-erased instances and is what followed
//! links read through. [`BaseDataService`] narrows it to one resource type
//! and one endpoint of the REST root.

use std::{future::Future, marker::PhantomData, sync::Arc};

use chrono::Utc;
use futures::{
  StreamExt,
  future::{self, join_all},
  stream::BoxStream,
};
use halcache_build::{LinkFetcher, RemoteDataBuildService, Resolved, narrow};
use halcache_core::{
  Error, Result as CoreResult,
  follow::{FollowLinkConfig, embed_params},
  list::{FindListOptions, PaginatedList},
  remote_data::{Payload, RemoteData, RemoteDataStream},
  request::RestRequest,
  resource::{Instance, TypedResource},
  rx::{RxStreamExt, just},
  service::{ObjectCache, RequestService},
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Result, endpoint::HalEndpointService};

// ─── Href building ───────────────────────────────────────────────────────────

/// `href` with find options, `extra` arguments and embed parameters appended.
///
/// Pages are 1-based in [`FindListOptions`] and 0-based on the wire. An
/// argument already present in `href` is not repeated.
pub fn build_href_from_find_options(
  href: &str,
  options: &FindListOptions,
  extra: &[String],
  links: &[FollowLinkConfig],
) -> String {
  let mut args: Vec<String> = Vec::new();
  let mut add = |arg: String| {
    if !href.contains(&arg) && !args.contains(&arg) {
      args.push(arg);
    }
  };

  for arg in extra {
    add(arg.clone());
  }
  if let Some(page) = options.current_page {
    add(format!("page={}", page.saturating_sub(1)));
  }
  if let Some(size) = options.elements_per_page {
    add(format!("size={size}"));
  }
  if let Some(sort) = &options.sort {
    add(format!("sort={},{}", sort.field, sort.direction.as_str()));
  }
  if let Some(prefix) = &options.starts_with {
    add(format!("startsWith={prefix}"));
  }
  for param in &options.search_params {
    add(format!("{}={}", param.field_name, param.field_value));
  }
  for param in embed_params(links) {
    add(param);
  }

  if args.is_empty() {
    return href.to_owned();
  }
  let separator = if href.contains('?') { '&' } else { '?' };
  format!("{href}{separator}{}", args.join("&"))
}

/// The first completed snapshot of `stream`.
pub async fn first_completed<T>(stream: RemoteDataStream<T>) -> Result<RemoteData<T>> {
  let mut completed =
    stream.filter(|item| future::ready(item.as_ref().map_or(true, RemoteData::has_completed)));
  match completed.next().await {
    Some(item) => Ok(item?),
    None => Err(crate::Error::Incomplete),
  }
}

fn no_content<T>(payload: Payload<T>) -> Payload<()> {
  match payload {
    Payload::Unresolved => Payload::Unresolved,
    Payload::NoContent | Payload::Value(_) => Payload::NoContent,
  }
}

type SelfLinks = BoxStream<'static, CoreResult<RemoteData<Option<String>>>>;

// ─── Core ────────────────────────────────────────────────────────────────────

/// Cloning is cheap; clones share their collaborators.
#[derive(Clone)]
pub struct DataServiceCore {
  cache:               Arc<dyn ObjectCache>,
  requests:            Arc<dyn RequestService>,
  build:               RemoteDataBuildService,
  endpoints:           HalEndpointService,
  response_ms_to_live: Option<u64>,
}

impl DataServiceCore {
  pub fn new(
    cache: Arc<dyn ObjectCache>,
    requests: Arc<dyn RequestService>,
    build: RemoteDataBuildService,
    endpoints: HalEndpointService,
    response_ms_to_live: Option<u64>,
  ) -> Self {
    Self { cache, requests, build, endpoints, response_ms_to_live }
  }

  pub fn build_service(&self) -> &RemoteDataBuildService { &self.build }

  pub fn endpoints(&self) -> &HalEndpointService { &self.endpoints }

  fn send(&self, request: RestRequest, use_cached: bool) -> String {
    let uuid = request.uuid.clone();
    self.requests.send(request.with_ms_to_live(self.response_ms_to_live), use_cached);
    uuid
  }

  fn send_get(&self, href: &str, use_cached: bool) {
    self.send(RestRequest::get(self.requests.generate_request_id(), href), use_cached);
  }

  /// Send a GET for `href` and open its snapshots with `open`.
  ///
  /// Without `use_cached`, completed snapshots from before the request are
  /// skipped. With `re_request_on_stale`, every stale snapshot sends the GET
  /// again while the stream is polled.
  fn read<T, F>(
    &self,
    href: &str,
    use_cached: bool,
    re_request_on_stale: bool,
    open: F,
  ) -> RemoteDataStream<T>
  where
    T: Send + 'static,
    F: FnOnce(&RemoteDataBuildService) -> RemoteDataStream<T>,
  {
    let sent_at = Utc::now();
    self.send_get(href, use_cached);
    let mut stream = open(&self.build);

    if !use_cached {
      stream = stream
        .skip_while(move |item| {
          future::ready(matches!(
            item,
            Ok(rd) if rd.has_completed() && rd.last_updated.is_none_or(|at| at < sent_at)
          ))
        })
        .boxed();
    }

    if re_request_on_stale {
      let core = self.clone();
      let href = href.to_owned();
      stream = stream
        .inspect(move |item| {
          if let Ok(rd) = item
            && rd.is_stale()
          {
            debug!(%href, "stale snapshot, requesting again");
            core.send_get(&href, use_cached);
          }
        })
        .boxed();
    }
    stream
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub fn find_by_href(
    &self,
    href: &str,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<Instance> {
    let request_href = build_href_from_find_options(href, &FindListOptions::default(), &[], links);
    self.read(&request_href, use_cached, re_request_on_stale, |build| {
      narrow(build.build_single(&request_href, links), Resolved::into_object)
    })
  }

  pub fn find_list_by_href(
    &self,
    href: &str,
    options: &FindListOptions,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<PaginatedList<Instance>> {
    let request_href = build_href_from_find_options(href, options, &[], links);
    self.read(&request_href, use_cached, re_request_on_stale, |build| {
      build.build_list(&request_href, links)
    })
  }

  // ── Writes ────────────────────────────────────────────────────────────

  /// POST `body` to the first href `endpoint` yields. Requests under the
  /// endpoint go stale once the POST succeeds; the successful snapshot is
  /// held until they have. Sent when the stream is first polled.
  pub fn create(
    &self,
    endpoint: BoxStream<'static, CoreResult<String>>,
    body: Value,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<Instance> {
    let core = self.clone();
    let links = links.to_vec();
    let created = endpoint.take(1).try_switch_map(move |endpoint| {
      let uuid = core.send(
        RestRequest::post(core.requests.generate_request_id(), &endpoint, body.clone()),
        false,
      );
      let requests = Arc::clone(&core.requests);
      core.build.build_from_request_uuid_and_await(
        &uuid,
        move |_| async move {
          requests.set_stale_by_href_substring(&endpoint).await;
        },
        &links,
      )
    });
    narrow(created, Resolved::into_object)
  }

  /// PUT `body` to `href`.
  pub fn put(&self, href: &str, body: Value, links: &[FollowLinkConfig]) -> RemoteDataStream<Instance> {
    let uuid = self.send(RestRequest::put(self.requests.generate_request_id(), href, body), false);
    narrow(self.build.build_from_request_uuid(&uuid, links), Resolved::into_object)
  }

  /// DELETE `href`. On success the href is invalidated before the
  /// successful snapshot is emitted.
  pub fn delete_by_href(&self, href: &str) -> RemoteDataStream<()> {
    let uuid = self.send(RestRequest::delete(self.requests.generate_request_id(), href), false);
    let core = self.clone();
    let target = href.to_owned();
    self
      .build
      .build_from_request_uuid_and_await(
        &uuid,
        move |_| async move {
          core.invalidate_by_href(&target).await;
        },
        &[],
      )
      .map(|item| item.map(|rd| rd.map_payload(no_content)))
      .boxed()
  }

  // ── Invalidation ──────────────────────────────────────────────────────

  /// Stale every request that delivered the object at `href`, and every
  /// request registered as its dependent, as the object is now. Starts
  /// immediately; resolves to `true` once all of them are stale.
  pub fn invalidate_by_href(&self, href: &str) -> impl Future<Output = bool> + Send + 'static {
    let requests = Arc::clone(&self.requests);
    let cache = Arc::clone(&self.cache);
    let href = href.to_owned();
    let uuids: Vec<String> = cache
      .entry(&href)
      .map(|entry| [entry.request_uuids, entry.dependent_request_uuids].concat())
      .unwrap_or_default();

    let task = tokio::spawn(async move {
      join_all(uuids.iter().map(|uuid| requests.set_stale_by_uuid(uuid))).await;
      cache.remove_dependents(&href);
      debug!(%href, count = uuids.len(), "invalidated");
      true
    });
    async move { task.await.unwrap_or(false) }
  }

  /// Register the latest request of the object `object` resolves to as
  /// dependent on `depends_on`, so invalidating `depends_on` stales it.
  /// Failed snapshots register nothing.
  pub fn add_dependency(
    &self,
    object: RemoteDataStream<Instance>,
    depends_on: &str,
  ) -> impl Future<Output = bool> + Send + 'static {
    let self_links = object
      .map(|item| {
        item.map(|rd| rd.map_payload(|p| p.map(|instance| instance.self_href().map(str::to_owned))))
      })
      .boxed();
    self.register_dependency(self_links, depends_on)
  }

  fn register_dependency(
    &self,
    self_links: SelfLinks,
    depends_on: &str,
  ) -> impl Future<Output = bool> + Send + 'static {
    let cache = Arc::clone(&self.cache);
    let depends_on = depends_on.to_owned();
    let task = tokio::spawn(async move {
      let mut completed = self_links
        .filter(|item| future::ready(item.as_ref().map_or(true, RemoteData::has_completed)));
      let Some(Ok(rd)) = completed.next().await else {
        return false;
      };
      if !rd.has_succeeded() {
        return false;
      }
      let Some(self_link) = rd.payload.into_value().flatten() else {
        warn!(%depends_on, "dependent object has no self link");
        return false;
      };
      match cache.get_request_uuid_by_self_link(&self_link).next().await.flatten() {
        Some(uuid) => cache.add_dependency(&depends_on, &uuid),
        None => false,
      }
    });
    async move { task.await.unwrap_or(false) }
  }
}

impl LinkFetcher for DataServiceCore {
  fn find_by_href(
    &self,
    href: &str,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<Instance> {
    DataServiceCore::find_by_href(self, href, use_cached, re_request_on_stale, links)
  }

  fn find_list_by_href(
    &self,
    href: &str,
    options: &FindListOptions,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<PaginatedList<Instance>> {
    DataServiceCore::find_list_by_href(self, href, options, use_cached, re_request_on_stale, links)
  }
}

// ─── Typed services ──────────────────────────────────────────────────────────

fn typed<T: TypedResource>(stream: RemoteDataStream<Instance>) -> RemoteDataStream<T> {
  narrow(stream, |instance: Instance| instance.downcast_ref::<T>().cloned())
}

fn typed_list<T: TypedResource>(
  stream: RemoteDataStream<PaginatedList<Instance>>,
) -> RemoteDataStream<PaginatedList<T>> {
  narrow(stream, |list: PaginatedList<Instance>| {
    let page = list
      .elements()
      .iter()
      .map(|element| element.downcast_ref::<T>().cloned())
      .collect::<Option<Vec<T>>>()?;
    Some(list.with_page(page))
  })
}

/// The data service of one resource type, rooted at one endpoint.
pub struct BaseDataService<T> {
  core:      Arc<DataServiceCore>,
  link_path: String,
  resource:  PhantomData<fn() -> T>,
}

impl<T> Clone for BaseDataService<T> {
  fn clone(&self) -> Self {
    Self {
      core:      Arc::clone(&self.core),
      link_path: self.link_path.clone(),
      resource:  PhantomData,
    }
  }
}

impl<T: TypedResource> BaseDataService<T> {
  pub fn new(core: Arc<DataServiceCore>, link_path: impl Into<String>) -> Self {
    Self { core, link_path: link_path.into(), resource: PhantomData }
  }

  pub fn link_path(&self) -> &str { &self.link_path }

  pub fn core(&self) -> &Arc<DataServiceCore> { &self.core }

  pub fn get_endpoint(&self) -> BoxStream<'static, CoreResult<String>> {
    self.core.endpoints.get_endpoint(&self.link_path)
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub fn find_by_href(
    &self,
    href: &str,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<T> {
    typed(self.core.find_by_href(href, use_cached, re_request_on_stale, links))
  }

  pub fn find_list_by_href(
    &self,
    href: &str,
    options: &FindListOptions,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<PaginatedList<T>> {
    typed_list(self.core.find_list_by_href(href, options, use_cached, re_request_on_stale, links))
  }

  /// The resource at `{endpoint}/{id}`.
  pub fn find_by_id(
    &self,
    id: &str,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<T> {
    let core = Arc::clone(&self.core);
    let id = id.to_owned();
    let links = links.to_vec();
    typed(self.get_endpoint().try_switch_map(move |endpoint| {
      core.find_by_href(&format!("{endpoint}/{id}"), use_cached, re_request_on_stale, &links)
    }))
  }

  pub fn find_all(
    &self,
    options: &FindListOptions,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<PaginatedList<T>> {
    self.find_list_at(self.get_endpoint(), options, use_cached, re_request_on_stale, links)
  }

  /// The list at `{endpoint}/search/{method}`.
  pub fn search_by(
    &self,
    method: &str,
    options: &FindListOptions,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<PaginatedList<T>> {
    let method = method.to_owned();
    let endpoint = self
      .get_endpoint()
      .map(move |endpoint| endpoint.map(|e| format!("{e}/search/{method}")))
      .boxed();
    self.find_list_at(endpoint, options, use_cached, re_request_on_stale, links)
  }

  fn find_list_at(
    &self,
    hrefs: BoxStream<'static, CoreResult<String>>,
    options: &FindListOptions,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<PaginatedList<T>> {
    let core = Arc::clone(&self.core);
    let options = options.clone();
    let links = links.to_vec();
    typed_list(hrefs.try_switch_map(move |href| {
      core.find_list_by_href(&href, &options, use_cached, re_request_on_stale, &links)
    }))
  }

  // ── Writes ────────────────────────────────────────────────────────────

  pub fn create(&self, object: &T, links: &[FollowLinkConfig]) -> RemoteDataStream<T> {
    typed(self.core.create(self.get_endpoint(), object.to_value(), links))
  }

  /// PUT `object` to its self link.
  pub fn put(&self, object: &T) -> RemoteDataStream<T> {
    match object.links().self_href() {
      Some(href) => typed(self.core.put(href, object.to_value(), &[])),
      None => just(Err(Error::MissingSelfLink)),
    }
  }

  pub fn delete(&self, id: &str) -> RemoteDataStream<()> {
    let core = Arc::clone(&self.core);
    let id = id.to_owned();
    self
      .get_endpoint()
      .take(1)
      .try_switch_map(move |endpoint| core.delete_by_href(&format!("{endpoint}/{id}")))
  }

  pub fn delete_by_href(&self, href: &str) -> RemoteDataStream<()> { self.core.delete_by_href(href) }

  // ── Invalidation ──────────────────────────────────────────────────────

  pub fn invalidate_by_href(&self, href: &str) -> impl Future<Output = bool> + Send + 'static {
    self.core.invalidate_by_href(href)
  }

  pub fn add_dependency(
    &self,
    object: RemoteDataStream<T>,
    depends_on: &str,
  ) -> impl Future<Output = bool> + Send + 'static {
    let self_links = object
      .map(|item| {
        item.map(|rd| rd.map_payload(|p| p.map(|resource| resource.links().self_href().map(str::to_owned))))
      })
      .boxed();
    self.core.register_dependency(self_links, depends_on)
  }
}
