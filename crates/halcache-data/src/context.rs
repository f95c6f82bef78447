//! The [`DataContext`] wiring cache, request, build and data services
//! together.

use std::sync::{Arc, Weak};

use halcache_build::{LinkFetcher, LinkService, RemoteDataBuildService};
use halcache_core::{
  model::{Bitstream, Bundle, Collection, Community, Item},
  resource::{ResourceRegistry, TypedResource},
  service::Transport,
};
use halcache_store::{MemoryObjectCache, MemoryRequestService};
use tracing::debug;

use crate::{
  BaseDataService, DataServiceCore, Error, Result, config::CacheConfig,
  endpoint::HalEndpointService,
};

/// Owns one object cache and one request service, and hands out data
/// services sharing them.
///
/// Links resolved on instances read through this context's data services;
/// once the context and every service handed out are dropped, opening such a
/// link fails with `Error::Unbound`.
pub struct DataContext {
  config:   CacheConfig,
  cache:    Arc<MemoryObjectCache>,
  requests: Arc<MemoryRequestService>,
  core:     Arc<DataServiceCore>,
}

impl DataContext {
  /// A context for the default resource types. Must be called from within a
  /// tokio runtime.
  pub fn new(config: CacheConfig, transport: Arc<dyn Transport>) -> Result<Self> {
    Self::with_registry(config, transport, ResourceRegistry::with_defaults())
  }

  pub fn with_registry(
    config: CacheConfig,
    transport: Arc<dyn Transport>,
    registry: ResourceRegistry,
  ) -> Result<Self> {
    if config.rest_root.trim().is_empty() {
      return Err(Error::InvalidConfig("rest_root must not be empty".into()));
    }

    let cache = Arc::new(MemoryObjectCache::new());
    let requests = Arc::new(MemoryRequestService::new(cache.clone(), transport));
    let registry = Arc::new(registry);
    let links = Arc::new(LinkService::new(Arc::clone(&registry)));
    let build =
      RemoteDataBuildService::new(cache.clone(), requests.clone(), Arc::clone(&links), registry);

    let ms_to_live = Some(config.response_ms_to_live);
    let endpoints =
      HalEndpointService::new(requests.clone(), build.clone(), config.rest_root.clone(), ms_to_live);
    let core = Arc::new(DataServiceCore::new(
      cache.clone(),
      requests.clone(),
      build,
      endpoints,
      ms_to_live,
    ));

    let fetcher: Weak<dyn LinkFetcher> = Arc::<DataServiceCore>::downgrade(&core);
    links.bind(fetcher);
    debug!(rest_root = %config.rest_root, "data context ready");

    Ok(Self { config, cache, requests, core })
  }

  pub fn config(&self) -> &CacheConfig { &self.config }

  pub fn object_cache(&self) -> &Arc<MemoryObjectCache> { &self.cache }

  pub fn request_service(&self) -> &Arc<MemoryRequestService> { &self.requests }

  pub fn core(&self) -> &Arc<DataServiceCore> { &self.core }

  /// A data service for `T` at the root link `link_path`.
  pub fn service<T: TypedResource>(&self, link_path: &str) -> BaseDataService<T> {
    BaseDataService::new(Arc::clone(&self.core), link_path)
  }

  pub fn items(&self) -> BaseDataService<Item> { self.service("items") }

  pub fn bundles(&self) -> BaseDataService<Bundle> { self.service("bundles") }

  pub fn bitstreams(&self) -> BaseDataService<Bitstream> { self.service("bitstreams") }

  pub fn collections(&self) -> BaseDataService<Collection> { self.service("collections") }

  pub fn communities(&self) -> BaseDataService<Community> { self.service("communities") }
}
