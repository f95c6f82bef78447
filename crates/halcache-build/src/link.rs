//! The [`LinkService`] and lazily resolved links on resources.

use std::sync::{Arc, OnceLock, Weak};

use halcache_core::{
  Error, Result,
  follow::FollowLinkConfig,
  hal::strip_template,
  list::{FindListOptions, PaginatedList},
  remote_data::RemoteDataStream,
  resource::{Instance, LazyStream, Linkable, LinkedResource, ResourceRegistry},
  rx::just,
};
use tracing::{debug, warn};

/// Reads followed links go through. Implemented by the data layer.
pub trait LinkFetcher: Send + Sync {
  fn find_by_href(
    &self,
    href: &str,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<Instance>;

  fn find_list_by_href(
    &self,
    href: &str,
    options: &FindListOptions,
    use_cached: bool,
    re_request_on_stale: bool,
    links: &[FollowLinkConfig],
  ) -> RemoteDataStream<PaginatedList<Instance>>;
}

/// Attaches one lazy stream per followed link to a copy of a resource.
///
/// The service is bound to its [`LinkFetcher`] after construction, since the
/// fetcher itself depends on the build service that holds this one.
pub struct LinkService {
  registry: Arc<ResourceRegistry>,
  fetcher:  OnceLock<Weak<dyn LinkFetcher>>,
}

impl LinkService {
  pub fn new(registry: Arc<ResourceRegistry>) -> Self {
    Self { registry, fetcher: OnceLock::new() }
  }

  pub fn bind(&self, fetcher: Weak<dyn LinkFetcher>) {
    if self.fetcher.set(fetcher).is_err() {
      warn!("link service is already bound; keeping the first fetcher");
    }
  }

  /// A copy of `model` with every link in `configs` resolved.
  pub fn resolve_links(&self, model: &Instance, configs: &[FollowLinkConfig]) -> Result<Instance> {
    let mut copy = model.clone_boxed();
    self.attach(&mut *copy, configs)?;
    Ok(Arc::from(copy))
  }

  /// [`resolve_links`](Self::resolve_links) for owned linkables, such as
  /// paginated lists.
  pub fn resolve_links_on<L: Linkable>(&self, mut model: L, configs: &[FollowLinkConfig]) -> Result<L> {
    self.attach(&mut model, configs)?;
    Ok(model)
  }

  fn attach<L: Linkable + ?Sized>(&self, model: &mut L, configs: &[FollowLinkConfig]) -> Result<()> {
    for config in configs {
      if let Some(resolved) = self.resolve_link_without_attaching(&*model, config)? {
        model.linked_mut().insert(config.name.clone(), resolved);
      }
    }
    Ok(())
  }

  /// The lazy stream for one link of `model`. `None` when the resource does
  /// not carry the link; an error when its type never declared it.
  pub fn resolve_link_without_attaching<L: Linkable + ?Sized>(
    &self,
    model: &L,
    config: &FollowLinkConfig,
  ) -> Result<Option<LinkedResource>> {
    let resource_type = model.resource_type();
    let Some(definition) = self.registry.link_definition(resource_type, &config.name) else {
      return Err(Error::UndeclaredLink {
        link:          config.name.clone(),
        resource_type: resource_type.to_owned(),
      });
    };
    let Some(href) = model.links().href(&config.name) else {
      debug!(link = %config.name, %resource_type, "link absent, not resolving");
      return Ok(None);
    };

    let href = strip_template(href).to_owned();
    let fetcher = self.fetcher.get().cloned();
    let config = config.clone();

    let resolved = if definition.is_list {
      LinkedResource::List(LazyStream::new(move || {
        match fetcher.as_ref().and_then(Weak::upgrade) {
          Some(fetcher) => fetcher.find_list_by_href(
            &href,
            &config.find_list_options.clone().unwrap_or_default(),
            config.use_cached_version_if_available,
            config.re_request_on_stale,
            &config.links_to_follow,
          ),
          None => just(Err(Error::Unbound)),
        }
      }))
    } else {
      LinkedResource::Single(LazyStream::new(move || {
        match fetcher.as_ref().and_then(Weak::upgrade) {
          Some(fetcher) => fetcher.find_by_href(
            &href,
            config.use_cached_version_if_available,
            config.re_request_on_stale,
            &config.links_to_follow,
          ),
          None => just(Err(Error::Unbound)),
        }
      }))
    };
    Ok(Some(resolved))
  }

  /// A copy of `model` without resolved links.
  pub fn remove_resolved_links(&self, model: &Instance) -> Instance {
    let mut copy = model.clone_boxed();
    copy.linked_mut().clear();
    Arc::from(copy)
  }
}
