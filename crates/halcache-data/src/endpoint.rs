//! Endpoint discovery through the REST root.

use std::{future, sync::Arc};

use futures::{StreamExt, stream::BoxStream};
use halcache_build::{RemoteDataBuildService, Resolved};
use halcache_core::{
  Error, Result,
  hal::strip_template,
  request::RestRequest,
  rx::RxStreamExt,
  service::RequestService,
};

/// Reads endpoint hrefs from the `_links` of the root resource. The root is
/// fetched once and then served from the cache like any other resource.
#[derive(Clone)]
pub struct HalEndpointService {
  requests:   Arc<dyn RequestService>,
  build:      RemoteDataBuildService,
  root:       String,
  ms_to_live: Option<u64>,
}

impl HalEndpointService {
  pub fn new(
    requests: Arc<dyn RequestService>,
    build: RemoteDataBuildService,
    root: impl Into<String>,
    ms_to_live: Option<u64>,
  ) -> Self {
    Self { requests, build, root: root.into(), ms_to_live }
  }

  pub fn root(&self) -> &str { &self.root }

  /// The href of `link_path` on the root resource, templates stripped.
  ///
  /// Ends with [`Error::NoEndpoint`] when the root does not link the path,
  /// and with [`Error::Transport`] when the root itself cannot be read.
  pub fn get_endpoint(&self, link_path: &str) -> BoxStream<'static, Result<String>> {
    let request = RestRequest::get(self.requests.generate_request_id(), &self.root)
      .with_ms_to_live(self.ms_to_live);
    self.requests.send(request, true);

    let link_path = link_path.to_owned();
    let root = self.root.clone();
    self
      .build
      .build_from_href(&self.root, &[])
      .filter_map(move |item| {
        let endpoint = match item {
          Err(err) => Some(Err(err)),
          Ok(rd) if rd.has_failed() => Some(Err(Error::Transport(
            rd.error_message.unwrap_or_else(|| format!("could not read {root}")),
          ))),
          Ok(rd) if rd.has_succeeded() => Some(
            rd.payload
              .value()
              .and_then(Resolved::as_object)
              .and_then(|root| root.links().href(&link_path))
              .map(|href| strip_template(href).to_owned())
              .ok_or_else(|| Error::NoEndpoint(link_path.clone())),
          ),
          Ok(_) => None,
        };
        future::ready(endpoint)
      })
      .distinct_until_changed_by(|endpoint| endpoint.clone())
      .take_until_error()
  }
}
