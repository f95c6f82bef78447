//! Follow-link configuration.
//!
//! A [`FollowLinkConfig`] names a link to resolve on a resource, how to fetch
//! it, and which links to resolve on the resolved resource in turn. Configs
//! nest to any depth.

use crate::list::FindListOptions;

#[derive(Debug, Clone, PartialEq)]
pub struct FollowLinkConfig {
  pub name:                            String,
  /// Options for list links, e.g. the page size of the embedded list.
  pub find_list_options:               Option<FindListOptions>,
  /// Whether the link is requested as an `embed` of the parent request.
  pub should_embed:                    bool,
  pub use_cached_version_if_available: bool,
  pub re_request_on_stale:             bool,
  pub links_to_follow:                 Vec<FollowLinkConfig>,
}

/// A config following `name` with the default flags: embedded, cached
/// versions allowed, re-requested when stale.
pub fn follow_link(name: impl Into<String>) -> FollowLinkConfig {
  FollowLinkConfig {
    name:                            name.into(),
    find_list_options:               None,
    should_embed:                    true,
    use_cached_version_if_available: true,
    re_request_on_stale:             true,
    links_to_follow:                 Vec::new(),
  }
}

impl FollowLinkConfig {
  pub fn with_options(mut self, options: FindListOptions) -> Self {
    self.find_list_options = Some(options);
    self
  }

  pub fn embed(mut self, should_embed: bool) -> Self {
    self.should_embed = should_embed;
    self
  }

  pub fn use_cached(mut self, use_cached: bool) -> Self {
    self.use_cached_version_if_available = use_cached;
    self
  }

  pub fn re_request_on_stale(mut self, re_request: bool) -> Self {
    self.re_request_on_stale = re_request;
    self
  }

  /// Follow `links` on the resource this config resolves.
  pub fn then(mut self, links: impl IntoIterator<Item = FollowLinkConfig>) -> Self {
    self.links_to_follow.extend(links);
    self
  }
}

// ─── Embed parameters ────────────────────────────────────────────────────────

/// Query parameters requesting the embedded links of `configs`.
///
/// Only leaf paths are emitted as `embed=a/b`; a size is emitted as
/// `embed.size=a/b=N` for every embedded config whose list options set a page
/// size. Configs with `should_embed = false` are skipped along with their
/// nested configs.
pub fn embed_params(configs: &[FollowLinkConfig]) -> Vec<String> {
  let mut params = Vec::new();
  for config in configs {
    collect_embeds(None, config, &mut params);
  }
  params
}

fn collect_embeds(parent: Option<&str>, config: &FollowLinkConfig, params: &mut Vec<String>) {
  if !config.should_embed {
    return;
  }
  let path = match parent {
    Some(parent) => format!("{parent}/{}", config.name),
    None => config.name.clone(),
  };

  if let Some(size) = config.find_list_options.as_ref().and_then(|o| o.elements_per_page) {
    params.push(format!("embed.size={path}={size}"));
  }

  let nested: Vec<_> = config.links_to_follow.iter().filter(|c| c.should_embed).collect();
  if nested.is_empty() {
    params.push(format!("embed={path}"));
  } else {
    for child in nested {
      collect_embeds(Some(&path), child, params);
    }
  }
}
