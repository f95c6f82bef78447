//! HAL link types and href helpers.
//!
//! Every cacheable resource carries a `_links` object. The `self` link is the
//! resource's cache key; the other entries name related resources that can be
//! followed lazily (see [`crate::follow`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─── Links ───────────────────────────────────────────────────────────────────

/// A single HAL link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalLink {
  pub href:      String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name:      Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub templated: Option<bool>,
}

impl HalLink {
  pub fn new(href: impl Into<String>) -> Self {
    Self { href: href.into(), name: None, templated: None }
  }
}

/// The value of one `_links` entry: HAL allows either one link or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkValue {
  One(HalLink),
  Many(Vec<HalLink>),
}

/// The `_links` object of a HAL resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HalLinks(pub BTreeMap<String, LinkValue>);

impl HalLinks {
  pub fn new() -> Self { Self::default() }

  /// The href of the `self` link, if present.
  pub fn self_href(&self) -> Option<&str> { self.href(SELF_LINK) }

  /// The href of the first link stored under `name`.
  pub fn href(&self, name: &str) -> Option<&str> {
    match self.0.get(name)? {
      LinkValue::One(link) => Some(link.href.as_str()),
      LinkValue::Many(links) => links.first().map(|l| l.href.as_str()),
    }
  }

  /// Every href stored under `name`, in declaration order.
  pub fn hrefs(&self, name: &str) -> Vec<String> {
    match self.0.get(name) {
      Some(LinkValue::One(link)) => vec![link.href.clone()],
      Some(LinkValue::Many(links)) => links.iter().map(|l| l.href.clone()).collect(),
      None => Vec::new(),
    }
  }

  pub fn insert(&mut self, name: impl Into<String>, link: HalLink) {
    self.0.insert(name.into(), LinkValue::One(link));
  }

  pub fn insert_many(&mut self, name: impl Into<String>, links: Vec<HalLink>) {
    self.0.insert(name.into(), LinkValue::Many(links));
  }

  pub fn contains(&self, name: &str) -> bool { self.0.contains_key(name) }
}

pub const SELF_LINK: &str = "self";

// ─── Href helpers ────────────────────────────────────────────────────────────

/// Drop the `embed` and `embed.size` query parameters from `href`.
///
/// A resource fetched with embeds is cached under its plain URL, so lookups by
/// href must ignore them.
pub fn url_without_embed_params(href: &str) -> String {
  let Some((base, query)) = href.split_once('?') else {
    return href.to_owned();
  };

  let kept: Vec<&str> = query
    .split('&')
    .filter(|param| {
      let key = param.split_once('=').map_or(*param, |(k, _)| k);
      !param.is_empty() && key != "embed" && key != "embed.size"
    })
    .collect();

  if kept.is_empty() {
    base.to_owned()
  } else {
    format!("{base}?{}", kept.join("&"))
  }
}

/// Remove a URI template suffix such as `{?page,size}` from `href`.
pub fn strip_template(href: &str) -> &str {
  href.split_once('{').map_or(href, |(base, _)| base)
}
