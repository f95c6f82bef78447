//! Turning a raw HAL response into a [`ResponseState`].
//!
//! Cacheable resources (a `type` and a self link) are written to the object
//! cache, recursively for everything under `_embedded`, and the response
//! payload becomes a link to the top-level object. Lists are cached as
//! `paginated-list` objects whose `page` link names the cached elements.

use chrono::Utc;
use halcache_core::{
  hal::{HalLink, HalLinks, strip_template},
  list::{HalPage, PAGE_LINK, PAGINATED_LIST, PageInfo},
  request::{ResponsePayload, ResponseState, RestRequest},
  service::{ObjectCache, RawResponse},
};
use serde_json::{Value, json};
use tracing::warn;

use crate::{Error, Result};

/// Build the response state for `raw`, caching whatever can be cached.
pub fn normalize_response(
  cache: &dyn ObjectCache,
  request: &RestRequest,
  raw: RawResponse,
) -> ResponseState {
  let time_completed = Utc::now();
  let status_code = Some(raw.status);

  if !(200..300).contains(&raw.status) {
    let error_message = raw
      .body
      .as_ref()
      .and_then(|body| body.get("message"))
      .and_then(Value::as_str)
      .map(str::to_owned)
      .unwrap_or_else(|| {
        format!("{} {} failed with status {}", request.method.as_str(), request.href, raw.status)
      });
    return ResponseState {
      time_completed,
      status_code,
      error_message: Some(error_message),
      payload: ResponsePayload::None,
    };
  }

  let payload = match raw.body {
    None | Some(Value::Null) => ResponsePayload::None,
    Some(body) => match (Normalizer { cache, request }).payload(&body) {
      Ok(payload) => payload,
      Err(err) => {
        warn!(%err, href = %request.href, "keeping response out of the object cache");
        ResponsePayload::Uncacheable(body)
      }
    },
  };

  ResponseState { time_completed, status_code, error_message: None, payload }
}

fn self_href(value: &Value) -> Option<&str> {
  value.pointer("/_links/self/href").and_then(Value::as_str)
}

fn is_resource(value: &Value) -> bool {
  value.get("type").is_some_and(Value::is_string) && self_href(value).is_some()
}

fn is_list(value: &Value) -> bool {
  value.is_object()
    && value.get("type").is_none()
    && (value.get("page").is_some_and(Value::is_object)
      || value.get("_embedded").is_some_and(Value::is_object))
}

enum CachedList {
  Link(String),
  Inline(Value),
}

struct Normalizer<'a> {
  cache:   &'a dyn ObjectCache,
  request: &'a RestRequest,
}

impl Normalizer<'_> {
  fn payload(&self, body: &Value) -> Result<ResponsePayload> {
    let requested = Some(self.request.href.as_str());
    if is_list(body) {
      return Ok(match self.cache_list(body, requested)? {
        CachedList::Link(href) => ResponsePayload::Link(HalLink::new(href)),
        CachedList::Inline(list) => ResponsePayload::Uncacheable(list),
      });
    }
    if is_resource(body) {
      let href = self.cache_object(body, requested)?;
      return Ok(ResponsePayload::Link(HalLink::new(href)));
    }
    Ok(ResponsePayload::Uncacheable(body.clone()))
  }

  /// Cache a resource and everything embedded in it. Returns its self link.
  fn cache_object(&self, object: &Value, alternative: Option<&str>) -> Result<String> {
    let mut object = object.clone();
    if let Some(embedded) = object.as_object_mut().and_then(|o| o.remove("_embedded")) {
      let Value::Object(embedded) = embedded else {
        return Err(Error::UnexpectedBody("_embedded is not an object".into()));
      };
      for (name, child) in &embedded {
        let link = object
          .get("_links")
          .and_then(|links| links.get(name))
          .and_then(|link| link.get("href"))
          .and_then(Value::as_str)
          .map(strip_template);
        self.cache_embedded(child, link)?;
      }
    }

    let href = self_href(&object)
      .map(str::to_owned)
      .ok_or(halcache_core::Error::MissingSelfLink)?;
    self.cache.add(
      object,
      self.request.response_ms_to_live,
      &self.request.uuid,
      alternative,
    )?;
    Ok(href)
  }

  /// Cache an embedded child. `link` is the parent's link to it, which
  /// becomes an alternative link of the cached child.
  fn cache_embedded(&self, child: &Value, link: Option<&str>) -> Result<()> {
    match child {
      _ if is_list(child) => {
        self.cache_list(child, link)?;
      }
      _ if is_resource(child) => {
        self.cache_object(child, link)?;
      }
      Value::Array(items) => {
        for item in items.iter().filter(|item| is_resource(item)) {
          self.cache_object(item, None)?;
        }
      }
      _ => {}
    }
    Ok(())
  }

  /// Cache a HAL list. Lists without a self link, or with elements that
  /// cannot be cached, are returned inline instead.
  fn cache_list(&self, body: &Value, alternative: Option<&str>) -> Result<CachedList> {
    let page: HalPage = match body.get("page") {
      Some(page) => serde_json::from_value(page.clone())
        .map_err(|err| Error::UnexpectedBody(format!("unreadable page info: {err}")))?,
      None => HalPage::default(),
    };
    let mut links: HalLinks = match body.get("_links") {
      Some(links) => serde_json::from_value(links.clone())
        .map_err(|err| Error::UnexpectedBody(format!("unreadable links: {err}")))?,
      None => HalLinks::default(),
    };

    let elements: Vec<&Value> = match body.get("_embedded") {
      None => Vec::new(),
      Some(Value::Object(embedded)) => embedded
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .collect(),
      Some(_) => return Err(Error::UnexpectedBody("_embedded is not an object".into())),
    };

    let mut page_links = Vec::with_capacity(elements.len());
    let mut inline = Vec::with_capacity(elements.len());
    for element in elements {
      if is_resource(element) {
        page_links.push(HalLink::new(self.cache_object(element, None)?));
      }
      inline.push(element.clone());
    }

    let page_info = PageInfo::from(page);
    match links.self_href().map(str::to_owned) {
      Some(self_link) if page_links.len() == inline.len() => {
        links.insert_many(PAGE_LINK, page_links);
        let list = json!({
          "type": PAGINATED_LIST,
          "pageInfo": page_info,
          "_links": links,
        });
        self.cache.add(
          list,
          self.request.response_ms_to_live,
          &self.request.uuid,
          alternative,
        )?;
        Ok(CachedList::Link(self_link))
      }
      _ => Ok(CachedList::Inline(json!({
        "type": PAGINATED_LIST,
        "pageInfo": page_info,
        "page": inline,
        "_links": links,
      }))),
    }
  }
}
