//! The in-memory [`ObjectCache`].

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use halcache_core::{
  Error, Result,
  hal::url_without_embed_params,
  rx::{RxStreamExt, just},
  service::{ObjectCache, ObjectCacheEntry},
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::slots::Slots;

#[derive(Default)]
struct Inner {
  /// Every known href (self or alternative link) to the self link it names.
  links:   Slots<String>,
  /// Entries by self link.
  entries: Slots<ObjectCacheEntry>,
}

impl Inner {
  fn link(&mut self, href: &str) -> &watch::Sender<Option<String>> { self.links.slot(href) }

  fn slot(&mut self, self_link: &str) -> &watch::Sender<Option<ObjectCacheEntry>> {
    self.entries.slot(self_link)
  }

  fn point(&mut self, href: &str, self_link: &str) {
    self.link(href).send_if_modified(|current| {
      if current.as_deref() == Some(self_link) {
        return false;
      }
      *current = Some(self_link.to_owned());
      true
    });
  }

  fn resolve(&self, href: &str) -> Option<String> { self.links.current(href) }
}

// ─── Cache ───────────────────────────────────────────────────────────────────

/// Cloning is cheap; clones share the same cache.
#[derive(Clone, Default)]
pub struct MemoryObjectCache {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryObjectCache {
  pub fn new() -> Self { Self::default() }

  #[cfg(test)]
  pub(crate) fn channel_counts(&self) -> (usize, usize) {
    let inner = self.inner.lock();
    (inner.links.len(), inner.entries.len())
  }
}

impl ObjectCache for MemoryObjectCache {
  fn add(
    &self,
    object: Value,
    ms_to_live: Option<u64>,
    request_uuid: &str,
    alternative_link: Option<&str>,
  ) -> Result<()> {
    let self_link = object
      .pointer("/_links/self/href")
      .and_then(Value::as_str)
      .map(url_without_embed_params)
      .ok_or(Error::MissingSelfLink)?;
    let alternative = alternative_link
      .map(url_without_embed_params)
      .filter(|alt| *alt != self_link);

    let mut inner = self.inner.lock();
    let slot = inner.slot(&self_link);
    let previous = slot.borrow().clone();

    let (mut request_uuids, dependent_request_uuids, mut alternative_links) = previous
      .map(|p| (p.request_uuids, p.dependent_request_uuids, p.alternative_links))
      .unwrap_or_default();
    request_uuids.retain(|uuid| uuid != request_uuid);
    request_uuids.insert(0, request_uuid.to_owned());
    if let Some(alt) = &alternative {
      if !alternative_links.contains(alt) {
        alternative_links.push(alt.clone());
      }
    }

    slot.send_replace(Some(ObjectCacheEntry {
      data: object,
      time_completed: chrono::Utc::now(),
      ms_to_live,
      request_uuids,
      dependent_request_uuids,
      alternative_links,
    }));
    inner.point(&self_link, &self_link);
    if let Some(alt) = &alternative {
      inner.point(alt, &self_link);
    }

    debug!(%self_link, %request_uuid, "cached object");
    Ok(())
  }

  fn entry(&self, href: &str) -> Option<ObjectCacheEntry> {
    let inner = self.inner.lock();
    let self_link = inner.resolve(&url_without_embed_params(href))?;
    inner.entries.current(&self_link)
  }

  fn get_by_href(&self, href: &str) -> BoxStream<'static, Option<ObjectCacheEntry>> {
    let href = url_without_embed_params(href);
    let links = self.inner.lock().link(&href).subscribe();
    let inner = Arc::clone(&self.inner);

    WatchStream::new(links)
      .switch_map(move |self_link| match self_link {
        Some(self_link) => {
          let entries = inner.lock().slot(&self_link).subscribe();
          WatchStream::new(entries).boxed()
        }
        None => just(None),
      })
      .boxed()
  }

  fn add_dependency(&self, depends_on: &str, request_uuid: &str) -> bool {
    let inner = self.inner.lock();
    let Some(self_link) = inner.resolve(&url_without_embed_params(depends_on)) else {
      return false;
    };
    let Some(slot) = inner.entries.get(&self_link) else {
      return false;
    };

    let mut found = false;
    slot.send_if_modified(|entry| {
      let Some(entry) = entry else {
        return false;
      };
      found = true;
      if entry.dependent_request_uuids.iter().any(|uuid| uuid == request_uuid) {
        return false;
      }
      entry.dependent_request_uuids.push(request_uuid.to_owned());
      true
    });
    if found {
      debug!(%self_link, %request_uuid, "registered dependent request");
    }
    found
  }

  fn remove_dependents(&self, href: &str) {
    let inner = self.inner.lock();
    let Some(slot) = inner
      .resolve(&url_without_embed_params(href))
      .and_then(|self_link| inner.entries.get(&self_link))
    else {
      return;
    };
    slot.send_if_modified(|entry| match entry {
      Some(entry) if !entry.dependent_request_uuids.is_empty() => {
        entry.dependent_request_uuids.clear();
        true
      }
      _ => false,
    });
  }

  fn remove(&self, href: &str) {
    let mut inner = self.inner.lock();
    let Some(self_link) = inner.resolve(&url_without_embed_params(href)) else {
      return;
    };
    if let Some(slot) = inner.entries.get(&self_link) {
      slot.send_replace(None);
    }
    for tx in inner.links.values() {
      tx.send_if_modified(|target| {
        if target.as_deref() != Some(self_link.as_str()) {
          return false;
        }
        *target = None;
        true
      });
    }
    inner.links.prune();
    inner.entries.prune();
    debug!(%self_link, "removed object");
  }
}
