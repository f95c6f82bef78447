//! Keyed `watch` channels that are dropped once empty and unobserved.

use std::collections::HashMap;

use tokio::sync::watch;

/// Channels created between two sweeps of empty, unobserved ones.
const PRUNE_AFTER: usize = 256;

pub(crate) struct Slots<T> {
  channels: HashMap<String, watch::Sender<Option<T>>>,
  created:  usize,
}

impl<T> Default for Slots<T> {
  fn default() -> Self { Self { channels: HashMap::new(), created: 0 } }
}

impl<T> Slots<T> {
  pub fn get(&self, key: &str) -> Option<&watch::Sender<Option<T>>> { self.channels.get(key) }

  pub fn current(&self, key: &str) -> Option<T>
  where
    T: Clone,
  {
    self.channels.get(key).and_then(|tx| tx.borrow().clone())
  }

  /// The channel for `key`, created empty if missing. Creating channels
  /// sweeps unused ones now and then, so lookups of unknown keys do not
  /// accumulate.
  pub fn slot(&mut self, key: &str) -> &watch::Sender<Option<T>> {
    if !self.channels.contains_key(key) {
      self.created += 1;
      if self.created >= PRUNE_AFTER {
        self.prune();
      }
    }
    self
      .channels
      .entry(key.to_owned())
      .or_insert_with(|| watch::channel(None).0)
  }

  /// Drop every channel that holds no value and has no receiver.
  pub fn prune(&mut self) {
    self.channels.retain(|_, tx| tx.borrow().is_some() || tx.receiver_count() > 0);
    self.created = 0;
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &watch::Sender<Option<T>>)> {
    self.channels.iter()
  }

  pub fn values(&self) -> impl Iterator<Item = &watch::Sender<Option<T>>> { self.channels.values() }

  pub fn len(&self) -> usize { self.channels.len() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_channels_go_once_unobserved() {
    let mut slots = Slots::<u8>::default();
    slots.slot("full").send_replace(Some(1));
    let rx = slots.slot("watched").subscribe();
    slots.slot("empty");

    slots.prune();
    assert!(slots.get("full").is_some());
    assert!(slots.get("watched").is_some());
    assert!(slots.get("empty").is_none());

    drop(rx);
    slots.prune();
    assert_eq!(slots.len(), 1);
  }

  #[test]
  fn creating_channels_sweeps_unused_ones() {
    let mut slots = Slots::<u8>::default();
    for n in 0..1_000 {
      slots.slot(&n.to_string());
    }
    assert!(slots.len() < PRUNE_AFTER);
  }
}
