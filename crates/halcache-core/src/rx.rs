//! Stream operators the build pipelines are composed from.
//!
//! Sources are live state channels: they yield their current value first and
//! every change after it. The operators keep the usual reactive semantics:
//! `combine_latest` waits for a value from every source, `switch_map` drops
//! the running inner stream when a newer outer value arrives, and
//! `distinct_until_changed_by` suppresses repeats of the same key.

use std::{
  future,
  pin::Pin,
  task::{Context, Poll},
};

use futures::{
  Stream, StreamExt,
  stream::{self, BoxStream},
};

// ─── Sources ─────────────────────────────────────────────────────────────────

/// A stream of exactly one value.
pub fn just<T: Send + 'static>(value: T) -> BoxStream<'static, T> {
  stream::once(future::ready(value)).boxed()
}

// ─── Combination ─────────────────────────────────────────────────────────────

enum Either<A, B> {
  Left(A),
  Right(B),
}

/// Emit the latest pair once both sources have produced a value, then on
/// every further emission of either source.
pub fn combine_latest<A, B>(
  left: BoxStream<'static, A>,
  right: BoxStream<'static, B>,
) -> BoxStream<'static, (A, B)>
where
  A: Clone + Send + 'static,
  B: Clone + Send + 'static,
{
  stream::select(left.map(Either::Left), right.map(Either::Right))
    .scan((None, None), |latest: &mut (Option<A>, Option<B>), item| {
      match item {
        Either::Left(a) => latest.0 = Some(a),
        Either::Right(b) => latest.1 = Some(b),
      }
      let pair = match latest {
        (Some(a), Some(b)) => Some((a.clone(), b.clone())),
        _ => None,
      };
      future::ready(Some(pair))
    })
    .filter_map(future::ready)
    .boxed()
}

/// [`combine_latest`] over any number of sources. No sources yields one
/// empty vector.
pub fn combine_latest_all<T>(sources: Vec<BoxStream<'static, T>>) -> BoxStream<'static, Vec<T>>
where
  T: Clone + Send + 'static,
{
  let len = sources.len();
  if len == 0 {
    return just(Vec::new());
  }

  let tagged = sources
    .into_iter()
    .enumerate()
    .map(|(index, source)| source.map(move |value| (index, value)).boxed());

  stream::select_all(tagged)
    .scan(vec![None; len], |latest: &mut Vec<Option<T>>, (index, value)| {
      latest[index] = Some(value);
      let all = latest.iter().cloned().collect::<Option<Vec<T>>>();
      future::ready(Some(all))
    })
    .filter_map(future::ready)
    .boxed()
}

// ─── SwitchMap ───────────────────────────────────────────────────────────────

type Project<T, U> = Box<dyn FnMut(T) -> BoxStream<'static, U> + Send>;

/// See [`RxStreamExt::switch_map`].
pub struct SwitchMap<T, U> {
  outer:   Option<BoxStream<'static, T>>,
  inner:   Option<BoxStream<'static, U>>,
  project: Project<T, U>,
}

impl<T, U> Stream for SwitchMap<T, U> {
  type Item = U;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<U>> {
    let this = self.get_mut();

    // Only the newest outer value gets an inner stream.
    if let Some(outer) = this.outer.as_mut() {
      loop {
        match outer.poll_next_unpin(cx) {
          Poll::Ready(Some(value)) => this.inner = Some((this.project)(value)),
          Poll::Ready(None) => {
            this.outer = None;
            break;
          }
          Poll::Pending => break,
        }
      }
    }

    if let Some(inner) = this.inner.as_mut() {
      match inner.poll_next_unpin(cx) {
        Poll::Ready(Some(value)) => return Poll::Ready(Some(value)),
        Poll::Ready(None) => this.inner = None,
        Poll::Pending => return Poll::Pending,
      }
    }

    if this.outer.is_none() && this.inner.is_none() {
      Poll::Ready(None)
    } else {
      Poll::Pending
    }
  }
}

// ─── Extension trait ─────────────────────────────────────────────────────────

pub trait RxStreamExt: Stream + Sized + Send + 'static {
  /// Map every item to an inner stream, forwarding only the inner stream of
  /// the latest item.
  fn switch_map<U, F>(self, project: F) -> BoxStream<'static, U>
  where
    Self::Item: Send + 'static,
    U: Send + 'static,
    F: FnMut(Self::Item) -> BoxStream<'static, U> + Send + 'static,
  {
    SwitchMap { outer: Some(self.boxed()), inner: None, project: Box::new(project) }.boxed()
  }

  /// Drop items whose key equals the key of the previous forwarded item.
  fn distinct_until_changed_by<K, F>(self, mut key: F) -> BoxStream<'static, Self::Item>
  where
    Self::Item: Send + 'static,
    K: PartialEq + Send + 'static,
    F: FnMut(&Self::Item) -> K + Send + 'static,
  {
    let mut last: Option<K> = None;
    self
      .filter(move |item| {
        let next = key(item);
        let changed = last.as_ref() != Some(&next);
        if changed {
          last = Some(next);
        }
        future::ready(changed)
      })
      .boxed()
  }

  /// Emit `first` before anything from this stream.
  fn start_with(self, first: Self::Item) -> BoxStream<'static, Self::Item>
  where
    Self::Item: Send + 'static,
  {
    stream::once(future::ready(first)).chain(self).boxed()
  }

  /// Forward items up to and including the first `Err`, then end.
  fn take_until_error<T, E>(self) -> BoxStream<'static, Result<T, E>>
  where
    Self: Stream<Item = Result<T, E>>,
    T: Send + 'static,
    E: Send + 'static,
  {
    self
      .scan(false, |failed, item| {
        if *failed {
          return future::ready(None);
        }
        *failed = item.is_err();
        future::ready(Some(item))
      })
      .boxed()
  }

  /// [`switch_map`](Self::switch_map) over `Ok` values; an `Err` is forwarded
  /// as-is.
  fn try_switch_map<T, U, E, F>(self, mut project: F) -> BoxStream<'static, Result<U, E>>
  where
    Self: Stream<Item = Result<T, E>>,
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
    F: FnMut(T) -> BoxStream<'static, Result<U, E>> + Send + 'static,
  {
    self.switch_map(move |item| match item {
      Ok(value) => project(value),
      Err(err) => just(Err(err)),
    })
  }
}

impl<S: Stream + Sized + Send + 'static> RxStreamExt for S {}

#[cfg(test)]
mod tests {
  use tokio::sync::watch;
  use tokio_stream::wrappers::WatchStream;

  use super::*;

  #[tokio::test]
  async fn combine_latest_waits_for_both_sides() {
    let left = stream::iter([1, 2]).boxed();
    let right = stream::iter(["a"]).boxed();
    let pairs: Vec<_> = combine_latest(left, right).collect().await;
    assert!(!pairs.is_empty());
    assert_eq!(pairs.last(), Some(&(2, "a")));
    assert!(pairs.iter().all(|(_, r)| *r == "a"));
  }

  #[tokio::test]
  async fn combine_latest_all_of_nothing_is_one_empty_vec() {
    let out: Vec<Vec<u8>> = combine_latest_all(Vec::new()).collect().await;
    assert_eq!(out, vec![Vec::<u8>::new()]);
  }

  #[tokio::test]
  async fn combine_latest_all_keeps_source_order() {
    let sources = vec![just(1), just(2), just(3)];
    let out: Vec<_> = combine_latest_all(sources).collect().await;
    assert_eq!(out, vec![vec![1, 2, 3]]);
  }

  #[tokio::test]
  async fn switch_map_drops_superseded_inner_streams() {
    let (tx, rx) = watch::channel(1);
    let mut out = WatchStream::new(rx).switch_map(|n| {
      // the inner stream of every value but the latest never finishes
      stream::iter([n * 10]).chain(stream::pending()).boxed()
    });

    assert_eq!(out.next().await, Some(10));
    tx.send(2).unwrap();
    assert_eq!(out.next().await, Some(20));
  }

  #[tokio::test]
  async fn distinct_suppresses_repeated_keys() {
    let out: Vec<_> = stream::iter([(1, 'a'), (1, 'b'), (2, 'c'), (1, 'd')])
      .distinct_until_changed_by(|(k, _)| *k)
      .collect()
      .await;
    assert_eq!(out, vec![(1, 'a'), (2, 'c'), (1, 'd')]);
  }

  #[tokio::test]
  async fn take_until_error_ends_after_the_first_error() {
    let out: Vec<Result<u8, &str>> = stream::iter([Ok(1), Err("boom"), Ok(2)])
      .take_until_error()
      .collect()
      .await;
    assert_eq!(out, vec![Ok(1), Err("boom")]);
  }
}
