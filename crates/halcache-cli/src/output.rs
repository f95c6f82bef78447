//! JSON rendering of remote data and `--follow` parsing.

use halcache_core::{
  follow::{FollowLinkConfig, follow_link},
  list::PaginatedList,
  remote_data::{Payload, RemoteData},
  resource::Instance,
};
use serde_json::{Map, Value, json};

/// `a/b/c` follows `a`, then `b` on it, then `c` on that.
pub fn parse_follow(path: &str) -> Option<FollowLinkConfig> {
  path
    .split('/')
    .filter(|segment| !segment.is_empty())
    .rev()
    .fold(None, |inner: Option<FollowLinkConfig>, name| {
      let link = follow_link(name);
      Some(match inner {
        Some(inner) => link.then([inner]),
        None => link,
      })
    })
}

pub fn instance_value(instance: &Instance) -> Value { instance.to_value() }

pub fn list_value(list: &PaginatedList<Instance>) -> Value {
  list.to_value_with(|element| element.to_value())
}

/// Everything but the payload, plus `payload` rendered with `value`.
pub fn render<T>(rd: &RemoteData<T>, value: impl Fn(&T) -> Value) -> Value {
  let payload = match &rd.payload {
    Payload::Unresolved => Value::Null,
    Payload::NoContent => json!({}),
    Payload::Value(payload) => value(payload),
  };
  json!({
    "state": rd.state,
    "statusCode": rd.status_code,
    "errorMessage": rd.error_message,
    "timeCompleted": rd.time_completed,
    "lastUpdated": rd.last_updated,
    "msToLive": rd.ms_to_live,
    "payload": payload,
  })
}

/// Attach resolved links under `_resolved`, keyed by link name.
pub fn with_resolved(mut rendered: Value, resolved: Map<String, Value>) -> Value {
  if !resolved.is_empty()
    && let Some(object) = rendered.as_object_mut()
  {
    object.insert("_resolved".into(), Value::Object(resolved));
  }
  rendered
}
