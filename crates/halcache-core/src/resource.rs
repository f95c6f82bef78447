//! Typed resources and the registry that reinstantiates them.
//!
//! Cached objects are plain JSON. Before a payload reaches a consumer it is
//! promoted to a typed [`Instance`] by looking up its `type` discriminator in
//! the [`ResourceRegistry`]. Registration is explicit and happens at startup;
//! the registry is read-only once shared.

use std::{any::Any, collections::BTreeMap, collections::HashMap, fmt, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::warn;

use crate::{
  hal::HalLinks,
  list::{PAGINATED_LIST, PAGINATED_LIST_LINKS, PaginatedList},
  remote_data::RemoteDataStream,
};

// ─── Link definitions ────────────────────────────────────────────────────────

/// A followable link declared by a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkDefinition {
  pub name:    &'static str,
  /// List links resolve to a paginated list, others to a single resource.
  pub is_list: bool,
}

impl LinkDefinition {
  pub const fn single(name: &'static str) -> Self { Self { name, is_list: false } }

  pub const fn list(name: &'static str) -> Self { Self { name, is_list: true } }
}

// ─── Resolved links ──────────────────────────────────────────────────────────

/// A stream that is only opened when asked for.
pub struct LazyStream<T>(Arc<dyn Fn() -> RemoteDataStream<T> + Send + Sync>);

impl<T> LazyStream<T> {
  pub fn new(open: impl Fn() -> RemoteDataStream<T> + Send + Sync + 'static) -> Self {
    Self(Arc::new(open))
  }

  /// Subscribe. Each call opens a fresh stream.
  pub fn open(&self) -> RemoteDataStream<T> { (self.0)() }
}

impl<T> Clone for LazyStream<T> {
  fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

impl<T> fmt::Debug for LazyStream<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("LazyStream") }
}

#[derive(Debug, Clone)]
pub enum LinkedResource {
  Single(LazyStream<Instance>),
  List(LazyStream<PaginatedList<Instance>>),
}

/// The links resolved on a resource, by link name.
#[derive(Clone, Default)]
pub struct LinkedResources(BTreeMap<String, LinkedResource>);

impl LinkedResources {
  pub fn insert(&mut self, name: impl Into<String>, resource: LinkedResource) {
    self.0.insert(name.into(), resource);
  }

  pub fn get(&self, name: &str) -> Option<&LinkedResource> { self.0.get(name) }

  /// Open the stream of a resolved single link.
  pub fn single(&self, name: &str) -> Option<RemoteDataStream<Instance>> {
    match self.0.get(name)? {
      LinkedResource::Single(stream) => Some(stream.open()),
      LinkedResource::List(_) => None,
    }
  }

  /// Open the stream of a resolved list link.
  pub fn list(&self, name: &str) -> Option<RemoteDataStream<PaginatedList<Instance>>> {
    match self.0.get(name)? {
      LinkedResource::List(stream) => Some(stream.open()),
      LinkedResource::Single(_) => None,
    }
  }

  pub fn names(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }

  pub fn contains(&self, name: &str) -> bool { self.0.contains_key(name) }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn clear(&mut self) { self.0.clear(); }
}

impl fmt::Debug for LinkedResources {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.0.keys()).finish()
  }
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Anything links can be resolved on: resources and paginated lists.
pub trait Linkable {
  fn resource_type(&self) -> &str;
  fn links(&self) -> &HalLinks;
  fn linked(&self) -> &LinkedResources;
  fn linked_mut(&mut self) -> &mut LinkedResources;
}

/// A reinstantiated resource, type-erased.
pub trait Resource: Linkable + Any + Send + Sync + fmt::Debug {
  /// The plain JSON form, without resolved links.
  fn to_value(&self) -> Value;
  fn clone_boxed(&self) -> Box<dyn Resource>;
  fn as_any(&self) -> &dyn Any;
}

impl dyn Resource {
  pub fn downcast_ref<T: Resource>(&self) -> Option<&T> { self.as_any().downcast_ref() }

  pub fn is<T: Resource>(&self) -> bool { self.as_any().is::<T>() }

  pub fn self_href(&self) -> Option<&str> { self.links().self_href() }
}

/// A resource type that can be registered with a [`ResourceRegistry`].
pub trait TypedResource: Resource + Serialize + DeserializeOwned + Clone {
  /// The `type` discriminator.
  const TYPE: &'static str;
  /// The links this type can follow.
  const LINKS: &'static [LinkDefinition];
}

/// Shared handle to a reinstantiated resource.
pub type Instance = Arc<dyn Resource>;

/// Serialize a resource to its plain form.
pub fn to_plain<T: Serialize>(resource: &T) -> Value {
  serde_json::to_value(resource).unwrap_or(Value::Null)
}

/// Implement [`Linkable`] and [`Resource`] for a struct with `links` and
/// `linked` fields that already implements [`TypedResource`].
#[macro_export]
macro_rules! impl_resource {
  ($ty:ty) => {
    impl $crate::resource::Linkable for $ty {
      fn resource_type(&self) -> &str { <$ty as $crate::resource::TypedResource>::TYPE }

      fn links(&self) -> &$crate::hal::HalLinks { &self.links }

      fn linked(&self) -> &$crate::resource::LinkedResources { &self.linked }

      fn linked_mut(&mut self) -> &mut $crate::resource::LinkedResources { &mut self.linked }
    }

    impl $crate::resource::Resource for $ty {
      fn to_value(&self) -> ::serde_json::Value { $crate::resource::to_plain(self) }

      fn clone_boxed(&self) -> ::std::boxed::Box<dyn $crate::resource::Resource> {
        ::std::boxed::Box::new(::std::clone::Clone::clone(self))
      }

      fn as_any(&self) -> &dyn ::std::any::Any { self }
    }
  };
}

// ─── GenericResource ─────────────────────────────────────────────────────────

/// Any object whose type is not registered. Keeps the full JSON.
#[derive(Debug, Clone)]
pub struct GenericResource {
  pub value:  Value,
  pub links:  HalLinks,
  pub linked: LinkedResources,
}

impl GenericResource {
  pub fn from_value(value: Value) -> Self {
    let links = value
      .get("_links")
      .and_then(|links| serde_json::from_value(links.clone()).ok())
      .unwrap_or_default();
    Self { value, links, linked: LinkedResources::default() }
  }
}

impl Linkable for GenericResource {
  fn resource_type(&self) -> &str {
    self.value.get("type").and_then(Value::as_str).unwrap_or_default()
  }

  fn links(&self) -> &HalLinks { &self.links }

  fn linked(&self) -> &LinkedResources { &self.linked }

  fn linked_mut(&mut self) -> &mut LinkedResources { &mut self.linked }
}

impl Resource for GenericResource {
  fn to_value(&self) -> Value { self.value.clone() }

  fn clone_boxed(&self) -> Box<dyn Resource> { Box::new(self.clone()) }

  fn as_any(&self) -> &dyn Any { self }
}

// ─── Registry ────────────────────────────────────────────────────────────────

type Factory = fn(Value) -> Result<Instance, serde_json::Error>;

fn build<T: TypedResource>(value: Value) -> Result<Instance, serde_json::Error> {
  let resource: T = serde_json::from_value(value)?;
  Ok(Arc::new(resource))
}

/// Maps `type` discriminators to factories and declared links.
pub struct ResourceRegistry {
  factories: HashMap<&'static str, Factory>,
  links:     HashMap<&'static str, &'static [LinkDefinition]>,
}

impl ResourceRegistry {
  /// A registry that only knows paginated lists.
  pub fn new() -> Self {
    let mut links = HashMap::new();
    links.insert(PAGINATED_LIST, PAGINATED_LIST_LINKS);
    Self { factories: HashMap::new(), links }
  }

  /// A registry with every resource type in [`crate::model`].
  pub fn with_defaults() -> Self {
    use crate::model::{Bitstream, Bundle, Collection, Community, Item};

    let mut registry = Self::new();
    registry
      .register::<Item>()
      .register::<Bundle>()
      .register::<Bitstream>()
      .register::<Collection>()
      .register::<Community>();
    registry
  }

  pub fn register<T: TypedResource>(&mut self) -> &mut Self {
    self.factories.insert(T::TYPE, build::<T>);
    self.links.insert(T::TYPE, T::LINKS);
    self
  }

  pub fn is_registered(&self, resource_type: &str) -> bool {
    self.factories.contains_key(resource_type)
  }

  /// The links declared by `resource_type`; empty for unknown types.
  pub fn link_definitions(&self, resource_type: &str) -> &'static [LinkDefinition] {
    self.links.get(resource_type).copied().unwrap_or_default()
  }

  pub fn link_definition(&self, resource_type: &str, name: &str) -> Option<LinkDefinition> {
    self.link_definitions(resource_type).iter().find(|d| d.name == name).copied()
  }

  /// Build a typed instance from an owned copy of `value`. Unknown types, and
  /// objects their registered type cannot read, become [`GenericResource`].
  pub fn instantiate(&self, value: &Value) -> Instance {
    let resource_type = value.get("type").and_then(Value::as_str);
    if let Some(factory) = resource_type.and_then(|t| self.factories.get(t)) {
      match factory(value.clone()) {
        Ok(instance) => return instance,
        Err(err) => warn!(?resource_type, %err, "falling back to a generic resource"),
      }
    }
    Arc::new(GenericResource::from_value(value.clone()))
  }
}

impl Default for ResourceRegistry {
  fn default() -> Self { Self::with_defaults() }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::model::Item;

  #[test]
  fn registered_types_are_reinstantiated() {
    let registry = ResourceRegistry::with_defaults();
    let source = json!({
      "type": "item",
      "uuid": "8a8a",
      "name": "A thesis",
      "lastModified": "2024-03-01T10:00:00Z",
      "_links": { "self": { "href": "https://rest.api/items/8a8a" } },
    });

    let instance = registry.instantiate(&source);
    let item = instance.downcast_ref::<Item>().expect("typed item");
    assert_eq!(item.name.as_deref(), Some("A thesis"));
    assert_eq!(instance.self_href(), Some("https://rest.api/items/8a8a"));
    // unknown properties survive the round trip
    assert_eq!(instance.to_value()["lastModified"], "2024-03-01T10:00:00Z");
  }

  #[test]
  fn unknown_types_become_generic() {
    let registry = ResourceRegistry::with_defaults();
    let instance = registry.instantiate(&json!({ "type": "relationship", "id": 4 }));
    assert!(instance.is::<GenericResource>());
    assert_eq!(instance.resource_type(), "relationship");
    assert_eq!(instance.to_value()["id"], 4);
  }

  #[test]
  fn unreadable_objects_fall_back_to_generic() {
    let registry = ResourceRegistry::with_defaults();
    let instance = registry.instantiate(&json!({ "type": "item", "metadata": "not a map" }));
    assert!(instance.is::<GenericResource>());
  }

  #[test]
  fn declared_links_are_looked_up_by_type() {
    let registry = ResourceRegistry::with_defaults();
    assert_eq!(registry.link_definition("item", "bundles"), Some(LinkDefinition::list("bundles")));
    assert_eq!(registry.link_definition("item", "nope"), None);
    assert!(registry.link_definitions("relationship").is_empty());
    assert!(registry.link_definition(PAGINATED_LIST, "next").is_some());
  }
}
