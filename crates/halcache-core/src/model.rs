//! The repository resource types known to the default registry.
//!
//! Only the commonly read properties are modelled; everything else is kept in
//! `extra` so a typed copy never loses data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  hal::HalLinks,
  impl_resource,
  resource::{LinkDefinition, LinkedResources, TypedResource},
};

// ─── Metadata ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataValue {
  pub value:      String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub language:   Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub authority:  Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confidence: Option<i32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub place:      Option<i32>,
}

/// Metadata values by field key, e.g. `dc.title`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataMap(pub BTreeMap<String, Vec<MetadataValue>>);

impl MetadataMap {
  pub fn values(&self, key: &str) -> &[MetadataValue] {
    self.0.get(key).map(Vec::as_slice).unwrap_or_default()
  }

  pub fn first_value(&self, key: &str) -> Option<&str> {
    self.values(key).first().map(|v| v.value.as_str())
  }
}

// ─── Item ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
  #[serde(default)]
  pub uuid:         Option<String>,
  #[serde(default)]
  pub name:         Option<String>,
  #[serde(default)]
  pub handle:       Option<String>,
  #[serde(default)]
  pub metadata:     MetadataMap,
  #[serde(default)]
  pub in_archive:   bool,
  #[serde(default)]
  pub discoverable: bool,
  #[serde(default)]
  pub withdrawn:    bool,
  #[serde(default)]
  pub entity_type:  Option<String>,
  #[serde(default, rename = "_links")]
  pub links:        HalLinks,
  #[serde(flatten)]
  pub extra:        Map<String, Value>,
  #[serde(skip)]
  pub linked:       LinkedResources,
}

impl TypedResource for Item {
  const LINKS: &'static [LinkDefinition] = &[
    LinkDefinition::list("bundles"),
    LinkDefinition::single("owningCollection"),
    LinkDefinition::list("mappedCollections"),
    LinkDefinition::list("relationships"),
    LinkDefinition::single("thumbnail"),
  ];
  const TYPE: &'static str = "item";
}

impl_resource!(Item);

// ─── Bundle ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
  #[serde(default)]
  pub uuid:     Option<String>,
  #[serde(default)]
  pub name:     Option<String>,
  #[serde(default)]
  pub metadata: MetadataMap,
  #[serde(default, rename = "_links")]
  pub links:    HalLinks,
  #[serde(flatten)]
  pub extra:    Map<String, Value>,
  #[serde(skip)]
  pub linked:   LinkedResources,
}

impl TypedResource for Bundle {
  const LINKS: &'static [LinkDefinition] = &[
    LinkDefinition::list("bitstreams"),
    LinkDefinition::single("primaryBitstream"),
    LinkDefinition::single("item"),
  ];
  const TYPE: &'static str = "bundle";
}

impl_resource!(Bundle);

// ─── Bitstream ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bitstream {
  #[serde(default)]
  pub uuid:        Option<String>,
  #[serde(default)]
  pub name:        Option<String>,
  #[serde(default)]
  pub metadata:    MetadataMap,
  #[serde(default)]
  pub size_bytes:  Option<u64>,
  #[serde(default)]
  pub sequence_id: Option<i64>,
  #[serde(default, rename = "_links")]
  pub links:       HalLinks,
  #[serde(flatten)]
  pub extra:       Map<String, Value>,
  #[serde(skip)]
  pub linked:      LinkedResources,
}

impl TypedResource for Bitstream {
  const LINKS: &'static [LinkDefinition] = &[
    LinkDefinition::single("bundle"),
    LinkDefinition::single("format"),
    LinkDefinition::single("thumbnail"),
  ];
  const TYPE: &'static str = "bitstream";
}

impl_resource!(Bitstream);

// ─── Collection ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
  #[serde(default)]
  pub uuid:     Option<String>,
  #[serde(default)]
  pub name:     Option<String>,
  #[serde(default)]
  pub handle:   Option<String>,
  #[serde(default)]
  pub metadata: MetadataMap,
  #[serde(default, rename = "_links")]
  pub links:    HalLinks,
  #[serde(flatten)]
  pub extra:    Map<String, Value>,
  #[serde(skip)]
  pub linked:   LinkedResources,
}

impl TypedResource for Collection {
  const LINKS: &'static [LinkDefinition] = &[
    LinkDefinition::single("logo"),
    LinkDefinition::single("parentCommunity"),
    LinkDefinition::list("mappedItems"),
  ];
  const TYPE: &'static str = "collection";
}

impl_resource!(Collection);

// ─── Community ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
  #[serde(default)]
  pub uuid:     Option<String>,
  #[serde(default)]
  pub name:     Option<String>,
  #[serde(default)]
  pub handle:   Option<String>,
  #[serde(default)]
  pub metadata: MetadataMap,
  #[serde(default, rename = "_links")]
  pub links:    HalLinks,
  #[serde(flatten)]
  pub extra:    Map<String, Value>,
  #[serde(skip)]
  pub linked:   LinkedResources,
}

impl TypedResource for Community {
  const LINKS: &'static [LinkDefinition] = &[
    LinkDefinition::single("logo"),
    LinkDefinition::list("collections"),
    LinkDefinition::list("subcommunities"),
    LinkDefinition::single("parentCommunity"),
  ];
  const TYPE: &'static str = "community";
}

impl_resource!(Community);
