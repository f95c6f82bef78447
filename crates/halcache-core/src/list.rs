//! Paginated lists and the options used to request them.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
  Result,
  hal::HalLinks,
  resource::{LinkDefinition, Linkable, LinkedResources},
};

/// The `type` discriminator of a normalized paginated list.
pub const PAGINATED_LIST: &str = "paginated-list";

/// The name of the link holding a list's page elements.
pub const PAGE_LINK: &str = "page";

/// Links a paginated list can follow, beside its page.
pub const PAGINATED_LIST_LINKS: &[LinkDefinition] = &[
  LinkDefinition::list(PAGE_LINK),
  LinkDefinition::list("first"),
  LinkDefinition::list("prev"),
  LinkDefinition::list("next"),
  LinkDefinition::list("last"),
];

// ─── Page info ───────────────────────────────────────────────────────────────

/// Pagination metadata. `current_page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
  pub elements_per_page: usize,
  pub total_elements:    usize,
  pub total_pages:       usize,
  pub current_page:      usize,
}

/// The `page` object of a raw HAL list response. `number` is 0-based.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HalPage {
  #[serde(default)]
  pub size:           usize,
  #[serde(default)]
  pub total_elements: usize,
  #[serde(default)]
  pub total_pages:    usize,
  #[serde(default)]
  pub number:         usize,
}

impl From<HalPage> for PageInfo {
  fn from(page: HalPage) -> Self {
    Self {
      elements_per_page: page.size,
      total_elements:    page.total_elements,
      total_pages:       page.total_pages,
      current_page:      page.number + 1,
    }
  }
}

// ─── PaginatedList ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PaginatedList<T> {
  pub page_info: PageInfo,
  /// `None` until the page elements have been resolved.
  pub page:      Option<Vec<T>>,
  pub links:     HalLinks,
  pub linked:    LinkedResources,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlainList {
  #[serde(default)]
  page_info: PageInfo,
  #[serde(default)]
  page:      Option<Vec<Value>>,
  #[serde(default, rename = "_links")]
  links:     HalLinks,
}

impl PaginatedList<Value> {
  /// Rebuild a list from its cached plain form. The source value is copied.
  pub fn from_value(value: &Value) -> Result<Self> {
    let plain: PlainList = serde_json::from_value(value.clone())?;
    Ok(Self {
      page_info: plain.page_info,
      page:      plain.page,
      links:     plain.links,
      linked:    LinkedResources::default(),
    })
  }
}

impl<T> PaginatedList<T> {
  pub fn new(page_info: PageInfo, page: Vec<T>) -> Self {
    Self {
      page_info,
      page: Some(page),
      links: HalLinks::default(),
      linked: LinkedResources::default(),
    }
  }

  /// The inline page, if it holds at least one element.
  pub fn populated_page(&self) -> Option<&[T]> {
    self.page.as_deref().filter(|page| !page.is_empty())
  }

  /// Hrefs of the page elements, in page order.
  pub fn page_hrefs(&self) -> Vec<String> { self.links.hrefs(PAGE_LINK) }

  pub fn elements(&self) -> &[T] { self.page.as_deref().unwrap_or_default() }

  /// The same list with its page replaced. Links and resolved links carry
  /// over.
  pub fn with_page<U>(self, page: Vec<U>) -> PaginatedList<U> {
    PaginatedList {
      page_info: self.page_info,
      page:      Some(page),
      links:     self.links,
      linked:    self.linked,
    }
  }

  pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedList<U> {
    PaginatedList {
      page_info: self.page_info,
      page:      self.page.map(|page| page.into_iter().map(f).collect()),
      links:     self.links,
      linked:    self.linked,
    }
  }

  /// The plain JSON form, with each element rendered by `element`.
  pub fn to_value_with(&self, element: impl Fn(&T) -> Value) -> Value {
    json!({
      "type": PAGINATED_LIST,
      "pageInfo": self.page_info,
      "page": self.page.as_ref().map(|page| page.iter().map(element).collect::<Vec<_>>()),
      "_links": self.links,
    })
  }
}

impl<T> Linkable for PaginatedList<T> {
  fn resource_type(&self) -> &str { PAGINATED_LIST }

  fn links(&self) -> &HalLinks { &self.links }

  fn linked(&self) -> &LinkedResources { &self.linked }

  fn linked_mut(&mut self) -> &mut LinkedResources { &mut self.linked }
}

// ─── Find options ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
  Asc,
  Desc,
}

impl SortDirection {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Asc => "ASC",
      Self::Desc => "DESC",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOptions {
  pub field:     String,
  pub direction: SortDirection,
}

/// An extra `field=value` query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParam {
  pub field_name:  String,
  pub field_value: String,
}

impl RequestParam {
  pub fn new(field_name: impl Into<String>, field_value: impl Into<String>) -> Self {
    Self { field_name: field_name.into(), field_value: field_value.into() }
  }
}

/// Options for list reads. `current_page` is 1-based, like [`PageInfo`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindListOptions {
  pub current_page:      Option<usize>,
  pub elements_per_page: Option<usize>,
  pub sort:              Option<SortOptions>,
  pub search_params:     Vec<RequestParam>,
  pub starts_with:       Option<String>,
}

impl FindListOptions {
  pub fn page(mut self, current_page: usize, elements_per_page: usize) -> Self {
    self.current_page = Some(current_page);
    self.elements_per_page = Some(elements_per_page);
    self
  }

  pub fn sorted_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
    self.sort = Some(SortOptions { field: field.into(), direction });
    self
  }

  pub fn param(mut self, field_name: impl Into<String>, field_value: impl Into<String>) -> Self {
    self.search_params.push(RequestParam::new(field_name, field_value));
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rebuilds_a_cached_list() {
    let list = PaginatedList::from_value(&json!({
      "type": "paginated-list",
      "pageInfo": {
        "elementsPerPage": 2,
        "totalElements": 5,
        "totalPages": 3,
        "currentPage": 1,
      },
      "_links": {
        "self": { "href": "https://rest.api/items?page=0&size=2" },
        "page": [
          { "href": "https://rest.api/items/1" },
          { "href": "https://rest.api/items/2" },
        ],
      },
    }))
    .unwrap();

    assert_eq!(list.page_info.total_pages, 3);
    assert!(list.page.is_none());
    assert!(list.populated_page().is_none());
    assert_eq!(list.page_hrefs(), vec!["https://rest.api/items/1", "https://rest.api/items/2"]);
  }

  #[test]
  fn empty_inline_page_is_not_populated() {
    let list = PaginatedList::from_value(&json!({ "type": "paginated-list", "page": [] })).unwrap();
    assert!(list.populated_page().is_none());
    assert!(list.elements().is_empty());
  }

  #[test]
  fn hal_page_numbers_become_one_based() {
    let info: PageInfo = HalPage { size: 20, total_elements: 41, total_pages: 3, number: 2 }.into();
    assert_eq!(info.current_page, 3);
    assert_eq!(info.elements_per_page, 20);
  }
}
