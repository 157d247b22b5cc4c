//! Query parameters and the effective-params merge.
//!
//! Three sources feed a fetch: parameters passed by the caller, the
//! location (a query-string representation of navigation state) and
//! defaults. Defaults are overridden by caller params, and the location wins
//! over both for the navigation keys in [`LOCATION_KEYS`].

use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Keys whose location-derived value overrides caller params.
pub const LOCATION_KEYS: &[&str] = &["page", "limit", "search", "fields", "sort"];

/// Ordered parameter map. Keys serialize sorted, which cache keys rely on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(BTreeMap<String, Value>);

impl QueryParams {
  pub fn new() -> Self {
    Self::default()
  }

  /// Params for one page of a paginated listing.
  pub fn paged(page: u32, limit: u32) -> Self {
    let mut params = Self::new();
    params.insert("page", json!(page));
    params.insert("limit", json!(limit));
    params
  }

  pub fn insert(&mut self, key: impl Into<String>, value: Value) {
    self.0.insert(key.into(), value);
  }

  pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
    self.insert(key, value);
    self
  }

  pub fn remove(&mut self, key: &str) -> Option<Value> {
    self.0.remove(key)
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn as_map(&self) -> &BTreeMap<String, Value> {
    &self.0
  }

  pub fn page(&self) -> Option<u32> {
    self.get("page").and_then(as_u32)
  }

  pub fn limit(&self) -> Option<u32> {
    self.get("limit").and_then(as_u32)
  }

  /// Whether this query asks for a paginated listing.
  pub fn is_paged(&self) -> bool {
    self.page().is_some() || self.limit().is_some()
  }

  /// Render as `(key, value)` string pairs for a request query string.
  pub fn to_pairs(&self) -> Vec<(String, String)> {
    self
      .0
      .iter()
      .map(|(k, v)| {
        let value = match v {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        (k.clone(), value)
      })
      .collect()
  }
}

fn as_u32(value: &Value) -> Option<u32> {
  match value {
    Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

/// Navigation-state source of query params, mirroring a URL query string.
///
/// Setters change the source only; callers refetch with the returned
/// effective params so navigation state and fetches stay in step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSource {
  page: Option<u32>,
  limit: Option<u32>,
  search: Option<String>,
  fields: Option<String>,
  sort: Option<String>,
}

impl ParamSource {
  pub fn new() -> Self {
    Self::default()
  }

  /// Parse from a query string such as `page=2&limit=25&search=angus`.
  pub fn from_query_string(query: &str) -> Self {
    let mut source = Self::new();
    let query = query.trim_start_matches('?');
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
      match key.as_ref() {
        "page" => source.page = value.parse().ok().filter(|p| *p >= 1),
        "limit" => source.limit = value.parse().ok().filter(|l| *l >= 1),
        "search" => source.search = non_empty(value.into_owned()),
        "fields" => source.fields = non_empty(value.into_owned()),
        "sort" => source.sort = non_empty(value.into_owned()),
        _ => {}
      }
    }
    source
  }

  pub fn to_query_string(&self) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in self.to_params().to_pairs() {
      serializer.append_pair(&key, &value);
    }
    serializer.finish()
  }

  pub fn set_page(&mut self, page: u32) {
    self.page = Some(page.max(1));
  }

  /// Changing the page size returns to the first page.
  pub fn set_limit(&mut self, limit: u32) {
    self.limit = Some(limit.max(1));
    self.page = Some(1);
  }

  /// Changing the search term returns to the first page.
  pub fn set_search(&mut self, search: &str) {
    self.search = non_empty(search.trim().to_string());
    self.page = Some(1);
  }

  pub fn set_sort(&mut self, sort: Option<&str>) {
    self.sort = sort.map(String::from).and_then(non_empty);
  }

  pub fn set_fields(&mut self, fields: Option<&str>) {
    self.fields = fields.map(String::from).and_then(non_empty);
  }

  pub fn page(&self) -> Option<u32> {
    self.page
  }

  pub fn search(&self) -> Option<&str> {
    self.search.as_deref()
  }

  fn to_params(&self) -> QueryParams {
    let mut params = QueryParams::new();
    if let Some(page) = self.page {
      params.insert("page", json!(page));
    }
    if let Some(limit) = self.limit {
      params.insert("limit", json!(limit));
    }
    if let Some(search) = &self.search {
      params.insert("search", json!(search));
    }
    if let Some(fields) = &self.fields {
      params.insert("fields", json!(fields));
    }
    if let Some(sort) = &self.sort {
      params.insert("sort", json!(sort));
    }
    params
  }
}

fn non_empty(s: String) -> Option<String> {
  if s.is_empty() {
    None
  } else {
    Some(s)
  }
}

/// Merge the three parameter sources into the params used for a fetch.
pub fn effective_params(
  caller: &QueryParams,
  location: &ParamSource,
  defaults: &QueryParams,
) -> QueryParams {
  let mut merged = defaults.clone();
  for (key, value) in caller.as_map() {
    merged.insert(key.clone(), value.clone());
  }
  for (key, value) in location.to_params().0 {
    debug_assert!(LOCATION_KEYS.contains(&key.as_str()));
    merged.insert(key, value);
  }
  // An empty search term means "no filter", not "match empty"
  if merged
    .get("search")
    .and_then(Value::as_str)
    .is_some_and(str::is_empty)
  {
    merged.remove("search");
  }
  merged
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_location_overrides_caller_and_defaults() {
    let defaults = QueryParams::paged(1, 10).with("sort", json!("name"));
    let caller = QueryParams::new()
      .with("page", json!(3))
      .with("species", json!("bovine"));
    let location = ParamSource::from_query_string("?page=2&search=angus");

    let merged = effective_params(&caller, &location, &defaults);

    assert_eq!(merged.page(), Some(2));
    assert_eq!(merged.limit(), Some(10));
    assert_eq!(merged.get("search"), Some(&json!("angus")));
    assert_eq!(merged.get("species"), Some(&json!("bovine")));
    assert_eq!(merged.get("sort"), Some(&json!("name")));
  }

  #[test]
  fn test_caller_overrides_defaults_when_location_is_silent() {
    let defaults = QueryParams::paged(1, 10);
    let caller = QueryParams::paged(4, 50);

    let merged = effective_params(&caller, &ParamSource::new(), &defaults);

    assert_eq!(merged.page(), Some(4));
    assert_eq!(merged.limit(), Some(50));
  }

  #[test]
  fn test_empty_search_is_dropped() {
    let caller = QueryParams::new().with("search", json!(""));
    let merged = effective_params(&caller, &ParamSource::new(), &QueryParams::new());
    assert!(merged.is_empty());
  }

  #[test]
  fn test_setters_reset_page() {
    let mut source = ParamSource::from_query_string("page=5&limit=10");
    source.set_search("hereford");
    assert_eq!(source.page(), Some(1));

    source.set_page(3);
    source.set_limit(25);
    assert_eq!(source.page(), Some(1));
    assert_eq!(source.to_query_string(), "limit=25&page=1&search=hereford");
  }

  #[test]
  fn test_invalid_location_values_are_ignored() {
    let source = ParamSource::from_query_string("page=0&limit=abc&search=");
    assert_eq!(source, ParamSource::new());
  }

  #[test]
  fn test_string_page_params_are_understood() {
    let params = QueryParams::new().with("page", json!("2"));
    assert_eq!(params.page(), Some(2));
    assert!(params.is_paged());
  }
}
