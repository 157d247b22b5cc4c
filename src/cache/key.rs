//! Canonical cache key generation.
//!
//! Keys look like `{base}/{resource}` with an optional
//! `:{base64(JSON(sorted params))}` suffix. Invalidation by endpoint relies on
//! this exact shape, so it must not change.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;

use crate::sync::params::QueryParams;

/// Build the cache key for a resource list query.
pub fn cache_key(base: &str, resource: &str, params: &QueryParams) -> String {
  let mut key = format!("{}/{}", base, resource);
  if !params.is_empty() {
    // BTreeMap-backed params serialize with sorted keys
    let json = serde_json::to_string(params.as_map()).unwrap_or_default();
    key.push(':');
    key.push_str(&STANDARD.encode(json));
  }
  key
}

/// Build the cache key for a single row.
pub fn item_key(base: &str, resource: &str, id: &str) -> String {
  format!("{}/{}/{}", base, resource, id)
}

/// Pattern matching every key generated for `resource`, whatever its params.
pub fn endpoint_pattern(base: &str, resource: &str) -> Result<Regex, regex::Error> {
  let prefix = regex::escape(&format!("{}/{}", base, resource));
  Regex::new(&format!("^{}(?:[:/]|$)", prefix))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_key_without_params() {
    assert_eq!(
      cache_key("https://api.example", "animals", &QueryParams::new()),
      "https://api.example/animals"
    );
  }

  #[test]
  fn test_key_encodes_sorted_params() {
    let mut params = QueryParams::new();
    params.insert("page", json!(1));
    params.insert("limit", json!(10));

    let key = cache_key("api", "animals", &params);
    let expected = STANDARD.encode(r#"{"limit":10,"page":1}"#);
    assert_eq!(key, format!("api/animals:{}", expected));
  }

  #[test]
  fn test_endpoint_pattern_is_prefix_anchored() {
    let pattern = endpoint_pattern("api", "animals").unwrap();
    assert!(pattern.is_match("api/animals"));
    assert!(pattern.is_match("api/animals:eyJwYWdlIjoxfQ=="));
    assert!(pattern.is_match("api/animals/42"));
    assert!(!pattern.is_match("api/animals_archive"));
    assert!(!pattern.is_match("other/api/animals"));
  }
}
