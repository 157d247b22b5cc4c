//! Capability contract every backend client must satisfy.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncResult;
use crate::sync::params::QueryParams;

/// Rows that carry a stable identifier.
pub trait Identified {
  fn id(&self) -> String;
}

/// One page of a paginated listing, as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
  pub data: Vec<T>,
  pub page: u32,
  pub limit: u32,
  pub total: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total_pages: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub has_next_page: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub has_previous_page: Option<bool>,
}

/// Paged CRUD access to one resource.
///
/// `delete` must report a repeat or late delete as
/// [`SyncError::NotFound`](crate::error::SyncError::NotFound).
#[async_trait]
pub trait DataService<T>: Send + Sync {
  async fn list_paged(&self, params: &QueryParams) -> SyncResult<Page<T>>;

  async fn list_all(&self, params: &QueryParams) -> SyncResult<Vec<T>>;

  async fn create(&self, payload: &Value) -> SyncResult<T>;

  async fn update(&self, id: &str, payload: &Value) -> SyncResult<T>;

  async fn delete(&self, id: &str) -> SyncResult<bool>;

  async fn get_by_id(&self, id: &str) -> SyncResult<T>;
}

/// Shallow-merge `patch` into `item`. Non-object values leave `item` as is.
pub fn merge_patch<T: Serialize + DeserializeOwned + Clone>(item: &T, patch: &Value) -> T {
  let Value::Object(patch) = patch else {
    return item.clone();
  };
  let Ok(Value::Object(mut base)) = serde_json::to_value(item) else {
    return item.clone();
  };
  for (key, value) in patch {
    base.insert(key.clone(), value.clone());
  }
  serde_json::from_value(Value::Object(base)).unwrap_or_else(|_| item.clone())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Vaccine {
    id: u32,
    name: String,
    dose_ml: f32,
  }

  #[test]
  fn test_page_deserializes_optional_meta() {
    let page: Page<Vaccine> = serde_json::from_value(json!({
      "data": [{ "id": 1, "name": "Clostridial 7-way", "dose_ml": 2.0 }],
      "page": 1,
      "limit": 10,
      "total": 1,
      "hasNextPage": false
    }))
    .unwrap();

    assert_eq!(page.data.len(), 1);
    assert_eq!(page.total_pages, None);
    assert_eq!(page.has_next_page, Some(false));
  }

  #[test]
  fn test_merge_patch_overlays_fields() {
    let vaccine = Vaccine {
      id: 1,
      name: "Brucellosis".into(),
      dose_ml: 2.0,
    };
    let merged = merge_patch(&vaccine, &json!({ "dose_ml": 5.0 }));
    assert_eq!(merged.dose_ml, 5.0);
    assert_eq!(merged.name, "Brucellosis");
  }

  #[test]
  fn test_merge_patch_ignores_incompatible_patch() {
    let vaccine = Vaccine {
      id: 1,
      name: "Brucellosis".into(),
      dose_ml: 2.0,
    };
    assert_eq!(merge_patch(&vaccine, &json!({ "dose_ml": "lots" })), vaccine);
    assert_eq!(merge_patch(&vaccine, &json!([1, 2])), vaccine);
  }
}
