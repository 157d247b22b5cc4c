//! Error taxonomy for the synchronization engine.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by data services and the resource controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
  /// Transient or validation failure reported by the backend
  #[error("{message}")]
  Service { status: Option<u16>, message: String },

  /// The requested row does not exist (or was already deleted)
  #[error("{message}")]
  NotFound { message: String },

  /// Foreign-key or other dependency conflict
  #[error("{message}")]
  Conflict { message: String },

  #[error("Too many requests, retry in {}s", retry_after.as_secs())]
  RateLimited { retry_after: Duration },

  /// Request was aborted before the server answered (a proxy's 499); never
  /// shown to the user
  #[error("Request was cancelled")]
  Cancelled,

  #[error("Failed to decode response: {0}")]
  Decode(String),

  #[error("Network error: {0}")]
  Transport(String),
}

impl SyncError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, SyncError::NotFound { .. })
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, SyncError::Cancelled)
  }

  pub fn is_rate_limited(&self) -> bool {
    matches!(self, SyncError::RateLimited { .. })
  }

  /// Build an error from an HTTP status and (possibly JSON) body.
  pub fn from_response(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
      .as_ref()
      .and_then(extract_message)
      .unwrap_or_else(|| format!("Request failed with status {}", status));

    match status {
      404 => SyncError::NotFound { message },
      409 => SyncError::Conflict { message },
      CLIENT_CLOSED_REQUEST => SyncError::Cancelled,
      429 => SyncError::RateLimited {
        retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
      },
      _ => SyncError::Service {
        status: Some(status),
        message,
      },
    }
  }
}

/// Status proxies answer with when the client went away mid-request.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Backoff applied when a 429 carries no Retry-After header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Pull a human-readable message out of an error response body.
///
/// Checked in order: `message`, `detail` (string or list of objects),
/// then a field-keyed `errors` object joined as `field: msg` pairs.
pub fn extract_message(body: &Value) -> Option<String> {
  if let Some(msg) = body.get("message").and_then(Value::as_str) {
    if !msg.is_empty() {
      return Some(msg.to_string());
    }
  }

  match body.get("detail") {
    Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
    Some(Value::Array(items)) => {
      let parts: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
          Value::String(s) => Some(s.clone()),
          Value::Object(obj) => obj
            .get("msg")
            .or_else(|| obj.get("message"))
            .and_then(Value::as_str)
            .map(String::from),
          _ => None,
        })
        .collect();
      if !parts.is_empty() {
        return Some(parts.join(", "));
      }
    }
    _ => {}
  }

  if let Some(Value::Object(errors)) = body.get("errors") {
    let parts: Vec<String> = errors
      .iter()
      .map(|(field, msg)| {
        let text = match msg {
          Value::String(s) => s.clone(),
          Value::Array(list) => list
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
          other => other.to_string(),
        };
        format!("{}: {}", field, text)
      })
      .collect();
    if !parts.is_empty() {
      return Some(parts.join("; "));
    }
  }

  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_message_field_wins() {
    let body = json!({ "message": "Animal tag already exists", "detail": "ignored" });
    assert_eq!(
      extract_message(&body).as_deref(),
      Some("Animal tag already exists")
    );
  }

  #[test]
  fn test_detail_list_is_joined() {
    let body = json!({ "detail": [{ "msg": "name required" }, { "msg": "weight must be positive" }] });
    assert_eq!(
      extract_message(&body).as_deref(),
      Some("name required, weight must be positive")
    );
  }

  #[test]
  fn test_field_errors_are_joined() {
    let body = json!({ "errors": { "dose": ["must be > 0"], "name": "required" } });
    assert_eq!(
      extract_message(&body).as_deref(),
      Some("dose: must be > 0; name: required")
    );
  }

  #[test]
  fn test_generic_fallback() {
    let err = SyncError::from_response(502, "<html>bad gateway</html>", None);
    assert_eq!(err.to_string(), "Request failed with status 502");
  }

  #[test]
  fn test_status_classification() {
    assert!(SyncError::from_response(404, "{}", None).is_not_found());
    assert!(matches!(
      SyncError::from_response(409, r#"{"detail":"in use by treatments"}"#, None),
      SyncError::Conflict { .. }
    ));
    assert_eq!(
      SyncError::from_response(429, "", Some(Duration::from_secs(3))),
      SyncError::RateLimited {
        retry_after: Duration::from_secs(3)
      }
    );
    assert!(SyncError::from_response(CLIENT_CLOSED_REQUEST, "", None).is_cancelled());
  }
}
