use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::service::Identified;

/// A row of any resource, kept as the JSON object the server returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
  /// Field rendered as display text ("" when absent).
  pub fn field(&self, name: &str) -> String {
    match self.0.get(name) {
      None | Some(Value::Null) => String::new(),
      Some(Value::String(s)) => s.clone(),
      Some(Value::Object(obj)) => obj
        .get("name")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
      Some(other) => other.to_string(),
    }
  }

  /// All fields as `(name, text)` pairs, id first.
  pub fn fields(&self) -> Vec<(String, String)> {
    let mut fields: Vec<_> = self
      .0
      .keys()
      .filter(|k| k.as_str() != "id")
      .map(|k| (k.clone(), self.field(k)))
      .collect();
    fields.insert(0, ("id".to_string(), self.id()));
    fields
  }
}

impl Identified for Record {
  fn id(&self) -> String {
    match self.0.get("id") {
      Some(Value::String(s)) => s.clone(),
      Some(Value::Number(n)) => n.to_string(),
      _ => String::new(),
    }
  }
}

/// Resources the admin client can manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
  Animals,
  Treatments,
  Vaccines,
  Medications,
  Breeds,
  Species,
}

impl ResourceKind {
  pub const ALL: &'static [ResourceKind] = &[
    ResourceKind::Animals,
    ResourceKind::Treatments,
    ResourceKind::Vaccines,
    ResourceKind::Medications,
    ResourceKind::Breeds,
    ResourceKind::Species,
  ];

  /// REST endpoint name, also the resource part of cache keys.
  pub fn endpoint(&self) -> &'static str {
    match self {
      ResourceKind::Animals => "animals",
      ResourceKind::Treatments => "treatments",
      ResourceKind::Vaccines => "vaccines",
      ResourceKind::Medications => "medications",
      ResourceKind::Breeds => "breeds",
      ResourceKind::Species => "species",
    }
  }

  pub fn title(&self) -> &'static str {
    match self {
      ResourceKind::Animals => "Animals",
      ResourceKind::Treatments => "Treatments",
      ResourceKind::Vaccines => "Vaccines",
      ResourceKind::Medications => "Medications",
      ResourceKind::Breeds => "Breeds",
      ResourceKind::Species => "Species",
    }
  }

  /// Columns shown in list views, after the id.
  pub fn columns(&self) -> &'static [&'static str] {
    match self {
      ResourceKind::Animals => &["tag", "name", "species", "breed", "status"],
      ResourceKind::Treatments => &["animal", "medication", "date", "status"],
      ResourceKind::Vaccines => &["name", "manufacturer", "dose"],
      ResourceKind::Medications => &["name", "withdrawal_days", "unit"],
      ResourceKind::Breeds => &["name", "species"],
      ResourceKind::Species => &["name"],
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    let name = name.trim().to_lowercase();
    Self::ALL
      .iter()
      .copied()
      .find(|kind| kind.endpoint() == name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_record_id_accepts_numbers_and_strings() {
    let numeric: Record = serde_json::from_value(json!({ "id": 101, "name": "Daisy" })).unwrap();
    let textual: Record = serde_json::from_value(json!({ "id": "a-7" })).unwrap();
    assert_eq!(numeric.id(), "101");
    assert_eq!(textual.id(), "a-7");
    assert_eq!(Record::default().id(), "");
  }

  #[test]
  fn test_field_renders_nested_names() {
    let record: Record = serde_json::from_value(json!({
      "id": 1,
      "breed": { "id": 3, "name": "Angus" },
      "weight": 512.5,
      "notes": null
    }))
    .unwrap();
    assert_eq!(record.field("breed"), "Angus");
    assert_eq!(record.field("weight"), "512.5");
    assert_eq!(record.field("notes"), "");
    assert_eq!(record.fields()[0], ("id".to_string(), "1".to_string()));
  }

  #[test]
  fn test_resource_lookup() {
    assert_eq!(ResourceKind::from_name(" Vaccines "), Some(ResourceKind::Vaccines));
    assert_eq!(ResourceKind::from_name("tractors"), None);
  }
}
