use super::input::{InputResult, TextInput};
use super::{overlay_area, KeyResult};
use crossterm::event::KeyEvent;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use serde_json::{Map, Value};

/// Free-text prompt opened by a view, e.g. for create and edit payloads
#[derive(Debug, Clone, Default)]
pub struct PromptInput {
  input: TextInput,
  title: String,
  active: bool,
}

impl PromptInput {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn activate(&mut self, title: impl Into<String>, initial: &str) {
    self.title = title.into();
    self.input.set(initial);
    self.active = true;
  }

  /// Submitting yields the trimmed text; Esc closes the prompt.
  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<String> {
    if !self.active {
      return KeyResult::NotHandled;
    }

    match self.input.handle_key(key) {
      InputResult::Submitted(text) => {
        self.active = false;
        self.input.clear();
        KeyResult::Event(text.trim().to_string())
      }
      InputResult::Cancelled => {
        self.active = false;
        self.input.clear();
        KeyResult::Handled
      }
      InputResult::Consumed | InputResult::NotHandled => KeyResult::Handled,
    }
  }

  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    if !self.active {
      return;
    }

    let overlay = overlay_area(area, 3);
    frame.render_widget(Clear, overlay);

    let block = Block::default()
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Yellow))
      .title(format!(" {} ", self.title));
    let inner = block.inner(overlay);
    frame.render_widget(block, overlay);

    let line = Line::from(vec![
      Span::raw(self.input.value()),
      Span::styled("_", Style::default().fg(Color::Yellow)),
    ]);
    frame.render_widget(Paragraph::new(line), inner);
  }
}

/// Parse a create payload. Anything but a JSON object is rejected.
pub fn parse_object(text: &str) -> Result<Value, String> {
  match serde_json::from_str::<Value>(text) {
    Ok(value @ Value::Object(_)) => Ok(value),
    Ok(_) => Err("Payload must be a JSON object".to_string()),
    Err(e) => Err(format!("Invalid JSON: {}", e)),
  }
}

/// Parse `field=value` into a one-field patch. The value is read as JSON
/// when it parses, otherwise as a plain string.
pub fn parse_assignment(text: &str) -> Result<Value, String> {
  let (field, value) = text
    .split_once('=')
    .ok_or_else(|| "Expected field=value".to_string())?;
  let field = field.trim();
  if field.is_empty() {
    return Err("Field name is empty".to_string());
  }

  let value = value.trim();
  let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
  let mut patch = Map::new();
  patch.insert(field.to_string(), value);
  Ok(Value::Object(patch))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::{KeyCode, KeyModifiers};
  use serde_json::json;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  #[test]
  fn test_submit_returns_text_and_closes() {
    let mut prompt = PromptInput::new();
    assert_eq!(prompt.handle_key(key(KeyCode::Char('x'))), KeyResult::NotHandled);

    prompt.activate("Edit", "weight");
    for c in "=420 ".chars() {
      prompt.handle_key(key(KeyCode::Char(c)));
    }
    assert_eq!(
      prompt.handle_key(key(KeyCode::Enter)),
      KeyResult::Event("weight=420".to_string())
    );
    assert!(!prompt.is_active());
  }

  #[test]
  fn test_escape_closes_without_event() {
    let mut prompt = PromptInput::new();
    prompt.activate("New", "{}");
    assert_eq!(prompt.handle_key(key(KeyCode::Esc)), KeyResult::Handled);
    assert!(!prompt.is_active());
  }

  #[test]
  fn test_parse_object() {
    assert_eq!(
      parse_object(r#"{"name": "Daisy", "breed": 3}"#),
      Ok(json!({ "name": "Daisy", "breed": 3 }))
    );
    assert!(parse_object("[1, 2]").is_err());
    assert!(parse_object("{name").is_err());
  }

  #[test]
  fn test_parse_assignment() {
    assert_eq!(parse_assignment("weight = 420"), Ok(json!({ "weight": 420 })));
    assert_eq!(parse_assignment("name=Daisy May"), Ok(json!({ "name": "Daisy May" })));
    assert_eq!(parse_assignment("status=\"sold\""), Ok(json!({ "status": "sold" })));
    assert!(parse_assignment("weight").is_err());
    assert!(parse_assignment("=3").is_err());
  }
}
