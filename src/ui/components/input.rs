use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Result of handling a key event in an input component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputResult {
  /// Key was handled, continue input mode
  Consumed,
  /// Enter pressed, here's the submitted value
  Submitted(String),
  /// Escape pressed, input cancelled
  Cancelled,
  /// Key not handled, pass to next handler
  NotHandled,
}

/// Single-line text input. The cursor counts chars, not bytes.
#[derive(Debug, Clone, Default)]
pub struct TextInput {
  chars: Vec<char>,
  cursor: usize,
}

impl TextInput {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn value(&self) -> String {
    self.chars.iter().collect()
  }

  pub fn is_empty(&self) -> bool {
    self.chars.is_empty()
  }

  pub fn clear(&mut self) {
    self.chars.clear();
    self.cursor = 0;
  }

  /// Replace the contents, leaving the cursor at the end
  pub fn set(&mut self, value: &str) {
    self.chars = value.chars().collect();
    self.cursor = self.chars.len();
  }

  pub fn handle_key(&mut self, key: KeyEvent) -> InputResult {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
      KeyCode::Esc => return InputResult::Cancelled,
      KeyCode::Enter => return InputResult::Submitted(self.value()),
      KeyCode::Backspace if self.cursor > 0 => {
        self.cursor -= 1;
        self.chars.remove(self.cursor);
      }
      KeyCode::Delete if self.cursor < self.chars.len() => {
        self.chars.remove(self.cursor);
      }
      KeyCode::Left => self.cursor = self.cursor.saturating_sub(1),
      KeyCode::Right => self.cursor = (self.cursor + 1).min(self.chars.len()),
      KeyCode::Home => self.cursor = 0,
      KeyCode::End => self.cursor = self.chars.len(),
      KeyCode::Char('a') if ctrl => self.cursor = 0,
      KeyCode::Char('e') if ctrl => self.cursor = self.chars.len(),
      KeyCode::Char('u') if ctrl => {
        self.chars.drain(..self.cursor);
        self.cursor = 0;
      }
      KeyCode::Char('w') if ctrl => {
        let end = self.cursor;
        let mut start = end;
        while start > 0 && self.chars[start - 1] == ' ' {
          start -= 1;
        }
        while start > 0 && self.chars[start - 1] != ' ' {
          start -= 1;
        }
        self.chars.drain(start..end);
        self.cursor = start;
      }
      KeyCode::Char(c) if !ctrl => {
        self.chars.insert(self.cursor, c);
        self.cursor += 1;
      }
      KeyCode::Backspace | KeyCode::Delete => {}
      _ => return InputResult::NotHandled,
    }
    InputResult::Consumed
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  fn ctrl_key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::CONTROL)
  }

  fn typed(text: &str) -> TextInput {
    let mut input = TextInput::new();
    for c in text.chars() {
      input.handle_key(key(KeyCode::Char(c)));
    }
    input
  }

  #[test]
  fn test_submit_and_cancel() {
    let mut input = typed("angus");
    assert_eq!(
      input.handle_key(key(KeyCode::Enter)),
      InputResult::Submitted("angus".to_string())
    );
    assert_eq!(input.handle_key(key(KeyCode::Esc)), InputResult::Cancelled);
  }

  #[test]
  fn test_multibyte_editing() {
    let mut input = typed("bœuf");
    input.handle_key(key(KeyCode::Left));
    input.handle_key(key(KeyCode::Left));
    input.handle_key(key(KeyCode::Backspace));
    assert_eq!(input.value(), "buf");
    input.handle_key(key(KeyCode::Char('é')));
    assert_eq!(input.value(), "béuf");
  }

  #[test]
  fn test_ctrl_w_deletes_previous_word() {
    let mut input = typed("black angus  ");
    input.handle_key(ctrl_key(KeyCode::Char('w')));
    assert_eq!(input.value(), "black ");
  }

  #[test]
  fn test_ctrl_u_clears_before_cursor() {
    let mut input = typed("hello world");
    for _ in 0..5 {
      input.handle_key(key(KeyCode::Left));
    }
    input.handle_key(ctrl_key(KeyCode::Char('u')));
    assert_eq!(input.value(), "world");
  }

  #[test]
  fn test_unknown_keys_pass_through() {
    let mut input = TextInput::new();
    assert_eq!(input.handle_key(key(KeyCode::F(2))), InputResult::NotHandled);
    assert_eq!(input.handle_key(key(KeyCode::Backspace)), InputResult::Consumed);
  }
}
