use super::input::{InputResult, TextInput};
use super::{overlay_area, KeyResult};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

/// Events emitted by search input that parent needs to handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
  /// Enter pressed; the term is sent to the server
  Submitted(String),
  /// Esc pressed; any active search term is dropped
  Cleared,
}

/// Server-side search prompt opened with `/`
#[derive(Debug, Clone, Default)]
pub struct SearchInput {
  input: TextInput,
  active: bool,
}

impl SearchInput {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  /// Open the prompt pre-filled with the current term
  pub fn activate(&mut self, current: &str) {
    self.active = true;
    self.input.set(current);
  }

  /// Handle a key event. Call this regardless of active state; it handles
  /// activation too.
  pub fn handle_key(&mut self, key: KeyEvent, current: &str) -> KeyResult<SearchEvent> {
    if !self.active {
      if key.code == KeyCode::Char('/') {
        self.activate(current);
        return KeyResult::Handled;
      }
      return KeyResult::NotHandled;
    }

    match self.input.handle_key(key) {
      InputResult::Submitted(term) => {
        self.active = false;
        KeyResult::Event(SearchEvent::Submitted(term.trim().to_string()))
      }
      InputResult::Cancelled => {
        self.active = false;
        self.input.clear();
        KeyResult::Event(SearchEvent::Cleared)
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
      .title(" Search ");
    let inner = block.inner(overlay);
    frame.render_widget(block, overlay);

    let line = Line::from(vec![
      Span::styled("/", Style::default().fg(Color::Yellow)),
      Span::raw(self.input.value()),
      Span::styled("_", Style::default().fg(Color::Yellow)),
    ]);
    frame.render_widget(Paragraph::new(line), inner);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  #[test]
  fn test_slash_opens_prefilled_prompt() {
    let mut search = SearchInput::new();
    assert_eq!(search.handle_key(key(KeyCode::Char('j')), ""), KeyResult::NotHandled);
    assert_eq!(search.handle_key(key(KeyCode::Char('/')), "hol"), KeyResult::Handled);
    assert!(search.is_active());

    search.handle_key(key(KeyCode::Char('s')), "hol");
    assert_eq!(
      search.handle_key(key(KeyCode::Enter), "hol"),
      KeyResult::Event(SearchEvent::Submitted("hols".to_string()))
    );
    assert!(!search.is_active());
  }

  #[test]
  fn test_escape_clears() {
    let mut search = SearchInput::new();
    search.handle_key(key(KeyCode::Char('/')), "angus");
    assert_eq!(
      search.handle_key(key(KeyCode::Esc), "angus"),
      KeyResult::Event(SearchEvent::Cleared)
    );
  }
}
