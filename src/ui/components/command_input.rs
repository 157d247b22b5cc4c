use super::input::{InputResult, TextInput};
use super::{overlay_area, KeyResult};
use crate::commands::{self, Command};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph};

const MAX_SUGGESTIONS: usize = 8;

/// `:` command palette with autocomplete
#[derive(Debug, Clone, Default)]
pub struct CommandInput {
  input: TextInput,
  active: bool,
  selected_suggestion: usize,
}

impl CommandInput {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn activate(&mut self) {
    self.active = true;
    self.input.clear();
    self.selected_suggestion = 0;
  }

  pub fn suggestions(&self) -> Vec<&'static Command> {
    commands::get_suggestions(&self.input.value())
  }

  /// Handle a key event. Call this regardless of active state; it handles
  /// activation too. Submitting yields the resolved command name.
  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<String> {
    if !self.active {
      if key.code == KeyCode::Char(':') {
        self.activate();
        return KeyResult::Handled;
      }
      return KeyResult::NotHandled;
    }

    let count = self.suggestions().len();
    match key.code {
      KeyCode::Tab | KeyCode::Down if count > 0 => {
        self.selected_suggestion = (self.selected_suggestion + 1) % count;
        return KeyResult::Handled;
      }
      KeyCode::BackTab | KeyCode::Up if count > 0 => {
        self.selected_suggestion = (self.selected_suggestion + count - 1) % count;
        return KeyResult::Handled;
      }
      _ => {}
    }

    match self.input.handle_key(key) {
      InputResult::Submitted(_) => {
        let cmd = self.resolve_command();
        self.active = false;
        self.input.clear();
        self.selected_suggestion = 0;
        KeyResult::Event(cmd)
      }
      InputResult::Cancelled => {
        self.active = false;
        self.input.clear();
        self.selected_suggestion = 0;
        KeyResult::Handled
      }
      InputResult::Consumed => {
        self.selected_suggestion = 0;
        KeyResult::Handled
      }
      InputResult::NotHandled => KeyResult::Handled,
    }
  }

  /// Selected suggestion, or the raw input when nothing matches
  fn resolve_command(&self) -> String {
    match self.suggestions().get(self.selected_suggestion) {
      Some(cmd) => cmd.name.to_string(),
      None => self.input.value().trim().to_lowercase(),
    }
  }

  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    if !self.active {
      return;
    }

    let suggestions = self.suggestions();
    let shown = suggestions.len().min(MAX_SUGGESTIONS) as u16;
    let overlay = overlay_area(area, 3 + shown);
    frame.render_widget(Clear, overlay);

    let block = Block::default()
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Yellow))
      .title(" Command ");
    let inner = block.inner(overlay);
    frame.render_widget(block, overlay);

    if inner.height == 0 {
      return;
    }

    let [input_area, list_area] =
      Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).areas(inner);

    let input_line = Line::from(vec![
      Span::styled(":", Style::default().fg(Color::Yellow)),
      Span::raw(self.input.value()),
      Span::styled("_", Style::default().fg(Color::Yellow)),
    ]);
    frame.render_widget(Paragraph::new(input_line), input_area);

    if suggestions.is_empty() || list_area.height == 0 {
      return;
    }

    let items: Vec<ListItem> = suggestions
      .iter()
      .take(MAX_SUGGESTIONS)
      .map(|cmd| {
        ListItem::new(Line::from(vec![
          Span::styled(format!("{:<12}", cmd.name), Style::default().fg(Color::Cyan)),
          Span::styled(cmd.description, Style::default().fg(Color::DarkGray)),
        ]))
      })
      .collect();

    let list =
      List::new(items).highlight_style(Style::default().bg(Color::DarkGray).fg(Color::White));
    let mut state = ListState::default().with_selected(Some(self.selected_suggestion));
    frame.render_stateful_widget(list, list_area, &mut state);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  fn submit(palette: &mut CommandInput, text: &str) -> KeyResult<String> {
    palette.handle_key(key(KeyCode::Char(':')));
    for c in text.chars() {
      palette.handle_key(key(KeyCode::Char(c)));
    }
    palette.handle_key(key(KeyCode::Enter))
  }

  #[test]
  fn test_submits_best_suggestion() {
    let mut palette = CommandInput::new();
    assert_eq!(submit(&mut palette, "vac"), KeyResult::Event("vaccines".to_string()));
    assert!(!palette.is_active());
  }

  #[test]
  fn test_tab_cycles_suggestions() {
    let mut palette = CommandInput::new();
    palette.handle_key(key(KeyCode::Char(':')));
    palette.handle_key(key(KeyCode::Tab));
    assert_eq!(
      palette.handle_key(key(KeyCode::Enter)),
      KeyResult::Event(commands::COMMANDS[1].name.to_string())
    );
  }

  #[test]
  fn test_unknown_input_is_passed_through() {
    let mut palette = CommandInput::new();
    assert_eq!(submit(&mut palette, "Tractors"), KeyResult::Event("tractors".to_string()));
  }
}
