use crate::api::service::Identified;
use crate::api::types::{Record, ResourceKind};
use crate::error::SyncResult;
use crate::query::Query;
use crate::sync::ResourceController;
use crate::ui::components::{parse_assignment, KeyResult, PromptInput};
use crate::ui::view::{ShortcutInfo, View, ViewAction};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use std::time::Duration;

/// All fields of one record, refreshed through the controller's cache
pub struct RecordDetailView {
  kind: ResourceKind,
  id: String,
  controller: ResourceController<Record>,
  refresh_bypass: Duration,
  /// Last good copy, seeded from the list row
  record: Record,
  query: Query<SyncResult<Record>>,
  /// `field=value` edit of one field
  prompt: PromptInput,
  update: Query<Option<Record>>,
  error: Option<String>,
  message: Option<String>,
}

impl RecordDetailView {
  pub fn new(
    kind: ResourceKind,
    controller: ResourceController<Record>,
    refresh_bypass: Duration,
    record: Record,
  ) -> Self {
    let mut view = Self {
      kind,
      id: record.id(),
      controller,
      refresh_bypass,
      record,
      query: Query::new(),
      prompt: PromptInput::new(),
      update: Query::new(),
      error: None,
      message: None,
    };
    view.fetch();
    view
  }

  fn fetch(&mut self) {
    let controller = self.controller.clone();
    let id = self.id.clone();
    self
      .query
      .start(async move { controller.fetch_one(&id).await });
  }

  fn submit_edit(&mut self, text: &str) {
    let patch = match parse_assignment(text) {
      Ok(patch) => patch,
      Err(e) => {
        self.message = Some(e);
        return;
      }
    };
    self.message = Some(format!("Saving {}...", self.id));
    let controller = self.controller.clone();
    let id = self.id.clone();
    self
      .update
      .start(async move { controller.update_item(&id, &patch).await });
  }

  fn render_detail(&self, frame: &mut Frame, area: Rect) {
    let title = if self.query.is_running() || self.update.is_running() {
      format!(" {} {} (loading...) ", self.kind.title(), self.id)
    } else {
      format!(" {} {} ", self.kind.title(), self.id)
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let mut lines = Vec::new();
    if let Some(error) = &self.error {
      lines.push(Line::styled(
        format!("Error: {}  (press 'r' to retry)", error),
        Style::default().fg(Color::Red),
      ));
      lines.push(Line::raw(""));
    }

    let width = self
      .record
      .fields()
      .iter()
      .map(|(name, _)| name.chars().count())
      .max()
      .unwrap_or(0);
    for (name, value) in self.record.fields() {
      lines.push(Line::from(vec![
        Span::styled(
          format!("{:<width$}  ", name, width = width),
          Style::default().fg(Color::DarkGray),
        ),
        Span::raw(value),
      ]));
    }

    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
  }
}

impl View for RecordDetailView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match self.prompt.handle_key(key) {
      KeyResult::Event(text) => {
        self.submit_edit(&text);
        return ViewAction::None;
      }
      KeyResult::Handled => return ViewAction::None,
      KeyResult::NotHandled => {}
    }

    match key.code {
      KeyCode::Char('e') => {
        self.prompt.activate(format!("Edit {} (field=value)", self.id), "");
        ViewAction::None
      }
      KeyCode::Char('r') => {
        self.controller.open_bypass_window(self.refresh_bypass);
        self.fetch();
        ViewAction::None
      }
      KeyCode::Char('q') | KeyCode::Esc => ViewAction::Pop,
      _ => ViewAction::None,
    }
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    self.render_detail(frame, area);
    self.prompt.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    self.id.clone()
  }

  fn resource(&self) -> Option<ResourceKind> {
    Some(self.kind)
  }

  fn tick(&mut self) {
    if self.query.poll() {
      match self.query.take() {
        Some(Ok(record)) => {
          self.record = record;
          self.error = None;
        }
        Some(Err(e)) => self.error = Some(e.to_string()),
        None => {}
      }
    }

    if self.update.poll() {
      self.message = match self.update.take() {
        Some(Some(record)) => {
          self.record = record;
          Some(format!("Saved {}", self.id))
        }
        Some(None) => self
          .controller
          .snapshot()
          .mutation_error
          .map(|e| format!("Save failed: {}", e)),
        None => None,
      };
    }
  }

  fn message(&self) -> Option<&str> {
    self.message.as_deref()
  }

  fn is_capturing_input(&self) -> bool {
    self.prompt.is_active()
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new("e", "edit").with_priority(5),
      ShortcutInfo::new("r", "refresh").with_priority(10),
      ShortcutInfo::new("q", "back").with_priority(20),
    ]
  }
}
