use crate::api::service::Identified;
use crate::api::types::{Record, ResourceKind};
use crate::app::Services;
use crate::error::SyncResult;
use crate::query::Query;
use crate::sync::{
  DeleteOutcome, ParamSource, RealtimeTrigger, Registration, ResourceController, ResourceSnapshot,
  TriggerReason,
};
use crate::ui::components::{parse_object, KeyResult, PromptInput, SearchEvent, SearchInput};
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{status_color, truncate};
use crate::ui::view::{ShortcutInfo, View, ViewAction};
use crate::ui::views::RecordDetailView;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table, TableState};
use std::time::Duration;
use tokio::sync::watch;

/// What the open prompt's text is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptPurpose {
  Create,
  Sort,
  Limit,
  Fields,
}

/// Paged list of one resource
pub struct ResourceListView {
  kind: ResourceKind,
  controller: ResourceController<Record>,
  snapshots: watch::Receiver<ResourceSnapshot<Record>>,
  snapshot: ResourceSnapshot<Record>,
  trigger: RealtimeTrigger<Record>,
  _registration: Registration,
  refresh_bypass: Duration,
  table_state: TableState,
  search: SearchInput,
  prompt: PromptInput,
  prompt_purpose: PromptPurpose,
  fetch: Query<SyncResult<Vec<Record>>>,
  create: Query<Option<Record>>,
  delete: Query<(String, SyncResult<DeleteOutcome>)>,
  /// Id awaiting y/n confirmation
  confirm_delete: Option<String>,
  message: Option<String>,
}

impl ResourceListView {
  pub fn new(kind: ResourceKind, services: &Services) -> Self {
    Self::with_location(kind, services, ParamSource::new())
  }

  /// Open the list at `location` (page, search, sort) instead of the first page.
  pub fn with_location(kind: ResourceKind, services: &Services, location: ParamSource) -> Self {
    services.clear_expired_tombstones(kind);
    let controller = services.controller(kind);
    let trigger = RealtimeTrigger::start(
      controller.clone(),
      services.config.realtime.clone(),
      services.config.windows().realtime_bypass,
    );
    let registration = services.registry.register(trigger.handler());
    let snapshots = controller.subscribe();
    let snapshot = controller.snapshot();

    let mut fetch = Query::new();
    let initial = controller.clone();
    fetch.start(async move { initial.set_location(location).await });

    Self {
      kind,
      controller,
      snapshots,
      snapshot,
      trigger,
      _registration: registration,
      refresh_bypass: services.config.windows().realtime_bypass,
      table_state: TableState::default(),
      search: SearchInput::new(),
      prompt: PromptInput::new(),
      prompt_purpose: PromptPurpose::Create,
      fetch,
      create: Query::new(),
      delete: Query::new(),
      confirm_delete: None,
      message: None,
    }
  }

  fn selected(&self) -> Option<&Record> {
    self
      .table_state
      .selected()
      .and_then(|idx| self.snapshot.items.get(idx))
  }

  fn go_to_page(&mut self, page: u32) {
    let controller = self.controller.clone();
    self
      .fetch
      .start(async move { controller.set_page(page).await });
  }

  fn refresh(&mut self) {
    self.controller.open_bypass_window(self.refresh_bypass);
    let controller = self.controller.clone();
    self.fetch.start(async move { controller.refetch(None).await });
  }

  fn submit_create(&mut self, text: &str) {
    let payload = match parse_object(text) {
      Ok(payload) => payload,
      Err(e) => {
        self.message = Some(e);
        return;
      }
    };
    self.message = Some(format!("Creating {}...", self.kind.endpoint()));
    let controller = self.controller.clone();
    self
      .create
      .start(async move { controller.create_item(&payload).await });
  }

  fn open_prompt(&mut self, purpose: PromptPurpose) {
    let title = match purpose {
      PromptPurpose::Create => format!("New {} (JSON object)", self.kind.endpoint()),
      PromptPurpose::Sort => "Sort by (e.g. name or -created_at, empty to reset)".to_string(),
      PromptPurpose::Limit => "Rows per page".to_string(),
      PromptPurpose::Fields => "Fields (comma separated, empty for all)".to_string(),
    };
    self.prompt_purpose = purpose;
    self.prompt.activate(title, "");
  }

  fn submit_prompt(&mut self, text: String) {
    let controller = self.controller.clone();
    match self.prompt_purpose {
      PromptPurpose::Create => self.submit_create(&text),
      PromptPurpose::Sort => self.fetch.start(async move {
        let sort = Some(text.as_str()).filter(|s| !s.is_empty());
        controller.set_sort(sort).await
      }),
      PromptPurpose::Limit => match text.parse::<u32>() {
        Ok(limit) if limit >= 1 => self
          .fetch
          .start(async move { controller.set_limit(limit).await }),
        _ => self.message = Some(format!("Not a page size: {}", text)),
      },
      PromptPurpose::Fields => self.fetch.start(async move {
        let fields = Some(text.as_str()).filter(|f| !f.is_empty());
        controller.set_fields(fields).await
      }),
    }
  }

  fn handle_confirmation(&mut self, id: String, key: KeyEvent) {
    if key.code != KeyCode::Char('y') {
      self.message = Some("Delete cancelled".to_string());
      return;
    }
    self.message = Some(format!("Deleting {}...", id));
    let controller = self.controller.clone();
    self.delete.start(async move {
      let outcome = controller.delete_item(&id).await;
      (id, outcome)
    });
  }

  fn title(&self) -> String {
    let mut title = format!(" {}", self.kind.title());
    if let Some(search) = self.controller.location().search() {
      title.push_str(&format!(" /{}", search));
    }
    match &self.snapshot.meta {
      Some(meta) => title.push_str(&format!(
        " ({}) page {}/{}",
        meta.total,
        meta.page,
        meta.total_pages.max(1)
      )),
      None => title.push_str(&format!(" ({})", self.snapshot.items.len())),
    }
    if self.trigger.is_polling() {
      title.push_str(" [live]");
    }
    if self.snapshot.loading {
      title.push_str(" loading...");
    } else if self.snapshot.refreshing {
      title.push_str(" ↻");
    }
    title.push(' ');
    title
  }

  fn render_table(&mut self, frame: &mut Frame, area: Rect) {
    ensure_valid_selection(&mut self.table_state, self.snapshot.items.len());

    let block = Block::default()
      .title(self.title())
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if self.snapshot.items.is_empty() {
      let content = match &self.snapshot.error {
        Some(error) => format!("Failed to load {}: {}\nPress 'r' to retry.", self.kind.endpoint(), error),
        None if self.snapshot.loading => "Loading...".to_string(),
        None => format!("No {} found.", self.kind.endpoint()),
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let columns = self.kind.columns();
    let header = Row::new(
      std::iter::once("id")
        .chain(columns.iter().copied())
        .map(|c| Span::styled(c, Style::default().fg(Color::DarkGray).bold())),
    );

    let rows = self.snapshot.items.iter().map(|record| {
      let mut cells = vec![Span::styled(record.id(), Style::default().fg(Color::Cyan))];
      cells.extend(columns.iter().map(|column| {
        let value = record.field(column);
        let style = if *column == "status" {
          Style::default().fg(status_color(&value))
        } else {
          Style::default()
        };
        Span::styled(truncate(&value, 28), style)
      }));
      Row::new(cells)
    });

    let mut widths = vec![Constraint::Length(8)];
    widths.extend(columns.iter().map(|_| Constraint::Fill(1)));

    let table = Table::new(rows, widths)
      .header(header)
      .block(block)
      .row_highlight_style(
        Style::default()
          .bg(Color::DarkGray)
          .add_modifier(Modifier::BOLD),
      )
      .highlight_symbol("> ");

    frame.render_stateful_widget(table, area, &mut self.table_state);
  }
}

impl View for ResourceListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    if let Some(id) = self.confirm_delete.take() {
      self.handle_confirmation(id, key);
      return ViewAction::None;
    }

    match self.prompt.handle_key(key) {
      KeyResult::Event(text) => {
        self.submit_prompt(text);
        return ViewAction::None;
      }
      KeyResult::Handled => return ViewAction::None,
      KeyResult::NotHandled => {}
    }

    let current = self.controller.location().search().unwrap_or_default().to_string();
    match self.search.handle_key(key, &current) {
      KeyResult::Event(SearchEvent::Submitted(term)) => {
        let controller = self.controller.clone();
        self
          .fetch
          .start(async move { controller.set_search(&term).await });
        return ViewAction::None;
      }
      KeyResult::Event(SearchEvent::Cleared) => {
        if !current.is_empty() {
          let controller = self.controller.clone();
          self.fetch.start(async move { controller.set_search("").await });
        }
        return ViewAction::None;
      }
      KeyResult::Handled => return ViewAction::None,
      KeyResult::NotHandled => {}
    }

    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.table_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.table_state.select_previous(),
      KeyCode::Char('n') => match self.snapshot.meta {
        Some(meta) if meta.has_next() => self.go_to_page(meta.page + 1),
        _ => self.message = Some("Already on the last page".to_string()),
      },
      KeyCode::Char('p') => match self.snapshot.meta {
        Some(meta) if meta.has_previous() => self.go_to_page(meta.page - 1),
        _ => self.message = Some("Already on the first page".to_string()),
      },
      KeyCode::Char('r') => self.refresh(),
      KeyCode::Char('c') => self.open_prompt(PromptPurpose::Create),
      KeyCode::Char('s') => self.open_prompt(PromptPurpose::Sort),
      KeyCode::Char('l') => self.open_prompt(PromptPurpose::Limit),
      KeyCode::Char('f') => self.open_prompt(PromptPurpose::Fields),
      KeyCode::Char('d') => {
        if let Some(id) = self.selected().map(Identified::id) {
          self.message = Some(format!("Delete {} {}? (y/n)", self.kind.endpoint(), id));
          self.confirm_delete = Some(id);
        }
      }
      KeyCode::Enter => {
        if let Some(record) = self.selected() {
          return ViewAction::Push(Box::new(RecordDetailView::new(
            self.kind,
            self.controller.clone(),
            self.refresh_bypass,
            record.clone(),
          )));
        }
      }
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    self.render_table(frame, area);
    self.search.render_overlay(frame, area);
    self.prompt.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    let query = self.controller.location().to_query_string();
    if query.is_empty() {
      self.kind.title().to_string()
    } else {
      format!("{}?{}", self.kind.title(), query)
    }
  }

  fn resource(&self) -> Option<ResourceKind> {
    Some(self.kind)
  }

  fn tick(&mut self) {
    if self.snapshots.has_changed().unwrap_or(false) {
      self.snapshot = self.snapshots.borrow_and_update().clone();
    }

    if self.fetch.poll() {
      match self.fetch.take() {
        Some(Err(e)) if e.is_rate_limited() => {
          self.message = Some(format!("{}; list left unchanged", e));
        }
        Some(Err(e)) => self.message = Some(e.to_string()),
        _ => {}
      }
    }

    if self.create.poll() {
      self.message = match self.create.take() {
        Some(Some(record)) => Some(format!("Created {}", record.id())),
        Some(None) => self
          .controller
          .snapshot()
          .mutation_error
          .map(|e| format!("Create failed: {}", e)),
        None => None,
      };
    }

    if self.delete.poll() {
      self.message = match self.delete.take() {
        Some((id, Ok(DeleteOutcome::Deleted))) => Some(format!("Deleted {}", id)),
        Some((id, Ok(DeleteOutcome::AlreadyDeleted))) => {
          Some(format!("{} was already deleted", id))
        }
        Some((id, Err(e))) => Some(format!("Could not delete {}: {}", id, e)),
        None => None,
      };
    }
  }

  fn on_focus(&mut self) {
    self.trigger.notify(TriggerReason::Focus);
  }

  fn message(&self) -> Option<&str> {
    self
      .message
      .as_deref()
      .or(self.snapshot.mutation_error.as_deref())
  }

  fn is_capturing_input(&self) -> bool {
    self.search.is_active() || self.prompt.is_active() || self.confirm_delete.is_some()
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("/", "search").with_priority(20),
      ShortcutInfo::new("n/p", "page").with_priority(30),
      ShortcutInfo::new("r", "refresh").with_priority(40),
      ShortcutInfo::new("s/l/f", "sort/size/fields").with_priority(35),
      ShortcutInfo::new("c", "new").with_priority(45),
      ShortcutInfo::new("d", "delete").with_priority(50),
      ShortcutInfo::new("q", "back").with_priority(60),
    ]
  }
}
