use crate::api::types::{Record, ResourceKind};
use crate::api::RestClient;
use crate::cache::store::CacheStore;
use crate::commands::{self, Action};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::sync::{
  ControllerOptions, ParamSource, QueryParams, RefetchRegistry, ResourceController, SyncContext,
  TombstoneStore, TriggerReason,
};
use crate::telemetry::SyncStats;
use crate::ui;
use crate::ui::components::{CommandInput, KeyResult};
use crate::ui::view::{View, ViewAction};
use crate::ui::views::ResourceListView;
use color_eyre::Result;
use crossterm::event::{DisableFocusChange, EnableFocusChange, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Long-lived collaborators shared by every view
pub struct Services {
  pub config: Config,
  client: RestClient,
  ctx: SyncContext<Record>,
  pub stats: Arc<SyncStats>,
  pub registry: Arc<RefetchRegistry>,
}

impl Services {
  pub fn new(
    config: Config,
    cache: Arc<CacheStore>,
    tombstones: Arc<TombstoneStore>,
  ) -> Result<Self> {
    let client = RestClient::new(&config)?;
    let stats = Arc::new(SyncStats::new());
    let ctx = SyncContext::new(cache, tombstones, stats.clone());

    Ok(Self {
      config,
      client,
      ctx,
      stats,
      registry: Arc::new(RefetchRegistry::new()),
    })
  }

  /// Fresh controller for `kind`. Controllers of one kind share the cache,
  /// coalescers and tombstones through the context.
  pub fn controller(&self, kind: ResourceKind) -> ResourceController<Record> {
    let options = ControllerOptions::new(self.config.base_identifier(), kind.endpoint())
      .with_defaults(QueryParams::paged(1, self.config.page_size))
      .with_windows(self.config.windows());
    ResourceController::new(
      Arc::new(self.client.resource::<Record>(kind.endpoint())),
      self.ctx.clone(),
      options,
    )
  }

  pub fn clear_expired_tombstones(&self, kind: ResourceKind) {
    self.ctx.tombstones.clear_expired(kind.endpoint());
  }
}

/// Main application state
pub struct App {
  services: Services,

  /// Navigation stack - root is always at index 0
  view_stack: Vec<Box<dyn View>>,

  /// `:` command palette
  command_input: CommandInput,

  /// Status message from the app itself (commands, reconnects)
  message: Option<String>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  /// Open the startup resource at `location`.
  pub fn new(services: Services, location: ParamSource) -> Self {
    let resource = services
      .config
      .default_resource
      .unwrap_or(ResourceKind::Animals);
    let root = ResourceListView::with_location(resource, &services, location);

    Self {
      services,
      view_stack: vec![Box::new(root)],
      command_input: CommandInput::new(),
      message: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    stdout().execute(EnableFocusChange)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250));
    info!("herdbook started");

    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }

    stdout().execute(DisableFocusChange)?;
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::FocusGained => self.refetch_all(TriggerReason::Focus),
      Event::Tick => {
        if let Some(view) = self.view_stack.last_mut() {
          view.tick();
        }
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    let capturing = self
      .view_stack
      .last()
      .is_some_and(|view| view.is_capturing_input());
    if !capturing {
      match self.command_input.handle_key(key) {
        KeyResult::Event(cmd) => {
          self.execute_command(&cmd);
          return;
        }
        KeyResult::Handled => return,
        KeyResult::NotHandled => {}
      }
    }

    let action = match self.view_stack.last_mut() {
      Some(view) => view.handle_key(key),
      None => return,
    };

    match action {
      ViewAction::None => {}
      ViewAction::Push(view) => self.view_stack.push(view),
      ViewAction::Pop => self.pop_view(),
    }
  }

  fn pop_view(&mut self) {
    if self.view_stack.len() <= 1 {
      self.should_quit = true;
      return;
    }
    self.view_stack.pop();
    if let Some(view) = self.view_stack.last_mut() {
      view.on_focus();
    }
  }

  fn execute_command(&mut self, cmd: &str) {
    match commands::parse(cmd) {
      Some(Action::Open(kind)) => {
        info!(resource = kind.endpoint(), "Switching resource");
        self.view_stack.clear();
        self
          .view_stack
          .push(Box::new(ResourceListView::new(kind, &self.services)));
        self.message = None;
      }
      Some(Action::Reconnect) => {
        self.refetch_all(TriggerReason::Reconnect);
        self.message = Some("Refreshing all views".to_string());
      }
      Some(Action::Quit) => self.should_quit = true,
      None => {
        warn!(command = cmd, "Unknown command");
        self.message = Some(format!("Unknown command: {}", cmd));
      }
    }
  }

  fn refetch_all(&self, reason: TriggerReason) {
    let registry = Arc::clone(&self.services.registry);
    tokio::spawn(async move {
      registry.refetch_all(reason).await;
    });
  }

  pub fn services(&self) -> &Services {
    &self.services
  }

  pub fn current_view(&self) -> Option<&dyn View> {
    self.view_stack.last().map(|v| v.as_ref())
  }

  pub fn current_view_mut(&mut self) -> Option<&mut Box<dyn View>> {
    self.view_stack.last_mut()
  }

  pub fn breadcrumb(&self) -> Vec<String> {
    self
      .view_stack
      .iter()
      .map(|view| view.breadcrumb_label())
      .collect()
  }

  pub fn command_input(&self) -> &CommandInput {
    &self.command_input
  }

  /// The top view's message wins over the app's own
  pub fn message(&self) -> Option<&str> {
    self
      .current_view()
      .and_then(|view| view.message())
      .or(self.message.as_deref())
  }
}
