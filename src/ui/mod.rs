pub mod components;
pub mod renderfns;
pub mod view;
pub mod views;

use crate::app::App;
use ratatui::prelude::*;
use ratatui::widgets::TableState;
use renderfns::{draw_footer, draw_header};

/// Main draw function
pub fn draw(frame: &mut Frame, app: &mut App) {
  let [header_area, content_area, footer_area] = Layout::vertical([
    Constraint::Length(1),
    Constraint::Min(1),
    Constraint::Length(1),
  ])
  .areas(frame.area());

  let resource = app
    .current_view()
    .and_then(|view| view.resource())
    .map(|kind| kind.title())
    .unwrap_or_default();
  let shortcuts = app
    .current_view()
    .map(|view| view.shortcuts())
    .unwrap_or_default();
  draw_header(
    frame,
    header_area,
    &app.services().config.api.url,
    resource,
    &shortcuts,
  );

  if let Some(view) = app.current_view_mut() {
    view.render(frame, content_area);
  }
  app.command_input().render_overlay(frame, content_area);

  draw_footer(
    frame,
    footer_area,
    &app.breadcrumb(),
    app.message(),
    app.services().stats.snapshot(),
  );
}

/// Keep a table selection inside `len` rows, selecting the first row when
/// rows appear and clearing it when they are gone.
pub fn ensure_valid_selection(state: &mut TableState, len: usize) {
  match state.selected() {
    _ if len == 0 => state.select(None),
    Some(idx) if idx >= len => state.select(Some(len - 1)),
    None => state.select(Some(0)),
    Some(_) => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_selection_clamps_to_rows() {
    let mut state = TableState::default();
    ensure_valid_selection(&mut state, 3);
    assert_eq!(state.selected(), Some(0));

    state.select(Some(7));
    ensure_valid_selection(&mut state, 3);
    assert_eq!(state.selected(), Some(2));

    ensure_valid_selection(&mut state, 0);
    assert_eq!(state.selected(), None);
  }
}
