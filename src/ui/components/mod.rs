mod command_input;
mod input;
mod prompt_input;
mod search_input;

use ratatui::layout::Rect;

pub use command_input::CommandInput;
pub use prompt_input::{parse_assignment, parse_object, PromptInput};
pub use search_input::{SearchEvent, SearchInput};

/// Outcome of offering a key event to a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResult<T> {
  /// Key was consumed, no event for parent to handle
  Handled,
  /// Key was consumed, here's an event for parent to process
  Event(T),
  /// Key was not consumed, parent should try next handler
  NotHandled,
}

/// Top-left overlay box of the given height inside `area`
fn overlay_area(area: Rect, height: u16) -> Rect {
  let width = (area.width * 60 / 100).clamp(30, 60).min(area.width);
  Rect::new(
    area.x + 1,
    area.y + 1,
    width.saturating_sub(1),
    height.min(area.height.saturating_sub(1)),
  )
}
