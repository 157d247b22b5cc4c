use crate::telemetry::StatsSnapshot;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Draw the footer bar with view breadcrumb, an optional status message and
/// cache counters
pub fn draw_footer(
  frame: &mut Frame,
  area: Rect,
  breadcrumb: &[String],
  message: Option<&str>,
  stats: StatsSnapshot,
) {
  let mut spans = vec![Span::raw(" ")];

  for (i, part) in breadcrumb.iter().enumerate() {
    if i > 0 {
      spans.push(Span::styled(" > ", Style::default().fg(Color::DarkGray)));
    }
    let style = if i == breadcrumb.len() - 1 {
      Style::default().fg(Color::Cyan).bold()
    } else {
      Style::default().fg(Color::White)
    };
    spans.push(Span::styled(part.clone(), style));
  }

  if let Some(message) = message {
    spans.push(Span::styled("  │ ", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(message.to_string(), Style::default().fg(Color::Yellow)));
  }

  let counters = format!(
    "cache {}/{} hit/miss  shared {} ",
    stats.cache_hits, stats.cache_misses, stats.coalesced_joins
  );

  let [left, right] = Layout::horizontal([
    Constraint::Min(0),
    Constraint::Length(counters.chars().count() as u16),
  ])
  .areas(area);

  let style = Style::default().bg(Color::Black);
  frame.render_widget(Paragraph::new(Line::from(spans)).style(style), left);
  frame.render_widget(
    Paragraph::new(counters)
      .style(style.fg(Color::DarkGray))
      .alignment(Alignment::Right),
    right,
  );
}
