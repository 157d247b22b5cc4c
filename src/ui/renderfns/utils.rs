use ratatui::prelude::Color;

/// Truncate to at most `max_len` chars, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Display color for a record status value
pub fn status_color(status: &str) -> Color {
  match status.to_lowercase().as_str() {
    "active" | "healthy" | "completed" | "in stock" => Color::Green,
    "scheduled" | "pending" | "in treatment" | "quarantine" => Color::Yellow,
    "sold" | "deceased" | "cancelled" | "expired" => Color::DarkGray,
    _ => Color::White,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_short_string() {
    assert_eq!(truncate("Angus", 10), "Angus");
    assert_eq!(truncate("Angus", 5), "Angus");
  }

  #[test]
  fn test_truncate_long_string() {
    assert_eq!(truncate("Holstein Friesian", 8), "Holst...");
  }

  #[test]
  fn test_truncate_counts_chars() {
    assert_eq!(truncate("Bœuf à la mode", 7), "Bœuf...");
  }

  #[test]
  fn test_status_color() {
    assert_eq!(status_color("Active"), Color::Green);
    assert_eq!(status_color("quarantine"), Color::Yellow);
    assert_eq!(status_color("sold"), Color::DarkGray);
    assert_eq!(status_color("unknown"), Color::White);
  }
}
