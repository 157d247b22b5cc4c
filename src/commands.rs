//! Command palette entries and autocomplete logic.

use crate::api::types::ResourceKind;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "animals",
    aliases: &["a", "animal", "herd"],
    description: "Browse animals",
  },
  Command {
    name: "treatments",
    aliases: &["t", "treatment"],
    description: "Browse treatments",
  },
  Command {
    name: "vaccines",
    aliases: &["v", "vaccine"],
    description: "Browse vaccines",
  },
  Command {
    name: "medications",
    aliases: &["m", "meds", "medication"],
    description: "Browse medications",
  },
  Command {
    name: "breeds",
    aliases: &["b", "breed"],
    description: "Breed catalog",
  },
  Command {
    name: "species",
    aliases: &["s"],
    description: "Species catalog",
  },
  Command {
    name: "reconnect",
    aliases: &["refresh-all", "sync"],
    description: "Refetch every open view",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit herdbook",
  },
];

/// What a submitted command asks the app to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  Open(ResourceKind),
  Reconnect,
  Quit,
}

/// Resolve a submitted command name (or alias) to an action
pub fn parse(input: &str) -> Option<Action> {
  let input = input.trim().to_lowercase();
  let cmd = COMMANDS
    .iter()
    .find(|cmd| cmd.name == input || cmd.aliases.contains(&input.as_str()))?;

  match cmd.name {
    "reconnect" => Some(Action::Reconnect),
    "quit" => Some(Action::Quit),
    name => ResourceKind::from_name(name).map(Action::Open),
  }
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = COMMANDS
    .iter()
    .filter_map(|cmd| {
      let priority = if cmd.name == input_lower {
        0
      } else if cmd.aliases.contains(&input_lower.as_str()) {
        1
      } else if cmd.name.starts_with(&input_lower) {
        2
      } else if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
        3
      } else if cmd.name.contains(&input_lower) {
        4
      } else if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
        5
      } else {
        return None;
      };
      Some((cmd, priority))
    })
    .collect();

  // Stable sort keeps declaration order within a priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_alias_beats_prefix() {
    let suggestions = get_suggestions("m");
    assert_eq!(suggestions[0].name, "medications");
  }

  #[test]
  fn test_prefix_and_fuzzy_match() {
    assert_eq!(get_suggestions("vac")[0].name, "vaccines");
    assert_eq!(get_suggestions("atm")[0].name, "treatments");
  }

  #[test]
  fn test_every_resource_has_a_command() {
    for kind in ResourceKind::ALL {
      assert_eq!(parse(kind.endpoint()), Some(Action::Open(*kind)));
    }
  }

  #[test]
  fn test_parse_aliases() {
    assert_eq!(parse(" Herd "), Some(Action::Open(ResourceKind::Animals)));
    assert_eq!(parse("refresh-all"), Some(Action::Reconnect));
    assert_eq!(parse("exit"), Some(Action::Quit));
    assert_eq!(parse("tractors"), None);
  }
}
