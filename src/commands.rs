/// Page events accepted on stdin by `shellcache watch`, and lookup logic
use crate::monitor::{BannerAction, PageEvent};

/// What a typed command does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
  Page(PageEvent),
  /// Set the unsaved-changes signal
  Unsaved(bool),
  Help,
  Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
  Focus,
  Visible,
  Hidden,
  Activity,
  Dirty,
  Clean,
  Reload,
  Dismiss,
  Help,
  Quit,
}

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
  kind: Kind,
}

impl Command {
  pub fn input(&self) -> Input {
    match self.kind {
      Kind::Focus => Input::Page(PageEvent::Focus),
      Kind::Visible => Input::Page(PageEvent::Visibility { visible: true }),
      Kind::Hidden => Input::Page(PageEvent::Visibility { visible: false }),
      Kind::Activity => Input::Page(PageEvent::Interaction),
      Kind::Dirty => Input::Unsaved(true),
      Kind::Clean => Input::Unsaved(false),
      Kind::Reload => Input::Page(PageEvent::Banner(BannerAction::Reload)),
      Kind::Dismiss => Input::Page(PageEvent::Banner(BannerAction::Dismiss)),
      Kind::Help => Input::Help,
      Kind::Quit => Input::Quit,
    }
  }
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "focus",
    aliases: &["f"],
    description: "Window regained focus",
    kind: Kind::Focus,
  },
  Command {
    name: "visible",
    aliases: &["v", "show"],
    description: "Tab became visible",
    kind: Kind::Visible,
  },
  Command {
    name: "hidden",
    aliases: &["hide"],
    description: "Tab was hidden",
    kind: Kind::Hidden,
  },
  Command {
    name: "activity",
    aliases: &["a", "input", "type"],
    description: "User interacted with the page",
    kind: Kind::Activity,
  },
  Command {
    name: "dirty",
    aliases: &["d", "edit"],
    description: "Form now has unsaved changes",
    kind: Kind::Dirty,
  },
  Command {
    name: "clean",
    aliases: &["c", "saved"],
    description: "Form changes were saved",
    kind: Kind::Clean,
  },
  Command {
    name: "reload",
    aliases: &["r"],
    description: "Choose reload on the update banner",
    kind: Kind::Reload,
  },
  Command {
    name: "dismiss",
    aliases: &["later", "x"],
    description: "Dismiss the update banner",
    kind: Kind::Dismiss,
  },
  Command {
    name: "help",
    aliases: &["?"],
    description: "List commands",
    kind: Kind::Help,
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Close the page",
    kind: Kind::Quit,
  },
];

/// Get matching commands for a given input, best match first
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.trim().to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0));
      continue;
    }

    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Resolve one typed line to a command.
pub fn parse(input: &str) -> Option<Input> {
  if input.trim().is_empty() {
    return None;
  }
  get_suggestions(input).first().map(|cmd| cmd.input())
}
