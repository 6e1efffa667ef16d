use clap::Subcommand;

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Show all todos
  #[command(alias = "ls")]
  List,

  /// Add a todo
  Add {
    /// Todo text (surrounding whitespace is trimmed)
    #[arg(required = true, num_args = 1..)]
    title: Vec<String>,
  },

  /// Flip a todo between done and not done
  Toggle { id: String },

  /// Delete a todo
  #[command(alias = "rm")]
  Delete { id: String },

  /// Remove every todo
  Reset,

  /// Request a path through the caching agent
  Fetch {
    /// Path on the configured origin, e.g. /manifest.json
    path: String,

    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },

  /// Run the registered background sync tasks now
  Sync,

  /// Deliver a push message to the agent
  Push {
    /// Message text (default notification body when omitted)
    message: Option<String>,
  },

  /// Show connectivity, agent state and cache contents
  Status,

  /// Follow connectivity and sync when the origin becomes reachable again
  Watch,
}

impl Command {
  /// Commands that act on todos wait for the agent to be ready first.
  pub fn loads_todos(&self) -> bool {
    matches!(
      self,
      Command::List
        | Command::Add { .. }
        | Command::Toggle { .. }
        | Command::Delete { .. }
        | Command::Reset
    )
  }
}

/// Join title words and trim. `None` when nothing is left.
pub fn normalize_title(words: &[String]) -> Option<String> {
  let title = words.join(" ");
  let title = title.trim();
  if title.is_empty() {
    None
  } else {
    Some(title.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  fn parse(args: &[&str]) -> Command {
    Cli::try_parse_from(std::iter::once("otodo").chain(args.iter().copied()))
      .unwrap()
      .command
  }

  #[test]
  fn test_add_joins_words() {
    let cmd = parse(&["add", "Buy", "milk"]);
    assert_eq!(
      cmd,
      Command::Add {
        title: vec!["Buy".to_string(), "milk".to_string()]
      }
    );
  }

  #[test]
  fn test_aliases() {
    assert_eq!(parse(&["ls"]), Command::List);
    assert_eq!(
      parse(&["rm", "abc"]),
      Command::Delete {
        id: "abc".to_string()
      }
    );
  }

  #[test]
  fn test_fetch_navigate_flag() {
    assert_eq!(
      parse(&["fetch", "/", "--navigate"]),
      Command::Fetch {
        path: "/".to_string(),
        navigate: true
      }
    );
  }

  #[test]
  fn test_normalize_title() {
    let words = vec!["  Buy".to_string(), "milk  ".to_string()];
    assert_eq!(normalize_title(&words), Some("Buy milk".to_string()));
    assert_eq!(normalize_title(&["   ".to_string()]), None);
  }

  #[test]
  fn test_loads_todos() {
    assert!(Command::List.loads_todos());
    assert!(!Command::Status.loads_todos());
    assert!(!Command::Watch.loads_todos());
  }
}
