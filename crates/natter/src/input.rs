//! Terminal input parsing for the natter client.
//!
//! Each line the user types becomes one [`Action`]. Parsing never fails:
//! incomplete commands become [`Action::Usage`] and anything unrecognised
//! becomes [`Action::Unknown`], so the terminal loop always has something
//! to print.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

/// Printed by the `help` command.
pub const HELP: &str = "\
--List of chat commands--
  tell <user> some message:  Sends 'some message' to a specific user
  say some other message:    Sends 'some other message' to all users
  list:                      Lists all users currently logged in
  quit:                      Logs you out
  shutdown <password>:       Shuts down the server if supplied password is correct";

/// What a line of terminal input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Blank line.
    None,

    /// Print the users currently logged on.
    List,

    /// Broadcast to everyone.
    Say(String),

    /// Direct message.
    Tell { recipient: String, text: String },

    /// Print the command list.
    Help,

    /// Log out and exit.
    Quit,

    /// Ask the server to shut down.
    Shutdown(String),

    /// A known command with missing arguments; carries the usage line.
    Usage(&'static str),

    /// Not a command.
    Unknown(String),
}

/// Parses one line of terminal input.
///
/// The first word selects the command. Message text is everything after
/// the separating whitespace, kept as typed.
pub fn parse_line(line: &str) -> Action {
    let line = line.trim_start().trim_end_matches(['\r', '\n']);
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest),
        None => (line, ""),
    };

    match command {
        "" => Action::None,
        "list" => Action::List,
        "help" => Action::Help,
        "quit" => Action::Quit,

        "say" if rest.trim().is_empty() => Action::Usage("say <message>"),
        "say" => Action::Say(rest.to_string()),

        "tell" => {
            let rest = rest.trim_start();
            match rest.split_once(char::is_whitespace) {
                Some((recipient, text)) if !text.trim().is_empty() => Action::Tell {
                    recipient: recipient.to_string(),
                    text: text.to_string(),
                },
                _ => Action::Usage("tell <user> <message>"),
            }
        }

        "shutdown" => match rest.split_whitespace().next() {
            Some(secret) => Action::Shutdown(secret.to_string()),
            None => Action::Usage("shutdown <password>"),
        },

        other => Action::Unknown(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_line("list"), Action::List);
        assert_eq!(parse_line("help"), Action::Help);
        assert_eq!(parse_line("quit"), Action::Quit);
        assert_eq!(parse_line("  list  "), Action::List);
        assert_eq!(parse_line("quit\r\n"), Action::Quit);
    }

    #[test]
    fn test_blank_line() {
        assert_eq!(parse_line(""), Action::None);
        assert_eq!(parse_line("   "), Action::None);
    }

    #[test]
    fn test_say_keeps_text_as_typed() {
        assert_eq!(
            parse_line("say hello   there"),
            Action::Say("hello   there".to_string())
        );
    }

    #[test]
    fn test_say_without_text() {
        assert_eq!(parse_line("say"), Action::Usage("say <message>"));
        assert_eq!(parse_line("say   "), Action::Usage("say <message>"));
    }

    #[test]
    fn test_tell() {
        assert_eq!(
            parse_line("tell bob are you there?"),
            Action::Tell {
                recipient: "bob".to_string(),
                text: "are you there?".to_string(),
            }
        );
    }

    #[test]
    fn test_tell_missing_parts() {
        assert_eq!(parse_line("tell"), Action::Usage("tell <user> <message>"));
        assert_eq!(parse_line("tell bob"), Action::Usage("tell <user> <message>"));
        assert_eq!(parse_line("tell bob  "), Action::Usage("tell <user> <message>"));
    }

    #[test]
    fn test_shutdown() {
        assert_eq!(
            parse_line("shutdown hunter2"),
            Action::Shutdown("hunter2".to_string())
        );
        assert_eq!(parse_line("shutdown"), Action::Usage("shutdown <password>"));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(parse_line("dance"), Action::Unknown("dance".to_string()));
        // Commands match whole words only
        assert_eq!(
            parse_line("listing"),
            Action::Unknown("listing".to_string())
        );
    }

    #[test]
    fn test_help_text_lists_every_command() {
        for command in ["tell", "say", "list", "quit", "shutdown"] {
            assert!(HELP.contains(command), "help is missing {command}");
        }
    }
}
