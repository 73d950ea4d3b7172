//! Line commands typed by the user.

use std::path::PathBuf;

use thiserror::Error;

/// Shown by `help`.
pub const HELP: &str = "\
Commands:
  join <preset|url>      Connect to a preset or address
  connect <url>          Connect (ws:// or wss:// push, http:// or https:// pull)
  disconnect             Close the current connection
  check                  Show connection status
  nick [name]            Show or set nickname
  say <text>             Send a chat message
  send <text>            Same as say
  presence               Show how many participants are online
  uid                    Show this client's origin id
  autosay on|off         Send plain lines as chat messages
  upload <path> [mime]   Upload a file and post its link
  echo <text>            Print text locally
  help                   Show this help";

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(String),
    Connect(String),
    Disconnect,
    Check,
    Nick(Option<String>),
    Say(String),
    Presence,
    Uid,
    AutoSay(bool),
    Upload { path: PathBuf, mime: Option<String> },
    Echo(String),
    Help,
}

/// Unparseable input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command: {0} (try help)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    ///
    /// With `autosay` on, a line that does not start with a command name is
    /// sent as a chat message.
    ///
    /// # Errors
    /// Returns error for unknown commands (autosay off) or missing arguments.
    pub fn parse(line: &str, autosay: bool) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (name, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(name, rest)| (name, rest.trim()));

        let command = match name.to_ascii_lowercase().as_str() {
            "join" => Self::Join(required(rest, "join <preset|url>")?),
            "connect" => Self::Connect(required(rest, "connect <url>")?),
            "disconnect" => Self::Disconnect,
            "check" => Self::Check,
            "nick" => Self::Nick((!rest.is_empty()).then(|| rest.to_owned())),
            "say" | "send" => Self::Say(required(rest, "say <text>")?),
            "presence" => Self::Presence,
            "uid" => Self::Uid,
            "autosay" => match rest {
                "on" => Self::AutoSay(true),
                "off" => Self::AutoSay(false),
                _ => return Err(CommandError::Usage("autosay on|off")),
            },
            "upload" => {
                let mut parts = rest.split_whitespace();
                let path = parts
                    .next()
                    .ok_or(CommandError::Usage("upload <path> [mime]"))?;
                Self::Upload {
                    path: PathBuf::from(path),
                    mime: parts.next().map(str::to_owned),
                }
            }
            "echo" => Self::Echo(rest.to_owned()),
            "help" => Self::Help,
            _ if autosay => Self::Say(line.to_owned()),
            _ => return Err(CommandError::Unknown(name.to_owned())),
        };
        Ok(Some(command))
    }
}

fn required(rest: &str, usage: &'static str) -> Result<String, CommandError> {
    if rest.is_empty() {
        Err(CommandError::Usage(usage))
    } else {
        Ok(rest.to_owned())
    }
}

/// Best-effort MIME type from a file extension.
#[must_use]
pub fn guess_mime(path: &std::path::Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn parse(line: &str) -> Command {
        Command::parse(line, false).unwrap().unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("join local"), Command::Join("local".into()));
        assert_eq!(
            parse("connect ws://h/ws"),
            Command::Connect("ws://h/ws".into())
        );
        assert_eq!(parse("say  hello there "), Command::Say("hello there".into()));
        assert_eq!(parse("send hi"), Command::Say("hi".into()));
        assert_eq!(parse("nick"), Command::Nick(None));
        assert_eq!(parse("nick Bob B"), Command::Nick(Some("Bob B".into())));
        assert_eq!(parse("autosay off"), Command::AutoSay(false));
        assert_eq!(parse("HELP"), Command::Help);
        assert_eq!(
            parse("upload ./cat.png"),
            Command::Upload {
                path: PathBuf::from("./cat.png"),
                mime: None
            }
        );
    }

    #[test]
    fn test_blank_and_invalid_lines() {
        assert_eq!(Command::parse("   ", false), Ok(None));
        assert_eq!(
            Command::parse("say", false),
            Err(CommandError::Usage("say <text>"))
        );
        assert_eq!(
            Command::parse("autosay maybe", false),
            Err(CommandError::Usage("autosay on|off"))
        );
        assert_eq!(
            Command::parse("hello all", false),
            Err(CommandError::Unknown("hello".into()))
        );
    }

    #[test]
    fn test_autosay_sends_plain_lines() {
        assert_eq!(
            Command::parse("hello all", true),
            Ok(Some(Command::Say("hello all".into())))
        );
        assert_eq!(Command::parse("uid", true), Ok(Some(Command::Uid)));
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("a/b.PNG")), "image/png");
        assert_eq!(guess_mime(Path::new("notes")), "application/octet-stream");
    }
}
