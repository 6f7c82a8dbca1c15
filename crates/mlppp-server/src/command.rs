//! Admin command lines.

use std::str::FromStr;

use thiserror::Error;

/// Reply to `help`.
pub const HELP: &str = "\
show links            list datalinks and the bundle phase
show bundle           bundle status
open                  bring the bundle up
close                 take the bundle down
down <link>           close one datalink
clone <link> <name>   copy a datalink
remove <link>         delete a datalink
clean                 delete every datalink that cannot be reused
set timeout <secs>    idle timeout, 0 disables
quit                  end this session
help                  this text
";

/// A parsed admin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// `show links`
    ShowLinks,
    /// `show bundle`
    ShowBundle,
    /// `open`
    Open,
    /// `close`
    Close,
    /// `down <link>`
    Down(String),
    /// `clone <link> <name>`
    Clone {
        /// Template link.
        template: String,
        /// New link name.
        name: String,
    },
    /// `remove <link>`
    Remove(String),
    /// `clean`
    Clean,
    /// `set timeout <secs>`
    SetTimeout(u32),
    /// `quit`
    Quit,
    /// `help`
    Help,
}

/// Why a line is not a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Nothing but whitespace.
    #[error("empty command")]
    Empty,
    /// Not a known command.
    #[error("Unknown command: {0}")]
    Unknown(String),
    /// A known command with the wrong arguments.
    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl FromStr for AdminCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((first, args)) = words.split_first() else {
            return Err(CommandError::Empty);
        };
        let verb = first.to_ascii_lowercase();

        match (verb.as_str(), args) {
            ("show", [what]) => match what.to_ascii_lowercase().as_str() {
                "links" => Ok(Self::ShowLinks),
                "bundle" => Ok(Self::ShowBundle),
                _ => Err(CommandError::Usage("show links|bundle")),
            },
            ("show", _) => Err(CommandError::Usage("show links|bundle")),
            ("open", []) => Ok(Self::Open),
            ("close", []) => Ok(Self::Close),
            ("down", [link]) => Ok(Self::Down((*link).to_owned())),
            ("down", _) => Err(CommandError::Usage("down <link>")),
            ("clone", [template, name]) => Ok(Self::Clone {
                template: (*template).to_owned(),
                name: (*name).to_owned(),
            }),
            ("clone", _) => Err(CommandError::Usage("clone <link> <name>")),
            ("remove", [link]) => Ok(Self::Remove((*link).to_owned())),
            ("remove", _) => Err(CommandError::Usage("remove <link>")),
            ("clean", []) => Ok(Self::Clean),
            ("set", [key, secs]) if key.eq_ignore_ascii_case("timeout") => secs
                .parse()
                .map(Self::SetTimeout)
                .map_err(|_| CommandError::Usage("set timeout <secs>")),
            ("set", _) => Err(CommandError::Usage("set timeout <secs>")),
            ("quit" | "bye" | "exit", []) => Ok(Self::Quit),
            ("help" | "?", _) => Ok(Self::Help),
            ("open" | "close" | "clean" | "quit" | "bye" | "exit", _) => {
                Err(CommandError::Usage("takes no arguments"))
            },
            _ => Err(CommandError::Unknown(line.trim().to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<AdminCommand, CommandError> {
        s.parse()
    }

    #[test]
    fn test_parses_every_command() {
        assert_eq!(parse("show links"), Ok(AdminCommand::ShowLinks));
        assert_eq!(parse("SHOW Bundle"), Ok(AdminCommand::ShowBundle));
        assert_eq!(parse("open"), Ok(AdminCommand::Open));
        assert_eq!(parse("  close  "), Ok(AdminCommand::Close));
        assert_eq!(parse("down deflink"), Ok(AdminCommand::Down("deflink".into())));
        assert_eq!(
            parse("clone deflink second"),
            Ok(AdminCommand::Clone {
                template: "deflink".into(),
                name: "second".into()
            })
        );
        assert_eq!(parse("remove second"), Ok(AdminCommand::Remove("second".into())));
        assert_eq!(parse("clean"), Ok(AdminCommand::Clean));
        assert_eq!(parse("set timeout 180"), Ok(AdminCommand::SetTimeout(180)));
        assert_eq!(parse("quit"), Ok(AdminCommand::Quit));
        assert_eq!(parse("help"), Ok(AdminCommand::Help));
    }

    #[test]
    fn test_usage_errors() {
        assert_eq!(parse("down"), Err(CommandError::Usage("down <link>")));
        assert_eq!(parse("clone a"), Err(CommandError::Usage("clone <link> <name>")));
        assert_eq!(parse("set timeout soon"), Err(CommandError::Usage("set timeout <secs>")));
        assert_eq!(parse("open now"), Err(CommandError::Usage("takes no arguments")));
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(parse("   "), Err(CommandError::Empty));
        let err = parse("dial 555").unwrap_err();
        assert_eq!(err.to_string(), "Unknown command: dial 555");
    }
}
