//! Admin command execution against the bundle.

use std::fmt::Write as _;

use mlppp_bundle::{Bundle, CloseMode};
use mlppp_core::PhysType;
use mlppp_server::{AdminCommand, HELP};
use tracing::info;

/// What a command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Text for the session.
    pub text: String,
    /// End the session once the text is flushed.
    pub quit: bool,
}

impl Reply {
    pub(crate) fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quit: false,
        }
    }
}

/// Run `command` against `bundle`.
pub fn execute(bundle: &mut Bundle, command: &AdminCommand) -> Reply {
    match command {
        AdminCommand::ShowLinks => Reply::text(bundle.show_links()),
        AdminCommand::ShowBundle => Reply::text(bundle.show_status()),
        AdminCommand::Open => {
            let opened = bundle.open("admin command", PhysType::ALL);
            if opened == 0 {
                Reply::text("No link opened\n")
            } else {
                Reply::text(format!("Opening {opened} link(s)\n"))
            }
        },
        AdminCommand::Close => {
            bundle.close("admin command", CloseMode::StayDown);
            Reply::text(format!("Phase: {}\n", bundle.phase_name()))
        },
        AdminCommand::Down(name) => match bundle.datalink_down(name) {
            Ok(()) => Reply::default(),
            Err(e) => Reply::text(format!("{e}\n")),
        },
        AdminCommand::Clone { template, name } => match bundle.datalink_clone(template, name) {
            Ok(_) => Reply::default(),
            Err(e) => Reply::text(format!("{e}\n")),
        },
        AdminCommand::Remove(name) => match bundle.datalink_remove(name) {
            Ok(()) => Reply::default(),
            Err(e) => Reply::text(format!("{e}\n")),
        },
        AdminCommand::Clean => {
            let gone = bundle.clean_datalinks();
            if gone.is_empty() {
                Reply::text("Nothing to clean\n")
            } else {
                let mut text = String::from("Removed:");
                for name in &gone {
                    let _ = write!(text, " {name}");
                }
                text.push('\n');
                Reply::text(text)
            }
        },
        AdminCommand::SetTimeout(secs) => {
            bundle.set_idle_timer(*secs);
            info!(timeout = secs, "idle timeout changed");
            Reply::default()
        },
        AdminCommand::Quit => Reply {
            text: String::new(),
            quit: true,
        },
        AdminCommand::Help => Reply::text(HELP),
    }
}
