//! The daemon context: one bundle, one admin server and the multiplexer
//! that services them.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mlppp_bundle::{Bundle, Notifier, NullProtocol};
use mlppp_config::Config;
use mlppp_core::{
    Descriptor, DescriptorId, DescriptorSet, Event, EventQueue, Multiplexer, PhysType, PromptId,
};
use mlppp_server::{AdminCommand, CommandError, Server};
use mlppp_telemetry::{ALERT_TARGET, PHASE_TARGET};
use tracing::{debug, info, warn};

use crate::admin;
use crate::error::DaemonResult;
use crate::settings;

/// Longest single readiness wait, so a raised shutdown flag is noticed.
pub const MAX_WAIT: Duration = Duration::from_secs(1);

/// Link types brought up as soon as the daemon starts.
pub const STARTUP_TYPES: PhysType = PhysType::DEDICATED
    .union(PhysType::DDIAL)
    .union(PhysType::BACKGROUND);

/// Owns the bundle and the server and dispatches their events.
///
/// Descriptors are serviced in the order tunnel, datalinks, server
/// listener, admin sessions. Link events are applied as soon as the link
/// that raised them has been serviced. Commands and closed sessions may
/// add or drop descriptors, so they wait for the end of the iteration.
#[derive(Debug)]
pub struct Daemon {
    bundle: Bundle,
    server: Server,
    mux: Multiplexer,
    events: EventQueue,
    deferred: Vec<Event>,
}

impl Daemon {
    /// Wrap an already built bundle and server.
    #[must_use]
    pub fn new(bundle: Bundle, server: Server) -> Self {
        Self {
            bundle,
            server,
            mux: Multiplexer::new(),
            events: EventQueue::new(),
            deferred: Vec::new(),
        }
    }

    /// Build the bundle, its links and the admin server from `config`.
    ///
    /// # Errors
    ///
    /// Any tunnel, notify channel, link or listener setup failure.
    pub fn from_config(config: &Config) -> DaemonResult<Self> {
        let tunnel = settings::open_tunnel(&config.bundle)?;
        let mut bundle = Bundle::new(tunnel, settings::bundle_settings(config)?);
        if let Some(path) = &config.bundle.notify {
            bundle = bundle.with_notifier(Notifier::open(path)?);
        }
        for (i, link) in config.links.iter().enumerate() {
            let link_config = settings::link_config(i, link)?;
            bundle.add_link(&link.name, link_config, Box::new(NullProtocol))?;
        }

        let mut server = Server::new().with_max_sessions(config.server.max_sessions);
        if let Some(path) = &config.server.socket {
            server.open_local(path, config.server.mode()?)?;
        } else if let Some(port) = config.server.port {
            server.open_tcp(port)?;
        }

        info!(
            links = bundle.links().len(),
            server = %server.state(),
            "daemon ready"
        );
        Ok(Self::new(bundle, server))
    }

    /// The bundle.
    #[must_use]
    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    /// The bundle, mutably.
    pub fn bundle_mut(&mut self) -> &mut Bundle {
        &mut self.bundle
    }

    /// The admin server.
    #[must_use]
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// The admin server, mutably.
    pub fn server_mut(&mut self) -> &mut Server {
        &mut self.server
    }

    /// Completed loop iterations.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.mux.iterations()
    }

    /// Bring up the links that start with the daemon; with `interactive`,
    /// interactive links too.
    pub fn start_links(&mut self, interactive: bool) -> usize {
        let mut mask = STARTUP_TYPES;
        if interactive {
            mask |= PhysType::INTERACTIVE;
        }
        if self.bundle.links().phys_union().intersects(mask) {
            self.bundle.open("startup", mask)
        } else {
            0
        }
    }

    /// Run one loop iteration, waiting at most `max_wait`.
    ///
    /// # Errors
    ///
    /// The readiness wait failed for a reason other than an interrupt.
    pub fn run_once(&mut self, max_wait: Duration) -> DaemonResult<usize> {
        let timeout = self.wait_time(max_wait);
        let mut mux = std::mem::take(&mut self.mux);
        let mut events = std::mem::take(&mut self.events);
        let result = mux.iterate(self, Some(timeout), &mut events);
        self.mux = mux;
        self.events = events;

        let dispatched = match result {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(e.into()),
        };

        self.apply_deferred();
        self.bundle.run_timers();
        Ok(dispatched)
    }

    /// Run until the bundle has finished cleaning up. Raising `shutdown`
    /// starts the cleanup.
    ///
    /// # Errors
    ///
    /// See [`Daemon::run_once`].
    pub fn run(&mut self, shutdown: &Arc<AtomicBool>) -> DaemonResult<()> {
        loop {
            if shutdown.load(Ordering::SeqCst) && !self.bundle.is_cleaning_up() {
                info!(target: PHASE_TARGET, "shutdown requested");
                self.bundle.begin_cleanup();
            }
            if self.bundle.exit_requested() {
                break;
            }
            self.run_once(MAX_WAIT)?;
        }
        self.server.close();
        info!(iterations = self.iterations(), "event loop finished");
        Ok(())
    }

    fn wait_time(&self, max_wait: Duration) -> Duration {
        match self.bundle.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(max_wait),
            None => max_wait,
        }
    }

    fn apply_deferred(&mut self) {
        for event in std::mem::take(&mut self.deferred) {
            match event {
                Event::Command { prompt, line } => self.run_command(prompt, &line),
                Event::SessionClosed { prompt } => {
                    if self.server.remove_prompt(prompt).is_some() {
                        debug!(prompt = %prompt, "session removed");
                    }
                },
                Event::Link { link, signal } => self.bundle.handle_link_signal(link, signal),
            }
        }
    }

    fn run_command(&mut self, id: PromptId, line: &str) {
        let reply = match line.parse::<AdminCommand>() {
            Ok(command) => {
                info!(prompt = %id, command = line, "admin command");
                admin::execute(&mut self.bundle, &command)
            },
            Err(CommandError::Empty) => admin::Reply::default(),
            Err(e) => {
                debug!(prompt = %id, error = %e, "rejected admin command");
                admin::Reply::text(format!("{e}\n"))
            },
        };

        let Some(prompt) = self.server.prompt_mut(id) else {
            debug!(prompt = %id, "reply for a session that has gone");
            return;
        };
        prompt.print(&reply.text);
        if reply.quit {
            prompt.finish();
        } else {
            prompt.show_prompt();
        }
    }
}

impl DescriptorSet for Daemon {
    fn descriptor_ids(&self) -> Vec<DescriptorId> {
        let mut ids = vec![DescriptorId::Bundle];
        ids.extend(self.bundle.links().ids().into_iter().map(DescriptorId::Link));
        ids.push(DescriptorId::Server);
        ids.extend(self.server.prompt_ids().into_iter().map(DescriptorId::Prompt));
        ids
    }

    fn descriptor(&self, id: DescriptorId) -> Option<&dyn Descriptor> {
        match id {
            DescriptorId::Bundle => Some(&self.bundle),
            DescriptorId::Server => Some(&self.server),
            DescriptorId::Link(link) => self.bundle.links().get(link).map(|l| l as &dyn Descriptor),
            DescriptorId::Prompt(prompt) => self.server.prompt(prompt).map(|p| p as &dyn Descriptor),
        }
    }

    fn descriptor_mut(&mut self, id: DescriptorId) -> Option<&mut dyn Descriptor> {
        match id {
            DescriptorId::Bundle => Some(&mut self.bundle),
            DescriptorId::Server => Some(&mut self.server),
            DescriptorId::Link(link) => self
                .bundle
                .link_mut(link)
                .map(|l| l as &mut dyn Descriptor),
            DescriptorId::Prompt(prompt) => self
                .server
                .prompt_mut(prompt)
                .map(|p| p as &mut dyn Descriptor),
        }
    }

    fn settle(&mut self, events: &mut EventQueue) {
        while let Some(event) = events.pop() {
            if event.changes_membership() {
                self.deferred.push(event);
            } else if let Event::Link { link, signal } = event {
                self.bundle.handle_link_signal(link, signal);
            } else {
                warn!(target: ALERT_TARGET, ?event, "unexpected event");
            }
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if !self.bundle.is_dead() {
            self.bundle.close("daemon exit", mlppp_bundle::CloseMode::StayDown);
        }
    }
}
