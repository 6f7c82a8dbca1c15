//! The bundle controller and its phase machine.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use mlppp_core::{
    BoundedText, Clock, Descriptor, EventQueue, FdSets, Layer, LinkId, LinkSignal, Phase,
    PhysType, ReadySet, SystemClock,
};
use tracing::{debug, info, warn};

use crate::collection::DatalinkCollection;
use crate::datalink::{Datalink, Device, LinkConfig};
use crate::error::{BundleError, BundleResult};
use crate::filter::{FilterSet, PacketMatcher, ProtocolMatcher};
use crate::idle::{IdleCheck, IdleSupervisor};
use crate::ncp::Ncp;
use crate::notify::Notifier;
use crate::observer::LayerObserver;
use crate::protocol::LinkProtocol;
use crate::route::{
    MemoryRouteTable, RouteBook, RouteChange, RouteEntry, RouteError, RouteGateway, RouteSeq,
    RouteSpec, RouteTable,
};
use crate::tunnel::Tunnel;

/// Authentication names and keys are at most 49 bytes.
pub const MAX_AUTH_LEN: usize = 49;

const TUN_READ_CHUNK: usize = 2048;

/// Packets held for the links or the tunnel before the oldest is dropped.
pub const MAX_HELD_PACKETS: usize = 256;

fn hold(queue: &mut VecDeque<Vec<u8>>, packet: Vec<u8>, what: &str) {
    if queue.len() >= MAX_HELD_PACKETS {
        queue.pop_front();
        debug!(queue = what, "queue full, dropped oldest packet");
    }
    queue.push_back(packet);
}

/// Whether closed links may be brought back up automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Leave every link down.
    StayDown,
    /// Dedicated and ddial links are redialled once closed.
    AllowRedial,
}

/// PAP/CHAP credentials. Opaque to the bundle.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthSettings {
    /// System name.
    pub name: BoundedText<MAX_AUTH_LEN>,
    /// Key.
    pub key: BoundedText<MAX_AUTH_LEN>,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("name", &self.name)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Bundle configuration.
#[derive(Debug, Clone, Default)]
pub struct BundleSettings {
    /// Idle timeout in seconds; `0` disables.
    pub idle_timeout: u32,
    /// Credentials.
    pub auth: AuthSettings,
    /// Routes installed on entering the network phase.
    pub routes: Vec<RouteSpec>,
    /// Packet filters.
    pub filters: FilterSet,
    /// Require the multilink layer before the network layer counts as up.
    pub multilink: bool,
}

/// The aggregate session.
pub struct Bundle {
    tunnel: Box<dyn Tunnel>,
    routing_seq: RouteSeq,
    session_seq: RouteSeq,
    phase: Phase,
    phase_since: DateTime<Utc>,
    phys_type: PhysType,
    cleaning_up: bool,
    exit_requested: bool,
    authenticated: bool,
    settings: BundleSettings,
    links: DatalinkCollection,
    ncp: Ncp,
    matcher: Box<dyn PacketMatcher>,
    idle: IdleSupervisor,
    notifier: Notifier,
    routes: RouteBook,
    route_table: Box<dyn RouteTable>,
    observers: Vec<Box<dyn LayerObserver>>,
    clock: Arc<dyn Clock>,
    tun_out: VecDeque<Vec<u8>>,
    link_queue: VecDeque<Vec<u8>>,
    deferred: Vec<(LinkId, LinkSignal)>,
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("device", &self.tunnel.name())
            .field("phase", &self.phase)
            .field("routing_seq", &self.routing_seq)
            .field("phys_type", &self.phys_type)
            .field("cleaning_up", &self.cleaning_up)
            .field("links", &self.links.len())
            .finish_non_exhaustive()
    }
}

impl Bundle {
    /// A dead bundle on `tunnel` with no links.
    #[must_use]
    pub fn new(tunnel: Box<dyn Tunnel>, settings: BundleSettings) -> Self {
        let bundle = Self {
            tunnel,
            routing_seq: RouteSeq::default(),
            session_seq: RouteSeq::default(),
            phase: Phase::Dead,
            phase_since: Utc::now(),
            phys_type: PhysType::empty(),
            cleaning_up: false,
            exit_requested: false,
            authenticated: false,
            idle: IdleSupervisor::new(settings.idle_timeout),
            ncp: Ncp::new(settings.multilink),
            settings,
            links: DatalinkCollection::new(),
            matcher: Box::new(ProtocolMatcher),
            notifier: Notifier::none(),
            routes: RouteBook::default(),
            route_table: Box::new(MemoryRouteTable::new()),
            observers: Vec::new(),
            clock: Arc::new(SystemClock),
            tun_out: VecDeque::new(),
            link_queue: VecDeque::new(),
            deferred: Vec::new(),
        };
        info!(device = %bundle.tunnel.name(), "bundle created");
        bundle
    }

    /// Use `clock` for the idle timer.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Install routes through `table`.
    #[must_use]
    pub fn with_route_table(mut self, table: Box<dyn RouteTable>) -> Self {
        self.route_table = table;
        self
    }

    /// Classify packets with `matcher`.
    #[must_use]
    pub fn with_matcher(mut self, matcher: Box<dyn PacketMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Report phase changes through `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Register a bundle-level layer observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Box<dyn LayerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Name of the current phase.
    #[must_use]
    pub fn phase_name(&self) -> &'static str {
        self.phase.name()
    }

    /// When the current phase was entered.
    #[must_use]
    pub fn phase_since(&self) -> DateTime<Utc> {
        self.phase_since
    }

    /// Whether the phase is `Dead`.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.phase == Phase::Dead
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_cleaning_up(&self) -> bool {
        self.cleaning_up
    }

    /// Whether shutdown has finished and the process may exit.
    #[must_use]
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Tunnel device name.
    #[must_use]
    pub fn device(&self) -> &str {
        self.tunnel.name()
    }

    /// Sequence number the next route change will carry.
    #[must_use]
    pub fn routing_seq(&self) -> RouteSeq {
        self.routing_seq
    }

    /// Union of every link's physical type.
    #[must_use]
    pub fn phys_type(&self) -> PhysType {
        self.phys_type
    }

    /// Configuration.
    #[must_use]
    pub fn settings(&self) -> &BundleSettings {
        &self.settings
    }

    /// Network control state.
    #[must_use]
    pub fn ncp(&self) -> &Ncp {
        &self.ncp
    }

    /// Network control state, mutably (address negotiation results).
    pub fn ncp_mut(&mut self) -> &mut Ncp {
        &mut self.ncp
    }

    /// The links.
    #[must_use]
    pub fn links(&self) -> &DatalinkCollection {
        &self.links
    }

    /// One link, mutably.
    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Datalink> {
        self.links.get_mut(id)
    }

    /// Routes the bundle has installed.
    #[must_use]
    pub fn installed_routes(&self) -> Vec<RouteEntry> {
        self.routes.entries().copied().collect()
    }

    /// Find a link by name.
    #[must_use]
    pub fn bundle2datalink(&self, name: &str) -> Option<&Datalink> {
        self.links.by_name(name)
    }

    /// Packets waiting for the tunnel.
    #[must_use]
    pub fn tunnel_backlog(&self) -> usize {
        self.tun_out.len()
    }

    /// Packets waiting for a link.
    #[must_use]
    pub fn link_backlog(&self) -> usize {
        self.link_queue.len()
    }

    // ---------------------------------------------------------------------
    // Phase machine
    // ---------------------------------------------------------------------

    fn new_phase(&mut self, next: Phase) {
        let from = self.phase;
        if from == next {
            return;
        }
        if !from.can_transition_to(next) {
            warn!(from = %from, to = %next, "ignoring illegal phase transition");
            return;
        }

        if from == Phase::Network {
            self.idle.stop();
            self.remove_session_routes();
        }

        self.phase = next;
        self.phase_since = Utc::now();
        info!(target: "mlppp::phase", from = %from, to = %next, "bundle: {}", next.name());

        match next {
            Phase::Network => {
                self.session_seq = self.routing_seq;
                self.install_session_routes();
                self.start_idle_timer();
                self.fill_queues();
            },
            Phase::Dead => {
                self.authenticated = false;
                self.ncp.reset();
                self.link_queue.clear();
                self.deferred.clear();
            },
            Phase::Establish | Phase::Authenticate | Phase::Terminate => {},
        }

        self.notifier.phase(next);
        for observer in &mut self.observers {
            observer.phase_changed(from, next);
        }
    }

    /// Recompute the phase after link liveness changed.
    fn settle_phase(&mut self) {
        if !self.links.any_active() {
            if self.phase == Phase::Network {
                self.new_phase(Phase::Terminate);
            }
            if self.links.any_closing() {
                if matches!(self.phase, Phase::Establish | Phase::Authenticate) {
                    self.new_phase(Phase::Terminate);
                }
            } else if matches!(
                self.phase,
                Phase::Establish | Phase::Authenticate | Phase::Terminate
            ) {
                self.new_phase(Phase::Dead);
            }
        } else if self.phase == Phase::Terminate && !self.links.any_closing() {
            // Links opened while the old session unwound start a new one.
            let deferred = std::mem::take(&mut self.deferred);
            self.new_phase(Phase::Dead);
            self.new_phase(Phase::Establish);
            for (id, signal) in deferred {
                if self.links.get(id).is_some_and(Datalink::is_active) {
                    self.handle_link_signal(id, signal);
                }
            }
        }

        if self.cleaning_up && self.phase == Phase::Dead && !self.exit_requested {
            info!("bundle: cleanup complete");
            self.exit_requested = true;
        }
    }

    fn recompute_phys_type(&mut self) {
        let was_permanent = self.phys_type.intersects(PhysType::PERMANENT);
        self.phys_type = self.links.phys_union();
        if was_permanent != self.phys_type.intersects(PhysType::PERMANENT) {
            // Idle is never armed while a permanent link is configured.
            self.start_idle_timer();
        }
    }

    /// Bring up every closed link whose type is in `mask`.
    ///
    /// Refused while cleaning up. Moves a dead bundle to `Establish` once
    /// at least one link starts opening. Returns the number of links that
    /// started opening.
    pub fn open(&mut self, reason: &str, mask: PhysType) -> usize {
        if self.cleaning_up {
            warn!(reason, "bundle: open refused, cleaning up");
            return 0;
        }
        info!(reason, mask = %mask, "bundle: open");

        let candidates: Vec<LinkId> = self
            .links
            .iter()
            .filter(|l| l.is_closed() && l.phys_type().intersects(mask))
            .map(Datalink::id)
            .collect();

        let mut opened = 0usize;
        for id in candidates {
            if self.open_link(id) {
                opened = opened.saturating_add(1);
            }
        }
        opened
    }

    fn open_link(&mut self, id: LinkId) -> bool {
        let Some(link) = self.links.get_mut(id) else {
            return false;
        };
        link.set_stay_down(false);
        match link.open() {
            Ok(signals) => {
                if self.phase == Phase::Dead {
                    self.new_phase(Phase::Establish);
                }
                self.apply_signals(id, signals);
                true
            },
            Err(e) => {
                warn!(link = %link.name(), error = %e, "bundle: link failed to open");
                false
            },
        }
    }

    /// Attach an already-open device (an incoming connection) to a link.
    ///
    /// # Errors
    ///
    /// [`BundleError::UnknownLink`] if the link is gone,
    /// [`BundleError::CleaningUp`] during shutdown.
    pub fn attach_device(&mut self, id: LinkId, device: Box<dyn Device>) -> BundleResult<()> {
        if self.cleaning_up {
            return Err(BundleError::CleaningUp);
        }
        let link = self
            .links
            .get_mut(id)
            .ok_or_else(|| BundleError::UnknownLink(id.to_string()))?;
        let signals = link.attach(device);
        if self.phase == Phase::Dead {
            self.new_phase(Phase::Establish);
        }
        self.apply_signals(id, signals);
        Ok(())
    }

    /// Close the session. Safe in any phase; closing a dead bundle with
    /// every link closed does nothing.
    pub fn close(&mut self, reason: &str, mode: CloseMode) {
        if self.phase == Phase::Dead && self.links.all_closed() {
            debug!(reason, "bundle: already closed");
            return;
        }
        info!(reason, "bundle: close");

        if matches!(
            self.phase,
            Phase::Establish | Phase::Authenticate | Phase::Network
        ) {
            self.new_phase(Phase::Terminate);
        }

        let stay_down = mode == CloseMode::StayDown;
        let mut pending = Vec::new();
        for link in self.links.iter_mut() {
            link.set_stay_down(stay_down);
            let signals = link.close();
            if !signals.is_empty() {
                pending.push((link.id(), signals));
            }
        }
        for (id, signals) in pending {
            self.apply_signals(id, signals);
        }
        self.settle_phase();
    }

    /// Start shutting down: no link may be opened from now on, and once the
    /// bundle is dead [`Bundle::exit_requested`] becomes true.
    pub fn begin_cleanup(&mut self) {
        if !self.cleaning_up {
            info!("bundle: cleaning up");
            self.cleaning_up = true;
        }
        self.close("cleanup", CloseMode::StayDown);
        self.settle_phase();
    }

    fn apply_signals(&mut self, id: LinkId, signals: Vec<LinkSignal>) {
        for signal in signals {
            self.handle_link_signal(id, signal);
        }
    }

    /// Act on a signal from link `id`.
    pub fn handle_link_signal(&mut self, id: LinkId, signal: LinkSignal) {
        let Some(link) = self.links.get_mut(id) else {
            debug!(link = %id, ?signal, "signal for unknown link");
            return;
        };
        if self.phase == Phase::Terminate
            && link.is_active()
            && matches!(
                signal,
                LinkSignal::Established
                    | LinkSignal::Authenticated
                    | LinkSignal::LayerUp(_)
                    | LinkSignal::LayerDown(_)
            )
        {
            debug!(link = %link.name(), ?signal, "held until the bundle has terminated");
            self.deferred.push((id, signal));
            return;
        }
        match signal {
            LinkSignal::Established => {
                link.apply_signal(&LinkSignal::Established);
                info!(link = %link.name(), "link established");
                if self.phase == Phase::Dead {
                    self.new_phase(Phase::Establish);
                }
                if self.phase == Phase::Establish {
                    self.new_phase(Phase::Authenticate);
                }
            },
            LinkSignal::Authenticated => {
                self.authenticated = true;
                self.try_enter_network();
            },
            LinkSignal::AuthFailed => {
                warn!(link = %link.name(), "authentication failed");
                link.set_stay_down(true);
                let signals = link.close();
                self.apply_signals(id, signals);
                self.settle_phase();
            },
            LinkSignal::LayerUp(layer) => self.layer_up(layer),
            LinkSignal::LayerDown(layer) => self.layer_down(layer),
            LinkSignal::Packet(packet) => self.deliver_inbound(id, packet),
            LinkSignal::Lost => self.link_lost(id, false),
            LinkSignal::Closed => self.link_closed(id),
        }
    }

    fn try_enter_network(&mut self) {
        if self.phase == Phase::Authenticate && self.authenticated && self.ncp.is_up() {
            self.new_phase(Phase::Network);
        }
    }

    /// A bundle-wide layer came up. Only advances the phase from
    /// `Authenticate`.
    pub fn layer_up(&mut self, layer: Layer) {
        self.ncp.layer_up(layer);
        debug!(layer = %layer, phase = %self.phase, "layer up");
        for observer in &mut self.observers {
            observer.layer_up(layer);
        }
        self.try_enter_network();
    }

    /// A bundle-wide layer went down. Losing the network layer while in
    /// `Network` closes the bundle.
    pub fn layer_down(&mut self, layer: Layer) {
        let was_up = self.ncp.is_up();
        self.ncp.layer_down(layer);
        debug!(layer = %layer, phase = %self.phase, "layer down");
        for observer in &mut self.observers {
            observer.layer_down(layer);
        }
        if layer.is_ncp() && was_up && self.phase == Phase::Network {
            self.close("network layer down", CloseMode::AllowRedial);
        }
    }

    /// A link lost its device. `stay_down` forbids redialling it.
    pub fn link_lost(&mut self, id: LinkId, stay_down: bool) {
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        link.apply_signal(&LinkSignal::Lost);
        if stay_down {
            link.set_stay_down(true);
        }
        warn!(link = %link.name(), phase = %self.phase, "link lost");
        self.settle_phase();
    }

    /// A link finished closing.
    pub fn link_closed(&mut self, id: LinkId) {
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        link.apply_signal(&LinkSignal::Closed);
        info!(link = %link.name(), "link closed");
        let redial = !self.cleaning_up
            && !link.stay_down()
            && link.phys_type().intersects(PhysType::PERMANENT);

        self.settle_phase();

        if redial {
            info!(link = %id, "redialling permanent link");
            self.open_link(id);
        }
    }

    // ---------------------------------------------------------------------
    // Routes
    // ---------------------------------------------------------------------

    /// Install or remove a route.
    ///
    /// An install is stamped with the current [`RouteSeq`] and returns it.
    /// A duplicate install fails unless `dup_ok`; with `dup_ok` a route the
    /// bundle did not install is left untracked and `None` is returned. A
    /// removal must carry the
    /// sequence number of the install it undoes; a removal with any other
    /// number is ignored and returns `None`.
    ///
    /// # Errors
    ///
    /// [`BundleError::Route`] if the table rejects the change.
    pub fn set_route(
        &mut self,
        change: RouteChange,
        dst: Ipv4Addr,
        gateway: Ipv4Addr,
        mask: Ipv4Addr,
        dup_ok: bool,
    ) -> BundleResult<Option<RouteSeq>> {
        match change {
            RouteChange::Add => {
                let seq = self.routing_seq;
                match self.route_table.add(dst, gateway, mask) {
                    Ok(()) => {},
                    Err(RouteError::Exists { .. }) if dup_ok => {
                        if self.routes.get(dst, mask).is_none() {
                            debug!(%dst, %mask, "route owned elsewhere, leaving it alone");
                            return Ok(None);
                        }
                        debug!(%dst, %mask, "route already present");
                    },
                    Err(e) => {
                        warn!(%dst, %mask, %gateway, error = %e, "route add failed");
                        return Err(e.into());
                    },
                }
                self.routing_seq = seq.next();
                self.routes.record(RouteEntry {
                    dst,
                    mask,
                    gateway,
                    seq,
                });
                debug!(%dst, %mask, %gateway, %seq, "route added");
                Ok(Some(seq))
            },
            RouteChange::Delete(seq) => {
                let current = self.routes.get(dst, mask).map(|e| e.seq);
                if current != Some(seq) {
                    debug!(%dst, %mask, %seq, ?current, "ignoring stale route delete");
                    return Ok(None);
                }
                match self.route_table.delete(dst, mask) {
                    Ok(()) | Err(RouteError::NotFound { .. }) => {},
                    Err(e) => {
                        warn!(%dst, %mask, error = %e, "route delete failed");
                        return Err(e.into());
                    },
                }
                self.routes.forget(dst, mask);
                self.routing_seq = self.routing_seq.next();
                debug!(%dst, %mask, %seq, "route deleted");
                Ok(Some(seq))
            },
        }
    }

    fn install_session_routes(&mut self) {
        let specs = self.settings.routes.clone();
        for spec in specs {
            let gateway = match spec.gateway {
                RouteGateway::Addr(a) => a,
                RouteGateway::Peer => match self.ncp.his_addr() {
                    Some(a) => a,
                    None => {
                        warn!(dst = %spec.dst, "no peer address yet, skipping route");
                        continue;
                    },
                },
            };
            if let Err(e) = self.set_route(RouteChange::Add, spec.dst, gateway, spec.mask, true) {
                warn!(dst = %spec.dst, error = %e, "failed to install route");
            }
        }
    }

    fn remove_session_routes(&mut self) {
        for entry in self.routes.stamped_since(self.session_seq) {
            if let Err(e) = self.set_route(
                RouteChange::Delete(entry.seq),
                entry.dst,
                entry.gateway,
                entry.mask,
                false,
            ) {
                warn!(dst = %entry.dst, error = %e, "failed to remove route");
            }
        }
    }

    // ---------------------------------------------------------------------
    // Idle supervision
    // ---------------------------------------------------------------------

    /// Arm the idle timer for a full timeout from now. Only takes effect in
    /// `Network` with a non-zero timeout and no dedicated or ddial link.
    pub fn start_idle_timer(&mut self) {
        if self.phase == Phase::Network
            && self.settings.idle_timeout > 0
            && !self.phys_type.intersects(PhysType::PERMANENT)
        {
            self.idle.start(self.clock.now());
            debug!(timeout = self.settings.idle_timeout, "idle timer started");
        } else {
            self.idle.stop();
        }
    }

    /// Disarm the idle timer.
    pub fn stop_idle_timer(&mut self) {
        self.idle.stop();
    }

    /// Change the idle timeout; `0` disables. Restarts the timer when in
    /// `Network`.
    pub fn set_idle_timer(&mut self, secs: u32) {
        self.settings.idle_timeout = secs;
        self.idle.set_timeout(secs);
        self.start_idle_timer();
    }

    /// Seconds left before the idle timeout, or `None` when not armed.
    #[must_use]
    pub fn remaining_idle_time(&self) -> Option<u32> {
        self.idle.remaining(self.clock.now())
    }

    /// Whether the idle timer is armed.
    #[must_use]
    pub fn idle_timer_armed(&self) -> bool {
        self.idle.is_armed()
    }

    /// When [`Bundle::run_timers`] next needs to be called.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.idle.next_deadline()
    }

    /// Service due timers.
    pub fn run_timers(&mut self) {
        match self.idle.poll(self.clock.now()) {
            IdleCheck::Expired if self.phase == Phase::Network => {
                info!(timeout = self.settings.idle_timeout, "idle timer expired");
                self.close("idle timeout", CloseMode::StayDown);
            },
            IdleCheck::Rearmed => debug!("idle timer re-armed"),
            IdleCheck::Expired | IdleCheck::NotDue | IdleCheck::NotArmed => {},
        }
    }

    // ---------------------------------------------------------------------
    // Data path
    // ---------------------------------------------------------------------

    /// A packet arrived from the tunnel.
    ///
    /// While dead, a packet passing the dial filter is held and brings the
    /// bundle up; anything else is dropped. Otherwise the out filter
    /// decides and accepted packets are queued for the links.
    pub fn route_outbound(&mut self, packet: Vec<u8>) {
        if self.phase == Phase::Dead {
            if self.cleaning_up || !self.settings.filters.dial.apply(&*self.matcher, &packet) {
                debug!(len = packet.len(), "dropping packet, bundle is down");
                return;
            }
            hold(&mut self.link_queue, packet, "link");
            if self.open("dial on demand", PhysType::AUTO) == 0 {
                self.link_queue.clear();
            }
            return;
        }

        if !self.settings.filters.outgoing.apply(&*self.matcher, &packet) {
            debug!(len = packet.len(), "out filter dropped packet");
            return;
        }
        if self.settings.filters.alive.apply(&*self.matcher, &packet) {
            self.idle.note_traffic(self.clock.now());
        }
        hold(&mut self.link_queue, packet, "link");
        self.fill_queues();
    }

    /// Hand held packets to the up link with the shortest queue. Packets
    /// are held until the bundle reaches `Network`. Returns how many moved.
    pub fn fill_queues(&mut self) -> usize {
        if self.phase != Phase::Network {
            return 0;
        }
        let mut moved = 0usize;
        while !self.link_queue.is_empty() {
            let Some(link) = self
                .links
                .iter_mut()
                .filter(|l| l.is_up())
                .min_by_key(|l| l.queue_len())
            else {
                break;
            };
            if let Some(packet) = self.link_queue.pop_front() {
                link.enqueue(&packet);
                moved = moved.saturating_add(1);
            }
        }
        moved
    }

    /// A packet arrived from link `from`. Without a tunnel device it is
    /// discarded once the filters have seen it.
    pub fn deliver_inbound(&mut self, from: LinkId, packet: Vec<u8>) {
        if !self.settings.filters.incoming.apply(&*self.matcher, &packet) {
            debug!(link = %from, len = packet.len(), "in filter dropped packet");
            return;
        }
        if self.settings.filters.alive.apply(&*self.matcher, &packet) {
            self.idle.note_traffic(self.clock.now());
        }
        if self.tunnel.fd().is_none() {
            return;
        }
        hold(&mut self.tun_out, packet, "tunnel");
    }

    // ---------------------------------------------------------------------
    // Datalink collection
    // ---------------------------------------------------------------------

    /// Add a closed link.
    ///
    /// # Errors
    ///
    /// [`BundleError::DuplicateLink`] if the name is taken.
    pub fn add_link(
        &mut self,
        name: &str,
        config: LinkConfig,
        protocol: Box<dyn LinkProtocol>,
    ) -> BundleResult<LinkId> {
        let id = self.links.push(name, config, protocol)?;
        self.recompute_phys_type();
        Ok(id)
    }

    /// Add a closed copy of link `template` called `name`.
    ///
    /// # Errors
    ///
    /// [`BundleError::UnknownLink`] or [`BundleError::DuplicateLink`].
    pub fn datalink_clone(&mut self, template: &str, name: &str) -> BundleResult<LinkId> {
        let template = self.links.id_of(template)?;
        let id = self.links.clone_link(template, name)?;
        self.recompute_phys_type();
        info!(template = %template, link = %name, "link cloned");
        Ok(id)
    }

    /// Close (if needed) and detach link `name`.
    ///
    /// # Errors
    ///
    /// [`BundleError::UnknownLink`], or [`BundleError::RemoveForbidden`] if
    /// it is the only link carrying the network layer.
    pub fn datalink_remove(&mut self, name: &str) -> BundleResult<()> {
        let id = self.links.id_of(name)?;
        let is_up = self.links.get(id).is_some_and(Datalink::is_up);
        if is_up && self.phase == Phase::Network && self.links.up_count() <= 1 {
            return Err(BundleError::RemoveForbidden(name.to_owned()));
        }

        if let Some(link) = self.links.get_mut(id) {
            link.set_stay_down(true);
            let signals = link.close();
            self.apply_signals(id, signals);
        }
        self.links.remove(id)?;
        self.recompute_phys_type();
        info!(link = %name, "link removed");
        self.settle_phase();
        Ok(())
    }

    /// Close link `name` without touching the others.
    ///
    /// # Errors
    ///
    /// [`BundleError::UnknownLink`].
    pub fn datalink_down(&mut self, name: &str) -> BundleResult<()> {
        let id = self.links.id_of(name)?;
        if let Some(link) = self.links.get_mut(id) {
            link.set_stay_down(true);
            let signals = link.close();
            self.apply_signals(id, signals);
        }
        self.settle_phase();
        Ok(())
    }

    /// Drop every link that can never be used again: closed direct and
    /// one-off links. Returns the names removed.
    pub fn clean_datalinks(&mut self) -> Vec<String> {
        let gone = self.links.clean(|l| {
            matches!(
                l.state(),
                crate::datalink::LinkState::Closed | crate::datalink::LinkState::Hangup
            ) && l.phys_type().intersects(PhysType::DIRECT | PhysType::ONE_OFF)
        });
        if gone.is_empty() {
            return Vec::new();
        }
        self.recompute_phys_type();
        let names: Vec<String> = gone.iter().map(|l| l.name().to_owned()).collect();
        info!(links = ?names, "links cleaned");
        names
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    /// One `name: state` line per link followed by the phase.
    #[must_use]
    pub fn show_links(&self) -> String {
        let mut out = String::new();
        for link in self.links.iter() {
            out.push_str(&link.show());
            out.push('\n');
        }
        out.push_str(&format!("Phase: {}\n", self.phase_name()));
        out
    }

    /// Multi-line status summary.
    #[must_use]
    pub fn show_status(&self) -> String {
        let idle = match (self.settings.idle_timeout, self.remaining_idle_time()) {
            (0, _) => "disabled".to_string(),
            (t, Some(left)) => format!("{t}s ({left}s remaining)"),
            (t, None) => format!("{t}s (not running)"),
        };
        format!(
            "Device:       {}\nPhase:        {} (since {})\nLink types:   {}\nLinks:        {} ({} up)\n\
             Idle timer:   {}\nRoutes:       {} (next seq {})\nAuth name:    {}\n",
            self.tunnel.name(),
            self.phase_name(),
            self.phase_since.format("%Y-%m-%d %H:%M:%S"),
            self.phys_type,
            self.links.len(),
            self.links.up_count(),
            idle,
            self.routes.len(),
            self.routing_seq,
            self.settings.auth.name,
        )
    }

    /// Tear the bundle down for good.
    pub fn destroy(mut self) {
        self.cleaning_up = true;
        self.close("destroy", CloseMode::StayDown);
        self.idle.stop();
        self.notifier.close();
        info!(device = %self.tunnel.name(), "bundle destroyed");
    }

    fn write_tunnel(&mut self) -> io::Result<()> {
        if let Some(packet) = self.tun_out.front() {
            self.tunnel.write_all(packet)?;
            self.tun_out.pop_front();
        }
        Ok(())
    }
}

impl Descriptor for Bundle {
    fn update_set<'fd>(&'fd self, sets: &mut FdSets<'fd>) -> usize {
        let Some(fd) = self.tunnel.fd() else {
            return 0;
        };
        sets.watch_read(fd);
        if !self.tun_out.is_empty() {
            sets.watch_write(fd);
        }
        1
    }

    fn is_set(&self, ready: &ReadySet) -> bool {
        self.tunnel
            .fd()
            .is_some_and(|fd| ready.contains(fd.as_raw_fd()))
    }

    fn read(&mut self, _ready: &ReadySet, _events: &mut EventQueue) {
        let mut buf = [0u8; TUN_READ_CHUNK];
        match self.tunnel.read(&mut buf) {
            Ok(0) => {},
            Ok(n) => self.route_outbound(buf[..n].to_vec()),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {},
            Err(e) => warn!(device = %self.tunnel.name(), error = %e, "tunnel read failed"),
        }
    }

    fn write(&mut self, _ready: &ReadySet, _events: &mut EventQueue) {
        if let Err(e) = self.write_tunnel() {
            warn!(device = %self.tunnel.name(), error = %e, "tunnel write failed");
            self.tun_out.pop_front();
        }
    }
}
