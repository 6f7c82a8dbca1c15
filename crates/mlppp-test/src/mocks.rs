//! Deterministic stand-ins for the bundle's collaborators.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use mlppp_bundle::{LayerObserver, LinkProtocol, Tunnel};
use mlppp_core::{Clock, Layer, LinkSignal, Phase};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// A clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now = now.checked_add(by).unwrap_or(*now);
    }

    /// Move time forward by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// A shared handle for [`mlppp_bundle::Bundle::with_clock`].
    #[must_use]
    pub fn shared(&self) -> Arc<dyn Clock> {
        Arc::new(self.clone())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }
}

// ---------------------------------------------------------------------------
// Link protocol
// ---------------------------------------------------------------------------

/// What a [`ScriptedProtocol`] saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolLog {
    /// Times `start` was called.
    pub starts: usize,
    /// Times `stop` was called.
    pub stops: usize,
    /// Bytes handed to `input`.
    pub inputs: Vec<Vec<u8>>,
    /// Packets handed to `encapsulate`.
    pub frames: Vec<Vec<u8>>,
}

/// A link stack that answers with canned signals.
///
/// By default `start` reports nothing (the link stays opening until the
/// test feeds signals in), `input` reports each read as a packet and `stop`
/// reports `Closed` at once. Clones share one [`ProtocolLog`].
#[derive(Debug, Clone)]
pub struct ScriptedProtocol {
    on_start: Vec<LinkSignal>,
    on_stop: Vec<LinkSignal>,
    log: Arc<Mutex<ProtocolLog>>,
}

impl ScriptedProtocol {
    /// A stack that stays silent on start.
    #[must_use]
    pub fn new() -> Self {
        Self {
            on_start: Vec::new(),
            on_stop: vec![LinkSignal::Closed],
            log: Arc::default(),
        }
    }

    /// A stack that negotiates, authenticates and brings IPCP up as soon
    /// as it starts.
    #[must_use]
    pub fn immediate() -> Self {
        Self::new().on_start(vec![
            LinkSignal::Established,
            LinkSignal::Authenticated,
            LinkSignal::LayerUp(Layer::Ipcp),
        ])
    }

    /// Signals reported from `start`.
    #[must_use]
    pub fn on_start(mut self, signals: Vec<LinkSignal>) -> Self {
        self.on_start = signals;
        self
    }

    /// Signals reported from `stop`. Empty models a stack that needs a
    /// round trip before the link is closed.
    #[must_use]
    pub fn on_stop(mut self, signals: Vec<LinkSignal>) -> Self {
        self.on_stop = signals;
        self
    }

    /// Snapshot of what the stack saw.
    #[must_use]
    pub fn log(&self) -> ProtocolLog {
        lock(&self.log).clone()
    }
}

impl Default for ScriptedProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkProtocol for ScriptedProtocol {
    fn start(&mut self) -> Vec<LinkSignal> {
        let mut log = lock(&self.log);
        log.starts = log.starts.saturating_add(1);
        self.on_start.clone()
    }

    fn input(&mut self, bytes: &[u8]) -> Vec<LinkSignal> {
        lock(&self.log).inputs.push(bytes.to_vec());
        vec![LinkSignal::Packet(bytes.to_vec())]
    }

    fn encapsulate(&mut self, packet: &[u8]) -> Vec<u8> {
        lock(&self.log).frames.push(packet.to_vec());
        packet.to_vec()
    }

    fn stop(&mut self) -> Vec<LinkSignal> {
        let mut log = lock(&self.log);
        log.stops = log.stops.saturating_add(1);
        self.on_stop.clone()
    }

    fn duplicate(&self) -> Box<dyn LinkProtocol> {
        Box::new(Self {
            on_start: self.on_start.clone(),
            on_stop: self.on_stop.clone(),
            log: Arc::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// One notification seen by a [`RecordingObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    /// `layer_up`.
    Up(Layer),
    /// `layer_down`.
    Down(Layer),
    /// `phase_changed`.
    Phase(Phase, Phase),
}

/// Records every notification. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    seen: Arc<Mutex<Vec<Observed>>>,
}

impl RecordingObserver {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything seen so far.
    #[must_use]
    pub fn seen(&self) -> Vec<Observed> {
        lock(&self.seen).clone()
    }

    /// Phases entered, in order.
    #[must_use]
    pub fn phases(&self) -> Vec<Phase> {
        lock(&self.seen)
            .iter()
            .filter_map(|o| match o {
                Observed::Phase(_, to) => Some(*to),
                Observed::Up(_) | Observed::Down(_) => None,
            })
            .collect()
    }
}

impl LayerObserver for RecordingObserver {
    fn layer_up(&mut self, layer: Layer) {
        lock(&self.seen).push(Observed::Up(layer));
    }

    fn layer_down(&mut self, layer: Layer) {
        lock(&self.seen).push(Observed::Down(layer));
    }

    fn phase_changed(&mut self, from: Phase, to: Phase) {
        lock(&self.seen).push(Observed::Phase(from, to));
    }
}

// ---------------------------------------------------------------------------
// Writers and tunnels
// ---------------------------------------------------------------------------

/// An in-memory sink whose contents stay readable after it is handed off.
#[derive(Debug, Clone, Default)]
pub struct SharedWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.buf)).into_owned()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.buf).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A tunnel backed by one end of a socket pair.
#[derive(Debug)]
pub struct MemoryTunnel {
    stream: UnixStream,
}

impl MemoryTunnel {
    /// A tunnel plus the "kernel" end of it.
    ///
    /// # Errors
    ///
    /// Propagates socket pair creation failures.
    pub fn pair() -> io::Result<(Self, UnixStream)> {
        let (ours, theirs) = UnixStream::pair()?;
        Ok((Self { stream: ours }, theirs))
    }
}

impl Read for MemoryTunnel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for MemoryTunnel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Tunnel for MemoryTunnel {
    fn name(&self) -> &str {
        "memory"
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.stream.as_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let t0 = clock.now();
        other.advance_secs(5);
        assert_eq!(clock.now().duration_since(t0), Duration::from_secs(5));
    }

    #[test]
    fn test_scripted_protocol_records() {
        let p = ScriptedProtocol::immediate();
        let mut boxed: Box<dyn LinkProtocol> = Box::new(p.clone());
        assert_eq!(boxed.start().len(), 3);
        boxed.encapsulate(b"pkt");
        assert_eq!(boxed.stop(), vec![LinkSignal::Closed]);
        let log = p.log();
        assert_eq!(log.starts, 1);
        assert_eq!(log.stops, 1);
        assert_eq!(log.frames, vec![b"pkt".to_vec()]);
    }

    #[test]
    fn test_shared_writer_keeps_contents() {
        let w = SharedWriter::new();
        let mut handle = w.clone();
        handle.write_all(b"phase Dead\n").unwrap();
        assert_eq!(w.contents(), "phase Dead\n");
    }
}
