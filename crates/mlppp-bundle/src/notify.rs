//! Status channel to a supervising process.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use mlppp_core::Phase;
use nix::fcntl::OFlag;
use tracing::{debug, warn};

use crate::error::{BundleError, BundleResult};

/// Writes one `phase <Name>` line per transition.
///
/// Write failures are logged and otherwise ignored.
#[derive(Default)]
pub struct Notifier {
    sink: Option<Box<dyn Write + Send>>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("open", &self.sink.is_some())
            .finish()
    }
}

impl Notifier {
    /// A notifier with nowhere to write.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Write to an already-open sink.
    #[must_use]
    pub fn from_writer(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(Box::new(sink)),
        }
    }

    /// Open `path` for appending (a FIFO or a regular file).
    ///
    /// Never waits for a FIFO reader; lines written while nobody reads
    /// stay in the pipe until it fills, after which they are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Notify`] if the path cannot be opened.
    pub fn open(path: &Path) -> BundleResult<Self> {
        // Read access lets a FIFO open without a reader attached.
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
            .map_err(|source| BundleError::Notify {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::from_writer(file))
    }

    /// Whether there is a channel.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Report a phase change.
    pub fn phase(&mut self, phase: Phase) {
        self.line(&format!("phase {}", phase.name()));
    }

    /// Write one status line.
    pub fn line(&mut self, line: &str) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let res = sink
            .write_all(line.as_bytes())
            .and_then(|()| sink.write_all(b"\n"))
            .and_then(|()| sink.flush());
        if let Err(e) = res {
            warn!(error = %e, "notify channel write failed");
        }
    }

    /// Close the channel.
    pub fn close(&mut self) {
        if self.sink.take().is_some() {
            debug!("notify channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug)]
    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let mut n = Notifier::from_writer(Broken);
        n.phase(Phase::Network);
        assert!(n.is_open());
        n.close();
        assert!(!n.is_open());
    }

    #[test]
    fn test_phase_lines_go_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        let mut n = Notifier::open(&path).unwrap();
        n.phase(Phase::Establish);
        n.phase(Phase::Dead);
        n.close();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "phase Establish\nphase Dead\n");
    }

    #[test]
    fn test_fifo_without_reader_opens() {
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.fifo");
        nix::unistd::mkfifo(&path, nix::sys::stat::Mode::S_IRWXU).unwrap();

        let mut n = Notifier::open(&path).unwrap();
        n.phase(Phase::Network);

        let mut reader = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&path)
            .unwrap();
        let mut buf = [0u8; 64];
        let len = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"phase Network\n");
    }

    #[test]
    fn test_none_ignores_writes() {
        let mut n = Notifier::none();
        n.phase(Phase::Dead);
        assert!(!n.is_open());
    }
}
