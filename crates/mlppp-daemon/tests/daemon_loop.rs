//! The whole event loop over real sockets.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mlppp_config::{Config, LoadOptions, TunnelKind, loader};
use mlppp_core::Phase;
use mlppp_daemon::Daemon;
use mlppp_server::PROMPT;
use mlppp_test::{setup_test_logging, test_dir, test_file_in_dir};

const STEP: Duration = Duration::from_millis(50);

fn config_with_socket(path: &Path) -> Config {
    let mut config = Config::default();
    config.bundle.tunnel = TunnelKind::None;
    config.server.socket = Some(path.to_path_buf());
    config
}

/// Spin the loop until `done` holds or a couple of seconds pass.
fn spin_until(daemon: &mut Daemon, mut done: impl FnMut(&Daemon) -> bool) {
    for _ in 0..40 {
        if done(daemon) {
            return;
        }
        daemon.run_once(STEP).unwrap();
    }
    assert!(done(daemon), "condition never held");
}

/// Read from the client while the daemon keeps running, until `needle` shows up.
fn read_until(daemon: &mut Daemon, client: &mut UnixStream, needle: &str) -> String {
    client.set_read_timeout(Some(STEP)).unwrap();
    let mut seen = String::new();
    let mut buf = [0u8; 512];
    for _ in 0..40 {
        daemon.run_once(STEP).unwrap();
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => seen.push_str(&String::from_utf8_lossy(&buf[..n])),
            Err(_) => {},
        }
        if seen.contains(needle) {
            return seen;
        }
    }
    panic!("never saw {needle:?}, got {seen:?}");
}

#[test]
fn test_admin_session_round_trip() {
    setup_test_logging("debug");
    let dir = test_dir();
    let path = dir.path().join("mlppp.sock");
    let mut daemon = Daemon::from_config(&config_with_socket(&path)).unwrap();

    let mut client = UnixStream::connect(&path).unwrap();
    spin_until(&mut daemon, |d| d.server().session_count() == 1);
    read_until(&mut daemon, &mut client, PROMPT);

    client.write_all(b"show links\n").unwrap();
    let reply = read_until(&mut daemon, &mut client, "Phase: Dead");
    assert!(reply.contains("deflink"));

    client.write_all(b"bogus\n").unwrap();
    read_until(&mut daemon, &mut client, PROMPT);

    client.write_all(b"quit\n").unwrap();
    spin_until(&mut daemon, |d| d.server().session_count() == 0);
    assert!(daemon.iterations() > 0);
}

#[test]
fn test_attached_link_brings_bundle_to_network() {
    let mut config = Config::default();
    config.bundle.tunnel = TunnelKind::None;
    let mut daemon = Daemon::from_config(&config).unwrap();

    let id = daemon.bundle().bundle2datalink("deflink").unwrap().id();
    let (ours, mut peer) = UnixStream::pair().unwrap();
    daemon.bundle_mut().attach_device(id, Box::new(ours)).unwrap();
    assert_eq!(daemon.bundle().phase(), Phase::Network);

    peer.write_all(b"E").unwrap();
    daemon.run_once(STEP).unwrap();
    assert_eq!(daemon.bundle().phase(), Phase::Network);

    drop(peer);
    spin_until(&mut daemon, |d| d.bundle().phase() == Phase::Dead);
}

#[test]
fn test_shutdown_flag_ends_the_loop() {
    let dir = test_dir();
    let path = dir.path().join("mlppp.sock");
    let mut daemon = Daemon::from_config(&config_with_socket(&path)).unwrap();

    let id = daemon.bundle().bundle2datalink("deflink").unwrap().id();
    let (ours, _peer) = UnixStream::pair().unwrap();
    daemon.bundle_mut().attach_device(id, Box::new(ours)).unwrap();

    let shutdown = Arc::new(AtomicBool::new(true));
    daemon.run(&shutdown).unwrap();

    assert!(shutdown.load(Ordering::SeqCst));
    assert!(daemon.bundle().is_dead());
    assert!(daemon.bundle().exit_requested());
}

#[test]
fn test_daemon_from_config_file() {
    let dir = test_dir();
    let socket = dir.path().join("admin.sock");
    let file = test_file_in_dir(
        &dir,
        "mlppp.toml",
        &format!(
            "[bundle]\ntunnel = \"none\"\nidle_timeout = 0\n\n\
             [server]\nsocket = \"{}\"\nsocket_mode = \"0600\"\n\n\
             [[links]]\nname = \"modem\"\ntype = \"auto\"\n\n\
             [[links]]\nname = \"cable\"\ntype = \"dedicated\"\n",
            socket.display()
        ),
    );
    let resolved = loader::load_with(&LoadOptions {
        explicit_file: Some(file),
        ..LoadOptions::default()
    })
    .unwrap();

    let mut daemon = Daemon::from_config(&resolved.config).unwrap();
    assert_eq!(daemon.bundle().links().len(), 2);
    assert_eq!(daemon.bundle().settings().idle_timeout, 0);
    assert_eq!(daemon.server().socket_path(), Some(socket.as_path()));

    assert!(daemon.server_mut().close());
    assert!(!socket.exists());
    assert!(!daemon.server().is_open());
}
