//! Idle supervision against a manual clock.

use std::os::unix::net::UnixStream;

use mlppp_bundle::{Bundle, BundleSettings, Endpoint, LinkConfig, NullTunnel};
use mlppp_core::{LinkId, Phase, PhysType};
use mlppp_test::prelude::*;

fn idle_bundle(timeout: u32, clock: &ManualClock) -> Bundle {
    let settings = BundleSettings {
        idle_timeout: timeout,
        ..test_settings()
    };
    Bundle::new(Box::new(NullTunnel), settings).with_clock(clock.shared())
}

fn bring_up(bundle: &mut Bundle, config: LinkConfig) -> (LinkId, UnixStream) {
    let id = bundle
        .add_link("deflink", config, Box::new(ScriptedProtocol::immediate()))
        .unwrap();
    let (ours, peer) = UnixStream::pair().unwrap();
    bundle.attach_device(id, Box::new(ours)).unwrap();
    assert_eq!(bundle.phase(), Phase::Network);
    (id, peer)
}

#[test]
fn test_quiet_bundle_closes_after_timeout() {
    let clock = ManualClock::new();
    let mut bundle = idle_bundle(30, &clock);
    let (_id, _peer) = bring_up(&mut bundle, direct_link());
    assert!(bundle.idle_timer_armed());
    assert_eq!(bundle.remaining_idle_time(), Some(30));

    clock.advance_secs(29);
    bundle.run_timers();
    assert_eq!(bundle.phase(), Phase::Network);
    assert_eq!(bundle.remaining_idle_time(), Some(1));

    clock.advance_secs(1);
    bundle.run_timers();
    assert!(bundle.is_dead());
    assert!(!bundle.idle_timer_armed());
}

#[test]
fn test_traffic_pushes_expiry_out() {
    let clock = ManualClock::new();
    let mut bundle = idle_bundle(30, &clock);
    let (id, _peer) = bring_up(&mut bundle, direct_link());

    clock.advance_secs(20);
    bundle.deliver_inbound(id, ipv4_packet(6));

    clock.advance_secs(10);
    bundle.run_timers();
    assert_eq!(bundle.phase(), Phase::Network);
    assert_eq!(bundle.remaining_idle_time(), Some(20));

    clock.advance_secs(20);
    bundle.run_timers();
    assert!(bundle.is_dead());
}

#[test]
fn test_traffic_outside_alive_filter_does_not_count() {
    let clock = ManualClock::new();
    let mut settings = BundleSettings {
        idle_timeout: 10,
        ..test_settings()
    };
    settings.filters.alive = mlppp_bundle::Filter::parse(&["deny icmp", "permit any"]).unwrap();
    let (tunnel, _kernel) = MemoryTunnel::pair().unwrap();
    let mut bundle = Bundle::new(Box::new(tunnel), settings).with_clock(clock.shared());
    let (id, _peer) = bring_up(&mut bundle, direct_link());

    clock.advance_secs(5);
    bundle.deliver_inbound(id, ipv4_packet(1));
    assert_eq!(bundle.tunnel_backlog(), 1);

    clock.advance_secs(5);
    bundle.run_timers();
    assert!(bundle.is_dead());
}

#[test]
fn test_timer_never_fires_outside_network() {
    let clock = ManualClock::new();
    let observer = RecordingObserver::new();
    let mut bundle = idle_bundle(5, &clock).with_observer(Box::new(observer.clone()));
    let (_id, _peer) = bring_up(&mut bundle, direct_link());

    bundle.close("operator", mlppp_bundle::CloseMode::StayDown);
    assert!(!bundle.idle_timer_armed());
    let seen = observer.seen().len();

    clock.advance_secs(60);
    bundle.run_timers();
    assert!(bundle.is_dead());
    assert_eq!(observer.seen().len(), seen);
}

#[test]
fn test_permanent_links_are_exempt() {
    let clock = ManualClock::new();
    let mut bundle = idle_bundle(5, &clock);
    let (_id, _peer) = bring_up(
        &mut bundle,
        LinkConfig {
            phys_type: PhysType::DEDICATED,
            endpoint: Endpoint::None,
        },
    );
    assert!(!bundle.idle_timer_armed());

    clock.advance_secs(60);
    bundle.run_timers();
    assert_eq!(bundle.phase(), Phase::Network);
}

#[test]
fn test_set_idle_timer_reconfigures() {
    let clock = ManualClock::new();
    let mut bundle = idle_bundle(0, &clock);
    let (_id, _peer) = bring_up(&mut bundle, direct_link());
    assert!(!bundle.idle_timer_armed());
    assert_eq!(bundle.remaining_idle_time(), None);

    bundle.set_idle_timer(10);
    assert_eq!(bundle.remaining_idle_time(), Some(10));

    bundle.set_idle_timer(0);
    assert!(!bundle.idle_timer_armed());
    clock.advance_secs(60);
    bundle.run_timers();
    assert_eq!(bundle.phase(), Phase::Network);
}

#[test]
fn test_stopped_timer_keeps_bundle_up() {
    let clock = ManualClock::new();
    let mut bundle = idle_bundle(10, &clock);
    let (_id, _peer) = bring_up(&mut bundle, direct_link());

    bundle.stop_idle_timer();
    assert!(!bundle.idle_timer_armed());
    assert_eq!(bundle.remaining_idle_time(), None);

    clock.advance_secs(60);
    bundle.run_timers();
    assert_eq!(bundle.phase(), Phase::Network);

    bundle.start_idle_timer();
    assert_eq!(bundle.remaining_idle_time(), Some(10));
}

#[test]
fn test_adding_permanent_link_disarms_timer() {
    let clock = ManualClock::new();
    let mut bundle = idle_bundle(10, &clock);
    let (_id, _peer) = bring_up(&mut bundle, direct_link());
    assert!(bundle.idle_timer_armed());

    let perm = LinkConfig {
        phys_type: PhysType::DEDICATED,
        endpoint: Endpoint::None,
    };
    bundle
        .add_link("perm", perm, Box::new(ScriptedProtocol::immediate()))
        .unwrap();
    assert!(!bundle.idle_timer_armed());

    clock.advance_secs(11);
    bundle.run_timers();
    assert_eq!(bundle.phase(), Phase::Network);

    bundle.datalink_remove("perm").unwrap();
    assert!(bundle.idle_timer_armed());
    assert_eq!(bundle.remaining_idle_time(), Some(10));
}
