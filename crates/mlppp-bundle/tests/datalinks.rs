//! Datalink membership and the data path.

use std::os::unix::net::{UnixListener, UnixStream};

use mlppp_bundle::{
    Bundle, BundleError, BundleSettings, Endpoint, Filter, FilterRule, LinkState,
    MAX_HELD_PACKETS, NullTunnel, PacketMatcher,
};
use mlppp_core::{LinkId, LinkSignal, Phase, PhysType};
use mlppp_test::prelude::*;

fn attach(bundle: &mut Bundle, name: &str) -> (LinkId, UnixStream) {
    let id = bundle
        .add_link(name, direct_link(), Box::new(ScriptedProtocol::immediate()))
        .unwrap();
    let (ours, peer) = UnixStream::pair().unwrap();
    bundle.attach_device(id, Box::new(ours)).unwrap();
    (id, peer)
}

#[test]
fn test_clean_never_drops_last_usable_link_in_network() {
    let mut bundle = test_bundle();
    let (up, _peer) = attach(&mut bundle, "deflink");
    bundle.add_link("spare", direct_link(), Box::new(ScriptedProtocol::new())).unwrap();
    let (gone, _gp) = attach(&mut bundle, "flaky");
    bundle.handle_link_signal(gone, LinkSignal::Lost);
    assert_eq!(bundle.phase(), Phase::Network);

    let mut removed = bundle.clean_datalinks();
    removed.sort();
    assert_eq!(removed, vec!["flaky".to_string(), "spare".to_string()]);
    assert_eq!(bundle.phase(), Phase::Network);
    assert_eq!(bundle.links().ids(), vec![up]);

    assert!(bundle.clean_datalinks().is_empty());
    assert_eq!(bundle.links().len(), 1);
}

#[test]
fn test_clean_keeps_redialable_links() {
    let mut bundle = test_bundle();
    bundle
        .add_link("dialer", auto_link(Endpoint::None), Box::new(ScriptedProtocol::new()))
        .unwrap();
    bundle.add_link("cable", direct_link(), Box::new(ScriptedProtocol::new())).unwrap();

    assert_eq!(bundle.clean_datalinks(), vec!["cable".to_string()]);
    assert!(bundle.bundle2datalink("dialer").is_some());
    assert_eq!(bundle.phys_type(), PhysType::AUTO);
}

#[test]
fn test_clone_and_remove() {
    let mut bundle = test_bundle();
    bundle
        .add_link("deflink", auto_link(Endpoint::None), Box::new(ScriptedProtocol::new()))
        .unwrap();

    let id = bundle.datalink_clone("deflink", "a-rather-long-clone-name").unwrap();
    let clone = bundle.links().get(id).unwrap();
    assert_eq!(clone.name(), "a-rather-long-clone-");
    assert_eq!(clone.state(), LinkState::Closed);
    assert_eq!(clone.phys_type(), PhysType::AUTO);

    assert!(matches!(
        bundle.datalink_clone("nope", "x"),
        Err(BundleError::UnknownLink(_))
    ));
    assert!(matches!(
        bundle.datalink_clone("deflink", "a-rather-long-clone-name-again"),
        Err(BundleError::DuplicateLink(_))
    ));

    bundle.datalink_remove("a-rather-long-clone-").unwrap();
    assert_eq!(bundle.links().len(), 1);
}

#[test]
fn test_down_closes_one_link() {
    let mut bundle = test_bundle();
    let (a, _pa) = attach(&mut bundle, "a");
    let (b, _pb) = attach(&mut bundle, "b");

    bundle.datalink_down("b").unwrap();
    assert_eq!(bundle.phase(), Phase::Network);
    assert!(bundle.links().get(a).unwrap().is_up());
    assert!(bundle.links().get(b).unwrap().is_closed());

    bundle.datalink_down("a").unwrap();
    assert!(bundle.is_dead());
    assert!(matches!(bundle.datalink_down("c"), Err(BundleError::UnknownLink(_))));
}

#[test]
fn test_demand_dial_holds_packet_until_network() {
    let dir = test_dir();
    let path = dir.path().join("modem.sock");
    let _listener = UnixListener::bind(&path).unwrap();

    let mut settings = BundleSettings::default();
    settings.filters.dial = Filter::parse(&["permit tcp"]).unwrap();
    let protocol = ScriptedProtocol::immediate();
    let mut bundle = Bundle::new(Box::new(NullTunnel), settings);
    let id = bundle
        .add_link("dialer", auto_link(Endpoint::Unix(path)), Box::new(protocol.clone()))
        .unwrap();

    bundle.route_outbound(ipv4_packet(17));
    assert!(bundle.is_dead());
    assert_eq!(protocol.log().starts, 0);

    let tcp = ipv4_packet(6);
    bundle.route_outbound(tcp.clone());
    assert_eq!(bundle.phase(), Phase::Network);
    assert_eq!(bundle.link_backlog(), 0);
    assert_eq!(bundle.links().get(id).unwrap().queue_len(), 1);
    assert_eq!(protocol.log().frames, vec![tcp]);
}

#[test]
fn test_demand_dial_without_auto_link_drops_packet() {
    let mut settings = BundleSettings::default();
    settings.filters.dial = Filter::parse(&["permit any"]).unwrap();
    let mut bundle = Bundle::new(Box::new(NullTunnel), settings);
    bundle.add_link("cable", direct_link(), Box::new(ScriptedProtocol::new())).unwrap();

    bundle.route_outbound(ipv4_packet(6));
    assert!(bundle.is_dead());
    assert_eq!(bundle.link_backlog(), 0);
}

#[test]
fn test_fill_queues_prefers_shortest_queue() {
    let mut bundle = test_bundle();
    let (a, _pa) = attach(&mut bundle, "a");
    let (b, _pb) = attach(&mut bundle, "b");

    for _ in 0..3 {
        bundle.route_outbound(ipv4_packet(6));
    }
    assert_eq!(bundle.links().get(a).unwrap().queue_len(), 2);
    assert_eq!(bundle.links().get(b).unwrap().queue_len(), 1);
}

#[test]
fn test_out_filter_drops_before_queueing() {
    let mut settings = BundleSettings::default();
    settings.filters.outgoing = Filter::parse(&["deny icmp", "permit any"]).unwrap();
    let mut bundle = Bundle::new(Box::new(NullTunnel), settings);
    let (a, _pa) = attach(&mut bundle, "a");

    bundle.route_outbound(ipv4_packet(1));
    bundle.route_outbound(ipv4_packet(17));
    assert_eq!(bundle.links().get(a).unwrap().queue_len(), 1);
}

/// Matches nothing, so any rule set denies every packet.
#[derive(Debug)]
struct NeverMatches;

impl PacketMatcher for NeverMatches {
    fn matches(&self, _rule: &FilterRule, _packet: &[u8]) -> bool {
        false
    }
}

#[test]
fn test_custom_matcher_decides_filters() {
    let mut settings = BundleSettings::default();
    settings.filters.outgoing = Filter::parse(&["permit any"]).unwrap();
    let mut bundle =
        Bundle::new(Box::new(NullTunnel), settings).with_matcher(Box::new(NeverMatches));
    let (a, _pa) = attach(&mut bundle, "a");

    bundle.route_outbound(ipv4_packet(6));
    assert_eq!(bundle.links().get(a).unwrap().queue_len(), 0);
}

#[test]
fn test_show_links_after_membership_changes() {
    let mut bundle = test_bundle();
    let (_a, _pa) = attach(&mut bundle, "deflink");
    bundle.datalink_clone("deflink", "spare").unwrap();
    assert_eq!(bundle.show_links(), "deflink: open\nspare: closed\nPhase: Network\n");
}

#[test]
fn test_backlogs_stay_bounded_before_network() {
    let (tunnel, _kernel) = MemoryTunnel::pair().unwrap();
    let mut bundle = Bundle::new(Box::new(tunnel), test_settings());
    let protocol = ScriptedProtocol::new().on_start(vec![LinkSignal::Established]);
    let id = bundle.add_link("deflink", direct_link(), Box::new(protocol)).unwrap();
    let (ours, _peer) = UnixStream::pair().unwrap();
    bundle.attach_device(id, Box::new(ours)).unwrap();
    assert_eq!(bundle.phase(), Phase::Authenticate);

    for _ in 0..10_000 {
        bundle.route_outbound(ipv4_packet(6));
        bundle.deliver_inbound(id, ipv4_packet(6));
    }
    assert_eq!(bundle.link_backlog(), MAX_HELD_PACKETS);
    assert_eq!(bundle.tunnel_backlog(), MAX_HELD_PACKETS);

    bundle.handle_link_signal(id, LinkSignal::Authenticated);
    bundle.handle_link_signal(id, LinkSignal::LayerUp(mlppp_core::Layer::Ipcp));
    assert_eq!(bundle.phase(), Phase::Network);
    assert_eq!(bundle.link_backlog(), 0);
    assert_eq!(bundle.links().get(id).unwrap().queue_len(), MAX_HELD_PACKETS);
}
