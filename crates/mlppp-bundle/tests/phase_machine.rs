//! Phase machine behaviour driven through link signals.

use std::os::unix::net::{UnixListener, UnixStream};

use mlppp_bundle::{
    Bundle, BundleSettings, CloseMode, Endpoint, LinkConfig, LinkState, Notifier, NullTunnel,
};
use mlppp_core::{Layer, LinkId, LinkSignal, Phase, PhysType};
use mlppp_test::prelude::*;

fn attach(bundle: &mut Bundle, name: &str, protocol: ScriptedProtocol) -> (LinkId, UnixStream) {
    let id = bundle.add_link(name, direct_link(), Box::new(protocol)).unwrap();
    let (ours, peer) = UnixStream::pair().unwrap();
    bundle.attach_device(id, Box::new(ours)).unwrap();
    (id, peer)
}

fn negotiate(bundle: &mut Bundle, id: LinkId) {
    bundle.handle_link_signal(id, LinkSignal::Established);
    bundle.handle_link_signal(id, LinkSignal::Authenticated);
    bundle.handle_link_signal(id, LinkSignal::LayerUp(Layer::Ipcp));
}

#[test]
fn test_every_transition_follows_the_table() {
    setup_test_logging("debug");
    let observer = RecordingObserver::new();
    let mut bundle = test_bundle().with_observer(Box::new(observer.clone()));

    let (id, _peer) = attach(&mut bundle, "deflink", ScriptedProtocol::new());
    negotiate(&mut bundle, id);
    bundle.close("operator", CloseMode::StayDown);

    assert_eq!(
        observer.phases(),
        vec![
            Phase::Establish,
            Phase::Authenticate,
            Phase::Network,
            Phase::Terminate,
            Phase::Dead
        ]
    );
    for seen in observer.seen() {
        if let Observed::Phase(from, to) = seen {
            assert!(from.can_transition_to(to), "{from} -> {to}");
        }
    }
}

#[test]
fn test_network_needs_authentication() {
    let mut bundle = test_bundle();
    let (id, _peer) = attach(&mut bundle, "deflink", ScriptedProtocol::new());

    bundle.handle_link_signal(id, LinkSignal::Established);
    bundle.handle_link_signal(id, LinkSignal::LayerUp(Layer::Ipcp));
    assert_eq!(bundle.phase(), Phase::Authenticate);

    bundle.handle_link_signal(id, LinkSignal::Authenticated);
    assert_eq!(bundle.phase(), Phase::Network);
}

#[test]
fn test_layer_up_only_advances_from_authenticate() {
    let mut bundle = test_bundle();
    let (id, _peer) = attach(&mut bundle, "deflink", ScriptedProtocol::new());
    assert_eq!(bundle.phase(), Phase::Establish);

    bundle.handle_link_signal(id, LinkSignal::LayerUp(Layer::Ipcp));
    assert_eq!(bundle.phase(), Phase::Establish);

    bundle.handle_link_signal(id, LinkSignal::Established);
    assert_eq!(bundle.phase(), Phase::Authenticate);
}

#[test]
fn test_multilink_waits_for_mp() {
    let settings = BundleSettings {
        multilink: true,
        ..test_settings()
    };
    let mut bundle = Bundle::new(Box::new(NullTunnel), settings);
    let (id, _peer) = attach(&mut bundle, "deflink", ScriptedProtocol::new());
    negotiate(&mut bundle, id);
    assert_eq!(bundle.phase(), Phase::Authenticate);

    bundle.handle_link_signal(id, LinkSignal::LayerUp(Layer::Mp));
    assert_eq!(bundle.phase(), Phase::Network);
    assert!(bundle.ncp().multilink());
}

#[test]
fn test_auth_failure_goes_straight_to_dead() {
    let observer = RecordingObserver::new();
    let mut bundle = test_bundle().with_observer(Box::new(observer.clone()));
    let (id, _peer) = attach(&mut bundle, "deflink", ScriptedProtocol::new());
    bundle.handle_link_signal(id, LinkSignal::Established);
    bundle.handle_link_signal(id, LinkSignal::AuthFailed);

    assert!(bundle.is_dead());
    assert!(!observer.phases().contains(&Phase::Network));
    assert!(bundle.links().get(id).unwrap().stay_down());
}

#[test]
fn test_close_waits_for_slow_link() {
    let protocol = ScriptedProtocol::immediate().on_stop(Vec::new());
    let mut bundle = test_bundle();
    let (id, _peer) = attach(&mut bundle, "deflink", protocol);
    assert_eq!(bundle.phase(), Phase::Network);

    bundle.close("operator", CloseMode::StayDown);
    assert_eq!(bundle.phase(), Phase::Terminate);
    assert!(!bundle.is_dead());
    assert_eq!(bundle.links().get(id).unwrap().state(), LinkState::Closing);

    bundle.handle_link_signal(id, LinkSignal::Closed);
    assert!(bundle.is_dead());
}

#[test]
fn test_close_from_any_phase_ends_dead() {
    let scripts: [&[LinkSignal]; 3] = [
        &[],
        &[LinkSignal::Established],
        &[
            LinkSignal::Established,
            LinkSignal::Authenticated,
            LinkSignal::LayerUp(Layer::Ipcp),
        ],
    ];
    for (script, expected) in scripts
        .iter()
        .zip([Phase::Establish, Phase::Authenticate, Phase::Network])
    {
        let mut bundle = test_bundle();
        assert!(bundle.is_dead());
        let protocol = ScriptedProtocol::new().on_start(script.to_vec());
        let (_id, _peer) = attach(&mut bundle, "deflink", protocol);
        assert_eq!(bundle.phase(), expected);

        bundle.close("operator", CloseMode::StayDown);
        assert!(bundle.is_dead(), "close from {expected}");
        bundle.close("again", CloseMode::StayDown);
        assert!(bundle.is_dead());
    }
}

#[test]
fn test_ncp_loss_in_network_closes_bundle() {
    let mut bundle = test_bundle();
    let (id, _peer) = attach(&mut bundle, "deflink", ScriptedProtocol::immediate());
    bundle.handle_link_signal(id, LinkSignal::LayerDown(Layer::Ipcp));
    assert!(bundle.is_dead());
}

#[test]
fn test_losing_one_of_two_links_keeps_network() {
    let mut bundle = test_bundle();
    let (a, _pa) = attach(&mut bundle, "a", ScriptedProtocol::immediate());
    let (_b, _pb) = attach(&mut bundle, "b", ScriptedProtocol::immediate());

    bundle.handle_link_signal(a, LinkSignal::Lost);
    assert_eq!(bundle.phase(), Phase::Network);
    assert_eq!(bundle.links().up_count(), 1);
}

#[test]
fn test_notifier_sees_every_phase() {
    let sink = SharedWriter::new();
    let mut bundle = test_bundle().with_notifier(Notifier::from_writer(sink.clone()));
    let (_id, _peer) = attach(&mut bundle, "deflink", ScriptedProtocol::immediate());
    bundle.close("operator", CloseMode::StayDown);

    assert_eq!(
        sink.contents(),
        "phase Establish\nphase Authenticate\nphase Network\nphase Terminate\nphase Dead\n"
    );
}

#[test]
fn test_cleanup_requests_exit_and_refuses_open() {
    let mut bundle = test_bundle();
    let (_id, _peer) = attach(&mut bundle, "deflink", ScriptedProtocol::immediate());

    bundle.begin_cleanup();
    assert!(bundle.is_cleaning_up());
    assert!(bundle.is_dead());
    assert!(bundle.exit_requested());
    assert_eq!(bundle.open("late", PhysType::ALL), 0);
    assert!(bundle.is_dead());
}

#[test]
fn test_permanent_link_is_redialled_after_closing() {
    let dir = test_dir();
    let path = dir.path().join("peer.sock");
    let _listener = UnixListener::bind(&path).unwrap();

    let protocol = ScriptedProtocol::immediate();
    let mut bundle = test_bundle();
    let id = bundle
        .add_link(
            "ddial",
            LinkConfig {
                phys_type: PhysType::DDIAL,
                endpoint: Endpoint::Unix(path),
            },
            Box::new(protocol.clone()),
        )
        .unwrap();

    assert_eq!(bundle.open("startup", PhysType::ALL), 1);
    assert_eq!(bundle.phase(), Phase::Network);
    assert!(!bundle.idle_timer_armed());

    bundle.handle_link_signal(id, LinkSignal::Lost);
    assert!(bundle.is_dead());
    bundle.handle_link_signal(id, LinkSignal::Closed);

    assert_eq!(bundle.phase(), Phase::Network);
    assert_eq!(protocol.log().starts, 2);

    bundle.close("operator", CloseMode::StayDown);
    assert!(bundle.is_dead());
    assert_eq!(protocol.log().starts, 2);
}

#[test]
fn test_link_attached_while_terminating_starts_new_session() {
    let observer = RecordingObserver::new();
    let mut bundle = test_bundle().with_observer(Box::new(observer.clone()));
    let slow = ScriptedProtocol::immediate().on_stop(Vec::new());
    let (a, _pa) = attach(&mut bundle, "a", slow);
    bundle.close("operator", CloseMode::StayDown);
    assert_eq!(bundle.phase(), Phase::Terminate);

    let (b, _pb) = attach(&mut bundle, "b", ScriptedProtocol::immediate());
    assert_eq!(bundle.phase(), Phase::Terminate);

    bundle.link_closed(a);
    assert_eq!(bundle.phase(), Phase::Network);
    assert_eq!(bundle.links().get(b).unwrap().state(), LinkState::Open);
    assert_eq!(bundle.links().up_count(), 1);
    for seen in observer.seen() {
        if let Observed::Phase(from, to) = seen {
            assert!(from.can_transition_to(to), "{from} -> {to}");
        }
    }
}

#[test]
fn test_link_lost_while_terminating_still_ends_dead() {
    let mut bundle = test_bundle();
    let slow = ScriptedProtocol::immediate().on_stop(Vec::new());
    let (a, _pa) = attach(&mut bundle, "a", slow);
    bundle.close("operator", CloseMode::StayDown);

    let (b, _pb) = attach(&mut bundle, "b", ScriptedProtocol::immediate());
    bundle.link_lost(b, true);
    assert_eq!(bundle.phase(), Phase::Terminate);

    bundle.link_closed(a);
    assert!(bundle.is_dead());
}

#[test]
fn test_permanent_links_redialled_while_terminating_reach_network() {
    let dir = test_dir();
    let path = dir.path().join("peer.sock");
    let _listener = UnixListener::bind(&path).unwrap();

    let mut bundle = test_bundle();
    let mut ids = Vec::new();
    for name in ["perm1", "perm2"] {
        let protocol = ScriptedProtocol::immediate().on_stop(Vec::new());
        let id = bundle
            .add_link(
                name,
                LinkConfig {
                    phys_type: PhysType::DEDICATED,
                    endpoint: Endpoint::Unix(path.clone()),
                },
                Box::new(protocol),
            )
            .unwrap();
        ids.push(id);
    }

    assert_eq!(bundle.open("startup", PhysType::ALL), 2);
    assert_eq!(bundle.phase(), Phase::Network);

    bundle.handle_link_signal(ids[0], LinkSignal::LayerDown(Layer::Ipcp));
    assert_eq!(bundle.phase(), Phase::Terminate);

    bundle.handle_link_signal(ids[0], LinkSignal::Closed);
    assert_eq!(bundle.phase(), Phase::Terminate);
    bundle.handle_link_signal(ids[1], LinkSignal::Closed);

    assert_eq!(bundle.phase(), Phase::Network);
    assert_eq!(bundle.links().up_count(), 2);
}
