use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use coremux_channel::{ChannelConfig, LoopbackChannel};
use coremux_frame::{EndpointId, CONTROL_ID};
use coremux_mux::{Dispatch, DropReason, EndpointConfig, Multiplexer, MuxConfig, MuxError};
use coremux_peer::{ControlMessage, HandshakeConfig, OfferSeq, PeerError, Role, Session};

const WAIT: Duration = Duration::from_secs(5);

type LoopbackSession = Session<LoopbackChannel>;

fn session_pair(config: HandshakeConfig) -> (LoopbackSession, LoopbackSession) {
    let (left, right) = LoopbackChannel::pair(ChannelConfig::default());
    let follower_config = config.clone();
    let follower = thread::spawn(move || {
        Session::connect(right, MuxConfig::default(), Role::Follower, follower_config)
    });
    let initiator = Session::connect(left, MuxConfig::default(), Role::Initiator, config).unwrap();
    (initiator, follower.join().unwrap().unwrap())
}

fn pair_with(
    initiator_mux: MuxConfig,
    follower_mux: MuxConfig,
    config: HandshakeConfig,
) -> (LoopbackSession, LoopbackSession) {
    let (left, right) = LoopbackChannel::pair(ChannelConfig::default());
    let follower_config = config.clone();
    let follower = thread::spawn(move || {
        Session::connect(right, follower_mux, Role::Follower, follower_config)
    });
    let initiator = Session::connect(left, initiator_mux, Role::Initiator, config).unwrap();
    (initiator, follower.join().unwrap().unwrap())
}

/// Bare multiplexer that speaks the control protocol by hand.
struct ManualPeer {
    mux: Arc<Multiplexer<LoopbackChannel>>,
    _control: Arc<EndpointConfig>,
    seen: mpsc::Receiver<ControlMessage>,
}

impl ManualPeer {
    /// Opens `channel`; the session on the other end must be opening concurrently.
    fn open(channel: LoopbackChannel) -> Self {
        let mux = Multiplexer::init(channel, MuxConfig::default()).unwrap();
        let (tx, seen) = mpsc::channel();
        let tx = Mutex::new(tx);
        let control = Arc::new(EndpointConfig::new("manual-control", move |payload: &[u8]| {
            let msg = ControlMessage::from_payload(payload).unwrap();
            let _ = tx.lock().unwrap().send(msg);
        }));
        mux.open_with_control(&control).unwrap();
        Self {
            mux,
            _control: control,
            seen,
        }
    }

    fn send(&self, msg: &ControlMessage) {
        self.mux
            .send(CONTROL_ID, &msg.to_payload().unwrap())
            .unwrap();
    }

    fn next(&self) -> ControlMessage {
        self.seen.recv_timeout(WAIT).unwrap()
    }

    fn next_bind(&self) -> (EndpointId, String, OfferSeq) {
        match self.next() {
            ControlMessage::Bind { id, name, offer } => (id, name, offer),
            other => panic!("expected bind, got {other:?}"),
        }
    }
}

fn initiator_against_manual_peer(config: HandshakeConfig) -> (LoopbackSession, ManualPeer) {
    let (left, right) = LoopbackChannel::pair(ChannelConfig::default());
    let initiator = thread::spawn(move || {
        Session::connect(left, MuxConfig::default(), Role::Initiator, config)
    });
    let peer = ManualPeer::open(right);
    (initiator.join().unwrap().unwrap(), peer)
}

fn sink() -> (
    impl Fn(&[u8]) + Send + Sync + 'static,
    mpsc::Receiver<Vec<u8>>,
) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback = move |payload: &[u8]| {
        let _ = tx.lock().unwrap().send(payload.to_vec());
    };
    (callback, rx)
}

#[test]
fn both_sides_agree_on_endpoint_id() {
    let (initiator, follower) = session_pair(HandshakeConfig::default());

    let follower_side = thread::spawn(move || {
        let (callback, rx) = sink();
        let endpoint = follower.register("telemetry", callback).unwrap();
        (follower, endpoint, rx)
    });
    let (callback, initiator_rx) = sink();
    let local = initiator.register("telemetry", callback).unwrap();
    let (follower, remote, follower_rx) = follower_side.join().unwrap();

    assert_eq!(local.id(), remote.id());
    assert_eq!(local.name(), "telemetry");

    local.send(b"ping").unwrap();
    assert_eq!(follower_rx.recv_timeout(WAIT).unwrap(), b"ping".to_vec());
    remote.send(b"pong").unwrap();
    assert_eq!(initiator_rx.recv_timeout(WAIT).unwrap(), b"pong".to_vec());

    assert_eq!(
        follower.multiplexer().occupied_ids(),
        vec![remote.id()]
    );
}

#[test]
fn follower_accepts_offer_that_arrived_first() {
    let (initiator, follower) = session_pair(HandshakeConfig::default());

    // Initiator blocks for the ack; the offer is already queued when the
    // follower registers.
    let initiator_side = thread::spawn(move || {
        let (callback, _rx) = sink();
        let endpoint = initiator.register("logs", callback).unwrap();
        (initiator, endpoint)
    });

    let deadline = std::time::Instant::now() + WAIT;
    while follower.pending_offers().is_empty() {
        assert!(std::time::Instant::now() < deadline, "offer never arrived");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(follower.pending_offers(), vec!["logs".to_string()]);

    let (callback, _rx) = sink();
    let remote = follower.register("logs", callback).unwrap();
    let (_initiator, local) = initiator_side.join().unwrap();

    assert_eq!(local.id(), remote.id());
    assert!(follower.pending_offers().is_empty());
}

#[test]
fn several_endpoints_get_distinct_ids() {
    let (initiator, follower) = session_pair(HandshakeConfig::default());
    let names = ["alpha", "beta", "gamma"];

    let follower_side = thread::spawn(move || {
        // Registered in reverse order: offers are matched by name.
        let endpoints: Vec<_> = names
            .iter()
            .rev()
            .map(|name| follower.register(name, |_payload: &[u8]| {}).unwrap())
            .collect();
        (follower, endpoints)
    });
    let locals: Vec<_> = names
        .iter()
        .map(|name| {
            let initiator = initiator.clone();
            let name = name.to_string();
            thread::spawn(move || initiator.register(&name, |_payload: &[u8]| {}).unwrap())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    let (_follower, remotes) = follower_side.join().unwrap();

    let mut ids: Vec<_> = locals.iter().map(|endpoint| endpoint.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), names.len());

    for local in &locals {
        let remote = remotes
            .iter()
            .find(|remote| remote.name() == local.name())
            .unwrap();
        assert_eq!(local.id(), remote.id());
    }
}

#[test]
fn close_unbinds_remote_endpoint() {
    let (initiator, follower) = session_pair(HandshakeConfig::default());

    let follower_side = thread::spawn(move || {
        let (callback, rx) = sink();
        let endpoint = follower.register("status", callback).unwrap();
        (follower, endpoint, rx)
    });
    let local = initiator.register("status", |_payload: &[u8]| {}).unwrap();
    let (follower, remote, _rx) = follower_side.join().unwrap();
    let id = local.id();

    local.close().unwrap();
    assert!(initiator.multiplexer().get_slot(id).unwrap().is_none());

    let deadline = std::time::Instant::now() + WAIT;
    while remote.is_connected() {
        assert!(std::time::Instant::now() < deadline, "unbind never arrived");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(follower.multiplexer().get_slot(id).unwrap().is_none());
    assert!(matches!(
        remote.send(b"late"),
        Err(PeerError::Disconnected(name)) if name == "status"
    ));

    // Frames still in flight for the cleared id are dropped.
    assert_eq!(
        follower.multiplexer().dispatch(&[id, 1]),
        Dispatch::Dropped(DropReason::Unoccupied)
    );
}

#[test]
fn initiator_timeout_frees_slot() {
    let config = HandshakeConfig {
        timeout: Some(Duration::from_millis(100)),
        ..HandshakeConfig::default()
    };
    let (initiator, _follower) = session_pair(config);

    let err = initiator
        .register("nobody-home", |_payload: &[u8]| {})
        .unwrap_err();
    assert!(matches!(err, PeerError::Timeout(_)));
    assert!(initiator.multiplexer().occupied_ids().is_empty());

    // The name is free again after the failed attempt.
    let err = initiator
        .register("nobody-home", |_payload: &[u8]| {})
        .unwrap_err();
    assert!(matches!(err, PeerError::Timeout(_)));
}

#[test]
fn withdrawn_offer_is_forgotten() {
    let config = HandshakeConfig {
        timeout: Some(Duration::from_millis(100)),
        ..HandshakeConfig::default()
    };
    let (initiator, follower) = session_pair(config);

    assert!(initiator.register("late", |_payload: &[u8]| {}).is_err());

    // Both the offer and its withdrawal have been handled once two control
    // frames are counted and no offer is pending.
    let deadline = std::time::Instant::now() + WAIT;
    while follower.multiplexer().stats().control_frames < 2
        || !follower.pending_offers().is_empty()
    {
        assert!(std::time::Instant::now() < deadline, "offer never withdrawn");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(matches!(
        follower.register("late", |_payload: &[u8]| {}),
        Err(PeerError::Timeout(_))
    ));
}

#[test]
fn rejects_bad_and_duplicate_names() {
    let config = HandshakeConfig {
        timeout: Some(Duration::from_millis(200)),
        ..HandshakeConfig::default()
    };
    let (initiator, follower) = session_pair(config);

    assert!(matches!(
        initiator.register("", |_payload: &[u8]| {}),
        Err(PeerError::HandshakeFailed(_))
    ));
    assert!(matches!(
        initiator.register(&"n".repeat(33), |_payload: &[u8]| {}),
        Err(PeerError::HandshakeFailed(_))
    ));

    let follower_side = thread::spawn(move || {
        let endpoint = follower.register("dup", |_payload: &[u8]| {}).unwrap();
        (follower, endpoint)
    });
    let _first = initiator.register("dup", |_payload: &[u8]| {}).unwrap();
    let _follower = follower_side.join().unwrap();

    assert!(matches!(
        initiator.register("dup", |_payload: &[u8]| {}),
        Err(PeerError::DuplicateEndpoint(name)) if name == "dup"
    ));
}

#[test]
fn malformed_control_traffic_is_ignored() {
    let (left, right) = LoopbackChannel::pair(ChannelConfig::default());
    let raw = Multiplexer::init(left, MuxConfig::default()).unwrap();
    let follower = thread::spawn(move || {
        Session::connect(
            right,
            MuxConfig::default(),
            Role::Follower,
            HandshakeConfig::default(),
        )
    });
    raw.open().unwrap();
    let follower = follower.join().unwrap().unwrap();

    raw.send(CONTROL_ID, b"{not json").unwrap();
    raw.send(CONTROL_ID, br#"{"type":"bind_ack","id":0}"#).unwrap();
    let offer = ControlMessage::bind(2, "manual", 1).to_payload().unwrap();
    raw.send(CONTROL_ID, &offer).unwrap();

    let (callback, rx) = sink();
    let endpoint = follower.register("manual", callback).unwrap();
    assert_eq!(endpoint.id(), 2);

    raw.send(2, b"hello").unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), b"hello".to_vec());
    assert_eq!(follower.multiplexer().stats().control_frames, 3);
}

#[test]
fn late_acknowledgement_does_not_connect_a_new_attempt() {
    let config = HandshakeConfig {
        timeout: Some(Duration::from_millis(300)),
        ..HandshakeConfig::default()
    };
    let (initiator, peer) = initiator_against_manual_peer(config);

    // First attempt goes unanswered and is withdrawn.
    assert!(matches!(
        initiator.register("a", |_payload: &[u8]| {}),
        Err(PeerError::Timeout(_))
    ));
    let (id, name, first_offer) = peer.next_bind();
    assert_eq!((id, name.as_str()), (0, "a"));
    assert_eq!(peer.next(), ControlMessage::unbind(0));

    // The next registration reuses id 0; acknowledgements for the earlier
    // offer must not complete it.
    let pending = {
        let initiator = initiator.clone();
        thread::spawn(move || initiator.register("b", |_payload: &[u8]| {}))
    };
    let (id, name, second_offer) = peer.next_bind();
    assert_eq!((id, name.as_str()), (0, "b"));
    assert_ne!(first_offer, second_offer);

    peer.send(&ControlMessage::bind_ack(0, "a", first_offer));
    peer.send(&ControlMessage::bind_ack(0, "b", first_offer));
    assert!(matches!(pending.join().unwrap(), Err(PeerError::Timeout(_))));
    assert_eq!(peer.next(), ControlMessage::unbind(0));
    assert!(initiator.multiplexer().occupied_ids().is_empty());

    // A matching acknowledgement still connects.
    let pending = {
        let initiator = initiator.clone();
        thread::spawn(move || initiator.register("c", |_payload: &[u8]| {}))
    };
    let (id, name, offer) = peer.next_bind();
    peer.send(&ControlMessage::bind_ack(id, name, offer));
    let endpoint = pending.join().unwrap().unwrap();
    assert_eq!(endpoint.id(), 0);
    assert!(endpoint.is_connected());
}

#[test]
fn follower_refuses_offer_outside_its_table() {
    let (left, right) = LoopbackChannel::pair(ChannelConfig::default());
    let follower = thread::spawn(move || {
        Session::connect(
            right,
            MuxConfig {
                slots: 2,
                ..MuxConfig::default()
            },
            Role::Follower,
            HandshakeConfig::default(),
        )
    });
    let peer = ManualPeer::open(left);
    let follower = follower.join().unwrap().unwrap();

    peer.send(&ControlMessage::bind(5, "wide", 1));
    let err = follower.register("wide", |_payload: &[u8]| {}).unwrap_err();
    assert!(matches!(err, PeerError::Mux(MuxError::NotFound { id: 5, .. })));
    assert_eq!(peer.next(), ControlMessage::unbind(5));
    assert!(follower.pending_offers().is_empty());
}

#[test]
fn initiator_fails_fast_when_follower_table_is_smaller() {
    let config = HandshakeConfig {
        timeout: Some(Duration::from_secs(30)),
        ..HandshakeConfig::default()
    };
    let (initiator, follower) = pair_with(
        MuxConfig::default(),
        MuxConfig {
            slots: 2,
            ..MuxConfig::default()
        },
        config,
    );
    let names = ["a", "b", "c"];

    let follower_side = thread::spawn(move || {
        let results: Vec<_> = names
            .iter()
            .map(|name| follower.register(name, |_payload: &[u8]| {}))
            .collect();
        (follower, results)
    });

    let started = Instant::now();
    let locals: Vec<_> = names
        .iter()
        .map(|name| initiator.register(name, |_payload: &[u8]| {}))
        .collect();
    assert!(started.elapsed() < Duration::from_secs(10), "waited for the timeout");

    let (_follower, remotes) = follower_side.join().unwrap();
    assert_eq!(locals[0].as_ref().unwrap().id(), 0);
    assert_eq!(locals[1].as_ref().unwrap().id(), 1);
    assert!(matches!(locals[2], Err(PeerError::HandshakeFailed(_))));
    assert!(remotes[0].is_ok() && remotes[1].is_ok());
    assert!(matches!(
        remotes[2],
        Err(PeerError::Mux(MuxError::NotFound { id: 2, .. }))
    ));
    assert_eq!(initiator.multiplexer().occupied_ids(), vec![0, 1]);
}

#[test]
fn open_can_be_retried_after_timeout() {
    let (left, right) = LoopbackChannel::pair(ChannelConfig::default());
    let mux = Multiplexer::init(left, MuxConfig::default()).unwrap();
    let short = HandshakeConfig {
        timeout: Some(Duration::from_millis(50)),
        ..HandshakeConfig::default()
    };
    assert!(matches!(
        Session::open(Arc::clone(&mux), Role::Initiator, short),
        Err(PeerError::Timeout(_))
    ));

    let follower = thread::spawn(move || {
        let session = Session::connect(
            right,
            MuxConfig::default(),
            Role::Follower,
            HandshakeConfig::default(),
        )
        .unwrap();
        let endpoint = session.register("retry", |_payload: &[u8]| {}).unwrap();
        (session, endpoint)
    });
    let initiator =
        Session::open(Arc::clone(&mux), Role::Initiator, HandshakeConfig::default()).unwrap();
    let local = initiator.register("retry", |_payload: &[u8]| {}).unwrap();
    let (_follower, remote) = follower.join().unwrap();
    assert_eq!(local.id(), remote.id());

    // Only one live session per multiplexer.
    assert!(matches!(
        Session::open(mux, Role::Initiator, HandshakeConfig::default()),
        Err(PeerError::Mux(MuxError::AlreadyOpen))
    ));
}
