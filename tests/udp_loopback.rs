//! Two stores replicating over real UDP sockets on loopback.

use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use swarmkb::{KbError, KnowledgeBase, TransportError, TransportKind, TransportSettings};

fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_udp_pair_replicates_both_ways() {
    let (pa, pb) = (free_port(), free_port());
    let a_addr = format!("127.0.0.1:{pa}");
    let b_addr = format!("127.0.0.1:{pb}");

    let a = KnowledgeBase::new();
    let b = KnowledgeBase::new();
    let ha = a
        .attach_transport(
            TransportSettings::new(TransportKind::Udp)
                .with_domain("loopback")
                .with_hosts([a_addr.clone(), b_addr.clone()]),
        )
        .unwrap();
    b.attach_transport(
        TransportSettings::new(TransportKind::Udp)
            .with_domain("loopback")
            .with_hosts([b_addr, a_addr.clone()]),
    )
    .unwrap();
    assert_eq!(ha.id(), a_addr);

    a.set("drone.1.altitude", 120.5).unwrap();
    assert!(eventually(|| b.exists("drone.1.altitude").unwrap()));
    b.set("drone.2.altitude", 80).unwrap();
    assert!(eventually(|| a.exists("drone.2.altitude").unwrap()));
    assert!(ha.stats().packets_received >= 1);

    a.close_transports().unwrap();
    b.close_transports().unwrap();
}

#[test]
fn test_udp_without_hosts_is_rejected() {
    let kb = KnowledgeBase::new();
    let err = kb
        .attach_transport(TransportSettings::new(TransportKind::Udp))
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_reliable_stream_is_unsupported() {
    let kb = KnowledgeBase::new();
    let err = kb
        .attach_transport(
            TransportSettings::new(TransportKind::ReliableStream).with_hosts(["127.0.0.1:1"]),
        )
        .unwrap_err();
    assert!(matches!(err, KbError::Transport(TransportError::Unsupported { .. })));
}

#[test]
fn test_two_stores_share_a_multicast_group() {
    let group = format!("239.255.77.1:{}", free_port());
    let settings = || {
        TransportSettings::new(TransportKind::Multicast)
            .with_domain("group")
            .with_hosts([group.clone()])
    };

    let a = KnowledgeBase::new();
    let b = KnowledgeBase::new();
    if let Err(e) = a.attach_transport(settings()) {
        // Hosts without a multicast route cannot join any group.
        eprintln!("skipping, multicast unavailable: {e}");
        return;
    }
    let hb = b.attach_transport(settings()).unwrap();
    assert!(!hb.is_closed());
    assert_eq!(a.transports().len(), 1);

    a.close_transports().unwrap();
    b.close_transports().unwrap();
}
