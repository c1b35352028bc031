//! End-to-end replication over an in-process hub.
//!
//! Each agent owns its own store and a transport on a shared hub; the
//! receive threads apply what peers publish.

use std::thread;
use std::time::{Duration, Instant};

use swarmkb::containers::{Barrier, Counter};
use swarmkb::{
    InProcessHub, KnowledgeBase, KnowledgeBaseConfig, QosSettings, TransportKind,
    TransportSettings, Value, WaitSettings,
};

const SETTLE: Duration = Duration::from_secs(5);

fn agent(hub: &InProcessHub, id: &str) -> KnowledgeBase {
    agent_with_qos(hub, id, QosSettings::default())
}

fn agent_with_qos(hub: &InProcessHub, id: &str, qos: QosSettings) -> KnowledgeBase {
    let kb = KnowledgeBase::with_config(KnowledgeBaseConfig::default().with_id(id));
    kb.attach_in_process(
        hub,
        TransportSettings::new(TransportKind::InProcess)
            .with_id(id)
            .with_qos(qos),
    )
    .unwrap();
    kb
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SETTLE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_location_array_reaches_every_peer() {
    let hub = InProcessHub::new();
    let agents: Vec<KnowledgeBase> = (0..3).map(|i| agent(&hub, &format!("agent{i}"))).collect();

    agents[0]
        .set("agent.0.location", vec![12.5, -3.25, 100.0])
        .unwrap();

    for peer in &agents[1..] {
        let outcome = peer
            .wait(
                |vars| Value::from(vars.exists("agent.0.location")),
                &WaitSettings::default(),
            )
            .unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(
            peer.get("agent.0.location").unwrap().to_double_array(),
            vec![12.5, -3.25, 100.0]
        );
    }
}

#[test]
fn test_banned_peer_is_not_observed() {
    let hub = InProcessHub::new();
    let a = agent(&hub, "a");
    let b = agent(&hub, "b");
    let c = agent_with_qos(&hub, "c", QosSettings::default().with_banned_peer("a"));

    a.set("from.a", 1).unwrap();
    b.set("from.b", 2).unwrap();

    assert!(eventually(|| c.exists("from.b").unwrap()));
    assert!(eventually(|| b.exists("from.a").unwrap()));
    assert!(!c.exists("from.a").unwrap());
    assert!(c.transports()[0].stats().packets_rejected >= 1);
}

#[test]
fn test_counter_converges_across_agents() {
    const N: usize = 4;
    let hub = InProcessHub::new();
    let agents: Vec<KnowledgeBase> = (0..N).map(|i| agent(&hub, &format!("worker{i}"))).collect();
    let counters: Vec<Counter> = agents
        .iter()
        .enumerate()
        .map(|(i, kb)| Counter::new(kb, "tasks.done", i, N).unwrap())
        .collect();

    for (i, counter) in counters.iter().enumerate() {
        counter.inc_by(i64::try_from(i).unwrap() + 1).unwrap();
    }
    for kb in &agents {
        kb.send_modifieds().unwrap();
    }

    for counter in &counters {
        assert!(eventually(|| counter.get().unwrap() == 10));
    }
}

#[test]
fn test_barrier_rounds_complete_together() {
    const N: usize = 3;
    let hub = InProcessHub::new();
    let agents: Vec<KnowledgeBase> = (0..N).map(|i| agent(&hub, &format!("peer{i}"))).collect();
    let barriers: Vec<Barrier> = agents
        .iter()
        .enumerate()
        .map(|(i, kb)| Barrier::new(kb, "sync", i, N).unwrap())
        .collect();

    for round in 1..=2 {
        for (barrier, kb) in barriers.iter().zip(&agents).take(N - 1) {
            barrier.next().unwrap();
            kb.send_modifieds().unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        assert!(!barriers[0].is_done().unwrap(), "round {round} done before the last peer arrived");

        barriers[N - 1].next().unwrap();
        agents[N - 1].send_modifieds().unwrap();
        for barrier in &barriers {
            assert!(eventually(|| barrier.is_done().unwrap()));
            assert_eq!(barrier.get().unwrap(), round);
        }
    }
}

#[test]
fn test_stale_remote_update_does_not_regress() {
    let hub = InProcessHub::new();
    let a = agent(&hub, "a");
    let b = agent(&hub, "b");

    a.set("mode", "explore").unwrap();
    assert!(eventually(|| b.get("mode").unwrap().to_string_value() == "explore"));
    b.set("mode", "return").unwrap();
    assert!(eventually(|| a.get("mode").unwrap().to_string_value() == "return"));

    assert!(a.get("mode").unwrap().clock >= b.get("mode").unwrap().clock);
}
