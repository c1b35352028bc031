//! Containers shared between agents.

use std::thread;
use std::time::{Duration, Instant};

use swarmkb::containers::{
    CircularBuffer, CircularBufferConsumer, Collection, Container, Counter, Integer, Vector,
};
use swarmkb::{InProcessHub, KnowledgeBase, TransportKind, TransportSettings};

fn pair() -> (InProcessHub, KnowledgeBase, KnowledgeBase) {
    let hub = InProcessHub::new();
    let producer = KnowledgeBase::new();
    let consumer = KnowledgeBase::new();
    for (kb, id) in [(&producer, "producer"), (&consumer, "consumer")] {
        kb.attach_in_process(&hub, TransportSettings::new(TransportKind::InProcess).with_id(id))
            .unwrap();
    }
    (hub, producer, consumer)
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_ring_keeps_only_the_last_capacity_records() {
    let kb = KnowledgeBase::new();
    let capacity = 5;
    let buffer = CircularBuffer::new(&kb, "telemetry", capacity).unwrap();
    let extra = 7;
    buffer.add_many(0..i64::try_from(capacity + extra).unwrap()).unwrap();

    assert_eq!(buffer.count().unwrap(), capacity);
    let earliest: Vec<i64> = buffer
        .get_earliest(capacity)
        .unwrap()
        .iter()
        .map(|r| r.to_integer())
        .collect();
    assert_eq!(earliest, vec![7, 8, 9, 10, 11]);
}

#[test]
fn test_remote_consumer_follows_producer() {
    let (_hub, producer_kb, consumer_kb) = pair();
    let buffer = CircularBuffer::new(&producer_kb, "events", 8).unwrap();
    buffer.add_many(["boot", "armed", "takeoff"]).unwrap();
    producer_kb.send_modifieds().unwrap();

    assert!(eventually(|| consumer_kb.get("events.index").unwrap().to_integer() == 2));
    let mut reader = CircularBufferConsumer::new(&consumer_kb, "events").unwrap();
    assert_eq!(reader.size(), 8);
    let seen: Vec<String> = reader
        .consume_earliest(10)
        .unwrap()
        .iter()
        .map(|r| r.to_string_value())
        .collect();
    assert_eq!(seen, vec!["boot", "armed", "takeoff"]);
    assert!(reader.consume().unwrap().is_none());
}

#[test]
fn test_overrun_consumer_reports_drops_then_resyncs() {
    let kb = KnowledgeBase::new();
    let buffer = CircularBuffer::new(&kb, "q", 4).unwrap();
    let mut reader = CircularBufferConsumer::new(&kb, "q").unwrap();
    buffer.add_many(1..=10).unwrap();

    assert_eq!(reader.dropped().unwrap(), 6);
    assert_eq!(reader.remaining().unwrap(), 10);
    assert!(reader.remaining().unwrap() > reader.size());
    let (first, dropped) = reader.consume_with_dropped().unwrap();
    assert_eq!(first.unwrap().to_integer(), 7);
    assert_eq!(dropped, 6);

    buffer.add(11).unwrap();
    reader.resync().unwrap();
    assert_eq!(reader.remaining().unwrap(), 0);
    assert!(reader.consume().unwrap().is_none());
    assert_eq!(reader.peek().unwrap().unwrap().to_integer(), 11);
}

#[test]
fn test_collection_resends_state_when_flag_raised() {
    let (_hub, a, b) = pair();
    let counter = Counter::new(&a, "tasks", 0, 1).unwrap();
    let position = Vector::new(&a, "pos", Some(2)).unwrap();
    counter.inc().unwrap();
    position.set(0, 1.5).unwrap();
    position.set(1, -2.0).unwrap();
    a.clear_modifieds().unwrap();

    let flag = Integer::new(&a, "resend").unwrap();
    let state = Collection::new("state").with(counter).with(position);
    assert!(!state.modify_if_true(&flag).unwrap());
    assert!(a.modifieds().unwrap().is_empty());

    flag.set(1).unwrap();
    a.clear_modifieds().unwrap();
    assert!(state.modify_if_true(&flag).unwrap());
    a.send_modifieds().unwrap();

    assert!(eventually(|| b.exists("pos.1").unwrap()));
    assert_eq!(b.get("tasks.0").unwrap().to_integer(), 1);
    let remote = Vector::new(&b, "pos", None).unwrap();
    assert_eq!(remote.len(), 2);
    assert!((remote.get(1).unwrap().to_double() + 2.0).abs() < f64::EPSILON);
}

#[test]
fn test_container_outlives_store() {
    let kb = KnowledgeBase::new();
    let n = Integer::new(&kb, "x").unwrap();
    n.set(3).unwrap();
    drop(kb);
    assert!(n.get().unwrap_err().is_execution());
    assert!(n.ensure_bound().is_err());
}
