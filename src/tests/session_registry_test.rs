//! Session registry tests: lifecycle, TTL eviction, bounded history.

use chrono::{Duration as ChronoDuration, Utc};

use super::common::sample_log;
use crate::services::SessionRegistry;

#[test]
fn test_create_and_get() {
    let registry = SessionRegistry::new(86400, 20);
    let session = registry.create(&sample_log()).expect("create");

    assert!(!session.id.is_empty());
    assert!(session.created_at <= session.last_access());
    assert_eq!(registry.len(), 1);

    let fetched = registry.get(&session.id).expect("live session");
    assert_eq!(fetched.id, session.id);
    assert!(fetched.created_at <= fetched.last_access());
    assert!(fetched.last_access() <= Utc::now());

    assert!(registry.get("no-such-session").is_none());
}

#[test]
fn test_expiry_predicate() {
    let registry = SessionRegistry::new(86400, 20);
    let session = registry.create(&sample_log()).expect("create");

    let now = Utc::now();
    assert!(!session.is_expired(3600, now));
    assert!(session.is_expired(3600, now + ChronoDuration::seconds(3601)));
    assert!(!session.is_expired(3600, now + ChronoDuration::seconds(3599)));
}

#[test]
fn test_sweep_evicts_idle_sessions() {
    let registry = SessionRegistry::new(1, 20);
    let session = registry.create(&sample_log()).expect("create");
    assert_eq!(registry.sweep(), 0);

    std::thread::sleep(std::time::Duration::from_millis(2100));
    assert_eq!(registry.sweep(), 1);
    assert!(registry.is_empty());
    assert!(registry.get(&session.id).is_none());
}

#[test]
fn test_expired_session_dropped_on_access() {
    let registry = SessionRegistry::new(1, 20);
    let session = registry.create(&sample_log()).expect("create");

    std::thread::sleep(std::time::Duration::from_millis(2100));
    assert!(registry.get(&session.id).is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_history_keeps_trailing_window() {
    let registry = SessionRegistry::new(86400, 20);
    let session = registry.create(&sample_log()).expect("create");

    for i in 0..25 {
        session.append_exchange(&format!("q{}", i), &format!("a{}", i));
    }

    let history = session.history_snapshot();
    assert_eq!(history.len(), 20);
    // Oldest retained entry is the user half of the 16th exchange
    assert_eq!(history[0].text, "q15");
    assert_eq!(history[19].text, "a24");
    assert_eq!(session.message_count(), 25);
}

#[test]
fn test_validation_ring_is_bounded() {
    let registry = SessionRegistry::new(86400, 20);
    let session = registry.create(&sample_log()).expect("create");

    for _ in 0..60 {
        session.record_validation(Default::default());
    }
    assert_eq!(session.validation_history().len(), 50);
}

#[test]
fn test_stats() {
    let registry = SessionRegistry::new(86400, 20);
    let a = registry.create(&sample_log()).expect("create");
    let _b = registry.create(&sample_log()).expect("create");
    a.append_exchange("q", "a");

    let stats = registry.stats();
    assert_eq!(stats.active_sessions, 2);
    assert_eq!(stats.total_messages, 1);
    assert!(stats.oldest_session_age_secs.is_some());
}

#[test]
fn test_sessions_are_isolated() {
    let registry = SessionRegistry::new(86400, 20);
    let a = registry.create(&sample_log()).expect("create");
    let b = registry.create(&sample_log()).expect("create");

    assert_ne!(a.id, b.id);
    a.append_exchange("only on a", "ack");
    assert!(b.history_snapshot().is_empty());

    // Same log, same derived schema, separate table sets
    assert_eq!(a.schema, b.schema);
    let out = b.store.query("SELECT COUNT(*) FROM att_data").expect("query");
    assert_eq!(out.rows[0][0].as_f64(), Some(3.0));
}
