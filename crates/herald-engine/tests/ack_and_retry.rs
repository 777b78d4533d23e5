//! Acknowledgment, timeout-driven retry, and terminal-failure handling.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use herald_core::{Envelope, MessageFilter, Route};
use herald_engine::{AckOutcome, DeliveryStatus, EngineConfig, Messaging};

fn quick_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.timeouts.message_timeout_ms = 10;
    cfg.retry.delay_ms = 1;
    cfg
}

fn subscribe(svc: &Messaging, id: &str) -> herald_engine::Subscription {
    svc.subscribe(id, MessageFilter::allow_all(), HashMap::new(), false, 0)
        .unwrap()
}

#[tokio::test]
async fn ack_settles_and_double_ack_is_ignored() {
    let svc = Messaging::new(EngineConfig::default()).unwrap();
    let mut sub = subscribe(&svc, "u1");

    let env = Envelope::new(
        "cmd",
        Route::unicast("u1").with_ack(),
        Bytes::from_static(b"do it"),
    );
    let message_id = env.id().to_string();

    let result = svc.send_message(env, true, None).await.unwrap();
    assert_eq!(result.delivered, 1);
    assert_eq!(result.acks.len(), 1);
    assert!(result.acks[0].outstanding);
    assert_eq!(svc.stats().acks_outstanding, 1);
    assert!(sub.receiver.try_recv().is_ok());

    assert_eq!(
        svc.acknowledge(&message_id, "u1", true, None),
        AckOutcome::Processed
    );
    assert_eq!(svc.stats().acks_outstanding, 0);
    assert_eq!(svc.stats().acknowledged, 1);

    // Idempotent: the second ack matches nothing and counts nothing.
    assert_eq!(
        svc.acknowledge(&message_id, "u1", true, None),
        AckOutcome::Unmatched
    );
    assert_eq!(svc.stats().acknowledged, 1);
}

#[tokio::test]
async fn missing_ack_is_retried_by_the_sweep() {
    let svc = Messaging::new(quick_config()).unwrap();
    let mut sub = subscribe(&svc, "u1");

    let env = Envelope::new(
        "cmd",
        Route::unicast("u1").with_ack(),
        Bytes::from_static(b"again"),
    );
    svc.send_message(env, true, None).await.unwrap();
    assert!(sub.receiver.try_recv().is_ok());

    // Let the unconfirmed delivery age past the message timeout, then run
    // the sweep twice: first pass schedules the retry, second delivers it.
    tokio::time::sleep(Duration::from_millis(30)).await;
    svc.engine().run_retry_sweep().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    svc.engine().run_retry_sweep().await;

    let redelivered = sub.receiver.try_recv();
    assert!(redelivered.is_ok(), "timed-out delivery must be re-attempted");
    assert!(svc.stats().retried >= 1);
    assert_eq!(svc.stats().acks_outstanding, 1, "the retry awaits its own ack");
}

#[tokio::test]
async fn offline_subscriber_lands_in_failed_ring() {
    let mut cfg = quick_config();
    cfg.retry.max_attempts = 1;
    let svc = Messaging::new(cfg).unwrap();

    // Subscribe, then drop the receiving half: the outbox is closed.
    let sub = subscribe(&svc, "u1");
    drop(sub);

    let env = Envelope::new("cmd", Route::unicast("u1"), Bytes::from_static(b"lost"));
    let message_id = env.id().to_string();
    let result = svc.send_message(env, true, None).await.unwrap();
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].contains("subscriber offline"));

    let failed = svc.failed_messages("u1", 10);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, "subscriber offline");
    assert_eq!(failed[0].attempts, 1);

    // Reconnect and retry manually.
    let mut sub = subscribe(&svc, "u1");
    let outcome = svc.retry_failed_message(&message_id).await.unwrap();
    assert_eq!(outcome.status, DeliveryStatus::Delivered);
    assert!(sub.receiver.try_recv().is_ok());

    // The entry was consumed; a second manual retry reports not-found.
    assert!(svc.retry_failed_message(&message_id).await.is_err());
}

#[tokio::test]
async fn queue_overflow_drop_oldest() {
    let mut cfg = EngineConfig::default();
    cfg.queues.max_pending = 2;
    cfg.queues.critical = 2;
    cfg.queues.high = 2;
    cfg.queues.normal = 2;
    cfg.queues.low = 2;
    let svc = Messaging::new(cfg).unwrap();
    let _sub = subscribe(&svc, "s");

    svc.pause_delivery("s").unwrap();
    for _ in 0..3 {
        let env = Envelope::new("t", Route::unicast("s"), Bytes::from_static(b"x"));
        let result = svc.send_message(env, true, None).await.unwrap();
        assert_eq!(result.queued, 1);
    }
    // Bound held, the displaced message is accounted as failed.
    assert_eq!(svc.pending_count("s").unwrap(), 2);
    assert_eq!(svc.stats().failed, 1);
}

#[tokio::test]
async fn queue_overflow_reject_new() {
    let mut cfg = EngineConfig::default();
    cfg.queues.max_pending = 2;
    cfg.queues.critical = 2;
    cfg.queues.high = 2;
    cfg.queues.normal = 2;
    cfg.queues.low = 2;
    cfg.queues.overflow_policy = herald_engine::config::OverflowPolicy::RejectNew;
    let svc = Messaging::new(cfg).unwrap();
    let _sub = subscribe(&svc, "s");

    svc.pause_delivery("s").unwrap();
    for _ in 0..2 {
        let env = Envelope::new("t", Route::unicast("s"), Bytes::from_static(b"x"));
        svc.send_message(env, true, None).await.unwrap();
    }
    let env = Envelope::new("t", Route::unicast("s"), Bytes::from_static(b"x"));
    let result = svc.send_message(env, true, None).await.unwrap();
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].contains("queue full"));
    assert_eq!(svc.pending_count("s").unwrap(), 2);
}

#[tokio::test]
async fn cleanup_discards_expired_queued_messages() {
    let svc = Messaging::new(EngineConfig::default()).unwrap();
    let _sub = subscribe(&svc, "s");

    svc.pause_delivery("s").unwrap();
    let soon = herald_core::now_ms() + 20;
    let env = Envelope::new(
        "t",
        Route::unicast("s").with_expiry_ms(soon),
        Bytes::from_static(b"x"),
    );
    svc.send_message(env, true, None).await.unwrap();
    assert_eq!(svc.pending_count("s").unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(40)).await;
    svc.engine().run_cleanup().await;
    assert_eq!(svc.pending_count("s").unwrap(), 0);
}
