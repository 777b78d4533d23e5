//! Room/area/role broadcast resolution and history replay.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;

use bytes::Bytes;

use herald_core::{Envelope, MessageFilter, MetaValue, Route};
use herald_engine::{EngineConfig, Messaging, Subscription};

fn service() -> Messaging {
    Messaging::new(EngineConfig::default()).unwrap()
}

fn envelope(route: Route) -> Envelope<Bytes> {
    Envelope::new("game.event", route, Bytes::from_static(b"tick"))
}

fn join_room(svc: &Messaging, id: &str, room: &str) -> Subscription {
    svc.subscribe(
        id,
        MessageFilter::allow_all().with_room(room),
        HashMap::new(),
        false,
        0,
    )
    .unwrap()
}

#[tokio::test]
async fn room_broadcast_reaches_members_only() {
    let svc = service();
    let mut lobby_a = join_room(&svc, "a", "lobby");
    let mut lobby_b = join_room(&svc, "b", "lobby");
    let mut dungeon_c = join_room(&svc, "c", "dungeon");

    let result = svc
        .send_message(envelope(Route::room("lobby")), true, None)
        .await
        .unwrap();

    assert_eq!(result.delivered, 2);
    assert!(lobby_a.receiver.try_recv().is_ok());
    assert!(lobby_b.receiver.try_recv().is_ok());
    assert!(dungeon_c.receiver.try_recv().is_err());
}

#[tokio::test]
async fn room_broadcast_honors_excludes() {
    let svc = service();
    let mut a = join_room(&svc, "a", "lobby");
    let mut b = join_room(&svc, "b", "lobby");

    let result = svc
        .send_message(envelope(Route::room("lobby").excluding(["a"])), true, None)
        .await
        .unwrap();

    assert_eq!(result.delivered, 1);
    assert!(a.receiver.try_recv().is_err());
    assert!(b.receiver.try_recv().is_ok());
}

#[tokio::test]
async fn area_broadcast_spans_multiple_targets() {
    let svc = service();
    let _north = svc.subscribe(
        "n1",
        MessageFilter::allow_all().with_area("north"),
        HashMap::new(),
        false,
        0,
    );
    let _south = svc.subscribe(
        "s1",
        MessageFilter::allow_all().with_area("south"),
        HashMap::new(),
        false,
        0,
    );
    let _west = svc.subscribe(
        "w1",
        MessageFilter::allow_all().with_area("west"),
        HashMap::new(),
        false,
        0,
    );

    let mut route = Route::area("north");
    route.targets.push("south".to_string());
    let result = svc.send_message(envelope(route), true, None).await.unwrap();
    assert_eq!(result.delivered, 2);
}

#[tokio::test]
async fn role_broadcast_uses_filter_or_metadata() {
    let svc = service();
    let mut from_filter = svc
        .subscribe(
            "p1",
            MessageFilter::allow_all().with_role("spectator"),
            HashMap::new(),
            false,
            0,
        )
        .unwrap();
    let meta: HashMap<String, MetaValue> =
        [("role".to_string(), MetaValue::from("spectator"))].into_iter().collect();
    let mut from_meta = svc
        .subscribe("p2", MessageFilter::allow_all(), meta, false, 0)
        .unwrap();
    let _player = svc.subscribe(
        "p3",
        MessageFilter::allow_all().with_role("player"),
        HashMap::new(),
        false,
        0,
    );

    let result = svc
        .send_message(envelope(Route::role_type("spectator")), true, None)
        .await
        .unwrap();

    assert_eq!(result.delivered, 2);
    assert!(from_filter.receiver.try_recv().is_ok());
    assert!(from_meta.receiver.try_recv().is_ok());
}

#[tokio::test]
async fn unsubscribed_members_leave_the_scope() {
    let svc = service();
    let a = join_room(&svc, "a", "lobby");
    let _b = join_room(&svc, "b", "lobby");

    svc.unsubscribe("a", &a.subscription_id).unwrap();

    let result = svc
        .send_message(envelope(Route::room("lobby")), true, None)
        .await
        .unwrap();
    assert_eq!(result.delivered, 1);
}

#[tokio::test]
async fn history_replays_matching_messages_on_subscribe() {
    let svc = service();

    // Routed before anyone subscribed; retained in history.
    for i in 0..3u8 {
        let env = Envelope::new("chat.msg", Route::broadcast(), Bytes::from(vec![i]));
        svc.send_message(env, true, None).await.unwrap();
    }
    let env = Envelope::new("sys.notice", Route::broadcast(), Bytes::from_static(b"n"));
    svc.send_message(env, true, None).await.unwrap();

    let mut sub = svc
        .subscribe(
            "late",
            MessageFilter::allow_all().with_allowed_types(["chat.msg"]),
            HashMap::new(),
            true,
            2,
        )
        .unwrap();

    // Limit keeps the two most recent matching messages, in order.
    let first = sub.receiver.try_recv().unwrap();
    let second = sub.receiver.try_recv().unwrap();
    assert_eq!(first.envelope.payload(), Some(&Bytes::from(vec![1])));
    assert_eq!(second.envelope.payload(), Some(&Bytes::from(vec![2])));
    assert!(sub.receiver.try_recv().is_err());
}

#[tokio::test]
async fn persistence_appends_to_the_store() {
    use herald_engine::{MemoryStore, MessageStore};
    use std::sync::Arc;

    let mut cfg = EngineConfig::default();
    cfg.history.persistence_enabled = true;
    let store = Arc::new(MemoryStore::new(100));
    let svc = Messaging::new(cfg).unwrap().with_store(store.clone());

    let env = Envelope::new("chat.msg", Route::broadcast(), Bytes::from_static(b"kept"));
    svc.send_message(env, true, None).await.unwrap();

    let stored = store.query(0, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].msg_type, "chat.msg");
}
