#![forbid(unsafe_code)]

use roomsync_domain::{EventId, EventKind, PresenceRecord, RoomId, RoomRecord, RoomScope, UserId};

use crate::store::Store;
use crate::{events, presence, rooms};

fn room(id: &str) -> RoomId {
	RoomId::new(id).expect("valid RoomId")
}

fn user(id: &str) -> UserId {
	UserId::new(id).expect("valid UserId")
}

async fn seed_room(store: &Store, id: &str, permanent: bool) -> RoomId {
	let rid = room(id);
	rooms::insert_in(
		store.pool(),
		&RoomRecord {
			id: rid.clone(),
			name: format!("room {id}"),
			host_user_id: None,
			permanent,
			created_at: 1_000,
		},
	)
	.await
	.expect("insert room");
	rid
}

#[tokio::test]
async fn append_returns_strictly_increasing_ids() {
	let store = Store::in_memory().await.expect("store");
	let scope = RoomScope::Room(room("a"));

	let first = store.append_event(&scope, EventKind::Message, b"{}", 1).await.expect("append");
	let second = store.append_event(&scope, EventKind::Message, b"{}", 2).await.expect("append");

	assert!(second > first, "expected {second} > {first}");
	assert_eq!(store.latest_event_id().await.expect("latest"), second);
}

#[tokio::test]
async fn fetch_since_returns_room_and_broadcast_in_id_order() {
	let store = Store::in_memory().await.expect("store");
	let room_a = room("a");
	let room_b = room("b");

	store
		.append_event(&RoomScope::Room(room_a.clone()), EventKind::Message, b"m1", 1)
		.await
		.expect("append");
	store
		.append_event(&RoomScope::Room(room_b.clone()), EventKind::Message, b"other", 1)
		.await
		.expect("append");
	store
		.append_event(&RoomScope::Broadcast, EventKind::RoomUpdate, b"global", 1)
		.await
		.expect("append");
	store
		.append_event(&RoomScope::Room(room_a.clone()), EventKind::UserJoin, b"m2", 1)
		.await
		.expect("append");

	let batch = store.fetch_since(&room_a, EventId::ZERO, 50).await.expect("fetch");
	let kinds: Vec<_> = batch.iter().map(|e| e.kind).collect();
	assert_eq!(kinds, vec![EventKind::Message, EventKind::RoomUpdate, EventKind::UserJoin]);

	let ids: Vec<_> = batch.iter().map(|e| e.id).collect();
	let mut sorted = ids.clone();
	sorted.sort();
	assert_eq!(ids, sorted, "batch must be id-ascending");
}

#[tokio::test]
async fn successive_fetches_are_disjoint_continuations() {
	let store = Store::in_memory().await.expect("store");
	let rid = room("a");
	let scope = RoomScope::Room(rid.clone());

	for i in 0..6 {
		store
			.append_event(&scope, EventKind::Message, format!("m{i}").as_bytes(), i)
			.await
			.expect("append");
	}

	let first = store.fetch_since(&rid, EventId::ZERO, 3).await.expect("fetch");
	assert_eq!(first.len(), 3);
	let cursor = first.last().expect("non-empty").id;

	let second = store.fetch_since(&rid, cursor, 50).await.expect("fetch");
	assert_eq!(second.len(), 3);
	assert!(second.iter().all(|e| e.id > cursor), "second batch continues past the cursor");
}

#[tokio::test]
async fn fetch_since_caps_batch_size() {
	let store = Store::in_memory().await.expect("store");
	let rid = room("a");
	let scope = RoomScope::Room(rid.clone());

	for _ in 0..(events::DEFAULT_FETCH_LIMIT + 10) {
		store.append_event(&scope, EventKind::Message, b"m", 1).await.expect("append");
	}

	let batch = store
		.fetch_since(&rid, EventId::ZERO, events::DEFAULT_FETCH_LIMIT)
		.await
		.expect("fetch");
	assert_eq!(batch.len() as i64, events::DEFAULT_FETCH_LIMIT);
}

#[tokio::test]
async fn presence_list_orders_by_join_time_then_rowid() {
	let store = Store::in_memory().await.expect("store");
	let rid = seed_room(&store, "a", true).await;

	for (uid, joined_at) in [("late", 300), ("early", 100), ("tied", 100)] {
		presence::insert_in(
			store.pool(),
			&PresenceRecord {
				room_id: rid.clone(),
				user_id: user(uid),
				is_host: false,
				is_afk: false,
				manual_afk: false,
				afk_since: None,
				joined_at,
				last_activity: joined_at,
			},
		)
		.await
		.expect("insert presence");
	}

	let listed = store.room_presences(&rid).await.expect("list");
	let order: Vec<_> = listed.iter().map(|p| p.user_id.as_str().to_string()).collect();
	// "early" was inserted before "tied"; equal joined_at falls back to rowid.
	assert_eq!(order, vec!["early", "tied", "late"]);
}

#[tokio::test]
async fn room_scoped_teardown_removes_events_and_presences() {
	let store = Store::in_memory().await.expect("store");
	let rid = seed_room(&store, "a", false).await;
	let other = seed_room(&store, "b", false).await;

	store
		.append_event(&RoomScope::Room(rid.clone()), EventKind::Message, b"m", 1)
		.await
		.expect("append");
	store
		.append_event(&RoomScope::Room(other.clone()), EventKind::Message, b"m", 1)
		.await
		.expect("append");
	presence::insert_in(
		store.pool(),
		&PresenceRecord {
			room_id: rid.clone(),
			user_id: user("u"),
			is_host: true,
			is_afk: false,
			manual_afk: false,
			afk_since: None,
			joined_at: 1,
			last_activity: 1,
		},
	)
	.await
	.expect("insert presence");

	events::delete_room_scoped_in(store.pool(), &rid).await.expect("delete events");
	presence::delete_room_in(store.pool(), &rid).await.expect("delete presences");
	rooms::delete_in(store.pool(), &rid).await.expect("delete room");

	assert!(store.fetch_since(&rid, EventId::ZERO, 50).await.expect("fetch").is_empty());
	assert!(store.room(&rid).await.expect("room").is_none());
	assert_eq!(store.fetch_since(&other, EventId::ZERO, 50).await.expect("fetch").len(), 1);
}
