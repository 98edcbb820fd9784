use cairn_core::compact::Compactor;
use cairn_core::config::{CompactionConfig, FeedConfig};
use cairn_core::db::{ActivityFilter, ActivityStore, SqliteActivityStore, migrations};
use cairn_core::feed::{FeedCache, load_feed};
use cairn_core::model::{ActivityIdentity, ActivityType, EntityRef, EntityType, NewActivity};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde_json::json;

fn at(minutes: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid ts") + Duration::minutes(minutes)
}

fn test_db() -> Connection {
    let mut conn = Connection::open_in_memory().expect("open in-memory db");
    migrations::migrate(&mut conn).expect("migrate");
    conn
}

fn route_identity() -> ActivityIdentity {
    ActivityIdentity {
        user_fk: 301,
        region_fk: 1,
        entity: EntityRef::new(EntityType::Route, 501),
        parent: Some(EntityRef::new(EntityType::Block, 601)),
    }
}

fn all_rows(store: &SqliteActivityStore<'_>) -> Vec<cairn_core::model::Activity> {
    store
        .find_activities(&ActivityFilter::default())
        .expect("find activities")
}

#[test]
fn identical_snapshots_write_nothing() {
    let conn = test_db();
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let config = CompactionConfig::default();
    let compactor = Compactor::new(&store, &cache, &config);

    let snap = json!({"id": 501, "name": "Arete", "grade": 12});
    let outcome = compactor
        .record_update(&route_identity(), &snap, &snap, at(0))
        .expect("record");

    assert!(!outcome.wrote());
    assert!(all_rows(&store).is_empty());
}

#[test]
fn edits_within_window_amend_one_row() {
    let conn = test_db();
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let config = CompactionConfig::default();
    let compactor = Compactor::new(&store, &cache, &config);
    let identity = route_identity();

    // Seed an `updated` row A -> B two minutes ago.
    store
        .insert_activities(&[NewActivity {
            column_name: Some("name".into()),
            old_value: Some("A".into()),
            new_value: Some("B".into()),
            ..identity.activity(ActivityType::Updated, at(0))
        }])
        .expect("seed");

    let outcome = compactor
        .record_update(&identity, &json!({"name": "B"}), &json!({"name": "C"}), at(1))
        .expect("record");
    assert_eq!(outcome.amended, 1);
    assert_eq!(outcome.inserted, 0);

    let rows = all_rows(&store);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].old_value.as_deref(), Some("A"));
    assert_eq!(rows[0].new_value.as_deref(), Some("C"));
    assert_eq!(rows[0].created_at, at(1));
}

#[test]
fn new_columns_append_alongside_amendments() {
    let conn = test_db();
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let config = CompactionConfig::default();
    let compactor = Compactor::new(&store, &cache, &config);
    let identity = route_identity();

    compactor
        .record_update(&identity, &json!({"name": "A"}), &json!({"name": "B"}), at(0))
        .expect("first edit");
    let outcome = compactor
        .record_update(
            &identity,
            &json!({"name": "B", "grade": 11}),
            &json!({"name": "C", "grade": 12}),
            at(3),
        )
        .expect("second edit");

    assert_eq!(outcome.amended, 1);
    assert_eq!(outcome.inserted, 1);
    assert_eq!(all_rows(&store).len(), 2);
}

#[test]
fn edits_outside_window_append() {
    let conn = test_db();
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let config = CompactionConfig::default();
    let compactor = Compactor::new(&store, &cache, &config);
    let identity = route_identity();

    compactor
        .record_update(&identity, &json!({"name": "A"}), &json!({"name": "B"}), at(0))
        .expect("first edit");
    compactor
        .record_update(&identity, &json!({"name": "B"}), &json!({"name": "C"}), at(20))
        .expect("second edit");

    assert_eq!(all_rows(&store).len(), 2);
}

#[test]
fn other_actor_does_not_amend() {
    let conn = test_db();
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let config = CompactionConfig::default();
    let compactor = Compactor::new(&store, &cache, &config);

    compactor
        .record_update(&route_identity(), &json!({"name": "A"}), &json!({"name": "B"}), at(0))
        .expect("first edit");
    let other = ActivityIdentity {
        user_fk: 302,
        ..route_identity()
    };
    let outcome = compactor
        .record_update(&other, &json!({"name": "B"}), &json!({"name": "C"}), at(1))
        .expect("second edit");

    assert_eq!(outcome.inserted, 1);
    assert_eq!(all_rows(&store).len(), 2);
}

#[test]
fn recent_creation_suppresses_updates() {
    let conn = test_db();
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let config = CompactionConfig::default();
    let compactor = Compactor::new(&store, &cache, &config);
    let identity = route_identity();

    compactor
        .record(&identity, ActivityType::Created, at(0))
        .expect("create");
    let outcome = compactor
        .record_update(&identity, &json!({"name": "A"}), &json!({"name": "B"}), at(5))
        .expect("update");

    assert!(outcome.suppressed);
    assert!(!outcome.wrote());
    assert_eq!(all_rows(&store).len(), 1);
}

#[test]
fn duplicate_creation_is_ignored() {
    let conn = test_db();
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let config = CompactionConfig::default();
    let compactor = Compactor::new(&store, &cache, &config);

    let first = compactor
        .record(&route_identity(), ActivityType::Created, at(0))
        .expect("create");
    let second = compactor
        .record(&route_identity(), ActivityType::Created, at(30))
        .expect("create again");

    assert_eq!(first.inserted, 1);
    assert!(second.suppressed);
    assert_eq!(all_rows(&store).len(), 1);
}

#[test]
fn updated_must_go_through_snapshots() {
    let conn = test_db();
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let config = CompactionConfig::default();
    let compactor = Compactor::new(&store, &cache, &config);

    assert!(
        compactor
            .record(&route_identity(), ActivityType::Updated, at(0))
            .is_err()
    );
}

#[test]
fn writes_invalidate_the_region_feed() {
    let conn = test_db();
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let config = CompactionConfig::default();
    let feed_config = FeedConfig::default();
    let compactor = Compactor::new(&store, &cache, &config);

    let before = load_feed(&store, &cache, &feed_config, 1, 0, at(0)).expect("feed");
    assert_eq!(before.total, 0);

    compactor
        .record(&route_identity(), ActivityType::Created, at(0))
        .expect("create");

    let after = load_feed(&store, &cache, &feed_config, 1, 0, at(0)).expect("feed");
    assert_eq!(after.total, 1);
}

#[test]
fn compaction_rolls_back_with_the_enclosing_transaction() {
    let mut conn = test_db();
    let cache = FeedCache::default();
    let config = CompactionConfig::default();

    {
        let tx = conn.transaction().expect("begin");
        let outcome = {
            let store = SqliteActivityStore::new(&tx);
            Compactor::new(&store, &cache, &config)
                .record_update(&route_identity(), &json!({"name": "A"}), &json!({"name": "B"}), at(0))
                .expect("record")
        };
        assert_eq!(outcome.inserted, 1);
        tx.rollback().expect("rollback");
    }

    assert!(all_rows(&SqliteActivityStore::new(&conn)).is_empty());
}
