use cairn_core::compact::Compactor;
use cairn_core::config::{CompactionConfig, FeedConfig};
use cairn_core::db::SqliteActivityStore;
use cairn_core::db::migrations;
use cairn_core::feed::{FeedCache, load_feed};
use cairn_core::group::{StoryClass, group_for_notify};
use cairn_core::db::{ActivityFilter, ActivityStore};
use cairn_core::model::{ActivityIdentity, ActivityType, EntityRef, EntityType};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde_json::json;

fn at(minutes: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid ts") + Duration::minutes(minutes)
}

fn identity(user_fk: i64, entity: EntityRef, parent: Option<EntityRef>) -> ActivityIdentity {
    ActivityIdentity {
        user_fk,
        region_fk: 1,
        entity,
        parent,
    }
}

fn session(conn: &Connection) {
    let store = SqliteActivityStore::new(conn);
    let cache = FeedCache::default();
    let config = CompactionConfig::default();
    let compactor = Compactor::new(&store, &cache, &config);

    let block = EntityRef::new(EntityType::Block, 601);
    let route = EntityRef::new(EntityType::Route, 501);
    let file = EntityRef::new(EntityType::File, 900);

    // Anna creates a route, uploads a topo to it, then renames it later.
    compactor
        .record(&identity(301, route, Some(block)), ActivityType::Created, at(0))
        .expect("create route");
    compactor
        .record(&identity(301, file, Some(route)), ActivityType::Uploaded, at(2))
        .expect("upload");
    compactor
        .record_update(
            &identity(301, route, Some(block)),
            &json!({"name": "A"}),
            &json!({"name": "B"}),
            at(40),
        )
        .expect("rename");

    // Ben edits the same block.
    compactor
        .record_update(
            &identity(302, block, None),
            &json!({"name": "Block"}),
            &json!({"name": "Big Block"}),
            at(10),
        )
        .expect("edit block");
}

#[test]
fn feed_collapses_one_session_per_author() {
    let mut conn = Connection::open_in_memory().expect("open");
    migrations::migrate(&mut conn).expect("migrate");
    session(&conn);

    let store = SqliteActivityStore::new(&conn);
    let page = load_feed(
        &store,
        &FeedCache::default(),
        &FeedConfig::default(),
        1,
        0,
        at(60),
    )
    .expect("feed");

    assert_eq!(page.total, 2);
    let anna = page
        .stories
        .iter()
        .find(|s| s.user_fk == 301)
        .expect("anna's story");
    assert_eq!(anna.items.len(), 3);
    assert_eq!(anna.date, at(40));
    assert_eq!(anna.entity, EntityRef::new(EntityType::Route, 501));

    let ben = page
        .stories
        .iter()
        .find(|s| s.user_fk == 302)
        .expect("ben's story");
    assert_eq!(ben.items.len(), 1);
}

#[test]
fn notify_groups_split_by_class_and_author() {
    let mut conn = Connection::open_in_memory().expect("open");
    migrations::migrate(&mut conn).expect("migrate");
    session(&conn);

    let store = SqliteActivityStore::new(&conn);
    let rows = store
        .find_activities(&ActivityFilter {
            unnotified_only: true,
            ..ActivityFilter::default()
        })
        .expect("rows");

    let groups = group_for_notify(&rows, at(60), Duration::minutes(5));
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|g| g.class == StoryClass::Moderate));

    let anna = groups.iter().find(|g| g.user_fk == 301).expect("anna");
    assert_eq!(anna.activities.len(), 3);
    assert_eq!(anna.date, at(40));

    // Anna's rename is still within the debounce window at minute 43.
    let early = group_for_notify(&rows, at(43), Duration::minutes(5));
    assert_eq!(early.len(), 1);
    assert_eq!(early[0].user_fk, 302);
}
