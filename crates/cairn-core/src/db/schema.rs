//! SQLite schema for the activity store.
//!
//! - `activities` is the append-only activity log. Rows are only ever
//!   amended by the compactor (`created_at_us`, `new_value`) and by the
//!   notification pass (`notified_at_us`, claim columns).
//! - The content tables (`users`, `areas`, `blocks`, `routes`, `ascents`,
//!   `files`) back the SQLite entity resolver. They mirror an external store
//!   and carry no foreign keys, so dangling references survive deletion.

/// Migration v1: activity log, claim columns and store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at_us INTEGER NOT NULL,
    region_fk INTEGER NOT NULL,
    type TEXT NOT NULL CHECK (type IN ('created', 'updated', 'deleted', 'uploaded')),
    user_fk INTEGER NOT NULL,
    entity_type TEXT NOT NULL
        CHECK (entity_type IN ('area', 'block', 'route', 'ascent', 'file', 'user')),
    entity_id INTEGER NOT NULL,
    parent_entity_type TEXT
        CHECK (parent_entity_type IS NULL
               OR parent_entity_type IN ('area', 'block', 'route', 'ascent', 'file', 'user')),
    parent_entity_id INTEGER,
    column_name TEXT,
    old_value TEXT,
    new_value TEXT,
    notified_at_us INTEGER,
    claimed_by TEXT,
    claimed_at_us INTEGER,
    CHECK ((parent_entity_type IS NULL) = (parent_entity_id IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_activities_identity
    ON activities(entity_type, entity_id, user_fk, created_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_activities_region_created
    ON activities(region_fk, created_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_activities_unnotified
    ON activities(notified_at_us, claimed_by);

-- One creation fact per entity. User rows record role and invitation
-- changes, which legitimately repeat.
CREATE UNIQUE INDEX IF NOT EXISTS uq_activities_single_created
    ON activities(entity_type, entity_id)
    WHERE type = 'created' AND entity_type <> 'user';

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
";

/// Migration v2: content tables read by the SQLite entity resolver.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS areas (
    id INTEGER PRIMARY KEY,
    region_fk INTEGER NOT NULL,
    parent_fk INTEGER,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY,
    area_fk INTEGER NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS routes (
    id INTEGER PRIMARY KEY,
    block_fk INTEGER NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    grade INTEGER,
    rating INTEGER CHECK (rating IS NULL OR rating BETWEEN 0 AND 3)
);

CREATE TABLE IF NOT EXISTS ascents (
    id INTEGER PRIMARY KEY,
    route_fk INTEGER NOT NULL,
    user_fk INTEGER NOT NULL,
    type TEXT NOT NULL CHECK (type IN ('flash', 'send', 'repeat', 'attempt')),
    grade INTEGER,
    date_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    video_id TEXT,
    block_fk INTEGER,
    route_fk INTEGER,
    ascent_fk INTEGER
);

CREATE INDEX IF NOT EXISTS idx_areas_parent ON areas(parent_fk);
CREATE INDEX IF NOT EXISTS idx_blocks_area ON blocks(area_fk);
CREATE INDEX IF NOT EXISTS idx_routes_block ON routes(block_fk);
CREATE INDEX IF NOT EXISTS idx_ascents_route ON ascents(route_fk);
CREATE INDEX IF NOT EXISTS idx_files_block ON files(block_fk);
CREATE INDEX IF NOT EXISTS idx_files_route ON files(route_fk);
CREATE INDEX IF NOT EXISTS idx_files_ascent ON files(ascent_fk);
";

/// Indexes that must exist after all migrations.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_activities_identity",
    "idx_activities_region_created",
    "idx_activities_unnotified",
    "uq_activities_single_created",
    "idx_areas_parent",
    "idx_blocks_area",
    "idx_routes_block",
    "idx_ascents_route",
    "idx_files_block",
    "idx_files_route",
    "idx_files_ascent",
];
