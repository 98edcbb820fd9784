//! SQLite-backed [`EntityResolver`] over the content tables.
//!
//! Files are eager-loaded with blocks, routes and ascents. Breadcrumbs run
//! root-first through nested areas, then the block, then the route, ending
//! with the entity itself.

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

use super::{from_us, to_us};
use crate::model::{
    Area, Ascent, AscentType, Block, Entity, EntityRef, EntityType, FileMeta, Resolved, Route,
    User,
};
use crate::resolve::EntityResolver;

/// Area nesting deeper than this is treated as a broken chain.
const MAX_AREA_DEPTH: usize = 64;

/// Resolver over the content tables, shared by composition workers.
///
/// Idle connections sit in a pool. A resolver opened from a path opens
/// another connection whenever every pooled one is busy, so workers read in
/// parallel. One built from a single connection makes workers take turns.
pub struct SqliteEntityResolver {
    path: Option<PathBuf>,
    idle: Mutex<Vec<Connection>>,
    returned: Condvar,
}

impl SqliteEntityResolver {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            path: None,
            idle: Mutex::new(vec![conn]),
            returned: Condvar::new(),
        }
    }

    /// Open a resolver over an existing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let first = super::open_store(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            idle: Mutex::new(vec![first]),
            returned: Condvar::new(),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.checkout()?;
        let result = f(&conn);
        self.checkin(conn);
        result
    }

    fn checkout(&self) -> Result<Connection> {
        let poisoned = || anyhow!("entity resolver pool poisoned");
        let mut idle = self.idle.lock().map_err(|_| poisoned())?;
        loop {
            if let Some(conn) = idle.pop() {
                return Ok(conn);
            }
            if let Some(path) = &self.path {
                drop(idle);
                return super::open_connection(path).context("open resolver connection");
            }
            idle = self.returned.wait(idle).map_err(|_| poisoned())?;
        }
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
        }
        self.returned.notify_one();
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.idle.lock().map_or(0, |idle| idle.len())
    }
}

impl EntityResolver for SqliteEntityResolver {
    fn resolve(&self, entity: EntityRef) -> Result<Option<Resolved>> {
        self.with_conn(|conn| {
            resolve_entity(conn, entity).with_context(|| format!("resolve {entity}"))
        })
    }
}

fn resolve_entity(conn: &Connection, entity: EntityRef) -> Result<Option<Resolved>> {
    let resolved = match entity.kind {
        EntityType::Area => match load_area(conn, entity.id)? {
            Some(area) => {
                let crumbs = area_chain(conn, Some(area.id))?;
                Some(with_crumbs(Resolved::new(Entity::Area(area)), crumbs))
            }
            None => None,
        },
        EntityType::Block => match load_block(conn, entity.id)? {
            Some(block) => {
                let crumbs = block_chain(conn, &block)?;
                Some(with_crumbs(Resolved::new(Entity::Block(block)), crumbs))
            }
            None => None,
        },
        EntityType::Route => match load_route(conn, entity.id)? {
            Some(route) => {
                let crumbs = match load_block(conn, route.block_fk)? {
                    Some(block) => block_chain(conn, &block)?.map(|mut crumbs| {
                        crumbs.push(route.name.clone());
                        crumbs
                    }),
                    None => None,
                };
                Some(with_crumbs(Resolved::new(Entity::Route(route)), crumbs))
            }
            None => None,
        },
        EntityType::Ascent => load_ascent(conn, entity.id)?.map(|a| Resolved::new(Entity::Ascent(a))),
        EntityType::File => load_file(conn, entity.id)?.map(|f| Resolved::new(Entity::File(f))),
        EntityType::User => load_user(conn, entity.id)?.map(|u| Resolved::new(Entity::User(u))),
    };

    if resolved.is_none() {
        tracing::debug!(%entity, "entity did not resolve");
    }
    Ok(resolved)
}

fn with_crumbs(resolved: Resolved, crumbs: Option<Vec<String>>) -> Resolved {
    match crumbs {
        Some(crumbs) => resolved.with_breadcrumb(crumbs),
        None => resolved,
    }
}

/// Names of `start` and its ancestors, root-first. `None` on a missing or
/// cyclic ancestor.
fn area_chain(conn: &Connection, start: Option<i64>) -> Result<Option<Vec<String>>> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut next = start;

    while let Some(id) = next {
        if !seen.insert(id) || seen.len() > MAX_AREA_DEPTH {
            tracing::warn!(area = id, "area ancestry is cyclic or too deep");
            return Ok(None);
        }
        let Some(area) = load_area(conn, id)? else {
            return Ok(None);
        };
        names.push(area.name);
        next = area.parent_fk;
    }

    names.reverse();
    Ok(Some(names))
}

fn block_chain(conn: &Connection, block: &Block) -> Result<Option<Vec<String>>> {
    Ok(area_chain(conn, Some(block.area_fk))?.map(|mut crumbs| {
        crumbs.push(block.name.clone());
        crumbs
    }))
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

fn load_area(conn: &Connection, id: i64) -> Result<Option<Area>> {
    conn.query_row(
        "SELECT id, region_fk, parent_fk, name FROM areas WHERE id = ?1",
        [id],
        |row| {
            Ok(Area {
                id: row.get(0)?,
                region_fk: row.get(1)?,
                parent_fk: row.get(2)?,
                name: row.get(3)?,
            })
        },
    )
    .optional()
    .context("query area")
}

fn load_block(conn: &Connection, id: i64) -> Result<Option<Block>> {
    let block = conn
        .query_row(
            "SELECT id, area_fk, name FROM blocks WHERE id = ?1",
            [id],
            |row| {
                Ok(Block {
                    id: row.get(0)?,
                    area_fk: row.get(1)?,
                    name: row.get(2)?,
                    files: Vec::new(),
                })
            },
        )
        .optional()
        .context("query block")?;

    block
        .map(|mut block| {
            block.files = load_files(conn, "block_fk", id)?;
            Ok(block)
        })
        .transpose()
}

fn load_route(conn: &Connection, id: i64) -> Result<Option<Route>> {
    let route = conn
        .query_row(
            "SELECT id, block_fk, name, grade, rating FROM routes WHERE id = ?1",
            [id],
            |row| {
                Ok(Route {
                    id: row.get(0)?,
                    block_fk: row.get(1)?,
                    name: row.get(2)?,
                    grade: row.get(3)?,
                    rating: row.get(4)?,
                    files: Vec::new(),
                })
            },
        )
        .optional()
        .context("query route")?;

    route
        .map(|mut route| {
            route.files = load_files(conn, "route_fk", id)?;
            Ok(route)
        })
        .transpose()
}

fn load_ascent(conn: &Connection, id: i64) -> Result<Option<Ascent>> {
    let row = conn
        .query_row(
            "SELECT id, route_fk, user_fk, type, grade, date_us FROM ascents WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i32>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()
        .context("query ascent")?;

    let Some((id, route_fk, user_fk, raw_type, grade, date_us)) = row else {
        return Ok(None);
    };
    let ascent_type: AscentType = raw_type
        .parse()
        .with_context(|| format!("ascent {id} has an invalid type"))?;

    Ok(Some(Ascent {
        id,
        route_fk,
        user_fk,
        ascent_type,
        grade,
        date: from_us(date_us),
        files: load_files(conn, "ascent_fk", id)?,
    }))
}

fn load_file(conn: &Connection, id: i64) -> Result<Option<FileMeta>> {
    conn.query_row(
        "SELECT id, name, mime_type, video_id FROM files WHERE id = ?1",
        [id],
        row_to_file,
    )
    .optional()
    .context("query file")
}

fn load_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, username FROM users WHERE id = ?1",
        [id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
            })
        },
    )
    .optional()
    .context("query user")
}

fn load_files(conn: &Connection, owner_column: &str, owner: i64) -> Result<Vec<FileMeta>> {
    let sql = format!(
        "SELECT id, name, mime_type, video_id FROM files WHERE {owner_column} = ?1 ORDER BY id"
    );
    let mut stmt = conn.prepare_cached(&sql).context("prepare file query")?;
    let rows = stmt.query_map([owner], row_to_file).context("query files")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("read file rows")
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileMeta> {
    Ok(FileMeta {
        id: row.get(0)?,
        name: row.get(1)?,
        mime_type: row.get(2)?,
        video_id: row.get(3)?,
    })
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Insert or replace one content entity together with its files.
///
/// A bare `File` entity keeps whatever owner it already had.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub fn upsert_entity(conn: &Connection, entity: &Entity) -> Result<()> {
    match entity {
        Entity::Area(a) => {
            conn.execute(
                "INSERT OR REPLACE INTO areas (id, region_fk, parent_fk, name) VALUES (?1, ?2, ?3, ?4)",
                params![a.id, a.region_fk, a.parent_fk, a.name],
            )?;
        }
        Entity::Block(b) => {
            conn.execute(
                "INSERT OR REPLACE INTO blocks (id, area_fk, name) VALUES (?1, ?2, ?3)",
                params![b.id, b.area_fk, b.name],
            )?;
            replace_files(conn, "block_fk", b.id, &b.files)?;
        }
        Entity::Route(r) => {
            conn.execute(
                "INSERT OR REPLACE INTO routes (id, block_fk, name, grade, rating)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![r.id, r.block_fk, r.name, r.grade, r.rating],
            )?;
            replace_files(conn, "route_fk", r.id, &r.files)?;
        }
        Entity::Ascent(a) => {
            conn.execute(
                "INSERT OR REPLACE INTO ascents (id, route_fk, user_fk, type, grade, date_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    a.id,
                    a.route_fk,
                    a.user_fk,
                    a.ascent_type.as_str(),
                    a.grade,
                    to_us(a.date)
                ],
            )?;
            replace_files(conn, "ascent_fk", a.id, &a.files)?;
        }
        Entity::File(f) => {
            conn.execute(
                "INSERT INTO files (id, name, mime_type, video_id) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     mime_type = excluded.mime_type,
                     video_id = excluded.video_id",
                params![f.id, f.name, f.mime_type, f.video_id],
            )?;
        }
        Entity::User(u) => {
            conn.execute(
                "INSERT OR REPLACE INTO users (id, username) VALUES (?1, ?2)",
                params![u.id, u.username],
            )?;
        }
    }
    Ok(())
}

fn replace_files(conn: &Connection, owner_column: &str, owner: i64, files: &[FileMeta]) -> Result<()> {
    conn.execute(
        &format!("DELETE FROM files WHERE {owner_column} = ?1"),
        [owner],
    )?;
    let sql = format!(
        "INSERT OR REPLACE INTO files (id, name, mime_type, video_id, {owner_column})
         VALUES (?1, ?2, ?3, ?4, ?5)"
    );
    for file in files {
        conn.execute(
            &sql,
            params![file.id, file.name, file.mime_type, file.video_id, owner],
        )?;
    }
    Ok(())
}
