//! Activity store: the persistence seam used by the compactor, the feed and
//! the notification pass.
//!
//! [`ActivityStore`] is the narrow query interface; [`SqliteActivityStore`]
//! implements it over a borrowed connection so it can run inside the
//! caller's mutation transaction (`Transaction` derefs to `Connection`).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params, params_from_iter};
use std::fmt::Write as _;

use super::{from_us, to_us};
use crate::model::{Activity, ActivityIdentity, EntityRef, NewActivity};

/// SQLite caps bound parameters per statement; id lists are chunked below it.
const ID_CHUNK: usize = 500;

const ACTIVITY_COLUMNS: &str = "id, created_at_us, region_fk, type, user_fk, entity_type, \
     entity_id, parent_entity_type, parent_entity_id, column_name, old_value, new_value, \
     notified_at_us";

// ---------------------------------------------------------------------------
// Filters and patches
// ---------------------------------------------------------------------------

/// Filter criteria for activity reads. Set fields combine with AND.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub entity: Option<EntityRef>,
    pub user_fk: Option<i64>,
    pub region_fk: Option<i64>,
    /// Only rows created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub unnotified_only: bool,
    pub limit: Option<usize>,
}

impl ActivityFilter {
    /// Rows for one entity by one actor since `since`: the compactor's read.
    #[must_use]
    pub const fn for_identity(identity: &ActivityIdentity, since: DateTime<Utc>) -> Self {
        Self {
            entity: Some(identity.entity),
            user_fk: Some(identity.user_fk),
            region_fk: None,
            since: Some(since),
            unnotified_only: false,
            limit: None,
        }
    }

    /// Rows of one region since `since`: the feed's read.
    #[must_use]
    pub const fn for_region(region_fk: i64, since: DateTime<Utc>) -> Self {
        Self {
            entity: None,
            user_fk: None,
            region_fk: Some(region_fk),
            since: Some(since),
            unnotified_only: false,
            limit: None,
        }
    }
}

/// In-place amendment of a recent `updated` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityPatch {
    pub created_at: DateTime<Utc>,
    pub new_value: Option<String>,
}

// ---------------------------------------------------------------------------
// ActivityStore
// ---------------------------------------------------------------------------

/// Query interface over the activity log.
pub trait ActivityStore {
    /// Rows matching `filter`, newest first.
    fn find_activities(&self, filter: &ActivityFilter) -> Result<Vec<Activity>>;

    /// Append rows; returns how many were written. A second `created` row for
    /// the same entity is ignored.
    fn insert_activities(&self, rows: &[NewActivity]) -> Result<usize>;

    fn amend_activity(&self, id: i64, patch: &ActivityPatch) -> Result<()>;

    /// Set `notified` on the given rows and drop their claims.
    fn mark_notified(&self, ids: &[i64], at: DateTime<Utc>) -> Result<usize>;

    /// Claim up to `limit` un-notified rows for `claimant`, newest first.
    ///
    /// Rows claimed by another run are skipped unless the claim is older than
    /// `stale_before`. Returns every row currently claimed by `claimant`.
    fn claim_unnotified(
        &self,
        claimant: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Activity>>;

    /// Hand rows back to the queue without notifying them.
    fn release_claims(&self, ids: &[i64]) -> Result<usize>;
}

/// [`ActivityStore`] over a borrowed SQLite connection.
pub struct SqliteActivityStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteActivityStore<'conn> {
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Update `ids` in chunks with `sql_prefix ... WHERE id IN (...)`.
    ///
    /// `leading` parameters bind before the id list.
    fn update_ids(
        &self,
        sql_prefix: &str,
        suffix: &str,
        leading: &[i64],
        ids: &[i64],
    ) -> Result<usize> {
        let mut changed = 0;
        for chunk in ids.chunks(ID_CHUNK) {
            let mut sql = format!("{sql_prefix} WHERE id IN (");
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push(',');
                }
                let _ = write!(sql, "?{}", leading.len() + i + 1);
            }
            sql.push(')');
            sql.push_str(suffix);

            let values = leading.iter().chain(chunk.iter());
            changed += self
                .conn
                .execute(&sql, params_from_iter(values))
                .with_context(|| format!("execute update: {sql}"))?;
        }
        Ok(changed)
    }
}

impl ActivityStore for SqliteActivityStore<'_> {
    fn find_activities(&self, filter: &ActivityFilter) -> Result<Vec<Activity>> {
        let mut conditions: Vec<String> = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(entity) = filter.entity {
            param_values.push(Box::new(entity.kind.as_str()));
            conditions.push(format!("entity_type = ?{}", param_values.len()));
            param_values.push(Box::new(entity.id));
            conditions.push(format!("entity_id = ?{}", param_values.len()));
        }

        if let Some(user_fk) = filter.user_fk {
            param_values.push(Box::new(user_fk));
            conditions.push(format!("user_fk = ?{}", param_values.len()));
        }

        if let Some(region_fk) = filter.region_fk {
            param_values.push(Box::new(region_fk));
            conditions.push(format!("region_fk = ?{}", param_values.len()));
        }

        if let Some(since) = filter.since {
            param_values.push(Box::new(to_us(since)));
            conditions.push(format!("created_at_us >= ?{}", param_values.len()));
        }

        if filter.unnotified_only {
            conditions.push("notified_at_us IS NULL".to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = filter
            .limit
            .map_or_else(String::new, |limit| format!(" LIMIT {limit}"));

        let sql = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities{where_clause} \
             ORDER BY created_at_us DESC, id DESC{limit_clause}"
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("prepare find_activities query: {sql}"))?;

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(AsRef::as_ref).collect();

        let rows = stmt
            .query_map(params_from_iter(params_ref), row_to_activity)
            .context("execute find_activities query")?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read activity rows")
    }

    fn insert_activities(&self, rows: &[NewActivity]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT INTO activities (
                    created_at_us, region_fk, type, user_fk, entity_type, entity_id,
                    parent_entity_type, parent_entity_id, column_name, old_value, new_value
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT DO NOTHING",
            )
            .context("prepare activity insert")?;

        let mut written = 0;
        for row in rows {
            written += stmt
                .execute(params![
                    to_us(row.created_at),
                    row.region_fk,
                    row.activity_type.as_str(),
                    row.user_fk,
                    row.entity.kind.as_str(),
                    row.entity.id,
                    row.parent.map(|p| p.kind.as_str()),
                    row.parent.map(|p| p.id),
                    row.column_name,
                    row.old_value,
                    row.new_value,
                ])
                .with_context(|| format!("insert {} activity for {}", row.activity_type, row.entity))?;
        }

        if written < rows.len() {
            tracing::debug!(
                requested = rows.len(),
                written,
                "duplicate created activities ignored"
            );
        }

        Ok(written)
    }

    fn amend_activity(&self, id: i64, patch: &ActivityPatch) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE activities SET created_at_us = ?1, new_value = ?2 WHERE id = ?3",
                params![to_us(patch.created_at), patch.new_value, id],
            )
            .with_context(|| format!("amend activity {id}"))?;

        if changed == 0 {
            anyhow::bail!("activity {id} not found");
        }
        Ok(())
    }

    fn mark_notified(&self, ids: &[i64], at: DateTime<Utc>) -> Result<usize> {
        self.update_ids(
            "UPDATE activities SET notified_at_us = ?1, claimed_by = NULL, claimed_at_us = NULL",
            " AND notified_at_us IS NULL",
            &[to_us(at)],
            ids,
        )
    }

    fn claim_unnotified(
        &self,
        claimant: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Activity>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let claimed = self
            .conn
            .execute(
                "UPDATE activities
                 SET claimed_by = ?1, claimed_at_us = ?2
                 WHERE id IN (
                     SELECT id FROM activities
                     WHERE notified_at_us IS NULL
                       AND (claimed_by IS NULL OR claimed_at_us < ?3)
                     ORDER BY created_at_us DESC, id DESC
                     LIMIT ?4
                 )",
                params![claimant, to_us(now), to_us(stale_before), limit],
            )
            .context("claim un-notified activities")?;

        tracing::debug!(claimant, claimed, "claimed activities");

        let sql = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities
             WHERE claimed_by = ?1 AND notified_at_us IS NULL
             ORDER BY created_at_us DESC, id DESC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("prepare claimed activity query")?;
        let rows = stmt
            .query_map([claimant], row_to_activity)
            .context("read claimed activities")?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read claimed activity rows")
    }

    fn release_claims(&self, ids: &[i64]) -> Result<usize> {
        self.update_ids(
            "UPDATE activities SET claimed_by = NULL, claimed_at_us = NULL",
            "",
            &[],
            ids,
        )
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn row_to_activity(row: &Row<'_>) -> rusqlite::Result<Activity> {
    let parent_type: Option<String> = row.get(7)?;
    let parent_id: Option<i64> = row.get(8)?;
    let parent = match (parent_type, parent_id) {
        (Some(kind), Some(id)) => Some(EntityRef::new(
            kind.parse()
                .map_err(|err| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(err)))?,
            id,
        )),
        _ => None,
    };
    let notified_at: Option<i64> = row.get(12)?;

    Ok(Activity {
        id: row.get(0)?,
        created_at: from_us(row.get(1)?),
        region_fk: row.get(2)?,
        activity_type: parse_column(row, 3)?,
        user_fk: row.get(4)?,
        entity: EntityRef::new(parse_column(row, 5)?, row.get(6)?),
        parent,
        column_name: row.get(9)?,
        old_value: row.get(10)?,
        new_value: row.get(11)?,
        notified: notified_at.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;
    use crate::model::{ActivityType, EntityType};
    use chrono::Duration;

    fn test_db() -> Connection {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        migrations::migrate(&mut conn).expect("migrate schema");
        conn
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid ts") + Duration::minutes(minutes)
    }

    fn identity(entity_id: i64) -> ActivityIdentity {
        ActivityIdentity {
            user_fk: 301,
            region_fk: 1,
            entity: EntityRef::new(EntityType::Route, entity_id),
            parent: Some(EntityRef::new(EntityType::Block, 601)),
        }
    }

    fn update_row(entity_id: i64, minutes: i64, column: &str) -> NewActivity {
        NewActivity {
            column_name: Some(column.into()),
            old_value: Some("A".into()),
            new_value: Some("B".into()),
            ..identity(entity_id).activity(ActivityType::Updated, at(minutes))
        }
    }

    #[test]
    fn insert_and_find_newest_first() {
        let conn = test_db();
        let store = SqliteActivityStore::new(&conn);

        let written = store
            .insert_activities(&[update_row(501, 0, "name"), update_row(501, 5, "grade")])
            .expect("insert");
        assert_eq!(written, 2);

        let rows = store
            .find_activities(&ActivityFilter::for_identity(&identity(501), at(-1)))
            .expect("find");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].column_name.as_deref(), Some("grade"));
        assert_eq!(rows[1].created_at, at(0));
        assert_eq!(rows[0].parent, Some(EntityRef::new(EntityType::Block, 601)));
        assert!(!rows[0].notified);
    }

    #[test]
    fn find_respects_since_and_entity() {
        let conn = test_db();
        let store = SqliteActivityStore::new(&conn);
        store
            .insert_activities(&[
                update_row(501, 0, "name"),
                update_row(501, 30, "name"),
                update_row(502, 30, "name"),
            ])
            .expect("insert");

        let rows = store
            .find_activities(&ActivityFilter::for_identity(&identity(501), at(15)))
            .expect("find");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].created_at, at(30));
    }

    #[test]
    fn duplicate_created_is_ignored() {
        let conn = test_db();
        let store = SqliteActivityStore::new(&conn);
        let created = identity(501).activity(ActivityType::Created, at(0));

        assert_eq!(store.insert_activities(&[created.clone()]).expect("first"), 1);
        assert_eq!(store.insert_activities(&[created]).expect("second"), 0);
    }

    #[test]
    fn amend_rewrites_time_and_value() {
        let conn = test_db();
        let store = SqliteActivityStore::new(&conn);
        store
            .insert_activities(&[update_row(501, 0, "name")])
            .expect("insert");
        let row = &store
            .find_activities(&ActivityFilter::default())
            .expect("find")[0];

        store
            .amend_activity(
                row.id,
                &ActivityPatch {
                    created_at: at(3),
                    new_value: Some("C".into()),
                },
            )
            .expect("amend");

        let amended = &store
            .find_activities(&ActivityFilter::default())
            .expect("find")[0];
        assert_eq!(amended.old_value.as_deref(), Some("A"));
        assert_eq!(amended.new_value.as_deref(), Some("C"));
        assert_eq!(amended.created_at, at(3));
    }

    #[test]
    fn amend_missing_row_fails() {
        let conn = test_db();
        let store = SqliteActivityStore::new(&conn);
        let err = store
            .amend_activity(
                99,
                &ActivityPatch {
                    created_at: at(0),
                    new_value: None,
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn claims_do_not_overlap_until_stale() {
        let conn = test_db();
        let store = SqliteActivityStore::new(&conn);
        store
            .insert_activities(&[update_row(501, 0, "name"), update_row(502, 1, "name")])
            .expect("insert");

        let first = store
            .claim_unnotified("run-a", at(10), at(0), 100)
            .expect("claim a");
        assert_eq!(first.len(), 2);

        let second = store
            .claim_unnotified("run-b", at(11), at(1), 100)
            .expect("claim b");
        assert!(second.is_empty(), "fresh claims must not be stolen");

        let stolen = store
            .claim_unnotified("run-c", at(30), at(20), 100)
            .expect("claim c");
        assert_eq!(stolen.len(), 2, "stale claims are reclaimed");
    }

    #[test]
    fn mark_notified_removes_from_queue() {
        let conn = test_db();
        let store = SqliteActivityStore::new(&conn);
        store
            .insert_activities(&[update_row(501, 0, "name"), update_row(502, 1, "name")])
            .expect("insert");

        let claimed = store
            .claim_unnotified("run-a", at(10), at(0), 100)
            .expect("claim");
        let first_id = claimed[0].id;
        let second_id = claimed[1].id;

        assert_eq!(store.mark_notified(&[first_id], at(10)).expect("mark"), 1);
        assert_eq!(store.release_claims(&[second_id]).expect("release"), 1);

        let next = store
            .claim_unnotified("run-b", at(11), at(1), 100)
            .expect("claim again");
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, second_id);

        let unnotified = store
            .find_activities(&ActivityFilter {
                unnotified_only: true,
                ..ActivityFilter::default()
            })
            .expect("find");
        assert_eq!(unnotified.len(), 1);
    }

    #[test]
    fn update_ids_chunks_large_lists() {
        let conn = test_db();
        let store = SqliteActivityStore::new(&conn);
        let rows: Vec<NewActivity> = (0..1200).map(|i| update_row(1000 + i, 0, "name")).collect();
        store.insert_activities(&rows).expect("insert");

        let ids: Vec<i64> = store
            .find_activities(&ActivityFilter::default())
            .expect("find")
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(store.mark_notified(&ids, at(1)).expect("mark"), 1200);
    }
}
