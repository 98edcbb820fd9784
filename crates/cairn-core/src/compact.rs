//! Activity log compaction.
//!
//! Rapid edits to one entity by one actor collapse into one `updated` row per
//! column. Within the compaction window:
//!
//! - a column that already has an `updated` row is amended in place: its
//!   `created_at` moves to now and `new_value` takes the latest value, while
//!   `old_value` keeps the value from the start of the edit session;
//! - if the entity was `created` in the window, nothing is written at all;
//!   the creation already tells the story;
//! - remaining changed columns are appended as new `updated` rows.
//!
//! The compactor runs on the caller's connection, inside the same transaction
//! as the mutation it records.

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::config::{CompactionConfig, window_start};
use crate::db::{ActivityFilter, ActivityPatch, ActivityStore};
use crate::error::ErrorCode;
use crate::feed::FeedCache;
use crate::model::{ActivityIdentity, ActivityType, NewActivity};

// ---------------------------------------------------------------------------
// Column diff
// ---------------------------------------------------------------------------

/// One changed column between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnChange {
    pub column: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Neither snapshot handed to [`diff_snapshots`] is a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{}: neither snapshot is a JSON object", ErrorCode::InvalidSnapshot.code())]
pub struct MalformedSnapshot;

/// Stored form of a snapshot value. `null` and `""` are both absent.
fn stringify(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Diff two entity snapshots column by column, in column-name order.
///
/// Both sides are expected to be JSON objects. When only one is, every
/// column of that side counts as changed.
///
/// # Errors
///
/// Returns an error when neither side is an object.
pub fn diff_snapshots(old: &Value, new: &Value, ignored: &[String]) -> Result<Vec<ColumnChange>> {
    let (old_map, new_map) = match (old.as_object(), new.as_object()) {
        (Some(old), Some(new)) => (old, new),
        (None, None) => return Err(MalformedSnapshot.into()),
        (old_map, new_map) => {
            tracing::warn!(
                old_is_object = old_map.is_some(),
                new_is_object = new_map.is_some(),
                "malformed snapshot; treating every column as changed"
            );
            return Ok(fail_open(old_map, new_map, ignored));
        }
    };

    let columns: BTreeSet<&String> = old_map.keys().chain(new_map.keys()).collect();
    let changes = columns
        .into_iter()
        .filter(|column| !ignored.contains(column))
        .filter_map(|column| {
            let old_value = stringify(old_map.get(column));
            let new_value = stringify(new_map.get(column));
            (old_value != new_value).then(|| ColumnChange {
                column: column.clone(),
                old_value,
                new_value,
            })
        })
        .collect();

    Ok(changes)
}

fn fail_open(
    old: Option<&Map<String, Value>>,
    new: Option<&Map<String, Value>>,
    ignored: &[String],
) -> Vec<ColumnChange> {
    let Some(present) = old.or(new) else {
        return Vec::new();
    };
    present
        .keys()
        .filter(|column| !ignored.contains(column))
        .map(|column| ColumnChange {
            column: column.clone(),
            old_value: stringify(old.and_then(|m| m.get(column))),
            new_value: stringify(new.and_then(|m| m.get(column))),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Compactor
// ---------------------------------------------------------------------------

/// What one recording call wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionOutcome {
    /// Existing rows amended in place.
    pub amended: usize,
    /// New rows appended.
    pub inserted: usize,
    /// Nothing written because a `created` row already covers it.
    pub suppressed: bool,
}

impl CompactionOutcome {
    #[must_use]
    pub const fn wrote(&self) -> bool {
        self.amended > 0 || self.inserted > 0
    }
}

/// Records mutations into the activity log.
pub struct Compactor<'a, S: ActivityStore + ?Sized> {
    store: &'a S,
    cache: &'a FeedCache,
    window: Duration,
    ignored_columns: &'a [String],
}

impl<'a, S: ActivityStore + ?Sized> Compactor<'a, S> {
    #[must_use]
    pub fn new(store: &'a S, cache: &'a FeedCache, config: &'a CompactionConfig) -> Self {
        Self {
            store,
            cache,
            window: config.window(),
            ignored_columns: &config.ignored_columns,
        }
    }

    /// Record an update from before/after snapshots of one entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshots cannot be diffed or a store call
    /// fails.
    pub fn record_update(
        &self,
        identity: &ActivityIdentity,
        old: &Value,
        new: &Value,
        now: DateTime<Utc>,
    ) -> Result<CompactionOutcome> {
        let mut pending = diff_snapshots(old, new, self.ignored_columns)?;
        if pending.is_empty() {
            tracing::trace!(entity = %identity.entity, "no-op update");
            return Ok(CompactionOutcome::default());
        }

        let recent = self
            .store
            .find_activities(&ActivityFilter::for_identity(
                identity,
                window_start(now, self.window)?,
            ))?;

        if recent
            .iter()
            .any(|a| a.activity_type == ActivityType::Created)
        {
            tracing::debug!(
                entity = %identity.entity,
                user = identity.user_fk,
                "update suppressed by recent creation"
            );
            return Ok(CompactionOutcome {
                suppressed: true,
                ..CompactionOutcome::default()
            });
        }

        let mut outcome = CompactionOutcome::default();
        for existing in recent
            .iter()
            .filter(|a| a.activity_type == ActivityType::Updated)
        {
            let Some(position) = pending
                .iter()
                .position(|change| existing.is_column(&change.column))
            else {
                continue;
            };
            let change = pending.remove(position);
            self.store.amend_activity(
                existing.id,
                &ActivityPatch {
                    created_at: now,
                    new_value: change.new_value,
                },
            )?;
            outcome.amended += 1;
        }

        let rows: Vec<NewActivity> = pending
            .into_iter()
            .map(|change| NewActivity {
                column_name: Some(change.column),
                old_value: change.old_value,
                new_value: change.new_value,
                ..identity.activity(ActivityType::Updated, now)
            })
            .collect();
        outcome.inserted = self.store.insert_activities(&rows)?;

        self.finish(identity, outcome);
        Ok(outcome)
    }

    /// Record a `created`, `deleted` or `uploaded` fact.
    ///
    /// A second `created` for the same entity is ignored and reported as
    /// suppressed.
    ///
    /// # Errors
    ///
    /// Returns an error for `updated` (use [`Self::record_update`]) or if the
    /// insert fails.
    pub fn record(
        &self,
        identity: &ActivityIdentity,
        activity_type: ActivityType,
        now: DateTime<Utc>,
    ) -> Result<CompactionOutcome> {
        self.record_row(identity.activity(activity_type, now))
    }

    /// Record a fact with column data, e.g. a role grant on a user.
    ///
    /// # Errors
    ///
    /// Same as [`Self::record`].
    pub fn record_row(&self, row: NewActivity) -> Result<CompactionOutcome> {
        if row.activity_type == ActivityType::Updated {
            bail!("updates must be recorded from snapshots");
        }
        let identity = ActivityIdentity {
            user_fk: row.user_fk,
            region_fk: row.region_fk,
            entity: row.entity,
            parent: row.parent,
        };
        let is_create = row.activity_type == ActivityType::Created;
        let inserted = self.store.insert_activities(std::slice::from_ref(&row))?;

        let outcome = CompactionOutcome {
            amended: 0,
            inserted,
            suppressed: is_create && inserted == 0,
        };
        if outcome.suppressed {
            tracing::warn!(
                code = ErrorCode::DuplicateCreate.code(),
                entity = %identity.entity,
                "entity already has a created activity"
            );
        }
        self.finish(&identity, outcome);
        Ok(outcome)
    }

    fn finish(&self, identity: &ActivityIdentity, outcome: CompactionOutcome) {
        if outcome.wrote() {
            self.cache.invalidate(identity.region_fk);
            tracing::debug!(
                entity = %identity.entity,
                user = identity.user_fk,
                amended = outcome.amended,
                inserted = outcome.inserted,
                "activity recorded"
            );
        }
    }
}
