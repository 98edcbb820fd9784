use anyhow::{Context as _, Result, bail};
use cairn_core::compact::{CompactionOutcome, Compactor, MalformedSnapshot};
use cairn_core::config::CompactionConfig;
use cairn_core::db::SqliteActivityStore;
use cairn_core::error::ErrorCode;
use cairn_core::feed::FeedCache;
use cairn_core::model::{ActivityIdentity, EntityRef};
use chrono::{DateTime, Utc};
use clap::Args;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;

use super::{IdentityArgs, Session, effective_now};
use crate::output::{CliError, OutputMode, pretty_kv, render_error, render_mode};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub identity: IdentityArgs,

    /// Entity snapshot before the mutation, as a JSON object.
    #[arg(long)]
    pub old: String,

    /// Entity snapshot after the mutation, as a JSON object.
    #[arg(long)]
    pub new: String,
}

#[derive(Debug, Serialize)]
struct UpdateOutput {
    entity: EntityRef,
    #[serde(flatten)]
    outcome: CompactionOutcome,
}

/// Execute `cairn update`: diff the snapshots and compact into the log.
///
/// # Errors
///
/// Returns an error if a snapshot is not JSON, if both snapshots are not
/// objects, or if the store write fails.
pub fn run_update(args: &UpdateArgs, session: &Session) -> Result<()> {
    let old = parse_snapshot("--old", &args.old, session.output)?;
    let new = parse_snapshot("--new", &args.new, session.output)?;

    let mut conn = session.open_existing()?;
    let identity = args.identity.identity();
    let outcome = match compact_update(
        &mut conn,
        &session.config.compaction,
        &identity,
        (&old, &new),
        effective_now(args.identity.at),
    ) {
        Ok(outcome) => outcome,
        Err(err) => {
            render_error(
                session.output,
                &CliError::from_code(failure_code(&err), format!("{err:#}")),
            )?;
            return Err(err);
        }
    };

    let output = UpdateOutput {
        entity: identity.entity,
        outcome,
    };
    render_mode(
        session.output,
        &output,
        |out, w| {
            writeln!(
                w,
                "{}\tamended={}\tinserted={}\tsuppressed={}",
                out.entity, out.outcome.amended, out.outcome.inserted, out.outcome.suppressed
            )
        },
        |out, w| {
            pretty_kv(w, "Entity", out.entity.to_string())?;
            if out.outcome.suppressed {
                return pretty_kv(w, "Result", "covered by a recent creation");
            }
            if !out.outcome.wrote() {
                return pretty_kv(w, "Result", "no tracked column changed");
            }
            pretty_kv(w, "Amended", out.outcome.amended.to_string())?;
            pretty_kv(w, "Inserted", out.outcome.inserted.to_string())
        },
    )
}

/// Compact one update in an immediate transaction, so the read of recent
/// rows, the amendments and the inserts commit together or not at all.
fn compact_update(
    conn: &mut Connection,
    config: &CompactionConfig,
    identity: &ActivityIdentity,
    (old, new): (&Value, &Value),
    now: DateTime<Utc>,
) -> Result<CompactionOutcome> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin update transaction")?;
    let outcome = {
        let store = SqliteActivityStore::new(&tx);
        let cache = FeedCache::default();
        Compactor::new(&store, &cache, config).record_update(identity, old, new, now)?
    };
    tx.commit().context("commit update transaction")?;
    Ok(outcome)
}

fn failure_code(err: &anyhow::Error) -> ErrorCode {
    if err.downcast_ref::<MalformedSnapshot>().is_some() {
        ErrorCode::InvalidSnapshot
    } else {
        ErrorCode::StoreWriteFailed
    }
}

fn parse_snapshot(flag: &str, raw: &str, mode: OutputMode) -> Result<Value> {
    match serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON")) {
        Ok(value) => Ok(value),
        Err(err) => {
            render_error(
                mode,
                &CliError::from_code(ErrorCode::InvalidSnapshot, format!("{err:#}")),
            )?;
            bail!("invalid snapshot for {flag}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::db::migrations;
    use cairn_core::model::EntityType;
    use serde_json::json;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_714_557_600, 0).expect("valid ts")
            + chrono::Duration::minutes(minutes)
    }

    fn test_db() -> Connection {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        migrations::migrate(&mut conn).expect("migrate");
        conn
    }

    fn route() -> ActivityIdentity {
        ActivityIdentity {
            user_fk: 301,
            region_fk: 1,
            entity: EntityRef::new(EntityType::Route, 501),
            parent: Some(EntityRef::new(EntityType::Block, 601)),
        }
    }

    fn new_value(conn: &Connection, column: &str) -> Option<String> {
        conn.query_row(
            "SELECT new_value FROM activities WHERE column_name = ?1",
            [column],
            |row| row.get(0),
        )
        .expect("row exists")
    }

    #[test]
    fn update_commits_amend_and_insert_together() {
        let mut conn = test_db();
        let config = CompactionConfig::default();

        let first = compact_update(
            &mut conn,
            &config,
            &route(),
            (&json!({"name": "A"}), &json!({"name": "B"})),
            at(0),
        )
        .expect("first update");
        assert_eq!(first.inserted, 1);

        let second = compact_update(
            &mut conn,
            &config,
            &route(),
            (&json!({"name": "B", "grade": 11}), &json!({"name": "C", "grade": 12})),
            at(1),
        )
        .expect("second update");
        assert_eq!((second.amended, second.inserted), (1, 1));
        assert_eq!(new_value(&conn, "name").as_deref(), Some("C"));
        assert_eq!(new_value(&conn, "grade").as_deref(), Some("12"));
    }

    #[test]
    fn failed_insert_rolls_back_the_amendment() {
        let mut conn = test_db();
        let config = CompactionConfig::default();
        compact_update(
            &mut conn,
            &config,
            &route(),
            (&json!({"name": "A"}), &json!({"name": "B"})),
            at(0),
        )
        .expect("first update");

        conn.execute_batch(
            "CREATE TEMP TRIGGER reject_insert BEFORE INSERT ON activities
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .expect("install trigger");

        let err = compact_update(
            &mut conn,
            &config,
            &route(),
            (&json!({"name": "B", "grade": 11}), &json!({"name": "C", "grade": 12})),
            at(1),
        )
        .expect_err("insert is rejected");

        assert_eq!(failure_code(&err), ErrorCode::StoreWriteFailed);
        assert_eq!(new_value(&conn, "name").as_deref(), Some("B"));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 1);
    }

    #[test]
    fn only_malformed_snapshots_map_to_invalid_snapshot() {
        let mut conn = test_db();
        let err = compact_update(
            &mut conn,
            &CompactionConfig::default(),
            &route(),
            (&json!(1), &json!([2])),
            at(0),
        )
        .expect_err("neither side is an object");
        assert_eq!(failure_code(&err), ErrorCode::InvalidSnapshot);
    }
}
