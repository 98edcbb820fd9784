use anyhow::{Result, bail};
use cairn_core::compact::{CompactionOutcome, Compactor};
use cairn_core::db::SqliteActivityStore;
use cairn_core::feed::FeedCache;
use cairn_core::model::{ActivityType, EntityRef, NewActivity};
use clap::Args;
use serde::Serialize;
use std::io::Write;

use super::{IdentityArgs, Session, effective_now};
use crate::output::{CliError, pretty_kv, render_error, render_mode};

#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Activity type: created, deleted or uploaded.
    #[arg(long = "type", value_name = "TYPE")]
    pub activity_type: ActivityType,

    #[command(flatten)]
    pub identity: IdentityArgs,

    /// Column the fact concerns, e.g. `role` or `invitation` on a user.
    #[arg(long)]
    pub column: Option<String>,

    /// Value for `--column`, e.g. the granted role.
    #[arg(long, requires = "column")]
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordOutput {
    pub entity: EntityRef,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    #[serde(flatten)]
    pub outcome: CompactionOutcome,
}

/// Execute `cairn record`.
///
/// # Errors
///
/// Returns an error for `--type updated`, or if the store write fails.
pub fn run_record(args: &RecordArgs, session: &Session) -> Result<()> {
    if args.activity_type == ActivityType::Updated {
        render_error(
            session.output,
            &CliError {
                suggestion: Some("Use `cairn update --old <json> --new <json>`.".into()),
                ..CliError::new("updates are recorded from before/after snapshots")
            },
        )?;
        bail!("updates are recorded from before/after snapshots");
    }

    let conn = session.open_existing()?;
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let compactor = Compactor::new(&store, &cache, &session.config.compaction);

    let identity = args.identity.identity();
    let now = effective_now(args.identity.at);
    let row = NewActivity {
        column_name: args.column.clone(),
        new_value: args.value.clone(),
        ..identity.activity(args.activity_type, now)
    };
    let outcome = compactor.record_row(row)?;

    let output = RecordOutput {
        entity: identity.entity,
        activity_type: args.activity_type,
        outcome,
    };
    render_mode(
        session.output,
        &output,
        |out, w| {
            writeln!(
                w,
                "{}\t{}\t{}",
                out.activity_type,
                out.entity,
                if out.outcome.suppressed { "suppressed" } else { "recorded" }
            )
        },
        |out, w| {
            pretty_kv(w, "Entity", out.entity.to_string())?;
            pretty_kv(w, "Type", out.activity_type.as_str())?;
            if out.outcome.suppressed {
                pretty_kv(w, "Result", "already recorded, nothing written")
            } else {
                pretty_kv(w, "Result", format!("{} row(s) written", out.outcome.inserted))
            }
        },
    )
}
