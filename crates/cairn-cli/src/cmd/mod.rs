pub mod completions;
pub mod feed;
pub mod init;
pub mod notify;
pub mod put;
pub mod record;
pub mod update;

use anyhow::{Result, bail};
use cairn_core::config::PipelineConfig;
use cairn_core::db::open_store;
use cairn_core::error::ErrorCode;
use cairn_core::model::{ActivityIdentity, EntityRef, EntityType};
use chrono::{DateTime, Utc};
use clap::Args;
use rusqlite::Connection;
use std::path::PathBuf;

use crate::output::{CliError, OutputMode, render_error};

/// Resolved global options every command runs against.
#[derive(Debug, Clone)]
pub struct Session {
    pub db_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub config: PipelineConfig,
    pub output: OutputMode,
}

impl Session {
    /// Open a store that `cairn init` already created.
    ///
    /// # Errors
    ///
    /// Returns an error if the database file is missing or cannot be opened.
    pub fn open_existing(&self) -> Result<Connection> {
        if !self.db_path.exists() {
            render_error(
                self.output,
                &CliError::from_code(
                    ErrorCode::NotInitialized,
                    format!("no activity store at {}", self.db_path.display()),
                ),
            )?;
            bail!("activity store not initialized: {}", self.db_path.display());
        }
        open_store(&self.db_path)
    }
}

/// Who changed what, shared by `record` and `update`.
#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    /// Acting user id.
    #[arg(long)]
    pub user: i64,

    /// Region the entity belongs to.
    #[arg(long)]
    pub region: i64,

    /// Changed entity as `<type>:<id>`, e.g. `route:501`.
    #[arg(long, value_parser = parse_entity_ref)]
    pub entity: EntityRef,

    /// Parent entity as `<type>:<id>`, e.g. `block:601`.
    #[arg(long, value_parser = parse_entity_ref)]
    pub parent: Option<EntityRef>,

    /// Timestamp (RFC 3339). Defaults to now.
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

impl IdentityArgs {
    #[must_use]
    pub const fn identity(&self) -> ActivityIdentity {
        ActivityIdentity {
            user_fk: self.user,
            region_fk: self.region,
            entity: self.entity,
            parent: self.parent,
        }
    }
}

/// Parse `kind:id`, e.g. `route:501`.
pub fn parse_entity_ref(raw: &str) -> Result<EntityRef, String> {
    let (kind, id) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected <type>:<id>, got '{raw}'"))?;
    let kind: EntityType = kind.parse().map_err(|err| format!("{err}"))?;
    let id: i64 = id
        .parse()
        .map_err(|_| format!("entity id must be an integer, got '{id}'"))?;
    Ok(EntityRef::new(kind, id))
}

/// `--at` when given, else the wall clock.
pub fn effective_now(at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    at.unwrap_or_else(Utc::now)
}
