use anyhow::{Context as _, Result};
use cairn_core::config::{PipelineConfig, default_config_path};
use cairn_core::db::{migrations, open_store};
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

use super::Session;
use crate::output::{pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Also write a config file with every default spelled out.
    #[arg(long)]
    pub write_config: bool,
}

#[derive(Debug, Serialize)]
struct InitOutput {
    db: String,
    schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<String>,
}

/// Execute `cairn init`: create or migrate the activity store.
///
/// # Errors
///
/// Returns an error if the database cannot be created or migrated, or the
/// config file cannot be written.
pub fn run_init(args: &InitArgs, session: &Session) -> Result<()> {
    let conn = open_store(&session.db_path)?;
    let schema_version =
        migrations::current_schema_version(&conn).context("read schema version")?;

    let config = if args.write_config {
        Some(write_default_config(session.config_path.clone())?)
    } else {
        None
    };

    tracing::info!(db = %session.db_path.display(), schema_version, "store ready");

    let output = InitOutput {
        db: session.db_path.display().to_string(),
        schema_version,
        config: config.map(|path| path.display().to_string()),
    };
    render_mode(
        session.output,
        &output,
        |out, w| {
            writeln!(w, "{}\t{}", out.db, out.schema_version)?;
            if let Some(config) = &out.config {
                writeln!(w, "{config}")?;
            }
            Ok(())
        },
        |out, w| {
            pretty_section(w, "Activity store")?;
            pretty_kv(w, "Database", &out.db)?;
            pretty_kv(w, "Schema", format!("v{}", out.schema_version))?;
            if let Some(config) = &out.config {
                pretty_kv(w, "Config", config)?;
            }
            Ok(())
        },
    )
}

/// An existing config file is left untouched.
fn write_default_config(explicit: Option<PathBuf>) -> Result<PathBuf> {
    let path = explicit
        .or_else(default_config_path)
        .context("no config directory available; pass --config")?;
    if path.exists() {
        return Ok(path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create config directory {}", parent.display()))?;
    }
    let body = toml::to_string_pretty(&PipelineConfig::default())
        .context("serialize default config")?;
    std::fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
