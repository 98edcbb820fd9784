use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ErrorCode;
use crate::i18n::Language;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub i18n: I18nConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// How far back an `updated` row may be amended instead of appended.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
    #[serde(default = "default_ignored_columns")]
    pub ignored_columns: Vec<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            ignored_columns: default_ignored_columns(),
        }
    }
}

impl CompactionConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        minutes(self.window_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_group_time_limit_minutes")]
    pub group_time_limit_minutes: i64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            group_time_limit_minutes: default_group_time_limit_minutes(),
            lookback_days: default_lookback_days(),
            page_size: default_page_size(),
        }
    }
}

impl FeedConfig {
    #[must_use]
    pub fn group_time_limit(&self) -> Duration {
        minutes(self.group_time_limit_minutes)
    }

    #[must_use]
    pub fn lookback(&self) -> Duration {
        days(self.lookback_days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_debounce_minutes")]
    pub debounce_minutes: i64,
    #[serde(default = "default_ascent_max_age_days")]
    pub ascent_max_age_days: i64,
    /// Claims older than this are considered abandoned by a crashed run.
    #[serde(default = "default_claim_ttl_minutes")]
    pub claim_ttl_minutes: i64,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            debounce_minutes: default_debounce_minutes(),
            ascent_max_age_days: default_ascent_max_age_days(),
            claim_ttl_minutes: default_claim_ttl_minutes(),
            batch_limit: default_batch_limit(),
        }
    }
}

impl NotifyConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        minutes(self.debounce_minutes)
    }

    #[must_use]
    pub fn ascent_max_age(&self) -> Duration {
        days(self.ascent_max_age_days)
    }

    #[must_use]
    pub fn claim_ttl(&self) -> Duration {
        minutes(self.claim_ttl_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_media_hostname")]
    pub hostname: String,
    #[serde(default = "default_thumbnail_format")]
    pub thumbnail_format: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            hostname: default_media_hostname(),
            thumbnail_format: default_thumbnail_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct I18nConfig {
    #[serde(default = "default_languages")]
    pub languages: Vec<Language>,
}

impl Default for I18nConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
        }
    }
}

/// Longest span any duration setting may name.
pub const MAX_SPAN_DAYS: i64 = 36_500;
const MAX_SPAN_MINUTES: i64 = MAX_SPAN_DAYS * 24 * 60;

// Out-of-range values saturate; `PipelineConfig::validate` rejects them
// before they reach the pipeline.
fn minutes(value: i64) -> Duration {
    Duration::try_minutes(value.max(0)).unwrap_or(Duration::MAX)
}

fn days(value: i64) -> Duration {
    Duration::try_days(value.max(0)).unwrap_or(Duration::MAX)
}

/// Start of a window of length `span` ending at `now`.
///
/// # Errors
///
/// Returns an error when the start falls outside the representable range.
pub fn window_start(now: DateTime<Utc>, span: Duration) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(span)
        .ok_or_else(|| anyhow!("window of {span} before {now} is out of range"))
}

fn check_range(field: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    bail!(
        "{}: {field} = {value} is out of range ({min}..={max})",
        ErrorCode::ConfigParseError.code()
    )
}

impl PipelineConfig {
    /// Reject durations and sizes the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first out-of-range field.
    pub fn validate(&self) -> Result<()> {
        let c = &self.compaction;
        let f = &self.feed;
        let n = &self.notify;
        check_range("compaction.window_minutes", c.window_minutes, 0, MAX_SPAN_MINUTES)?;
        check_range(
            "feed.group_time_limit_minutes",
            f.group_time_limit_minutes,
            0,
            MAX_SPAN_MINUTES,
        )?;
        check_range("feed.lookback_days", f.lookback_days, 0, MAX_SPAN_DAYS)?;
        check_range("notify.debounce_minutes", n.debounce_minutes, 0, MAX_SPAN_MINUTES)?;
        check_range("notify.ascent_max_age_days", n.ascent_max_age_days, 0, MAX_SPAN_DAYS)?;
        check_range("notify.claim_ttl_minutes", n.claim_ttl_minutes, 1, MAX_SPAN_MINUTES)?;
        if f.page_size == 0 {
            bail!("{}: feed.page_size must be at least 1", ErrorCode::ConfigParseError.code());
        }
        if n.batch_limit == 0 {
            bail!("{}: notify.batch_limit must be at least 1", ErrorCode::ConfigParseError.code());
        }
        Ok(())
    }
}

/// Load pipeline configuration from `path`. A missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or holds
/// out-of-range values.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        return Ok(PipelineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<PipelineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// Resolve configuration: an explicit path wins, then the per-user data dir.
///
/// # Errors
///
/// Returns an error if the chosen file exists but fails to load.
pub fn resolve_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }

    match default_config_path() {
        Some(path) => load_config(&path),
        None => Ok(PipelineConfig::default()),
    }
}

#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("cairn/config.toml"))
}

/// Database location: explicit flag, then `CAIRN_DB`, then the data dir.
#[must_use]
pub fn resolve_db_path(explicit: Option<&Path>, env_db: Option<String>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = env_db.filter(|value| !value.trim().is_empty()) {
        return PathBuf::from(path);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cairn/cairn.sqlite3")
}

const fn default_window_minutes() -> i64 {
    15
}

fn default_ignored_columns() -> Vec<String> {
    ["id", "created_at", "updated_at"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

const fn default_group_time_limit_minutes() -> i64 {
    180
}

const fn default_lookback_days() -> i64 {
    30
}

const fn default_page_size() -> usize {
    20
}

const fn default_debounce_minutes() -> i64 {
    5
}

const fn default_ascent_max_age_days() -> i64 {
    2
}

const fn default_claim_ttl_minutes() -> i64 {
    10
}

const fn default_batch_limit() -> usize {
    1000
}

fn default_media_hostname() -> String {
    "media.localhost".to_string()
}

fn default_thumbnail_format() -> String {
    "webp".to_string()
}

fn default_languages() -> Vec<Language> {
    Language::ALL.to_vec()
}
