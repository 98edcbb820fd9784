use anyhow::Result;
use cairn_core::db::SqliteActivityStore;
use cairn_core::feed::{FeedCache, load_feed};
use cairn_core::group::Story;
use chrono::{DateTime, Utc};
use clap::Args;
use std::io::{self, Write};

use super::{Session, effective_now};
use crate::output::{OutputMode, Renderable, pretty_section, render_list};

#[derive(Args, Debug)]
pub struct FeedArgs {
    /// Region whose feed to show.
    #[arg(long)]
    pub region: i64,

    /// Zero-based page index.
    #[arg(long, default_value_t = 0)]
    pub page: usize,

    /// Evaluate the lookback window at this instant (RFC 3339).
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

struct StoryRow<'a>(&'a Story);

impl StoryRow<'_> {
    fn subject(&self) -> String {
        match self.0.parent {
            Some(parent) => format!("{} in {}", self.0.entity, parent),
            None => self.0.entity.to_string(),
        }
    }
}

impl Renderable for StoryRow<'_> {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}  user {:<6} {}",
            self.0.date.format("%Y-%m-%d %H:%M"),
            self.0.user_fk,
            self.subject()
        )?;
        for item in &self.0.items {
            let column = item
                .column_name
                .as_deref()
                .map(|c| format!(" {c}"))
                .unwrap_or_default();
            writeln!(w, "    {} {}{}", item.activity_type, item.entity, column)?;
        }
        Ok(())
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(&mut *w, self.0)?;
        writeln!(w)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            self.0.date.to_rfc3339(),
            self.0.user_fk,
            self.subject(),
            self.0.items.len()
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["DATE", "USER", "SUBJECT", "ITEMS"]
    }
}

/// Execute `cairn feed`.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub fn run_feed(args: &FeedArgs, session: &Session) -> Result<()> {
    let conn = session.open_existing()?;
    let store = SqliteActivityStore::new(&conn);
    let cache = FeedCache::default();
    let page = load_feed(
        &store,
        &cache,
        &session.config.feed,
        args.region,
        args.page,
        effective_now(args.at),
    )?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match session.output {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, &page)?;
            writeln!(out)?;
        }
        OutputMode::Text => {
            let rows: Vec<StoryRow<'_>> = page.stories.iter().map(StoryRow).collect();
            render_list(&mut out, &rows, OutputMode::Text)?;
        }
        OutputMode::Pretty => {
            let pages = page.total.div_ceil(page.page_size).max(1);
            pretty_section(
                &mut out,
                &format!(
                    "Region {} feed, page {}/{} ({} stories)",
                    page.region_fk,
                    page.page + 1,
                    pages,
                    page.total
                ),
            )?;
            let rows: Vec<StoryRow<'_>> = page.stories.iter().map(StoryRow).collect();
            render_list(&mut out, &rows, OutputMode::Pretty)?;
        }
    }
    Ok(())
}
