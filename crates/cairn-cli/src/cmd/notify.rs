use anyhow::{Context as _, Result};
use cairn_core::db::{SqliteActivityStore, SqliteEntityResolver};
use cairn_core::dispatch::{Delivery, DeliveryTarget, PassReport, run_notification_pass};
use cairn_core::i18n::translate;
use cairn_core::notify::{ComposeContext, Notification};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use std::cell::RefCell;
use std::io::{self, Write};

use super::{Session, effective_now};
use crate::output::{pretty_kv, pretty_section, render_mode_to};

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Claim name for this run. Defaults to one derived from pid and time.
    #[arg(long)]
    pub claimant: Option<String>,

    /// Run the pass as of this instant (RFC 3339).
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    target: &'a DeliveryTarget,
    notification: &'a Notification,
}

/// Writes one JSON object per notification.
pub struct JsonLines<W: Write> {
    out: RefCell<W>,
}

impl<W: Write> JsonLines<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out: RefCell::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write> Delivery for JsonLines<W> {
    fn dispatch(&self, notification: &Notification, target: &DeliveryTarget) -> Result<()> {
        let mut out = self.out.borrow_mut();
        serde_json::to_writer(&mut *out, &Envelope {
            target,
            notification,
        })
        .context("encode notification")?;
        writeln!(out).context("write notification")?;
        out.flush().context("flush notification")
    }
}

/// Execute `cairn notify`: one pass, notifications to stdout, report to stderr.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or a store step fails.
pub fn run_notify(args: &NotifyArgs, session: &Session) -> Result<()> {
    let conn = session.open_existing()?;
    let store = SqliteActivityStore::new(&conn);
    let resolver = SqliteEntityResolver::open(&session.db_path)?;

    let now = effective_now(args.at);
    let claimant = args.claimant.clone().unwrap_or_else(|| {
        format!("cairn-{}-{}", std::process::id(), Utc::now().timestamp_micros())
    });
    let ctx = ComposeContext::from_config(&session.config, translate, now);
    let delivery = JsonLines::new(io::stdout().lock());

    let report = run_notification_pass(
        &store,
        &resolver,
        &delivery,
        &session.config.notify,
        &ctx,
        &claimant,
        now,
    )?;

    let stderr = io::stderr();
    let mut err = stderr.lock();
    render_mode_to(
        &mut err,
        session.output,
        &report,
        |r, w| {
            writeln!(
                w,
                "claimed={}\tsent={}\tempty={}\tfailed={}\tdebounced={}\tmarked={}",
                r.claimed, r.sent, r.empty, r.failed, r.debounced, r.marked
            )
        },
        render_report_pretty,
    )
}

fn render_report_pretty(report: &PassReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Notification pass")?;
    pretty_kv(w, "Claimed", report.claimed.to_string())?;
    pretty_kv(w, "Sent", report.sent.to_string())?;
    pretty_kv(w, "Empty", report.empty.to_string())?;
    pretty_kv(w, "Failed", report.failed.to_string())?;
    pretty_kv(w, "Debounced", report.debounced.to_string())?;
    pretty_kv(w, "Marked", report.marked.to_string())
}
