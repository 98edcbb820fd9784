//! Periodic notification pass.
//!
//! One pass claims un-notified rows, groups them, composes every settled
//! group in parallel and hands the results to [`Delivery`] one at a time.
//! Only then are rows marked notified. A failure in one group never aborts
//! its siblings: the group's claim is released and the next pass retries it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{NotifyConfig, window_start};
use crate::db::ActivityStore;
use crate::error::ErrorCode;
use crate::group::partition_for_notify;
use crate::notify::{ComposeContext, Notification, compose};
use crate::resolve::EntityResolver;

/// Who should receive a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "ids", rename_all = "lowercase")]
pub enum DeliveryTarget {
    /// Everyone following the region.
    Region(i64),
    Users(Vec<i64>),
}

/// Push transport. Implementations decide language and channel per recipient.
pub trait Delivery {
    /// # Errors
    ///
    /// Returns an error if the notification could not be handed off.
    fn dispatch(&self, notification: &Notification, target: &DeliveryTarget) -> Result<()>;
}

impl<D: Delivery + ?Sized> Delivery for &D {
    fn dispatch(&self, notification: &Notification, target: &DeliveryTarget) -> Result<()> {
        (**self).dispatch(notification, target)
    }
}

/// Counters for one notification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub claimed: usize,
    /// Settled groups composed this pass.
    pub groups: usize,
    pub sent: usize,
    /// Groups that composed to nothing.
    pub empty: usize,
    pub failed: usize,
    pub debounced: usize,
    pub marked: usize,
    pub released: usize,
}

/// Run one pass for `claimant` at `now`.
///
/// # Errors
///
/// Returns an error only for store failures; composition and delivery
/// failures are counted in the report.
pub fn run_notification_pass<S, R, D>(
    store: &S,
    resolver: &R,
    delivery: &D,
    config: &NotifyConfig,
    ctx: &ComposeContext<'_>,
    claimant: &str,
    now: DateTime<Utc>,
) -> Result<PassReport>
where
    S: ActivityStore + ?Sized,
    R: EntityResolver + ?Sized,
    D: Delivery + ?Sized,
{
    let stale_before = window_start(now, config.claim_ttl())?;
    let claimed = store
        .claim_unnotified(claimant, now, stale_before, config.batch_limit)
        .context("claim activities")?;

    let partition = partition_for_notify(&claimed, now, config.debounce());
    let mut report = PassReport {
        claimed: claimed.len(),
        groups: partition.groups.len(),
        debounced: partition.debounced.len(),
        ..PassReport::default()
    };

    let composed: Vec<Result<Option<Notification>>> = partition
        .groups
        .par_iter()
        .map(|group| compose(group, resolver, ctx))
        .collect();

    let mut mark = partition.ineligible.clone();
    let mut release: Vec<i64> = partition
        .debounced
        .iter()
        .flat_map(|group| group.activities.iter().map(|a| a.id))
        .collect();

    for (group, outcome) in partition.groups.iter().zip(composed) {
        match outcome {
            Ok(Some(notification)) => {
                match delivery.dispatch(&notification, &notification.target) {
                    Ok(()) => {
                        report.sent += 1;
                        mark.extend(group.activity_ids());
                    }
                    Err(err) => {
                        tracing::warn!(
                            code = ErrorCode::DeliveryFailed.code(),
                            user = group.user_fk,
                            class = %group.class,
                            error = %format!("{err:#}"),
                            "delivery failed"
                        );
                        report.failed += 1;
                        release.extend(group.activity_ids());
                    }
                }
            }
            Ok(None) => {
                report.empty += 1;
                mark.extend(group.activity_ids());
            }
            Err(err) => {
                tracing::warn!(
                    code = ErrorCode::InternalUnexpected.code(),
                    user = group.user_fk,
                    class = %group.class,
                    error = %format!("{err:#}"),
                    "composition failed"
                );
                report.failed += 1;
                release.extend(group.activity_ids());
            }
        }
    }

    report.marked = store
        .mark_notified(&mark, now)
        .context("mark activities notified")?;
    report.released = store.release_claims(&release).context("release claims")?;

    tracing::info!(
        claimant,
        claimed = report.claimed,
        groups = report.groups,
        sent = report.sent,
        empty = report.empty,
        failed = report.failed,
        debounced = report.debounced,
        marked = report.marked,
        "notification pass complete"
    );

    Ok(report)
}
