//! Notification groups: one bucket per author and story class.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{Activity, ActivityType, EntityType};

/// Which composer strategy handles a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryClass {
    Ascent,
    User,
    Moderate,
}

impl StoryClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ascent => "ascent",
            Self::User => "user",
            Self::Moderate => "moderate",
        }
    }
}

impl fmt::Display for StoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class of an activity, or `None` for ascent edits that never notify.
#[must_use]
pub fn classify(activity: &Activity) -> Option<StoryClass> {
    match activity.entity.kind {
        EntityType::Ascent if activity.activity_type == ActivityType::Created => {
            Some(StoryClass::Ascent)
        }
        EntityType::Ascent => None,
        EntityType::User => Some(StoryClass::User),
        _ => Some(StoryClass::Moderate),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationGroup {
    pub class: StoryClass,
    pub user_fk: i64,
    /// `created_at` of the newest activity.
    pub date: DateTime<Utc>,
    /// Newest first.
    pub activities: Vec<Activity>,
}

impl NotificationGroup {
    #[must_use]
    pub fn activity_ids(&self) -> Vec<i64> {
        self.activities.iter().map(|a| a.id).collect()
    }

    /// Whether the author has been quiet for longer than `debounce`.
    #[must_use]
    pub fn is_settled(&self, now: DateTime<Utc>, debounce: Duration) -> bool {
        now - self.date > debounce
    }
}

/// Full partition of one batch, including what was set aside.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyPartition {
    /// Settled groups ready for composition.
    pub groups: Vec<NotificationGroup>,
    /// Groups whose author may still be active.
    pub debounced: Vec<NotificationGroup>,
    /// Rows that can never notify (ascent edits).
    pub ineligible: Vec<i64>,
}

/// Bucket `activities` by `(user, class)` and split off unsettled buckets.
#[must_use]
pub fn partition_for_notify(
    activities: &[Activity],
    now: DateTime<Utc>,
    debounce: Duration,
) -> NotifyPartition {
    let mut buckets: BTreeMap<(i64, StoryClass), Vec<Activity>> = BTreeMap::new();
    let mut partition = NotifyPartition::default();

    for activity in activities {
        match classify(activity) {
            Some(class) => buckets
                .entry((activity.user_fk, class))
                .or_default()
                .push(activity.clone()),
            None => partition.ineligible.push(activity.id),
        }
    }

    for ((user_fk, class), mut items) in buckets {
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let Some(date) = items.first().map(|a| a.created_at) else {
            continue;
        };
        let group = NotificationGroup {
            class,
            user_fk,
            date,
            activities: items,
        };
        if group.is_settled(now, debounce) {
            partition.groups.push(group);
        } else {
            partition.debounced.push(group);
        }
    }

    partition
}

/// Settled notification groups for `activities`.
#[must_use]
pub fn group_for_notify(
    activities: &[Activity],
    now: DateTime<Utc>,
    debounce: Duration,
) -> Vec<NotificationGroup> {
    partition_for_notify(activities, now, debounce).groups
}
