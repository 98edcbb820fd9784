//! Feed stories: connected-component clustering of one author's activities.
//!
//! Two activities land in the same story when they share an identity key
//! (own or parent entity, scoped to the author) directly or through earlier
//! members, and the newcomer lies within the time limit of the story's
//! anchor. The anchor is the member appended last, so a story may span more
//! than the limit in total as long as each link stays within it.
//!
//! Identity classes live in a disjoint set. Each class root maps to the
//! story that last absorbed it; a key therefore belongs to at most one open
//! story. Two unrelated edits by the same author that happen to touch a
//! shared parent inside the window merge into one story. That over-merge is
//! accepted.

use chrono::{DateTime, Duration, Utc};
use petgraph::unionfind::UnionFind;
use serde::Serialize;
use std::collections::HashMap;

use crate::model::{Activity, EntityRef, IdentityKey};

/// A feed-display cluster of activities by one author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub user_fk: i64,
    /// Entity of the newest member.
    pub entity: EntityRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityRef>,
    /// `created_at` of the newest member.
    pub date: DateTime<Utc>,
    /// Members, newest first.
    pub items: Vec<Activity>,
}

struct OpenStory {
    story: Story,
    anchor: DateTime<Utc>,
}

impl OpenStory {
    fn open(activity: &Activity) -> Self {
        Self {
            story: Story {
                user_fk: activity.user_fk,
                entity: activity.entity,
                parent: activity.parent,
                date: activity.created_at,
                items: vec![activity.clone()],
            },
            anchor: activity.created_at,
        }
    }

    fn accepts(&self, activity: &Activity, limit: Duration) -> bool {
        self.story.user_fk == activity.user_fk
            && (self.anchor - activity.created_at).abs() <= limit
    }

    fn push(&mut self, activity: &Activity) {
        if activity.created_at > self.story.date {
            self.story.date = activity.created_at;
            self.story.entity = activity.entity;
            self.story.parent = activity.parent;
        }
        self.anchor = activity.created_at;
        self.story.items.push(activity.clone());
    }
}

/// Cluster `activities` into stories, newest story first.
///
/// Input order is the scan order; callers pass rows newest first as the
/// store returns them. When both of an activity's keys point at acceptable
/// stories, the one opened first wins.
#[must_use]
pub fn group_for_feed(activities: &[Activity], group_time_limit: Duration) -> Vec<Story> {
    let mut key_index: HashMap<IdentityKey, usize> = HashMap::new();
    for activity in activities {
        let next = key_index.len();
        key_index.entry(activity.identity_key()).or_insert(next);
        if let Some(parent) = activity.parent_identity_key() {
            let next = key_index.len();
            key_index.entry(parent).or_insert(next);
        }
    }

    let mut classes = UnionFind::<usize>::new(key_index.len());
    let mut story_of_class: HashMap<usize, usize> = HashMap::new();
    let mut open: Vec<OpenStory> = Vec::new();

    for activity in activities {
        let own = key_index[&activity.identity_key()];
        let parent = activity
            .parent_identity_key()
            .map(|key| key_index[&key]);

        let candidate = std::iter::once(own)
            .chain(parent)
            .filter_map(|key| story_of_class.get(&classes.find(key)).copied())
            .filter(|&index| open[index].accepts(activity, group_time_limit))
            .min();

        let index = if let Some(index) = candidate {
            open[index].push(activity);
            index
        } else {
            open.push(OpenStory::open(activity));
            open.len() - 1
        };

        if let Some(parent) = parent {
            classes.union(own, parent);
        }
        story_of_class.insert(classes.find(own), index);
    }

    let mut stories: Vec<Story> = open
        .into_iter()
        .map(|open| {
            let mut story = open.story;
            story
                .items
                .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            story
        })
        .collect();
    stories.sort_by(|a, b| b.date.cmp(&a.date));

    tracing::trace!(
        activities = activities.len(),
        stories = stories.len(),
        "grouped feed"
    );
    stories
}
