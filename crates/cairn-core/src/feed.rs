//! Region activity feed.
//!
//! Stories are grouped once per region and cached until the compactor writes
//! to that region or the entry outlives its maximum age.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{FeedConfig, window_start};
use crate::db::{ActivityFilter, ActivityStore};
use crate::group::{Story, group_for_feed};

struct CachedFeed {
    built_at: DateTime<Utc>,
    stories: Arc<Vec<Story>>,
}

/// Per-region cache of grouped stories.
pub struct FeedCache {
    max_age: Duration,
    regions: Mutex<HashMap<i64, CachedFeed>>,
}

impl Default for FeedCache {
    fn default() -> Self {
        Self::new(Duration::minutes(1))
    }
}

impl FeedCache {
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            regions: Mutex::new(HashMap::new()),
        }
    }

    /// Cached stories for `region_fk` if still fresh at `now`.
    #[must_use]
    pub fn get(&self, region_fk: i64, now: DateTime<Utc>) -> Option<Arc<Vec<Story>>> {
        let regions = self.regions.lock().ok()?;
        regions
            .get(&region_fk)
            .filter(|cached| now - cached.built_at <= self.max_age)
            .map(|cached| Arc::clone(&cached.stories))
    }

    pub fn put(&self, region_fk: i64, stories: Vec<Story>, now: DateTime<Utc>) -> Arc<Vec<Story>> {
        let stories = Arc::new(stories);
        if let Ok(mut regions) = self.regions.lock() {
            regions.insert(
                region_fk,
                CachedFeed {
                    built_at: now,
                    stories: Arc::clone(&stories),
                },
            );
        }
        stories
    }

    pub fn invalidate(&self, region_fk: i64) {
        if let Ok(mut regions) = self.regions.lock() {
            if regions.remove(&region_fk).is_some() {
                tracing::debug!(region = region_fk, "feed cache invalidated");
            }
        }
    }
}

/// One page of a region's feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub region_fk: i64,
    /// Zero-based page index.
    pub page: usize,
    pub page_size: usize,
    /// Stories in the whole lookback window.
    pub total: usize,
    pub stories: Vec<Story>,
}

/// Load page `page` of the feed for `region_fk`.
///
/// # Errors
///
/// Returns an error if the activity read fails.
pub fn load_feed<S: ActivityStore + ?Sized>(
    store: &S,
    cache: &FeedCache,
    config: &FeedConfig,
    region_fk: i64,
    page: usize,
    now: DateTime<Utc>,
) -> Result<FeedPage> {
    let stories = if let Some(stories) = cache.get(region_fk, now) {
        stories
    } else {
        let activities = store
            .find_activities(&ActivityFilter::for_region(
                region_fk,
                window_start(now, config.lookback())?,
            ))
            .with_context(|| format!("load activities for region {region_fk}"))?;
        let stories = group_for_feed(&activities, config.group_time_limit());
        tracing::debug!(
            region = region_fk,
            activities = activities.len(),
            stories = stories.len(),
            "feed rebuilt"
        );
        cache.put(region_fk, stories, now)
    };

    let page_size = config.page_size.max(1);
    let items = stories
        .iter()
        .skip(page.saturating_mul(page_size))
        .take(page_size)
        .cloned()
        .collect();

    Ok(FeedPage {
        region_fk,
        page,
        page_size,
        total: stories.len(),
        stories: items,
    })
}
