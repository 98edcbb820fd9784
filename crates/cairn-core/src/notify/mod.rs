//! Notification composition.
//!
//! Each settled [`NotificationGroup`] is rendered by the strategy for its
//! class into at most one [`Notification`]. Bodies are rendered for every
//! configured language so delivery can pick the recipient's language later.
//!
//! `Ok(None)` means the group legitimately produces nothing: an entity no
//! longer resolves, every ascent is too old, or no rule matched. Errors are
//! reserved for resolver failures.

mod ascent;
mod moderate;
mod user;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::{MediaConfig, PipelineConfig};
use crate::dispatch::DeliveryTarget;
use crate::group::{NotificationGroup, StoryClass};
use crate::i18n::{Language, LocalizedText, Translate, plural_key, squash_spaces};
use crate::model::{Entity, EntityRef, EntityType};
use crate::resolve::EntityResolver;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    pub pathname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: StoryClass,
    pub user_id: i64,
    pub body: LocalizedText,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Collapses an unread notification of the same author and class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub data: NotificationData,
    #[serde(skip)]
    pub target: DeliveryTarget,
}

/// Everything a strategy needs besides the resolver.
#[derive(Clone, Copy)]
pub struct ComposeContext<'a> {
    pub translate: Translate,
    pub languages: &'a [Language],
    pub media: &'a MediaConfig,
    pub now: DateTime<Utc>,
    pub ascent_max_age: Duration,
}

impl<'a> ComposeContext<'a> {
    #[must_use]
    pub fn from_config(config: &'a PipelineConfig, translate: Translate, now: DateTime<Utc>) -> Self {
        Self {
            translate,
            languages: &config.i18n.languages,
            media: &config.media,
            now,
            ascent_max_age: config.notify.ascent_max_age(),
        }
    }

    /// Render one body per language: `render(lang)` followed by the plural
    /// `more_key` suffix when `more > 0`.
    fn localize(
        &self,
        more_key: &str,
        more: usize,
        mut render: impl FnMut(Language) -> String,
    ) -> LocalizedText {
        self.languages
            .iter()
            .map(|&lang| {
                let mut text = render(lang);
                if more > 0 {
                    let count = more.to_string();
                    text.push(' ');
                    text.push_str(&(self.translate)(
                        lang,
                        &plural_key(more_key, more),
                        &[("count", count.as_str())],
                    ));
                }
                (lang, squash_spaces(&text))
            })
            .collect()
    }
}

fn tag(group: &NotificationGroup) -> String {
    format!("{}-{}", group.user_fk, group.class)
}

/// Username of `user_fk`, if the user still exists.
fn username<R: EntityResolver + ?Sized>(resolver: &R, user_fk: i64) -> Result<Option<String>> {
    Ok(resolver
        .resolve(EntityRef::new(EntityType::User, user_fk))?
        .and_then(|resolved| match resolved.entity {
            Entity::User(user) => Some(user.username),
            _ => None,
        }))
}

/// Compose the notification for one group.
///
/// # Errors
///
/// Returns an error if entity resolution fails.
pub fn compose<R: EntityResolver + ?Sized>(
    group: &NotificationGroup,
    resolver: &R,
    ctx: &ComposeContext<'_>,
) -> Result<Option<Notification>> {
    let Some(actor) = username(resolver, group.user_fk)? else {
        tracing::debug!(user = group.user_fk, "actor did not resolve");
        return Ok(None);
    };

    let notification = match group.class {
        StoryClass::Ascent => ascent::compose(group, &actor, resolver, ctx)?,
        StoryClass::User => user::compose(group, &actor, resolver, ctx)?,
        StoryClass::Moderate => moderate::compose(group, &actor, resolver, ctx)?,
    };

    if notification.is_none() {
        tracing::debug!(
            user = group.user_fk,
            class = %group.class,
            activities = group.activities.len(),
            "group composed to nothing"
        );
    }
    Ok(notification)
}
