//! Moderation notifications: content edits summarized at their parent.

use anyhow::Result;

use super::{ComposeContext, Notification, NotificationData, tag};
use crate::dispatch::DeliveryTarget;
use crate::group::NotificationGroup;
use crate::model::Activity;
use crate::resolve::EntityResolver;

/// Area before block before route; other kinds borrow their parent's rank.
fn rank(activity: &Activity) -> u8 {
    activity
        .entity
        .kind
        .moderation_rank()
        .or_else(|| activity.parent.and_then(|p| p.kind.moderation_rank()))
        .unwrap_or(u8::MAX)
}

pub(super) fn compose<R: EntityResolver + ?Sized>(
    group: &NotificationGroup,
    actor: &str,
    resolver: &R,
    ctx: &ComposeContext<'_>,
) -> Result<Option<Notification>> {
    let Some(representative) = group.activities.iter().min_by_key(|a| rank(a)) else {
        return Ok(None);
    };
    let Some(parent) = representative.parent else {
        return Ok(None);
    };
    let Some(resolved) = resolver.resolve(parent)? else {
        tracing::debug!(%parent, "parent did not resolve");
        return Ok(None);
    };
    let Some(breadcrumb) = resolved.breadcrumb else {
        return Ok(None);
    };

    let target = if breadcrumb.is_empty() {
        resolved.entity.name().unwrap_or_default().to_string()
    } else {
        breadcrumb.join(" > ")
    };

    let body = ctx.localize("updates.more", group.activities.len() - 1, |lang| {
        (ctx.translate)(
            lang,
            "moderate.body",
            &[("user", actor), ("target", target.as_str())],
        )
    });

    Ok(Some(Notification {
        kind: group.class,
        user_id: group.user_fk,
        body,
        icon: None,
        tag: Some(tag(group)),
        data: NotificationData {
            pathname: parent.pathname(),
        },
        target: DeliveryTarget::Region(representative.region_fk),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::group::StoryClass;
    use crate::i18n::Language;
    use crate::model::{ActivityType, Area, Block, Entity, EntityRef, EntityType, Resolved};

    fn block(breadcrumb: Option<Vec<&str>>) -> Resolved {
        let resolved = Resolved::new(Entity::Block(Block {
            id: 601,
            area_fk: 10,
            name: "Block".into(),
            files: Vec::new(),
        }));
        match breadcrumb {
            Some(crumbs) => resolved.with_breadcrumb(crumbs.into_iter().map(String::from).collect()),
            None => resolved,
        }
    }

    fn route_update(id: i64, route: i64, minutes: i64) -> Activity {
        activity(
            id,
            ActivityType::Updated,
            EntityRef::new(EntityType::Route, route),
            Some(EntityRef::new(EntityType::Block, 601)),
            minutes,
        )
    }

    fn compose_with(resolver: &MapResolver, activities: Vec<Activity>) -> Option<Notification> {
        let media = media();
        let ctx = context(&media, at(60));
        let group = group(StoryClass::Moderate, activities);
        compose(&group, "moderator", resolver, &ctx).expect("compose")
    }

    #[test]
    fn sibling_route_edits_summarize_at_parent_block() {
        let resolver = MapResolver::default().with(block(Some(vec!["Area", "Block"])));
        let notification =
            compose_with(&resolver, vec![route_update(1, 501, 0), route_update(2, 502, 1)])
                .expect("notification");

        assert_eq!(
            notification.body[&Language::En],
            "moderator updated Area > Block and 1 more update"
        );
        assert_eq!(notification.data.pathname, "/blocks/601");
        assert_eq!(notification.tag.as_deref(), Some("301-moderate"));
    }

    #[test]
    fn missing_breadcrumb_composes_nothing() {
        let resolver = MapResolver::default().with(block(None));
        assert!(compose_with(&resolver, vec![route_update(1, 501, 0)]).is_none());
    }

    #[test]
    fn empty_breadcrumb_falls_back_to_name() {
        let resolver = MapResolver::default().with(block(Some(Vec::new())));
        let notification = compose_with(&resolver, vec![route_update(1, 501, 0)]).expect("notification");
        assert_eq!(notification.body[&Language::En], "moderator updated Block");
    }

    #[test]
    fn activity_without_parent_composes_nothing() {
        let resolver = MapResolver::default();
        let row = activity(1, ActivityType::Updated, EntityRef::new(EntityType::Area, 10), None, 0);
        assert!(compose_with(&resolver, vec![row]).is_none());
    }

    #[test]
    fn higher_level_entity_is_representative() {
        let resolver = MapResolver::default()
            .with(block(Some(vec!["Area", "Block"])))
            .with(
                Resolved::new(Entity::Area(Area {
                    id: 10,
                    region_fk: 1,
                    parent_fk: None,
                    name: "Area".into(),
                }))
                .with_breadcrumb(vec!["Area".into()]),
            );
        let block_edit = activity(
            3,
            ActivityType::Updated,
            EntityRef::new(EntityType::Block, 601),
            Some(EntityRef::new(EntityType::Area, 10)),
            0,
        );
        let notification = compose_with(&resolver, vec![route_update(1, 501, 1), block_edit])
            .expect("notification");
        assert_eq!(notification.data.pathname, "/areas/10");
        assert_eq!(
            notification.body[&Language::En],
            "moderator updated Area and 1 more update"
        );
    }
}
