//! Ascent notifications: "anna flashed Arete 6b+ ★★ and climbed 1 more route".

use anyhow::Result;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::{ComposeContext, Notification, NotificationData, tag};
use crate::dispatch::DeliveryTarget;
use crate::group::NotificationGroup;
use crate::media::{first_video, thumbnail_url};
use crate::model::{Ascent, Entity, EntityRef, EntityType, Resolved, Route, grade_label, stars};
use crate::resolve::EntityResolver;

/// Grade used for ranking: the climber's opinion, else the route's.
fn effective_grade(ascent: &Ascent, routes: &HashMap<i64, Route>) -> Option<i32> {
    ascent
        .grade
        .or_else(|| routes.get(&ascent.route_fk).and_then(|route| route.grade))
}

/// Lower type priority wins, then higher grade.
fn rank(a: &Ascent, b: &Ascent, routes: &HashMap<i64, Route>) -> Ordering {
    a.ascent_type
        .priority()
        .cmp(&b.ascent_type.priority())
        .then_with(|| effective_grade(b, routes).cmp(&effective_grade(a, routes)))
}

pub(super) fn compose<R: EntityResolver + ?Sized>(
    group: &NotificationGroup,
    actor: &str,
    resolver: &R,
    ctx: &ComposeContext<'_>,
) -> Result<Option<Notification>> {
    let refs: Vec<EntityRef> = group.activities.iter().map(|a| a.entity).collect();
    let ascents: Vec<Ascent> = resolver
        .resolve_many(&refs)?
        .into_iter()
        .filter_map(|resolved| match resolved.entity {
            Entity::Ascent(ascent) => Some(ascent),
            _ => None,
        })
        .filter(|ascent| ctx.now - ascent.date <= ctx.ascent_max_age)
        .collect();

    if ascents.is_empty() {
        return Ok(None);
    }

    let mut routes: HashMap<i64, Route> = HashMap::new();
    for ascent in &ascents {
        if routes.contains_key(&ascent.route_fk) {
            continue;
        }
        if let Some(Resolved {
            entity: Entity::Route(route),
            ..
        }) = resolver.resolve(EntityRef::new(EntityType::Route, ascent.route_fk))?
        {
            routes.insert(route.id, route);
        }
    }

    let Some(best) = ascents
        .iter()
        .min_by(|a, b| rank(a, b, &routes))
    else {
        return Ok(None);
    };
    let Some(route) = routes.get(&best.route_fk) else {
        tracing::debug!(ascent = best.id, route = best.route_fk, "route did not resolve");
        return Ok(None);
    };

    let grade = effective_grade(best, &routes).map(grade_label).unwrap_or_default();
    let rating = stars(route.rating);
    let body = ctx.localize("ascent.more", ascents.len() - 1, |lang| {
        let verb = (ctx.translate)(lang, &format!("ascent.verb.{}", best.ascent_type), &[]);
        let route_name = if route.name.trim().is_empty() {
            (ctx.translate)(lang, "ascent.unnamed_route", &[])
        } else {
            route.name.clone()
        };
        (ctx.translate)(
            lang,
            "ascent.body",
            &[
                ("user", actor),
                ("verb", verb.as_str()),
                ("route", route_name.as_str()),
                ("grade", grade.as_str()),
                ("stars", rating.as_str()),
            ],
        )
    });

    let icon = match first_video(&best.files).or_else(|| first_video(&route.files)) {
        Some(video_id) => Some(video_id.to_string()),
        None => block_video(resolver, route.block_fk)?,
    }
    .map(|video_id| thumbnail_url(&ctx.media.hostname, &video_id, &ctx.media.thumbnail_format));

    let region_fk = group.activities.first().map_or(0, |a| a.region_fk);
    Ok(Some(Notification {
        kind: group.class,
        user_id: group.user_fk,
        body,
        icon,
        tag: Some(tag(group)),
        data: NotificationData {
            pathname: EntityRef::new(EntityType::Ascent, best.id).pathname(),
        },
        target: DeliveryTarget::Region(region_fk),
    }))
}

fn block_video<R: EntityResolver + ?Sized>(resolver: &R, block_fk: i64) -> Result<Option<String>> {
    Ok(resolver
        .resolve(EntityRef::new(EntityType::Block, block_fk))?
        .and_then(|resolved| first_video(resolved.entity.files()).map(str::to_string)))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::group::StoryClass;
    use crate::i18n::Language;
    use crate::model::{ActivityType, AscentType, Block, FileMeta};

    fn ascent(id: i64, route_fk: i64, ty: AscentType, minutes: i64, files: Vec<FileMeta>) -> Resolved {
        Resolved::new(Entity::Ascent(Ascent {
            id,
            route_fk,
            user_fk: 301,
            ascent_type: ty,
            grade: None,
            date: at(minutes),
            files,
        }))
    }

    fn route(id: i64, name: &str, grade: i32, files: Vec<FileMeta>) -> Resolved {
        Resolved::new(Entity::Route(Route {
            id,
            block_fk: 601,
            name: name.into(),
            grade: Some(grade),
            rating: Some(2),
            files,
        }))
    }

    fn video(id: i64, video_id: &str) -> FileMeta {
        FileMeta {
            id,
            name: format!("{video_id}.mp4"),
            mime_type: "video/mp4".into(),
            video_id: Some(video_id.into()),
        }
    }

    fn created(id: i64, minutes: i64) -> crate::model::Activity {
        activity(
            id,
            ActivityType::Created,
            EntityRef::new(EntityType::Ascent, id),
            Some(EntityRef::new(EntityType::Route, 500 + id)),
            minutes,
        )
    }

    fn resolver() -> MapResolver {
        MapResolver::default()
            .with_user(301, "anna")
            .with(ascent(1, 501, AscentType::Attempt, 0, Vec::new()))
            .with(ascent(2, 502, AscentType::Flash, 1, Vec::new()))
            .with(route(501, "Hard", 5, Vec::new()))
            .with(route(502, "Easy", 3, Vec::new()))
    }

    #[test]
    fn flash_beats_higher_graded_attempt() {
        let media = media();
        let ctx = context(&media, at(30));
        let group = group(StoryClass::Ascent, vec![created(1, 0), created(2, 1)]);

        let notification = compose(&group, "anna", &resolver(), &ctx)
            .expect("compose")
            .expect("notification");

        assert_eq!(
            notification.body[&Language::En],
            "anna flashed Easy 4a ★★ and climbed 1 more route"
        );
        assert_eq!(notification.data.pathname, "/ascents/2");
        assert_eq!(notification.tag.as_deref(), Some("301-ascent"));
        assert_eq!(notification.target, DeliveryTarget::Region(1));
        assert_eq!(notification.icon, None);
    }

    #[test]
    fn grade_breaks_ties_within_a_type() {
        let resolver = MapResolver::default()
            .with(ascent(1, 501, AscentType::Send, 0, Vec::new()))
            .with(ascent(2, 502, AscentType::Send, 1, Vec::new()))
            .with(route(501, "Hard", 12, Vec::new()))
            .with(route(502, "Easy", 3, Vec::new()));
        let media = media();
        let ctx = context(&media, at(30));
        let group = group(StoryClass::Ascent, vec![created(1, 0), created(2, 1)]);

        let notification = compose(&group, "anna", &resolver, &ctx)
            .expect("compose")
            .expect("notification");
        assert_eq!(notification.data.pathname, "/ascents/1");
    }

    #[test]
    fn stale_ascents_are_discarded() {
        let media = media();
        let ctx = context(&media, at(60 * 24 * 3));
        let group = group(StoryClass::Ascent, vec![created(1, 0), created(2, 1)]);
        assert!(compose(&group, "anna", &resolver(), &ctx).expect("compose").is_none());
    }

    #[test]
    fn icon_falls_back_to_block_video() {
        let resolver = MapResolver::default()
            .with(ascent(2, 502, AscentType::Flash, 1, Vec::new()))
            .with(route(502, "", 3, Vec::new()))
            .with(Resolved::new(Entity::Block(Block {
                id: 601,
                area_fk: 10,
                name: "Boulder".into(),
                files: vec![video(9, "vid-block")],
            })));
        let media = media();
        let ctx = context(&media, at(30));
        let group = group(StoryClass::Ascent, vec![created(2, 1)]);

        let notification = compose(&group, "anna", &resolver, &ctx)
            .expect("compose")
            .expect("notification");
        assert_eq!(
            notification.icon.as_deref(),
            Some("https://media.localhost/videos/vid-block/thumbnail.webp")
        );
        assert_eq!(
            notification.body[&Language::En],
            "anna flashed an unnamed route 4a ★★"
        );
    }

    #[test]
    fn own_video_wins_over_route_video() {
        let resolver = MapResolver::default()
            .with(ascent(2, 502, AscentType::Flash, 1, vec![video(8, "vid-own")]))
            .with(route(502, "Easy", 3, vec![video(7, "vid-route")]));
        let media = media();
        let ctx = context(&media, at(30));
        let group = group(StoryClass::Ascent, vec![created(2, 1)]);

        let notification = compose(&group, "anna", &resolver, &ctx)
            .expect("compose")
            .expect("notification");
        assert!(notification.icon.expect("icon").contains("vid-own"));
    }
}
