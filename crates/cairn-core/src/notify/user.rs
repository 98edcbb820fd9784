//! Role and invitation notifications.
//!
//! User activities target the *other* user. Rules are tried in order and the
//! first one matching any activity in the group wins; its newest match is
//! rendered and the other matches become the "and N more updates" suffix.

use anyhow::Result;

use super::{ComposeContext, Notification, NotificationData, tag, username};
use crate::dispatch::DeliveryTarget;
use crate::group::NotificationGroup;
use crate::model::{Activity, ActivityType};
use crate::resolve::EntityResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    Role,
    Invitation,
}

struct Rule {
    key: &'static str,
    activity_type: ActivityType,
    subject: Subject,
}

impl Rule {
    const fn new(key: &'static str, activity_type: ActivityType, subject: Subject) -> Self {
        Self {
            key,
            activity_type,
            subject,
        }
    }

    fn matches(&self, activity: &Activity) -> bool {
        let column = match self.subject {
            Subject::Role => "role",
            Subject::Invitation => "invitation",
        };
        activity.activity_type == self.activity_type && activity.is_column(column)
    }
}

const RULES: [Rule; 6] = [
    Rule::new("user.role_created", ActivityType::Created, Subject::Role),
    Rule::new("user.role_updated", ActivityType::Updated, Subject::Role),
    Rule::new("user.role_deleted", ActivityType::Deleted, Subject::Role),
    Rule::new("user.invitation_created", ActivityType::Created, Subject::Invitation),
    Rule::new("user.invitation_accepted", ActivityType::Updated, Subject::Invitation),
    Rule::new("user.invitation_deleted", ActivityType::Deleted, Subject::Invitation),
];

pub(super) fn compose<R: EntityResolver + ?Sized>(
    group: &NotificationGroup,
    actor: &str,
    resolver: &R,
    ctx: &ComposeContext<'_>,
) -> Result<Option<Notification>> {
    let Some((rule, matched)) = RULES.iter().find_map(|rule| {
        let matched: Vec<&Activity> = group.activities.iter().filter(|a| rule.matches(a)).collect();
        (!matched.is_empty()).then_some((rule, matched))
    }) else {
        return Ok(None);
    };
    let representative = matched[0];
    let value = representative
        .new_value
        .as_deref()
        .or(representative.old_value.as_deref())
        .unwrap_or_default();

    let (params, target) = match rule.subject {
        Subject::Role => {
            let Some(other) = username(resolver, representative.entity.id)? else {
                return Ok(None);
            };
            (
                vec![("other", other), ("role", value.to_string())],
                DeliveryTarget::Users(vec![representative.entity.id]),
            )
        }
        Subject::Invitation => (
            vec![("email", value.to_string())],
            DeliveryTarget::Region(representative.region_fk),
        ),
    };

    let body = ctx.localize("updates.more", matched.len() - 1, |lang| {
        let mut all: Vec<(&str, &str)> = vec![("user", actor)];
        all.extend(params.iter().map(|(name, value)| (*name, value.as_str())));
        (ctx.translate)(lang, rule.key, &all)
    });

    Ok(Some(Notification {
        kind: group.class,
        user_id: group.user_fk,
        body,
        icon: None,
        tag: Some(tag(group)),
        data: NotificationData {
            pathname: representative.entity.pathname(),
        },
        target,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::group::StoryClass;
    use crate::i18n::Language;
    use crate::model::{EntityRef, EntityType};

    fn user_row(id: i64, ty: ActivityType, column: &str, value: &str, minutes: i64) -> Activity {
        Activity {
            column_name: Some(column.into()),
            new_value: Some(value.into()),
            ..activity(id, ty, EntityRef::new(EntityType::User, 302), None, minutes)
        }
    }

    fn compose_en(group: &NotificationGroup) -> Option<Notification> {
        let media = media();
        let ctx = context(&media, at(60));
        let resolver = MapResolver::default().with_user(302, "ben");
        compose(group, "anna", &resolver, &ctx).expect("compose")
    }

    #[test]
    fn role_grant_names_the_other_user() {
        let group = group(
            StoryClass::User,
            vec![user_row(1, ActivityType::Created, "role", "editor", 0)],
        );
        let notification = compose_en(&group).expect("notification");
        assert_eq!(
            notification.body[&Language::En],
            "anna gave ben the role editor"
        );
        assert_eq!(notification.data.pathname, "/users/302");
        assert_eq!(notification.target, DeliveryTarget::Users(vec![302]));
    }

    #[test]
    fn earlier_rule_wins_and_counts_only_its_matches() {
        let group = group(
            StoryClass::User,
            vec![
                user_row(1, ActivityType::Created, "invitation", "x@example.com", 0),
                user_row(2, ActivityType::Updated, "role", "admin", 1),
                user_row(3, ActivityType::Updated, "role", "editor", 2),
            ],
        );
        let notification = compose_en(&group).expect("notification");
        assert_eq!(
            notification.body[&Language::En],
            "anna changed the role of ben to editor and 1 more update"
        );
    }

    #[test]
    fn invitation_uses_raw_email() {
        let group = group(
            StoryClass::User,
            vec![user_row(1, ActivityType::Created, "invitation", "x@example.com", 0)],
        );
        let notification = compose_en(&group).expect("notification");
        assert_eq!(notification.body[&Language::En], "anna invited x@example.com");
        assert_eq!(notification.target, DeliveryTarget::Region(1));
    }

    #[test]
    fn avatar_and_uploads_compose_nothing() {
        let group = group(
            StoryClass::User,
            vec![
                user_row(1, ActivityType::Updated, "avatar", "a.png", 0),
                user_row(2, ActivityType::Uploaded, "avatar", "b.png", 1),
            ],
        );
        assert!(compose_en(&group).is_none());
    }

    #[test]
    fn unresolved_other_user_composes_nothing() {
        let mut row = user_row(1, ActivityType::Deleted, "role", "editor", 0);
        row.entity = EntityRef::new(EntityType::User, 999);
        let group = group(StoryClass::User, vec![row]);
        assert!(compose_en(&group).is_none());
    }
}
