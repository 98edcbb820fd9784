//! Activity log records.
//!
//! An [`Activity`] is one immutable fact about a mutation of the shared
//! content tree: something was created, updated, deleted or uploaded. Every
//! activity is attached to an entity identity and, optionally, to the identity
//! of that entity's parent. Both identities participate in feed grouping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// ActivityType
// ---------------------------------------------------------------------------

/// The kind of mutation an activity records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityType {
    Created,
    Updated,
    Deleted,
    Uploaded,
}

/// Error returned when parsing an unknown activity type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown activity type '{raw}': expected one of created, updated, deleted, uploaded")]
pub struct UnknownActivityType {
    /// The unrecognised input string.
    pub raw: String,
}

impl ActivityType {
    /// All activity types in catalog order.
    pub const ALL: [Self; 4] = [Self::Created, Self::Updated, Self::Deleted, Self::Uploaded];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Uploaded => "uploaded",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = UnknownActivityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            "uploaded" => Ok(Self::Uploaded),
            _ => Err(UnknownActivityType { raw: s.to_string() }),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

/// The kind of content-tree node an activity refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Area,
    Block,
    Route,
    Ascent,
    File,
    User,
}

/// Error returned when parsing an unknown entity type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type '{raw}': expected one of area, block, route, ascent, file, user")]
pub struct UnknownEntityType {
    /// The unrecognised input string.
    pub raw: String,
}

impl EntityType {
    pub const ALL: [Self; 6] = [
        Self::Area,
        Self::Block,
        Self::Route,
        Self::Ascent,
        Self::File,
        Self::User,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Area => "area",
            Self::Block => "block",
            Self::Route => "route",
            Self::Ascent => "ascent",
            Self::File => "file",
            Self::User => "user",
        }
    }

    /// Moderation priority: lower wins when picking a representative.
    ///
    /// Only the structural levels of the tree rank; everything else returns
    /// `None` and borrows the rank of its parent.
    #[must_use]
    pub const fn moderation_rank(self) -> Option<u8> {
        match self {
            Self::Area => Some(0),
            Self::Block => Some(1),
            Self::Route => Some(2),
            Self::Ascent | Self::File | Self::User => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "area" => Ok(Self::Area),
            "block" => Ok(Self::Block),
            "route" => Ok(Self::Route),
            "ascent" => Ok(Self::Ascent),
            "file" => Ok(Self::File),
            "user" => Ok(Self::User),
            _ => Err(UnknownEntityType { raw: s.to_string() }),
        }
    }
}

// Serialize both enums as their lowercase names.
macro_rules! str_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

str_serde!(ActivityType);
str_serde!(EntityType);

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// An `(entityType, entityId)` pair: the grouping and resolution key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub kind: EntityType,
    pub id: i64,
}

impl EntityRef {
    #[must_use]
    pub const fn new(kind: EntityType, id: i64) -> Self {
        Self { kind, id }
    }

    /// Deep-link path of the entity, e.g. `/blocks/601`.
    #[must_use]
    pub fn pathname(self) -> String {
        format!("/{}s/{}", self.kind, self.id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Author-scoped identity used by the feed grouper: `userFk:entityType:entityId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub user_fk: i64,
    pub entity: EntityRef,
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_fk, self.entity)
    }
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// A persisted activity-log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub region_fk: i64,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub user_fk: i64,
    pub entity: EntityRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    #[serde(default)]
    pub notified: bool,
}

impl Activity {
    /// Identity key of the activity's own entity.
    #[must_use]
    pub const fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            user_fk: self.user_fk,
            entity: self.entity,
        }
    }

    /// Identity key of the parent entity, when the activity has one.
    #[must_use]
    pub fn parent_identity_key(&self) -> Option<IdentityKey> {
        self.parent.map(|entity| IdentityKey {
            user_fk: self.user_fk,
            entity,
        })
    }

    /// Whether this activity's column matches `column`.
    #[must_use]
    pub fn is_column(&self, column: &str) -> bool {
        self.column_name.as_deref() == Some(column)
    }
}

/// An activity that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    pub created_at: DateTime<Utc>,
    pub region_fk: i64,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub user_fk: i64,
    pub entity: EntityRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
}

/// Who changed what: the actor and entity a mutation is recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityIdentity {
    pub user_fk: i64,
    pub region_fk: i64,
    pub entity: EntityRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityRef>,
}

impl ActivityIdentity {
    /// Build a row for this identity without column data.
    #[must_use]
    pub const fn activity(&self, activity_type: ActivityType, at: DateTime<Utc>) -> NewActivity {
        NewActivity {
            created_at: at,
            region_fk: self.region_fk,
            activity_type,
            user_fk: self.user_fk,
            entity: self.entity,
            parent: self.parent,
            column_name: None,
            old_value: None,
            new_value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_type_fromstr_roundtrip() {
        for ty in ActivityType::ALL {
            let parsed: ActivityType = ty.as_str().parse().expect("should parse");
            assert_eq!(parsed, ty);
        }
    }

    #[test]
    fn entity_type_fromstr_rejects_plural() {
        let err = "routes".parse::<EntityType>().unwrap_err();
        assert_eq!(err.raw, "routes");
        assert!(err.to_string().contains("expected one of"));
    }

    #[test]
    fn pathname_uses_plural_type() {
        assert_eq!(EntityRef::new(EntityType::Block, 601).pathname(), "/blocks/601");
        assert_eq!(EntityRef::new(EntityType::Ascent, 7).pathname(), "/ascents/7");
    }

    #[test]
    fn identity_key_display_is_user_scoped() {
        let key = IdentityKey {
            user_fk: 301,
            entity: EntityRef::new(EntityType::Route, 501),
        };
        assert_eq!(key.to_string(), "301:route:501");
    }

    #[test]
    fn moderation_rank_orders_tree_levels() {
        assert!(EntityType::Area.moderation_rank() < EntityType::Block.moderation_rank());
        assert!(EntityType::Block.moderation_rank() < EntityType::Route.moderation_rank());
        assert_eq!(EntityType::Ascent.moderation_rank(), None);
    }

    #[test]
    fn activity_serializes_camel_case() {
        let activity = Activity {
            id: 1,
            created_at: DateTime::from_timestamp(1_700_000_000, 0).expect("valid ts"),
            region_fk: 1,
            activity_type: ActivityType::Updated,
            user_fk: 2,
            entity: EntityRef::new(EntityType::Route, 3),
            parent: None,
            column_name: Some("name".into()),
            old_value: Some("A".into()),
            new_value: Some("B".into()),
            notified: false,
        };
        let json = serde_json::to_value(&activity).expect("serialize");
        assert_eq!(json["type"], "updated");
        assert_eq!(json["columnName"], "name");
        assert_eq!(json["entity"]["type"], "route");
        assert!(json.get("parent").is_none());
    }
}
