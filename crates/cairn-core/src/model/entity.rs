//! Resolved content-tree entities.
//!
//! The pipeline never reads content tables directly. It asks an
//! [`crate::resolve::EntityResolver`] for an [`EntityRef`] and gets back a
//! [`Resolved`] value: one variant of the [`Entity`] tagged union plus the
//! entity's breadcrumb when it has a position in the tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::activity::{EntityRef, EntityType};

// ---------------------------------------------------------------------------
// AscentType
// ---------------------------------------------------------------------------

/// How an ascent was climbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AscentType {
    Flash,
    Send,
    Repeat,
    Attempt,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ascent type '{raw}': expected one of flash, send, repeat, attempt")]
pub struct UnknownAscentType {
    pub raw: String,
}

impl AscentType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flash => "flash",
            Self::Send => "send",
            Self::Repeat => "repeat",
            Self::Attempt => "attempt",
        }
    }

    /// Notification priority: flash < send < repeat < attempt, lower wins.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Flash => 0,
            Self::Send => 1,
            Self::Repeat => 2,
            Self::Attempt => 3,
        }
    }
}

impl fmt::Display for AscentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AscentType {
    type Err = UnknownAscentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flash" => Ok(Self::Flash),
            "send" => Ok(Self::Send),
            "repeat" => Ok(Self::Repeat),
            "attempt" => Ok(Self::Attempt),
            _ => Err(UnknownAscentType { raw: s.to_string() }),
        }
    }
}

// ---------------------------------------------------------------------------
// Grades and ratings
// ---------------------------------------------------------------------------

/// Fontainebleau boulder scale indexed by numeric grade.
const FONT_SCALE: [&str; 24] = [
    "1", "2", "3", "4a", "4b", "4c", "5a", "5b", "5c", "6a", "6a+", "6b", "6b+", "6c", "6c+",
    "7a", "7a+", "7b", "7b+", "7c", "7c+", "8a", "8a+", "8b",
];

/// Display label for a numeric grade, `?` when it is out of range.
#[must_use]
pub fn grade_label(grade: i32) -> String {
    usize::try_from(grade)
        .ok()
        .and_then(|index| FONT_SCALE.get(index))
        .map_or_else(|| "?".to_string(), |label| (*label).to_string())
}

/// Star string for a 0–3 rating.
#[must_use]
pub fn stars(rating: Option<u8>) -> String {
    "★".repeat(usize::from(rating.unwrap_or(0).min(3)))
}

// ---------------------------------------------------------------------------
// Entity payloads
// ---------------------------------------------------------------------------

/// File metadata eager-loaded with the entity that owns the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub id: i64,
    pub name: String,
    pub mime_type: String,
    /// Transcoded video identifier; only videos have thumbnails.
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: i64,
    pub region_fk: i64,
    pub parent_fk: Option<i64>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub area_fk: i64,
    pub name: String,
    #[serde(default)]
    pub files: Vec<FileMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: i64,
    pub block_fk: i64,
    pub name: String,
    pub grade: Option<i32>,
    pub rating: Option<u8>,
    #[serde(default)]
    pub files: Vec<FileMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ascent {
    pub id: i64,
    pub route_fk: i64,
    pub user_fk: i64,
    pub ascent_type: AscentType,
    /// The climber's own grade opinion, if any.
    pub grade: Option<i32>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<FileMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}

/// One content-tree node, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "lowercase")]
pub enum Entity {
    Area(Area),
    Block(Block),
    Route(Route),
    Ascent(Ascent),
    File(FileMeta),
    User(User),
}

impl Entity {
    #[must_use]
    pub const fn kind(&self) -> EntityType {
        match self {
            Self::Area(_) => EntityType::Area,
            Self::Block(_) => EntityType::Block,
            Self::Route(_) => EntityType::Route,
            Self::Ascent(_) => EntityType::Ascent,
            Self::File(_) => EntityType::File,
            Self::User(_) => EntityType::User,
        }
    }

    #[must_use]
    pub const fn id(&self) -> i64 {
        match self {
            Self::Area(a) => a.id,
            Self::Block(b) => b.id,
            Self::Route(r) => r.id,
            Self::Ascent(a) => a.id,
            Self::File(f) => f.id,
            Self::User(u) => u.id,
        }
    }

    #[must_use]
    pub const fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.id())
    }

    /// Human-facing name. Ascents have none.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Area(a) => Some(&a.name),
            Self::Block(b) => Some(&b.name),
            Self::Route(r) => Some(&r.name),
            Self::File(f) => Some(&f.name),
            Self::User(u) => Some(&u.username),
            Self::Ascent(_) => None,
        }
    }

    /// Files eager-loaded with this entity.
    #[must_use]
    pub fn files(&self) -> &[FileMeta] {
        match self {
            Self::Block(b) => &b.files,
            Self::Route(r) => &r.files,
            Self::Ascent(a) => &a.files,
            Self::Area(_) | Self::File(_) | Self::User(_) => &[],
        }
    }
}

/// Output of entity resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    pub entity: Entity,
    /// Ancestor names ending with the entity itself. `None` when the entity
    /// has no place in the tree or an ancestor could not be resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breadcrumb: Option<Vec<String>>,
}

impl Resolved {
    #[must_use]
    pub const fn new(entity: Entity) -> Self {
        Self {
            entity,
            breadcrumb: None,
        }
    }

    #[must_use]
    pub fn with_breadcrumb(mut self, breadcrumb: Vec<String>) -> Self {
        self.breadcrumb = Some(breadcrumb);
        self
    }
}
