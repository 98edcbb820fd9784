//! Data model: activity rows and resolved entities.

pub mod activity;
pub mod entity;

pub use activity::{
    Activity, ActivityIdentity, ActivityType, EntityRef, EntityType, IdentityKey, NewActivity,
    UnknownActivityType, UnknownEntityType,
};
pub use entity::{
    Area, Ascent, AscentType, Block, Entity, FileMeta, Resolved, Route, UnknownAscentType, User,
    grade_label, stars,
};
