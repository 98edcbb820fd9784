//! Story grouping over an already-fetched batch of activities.
//!
//! Both variants are pure: no I/O, output order fully determined by input.

pub mod feed;
pub mod notify;

pub use feed::{Story, group_for_feed};
pub use notify::{
    NotificationGroup, NotifyPartition, StoryClass, classify, group_for_notify,
    partition_for_notify,
};
