//! Entity resolution capability.
//!
//! One `resolve(ref) -> Option<Resolved>` seam replaces per-type lookups at
//! every call site. `Ok(None)` means the entity no longer exists, which the
//! composer treats as a data inconsistency for that group only.

use anyhow::Result;

use crate::model::{EntityRef, Resolved};

/// Fetches and enriches content-tree entities.
///
/// Implementations must be shareable across the composer's worker threads.
pub trait EntityResolver: Sync {
    /// Resolve one entity with its eager-loaded files and breadcrumb.
    fn resolve(&self, entity: EntityRef) -> Result<Option<Resolved>>;

    /// Resolve a batch, dropping entities that no longer exist.
    ///
    /// Output order follows input order.
    fn resolve_many(&self, entities: &[EntityRef]) -> Result<Vec<Resolved>> {
        let mut resolved = Vec::with_capacity(entities.len());
        for entity in entities {
            if let Some(found) = self.resolve(*entity)? {
                resolved.push(found);
            }
        }
        Ok(resolved)
    }
}

impl<R: EntityResolver + ?Sized> EntityResolver for &R {
    fn resolve(&self, entity: EntityRef) -> Result<Option<Resolved>> {
        (**self).resolve(entity)
    }

    fn resolve_many(&self, entities: &[EntityRef]) -> Result<Vec<Resolved>> {
        (**self).resolve_many(entities)
    }
}
