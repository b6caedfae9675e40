//! Invalidation bus for write paths.
//!
//! Anything that creates, updates or deletes rows calls
//! [`InvalidationBus::invalidate`] once the write succeeds. A change event
//! for the same write may still arrive later; the cache merge absorbs the
//! duplicate.

use log::debug;

use crate::cache::TableSnapshotCache;
use crate::error::Result;
use crate::models::query_options::validate_table_name;
use crate::models::Filter;

#[derive(Clone)]
pub struct InvalidationBus {
    cache: TableSnapshotCache,
}

impl InvalidationBus {
    pub fn new(cache: TableSnapshotCache) -> Self {
        Self { cache }
    }

    /// Mark `table` stale: every subscribed key of the table when `filter`
    /// is `None`, otherwise only keys with exactly that filter.
    ///
    /// Returns how many keys were sent for re-prime.
    pub fn invalidate(&self, table: &str, filter: Option<&Filter>) -> Result<usize> {
        validate_table_name(table)?;
        if let Some(filter) = filter {
            filter.validate()?;
        }
        let count = self.cache.invalidate(table, filter)?;
        match filter {
            Some(filter) => debug!(
                "[LINK_INVALIDATE] '{}' where {} -> {} key(s) re-priming",
                table, filter, count
            ),
            None => debug!("[LINK_INVALIDATE] '{}' -> {} key(s) re-priming", table, count),
        }
        Ok(count)
    }

    /// Like [`invalidate`](Self::invalidate) with the filter given in its
    /// wire form. An empty expression means the whole table.
    pub fn invalidate_expr(&self, table: &str, filter_expr: Option<&str>) -> Result<usize> {
        match filter_expr.map(Filter::parse) {
            Some(Filter::All) | None => self.invalidate(table, None),
            Some(filter) => self.invalidate(table, Some(&filter)),
        }
    }
}
