//! Merge rules for applying change events to a key's rows.
//!
//! Pure functions over an immutable row slice. A changed view is returned as
//! a fresh vector; the caller wraps it in a new `Arc` before publishing.

use log::debug;
use std::collections::HashSet;
use std::cmp::Ordering;

use crate::models::{ChangeEvent, ChangeKind, Filter, QueryOptions, Record};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MergeOutcome {
    Unchanged,
    Changed(Vec<Record>),
    /// The view cannot be patched locally; fetch it again.
    Reprime,
}

/// Drop rows whose primary key was already seen, keeping the first.
///
/// Rows without a primary key cannot collide and are kept.
pub(crate) fn dedupe(rows: Vec<Record>, primary_key: &str) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(rows.len());
    let before = rows.len();
    let rows: Vec<Record> = rows
        .into_iter()
        .filter(|row| match row.key(primary_key) {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect();
    if rows.len() != before {
        debug!("[LINK_CACHE] Dropped {} duplicate row(s) from prime", before - rows.len());
    }
    rows
}

/// Apply one event to a view.
///
/// `limit` is the effective row cap of the view.
pub(crate) fn apply_event(
    rows: &[Record],
    options: &QueryOptions,
    limit: usize,
    event: &ChangeEvent,
) -> MergeOutcome {
    let pk = options.primary_key.as_str();
    let Some(key) = event.key(pk) else {
        // Without a key there is no safe way to dedupe.
        return MergeOutcome::Reprime;
    };
    let position = rows.iter().position(|row| row.key(pk).as_deref() == Some(key.as_str()));

    match &event.kind {
        ChangeKind::Insert { record } => {
            if position.is_some() {
                return MergeOutcome::Unchanged;
            }
            match options.filter.matches(record) {
                Some(true) => insert_sorted(rows.to_vec(), record.clone(), options, limit),
                Some(false) => MergeOutcome::Unchanged,
                None => MergeOutcome::Reprime,
            }
        },
        ChangeKind::Update { record, old_record } => match position {
            Some(index) => {
                let merged = rows[index].merged_with(record);
                match options.filter.matches(&merged) {
                    Some(true) => {
                        if merged == rows[index] {
                            return MergeOutcome::Unchanged;
                        }
                        let mut next = rows.to_vec();
                        next.remove(index);
                        match insert_sorted(next, merged, options, limit) {
                            // Moved past a full window; the row replacing it is unknown.
                            MergeOutcome::Unchanged => MergeOutcome::Reprime,
                            outcome => outcome,
                        }
                    },
                    Some(false) => {
                        let mut next = rows.to_vec();
                        next.remove(index);
                        MergeOutcome::Changed(next)
                    },
                    None => MergeOutcome::Reprime,
                }
            },
            None => match &options.filter {
                Filter::All => MergeOutcome::Unchanged,
                Filter::Simple { column, .. } => {
                    let candidate = match old_record {
                        Some(old) => old.merged_with(record),
                        None => record.clone(),
                    };
                    let required = [Some(pk), Some(column.as_str()), options.order_by.as_deref()];
                    if required.into_iter().flatten().any(|c| candidate.get(c).is_none()) {
                        // A partial row cannot enter the view.
                        return MergeOutcome::Reprime;
                    }
                    match options.filter.matches(&candidate) {
                        // The row moved into this view.
                        Some(true) => insert_sorted(rows.to_vec(), candidate, options, limit),
                        _ => MergeOutcome::Unchanged,
                    }
                },
                Filter::Opaque { .. } => MergeOutcome::Reprime,
            },
        },
        ChangeKind::Delete { .. } => match position {
            Some(index) => {
                let mut next = rows.to_vec();
                next.remove(index);
                MergeOutcome::Changed(next)
            },
            None => MergeOutcome::Unchanged,
        },
    }
}

/// Insert before the first row that sorts after `record`, then enforce the cap.
fn insert_sorted(
    mut rows: Vec<Record>,
    record: Record,
    options: &QueryOptions,
    limit: usize,
) -> MergeOutcome {
    let index = rows
        .iter()
        .position(|row| options.compare_records(row, &record) == Ordering::Greater)
        .unwrap_or(rows.len());
    if index >= limit {
        return MergeOutcome::Unchanged;
    }
    rows.insert(index, record);
    rows.truncate(limit);
    MergeOutcome::Changed(rows)
}
