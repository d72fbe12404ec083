//! Latest-file selection.
//!
//! A portal lists many candidate files per day: incremental deltas, repeated
//! snapshots, stale uploads. Selection reduces them to exactly one file per
//! (category, store): the newest, with complete snapshots (`*Full`) beating
//! incremental files for the same store regardless of timestamp.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::types::{FileCategory, FileDescriptor};

/// Outcome of selection: at most one Stores catalog chain-wide, and one
/// Price/Promo candidate per store. Stores with no candidates are simply
/// absent, never an error.
#[derive(Debug, Default)]
pub struct Selection {
    pub stores: Option<FileDescriptor>,
    pub prices: BTreeMap<String, FileDescriptor>,
    pub promos: BTreeMap<String, FileDescriptor>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.stores.is_none() && self.prices.is_empty() && self.promos.is_empty()
    }

    /// Total number of files selected for download.
    pub fn len(&self) -> usize {
        usize::from(self.stores.is_some()) + self.prices.len() + self.promos.len()
    }

    /// Store ids that have at least one Price or Promo candidate.
    pub fn store_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.prices.keys().chain(self.promos.keys()).cloned().collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Reduce a flat discovery listing to the per-(category, store) winners for
/// `date`. Descriptors whose resolved timestamp falls on another day are
/// dropped; descriptors without a timestamp are kept (discovery already
/// scoped them) but lose against any resolved candidate.
pub fn select(descriptors: Vec<FileDescriptor>, date: NaiveDate) -> Selection {
    let mut selection = Selection::default();

    for desc in descriptors {
        if !desc.matches_date(date) {
            continue;
        }

        match desc.category.base() {
            FileCategory::Stores => {
                replace_if_better(&mut selection.stores, desc);
            }
            FileCategory::Price => {
                let key = desc.store.clone().unwrap_or_default();
                replace_slot(selection.prices.entry(key), desc);
            }
            FileCategory::Promo => {
                let key = desc.store.clone().unwrap_or_default();
                replace_slot(selection.promos.entry(key), desc);
            }
            // base() never yields a Full variant
            _ => unreachable!(),
        }
    }

    selection
}

fn replace_slot(
    entry: std::collections::btree_map::Entry<'_, String, FileDescriptor>,
    candidate: FileDescriptor,
) {
    match entry {
        std::collections::btree_map::Entry::Vacant(v) => {
            v.insert(candidate);
        }
        std::collections::btree_map::Entry::Occupied(mut o) => {
            if beats(&candidate, o.get()) {
                o.insert(candidate);
            }
        }
    }
}

fn replace_if_better(slot: &mut Option<FileDescriptor>, candidate: FileDescriptor) {
    match slot {
        None => *slot = Some(candidate),
        Some(current) => {
            if beats(&candidate, current) {
                *slot = Some(candidate);
            }
        }
    }
}

/// Ordering between two candidates for the same (category, store) bucket.
///
/// Full beats non-Full regardless of timestamps. Within the same fullness,
/// the later resolved timestamp wins; an unresolved timestamp loses against
/// any resolved one. Exact ties keep the incumbent.
fn beats(candidate: &FileDescriptor, incumbent: &FileDescriptor) -> bool {
    match (candidate.category.is_full(), incumbent.category.is_full()) {
        (true, false) => return true,
        (false, true) => return false,
        _ => {}
    }

    match (candidate.timestamp, incumbent.timestamp) {
        (Some(c), Some(i)) => c > i,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
