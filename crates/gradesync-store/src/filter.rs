use gradesync_core::Fields;
use std::collections::{BTreeSet, HashSet};
use tracing::info;

/// Keep only the fields the store accepts writes for. Returns the trimmed
/// rows and the names of every field that was dropped.
pub fn filter_writable(
    table: &str,
    rows: Vec<Fields>,
    writable: &HashSet<String>,
) -> (Vec<Fields>, BTreeSet<String>) {
    let mut dropped = BTreeSet::new();
    let rows = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .filter(|(name, _)| {
                    let keep = writable.contains(name);
                    if !keep {
                        dropped.insert(name.clone());
                    }
                    keep
                })
                .collect::<Fields>()
        })
        .collect();

    if !dropped.is_empty() {
        info!("{}: dropping non-writable fields {:?}", table, dropped);
    }
    (rows, dropped)
}
