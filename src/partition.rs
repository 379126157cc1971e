use std::collections::BTreeMap;

use anyhow::bail;
use tracing::warn;

use crate::models::PartitionKey;

/// Buckets records into `group_count` contiguous, size-balanced groups.
///
/// Records are stable-sorted by (authors, external id), with empty-string and
/// zero fallbacks for missing keys, so the assignment is a pure function of
/// the input set: group sizes differ by at most one and re-running on the
/// same set reproduces the same map.
pub fn partition(
    keys: &[PartitionKey],
    year_min: Option<i32>,
    group_count: u32,
) -> anyhow::Result<BTreeMap<u32, Vec<i64>>> {
    if group_count == 0 {
        bail!("group count must be at least 1");
    }

    let mut groups: BTreeMap<u32, Vec<i64>> =
        (1..=group_count).map(|group_no| (group_no, Vec::new())).collect();

    let ordered = ordered_in_scope(keys, year_min);
    let n = ordered.len() as u64;
    for (i, key) in ordered.iter().enumerate() {
        let group_no = (i as u64 * group_count as u64 / n) as u32 + 1;
        if let Some(members) = groups.get_mut(&group_no) {
            members.push(key.id);
        }
    }

    Ok(groups)
}

/// The record ids assigned to one group under the current configuration.
pub fn group_members(
    keys: &[PartitionKey],
    year_min: Option<i32>,
    group_count: u32,
    group_no: u32,
) -> anyhow::Result<Vec<i64>> {
    let mut groups = partition(keys, year_min, group_count)?;
    Ok(groups.remove(&group_no).unwrap_or_default())
}

/// The year-filtered id set without group slicing, for whole-corpus exports.
pub fn in_scope_ids(keys: &[PartitionKey], year_min: Option<i32>) -> Vec<i64> {
    ordered_in_scope(keys, year_min)
        .into_iter()
        .map(|key| key.id)
        .collect()
}

fn ordered_in_scope<'a>(keys: &'a [PartitionKey], year_min: Option<i32>) -> Vec<&'a PartitionKey> {
    let mut in_scope: Vec<&PartitionKey> = match year_min {
        Some(min) => {
            let filtered: Vec<&PartitionKey> = keys
                .iter()
                .filter(|key| key.year.map_or(false, |year| year >= min))
                .collect();
            if filtered.is_empty() && !keys.is_empty() {
                // policy: an over-restrictive threshold must not empty the
                // corpus, so the full set is used instead
                warn!(
                    year_min = min,
                    "year filter removed every record, falling back to the unfiltered set"
                );
                keys.iter().collect()
            } else {
                filtered
            }
        }
        None => keys.iter().collect(),
    };

    in_scope.sort_by(|a, b| {
        let left = (a.authors.as_deref().unwrap_or(""), a.external_id.unwrap_or(0));
        let right = (b.authors.as_deref().unwrap_or(""), b.external_id.unwrap_or(0));
        left.cmp(&right)
    });
    in_scope
}
