use std::collections::{HashMap, HashSet};

use crate::models::{DecisionCode, DecisionRow, GroupStatus};

/// Completed/total counts for one reviewer over an assigned-record set.
/// Only rows with a non-null code on assigned records count as done.
pub fn progress(assigned: &[i64], decisions: &[DecisionRow], reviewer_id: i64) -> (usize, usize) {
    let assigned_set: HashSet<i64> = assigned.iter().copied().collect();
    let done = decisions
        .iter()
        .filter(|row| {
            row.reviewer_id == reviewer_id
                && row.decision.is_some()
                && assigned_set.contains(&row.record_id)
        })
        .count();
    (done, assigned.len())
}

pub fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

/// Whether a group has finished screening and whether any of its records
/// needs human reconciliation.
///
/// Disagreement is only surfaced once every reviewer of the group has decided
/// every assigned record; until then the result is (incomplete, no conflict).
/// A record is conflicted when its votes split between adopt and exclude with
/// nobody choosing hold; any hold vote suppresses the flag.
pub fn check_group_status(
    reviewer_ids: &[i64],
    assigned: &[i64],
    decisions: &[DecisionRow],
) -> GroupStatus {
    let incomplete = GroupStatus {
        is_complete: false,
        has_conflicts: false,
    };

    if reviewer_ids.is_empty() || assigned.is_empty() {
        return incomplete;
    }

    let votes = votes_by_record(assigned, decisions);

    for reviewer_id in reviewer_ids {
        let done = assigned
            .iter()
            .filter(|record_id| {
                votes
                    .get(record_id)
                    .map_or(false, |v| v.iter().any(|(voter, _)| voter == reviewer_id))
            })
            .count();
        if done < assigned.len() {
            return incomplete;
        }
    }

    let has_conflicts = assigned.iter().any(|record_id| {
        votes
            .get(record_id)
            .map_or(false, |v| is_conflicted(v.as_slice()))
    });

    GroupStatus {
        is_complete: true,
        has_conflicts,
    }
}

/// Record ids that trigger the conflict rule, in assigned order.
pub fn conflicted_records(assigned: &[i64], decisions: &[DecisionRow]) -> Vec<i64> {
    let votes = votes_by_record(assigned, decisions);
    assigned
        .iter()
        .copied()
        .filter(|record_id| {
            votes
                .get(record_id)
                .map_or(false, |v| is_conflicted(v.as_slice()))
        })
        .collect()
}

fn votes_by_record(
    assigned: &[i64],
    decisions: &[DecisionRow],
) -> HashMap<i64, Vec<(i64, DecisionCode)>> {
    let assigned_set: HashSet<i64> = assigned.iter().copied().collect();
    let mut votes: HashMap<i64, Vec<(i64, DecisionCode)>> = HashMap::new();
    for row in decisions {
        if !assigned_set.contains(&row.record_id) {
            continue;
        }
        if let Some(code) = row.decision {
            votes
                .entry(row.record_id)
                .or_default()
                .push((row.reviewer_id, code));
        }
    }
    votes
}

fn is_conflicted(votes: &[(i64, DecisionCode)]) -> bool {
    let has_adopt = votes.iter().any(|(_, code)| *code == DecisionCode::Adopt);
    let has_exclude = votes.iter().any(|(_, code)| *code == DecisionCode::Exclude);
    let has_hold = votes.iter().any(|(_, code)| *code == DecisionCode::Hold);
    has_adopt && has_exclude && !has_hold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryFlags;

    fn decided(reviewer_id: i64, record_id: i64, code: DecisionCode) -> DecisionRow {
        DecisionRow {
            record_id,
            reviewer_id,
            reviewer_name: format!("reviewer{reviewer_id}"),
            decision: Some(code),
            comment: String::new(),
            categories: CategoryFlags::default(),
        }
    }

    fn undecided(reviewer_id: i64, record_id: i64) -> DecisionRow {
        DecisionRow {
            decision: None,
            ..decided(reviewer_id, record_id, DecisionCode::Exclude)
        }
    }

    #[test]
    fn progress_counts_only_decided_assigned_records() {
        let assigned = vec![1, 2, 3];
        let decisions = vec![
            decided(10, 1, DecisionCode::Adopt),
            undecided(10, 2),
            decided(10, 99, DecisionCode::Adopt),
            decided(11, 3, DecisionCode::Hold),
        ];
        assert_eq!(progress(&assigned, &decisions, 10), (1, 3));
        assert_eq!(progress(&assigned, &decisions, 11), (1, 3));
        assert_eq!(progress(&assigned, &decisions, 12), (0, 3));
    }

    #[test]
    fn percent_is_zero_for_empty_groups() {
        assert_eq!(percent(0, 0), 0.0);
        assert!((percent(1, 3) - 33.333).abs() < 0.01);
        assert_eq!(percent(4, 4), 100.0);
    }

    #[test]
    fn empty_reviewer_or_record_sets_are_benign() {
        let status = check_group_status(&[], &[1, 2], &[]);
        assert!(!status.is_complete);
        assert!(!status.has_conflicts);

        let status = check_group_status(&[10], &[], &[]);
        assert!(!status.is_complete);
        assert!(!status.has_conflicts);
    }

    #[test]
    fn completion_gate_holds_until_everyone_finished() {
        let assigned = vec![1, 2];
        // reviewer 11 never decided record 2, so the conflicting votes on
        // record 1 must not surface yet
        let decisions = vec![
            decided(10, 1, DecisionCode::Adopt),
            decided(10, 2, DecisionCode::Exclude),
            decided(11, 1, DecisionCode::Exclude),
            undecided(11, 2),
        ];
        let status = check_group_status(&[10, 11], &assigned, &decisions);
        assert!(!status.is_complete);
        assert!(!status.has_conflicts);
    }

    #[test]
    fn adopt_versus_exclude_is_a_conflict() {
        let assigned = vec![1];
        let decisions = vec![
            decided(10, 1, DecisionCode::Exclude),
            decided(11, 1, DecisionCode::Adopt),
        ];
        let status = check_group_status(&[10, 11], &assigned, &decisions);
        assert!(status.is_complete);
        assert!(status.has_conflicts);
    }

    #[test]
    fn any_hold_vote_suppresses_the_conflict() {
        let assigned = vec![1];
        let decisions = vec![
            decided(10, 1, DecisionCode::Adopt),
            decided(11, 1, DecisionCode::Exclude),
            decided(12, 1, DecisionCode::Hold),
        ];
        let status = check_group_status(&[10, 11, 12], &assigned, &decisions);
        assert!(status.is_complete);
        assert!(!status.has_conflicts);

        let decisions = vec![
            decided(10, 1, DecisionCode::Hold),
            decided(11, 1, DecisionCode::Exclude),
        ];
        let status = check_group_status(&[10, 11], &assigned, &decisions);
        assert!(status.is_complete);
        assert!(!status.has_conflicts);
    }

    #[test]
    fn unanimous_groups_are_complete_without_conflicts() {
        let assigned = vec![1, 2];
        let decisions = vec![
            decided(10, 1, DecisionCode::Adopt),
            decided(10, 2, DecisionCode::Exclude),
            decided(11, 1, DecisionCode::Adopt),
            decided(11, 2, DecisionCode::Exclude),
        ];
        let status = check_group_status(&[10, 11], &assigned, &decisions);
        assert!(status.is_complete);
        assert!(!status.has_conflicts);
    }

    #[test]
    fn conflicted_records_lists_only_triggering_records() {
        let assigned = vec![1, 2, 3];
        let decisions = vec![
            decided(10, 1, DecisionCode::Adopt),
            decided(11, 1, DecisionCode::Exclude),
            decided(10, 2, DecisionCode::Adopt),
            decided(11, 2, DecisionCode::Hold),
            decided(10, 3, DecisionCode::Exclude),
            decided(11, 3, DecisionCode::Exclude),
        ];
        assert_eq!(conflicted_records(&assigned, &decisions), vec![1]);
    }
}
