use std::collections::HashMap;

use crate::models::{AggregatedRow, CategorySummary, DecisionCode, DecisionRow, RecordInfo};

/// Folds all decision rows into one row per record, ordered by record id.
/// Every in-scope record is emitted, including those nobody has touched yet.
pub fn aggregate(records: &[RecordInfo], decisions: &[DecisionRow]) -> Vec<AggregatedRow> {
    let mut by_record: HashMap<i64, Vec<&DecisionRow>> = HashMap::new();
    for row in decisions {
        // rows with no code, no comment and no flags carry no information
        if row.decision.is_none() && row.comment.is_empty() && !row.categories.any() {
            continue;
        }
        by_record.entry(row.record_id).or_default().push(row);
    }

    let mut ordered: Vec<&RecordInfo> = records.iter().collect();
    ordered.sort_by_key(|record| record.id);

    ordered
        .into_iter()
        .map(|record| {
            let rows = by_record
                .get(&record.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            aggregate_record(record, rows)
        })
        .collect()
}

/// The code with the most votes; among tied counts the larger code wins, so
/// hold beats adopt beats exclude. None when nobody has voted.
pub fn aggregated_decision(counts: &[usize; 3]) -> Option<DecisionCode> {
    if counts.iter().all(|&count| count == 0) {
        return None;
    }
    (0..3_usize)
        .max_by_key(|&code| (counts[code], code))
        .and_then(|code| DecisionCode::from_i16(code as i16))
}

fn aggregate_record(record: &RecordInfo, rows: &[&DecisionRow]) -> AggregatedRow {
    let mut counts = [0_usize; 3];
    let mut reviewers = Vec::new();
    let mut comments = Vec::new();

    for row in rows {
        if let Some(code) = row.decision {
            counts[code.as_i16() as usize] += 1;
        }
        let code_label = row
            .decision
            .map(|code| code.as_i16().to_string())
            .unwrap_or_else(|| "-".to_string());
        reviewers.push(format!("{}:{}", row.reviewer_name, code_label));
        if !row.comment.is_empty() {
            comments.push(format!("{}:{}", row.reviewer_name, row.comment));
        }
    }

    let categories = std::array::from_fn(|index| summarize_category(rows, index));

    AggregatedRow {
        record_id: record.id,
        external_id: record.external_id,
        title: record.title.clone(),
        year: record.year,
        aggregated: aggregated_decision(&counts),
        counts,
        reviewers,
        combined_comment: comments.join(";"),
        categories,
    }
}

fn summarize_category(rows: &[&DecisionRow], index: usize) -> CategorySummary {
    let votes: Vec<bool> = rows.iter().map(|row| row.categories.as_array()[index]).collect();
    let votes_str = votes
        .iter()
        .map(|&vote| if vote { "1" } else { "0" })
        .collect::<Vec<_>>()
        .join("+");
    let final_flag = votes.iter().any(|&vote| vote);
    let conflict = final_flag && votes.iter().any(|&vote| !vote);
    CategorySummary {
        votes: votes_str,
        final_flag,
        conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryFlags;

    fn record(id: i64) -> RecordInfo {
        RecordInfo {
            id,
            external_id: Some(9000 + id),
            title: Some(format!("Record {id}")),
            year: Some(2018),
        }
    }

    fn row(reviewer: &str, record_id: i64, code: Option<DecisionCode>) -> DecisionRow {
        DecisionRow {
            record_id,
            reviewer_id: 0,
            reviewer_name: reviewer.to_string(),
            decision: code,
            comment: String::new(),
            categories: CategoryFlags::default(),
        }
    }

    #[test]
    fn majority_wins() {
        assert_eq!(aggregated_decision(&[2, 1, 0]), Some(DecisionCode::Exclude));
        assert_eq!(aggregated_decision(&[1, 3, 1]), Some(DecisionCode::Adopt));
        assert_eq!(aggregated_decision(&[0, 0, 2]), Some(DecisionCode::Hold));
    }

    #[test]
    fn ties_break_toward_the_larger_code() {
        assert_eq!(aggregated_decision(&[1, 1, 0]), Some(DecisionCode::Adopt));
        assert_eq!(aggregated_decision(&[0, 1, 1]), Some(DecisionCode::Hold));
        assert_eq!(aggregated_decision(&[1, 0, 1]), Some(DecisionCode::Hold));
        assert_eq!(aggregated_decision(&[1, 1, 1]), Some(DecisionCode::Hold));
    }

    #[test]
    fn no_votes_means_no_decision() {
        assert_eq!(aggregated_decision(&[0, 0, 0]), None);
    }

    #[test]
    fn records_without_decisions_are_still_emitted() {
        let records = vec![record(1), record(2)];
        let decisions = vec![row("ana", 2, Some(DecisionCode::Adopt))];
        let rows = aggregate(&records, &decisions);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].record_id, 1);
        assert_eq!(rows[0].aggregated, None);
        assert_eq!(rows[0].counts, [0, 0, 0]);
        assert!(rows[0].reviewers.is_empty());
        assert_eq!(rows[1].aggregated, Some(DecisionCode::Adopt));
    }

    #[test]
    fn output_is_ordered_by_record_id() {
        let records = vec![record(5), record(1), record(3)];
        let rows = aggregate(&records, &[]);
        let ids: Vec<i64> = rows.iter().map(|row| row.record_id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn category_final_is_an_or_over_votes() {
        let records = vec![record(1)];
        let mut first = row("ana", 1, Some(DecisionCode::Adopt));
        first.categories.population = true;
        let second = row("ben", 1, Some(DecisionCode::Adopt));
        let rows = aggregate(&records, &[first, second]);

        let population = &rows[0].categories[0];
        assert_eq!(population.votes, "1+0");
        assert!(population.final_flag);
        assert!(population.conflict);

        let design = &rows[0].categories[3];
        assert_eq!(design.votes, "0+0");
        assert!(!design.final_flag);
        assert!(!design.conflict);
    }

    #[test]
    fn unanimous_category_votes_are_not_conflicts() {
        let records = vec![record(1)];
        let mut first = row("ana", 1, Some(DecisionCode::Adopt));
        first.categories.outcome = true;
        let mut second = row("ben", 1, Some(DecisionCode::Adopt));
        second.categories.outcome = true;
        let rows = aggregate(&records, &[first, second]);

        let outcome = &rows[0].categories[2];
        assert_eq!(outcome.votes, "1+1");
        assert!(outcome.final_flag);
        assert!(!outcome.conflict);
    }

    #[test]
    fn comments_are_tagged_and_joined() {
        let records = vec![record(1)];
        let mut first = row("ana", 1, Some(DecisionCode::Adopt));
        first.comment = "small sample".to_string();
        let mut second = row("ben", 1, Some(DecisionCode::Exclude));
        second.comment = "wrong population".to_string();
        let third = row("cleo", 1, Some(DecisionCode::Hold));
        let rows = aggregate(&records, &[first, second, third]);

        assert_eq!(
            rows[0].combined_comment,
            "ana:small sample;ben:wrong population"
        );
        assert_eq!(rows[0].reviewers, vec!["ana:1", "ben:0", "cleo:2"]);
        assert_eq!(rows[0].counts, [1, 1, 1]);
        assert_eq!(rows[0].aggregated, Some(DecisionCode::Hold));
    }

    #[test]
    fn empty_rows_do_not_vote_but_annotated_ones_do() {
        let records = vec![record(1)];
        let empty = row("ana", 1, None);
        let mut annotated = row("ben", 1, None);
        annotated.comment = "needs full text".to_string();
        let rows = aggregate(&records, &[empty, annotated]);

        assert_eq!(rows[0].reviewers, vec!["ben:-"]);
        assert_eq!(rows[0].counts, [0, 0, 0]);
        assert_eq!(rows[0].aggregated, None);
    }
}
