use std::collections::HashMap;
use std::io::Write;

use chrono::{DateTime, Utc};

use crate::models::{AggregatedRow, DecisionCode, DecisionRow, RecordInfo, CATEGORY_LABELS};

pub fn decision_counts_field(counts: &[usize; 3]) -> String {
    format!("0:{}|1:{}|2:{}", counts[0], counts[1], counts[2])
}

/// One aggregated CSV row per record: decision histogram, majority decision,
/// per-reviewer votes, combined comments, and a votes/final/conflict triple
/// per category.
pub fn write_aggregated_csv<W: Write>(out: W, rows: &[AggregatedRow]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header: Vec<String> = [
        "record_id",
        "external_id",
        "title",
        "aggregated_decision",
        "decision_counts",
        "reviewers",
        "combined_comment",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    for label in CATEGORY_LABELS {
        header.push(format!("{label}_votes"));
        header.push(format!("{label}_final"));
        header.push(format!("{label}_conflict"));
    }
    header.push("year".to_string());
    writer.write_record(&header)?;

    for row in rows {
        let mut fields: Vec<String> = vec![
            row.record_id.to_string(),
            row.external_id.map(|id| id.to_string()).unwrap_or_default(),
            row.title.clone().unwrap_or_default(),
            row.aggregated
                .map(|code| code.as_i16().to_string())
                .unwrap_or_default(),
            decision_counts_field(&row.counts),
            row.reviewers.join(";"),
            row.combined_comment.clone(),
        ];
        for category in &row.categories {
            fields.push(category.votes.clone());
            fields.push(if category.final_flag { "1" } else { "0" }.to_string());
            fields.push(if category.conflict { "1" } else { "0" }.to_string());
        }
        fields.push(row.year.map(|year| year.to_string()).unwrap_or_default());
        writer.write_record(&fields)?;
    }

    writer.flush()?;
    Ok(())
}

/// The flat per-reviewer export: one CSV row per decision row, ordered by
/// record id then reviewer name.
pub fn write_decisions_csv<W: Write>(
    out: W,
    records: &[RecordInfo],
    decisions: &[DecisionRow],
) -> anyhow::Result<()> {
    let by_id: HashMap<i64, &RecordInfo> =
        records.iter().map(|record| (record.id, record)).collect();

    let mut ordered: Vec<&DecisionRow> = decisions.iter().collect();
    ordered.sort_by(|a, b| {
        (a.record_id, a.reviewer_name.as_str()).cmp(&(b.record_id, b.reviewer_name.as_str()))
    });

    let mut writer = csv::Writer::from_writer(out);
    let mut header = vec![
        "record_id".to_string(),
        "external_id".to_string(),
        "title".to_string(),
        "reviewer".to_string(),
        "decision".to_string(),
        "comment".to_string(),
    ];
    header.extend(CATEGORY_LABELS.iter().map(|label| label.to_string()));
    header.push("year".to_string());
    writer.write_record(&header)?;

    for row in ordered {
        let record = by_id.get(&row.record_id);
        let mut fields = vec![
            row.record_id.to_string(),
            record
                .and_then(|r| r.external_id)
                .map(|id| id.to_string())
                .unwrap_or_default(),
            record
                .and_then(|r| r.title.clone())
                .unwrap_or_default(),
            row.reviewer_name.clone(),
            row.decision
                .map(|code| code.as_i16().to_string())
                .unwrap_or_default(),
            row.comment.clone(),
        ];
        for flag in row.categories.as_array() {
            fields.push(if flag { "1" } else { "0" }.to_string());
        }
        fields.push(
            record
                .and_then(|r| r.year)
                .map(|year| year.to_string())
                .unwrap_or_default(),
        );
        writer.write_record(&fields)?;
    }

    writer.flush()?;
    Ok(())
}

/// External ids of records kept for secondary screening (aggregated decision
/// adopt or stronger), one per line, sorted and deduplicated.
pub fn candidate_list(rows: &[AggregatedRow]) -> String {
    let mut ids: Vec<i64> = rows
        .iter()
        .filter(|row| {
            row.aggregated
                .map_or(false, |code| code >= DecisionCode::Adopt)
        })
        .filter_map(|row| row.external_id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids.into_iter().map(|id| format!("{id}\n")).collect()
}

pub fn aggregated_filename(group_no: Option<u32>, now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    match group_no {
        Some(group_no) => format!("aggregated_g{group_no}_{stamp}.csv"),
        None => format!("aggregated_allgroups_{stamp}.csv"),
    }
}

pub fn candidates_filename(group_no: Option<u32>, now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    match group_no {
        Some(group_no) => format!("candidates_g{group_no}_{stamp}.txt"),
        None => format!("candidates_allgroups_{stamp}.txt"),
    }
}

pub fn decisions_filename(now: DateTime<Utc>) -> String {
    format!("screening_decisions_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategorySummary;
    use chrono::TimeZone;

    fn aggregated(record_id: i64, external_id: Option<i64>, code: Option<DecisionCode>) -> AggregatedRow {
        let mut counts = [0_usize; 3];
        if let Some(code) = code {
            counts[code.as_i16() as usize] = 2;
        }
        AggregatedRow {
            record_id,
            external_id,
            title: Some(format!("Record {record_id}")),
            year: Some(2019),
            counts,
            aggregated: code,
            reviewers: vec!["ana:1".to_string()],
            combined_comment: String::new(),
            categories: std::array::from_fn(|_| CategorySummary {
                votes: "1+1".to_string(),
                final_flag: true,
                conflict: false,
            }),
        }
    }

    #[test]
    fn counts_field_is_pipe_separated() {
        assert_eq!(decision_counts_field(&[3, 1, 0]), "0:3|1:1|2:0");
    }

    #[test]
    fn candidate_list_keeps_adopt_and_hold_only() {
        let rows = vec![
            aggregated(1, Some(900), Some(DecisionCode::Exclude)),
            aggregated(2, Some(300), Some(DecisionCode::Adopt)),
            aggregated(3, Some(200), Some(DecisionCode::Hold)),
            aggregated(4, Some(300), Some(DecisionCode::Adopt)),
            aggregated(5, None, Some(DecisionCode::Adopt)),
            aggregated(6, Some(100), None),
        ];
        assert_eq!(candidate_list(&rows), "200\n300\n");
    }

    #[test]
    fn aggregated_csv_has_one_row_per_record_plus_header() {
        let rows = vec![
            aggregated(1, Some(900), Some(DecisionCode::Adopt)),
            aggregated(2, None, None),
        ];
        let mut out = Vec::new();
        write_aggregated_csv(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("record_id,external_id,title,aggregated_decision"));
        assert!(lines[1].contains("0:0|1:2|2:0"));
        assert!(lines[2].starts_with("2,,Record 2,,0:0|1:0|2:0"));
    }

    #[test]
    fn filenames_are_stamped_and_scoped() {
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 12, 15, 0).unwrap();
        assert_eq!(
            candidates_filename(Some(2), now),
            "candidates_g2_20260806_121500.txt"
        );
        assert_eq!(
            candidates_filename(None, now),
            "candidates_allgroups_20260806_121500.txt"
        );
        assert_eq!(
            aggregated_filename(Some(1), now),
            "aggregated_g1_20260806_121500.csv"
        );
    }
}
