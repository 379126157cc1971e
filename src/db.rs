use anyhow::Context;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    CategoryFlags, DecisionCode, DecisionRow, PartitionKey, RecordInfo, Reviewer,
};

pub const DEFAULT_YEAR_MIN: i32 = 2015;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let reviewers = vec![
        ("fisher", 1_i32, true),
        ("okoye", 1, false),
        ("tanaka", 2, false),
        ("bell", 2, false),
    ];

    for (username, group_no, is_admin) in reviewers {
        sqlx::query(
            r#"
            INSERT INTO litscreen.reviewers (username, group_no, is_admin)
            VALUES ($1, $2, $3)
            ON CONFLICT (username) DO UPDATE
            SET group_no = EXCLUDED.group_no, is_admin = EXCLUDED.is_admin
            "#,
        )
        .bind(username)
        .bind(group_no)
        .bind(is_admin)
        .execute(pool)
        .await?;
    }

    let records = vec![
        (
            "seed-001",
            31204567_i64,
            "Alvarez J, Whitfield S",
            "Screening fatigue in multi-reviewer evidence synthesis",
            "J Clin Epidemiol",
            2019,
        ),
        (
            "seed-002",
            29331842_i64,
            "Brandt K, Osei D",
            "Inter-rater reliability of title and abstract triage",
            "Syst Rev",
            2017,
        ),
        (
            "seed-003",
            33871120_i64,
            "Carver L",
            "Dual screening versus single screening: a methods study",
            "Res Synth Methods",
            2021,
        ),
        (
            "seed-004",
            25110438_i64,
            "Dubois M, Ferreira A",
            "Reviewer workload allocation in large bibliographic corpora",
            "BMC Med Res Methodol",
            2014,
        ),
        (
            "seed-005",
            30992277_i64,
            "Egami T, Larsen P",
            "Adjudicating disagreement in study selection",
            "J Clin Epidemiol",
            2018,
        ),
        (
            "seed-006",
            34556891_i64,
            "Fontaine R",
            "Category tagging during first-pass screening",
            "Syst Rev",
            2022,
        ),
    ];

    for (source_key, external_id, authors, title, journal, year) in records {
        sqlx::query(
            r#"
            INSERT INTO litscreen.records
            (external_id, source_key, title, authors, journal, year)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(external_id)
        .bind(source_key)
        .bind(title)
        .bind(authors)
        .bind(journal)
        .bind(year)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        external_id: Option<i64>,
        title: Option<String>,
        authors: Option<String>,
        journal: Option<String>,
        year: Option<i32>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0_usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let source_key = match row.external_id {
            Some(id) => format!("ext-{id}"),
            None => format!("import-{}", Uuid::new_v4()),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO litscreen.records
            (external_id, source_key, title, authors, journal, year)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(row.external_id)
        .bind(&source_key)
        .bind(&row.title)
        .bind(&row.authors)
        .bind(&row.journal)
        .bind(row.year)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn fetch_partition_keys(pool: &PgPool) -> anyhow::Result<Vec<PartitionKey>> {
    let rows = sqlx::query(
        "SELECT id, authors, external_id, year FROM litscreen.records ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let mut keys = Vec::new();
    for row in rows {
        keys.push(PartitionKey {
            id: row.get("id"),
            authors: row.get("authors"),
            external_id: row.get("external_id"),
            year: row.get("year"),
        });
    }
    Ok(keys)
}

pub async fn fetch_records_by_ids(pool: &PgPool, ids: &[i64]) -> anyhow::Result<Vec<RecordInfo>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        "SELECT id, external_id, title, year FROM litscreen.records \
         WHERE id = ANY($1) ORDER BY id",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(record_info).collect())
}

pub async fn fetch_records(pool: &PgPool) -> anyhow::Result<Vec<RecordInfo>> {
    let rows = sqlx::query(
        "SELECT id, external_id, title, year FROM litscreen.records ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(record_info).collect())
}

fn record_info(row: sqlx::postgres::PgRow) -> RecordInfo {
    RecordInfo {
        id: row.get("id"),
        external_id: row.get("external_id"),
        title: row.get("title"),
        year: row.get("year"),
    }
}

pub async fn fetch_reviewers(pool: &PgPool) -> anyhow::Result<Vec<Reviewer>> {
    let rows = sqlx::query(
        "SELECT id, username, group_no, is_admin FROM litscreen.reviewers \
         ORDER BY group_no, username",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(reviewer).collect())
}

pub async fn fetch_group_reviewers(pool: &PgPool, group_no: u32) -> anyhow::Result<Vec<Reviewer>> {
    let rows = sqlx::query(
        "SELECT id, username, group_no, is_admin FROM litscreen.reviewers \
         WHERE group_no = $1 ORDER BY username",
    )
    .bind(group_no as i32)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(reviewer).collect())
}

pub async fn fetch_reviewer_by_name(pool: &PgPool, username: &str) -> anyhow::Result<Reviewer> {
    let row = sqlx::query(
        "SELECT id, username, group_no, is_admin FROM litscreen.reviewers WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("no reviewer named {username}"))?;

    Ok(reviewer(row))
}

fn reviewer(row: sqlx::postgres::PgRow) -> Reviewer {
    Reviewer {
        id: row.get("id"),
        username: row.get("username"),
        group_no: row.get::<i32, _>("group_no") as u32,
        is_admin: row.get("is_admin"),
    }
}

pub async fn fetch_decisions(pool: &PgPool, record_ids: &[i64]) -> anyhow::Result<Vec<DecisionRow>> {
    if record_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        "SELECT d.record_id, d.reviewer_id, r.username, d.decision, d.comment, \
         d.cat_population, d.cat_intervention, d.cat_outcome, d.cat_design \
         FROM litscreen.decisions d \
         JOIN litscreen.reviewers r ON r.id = d.reviewer_id \
         WHERE d.record_id = ANY($1) \
         ORDER BY d.record_id, r.username",
    )
    .bind(record_ids)
    .fetch_all(pool)
    .await?;

    let mut decisions = Vec::new();
    for row in rows {
        let code: Option<i16> = row.get("decision");
        decisions.push(DecisionRow {
            record_id: row.get("record_id"),
            reviewer_id: row.get("reviewer_id"),
            reviewer_name: row.get("username"),
            decision: code.and_then(DecisionCode::from_i16),
            comment: row.get("comment"),
            categories: CategoryFlags {
                population: row.get("cat_population"),
                intervention: row.get("cat_intervention"),
                outcome: row.get("cat_outcome"),
                design: row.get("cat_design"),
            },
        });
    }
    Ok(decisions)
}

/// One row per (reviewer, record), rewritten wholesale on every submission.
/// Omitting the decision code on a resubmission clears it back to NULL.
/// Last writer wins; there is no version column.
pub async fn upsert_decision(
    pool: &PgPool,
    reviewer_id: i64,
    record_id: i64,
    decision: Option<DecisionCode>,
    comment: &str,
    categories: CategoryFlags,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO litscreen.decisions
        (reviewer_id, record_id, decision, comment,
         cat_population, cat_intervention, cat_outcome, cat_design)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (reviewer_id, record_id) DO UPDATE SET
            decision = EXCLUDED.decision,
            comment = EXCLUDED.comment,
            cat_population = EXCLUDED.cat_population,
            cat_intervention = EXCLUDED.cat_intervention,
            cat_outcome = EXCLUDED.cat_outcome,
            cat_design = EXCLUDED.cat_design,
            updated_at = now()
        "#,
    )
    .bind(reviewer_id)
    .bind(record_id)
    .bind(decision.map(DecisionCode::as_i16))
    .bind(comment)
    .bind(categories.population)
    .bind(categories.intervention)
    .bind(categories.outcome)
    .bind(categories.design)
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrites every reviewer's decision for the record; comments and category
/// flags stay untouched. Zero existing rows is a no-op and no rows are
/// created, so re-applying the same resolution is idempotent.
pub async fn apply_resolution(
    pool: &PgPool,
    record_id: i64,
    resolution: DecisionCode,
) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "UPDATE litscreen.decisions SET decision = $2, updated_at = now() WHERE record_id = $1",
    )
    .bind(record_id)
    .bind(resolution.as_i16())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// The single configuration row, lazily created with the default threshold on
/// first read.
pub async fn get_year_min(pool: &PgPool) -> anyhow::Result<Option<i32>> {
    let row = sqlx::query("SELECT year_min FROM litscreen.app_config WHERE id = 1")
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(row.get("year_min")),
        None => {
            sqlx::query(
                "INSERT INTO litscreen.app_config (id, year_min) VALUES (1, $1) \
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(DEFAULT_YEAR_MIN)
            .execute(pool)
            .await?;
            Ok(Some(DEFAULT_YEAR_MIN))
        }
    }
}

pub async fn set_year_min(pool: &PgPool, year_min: Option<i32>) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO litscreen.app_config (id, year_min) VALUES (1, $1) \
         ON CONFLICT (id) DO UPDATE SET year_min = EXCLUDED.year_min",
    )
    .bind(year_min)
    .execute(pool)
    .await?;
    Ok(())
}
