use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod aggregate;
mod db;
mod models;
mod partition;
mod report;
mod status;

use models::{CategoryFlags, DecisionCode, DecisionRow, GroupProgress, ReviewerProgress, Reviewer};

#[derive(Parser)]
#[command(name = "litscreen")]
#[command(about = "Literature screening workload and reconciliation tracker", long_about = None)]
struct Cli {
    /// Number of reviewer groups the corpus is partitioned into
    #[arg(long, global = true, default_value_t = 4)]
    groups: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample reviewers and records
    Seed,
    /// Import bibliographic records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show or change the publication-year threshold
    #[command(group(
        ArgGroup::new("change")
            .args(["set", "clear"])
            .multiple(false)
    ))]
    Threshold {
        /// New minimum publication year
        #[arg(long)]
        set: Option<i32>,
        /// Remove the threshold entirely
        #[arg(long)]
        clear: bool,
    },
    /// Record one reviewer's judgment on one record
    Submit {
        #[arg(long)]
        reviewer: String,
        #[arg(long)]
        record: i64,
        /// 0 = exclude, 1 = adopt, 2 = hold; omit to clear the code
        #[arg(long)]
        decision: Option<i16>,
        #[arg(long, default_value = "")]
        comment: String,
        #[arg(long)]
        cat_population: bool,
        #[arg(long)]
        cat_intervention: bool,
        #[arg(long)]
        cat_outcome: bool,
        #[arg(long)]
        cat_design: bool,
    },
    /// Per-reviewer and per-group completion overview
    Progress {
        #[arg(long)]
        json: bool,
    },
    /// Completion and conflict state for one group
    Status {
        #[arg(long)]
        group: u32,
        #[arg(long)]
        json: bool,
    },
    /// List records whose reviewers split between adopt and exclude
    Conflicts {
        #[arg(long)]
        group: u32,
    },
    /// Overwrite every reviewer's decision for a record
    Resolve {
        #[arg(long)]
        record: i64,
        #[arg(long)]
        resolution: i16,
    },
    /// Export one aggregated CSV row per record
    ExportAggregated {
        #[arg(long)]
        group: Option<u32>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export the raw per-reviewer decision rows as CSV
    ExportDecisions {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export external ids of records kept for secondary screening
    ExportCandidates {
        #[arg(long)]
        group: Option<u32>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} records from {}.", csv.display());
        }
        Commands::Threshold { set, clear } => {
            if clear {
                db::set_year_min(&pool, None).await?;
                println!("Year threshold cleared; all records are in scope.");
            } else if let Some(year) = set {
                db::set_year_min(&pool, Some(year)).await?;
                println!("Year threshold set to {year}.");
            } else {
                match db::get_year_min(&pool).await? {
                    Some(year) => println!("Records from {year} onward are in scope."),
                    None => println!("No year threshold; all records are in scope."),
                }
            }
        }
        Commands::Submit {
            reviewer,
            record,
            decision,
            comment,
            cat_population,
            cat_intervention,
            cat_outcome,
            cat_design,
        } => {
            let code = match decision {
                Some(value) => Some(
                    DecisionCode::from_i16(value)
                        .context("decision must be 0 (exclude), 1 (adopt) or 2 (hold)")?,
                ),
                None => None,
            };
            let reviewer = db::fetch_reviewer_by_name(&pool, &reviewer).await?;
            let categories = CategoryFlags {
                population: cat_population,
                intervention: cat_intervention,
                outcome: cat_outcome,
                design: cat_design,
            };
            db::upsert_decision(&pool, reviewer.id, record, code, &comment, categories).await?;

            let year_min = db::get_year_min(&pool).await?;
            let keys = db::fetch_partition_keys(&pool).await?;
            let assigned =
                partition::group_members(&keys, year_min, cli.groups, reviewer.group_no)?;
            let decisions = db::fetch_decisions(&pool, &assigned).await?;
            let (done, total) = status::progress(&assigned, &decisions, reviewer.id);
            println!(
                "Recorded. {} is at {done}/{total} ({:.1}%) in group {}.",
                reviewer.username,
                status::percent(done, total),
                reviewer.group_no
            );
        }
        Commands::Progress { json } => {
            let year_min = db::get_year_min(&pool).await?;
            let keys = db::fetch_partition_keys(&pool).await?;
            let reviewers = db::fetch_reviewers(&pool).await?;
            let groups = partition::partition(&keys, year_min, cli.groups)?;

            let mut decisions_by_group: BTreeMap<u32, Vec<DecisionRow>> = BTreeMap::new();
            for (group_no, assigned) in &groups {
                decisions_by_group.insert(*group_no, db::fetch_decisions(&pool, assigned).await?);
            }

            let empty_decisions = Vec::new();
            let mut reviewer_rows: Vec<ReviewerProgress> = Vec::new();
            for reviewer in &reviewers {
                let assigned = groups
                    .get(&reviewer.group_no)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let decisions = decisions_by_group
                    .get(&reviewer.group_no)
                    .unwrap_or(&empty_decisions);
                let (done, total) = status::progress(assigned, decisions, reviewer.id);
                reviewer_rows.push(ReviewerProgress {
                    reviewer_id: reviewer.id,
                    username: reviewer.username.clone(),
                    group_no: reviewer.group_no,
                    is_admin: reviewer.is_admin,
                    done,
                    total,
                    percent: status::percent(done, total),
                });
            }

            let mut group_rows: Vec<GroupProgress> = Vec::new();
            for (group_no, assigned) in &groups {
                let members: Vec<&Reviewer> = reviewers
                    .iter()
                    .filter(|reviewer| reviewer.group_no == *group_no)
                    .collect();
                let member_ids: Vec<i64> = members.iter().map(|reviewer| reviewer.id).collect();
                let decisions = decisions_by_group
                    .get(group_no)
                    .unwrap_or(&empty_decisions);
                let done: usize = member_ids
                    .iter()
                    .map(|id| status::progress(assigned, decisions, *id).0)
                    .sum();
                let total = assigned.len() * members.len();
                group_rows.push(GroupProgress {
                    group_no: *group_no,
                    done,
                    total,
                    percent: status::percent(done, total),
                    status: status::check_group_status(&member_ids, assigned, decisions),
                });
            }

            if json {
                let value = serde_json::json!({
                    "reviewers": reviewer_rows,
                    "groups": group_rows,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Reviewer progress:");
                for row in &reviewer_rows {
                    let admin = if row.is_admin { " [admin]" } else { "" };
                    println!(
                        "- {}{admin} (group {}) {}/{} ({:.1}%)",
                        row.username, row.group_no, row.done, row.total, row.percent
                    );
                }
                println!();
                println!("Group progress:");
                for row in &group_rows {
                    let state = if row.status.has_conflicts {
                        "complete, conflicts to resolve"
                    } else if row.status.is_complete {
                        "complete"
                    } else {
                        "in progress"
                    };
                    println!(
                        "- group {}: {}/{} ({:.1}%), {}",
                        row.group_no, row.done, row.total, row.percent, state
                    );
                }
            }
        }
        Commands::Status { group, json } => {
            let (assigned, reviewers, decisions) = group_scope(&pool, cli.groups, group).await?;
            let member_ids: Vec<i64> = reviewers.iter().map(|reviewer| reviewer.id).collect();
            let group_status = status::check_group_status(&member_ids, &assigned, &decisions);
            if json {
                println!("{}", serde_json::to_string_pretty(&group_status)?);
            } else {
                println!(
                    "Group {group}: {} reviewers, {} assigned records.",
                    reviewers.len(),
                    assigned.len()
                );
                if group_status.has_conflicts {
                    println!("Screening complete; conflicts need resolution.");
                } else if group_status.is_complete {
                    println!("Screening complete; no conflicts.");
                } else {
                    println!("Screening still in progress.");
                }
            }
        }
        Commands::Conflicts { group } => {
            let (assigned, reviewers, decisions) = group_scope(&pool, cli.groups, group).await?;
            let member_ids: Vec<i64> = reviewers.iter().map(|reviewer| reviewer.id).collect();
            let group_status = status::check_group_status(&member_ids, &assigned, &decisions);
            if !group_status.is_complete {
                println!(
                    "Group {group} has not finished screening; conflicts are reported once every reviewer is done."
                );
            } else {
                let conflicted = status::conflicted_records(&assigned, &decisions);
                if conflicted.is_empty() {
                    println!("No conflicts in group {group}.");
                } else {
                    let records = db::fetch_records_by_ids(&pool, &conflicted).await?;
                    let titles: HashMap<i64, String> = records
                        .into_iter()
                        .map(|record| (record.id, record.title.unwrap_or_default()))
                        .collect();
                    println!("Conflicted records in group {group}:");
                    for record_id in &conflicted {
                        let votes: Vec<String> = decisions
                            .iter()
                            .filter(|row| row.record_id == *record_id)
                            .filter_map(|row| {
                                row.decision.map(|code| {
                                    format!("{}:{}", row.reviewer_name, code.as_i16())
                                })
                            })
                            .collect();
                        let title = titles.get(record_id).cloned().unwrap_or_default();
                        println!("- record {record_id} ({title}): {}", votes.join(", "));
                    }
                }
            }
        }
        Commands::Resolve { record, resolution } => {
            let code = DecisionCode::from_i16(resolution)
                .context("resolution must be 0 (exclude), 1 (adopt) or 2 (hold)")?;
            let affected = db::apply_resolution(&pool, record, code).await?;
            if affected == 0 {
                println!("No decision rows exist for record {record}; nothing to overwrite.");
            } else {
                println!("Overwrote {affected} decision rows for record {record}.");
            }
        }
        Commands::ExportAggregated { group, out } => {
            let year_min = db::get_year_min(&pool).await?;
            let keys = db::fetch_partition_keys(&pool).await?;
            let ids = match group {
                Some(group_no) => {
                    partition::group_members(&keys, year_min, cli.groups, group_no)?
                }
                None => partition::in_scope_ids(&keys, year_min),
            };
            let records = db::fetch_records_by_ids(&pool, &ids).await?;
            let decisions = db::fetch_decisions(&pool, &ids).await?;
            let rows = aggregate::aggregate(&records, &decisions);

            let out = out
                .unwrap_or_else(|| PathBuf::from(report::aggregated_filename(group, Utc::now())));
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_aggregated_csv(file, &rows)?;
            println!(
                "Aggregated export for {} records written to {}.",
                rows.len(),
                out.display()
            );
        }
        Commands::ExportDecisions { out } => {
            let records = db::fetch_records(&pool).await?;
            let ids: Vec<i64> = records.iter().map(|record| record.id).collect();
            let decisions = db::fetch_decisions(&pool, &ids).await?;

            let out =
                out.unwrap_or_else(|| PathBuf::from(report::decisions_filename(Utc::now())));
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_decisions_csv(file, &records, &decisions)?;
            println!(
                "{} decision rows written to {}.",
                decisions.len(),
                out.display()
            );
        }
        Commands::ExportCandidates { group, out } => {
            let year_min = db::get_year_min(&pool).await?;
            let keys = db::fetch_partition_keys(&pool).await?;
            let (ids, decisions) = match group {
                Some(group_no) => {
                    let assigned =
                        partition::group_members(&keys, year_min, cli.groups, group_no)?;
                    let decisions = db::fetch_decisions(&pool, &assigned).await?;
                    let reviewers = db::fetch_group_reviewers(&pool, group_no).await?;
                    let member_ids: Vec<i64> =
                        reviewers.iter().map(|reviewer| reviewer.id).collect();
                    let group_status =
                        status::check_group_status(&member_ids, &assigned, &decisions);
                    if !group_status.is_complete || group_status.has_conflicts {
                        anyhow::bail!(
                            "group {group_no} is incomplete or has unresolved conflicts; candidate export refused"
                        );
                    }
                    (assigned, decisions)
                }
                // the all-groups export runs unconditionally so the current
                // union of candidates can always be downloaded
                None => {
                    let ids = partition::in_scope_ids(&keys, year_min);
                    let decisions = db::fetch_decisions(&pool, &ids).await?;
                    (ids, decisions)
                }
            };
            let records = db::fetch_records_by_ids(&pool, &ids).await?;
            let rows = aggregate::aggregate(&records, &decisions);
            let body = report::candidate_list(&rows);
            let count = body.lines().count();

            let out = out
                .unwrap_or_else(|| PathBuf::from(report::candidates_filename(group, Utc::now())));
            std::fs::write(&out, body)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("{count} candidate ids written to {}.", out.display());
        }
    }

    Ok(())
}

async fn group_scope(
    pool: &PgPool,
    groups: u32,
    group_no: u32,
) -> anyhow::Result<(Vec<i64>, Vec<Reviewer>, Vec<DecisionRow>)> {
    let year_min = db::get_year_min(pool).await?;
    let keys = db::fetch_partition_keys(pool).await?;
    let assigned = partition::group_members(&keys, year_min, groups, group_no)?;
    let reviewers = db::fetch_group_reviewers(pool, group_no).await?;
    let decisions = db::fetch_decisions(pool, &assigned).await?;
    Ok((assigned, reviewers, decisions))
}
