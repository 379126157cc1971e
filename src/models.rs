use serde::Serialize;

/// Tri-state screening judgment. Absence (NULL in the store) means the
/// reviewer has not decided yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecisionCode {
    Exclude = 0,
    Adopt = 1,
    Hold = 2,
}

impl DecisionCode {
    pub fn from_i16(value: i16) -> Option<DecisionCode> {
        match value {
            0 => Some(DecisionCode::Exclude),
            1 => Some(DecisionCode::Adopt),
            2 => Some(DecisionCode::Hold),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

pub const CATEGORY_LABELS: [&str; 4] = [
    "cat_population",
    "cat_intervention",
    "cat_outcome",
    "cat_design",
];

/// Independent sub-classification flags a reviewer can set alongside the
/// decision code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryFlags {
    pub population: bool,
    pub intervention: bool,
    pub outcome: bool,
    pub design: bool,
}

impl CategoryFlags {
    pub fn as_array(self) -> [bool; 4] {
        [self.population, self.intervention, self.outcome, self.design]
    }

    pub fn any(self) -> bool {
        self.as_array().into_iter().any(|flag| flag)
    }
}

#[derive(Debug, Clone)]
pub struct Reviewer {
    pub id: i64,
    pub username: String,
    pub group_no: u32,
    pub is_admin: bool,
}

/// The minimal per-record fields the partitioner sorts on.
#[derive(Debug, Clone)]
pub struct PartitionKey {
    pub id: i64,
    pub authors: Option<String>,
    pub external_id: Option<i64>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub id: i64,
    pub external_id: Option<i64>,
    pub title: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct DecisionRow {
    pub record_id: i64,
    pub reviewer_id: i64,
    pub reviewer_name: String,
    pub decision: Option<DecisionCode>,
    pub comment: String,
    pub categories: CategoryFlags,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GroupStatus {
    pub is_complete: bool,
    pub has_conflicts: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewerProgress {
    pub reviewer_id: i64,
    pub username: String,
    pub group_no: u32,
    pub is_admin: bool,
    pub done: usize,
    pub total: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupProgress {
    pub group_no: u32,
    pub done: usize,
    pub total: usize,
    pub percent: f64,
    pub status: GroupStatus,
}

#[derive(Debug, Clone)]
pub struct CategorySummary {
    /// Raw votes in reviewer order, e.g. "1+0+1".
    pub votes: String,
    /// Set as soon as any reviewer set the flag.
    pub final_flag: bool,
    /// At least one reviewer set the flag and at least one left it unset.
    pub conflict: bool,
}

#[derive(Debug, Clone)]
pub struct AggregatedRow {
    pub record_id: i64,
    pub external_id: Option<i64>,
    pub title: Option<String>,
    pub year: Option<i32>,
    /// Histogram over submitted codes, indexed by code value.
    pub counts: [usize; 3],
    pub aggregated: Option<DecisionCode>,
    /// "name:code" per contributing decision row.
    pub reviewers: Vec<String>,
    pub combined_comment: String,
    pub categories: [CategorySummary; 4],
}
