//! Read-side reporting over a [`ReportRepository`].
//!
//! Every function lists the repository once and aggregates in memory.
//! Calendar months are taken in UTC.

use super::{ReportRecord, ReportRepository, ReportStatus};
use crate::error::LedgerError;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Criteria for [`search`]. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub status: Option<ReportStatus>,
    /// Case-insensitive substring of identifier, candidate name, course name
    /// or template name.
    pub search: Option<String>,
    /// Inclusive lower bound on `generated_on`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `generated_on`.
    pub to: Option<DateTime<Utc>>,
    pub generated_by: Option<u64>,
}

impl ReportFilter {
    pub fn matches(&self, r: &ReportRecord) -> bool {
        if self.status.is_some_and(|s| s != r.status) {
            return false;
        }
        if self.generated_by.is_some_and(|id| id != r.generated_by) {
            return false;
        }
        if self.from.is_some_and(|from| r.generated_on < from) {
            return false;
        }
        if self.to.is_some_and(|to| r.generated_on >= to) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                [&r.identifier, &r.candidate_name, &r.course_name, &r.template_name]
                    .iter()
                    .any(|f| f.to_lowercase().contains(&term))
            }
        }
    }
}

/// Matching records, newest `generated_on` first.
pub fn search(
    repo: &dyn ReportRepository,
    filter: &ReportFilter,
) -> Result<Vec<ReportRecord>, LedgerError> {
    let mut hits: Vec<ReportRecord> = repo.list()?.into_iter().filter(|r| filter.matches(r)).collect();
    hits.sort_by(|a, b| b.generated_on.cmp(&a.generated_on).then(b.id.cmp(&a.id)));
    Ok(hits)
}

pub fn count_total(repo: &dyn ReportRepository) -> Result<usize, LedgerError> {
    Ok(repo.list()?.len())
}

pub fn count_by_actor(repo: &dyn ReportRepository, actor_id: u64) -> Result<usize, LedgerError> {
    count_where(repo, |r| r.generated_by == actor_id)
}

pub fn count_by_status(repo: &dyn ReportRepository, status: ReportStatus) -> Result<usize, LedgerError> {
    count_where(repo, |r| r.status == status)
}

pub fn count_by_template(repo: &dyn ReportRepository, template_id: u64) -> Result<usize, LedgerError> {
    count_where(repo, |r| r.template_id == template_id)
}

/// Records generated in the calendar month containing `now`, optionally
/// restricted to one actor.
pub fn count_in_month_of(
    repo: &dyn ReportRepository,
    now: DateTime<Utc>,
    actor_id: Option<u64>,
) -> Result<usize, LedgerError> {
    let (start, end) = month_bounds(now);
    count_where(repo, |r| {
        r.generated_on >= start
            && r.generated_on < end
            && actor_id.map_or(true, |id| r.generated_by == id)
    })
}

pub fn count_this_month(repo: &dyn ReportRepository, actor_id: Option<u64>) -> Result<usize, LedgerError> {
    count_in_month_of(repo, Utc::now(), actor_id)
}

/// `"YYYY-MM"` → number of records generated in that month.
pub fn monthly_stats(repo: &dyn ReportRepository) -> Result<BTreeMap<String, usize>, LedgerError> {
    let mut out = BTreeMap::new();
    for r in repo.list()? {
        let key = format!("{:04}-{:02}", r.generated_on.year(), r.generated_on.month());
        *out.entry(key).or_insert(0) += 1;
    }
    Ok(out)
}

/// Template name → number of records.
pub fn template_distribution(repo: &dyn ReportRepository) -> Result<BTreeMap<String, usize>, LedgerError> {
    let mut out = BTreeMap::new();
    for r in repo.list()? {
        *out.entry(r.template_name).or_insert(0) += 1;
    }
    Ok(out)
}

/// The actor's most recently generated record.
pub fn latest_by_actor(
    repo: &dyn ReportRepository,
    actor_id: u64,
) -> Result<Option<ReportRecord>, LedgerError> {
    Ok(repo
        .list()?
        .into_iter()
        .filter(|r| r.generated_by == actor_id)
        .max_by(|a, b| a.generated_on.cmp(&b.generated_on).then(a.id.cmp(&b.id))))
}

/// Dashboard figures in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub generated: usize,
    pub failed: usize,
    pub this_month: usize,
    pub monthly: BTreeMap<String, usize>,
    pub by_template: BTreeMap<String, usize>,
}

pub fn summarize(repo: &dyn ReportRepository, now: DateTime<Utc>) -> Result<LedgerSummary, LedgerError> {
    let records = repo.list()?;
    let (start, end) = month_bounds(now);

    let mut summary = LedgerSummary {
        total: records.len(),
        generated: 0,
        failed: 0,
        this_month: 0,
        monthly: BTreeMap::new(),
        by_template: BTreeMap::new(),
    };
    for r in records {
        match r.status {
            ReportStatus::Generated => summary.generated += 1,
            ReportStatus::Failed => summary.failed += 1,
        }
        if r.generated_on >= start && r.generated_on < end {
            summary.this_month += 1;
        }
        let key = format!("{:04}-{:02}", r.generated_on.year(), r.generated_on.month());
        *summary.monthly.entry(key).or_insert(0) += 1;
        *summary.by_template.entry(r.template_name).or_insert(0) += 1;
    }
    Ok(summary)
}

fn count_where(
    repo: &dyn ReportRepository,
    pred: impl Fn(&ReportRecord) -> bool,
) -> Result<usize, LedgerError> {
    Ok(repo.list()?.iter().filter(|r| pred(r)).count())
}

/// `[first instant of the month, first instant of the next month)`.
fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let (y, m) = (now.year(), now.month());
    let (ny, nm) = if m == 12 { (y + 1, 1) } else { (y, m + 1) };
    (first_of(y, m), first_of(ny, nm))
}

fn first_of(year: i32, month: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
