//! Audit ledger: one record per (candidate identifier, template id).
//!
//! [`ReportLedger::upsert`] is idempotent: the first successful render for a
//! key inserts a record, every later one updates that record in place. A
//! batch re-run over the same spreadsheet therefore leaves the ledger with
//! the same number of records it had after the first run.
//!
//! Storage sits behind [`ReportRepository`]; [`store`] ships an in-memory
//! and a JSON-file implementation. Read-side reporting lives in [`query`].

pub mod query;
pub mod store;

use crate::actor::Actor;
use crate::candidate::CandidateRecord;
use crate::error::LedgerError;
use crate::template::TemplateDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub use store::{InMemoryReportRepository, JsonFileReportRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    Generated,
    Failed,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReportStatus::Generated => "Generated",
            ReportStatus::Failed => "Failed",
        })
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    /// Assigned by the repository on insert.
    pub id: u64,
    pub identifier: String,
    pub template_id: u64,
    pub candidate_name: String,
    /// The candidate's sector.
    pub course_name: String,
    pub grade: String,
    pub job_role: String,
    pub level: String,
    pub batch_id: String,
    pub training_partner: Option<String>,
    pub template_name: String,
    pub status: ReportStatus,
    pub active: bool,
    pub generated_by: u64,
    pub generated_on: DateTime<Utc>,
    pub modified_by: u64,
    pub modified_on: DateTime<Utc>,
}

impl ReportRecord {
    /// Overwrite the descriptive columns and stamp the record as freshly
    /// generated by `actor`.
    fn apply(
        &mut self,
        candidate: &CandidateRecord,
        template: &TemplateDescriptor,
        actor: &Actor,
        now: DateTime<Utc>,
    ) {
        self.identifier = candidate.identifier.clone();
        self.template_id = template.id;
        self.candidate_name = candidate.name.clone();
        self.course_name = candidate.sector.clone();
        self.grade = candidate.grade.clone();
        self.job_role = candidate.role.clone();
        self.level = candidate.level.clone();
        self.batch_id = candidate.batch_id.clone();
        self.training_partner = actor.training_partner.clone();
        self.template_name = template.name.clone();
        self.status = ReportStatus::Generated;
        self.active = true;
        self.generated_by = actor.id;
        self.generated_on = now;
        self.modified_by = actor.id;
        self.modified_on = now;
    }

    fn new(
        candidate: &CandidateRecord,
        template: &TemplateDescriptor,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Self {
        let mut r = Self {
            id: 0,
            identifier: String::new(),
            template_id: 0,
            candidate_name: String::new(),
            course_name: String::new(),
            grade: String::new(),
            job_role: String::new(),
            level: String::new(),
            batch_id: String::new(),
            training_partner: None,
            template_name: String::new(),
            status: ReportStatus::Generated,
            active: true,
            generated_by: actor.id,
            generated_on: now,
            modified_by: actor.id,
            modified_on: now,
        };
        r.apply(candidate, template, actor, now);
        r
    }
}

/// Storage for ledger records. Implementations synchronize internally.
pub trait ReportRepository: Send + Sync {
    /// Every record with this key, ordered by id.
    fn find_by_key(&self, identifier: &str, template_id: u64) -> Result<Vec<ReportRecord>, LedgerError>;

    /// Store a new record, assigning its id. Returns the stored record.
    fn insert(&self, record: ReportRecord) -> Result<ReportRecord, LedgerError>;

    /// Replace the record with the same id.
    fn update(&self, record: &ReportRecord) -> Result<(), LedgerError>;

    /// All records, ordered by id.
    fn list(&self) -> Result<Vec<ReportRecord>, LedgerError>;
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Inserted { id: u64 },
    /// `duplicates_ignored` counts extra records sharing the key; they are
    /// left untouched.
    Updated { id: u64, duplicates_ignored: usize },
}

impl UpsertOutcome {
    pub fn id(self) -> u64 {
        match self {
            UpsertOutcome::Inserted { id } | UpsertOutcome::Updated { id, .. } => id,
        }
    }
}

/// Idempotent writer over a [`ReportRepository`].
///
/// Lookup and write happen under one lock, so share a single ledger between
/// batches that write to the same repository.
pub struct ReportLedger {
    repo: Arc<dyn ReportRepository>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for ReportLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportLedger")
            .field("repo", &"<dyn ReportRepository>")
            .finish()
    }
}

impl ReportLedger {
    pub fn new(repo: Arc<dyn ReportRepository>) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn ReportRepository> {
        &self.repo
    }

    pub fn upsert(
        &self,
        candidate: &CandidateRecord,
        template: &TemplateDescriptor,
        actor: &Actor,
    ) -> Result<UpsertOutcome, LedgerError> {
        self.upsert_at(candidate, template, actor, Utc::now())
    }

    /// [`upsert`](Self::upsert) with an explicit timestamp.
    pub fn upsert_at(
        &self,
        candidate: &CandidateRecord,
        template: &TemplateDescriptor,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, LedgerError> {
        let _guard = self.write_lock.lock().map_err(|_| LedgerError::Poisoned)?;

        let mut matches = self.repo.find_by_key(&candidate.identifier, template.id)?;
        matches.sort_by_key(|r| r.id);
        let match_count = matches.len();

        let Some(first) = matches.first_mut() else {
            let stored = self
                .repo
                .insert(ReportRecord::new(candidate, template, actor, now))?;
            debug!(
                "Ledger insert #{} for {} / template {}",
                stored.id, candidate.identifier, template.id
            );
            return Ok(UpsertOutcome::Inserted { id: stored.id });
        };

        let duplicates_ignored = match_count - 1;
        if duplicates_ignored > 0 {
            warn!(
                "{} ledger records share key ({}, {}); updating #{} only",
                duplicates_ignored + 1,
                candidate.identifier,
                template.id,
                first.id
            );
        }

        first.apply(candidate, template, actor, now);
        self.repo.update(first)?;
        debug!(
            "Ledger update #{} for {} / template {}",
            first.id, candidate.identifier, template.id
        );
        Ok(UpsertOutcome::Updated {
            id: first.id,
            duplicates_ignored,
        })
    }

    /// Mark the existing record for this key as failed. Never creates one.
    /// Returns the id that was marked, if any.
    pub fn mark_failed(
        &self,
        identifier: &str,
        template_id: u64,
        actor: &Actor,
    ) -> Result<Option<u64>, LedgerError> {
        let _guard = self.write_lock.lock().map_err(|_| LedgerError::Poisoned)?;

        let mut matches = self.repo.find_by_key(identifier, template_id)?;
        matches.sort_by_key(|r| r.id);
        let Some(first) = matches.first_mut() else {
            return Ok(None);
        };

        first.status = ReportStatus::Failed;
        first.modified_by = actor.id;
        first.modified_on = Utc::now();
        self.repo.update(first)?;
        Ok(Some(first.id))
    }
}
