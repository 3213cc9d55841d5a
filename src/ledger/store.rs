//! [`ReportRepository`] implementations.

use super::{ReportRecord, ReportRepository};
use crate::error::LedgerError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Records {
    next_id: u64,
    by_id: BTreeMap<u64, ReportRecord>,
}

impl Records {
    fn from_vec(records: Vec<ReportRecord>) -> Self {
        let next_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        Self {
            next_id,
            by_id: records.into_iter().map(|r| (r.id, r)).collect(),
        }
    }

    fn find(&self, identifier: &str, template_id: u64) -> Vec<ReportRecord> {
        self.by_id
            .values()
            .filter(|r| r.identifier == identifier && r.template_id == template_id)
            .cloned()
            .collect()
    }

    fn insert(&mut self, mut record: ReportRecord) -> ReportRecord {
        self.next_id += 1;
        record.id = self.next_id;
        self.by_id.insert(record.id, record.clone());
        record
    }

    fn update(&mut self, record: &ReportRecord) -> Result<(), LedgerError> {
        match self.by_id.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(LedgerError::NotFound(record.id)),
        }
    }
}

/// Process-local ledger.
#[derive(Debug, Default)]
pub struct InMemoryReportRepository {
    records: RwLock<Records>,
}

impl InMemoryReportRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportRepository for InMemoryReportRepository {
    fn find_by_key(&self, identifier: &str, template_id: u64) -> Result<Vec<ReportRecord>, LedgerError> {
        let r = self.records.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(r.find(identifier, template_id))
    }

    fn insert(&self, record: ReportRecord) -> Result<ReportRecord, LedgerError> {
        let mut r = self.records.write().map_err(|_| LedgerError::Poisoned)?;
        Ok(r.insert(record))
    }

    fn update(&self, record: &ReportRecord) -> Result<(), LedgerError> {
        let mut r = self.records.write().map_err(|_| LedgerError::Poisoned)?;
        r.update(record)
    }

    fn list(&self) -> Result<Vec<ReportRecord>, LedgerError> {
        let r = self.records.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(r.by_id.values().cloned().collect())
    }
}

/// Ledger persisted as a JSON array of records.
///
/// The whole file is rewritten (temp file + rename) after every change, so a
/// batch of n candidates writes O(n²) bytes in total. Suited to ledgers of a
/// few thousand records; larger deployments should back [`ReportRepository`]
/// with a database. A missing file opens as an empty ledger and is created on
/// first write.
#[derive(Debug)]
pub struct JsonFileReportRepository {
    path: PathBuf,
    records: RwLock<Records>,
}

impl JsonFileReportRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str::<Vec<ReportRecord>>(&raw).map_err(|e| {
                LedgerError::Corrupt {
                    path: path.clone(),
                    detail: e.to_string(),
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(LedgerError::Io { path, source: e }),
        };
        debug!("Opened ledger {} ({} records)", path.display(), records.len());
        Ok(Self {
            path,
            records: RwLock::new(Records::from_vec(records)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &Records) -> Result<(), LedgerError> {
        let io_err = |e: std::io::Error| LedgerError::Io {
            path: self.path.clone(),
            source: e,
        };
        let all: Vec<&ReportRecord> = records.by_id.values().collect();
        let json = serde_json::to_vec_pretty(&all).map_err(|e| LedgerError::Corrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl ReportRepository for JsonFileReportRepository {
    fn find_by_key(&self, identifier: &str, template_id: u64) -> Result<Vec<ReportRecord>, LedgerError> {
        let r = self.records.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(r.find(identifier, template_id))
    }

    fn insert(&self, record: ReportRecord) -> Result<ReportRecord, LedgerError> {
        let mut r = self.records.write().map_err(|_| LedgerError::Poisoned)?;
        let stored = r.insert(record);
        if let Err(e) = self.persist(&r) {
            r.by_id.remove(&stored.id);
            r.next_id -= 1;
            return Err(e);
        }
        Ok(stored)
    }

    fn update(&self, record: &ReportRecord) -> Result<(), LedgerError> {
        let mut r = self.records.write().map_err(|_| LedgerError::Poisoned)?;
        let previous = r.by_id.get(&record.id).cloned();
        r.update(record)?;
        if let Err(e) = self.persist(&r) {
            if let Some(prev) = previous {
                r.by_id.insert(prev.id, prev);
            }
            return Err(e);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<ReportRecord>, LedgerError> {
        let r = self.records.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(r.by_id.values().cloned().collect())
    }
}
