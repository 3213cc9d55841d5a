//! Collapse repeated candidate identifiers, last value wins.
//!
//! A repeated identifier replaces the earlier record at its original
//! position, so output order follows first appearance while values follow
//! last appearance. The deduplicator runs as a single pre-pass over the
//! ingested rows; its result is read-only while rendering.

use crate::candidate::CandidateRecord;
use std::collections::HashMap;

/// Where a pushed record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// First time this identifier was seen (or its slot had been released).
    Appended(usize),
    /// Overwrote the record previously placed at this index.
    Replaced(usize),
}

impl Placement {
    pub fn index(self) -> usize {
        match self {
            Placement::Appended(i) | Placement::Replaced(i) => i,
        }
    }
}

#[derive(Debug, Default)]
pub struct CandidateDeduplicator {
    records: Vec<CandidateRecord>,
    index_of: HashMap<String, usize>,
    duplicates: usize,
}

impl CandidateDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: CandidateRecord) -> Placement {
        if let Some(&i) = self.index_of.get(&record.identifier) {
            self.duplicates += 1;
            self.records[i] = record;
            return Placement::Replaced(i);
        }
        let i = self.records.len();
        self.index_of.insert(record.identifier.clone(), i);
        self.records.push(record);
        Placement::Appended(i)
    }

    /// Forget the output index for `identifier`; a later occurrence is
    /// appended rather than replacing. The released record stays in place.
    #[cfg(test)]
    pub fn release(&mut self, identifier: &str) -> Option<usize> {
        self.index_of.remove(identifier)
    }

    /// Rows whose identifier had already been placed.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_unique(self) -> Vec<CandidateRecord> {
        self.records
    }
}

impl FromIterator<CandidateRecord> for CandidateDeduplicator {
    fn from_iter<I: IntoIterator<Item = CandidateRecord>>(iter: I) -> Self {
        let mut d = Self::new();
        for r in iter {
            d.push(r);
        }
        d
    }
}
