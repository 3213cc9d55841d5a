//! Packaging: rendered documents → one in-memory zip archive.

use crate::candidate::{sanitize, CandidateRecord};
use crate::error::{CandidateError, CertBatchError};
use crate::output::ArchiveEntry;
use crate::pipeline::render::RenderedDocument;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A finished archive plus what went into it.
#[derive(Debug, Clone)]
pub struct PackagedArchive {
    pub bytes: Vec<u8>,
    pub entries: Vec<ArchiveEntry>,
    /// Documents that were rendered but could not be read back.
    pub failures: Vec<CandidateError>,
}

/// Package on the blocking pool.
pub async fn package(
    documents: Vec<RenderedDocument>,
    candidates: Vec<CandidateRecord>,
) -> Result<PackagedArchive, CertBatchError> {
    tokio::task::spawn_blocking(move || pack(&documents, &candidates))
        .await
        .map_err(|e| CertBatchError::Internal(format!("Packaging task panicked: {}", e)))?
}

/// Write every readable document into a zip archive.
///
/// Entries are named `<name>_<identifier>.pdf` (sanitized). A document that
/// matches no candidate, or whose name is already taken, is stored as
/// `Certificate_<n>.pdf` with `n` its 1-based position. Zero entries is an
/// `EmptyOutput` error.
pub fn pack(
    documents: &[RenderedDocument],
    candidates: &[CandidateRecord],
) -> Result<PackagedArchive, CertBatchError> {
    let known: HashSet<(&str, &str)> = candidates
        .iter()
        .map(|c| (c.identifier.as_str(), c.name.as_str()))
        .collect();

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
    let mut used: HashSet<String> = HashSet::new();
    let mut entries = Vec::with_capacity(documents.len());
    let mut failures = Vec::new();

    for (i, doc) in documents.iter().enumerate() {
        let bytes = match std::fs::read(&doc.path) {
            Ok(b) => b,
            Err(e) => {
                warn!("Cannot read rendered document {}: {}", doc.path.display(), e);
                failures.push(CandidateError::RenderFailed {
                    identifier: doc.identifier.clone(),
                    detail: format!("rendered document unreadable: {}", e),
                });
                continue;
            }
        };

        let preferred = format!("{}_{}.pdf", sanitize(&doc.name), sanitize(&doc.identifier));
        let matched = known.contains(&(doc.identifier.as_str(), doc.name.as_str()));
        let name = if matched && !used.contains(&preferred) {
            preferred
        } else {
            fallback_name(i, &used)
        };

        zw.start_file(name.as_str(), options)
            .and_then(|_| zw.write_all(&bytes).map_err(Into::into))
            .map_err(|e| CertBatchError::Internal(format!("zip entry '{}': {}", name, e)))?;
        debug!("Packaged {} ({} bytes)", name, bytes.len());

        used.insert(name.clone());
        entries.push(ArchiveEntry {
            name,
            identifier: doc.identifier.clone(),
            candidate_name: doc.name.clone(),
            size_bytes: bytes.len() as u64,
        });
    }

    if entries.is_empty() {
        return Err(CertBatchError::EmptyOutput {
            total: documents.len(),
            failed: failures.len(),
            first_error: failures
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no documents were rendered".to_string()),
        });
    }

    let bytes = zw
        .finish()
        .map_err(|e| CertBatchError::Internal(format!("zip finish: {}", e)))?
        .into_inner();

    Ok(PackagedArchive {
        bytes,
        entries,
        failures,
    })
}

fn fallback_name(index: usize, used: &HashSet<String>) -> String {
    let base = format!("Certificate_{}.pdf", index + 1);
    if !used.contains(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("Certificate_{}_{}.pdf", index + 1, n))
        .find(|c| !used.contains(c))
        .unwrap_or(base)
}
