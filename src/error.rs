//! Error types for the certbatch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CertBatchError`]: **Fatal**: the batch cannot proceed at all
//!   (unreadable spreadsheet, required upload missing, template does not
//!   compile, nothing could be packaged). Returned as `Err(CertBatchError)`
//!   from the top-level `generate*` functions, always before any output
//!   archive exists.
//!
//! * [`CandidateError`]: **Non-fatal**: a single candidate failed (render
//!   glitch, ledger write refused) but every sibling candidate is fine.
//!   Collected into [`crate::output::GenerationOutput::failures`] so callers
//!   can inspect partial success rather than losing the whole batch.

use crate::config::Tier;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the certbatch library.
///
/// Per-candidate failures use [`CandidateError`] and are reported in the
/// generation output rather than propagated here.
#[derive(Debug, Error)]
pub enum CertBatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The spreadsheet could not be opened or decoded, or yielded no
    /// candidates.
    #[error("Cannot ingest '{path}': {detail}")]
    Ingest { path: PathBuf, detail: String },

    /// The workbook opened but its sheet layout is not what we expect.
    #[error("Spreadsheet '{path}' has an unexpected layout: {detail}")]
    Schema { path: PathBuf, detail: String },

    /// An upload the template tier depends on was not supplied.
    #[error("Template tier {tier} requires a {role} upload, but none was provided.")]
    MissingAsset { tier: Tier, role: UploadRole },

    /// A supplied upload exists but is not usable (wrong format, unreadable).
    #[error("Invalid {role} upload '{path}': {detail}")]
    InvalidUpload {
        role: UploadRole,
        path: PathBuf,
        detail: String,
    },

    /// The photo archive could not be unpacked.
    #[error("Failed to extract archive '{path}': {detail}")]
    AssetExtraction { path: PathBuf, detail: String },

    // ── Template errors ───────────────────────────────────────────────────
    /// The template repository has no template with this id.
    #[error("Template not found with id: {id}")]
    TemplateNotFound { id: u64 },

    /// The template definition failed to compile; nothing was rendered.
    #[error("Template '{template}' failed to compile: {detail}")]
    TemplateCompile { template: String, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Every candidate failed; the archive would be empty.
    #[error("No documents could be packaged ({failed} of {total} candidates failed).\nFirst error: {first_error}")]
    EmptyOutput {
        total: usize,
        failed: usize,
        first_error: String,
    },

    /// Could not create or write the output archive.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which optional upload a template tier asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UploadRole {
    /// Zip archive of per-candidate photos.
    PhotoArchive,
    Logo,
    Signature,
}

impl std::fmt::Display for UploadRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UploadRole::PhotoArchive => "photo archive",
            UploadRole::Logo => "logo",
            UploadRole::Signature => "signature",
        };
        f.write_str(s)
    }
}

/// A non-fatal error for a single candidate.
///
/// The batch continues unless ALL candidates fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum CandidateError {
    /// Rendering the candidate's document failed.
    #[error("Candidate {identifier}: render failed: {detail}")]
    RenderFailed { identifier: String, detail: String },

    /// The document was rendered but the audit ledger refused the record.
    #[error("Candidate {identifier}: ledger update failed: {detail}")]
    LedgerFailed { identifier: String, detail: String },
}

impl CandidateError {
    pub fn identifier(&self) -> &str {
        match self {
            CandidateError::RenderFailed { identifier, .. }
            | CandidateError::LedgerFailed { identifier, .. } => identifier,
        }
    }
}

/// Failure inside a renderer, before it is attributed to a candidate.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("image slot {slot}: {detail}")]
    Image { slot: String, detail: String },

    #[error("font: {0}")]
    Font(String),

    #[error("write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Failure inside a report repository.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger store '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger store '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("no report with id {0}")]
    NotFound(u64),

    #[error("ledger lock poisoned")]
    Poisoned,
}
