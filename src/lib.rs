//! # certbatch
//!
//! Generate one certificate document per candidate from a spreadsheet,
//! package them into a single zip archive, and keep an idempotent audit
//! ledger of what was issued.
//!
//! ## Pipeline Overview
//!
//! ```text
//! spreadsheet + uploads
//!  │
//!  ├─ 1. Validate  template lookup, tier-required uploads, file checks
//!  ├─ 2. Ingest    first sheet → candidate records (calamine, spawn_blocking)
//!  ├─ 3. Dedup     repeated identifiers collapse, last row wins in place
//!  ├─ 4. Assets    unpack photo archive flat, list static images
//!  ├─ 5. Render    compile template once, one PDF per candidate (concurrent)
//!  ├─ 6. Ledger    upsert one record per (identifier, template id)
//!  └─ 7. Package   zip of rendered documents + per-candidate failures
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use certbatch::{
//!     generate, BatchServices, GenerationConfig, GenerationRequest, InMemoryReportRepository,
//!     JsonTemplateCatalog, ReportLedger, StaticActor, Actor,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = BatchServices {
//!         templates: Arc::new(JsonTemplateCatalog::load("templates.json")?),
//!         ledger: Arc::new(ReportLedger::new(Arc::new(InMemoryReportRepository::new()))),
//!         actor: Arc::new(StaticActor(Actor::new(1, "operator"))),
//!     };
//!     let request = GenerationRequest::new(1, "candidates.xlsx");
//!     let output = generate(&request, &services, &GenerationConfig::default()).await?;
//!     std::fs::write("certificates.zip", &output.archive)?;
//!     eprintln!("{} packaged, {} failed", output.stats.packaged, output.stats.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Template Tiers
//!
//! | Tier | Variant | Required uploads |
//! |------|---------|------------------|
//! | 0 | `NoImages` | none |
//! | 1 | `PhotoOnly` | photo archive |
//! | 2 | `PhotoAndLogo` | photo archive, logo |
//! | 3 | `PhotoLogoSignature` | photo archive, logo, signature |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `certbatch` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! certbatch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod actor;
pub mod candidate;
pub mod config;
pub mod error;
pub mod generate;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod template;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use actor::{Actor, ActorContext, StaticActor};
pub use candidate::CandidateRecord;
pub use config::{GenerationConfig, GenerationConfigBuilder, Markup, RenderOptions, Tier};
pub use error::{CandidateError, CertBatchError, LedgerError, RenderError, UploadRole};
pub use generate::{generate, generate_sync, generate_to_file, inspect, BatchServices, GenerationRequest};
pub use ledger::{
    InMemoryReportRepository, JsonFileReportRepository, ReportLedger, ReportRecord, ReportRepository,
    ReportStatus, UpsertOutcome,
};
pub use output::{ArchiveEntry, CandidateSummary, GenerationOutput, GenerationStats, InspectReport};
pub use pipeline::binding::Uploads;
pub use pipeline::render::{CompiledTemplate, DocumentRenderer, PdfRenderer, RenderJob};
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use template::{InMemoryTemplateRepository, JsonTemplateCatalog, TemplateDescriptor, TemplateRepository};
