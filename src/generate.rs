//! Batch generation entry points.
//!
//! [`generate`] runs one request end to end: validate, ingest, deduplicate,
//! bind images, render, record, package. Everything a request writes to disk
//! lives in one [`tempfile::TempDir`] that is removed when the request
//! returns, on success and on every error path.

use crate::actor::ActorContext;
use crate::candidate::CandidateRecord;
use crate::config::GenerationConfig;
use crate::error::{CandidateError, CertBatchError};
use crate::ledger::{ReportLedger, UpsertOutcome};
use crate::output::{CandidateSummary, GenerationOutput, GenerationStats, InspectReport};
use crate::pipeline::binding::{self, ImageBindingResolver, StaticBindings, Uploads};
use crate::pipeline::dedup::CandidateDeduplicator;
use crate::pipeline::render::{self, CompiledTemplate, PdfRenderer, RenderJob, RenderedDocument};
use crate::pipeline::{assets, ingest, input, package};
use crate::progress::BatchContext;
use crate::template::{TemplateDescriptor, TemplateRepository};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Collaborators a batch reads from and writes to.
#[derive(Clone)]
pub struct BatchServices {
    pub templates: Arc<dyn TemplateRepository>,
    pub ledger: Arc<ReportLedger>,
    pub actor: Arc<dyn ActorContext>,
}

impl std::fmt::Debug for BatchServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchServices")
            .field("templates", &"<dyn TemplateRepository>")
            .field("ledger", &self.ledger)
            .field("actor", &self.actor.current().id)
            .finish()
    }
}

/// One batch request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub template_id: u64,
    pub spreadsheet: PathBuf,
    pub uploads: Uploads,
}

impl GenerationRequest {
    pub fn new(template_id: u64, spreadsheet: impl Into<PathBuf>) -> Self {
        Self {
            template_id,
            spreadsheet: spreadsheet.into(),
            uploads: Uploads::default(),
        }
    }

    pub fn with_uploads(mut self, uploads: Uploads) -> Self {
        self.uploads = uploads;
        self
    }
}

/// What happened to one candidate.
struct CandidateOutcome {
    document: Option<RenderedDocument>,
    ledger: Option<UpsertOutcome>,
    errors: Vec<CandidateError>,
}

/// Generate one document per unique candidate and package them.
///
/// # Returns
/// `Ok(GenerationOutput)` when at least one document was packaged, even if
/// other candidates failed (check `output.failures`).
///
/// # Errors
/// Fatal errors only, all raised before an archive exists:
/// - unknown template id
/// - a required upload is missing or malformed (nothing is rendered or recorded)
/// - the spreadsheet is unreadable or has no valid candidate
/// - the template does not compile
/// - every candidate failed
pub async fn generate(
    request: &GenerationRequest,
    services: &BatchServices,
    config: &GenerationConfig,
) -> Result<GenerationOutput, CertBatchError> {
    let total_start = Instant::now();
    let ctx = BatchContext::new();
    info!(
        "Starting batch: template {} from {}",
        request.template_id,
        request.spreadsheet.display()
    );

    // ── Step 1: Resolve template ─────────────────────────────────────────
    let template = services
        .templates
        .get(request.template_id)
        .ok_or(CertBatchError::TemplateNotFound {
            id: request.template_id,
        })?;
    debug!("Template '{}' (tier {})", template.name, template.tier);

    // ── Step 2: Validate uploads against the tier ────────────────────────
    let uploads = binding::validate_uploads(template.tier, &request.uploads)?;

    // ── Step 3: Ingest spreadsheet ───────────────────────────────────────
    input::check_spreadsheet(&request.spreadsheet)?;
    let sheet = ingest::ingest(&request.spreadsheet, template.id, config).await?;
    let rows = sheet.candidates.len();

    // ── Step 4: Deduplicate ──────────────────────────────────────────────
    let dedup: CandidateDeduplicator = sheet.candidates.into_iter().collect();
    let duplicates = dedup.duplicates();
    let candidates = dedup.into_unique();
    info!(
        "{} rows, {} duplicates, {} unique candidates",
        rows,
        duplicates,
        candidates.len()
    );

    // ── Step 5: Stage assets ─────────────────────────────────────────────
    let workdir = tempfile::tempdir()
        .map_err(|e| CertBatchError::Internal(format!("tempdir: {}", e)))?;
    let photo_dir = match uploads.archive.as_deref() {
        Some(archive) => Some(assets::extract_archive(archive, &workdir.path().join("photos")).await?),
        None => None,
    };
    let statics = StaticBindings::from_images(
        &assets::load_static_images(template.static_image_dir.as_deref()),
        &assets::load_static_images(config.base_static_dir.as_deref()),
        config.max_sequential_slots,
    );
    let resolver = Arc::new(ImageBindingResolver::new(statics, uploads, photo_dir));

    // ── Step 6: Compile template ─────────────────────────────────────────
    let renderer = config
        .renderer
        .clone()
        .unwrap_or_else(|| Arc::new(PdfRenderer));
    let compiled = render::compile_template(renderer, &template).await?;

    // ── Step 7: Render and record each candidate ─────────────────────────
    let total = candidates.len();
    ctx.begin(total);
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
        cb.on_progress(ctx.progress_percent());
    }

    let render_start = Instant::now();
    let render_root = workdir.path().join("rendered");
    let template = Arc::new(template);
    let outcomes: Vec<CandidateOutcome> = stream::iter(candidates.iter().cloned().enumerate().map(|(i, candidate)| {
        let compiled = Arc::clone(&compiled);
        let resolver = Arc::clone(&resolver);
        let template = Arc::clone(&template);
        let services = services.clone();
        let render_options = config.render.clone();
        let output_path = render_root.join(i.to_string()).join(candidate.document_file_name());
        let callback = config.progress_callback.clone();
        let ctx = &ctx;
        async move {
            let index = i + 1;
            let identifier = candidate.identifier.clone();
            if let Some(ref cb) = callback {
                cb.on_candidate_start(index, total, &identifier);
            }

            let outcome = tokio::task::spawn_blocking(move || {
                process_candidate(
                    &candidate,
                    &template,
                    compiled.as_ref(),
                    &resolver,
                    &services,
                    render_options,
                    output_path,
                )
            })
            .await
            .unwrap_or_else(|e| CandidateOutcome {
                document: None,
                ledger: None,
                errors: vec![CandidateError::RenderFailed {
                    identifier: identifier.clone(),
                    detail: format!("render task panicked: {}", e),
                }],
            });

            ctx.record(outcome.document.is_some());
            if let Some(ref cb) = callback {
                cb.on_progress(ctx.progress_percent());
                match outcome.errors.first() {
                    None => cb.on_candidate_complete(index, total, &identifier),
                    Some(e) => cb.on_candidate_error(index, total, &identifier, &e.to_string()),
                }
            }
            outcome
        }
    }))
    .buffered(config.concurrency)
    .collect()
    .await;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    let mut documents = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    let (mut inserted, mut updated) = (0, 0);
    for o in outcomes {
        match o.ledger {
            Some(UpsertOutcome::Inserted { .. }) => inserted += 1,
            Some(UpsertOutcome::Updated { .. }) => updated += 1,
            None => {}
        }
        documents.extend(o.document);
        failures.extend(o.errors);
    }

    // ── Step 8: Package ──────────────────────────────────────────────────
    if documents.is_empty() {
        return Err(CertBatchError::EmptyOutput {
            total,
            failed: total,
            first_error: failures
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }

    let packed = package::package(documents, candidates.clone()).await?;
    failures.extend(packed.failures);
    drop(workdir);
    ctx.finish();

    let stats = GenerationStats {
        rows,
        duplicates,
        unique_candidates: total,
        packaged: packed.entries.len(),
        failed: total.saturating_sub(packed.entries.len()),
        ledger_inserted: inserted,
        ledger_updated: updated,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        render_duration_ms,
    };

    info!(
        "Batch complete: {}/{} documents packaged, {}ms total",
        stats.packaged, total, stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_progress(ctx.progress_percent());
        cb.on_batch_complete(total, stats.packaged);
    }

    Ok(GenerationOutput {
        archive: packed.bytes,
        entries: packed.entries,
        candidates,
        failures,
        stats,
    })
}

/// Generate a batch and write the archive to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn generate_to_file(
    request: &GenerationRequest,
    output_path: impl AsRef<Path>,
    services: &BatchServices,
    config: &GenerationConfig,
) -> Result<GenerationOutput, CertBatchError> {
    let output = generate(request, services, config).await?;
    let path = output_path.as_ref();
    let write_err = |e| CertBatchError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("zip.tmp");
    tokio::fs::write(&tmp_path, &output.archive)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(output)
}

/// Synchronous wrapper around [`generate`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_sync(
    request: &GenerationRequest,
    services: &BatchServices,
    config: &GenerationConfig,
) -> Result<GenerationOutput, CertBatchError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CertBatchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate(request, services, config))
}

/// Parse and deduplicate a spreadsheet without rendering or recording.
pub async fn inspect(
    spreadsheet: impl AsRef<Path>,
    config: &GenerationConfig,
) -> Result<InspectReport, CertBatchError> {
    let path = spreadsheet.as_ref();
    input::check_spreadsheet(path)?;
    let sheet = ingest::ingest(path, 0, config).await?;
    let rows = sheet.candidates.len();

    let dedup: CandidateDeduplicator = sheet.candidates.into_iter().collect();
    let duplicates = dedup.duplicates();
    Ok(InspectReport {
        sheet_name: sheet.sheet_name,
        rows,
        duplicates,
        candidates: dedup.into_unique().iter().map(CandidateSummary::from).collect(),
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Resolve, render and record one candidate. Runs on the blocking pool.
fn process_candidate(
    candidate: &CandidateRecord,
    template: &TemplateDescriptor,
    compiled: &dyn CompiledTemplate,
    resolver: &ImageBindingResolver,
    services: &BatchServices,
    options: crate::config::RenderOptions,
    output_path: PathBuf,
) -> CandidateOutcome {
    let actor = services.actor.current();
    let job = RenderJob {
        fields: candidate
            .fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        images: resolver.resolve(candidate).params(),
        options,
        output_path,
    };

    if let Err(e) = compiled.render(&job) {
        warn!("Render failed for {}: {}", candidate.identifier, e);
        if let Err(le) = services
            .ledger
            .mark_failed(&candidate.identifier, template.id, &actor)
        {
            warn!("Could not mark {} as failed: {}", candidate.identifier, le);
        }
        return CandidateOutcome {
            document: None,
            ledger: None,
            errors: vec![CandidateError::RenderFailed {
                identifier: candidate.identifier.clone(),
                detail: e.to_string(),
            }],
        };
    }

    let document = RenderedDocument {
        identifier: candidate.identifier.clone(),
        name: candidate.name.clone(),
        path: job.output_path,
    };

    match services.ledger.upsert(candidate, template, &actor) {
        Ok(outcome) => CandidateOutcome {
            document: Some(document),
            ledger: Some(outcome),
            errors: Vec::new(),
        },
        Err(e) => {
            warn!("Ledger write failed for {}: {}", candidate.identifier, e);
            CandidateOutcome {
                document: Some(document),
                ledger: None,
                errors: vec![CandidateError::LedgerFailed {
                    identifier: candidate.identifier.clone(),
                    detail: e.to_string(),
                }],
            }
        }
    }
}
