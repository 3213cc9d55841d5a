//! End-to-end batch tests: spreadsheet in, zip archive and ledger out.
//!
//! Workbooks are synthesised with rust_xlsxwriter, photos with `image`, and
//! photo archives with `zip`, all inside temp directories.

use certbatch::{
    generate, generate_to_file, inspect, Actor, BatchServices, CandidateError, CertBatchError,
    CompiledTemplate, DocumentRenderer, GenerationConfig, GenerationProgressCallback,
    GenerationRequest, InMemoryReportRepository, InMemoryTemplateRepository,
    JsonFileReportRepository, LedgerError, RenderError, RenderJob, ReportLedger, ReportRecord,
    ReportRepository, ReportStatus, StaticActor, TemplateDescriptor, Tier, UploadRole, Uploads,
};
use rust_xlsxwriter::Workbook;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Rows of (salutation, name, identifier); remaining columns stay blank.
fn write_candidates(path: &Path, rows: &[(&str, &str, &str)]) {
    let mut wb = Workbook::new();
    let ws = wb.add_worksheet();
    ws.set_name("Candidate Data").unwrap();
    for (c, h) in ["Salutation", "Name", "SID", "Job Role"].iter().enumerate() {
        ws.write_string(0, c as u16, *h).unwrap();
    }
    for (r, (salutation, name, sid)) in rows.iter().enumerate() {
        let r = r as u32 + 1;
        ws.write_string(r, 0, *salutation).unwrap();
        ws.write_string(r, 1, *name).unwrap();
        ws.write_string(r, 2, *sid).unwrap();
        ws.write_string(r, 3, "Retail Associate").unwrap();
    }
    wb.save(path).unwrap();
}

fn write_layout(dir: &Path) -> PathBuf {
    let path = dir.join("layout.json");
    std::fs::write(
        &path,
        r#"{"page": {"width_mm": 297, "height_mm": 210},
            "texts": [
              {"text": "{salutation} {candidateName}", "x_mm": 30, "y_mm": 120, "size": 24,
               "font": "Helvetica-Bold", "wrap_chars": 40},
              {"text": "SID: {sid}<br>{jobRole}", "x_mm": 30, "y_mm": 90}
            ]}"#,
    )
    .unwrap();
    path
}

fn write_png(path: &Path) {
    image::RgbImage::from_pixel(8, 8, image::Rgb([180, 40, 40]))
        .save(path)
        .unwrap();
}

fn write_photo_archive(path: &Path, entries: &[&str]) {
    let png = {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("p.png");
        write_png(&p);
        std::fs::read(&p).unwrap()
    };
    let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
    for name in entries {
        zw.start_file(*name, SimpleFileOptions::default()).unwrap();
        zw.write_all(&png).unwrap();
    }
    let bytes = zw.finish().unwrap().into_inner();
    std::fs::write(path, bytes).unwrap();
}

fn template(id: u64, tier: Tier, definition: PathBuf) -> TemplateDescriptor {
    TemplateDescriptor {
        id,
        name: "Skill Certificate".into(),
        tier,
        definition_path: definition,
        static_image_dir: None,
    }
}

fn services(template: TemplateDescriptor, ledger: Arc<ReportLedger>) -> BatchServices {
    BatchServices {
        templates: Arc::new(InMemoryTemplateRepository::new().with(template)),
        ledger,
        actor: Arc::new(StaticActor(
            Actor::new(7, "operator").with_training_partner("Acme Skills"),
        )),
    }
}

fn fresh_ledger() -> Arc<ReportLedger> {
    Arc::new(ReportLedger::new(Arc::new(InMemoryReportRepository::new())))
}

fn entry_names(archive: &[u8]) -> Vec<String> {
    let mut za = ZipArchive::new(Cursor::new(archive)).unwrap();
    (0..za.len())
        .map(|i| za.by_index(i).unwrap().name().to_string())
        .collect()
}

fn config_with(renderer: Arc<dyn DocumentRenderer>) -> GenerationConfig {
    GenerationConfig::builder()
        .concurrency(2)
        .renderer(renderer)
        .build()
        .unwrap()
}

/// Writes a stub document and remembers every job it saw.
#[derive(Default)]
struct RecordingRenderer {
    compiles: AtomicUsize,
    jobs: Arc<Mutex<Vec<RenderJob>>>,
    fail_for: Option<&'static str>,
    reject_compile: bool,
}

struct RecordingTemplate {
    jobs: Arc<Mutex<Vec<RenderJob>>>,
    fail_for: Option<&'static str>,
}

impl DocumentRenderer for RecordingRenderer {
    fn compile(
        &self,
        template: &TemplateDescriptor,
    ) -> Result<Box<dyn CompiledTemplate>, CertBatchError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if self.reject_compile {
            return Err(CertBatchError::TemplateCompile {
                template: template.name.clone(),
                detail: "stub rejects layout".into(),
            });
        }
        Ok(Box::new(RecordingTemplate {
            jobs: Arc::clone(&self.jobs),
            fail_for: self.fail_for,
        }))
    }
}

impl CompiledTemplate for RecordingTemplate {
    fn render(&self, job: &RenderJob) -> Result<(), RenderError> {
        self.jobs.lock().unwrap().push(job.clone());
        let sid = job.fields.get("sid").map(String::as_str).unwrap_or("");
        if self.fail_for.is_some_and(|f| f == "*" || f == sid) {
            return Err(RenderError::Other(format!("stub failure for {sid}")));
        }
        if let Some(parent) = job.output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RenderError::Other(e.to_string()))?;
        }
        std::fs::write(&job.output_path, format!("%PDF-stub {sid}"))
            .map_err(|e| RenderError::Other(e.to_string()))
    }
}

/// Repository whose writes always fail.
struct UnwritableRepository;

impl ReportRepository for UnwritableRepository {
    fn find_by_key(&self, _: &str, _: u64) -> Result<Vec<ReportRecord>, LedgerError> {
        Ok(Vec::new())
    }
    fn insert(&self, _: ReportRecord) -> Result<ReportRecord, LedgerError> {
        Err(LedgerError::Poisoned)
    }
    fn update(&self, _: &ReportRecord) -> Result<(), LedgerError> {
        Err(LedgerError::Poisoned)
    }
    fn list(&self) -> Result<Vec<ReportRecord>, LedgerError> {
        Ok(Vec::new())
    }
}

/// `<workdir>/rendered/<i>/<file>.pdf` → `<workdir>`.
fn workdir_of(job: &RenderJob) -> PathBuf {
    job.output_path.ancestors().nth(3).unwrap().to_path_buf()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_rows_collapse_to_last_values() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(
        &sheet,
        &[("Ms", "Alice", "S1"), ("Ms", "Alice K", "S1"), ("Mr", "Bob", "S2")],
    );
    let ledger = fresh_ledger();
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), ledger.clone());

    let out = generate(&GenerationRequest::new(1, &sheet), &svc, &GenerationConfig::default())
        .await
        .unwrap();

    assert_eq!(entry_names(&out.archive), vec!["Alice_K_S1.pdf", "Bob_S2.pdf"]);
    assert_eq!(out.candidates[0].name, "Alice K");
    assert_eq!(out.stats.rows, 3);
    assert_eq!(out.stats.duplicates, 1);
    assert_eq!(out.stats.packaged, 2);
    assert!(out.failures.is_empty());

    let mut za = ZipArchive::new(Cursor::new(out.archive.as_slice())).unwrap();
    let mut pdf = Vec::new();
    za.by_name("Bob_S2.pdf").unwrap().read_to_end(&mut pdf).unwrap();
    assert!(pdf.starts_with(b"%PDF"));

    let records = ledger.repository().list().unwrap();
    assert_eq!(records.len(), 2);
    let s1 = records.iter().find(|r| r.identifier == "S1").unwrap();
    assert_eq!(s1.candidate_name, "Alice K");
    assert_eq!(s1.template_name, "Skill Certificate");
    assert_eq!(s1.training_partner.as_deref(), Some("Acme Skills"));
    assert_eq!(s1.generated_by, 7);
}

#[tokio::test]
async fn rerun_updates_ledger_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1"), ("Mr", "Bob", "S2")]);
    let ledger = fresh_ledger();
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), ledger.clone());
    let config = config_with(Arc::new(RecordingRenderer::default()));
    let request = GenerationRequest::new(1, &sheet);

    let first = generate(&request, &svc, &config).await.unwrap();
    assert_eq!(first.stats.ledger_inserted, 2);

    let second = generate(&request, &svc, &config).await.unwrap();
    assert_eq!(second.stats.ledger_inserted, 0);
    assert_eq!(second.stats.ledger_updated, 2);
    assert_eq!(ledger.repository().list().unwrap().len(), 2);
}

#[tokio::test]
async fn tier3_without_signature_fails_before_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1")]);
    let archive = dir.path().join("photos.zip");
    write_photo_archive(&archive, &["S1.png"]);
    let logo = dir.path().join("logo.png");
    write_png(&logo);

    let ledger = fresh_ledger();
    let svc = services(template(3, Tier::PhotoLogoSignature, write_layout(dir.path())), ledger.clone());
    let renderer = Arc::new(RecordingRenderer::default());
    let request = GenerationRequest::new(3, &sheet).with_uploads(Uploads {
        archive: Some(archive),
        logo: Some(logo),
        signature: None,
    });

    let err = generate(&request, &svc, &config_with(renderer.clone()))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            CertBatchError::MissingAsset {
                tier: Tier::PhotoLogoSignature,
                role: UploadRole::Signature
            }
        ),
        "got: {err}"
    );
    assert_eq!(renderer.compiles.load(Ordering::SeqCst), 0);
    assert!(renderer.jobs.lock().unwrap().is_empty());
    assert!(ledger.repository().list().unwrap().is_empty());
}

#[tokio::test]
async fn rows_without_identifier_are_an_ingest_error() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", ""), ("Mr", "Bob", "  ")]);
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), fresh_ledger());

    let err = generate(&GenerationRequest::new(1, &sheet), &svc, &GenerationConfig::default())
        .await
        .unwrap_err();
    match err {
        CertBatchError::Ingest { detail, .. } => assert_eq!(detail, "no candidates found"),
        other => panic!("expected Ingest, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_template_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1")]);
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), fresh_ledger());

    let err = generate(&GenerationRequest::new(99, &sheet), &svc, &GenerationConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CertBatchError::TemplateNotFound { id: 99 }));
}

#[tokio::test]
async fn unsafe_characters_are_sanitized() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Mr", "A/B:C", "A/B:C")]);
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), fresh_ledger());

    let out = generate(
        &GenerationRequest::new(1, &sheet),
        &svc,
        &config_with(Arc::new(RecordingRenderer::default())),
    )
    .await
    .unwrap();

    let names = entry_names(&out.archive);
    assert_eq!(names, vec!["A_B_C_A_B_C.pdf"]);
    assert!(names[0]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.'));
}

#[tokio::test]
async fn every_render_failing_is_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1"), ("Mr", "Bob", "S2")]);
    let ledger = fresh_ledger();
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), ledger.clone());
    let renderer = Arc::new(RecordingRenderer {
        fail_for: Some("*"),
        ..Default::default()
    });

    let err = generate(&GenerationRequest::new(1, &sheet), &svc, &config_with(renderer))
        .await
        .unwrap_err();
    match err {
        CertBatchError::EmptyOutput { total, failed, first_error } => {
            assert_eq!((total, failed), (2, 2));
            assert!(first_error.contains("stub failure"), "got: {first_error}");
        }
        other => panic!("expected EmptyOutput, got {other:?}"),
    }
    assert!(ledger.repository().list().unwrap().is_empty());
}

#[tokio::test]
async fn one_failure_does_not_abort_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1"), ("Mr", "Bob", "S2"), ("Mx", "Cy", "S3")]);
    let ledger = fresh_ledger();
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), ledger.clone());
    let request = GenerationRequest::new(1, &sheet);

    // First run records S2 as generated.
    generate(&request, &svc, &config_with(Arc::new(RecordingRenderer::default())))
        .await
        .unwrap();

    let failing = Arc::new(RecordingRenderer {
        fail_for: Some("S2"),
        ..Default::default()
    });
    let out = generate(&request, &svc, &config_with(failing)).await.unwrap();

    assert_eq!(entry_names(&out.archive), vec!["Alice_S1.pdf", "Cy_S3.pdf"]);
    assert_eq!(out.stats.failed, 1);
    assert_eq!(out.failures.len(), 1);
    assert!(matches!(
        &out.failures[0],
        CandidateError::RenderFailed { identifier, .. } if identifier == "S2"
    ));

    let records = ledger.repository().list().unwrap();
    assert_eq!(records.len(), 3);
    let s2 = records.iter().find(|r| r.identifier == "S2").unwrap();
    assert_eq!(s2.status, ReportStatus::Failed);
}

#[tokio::test]
async fn tier1_binds_photo_from_archive() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1"), ("Mr", "Bob", "S2")]);
    let archive = dir.path().join("photos.zip");
    write_photo_archive(&archive, &["batch7/s1_passport.PNG", "readme/S2.txt"]);
    let logo = dir.path().join("logo.png");
    write_png(&logo);

    let svc = services(template(2, Tier::PhotoOnly, write_layout(dir.path())), fresh_ledger());
    let renderer = Arc::new(RecordingRenderer::default());
    let request = GenerationRequest::new(2, &sheet).with_uploads(Uploads {
        archive: Some(archive),
        // Not required by tier 1, so never bound.
        logo: Some(logo),
        signature: None,
    });

    let out = generate(&request, &svc, &config_with(renderer.clone()))
        .await
        .unwrap();
    assert_eq!(out.stats.packaged, 2);

    let jobs = renderer.jobs.lock().unwrap();
    let job_for = |sid: &str| {
        jobs.iter()
            .find(|j| j.fields.get("sid").map(String::as_str) == Some(sid))
            .unwrap()
    };

    let s1_photo = job_for("S1").images.get("imgParam3").cloned().unwrap();
    assert_eq!(s1_photo.file_name().unwrap(), "s1_passport.png");
    assert!(!job_for("S2").images.contains_key("imgParam3"));
    assert!(!job_for("S1").images.contains_key("imgParam5"));
}

#[tokio::test]
async fn tier1_without_archive_is_missing_asset() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1")]);
    let svc = services(template(2, Tier::PhotoOnly, write_layout(dir.path())), fresh_ledger());

    let err = generate(&GenerationRequest::new(2, &sheet), &svc, &GenerationConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CertBatchError::MissingAsset {
            role: UploadRole::PhotoArchive,
            ..
        }
    ));
}

#[tokio::test]
async fn progress_events_cover_every_candidate() {
    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        completed: AtomicUsize,
        errored: AtomicUsize,
        packaged: AtomicUsize,
        percent: Mutex<Vec<u8>>,
    }
    impl GenerationProgressCallback for Counting {
        fn on_progress(&self, percent: u8) {
            self.percent.lock().unwrap().push(percent);
        }
        fn on_candidate_start(&self, _: usize, _: usize, _: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_candidate_complete(&self, _: usize, _: usize, _: &str) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_candidate_error(&self, _: usize, _: usize, _: &str, _: &str) {
            self.errored.fetch_add(1, Ordering::SeqCst);
        }
        fn on_batch_complete(&self, _: usize, packaged: usize) {
            self.packaged.store(packaged, Ordering::SeqCst);
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1"), ("Mr", "Bob", "S2"), ("Mx", "Cy", "S3")]);
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), fresh_ledger());

    let cb = Arc::new(Counting::default());
    let config = GenerationConfig::builder()
        .renderer(Arc::new(RecordingRenderer {
            fail_for: Some("S3"),
            ..Default::default()
        }))
        .progress_callback(cb.clone())
        .build()
        .unwrap();

    generate(&GenerationRequest::new(1, &sheet), &svc, &config)
        .await
        .unwrap();
    assert_eq!(cb.started.load(Ordering::SeqCst), 3);
    assert_eq!(cb.completed.load(Ordering::SeqCst), 2);
    assert_eq!(cb.errored.load(Ordering::SeqCst), 1);
    assert_eq!(cb.packaged.load(Ordering::SeqCst), 2);

    let percent = cb.percent.lock().unwrap();
    assert_eq!(percent.first(), Some(&10));
    assert_eq!(percent.last(), Some(&100));
    assert!(percent.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn generate_to_file_writes_archive() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1")]);
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), fresh_ledger());
    let target = dir.path().join("out").join("certificates.zip");

    let out = generate_to_file(
        &GenerationRequest::new(1, &sheet),
        &target,
        &svc,
        &config_with(Arc::new(RecordingRenderer::default())),
    )
    .await
    .unwrap();

    let on_disk = std::fs::read(&target).unwrap();
    assert_eq!(on_disk, out.archive);
    assert!(!target.with_extension("zip.tmp").exists());
    assert_eq!(entry_names(&on_disk), vec!["Alice_S1.pdf"]);
}

#[test]
fn inspect_reports_without_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(
        &sheet,
        &[("Ms", "Alice", "S1"), ("Ms", "Alice K", "S1"), ("Mr", "Bob", "S2")],
    );

    let report = tokio_test::block_on(inspect(&sheet, &GenerationConfig::default())).unwrap();
    assert_eq!(report.sheet_name, "Candidate Data");
    assert_eq!(report.rows, 3);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.candidates.len(), 2);
    assert_eq!(report.candidates[0].document_file_name, "S1_Alice_K.pdf");
}

#[tokio::test]
async fn workdir_is_removed_after_success() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1"), ("Mr", "Bob", "S2")]);
    let archive = dir.path().join("photos.zip");
    write_photo_archive(&archive, &["S1.png", "S2.png"]);

    let svc = services(template(2, Tier::PhotoOnly, write_layout(dir.path())), fresh_ledger());
    let renderer = Arc::new(RecordingRenderer::default());
    let request = GenerationRequest::new(2, &sheet).with_uploads(Uploads {
        archive: Some(archive),
        ..Default::default()
    });

    let out = generate(&request, &svc, &config_with(renderer.clone()))
        .await
        .unwrap();
    assert_eq!(out.stats.packaged, 2);

    let jobs = renderer.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 2);
    for job in jobs.iter() {
        let photo = job.images.get("imgParam3").unwrap();
        assert!(!photo.exists(), "extracted photo left behind: {}", photo.display());
        assert!(!job.output_path.exists());
        assert!(!workdir_of(job).exists());
    }
}

#[tokio::test]
async fn workdir_is_removed_when_every_render_fails() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1")]);
    let archive = dir.path().join("photos.zip");
    write_photo_archive(&archive, &["S1.png"]);

    let svc = services(template(2, Tier::PhotoOnly, write_layout(dir.path())), fresh_ledger());
    let renderer = Arc::new(RecordingRenderer {
        fail_for: Some("*"),
        ..Default::default()
    });
    let request = GenerationRequest::new(2, &sheet).with_uploads(Uploads {
        archive: Some(archive),
        ..Default::default()
    });

    let err = generate(&request, &svc, &config_with(renderer.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, CertBatchError::EmptyOutput { .. }), "got: {err}");

    let jobs = renderer.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(!jobs[0].images.get("imgParam3").unwrap().exists());
    assert!(!workdir_of(&jobs[0]).exists());
}

#[tokio::test]
async fn compile_failure_renders_and_records_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1")]);
    let ledger = fresh_ledger();
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), ledger.clone());
    let renderer = Arc::new(RecordingRenderer {
        reject_compile: true,
        ..Default::default()
    });

    let err = generate(&GenerationRequest::new(1, &sheet), &svc, &config_with(renderer.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, CertBatchError::TemplateCompile { .. }), "got: {err}");
    assert_eq!(renderer.compiles.load(Ordering::SeqCst), 1);
    assert!(renderer.jobs.lock().unwrap().is_empty());
    assert!(ledger.repository().list().unwrap().is_empty());

    // The built-in PDF renderer rejects a malformed layout the same way.
    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    let svc = services(template(1, Tier::NoImages, broken), ledger.clone());
    let err = generate(&GenerationRequest::new(1, &sheet), &svc, &GenerationConfig::default())
        .await
        .unwrap_err();
    match err {
        CertBatchError::TemplateCompile { template, detail } => {
            assert_eq!(template, "Skill Certificate");
            assert!(detail.contains("invalid layout"), "got: {detail}");
        }
        other => panic!("expected TemplateCompile, got {other:?}"),
    }
    assert!(ledger.repository().list().unwrap().is_empty());
}

#[tokio::test]
async fn ledger_failure_keeps_document() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1"), ("Mr", "Bob", "S2")]);
    let ledger = Arc::new(ReportLedger::new(Arc::new(UnwritableRepository)));
    let svc = services(template(1, Tier::NoImages, write_layout(dir.path())), ledger);

    let out = generate(
        &GenerationRequest::new(1, &sheet),
        &svc,
        &config_with(Arc::new(RecordingRenderer::default())),
    )
    .await
    .unwrap();

    assert_eq!(entry_names(&out.archive), vec!["Alice_S1.pdf", "Bob_S2.pdf"]);
    assert_eq!(out.stats.packaged, 2);
    assert_eq!(out.stats.failed, 0);
    assert_eq!(out.stats.ledger_inserted, 0);

    let failed: Vec<&str> = out
        .failures
        .iter()
        .map(|f| match f {
            CandidateError::LedgerFailed { identifier, .. } => identifier.as_str(),
            other => panic!("expected LedgerFailed, got {other:?}"),
        })
        .collect();
    assert_eq!(failed, vec!["S1", "S2"]);
}

#[tokio::test]
async fn rerun_against_reopened_json_ledger_keeps_one_record_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("batch.xlsx");
    write_candidates(&sheet, &[("Ms", "Alice", "S1"), ("Mr", "Bob", "S2")]);
    let layout = write_layout(dir.path());
    let ledger_path = dir.path().join("ledger.json");
    let config = config_with(Arc::new(RecordingRenderer::default()));
    let request = GenerationRequest::new(1, &sheet);

    let open = || {
        Arc::new(ReportLedger::new(Arc::new(
            JsonFileReportRepository::open(&ledger_path).unwrap(),
        )))
    };

    let first_ledger = open();
    let svc = services(template(1, Tier::NoImages, layout.clone()), first_ledger.clone());
    let first = generate(&request, &svc, &config).await.unwrap();
    assert_eq!(first.stats.ledger_inserted, 2);
    let ids_before: Vec<u64> = first_ledger
        .repository()
        .list()
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    drop(svc);
    drop(first_ledger);

    let svc = services(template(1, Tier::NoImages, layout), open());
    let second = generate(&request, &svc, &config).await.unwrap();
    assert_eq!(second.stats.ledger_inserted, 0);
    assert_eq!(second.stats.ledger_updated, 2);

    let reopened = JsonFileReportRepository::open(&ledger_path).unwrap();
    let records = reopened.list().unwrap();
    let ids_after: Vec<u64> = records.iter().map(|r| r.id).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(ids_after, ids_before);
}
