//! CLI binary for certbatch.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `GenerationConfig` and `BatchServices` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use certbatch::ledger::query;
use certbatch::{
    generate_to_file, inspect, Actor, BatchServices, GenerationConfig, GenerationProgressCallback,
    GenerationRequest, InMemoryReportRepository, JsonFileReportRepository, JsonTemplateCatalog,
    ProgressCallback, ReportLedger, ReportRepository, StaticActor, Uploads,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per candidate. Candidates may finish
/// out of order when concurrency > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Starts as a spinner; `on_batch_start` sets the length.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading spreadsheet…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} candidates  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0) as f64
            / 1000.0
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Generating {total} certificates…"))
        ));
    }

    fn on_candidate_start(&self, index: usize, _total: usize, identifier: &str) {
        self.start_times
            .lock()
            .unwrap()
            .insert(index, Instant::now());
        self.bar.set_message(identifier.to_string());
    }

    fn on_candidate_complete(&self, index: usize, total: usize, identifier: &str) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>4}/{:<4}  {:<16}  {}",
            green("✓"),
            index,
            total,
            identifier,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_candidate_error(&self, index: usize, total: usize, identifier: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>4}/{:<4}  {:<16}  {}  {}",
            red("✗"),
            index,
            total,
            identifier,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, packaged: usize) {
        let failed = total.saturating_sub(packaged);
        self.bar.finish_and_clear();

        if failed == 0 && self.errors.load(Ordering::SeqCst) == 0 {
            eprintln!(
                "{} {} certificates generated",
                green("✔"),
                bold(&packaged.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} certificates generated  ({} with errors)",
                cyan("⚠"),
                bold(&packaged.to_string()),
                total,
                red(&self.errors.load(Ordering::SeqCst).to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Tier-0 template, output to certificates.zip
  certbatch candidates.xlsx --catalog templates.json --template-id 1

  # Tier-3 template with all uploads and a persistent ledger
  certbatch candidates.xlsx --catalog templates.json --template-id 4 \
      --archive photos.zip --logo logo.png --signature sign.png \
      --ledger reports.json -o batch-42.zip

  # Check a spreadsheet without rendering
  certbatch --inspect-only candidates.xlsx

  # Ledger dashboard figures as JSON
  certbatch --ledger reports.json --ledger-summary --json

TEMPLATE TIERS:
  Tier  Required uploads
  ────  ─────────────────────────────────
  0     none
  1     --archive
  2     --archive, --logo
  3     --archive, --logo, --signature

TEMPLATE CATALOG:
  A JSON array of templates. Relative paths resolve against the catalog:
  [{"id": 1, "name": "Skill", "tier": 0,
    "definition_path": "skill/layout.json", "static_image_dir": "skill/static"}]

SPREADSHEET LAYOUT:
  First sheet, header on row 1, fixed columns: salutation, name, identifier,
  role, guardianType, guardianName, skillCouncil, issuanceDate, level,
  idNumber, sector, grade, startDate, endDate, marks (11 columns), batchId,
  state, district, place.
"#;

/// Generate certificate batches from spreadsheets.
#[derive(Parser, Debug)]
#[command(
    name = "certbatch",
    version,
    about = "Generate one certificate per spreadsheet row and package them into a zip",
    long_about = "Reads candidate rows from a spreadsheet, deduplicates them by identifier, \
binds template and uploaded images according to the template tier, renders one PDF per \
candidate and packages them into a single zip archive. Every generated certificate is \
recorded in an idempotent audit ledger.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Candidate spreadsheet (xlsx, xls, ods).
    spreadsheet: Option<PathBuf>,

    /// Id of the template to render.
    #[arg(short, long, env = "CERTBATCH_TEMPLATE_ID")]
    template_id: Option<u64>,

    /// JSON template catalog.
    #[arg(long, env = "CERTBATCH_CATALOG")]
    catalog: Option<PathBuf>,

    /// Zip archive of candidate photos (tier 1 and above).
    #[arg(long, env = "CERTBATCH_ARCHIVE")]
    archive: Option<PathBuf>,

    /// Logo image (tier 2 and above).
    #[arg(long, env = "CERTBATCH_LOGO")]
    logo: Option<PathBuf>,

    /// Signature image (tier 3).
    #[arg(long, env = "CERTBATCH_SIGNATURE")]
    signature: Option<PathBuf>,

    /// Where to write the packaged archive.
    #[arg(short, long, env = "CERTBATCH_OUTPUT", default_value = "certificates.zip")]
    output: PathBuf,

    /// JSON ledger file. Without it the ledger lives only for this run.
    #[arg(long, env = "CERTBATCH_LEDGER")]
    ledger: Option<PathBuf>,

    /// Acting user id recorded in the ledger.
    #[arg(long, env = "CERTBATCH_ACTOR_ID", default_value_t = 1)]
    actor_id: u64,

    /// Acting user name.
    #[arg(long, env = "CERTBATCH_ACTOR_NAME", default_value = "cli")]
    actor_name: String,

    /// Training partner recorded in the ledger.
    #[arg(long, env = "CERTBATCH_PARTNER")]
    partner: Option<String>,

    /// Static images shared by every template, bound after the template's own.
    #[arg(long, env = "CERTBATCH_BASE_STATIC_DIR")]
    base_static_dir: Option<PathBuf>,

    /// Require the first sheet to carry this name (e.g. "Candidate Data").
    #[arg(long, env = "CERTBATCH_SHEET_NAME")]
    sheet_name: Option<String>,

    /// Number of candidates rendered at once.
    #[arg(short, long, env = "CERTBATCH_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Output structured JSON instead of a human summary.
    #[arg(long, env = "CERTBATCH_JSON")]
    json: bool,

    /// Parse and deduplicate the spreadsheet only.
    #[arg(long)]
    inspect_only: bool,

    /// Print ledger statistics and exit.
    #[arg(long)]
    ledger_summary: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CERTBATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CERTBATCH_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, env = "CERTBATCH_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ledger summary mode ──────────────────────────────────────────────
    if cli.ledger_summary {
        let path = cli
            .ledger
            .as_ref()
            .context("--ledger-summary needs --ledger <FILE>")?;
        let repo = JsonFileReportRepository::open(path)
            .with_context(|| format!("Failed to open ledger {}", path.display()))?;
        let summary = query::summarize(&repo, chrono::Utc::now()).context("Failed to read ledger")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
            );
        } else {
            println!("Ledger:       {}", path.display());
            println!("Records:      {}", summary.total);
            println!("Generated:    {}", summary.generated);
            println!("Failed:       {}", summary.failed);
            println!("This month:   {}", summary.this_month);
            for (month, n) in &summary.monthly {
                println!("  {month}  {n}");
            }
            for (template, n) in &summary.by_template {
                println!("  {}  {n}", dim(template));
            }
        }
        return Ok(());
    }

    let spreadsheet = cli
        .spreadsheet
        .clone()
        .context("A spreadsheet path is required")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None)?;
        let report = inspect(&spreadsheet, &config)
            .await
            .context("Failed to inspect spreadsheet")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else {
            println!("File:         {}", spreadsheet.display());
            println!("Sheet:        {}", report.sheet_name);
            println!("Rows:         {}", report.rows);
            println!("Duplicates:   {}", report.duplicates);
            println!("Candidates:   {}", report.candidates.len());
            for c in &report.candidates {
                println!("  {:<16} {:<32} {}", c.identifier, c.name, dim(&c.document_file_name));
            }
        }
        return Ok(());
    }

    // ── Build services and config ────────────────────────────────────────
    let template_id = cli
        .template_id
        .context("--template-id is required to generate a batch")?;
    let catalog_path = cli
        .catalog
        .as_ref()
        .context("--catalog is required to generate a batch")?;
    let catalog = JsonTemplateCatalog::load(catalog_path).context("Failed to load template catalog")?;

    let repo: Arc<dyn ReportRepository> = match cli.ledger {
        Some(ref path) => Arc::new(
            JsonFileReportRepository::open(path)
                .with_context(|| format!("Failed to open ledger {}", path.display()))?,
        ),
        None => Arc::new(InMemoryReportRepository::new()),
    };

    let mut actor = Actor::new(cli.actor_id, cli.actor_name.clone());
    if let Some(ref partner) = cli.partner {
        actor = actor.with_training_partner(partner.clone());
    }

    let services = BatchServices {
        templates: Arc::new(catalog),
        ledger: Arc::new(ReportLedger::new(repo)),
        actor: Arc::new(StaticActor(actor)),
    };

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn GenerationProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let request = GenerationRequest::new(template_id, spreadsheet).with_uploads(Uploads {
        archive: cli.archive.clone(),
        logo: cli.logo.clone(),
        signature: cli.signature.clone(),
    });

    // ── Run batch ────────────────────────────────────────────────────────
    let output = generate_to_file(&request, &cli.output, &services, &config)
        .await
        .context("Batch generation failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
        return Ok(());
    }

    if !cli.quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {}/{} certificates  {}ms  →  {}",
            if stats.failed == 0 { green("✔") } else { cyan("⚠") },
            stats.packaged,
            stats.unique_candidates,
            stats.total_duration_ms,
            bold(&cli.output.display().to_string()),
        );
        eprintln!(
            "   {} rows, {} duplicates  /  ledger: {} new, {} updated",
            dim(&stats.rows.to_string()),
            dim(&stats.duplicates.to_string()),
            dim(&stats.ledger_inserted.to_string()),
            dim(&stats.ledger_updated.to_string()),
        );
        for f in &output.failures {
            eprintln!("   {} {}", red("✗"), f);
        }
    }

    Ok(())
}

/// Map CLI args to `GenerationConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<GenerationConfig> {
    let mut builder = GenerationConfig::builder().concurrency(cli.concurrency);

    if let Some(ref dir) = cli.base_static_dir {
        builder = builder.base_static_dir(dir.clone());
    }
    if let Some(ref name) = cli.sheet_name {
        builder = builder.required_sheet_name(name.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
