// sumrec - usersetting/summary reconciliation, two-step workflow
//
// `prepare` cleans the usersetting, enriches the summary's first sheet and
// parks the job; `finalize` applies edited remarks and writes the workbook.

mod exit_codes;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Duration;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use sumrec_cli::pipeline::{self, Stores};
use sumrec_cli::{
    DownloadArtifact, FileStore, FinalOutput, Job, KvStore, Ledger, MemoryStore, PipelineError, PrepareRequest,
    Preview,
};
use sumrec_config::Settings;
use sumrec_core::FileRole;
use sumrec_io::{read_table, HeaderRow, ReadMode, Upload};
use sumrec_recon::{FormInput, RemarkOverrides};

use exit_codes::{pipeline_exit_code, EXIT_ERROR, EXIT_SESSION_EXPIRED, EXIT_SUCCESS, EXIT_USAGE};

const PREVIEW_FILENAME: &str = "preview.csv";

#[derive(Parser)]
#[command(name = "sumrec")]
#[command(about = "Reconcile a usersetting roster into a multi-sheet summary workbook")]
#[command(version, long_version = long_version())]
struct Cli {
    /// Settings file (default: <config dir>/sumrec/settings.toml)
    #[arg(long, global = true, env = "SUMREC_CONFIG")]
    config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Usersetting export (.csv / .xlsx / .xls), header on row 7
    #[arg(long, short = 'u')]
    usersetting: PathBuf,

    /// Summary report; every sheet is kept, the first is enriched
    #[arg(long, short = 's')]
    summary: PathBuf,

    /// Saved MTM export (required for ALGO 8 on a 1DTE expiry)
    #[arg(long)]
    saved_mtm: Option<PathBuf>,

    #[arg(long)]
    algo: String,

    #[arg(long)]
    operator: String,

    /// One of: NIFTY 1DTE, NIFTY 0DTE, SENSEX 1DTE, SENSEX 0DTE, BANKNIFTY 1DTE, BANKNIFTY 0DTE
    #[arg(long)]
    expiry: String,

    /// Remark seeded into every row
    #[arg(long)]
    remark: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Step 1: clean the usersetting, enrich the summary, write a preview
    #[command(after_help = "\
Examples:
  sumrec prepare -u 'VS11 users.csv' -s summary.xlsx --algo 3 --operator Ravi --expiry 'NIFTY 0DTE'
  sumrec prepare -u users.xlsx -s summary.xlsx --saved-mtm mtm.csv --algo 8 --operator Ravi --expiry 'SENSEX 1DTE' --json")]
    Prepare {
        #[command(flatten)]
        input: InputArgs,

        /// Where Usersetting.xlsx and preview.csv are written
        #[arg(long, short = 'o', default_value = ".")]
        out_dir: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Step 2: apply edited remarks to a prepared job and write the final workbook
    #[command(after_help = "\
Examples:
  sumrec finalize --job JOB_3f2a... --remarks preview.csv
  sumrec finalize --job JOB_3f2a... --json")]
    Finalize {
        /// Job handle printed by `prepare`
        #[arg(long)]
        job: String,

        /// Edited preview (or any sheet with ROW and REMARK columns)
        #[arg(long)]
        remarks: Option<PathBuf>,

        #[arg(long, short = 'o', default_value = ".")]
        out_dir: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Both steps in one go, remarks optionally from a file
    Run {
        #[command(flatten)]
        input: InputArgs,

        #[arg(long)]
        remarks: Option<PathBuf>,

        #[arg(long, short = 'o', default_value = ".")]
        out_dir: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Remove expired jobs and downloads from the state directory
    Gc {
        #[arg(long)]
        json: bool,
    },

    /// Show the effective settings
    Config {
        /// Write a default settings file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn long_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GIT_COMMIT_HASH"), ")",
            "\nbuild:   debug",
            "\ntarget:  ", env!("TARGET"),
        )
    } else {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GIT_COMMIT_HASH"), ")",
            "\nbuild:   release",
            "\ntarget:  ", env!("TARGET"),
        )
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings_path = cli.config.clone().unwrap_or_else(Settings::config_path);
    let settings = Settings::load_from(&settings_path);

    let result = match cli.command {
        Commands::Prepare { input, out_dir, json } => cmd_prepare(&settings, input, out_dir, json),
        Commands::Finalize { job, remarks, out_dir, json } => cmd_finalize(&settings, job, remarks, out_dir, json),
        Commands::Run { input, remarks, out_dir, json } => cmd_run(&settings, input, remarks, out_dir, json),
        Commands::Gc { json } => cmd_gc(&settings, json),
        Commands::Config { init } => cmd_config(&settings, &settings_path, init),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<PipelineError> for CliError {
    fn from(err: PipelineError) -> Self {
        let code = pipeline_exit_code(&err);
        let hint = match code {
            EXIT_SESSION_EXPIRED => Some("run `sumrec prepare` again".to_string()),
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }
}

// ============================================================================
// Shared plumbing
// ============================================================================

struct FileStores {
    jobs: FileStore<Job>,
    downloads: FileStore<DownloadArtifact>,
}

impl FileStores {
    fn open(settings: &Settings) -> Self {
        let dir = settings.state_dir();
        Self {
            jobs: FileStore::new(dir.join("jobs"), ttl(settings.store.job_ttl_secs)),
            downloads: FileStore::new(dir.join("downloads"), ttl(settings.store.download_ttl_secs)),
        }
    }

    fn stores(&self) -> Stores<'_> {
        Stores { jobs: &self.jobs, downloads: &self.downloads }
    }
}

fn ttl(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}

fn upload(role: FileRole, path: &Path) -> Result<Upload, CliError> {
    if !path.is_file() {
        return Err(CliError::args(format!("{role} file not found: {}", path.display())));
    }
    Upload::from_path(role, path).map_err(|e| PipelineError::from(e).into())
}

fn prepare_request(input: InputArgs) -> Result<PrepareRequest, CliError> {
    Ok(PrepareRequest {
        roster: upload(FileRole::Roster, &input.usersetting)?,
        summary: upload(FileRole::Summary, &input.summary)?,
        overlay: input.saved_mtm.as_deref().map(|p| upload(FileRole::MtmOverlay, p)).transpose()?,
        form: FormInput {
            algo: input.algo,
            operator: input.operator,
            expiry: input.expiry,
            remark: input.remark,
        },
    })
}

fn load_remarks(path: Option<&Path>) -> Result<RemarkOverrides, CliError> {
    let Some(path) = path else {
        return Ok(RemarkOverrides::new());
    };
    let remarks = upload(FileRole::Remarks, path)?;
    let table = read_table(&remarks, HeaderRow::Fixed(0), ReadMode::RawText).map_err(PipelineError::from)?;
    Ok(pipeline::remarks_from_table(&table)?)
}

fn open_ledger(settings: &Settings) -> Result<Option<Ledger>, CliError> {
    settings
        .ledger
        .path
        .as_ref()
        .map(Ledger::open)
        .transpose()
        .map_err(CliError::from)
}

fn write_artifact(out_dir: &Path, artifact: &DownloadArtifact) -> Result<PathBuf, CliError> {
    fs::create_dir_all(out_dir).map_err(|e| CliError::io(format!("{}: {e}", out_dir.display())))?;
    let path = out_dir.join(&artifact.filename);
    fs::write(&path, &artifact.bytes).map_err(|e| CliError::io(format!("{}: {e}", path.display())))?;
    Ok(path)
}

fn write_preview(out_dir: &Path, preview: &Preview) -> Result<PathBuf, CliError> {
    fs::create_dir_all(out_dir).map_err(|e| CliError::io(format!("{}: {e}", out_dir.display())))?;
    let path = out_dir.join(PREVIEW_FILENAME);
    let file = fs::File::create(&path).map_err(|e| CliError::io(format!("{}: {e}", path.display())))?;
    preview
        .write_csv(file)
        .map_err(|e| CliError::io(format!("{}: {e}", path.display())))?;
    Ok(path)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| CliError::io(e.to_string()))?;
    println!("{json}");
    Ok(())
}

// ============================================================================
// prepare
// ============================================================================

#[derive(Serialize)]
struct PrepareReport<'a> {
    job: &'a str,
    server: &'a str,
    algo: &'a str,
    operator: &'a str,
    expiry: String,
    first_sheet: &'a str,
    columns: &'a [String],
    total_rows: usize,
    preview_rows: usize,
    matched: usize,
    overlaid: usize,
    slippage: usize,
    usersetting: PathBuf,
    preview: PathBuf,
}

fn report_preview(preview: &Preview, usersetting: PathBuf, preview_path: PathBuf) -> PrepareReport<'_> {
    PrepareReport {
        job: preview.job.as_str(),
        server: &preview.constants.server,
        algo: &preview.constants.algo,
        operator: &preview.constants.operator,
        expiry: preview.constants.expiry.to_string(),
        first_sheet: &preview.first_sheet,
        columns: &preview.columns,
        total_rows: preview.total_rows,
        preview_rows: preview.rows.len(),
        matched: preview.summary.matched,
        overlaid: preview.summary.overlaid,
        slippage: preview.summary.slippage,
        usersetting,
        preview: preview_path,
    }
}

/// Run step 1 and write its outputs. The usersetting download is consumed.
fn run_prepare(
    settings: &Settings,
    input: InputArgs,
    stores: Stores<'_>,
    out_dir: &Path,
) -> Result<(Preview, PathBuf, PathBuf), CliError> {
    let request = prepare_request(input)?;
    let preview = pipeline::prepare(&request, stores, settings)?;

    let roster = pipeline::download(preview.roster_download.as_str(), stores.downloads)?;
    let roster_path = write_artifact(out_dir, &roster)?;
    let preview_path = write_preview(out_dir, &preview)?;
    Ok((preview, roster_path, preview_path))
}

fn cmd_prepare(settings: &Settings, input: InputArgs, out_dir: PathBuf, json: bool) -> Result<(), CliError> {
    let stores = FileStores::open(settings);
    let (preview, roster_path, preview_path) = run_prepare(settings, input, stores.stores(), &out_dir)?;

    if json {
        return print_json(&report_preview(&preview, roster_path, preview_path));
    }

    println!("job:         {}", preview.job);
    println!("server:      {}", preview.constants.server);
    println!(
        "rows:        {} ({} matched, {} slippage, {} saved MTM)",
        preview.total_rows, preview.summary.matched, preview.summary.slippage, preview.summary.overlaid
    );
    println!("usersetting: {}", roster_path.display());
    println!("preview:     {}", preview_path.display());
    if preview.rows.len() < preview.total_rows {
        println!("note: preview shows the first {} rows", preview.rows.len());
    }
    println!();
    println!("Edit the REMARK column, then:");
    println!("  sumrec finalize --job {} --remarks {}", preview.job, preview_path.display());
    Ok(())
}

// ============================================================================
// finalize
// ============================================================================

#[derive(Serialize)]
struct FinalizeReport<'a> {
    output: PathBuf,
    sheets: &'a [String],
    overrides_applied: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    ledger_rows: Option<usize>,
}

fn run_finalize(
    settings: &Settings,
    job: &str,
    remarks: Option<&Path>,
    stores: Stores<'_>,
    out_dir: &Path,
) -> Result<(FinalOutput, PathBuf), CliError> {
    let overrides = load_remarks(remarks)?;
    let ledger = open_ledger(settings)?;
    let output = pipeline::finalize(job, &overrides, stores, ledger.as_ref())?;

    let artifact = pipeline::download(output.summary_download.as_str(), stores.downloads)?;
    let path = write_artifact(out_dir, &artifact)?;
    Ok((output, path))
}

fn print_final(output: &FinalOutput, path: PathBuf, json: bool) -> Result<(), CliError> {
    if json {
        return print_json(&FinalizeReport {
            output: path,
            sheets: &output.sheets,
            overrides_applied: output.overrides_applied,
            ledger_rows: output.ledger_rows,
        });
    }
    println!("output:  {}", path.display());
    println!("sheets:  {}", output.sheets.join(", "));
    println!("remarks: {}", output.overrides_applied);
    if let Some(rows) = output.ledger_rows {
        println!("ledger:  +{rows} rows");
    }
    Ok(())
}

fn cmd_finalize(
    settings: &Settings,
    job: String,
    remarks: Option<PathBuf>,
    out_dir: PathBuf,
    json: bool,
) -> Result<(), CliError> {
    let stores = FileStores::open(settings);
    let (output, path) = run_finalize(settings, &job, remarks.as_deref(), stores.stores(), &out_dir)?;
    print_final(&output, path, json)
}

// ============================================================================
// run
// ============================================================================

fn cmd_run(
    settings: &Settings,
    input: InputArgs,
    remarks: Option<PathBuf>,
    out_dir: PathBuf,
    json: bool,
) -> Result<(), CliError> {
    let jobs: MemoryStore<Job> = MemoryStore::new(ttl(settings.store.job_ttl_secs));
    let downloads: MemoryStore<DownloadArtifact> = MemoryStore::new(ttl(settings.store.download_ttl_secs));
    let stores = Stores { jobs: &jobs, downloads: &downloads };

    let (preview, _, _) = run_prepare(settings, input, stores, &out_dir)?;
    let (output, path) = run_finalize(settings, preview.job.as_str(), remarks.as_deref(), stores, &out_dir)?;
    print_final(&output, path, json)
}

// ============================================================================
// gc
// ============================================================================

#[derive(Serialize)]
struct GcReport {
    jobs: usize,
    downloads: usize,
}

fn cmd_gc(settings: &Settings, json: bool) -> Result<(), CliError> {
    let stores = FileStores::open(settings);
    let report = GcReport {
        jobs: stores.jobs.reap().map_err(PipelineError::from)?,
        downloads: stores.downloads.reap().map_err(PipelineError::from)?,
    };
    if json {
        return print_json(&report);
    }
    println!("removed {} expired job(s), {} expired download(s)", report.jobs, report.downloads);
    Ok(())
}

// ============================================================================
// config
// ============================================================================

fn cmd_config(settings: &Settings, path: &Path, init: bool) -> Result<(), CliError> {
    if init {
        if path.exists() {
            return Err(CliError::args(format!("{} already exists", path.display()))
                .with_hint("edit it directly or remove it first"));
        }
        Settings::default()
            .save_to(path)
            .map_err(|e| CliError::io(format!("{}: {e}", path.display())))?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    println!("# {}", path.display());
    println!("# state dir: {}", settings.state_dir().display());
    print!("{}", settings.to_toml().map_err(CliError::io)?);
    Ok(())
}
