// End-to-end tests for the two-step pipeline through in-memory and file stores.
// Run with: cargo test -p sumrec-cli --test pipeline

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use calamine::{open_workbook_auto_from_rs, Reader};
use chrono::{Duration, Utc};

use sumrec_cli::job::JobState;
use sumrec_cli::pipeline::{download, finalize, parse_remark_fields, prepare, PrepareRequest, Stores};
use sumrec_cli::store::{Clock, JOB_PREFIX};
use sumrec_cli::{DownloadArtifact, FileStore, Handle, Job, KvStore, Ledger, MemoryStore, PipelineError, Slot, StoreError};
use sumrec_config::Settings;
use sumrec_core::{CellValue, FileRole, Table};
use sumrec_io::{write_workbook, IoError, Upload};
use sumrec_recon::columns::DESIRED_ORDER;
use sumrec_recon::{FormInput, ReconError};

const ROSTER_CSV: &str = "\
Usersetting export
Server VS11
,
Generated 2026-10-19
Filter: all
---
Enabled,User Alias,User ID,Max Loss,Telegram ID(s),Broker
TRUE,Alpha,U1,-5000,100000,Zerodha
TRUE,Beta,u2,-5000,100000,Zerodha
FALSE,Gamma,,-1,1,
";

const LONG_SHEET: &str = "Closed positions for the whole trading week";

fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
    Table::from_rows(
        headers.iter().map(|s| s.to_string()).collect(),
        rows.iter()
            .map(|r| r.iter().map(|s| CellValue::infer(s)).collect())
            .collect(),
    )
}

fn summary_xlsx() -> Vec<u8> {
    let positions = table(
        &[
            "SNO", "Enabled", "UserID", "Alias", "LoggedIn", "SqOff Done", "Broker", "Qty Multiplier", "MTM (All)",
            "Available Margin", "Total Orders", "Total Lots", "Extra",
        ],
        &[
            &["1", "TRUE", "U1", "Alpha", "TRUE", "FALSE", "Z", "1", "6000", "10", "3", "2", "a"],
            &["2", "TRUE", "U2", "Beta", "TRUE", "FALSE", "Z", "1", "-15000", "10", "3", "2", "b"],
            &["3", "TRUE", "U9", "Nobody", "TRUE", "FALSE", "Z", "1", "-99999", "10", "3", "2", "c"],
        ],
    );
    let orders = table(&["Order", "Qty"], &[&["o1", "5"], &["o2", "7"]]);
    let closed = table(&["UserID", "PnL"], &[&["U1", "12.5"]]);
    write_workbook([("Positions", &positions), ("Orders", &orders), (LONG_SHEET, &closed)]).unwrap()
}

fn request(algo: &str, expiry: &str, overlay: Option<Upload>) -> PrepareRequest {
    PrepareRequest {
        roster: Upload::new(FileRole::Roster, "VS11_users.csv", ROSTER_CSV.as_bytes().to_vec()).unwrap(),
        summary: Upload::new(FileRole::Summary, "summary.xlsx", summary_xlsx()).unwrap(),
        overlay,
        form: FormInput {
            algo: algo.into(),
            operator: "Ravi".into(),
            expiry: expiry.into(),
            remark: None,
        },
    }
}

struct Memory {
    jobs: MemoryStore<Job>,
    downloads: MemoryStore<DownloadArtifact>,
}

impl Memory {
    fn new() -> Self {
        Self {
            jobs: MemoryStore::new(Duration::hours(1)),
            downloads: MemoryStore::new(Duration::minutes(15)),
        }
    }

    fn stores(&self) -> Stores<'_> {
        Stores { jobs: &self.jobs, downloads: &self.downloads }
    }
}

/// Every sheet of a workbook as rows of display strings.
fn read_back(bytes: &[u8]) -> Vec<(String, Vec<Vec<String>>)> {
    let mut wb = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).unwrap();
    let names = wb.sheet_names().to_vec();
    names
        .into_iter()
        .map(|name| {
            let range = wb.worksheet_range(&name).unwrap();
            let rows = range.rows().map(|r| r.iter().map(|c| c.to_string()).collect()).collect();
            (name, rows)
        })
        .collect()
}

fn column(rows: &[Vec<String>], header: &str) -> Vec<String> {
    let idx = rows[0].iter().position(|h| h == header).unwrap();
    rows[1..].iter().map(|r| r.get(idx).cloned().unwrap_or_default()).collect()
}

// ===========================================================================
// Happy path
// ===========================================================================

#[test]
fn prepare_then_finalize() {
    let mem = Memory::new();
    let settings = Settings::default();

    let preview = prepare(&request("3", "NIFTY 0DTE", None), mem.stores(), &settings).unwrap();
    assert!(preview.job.has_prefix(JOB_PREFIX));
    assert_eq!(preview.constants.server, "VS11");
    assert_eq!(preview.first_sheet, "Positions");
    assert_eq!(preview.total_rows, 3);
    assert_eq!(preview.summary.matched, 2);
    assert_eq!(preview.summary.slippage, 1);

    let mut expected: Vec<String> = DESIRED_ORDER.iter().map(|s| s.to_string()).collect();
    expected.push("Extra".into());
    assert_eq!(preview.columns, expected);
    assert_eq!(mem.jobs.get(&preview.job).unwrap().live().unwrap().state(), JobState::Previewed);

    let overrides = parse_remark_fields([("remark_2", "Reviewed"), ("remark_40", "out of range")]);
    let out = finalize(preview.job.as_str(), &overrides, mem.stores(), None).unwrap();
    assert_eq!(out.overrides_applied, 1);
    assert!(out.filename.starts_with("Output_") && out.filename.ends_with(".xlsx"));
    assert!(mem.jobs.is_empty());

    let workbook = download(out.summary_download.as_str(), &mem.downloads).unwrap();
    let sheets = read_back(&workbook.bytes);
    let names: Vec<&str> = sheets.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["Positions", "Orders", &LONG_SHEET[..31]]);

    let first = &sheets[0].1;
    assert_eq!(column(first, "REMARK"), vec!["", "Slippage", "Reviewed"]);
    assert_eq!(column(first, "ALLOCATION"), vec!["100000", "100000", ""]);
    assert_eq!(column(first, "SERVER"), vec!["VS11"; 3]);
    assert_eq!(sheets[1].1[2], vec!["o2", "7"]);

    let roster = download(preview.roster_download.as_str(), &mem.downloads).unwrap();
    let roster_sheets = read_back(&roster.bytes);
    assert_eq!(roster_sheets[0].0, "Usersetting");
    assert_eq!(roster_sheets[0].1[0], vec!["User Alias", "User ID", "Max Loss", "Telegram"]);
    assert_eq!(roster_sheets[0].1.len(), 4);
}

#[test]
fn saved_mtm_is_required_and_applied() {
    let mem = Memory::new();
    let settings = Settings::default();

    let err = prepare(&request("8", "SENSEX 1DTE", None), mem.stores(), &settings).unwrap_err();
    assert!(matches!(err, PipelineError::Recon(ReconError::MissingInput(FileRole::MtmOverlay))));
    assert!(mem.downloads.is_empty());

    let overlay = Upload::new(FileRole::MtmOverlay, "saved.csv", b"User_ID,Realized PnL\nU1,7777\n".to_vec()).unwrap();
    let preview = prepare(&request("8", "SENSEX 1DTE", Some(overlay)), mem.stores(), &settings).unwrap();
    assert_eq!(preview.summary.overlaid, 1);

    let mtm = preview.columns.iter().position(|c| c == "MTM (All)").unwrap();
    let remark = preview.columns.iter().position(|c| c == "REMARK").unwrap();
    assert_eq!(preview.rows[0].cells[mtm], "7777");
    assert_eq!(preview.rows[0].cells[remark], "MTM=6000");
}

#[test]
fn preview_is_capped_but_export_is_not() {
    let mem = Memory::new();
    let mut settings = Settings::default();
    settings.preview.row_limit = 1;

    let preview = prepare(&request("3", "NIFTY 0DTE", None), mem.stores(), &settings).unwrap();
    assert_eq!(preview.rows.len(), 1);
    assert_eq!(preview.total_rows, 3);

    let out = finalize(preview.job.as_str(), &parse_remark_fields([("remark_2", "late")]), mem.stores(), None).unwrap();
    let workbook = download(out.summary_download.as_str(), &mem.downloads).unwrap();
    assert_eq!(column(&read_back(&workbook.bytes)[0].1, "REMARK")[2], "late");
}

// ===========================================================================
// Failures
// ===========================================================================

#[test]
fn fatal_errors_leave_nothing_addressable() {
    let mem = Memory::new();
    let settings = Settings::default();
    let mut req = request("3", "NIFTY 0DTE", None);
    req.roster = Upload::new(
        FileRole::Roster,
        "users.csv",
        b"1\n2\n3\n4\n5\n6\nEnabled,User Alias,User ID,Max Loss\nTRUE,a,U1,-1\n".to_vec(),
    )
    .unwrap();

    let err = prepare(&req, mem.stores(), &settings).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Recon(ReconError::MissingColumn { role: FileRole::Roster, ref column }) if column == "Telegram"
    ));
    assert!(mem.jobs.is_empty());
    assert!(mem.downloads.is_empty());
}

#[test]
fn bad_form_values_are_rejected() {
    let mem = Memory::new();
    let mut settings = Settings::default();

    let err = prepare(&request("3", "NIFTY 2DTE", None), mem.stores(), &settings).unwrap_err();
    assert!(matches!(err, PipelineError::Recon(ReconError::InvalidConstant { field: "EXPIRY", .. })));

    settings.form.algo_choices = vec!["1".into(), "8".into()];
    let err = prepare(&request("3", "NIFTY 0DTE", None), mem.stores(), &settings).unwrap_err();
    assert!(matches!(err, PipelineError::Recon(ReconError::InvalidConstant { field: "ALGO", .. })));
}

#[test]
fn unsupported_upload_is_rejected_up_front() {
    let err = Upload::new(FileRole::Summary, "summary.ods", vec![1, 2, 3]).unwrap_err();
    assert!(matches!(err, IoError::UnsupportedFileType { role: FileRole::Summary, .. }));
}

#[test]
fn unknown_forged_and_reused_handles_expire() {
    let mem = Memory::new();
    let settings = Settings::default();
    let none = parse_remark_fields(Vec::<(String, String)>::new());

    for bad in ["", "JOB_../../etc/passwd", "JOB_0000"] {
        let err = finalize(bad, &none, mem.stores(), None).unwrap_err();
        assert!(matches!(err, PipelineError::SessionExpired(_)), "{bad:?}");
    }

    let preview = prepare(&request("3", "NIFTY 0DTE", None), mem.stores(), &settings).unwrap();
    let out = finalize(preview.job.as_str(), &none, mem.stores(), None).unwrap();
    assert!(matches!(
        finalize(preview.job.as_str(), &none, mem.stores(), None),
        Err(PipelineError::SessionExpired(_))
    ));

    download(out.summary_download.as_str(), &mem.downloads).unwrap();
    assert!(matches!(
        download(out.summary_download.as_str(), &mem.downloads),
        Err(PipelineError::SessionExpired(_))
    ));
}

#[test]
fn jobs_past_ttl_expire() {
    let offset = Arc::new(AtomicI64::new(0));
    let start = Utc::now();
    let o = offset.clone();
    let clock: Clock = Arc::new(move || start + Duration::seconds(o.load(Ordering::SeqCst)));

    let jobs: MemoryStore<Job> = MemoryStore::with_clock(Duration::seconds(3600), clock);
    let downloads: MemoryStore<DownloadArtifact> = MemoryStore::new(Duration::minutes(15));
    let stores = Stores { jobs: &jobs, downloads: &downloads };

    let preview = prepare(&request("3", "NIFTY 0DTE", None), stores, &Settings::default()).unwrap();
    offset.store(3601, Ordering::SeqCst);

    let err = finalize(preview.job.as_str(), &Default::default(), stores, None).unwrap_err();
    assert!(matches!(err, PipelineError::SessionExpired(_)));
    assert!(jobs.is_empty());
}

#[test]
fn finalize_requires_a_previewed_job() {
    let mem = Memory::new();
    let settings = Settings::default();
    let preview = prepare(&request("3", "NIFTY 0DTE", None), mem.stores(), &settings).unwrap();

    // Park a second copy of the job as freshly created.
    let mut job = mem.jobs.get(&preview.job).unwrap().live().unwrap();
    let created = Job::new(
        job.constants.clone(),
        std::mem::take(&mut job.roster),
        std::mem::take(&mut job.sheets),
        job.first_sheet.clone(),
        std::mem::take(&mut job.enriched),
        job.summary.clone(),
        job.roster_download.clone(),
    );
    let handle = mem.jobs.put(JOB_PREFIX, created).unwrap();

    let err = finalize(handle.as_str(), &Default::default(), mem.stores(), None).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InvalidTransition { from: JobState::Created, to: JobState::Finalized }
    ));
}

// ===========================================================================
// File stores and ledger
// ===========================================================================

#[test]
fn jobs_survive_between_processes_via_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::default();
    let open = || {
        (
            FileStore::<Job>::new(dir.path().join("jobs"), Duration::hours(1)),
            FileStore::<DownloadArtifact>::new(dir.path().join("downloads"), Duration::minutes(15)),
        )
    };

    let job = {
        let (jobs, downloads) = open();
        prepare(&request("3", "NIFTY 0DTE", None), Stores { jobs: &jobs, downloads: &downloads }, &settings)
            .unwrap()
            .job
    };

    let (jobs, downloads) = open();
    let stores = Stores { jobs: &jobs, downloads: &downloads };
    let out = finalize(job.as_str(), &parse_remark_fields([("remark_0", "ok")]), stores, None).unwrap();
    let workbook = download(out.summary_download.as_str(), &downloads).unwrap();
    assert_eq!(column(&read_back(&workbook.bytes)[0].1, "REMARK")[0], "ok");
    assert_eq!(jobs.reap().unwrap(), 0);
}

#[test]
fn finalize_appends_to_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(dir.path().join("ledger.xlsx")).unwrap();
    let mem = Memory::new();
    let settings = Settings::default();

    for _ in 0..2 {
        let preview = prepare(&request("3", "NIFTY 0DTE", None), mem.stores(), &settings).unwrap();
        let out = finalize(preview.job.as_str(), &Default::default(), mem.stores(), Some(&ledger)).unwrap();
        assert_eq!(out.ledger_rows, Some(3));
    }

    let t = ledger.read().unwrap();
    assert_eq!(t.len(), 6);
    assert!(t.has_column("REMARK"));
    assert!(t.has_column("Extra"));
}

#[test]
fn concurrent_ledger_appends_keep_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(Ledger::open(dir.path().join("shared.xlsx")).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || {
                let id = format!("U{i}");
                let rows = table(&["UserID", "Batch"], &[&[id.as_str(), "x"], &[id.as_str(), "y"]]);
                ledger.append(&rows).unwrap()
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), 2);
    }

    let t = ledger.read().unwrap();
    assert_eq!(t.len(), 16);
    for i in 0..8 {
        let id = CellValue::text(format!("U{i}"));
        let count = (0..t.len()).filter(|&r| t.get(r, "UserID") == Some(&id)).count();
        assert_eq!(count, 2, "U{i}");
    }
}

/// Download store whose writes can be switched to fail.
struct FullDisk {
    inner: MemoryStore<DownloadArtifact>,
    full: AtomicBool,
}

impl KvStore<DownloadArtifact> for FullDisk {
    fn put(&self, prefix: &str, value: DownloadArtifact) -> Result<Handle, StoreError> {
        if self.full.load(Ordering::SeqCst) {
            return Err(StoreError::Io("No space left on device".into()));
        }
        self.inner.put(prefix, value)
    }
    fn get(&self, handle: &Handle) -> Result<Slot<DownloadArtifact>, StoreError> {
        self.inner.get(handle)
    }
    fn replace(&self, handle: &Handle, value: DownloadArtifact) -> Result<bool, StoreError> {
        self.inner.replace(handle, value)
    }
    fn take(&self, handle: &Handle) -> Result<Slot<DownloadArtifact>, StoreError> {
        self.inner.take(handle)
    }
    fn reap(&self) -> Result<usize, StoreError> {
        self.inner.reap()
    }
}

#[test]
fn failed_download_write_leaves_ledger_untouched_and_job_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(dir.path().join("ledger.xlsx")).unwrap();
    let jobs = MemoryStore::<Job>::new(Duration::hours(1));
    let downloads = FullDisk { inner: MemoryStore::new(Duration::minutes(15)), full: AtomicBool::new(false) };
    let stores = || Stores { jobs: &jobs, downloads: &downloads };

    let preview = prepare(&request("3", "NIFTY 0DTE", None), stores(), &Settings::default()).unwrap();

    downloads.full.store(true, Ordering::SeqCst);
    let err = finalize(preview.job.as_str(), &Default::default(), stores(), Some(&ledger)).unwrap_err();
    assert!(matches!(err, PipelineError::Store(StoreError::Io(_))));
    assert_eq!(ledger.read().unwrap().len(), 0);

    downloads.full.store(false, Ordering::SeqCst);
    let out = finalize(preview.job.as_str(), &Default::default(), stores(), Some(&ledger)).unwrap();
    assert_eq!(out.ledger_rows, Some(3));
    assert_eq!(ledger.read().unwrap().len(), 3);
}

#[test]
fn failed_ledger_append_drops_summary_download() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("master.xlsx");
    std::fs::create_dir(&path).unwrap();
    let ledger = Ledger::open(path.clone()).unwrap();
    let mem = Memory::new();

    let preview = prepare(&request("3", "NIFTY 0DTE", None), mem.stores(), &Settings::default()).unwrap();
    assert_eq!(mem.downloads.len(), 1);

    assert!(finalize(preview.job.as_str(), &Default::default(), mem.stores(), Some(&ledger)).is_err());
    assert_eq!(mem.downloads.len(), 1);
    assert!(mem.jobs.get(&preview.job).unwrap().live().is_some());
}
