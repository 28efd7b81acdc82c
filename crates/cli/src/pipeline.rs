//! The two-step run: `prepare` builds the preview and parks the job,
//! `finalize` applies edited remarks and produces the workbook.
//!
//! State lives only in the injected stores. Nothing is stored until every
//! step of a call has succeeded.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use sumrec_config::Settings;
use sumrec_core::{normalize, CellValue, FileRole, Table};
use sumrec_io::header::DEFAULT_SCAN_ROWS;
use sumrec_io::{compose, read_sheets, read_table, write_table, HeaderRow, IoError, ReadMode, Upload};
use sumrec_recon::columns::REMARK;
use sumrec_recon::constants::derive_server;
use sumrec_recon::enrich::finalize_remarks;
use sumrec_recon::{
    build_lookup, clean_roster, enrich, Constants, EnrichRequest, EnrichSummary, FormChoices, FormInput,
    MtmOverlay, ReconError, RemarkOverrides,
};

use crate::error::{PipelineError, DOWNLOAD_EXPIRED, JOB_EXPIRED};
use crate::job::{Job, JobState};
use crate::ledger::Ledger;
use crate::store::{Handle, KvStore, Slot, JOB_PREFIX, ROSTER_PREFIX, SUMMARY_PREFIX};

pub const ROSTER_SHEET: &str = "Usersetting";
pub const ROSTER_FILENAME: &str = "Usersetting.xlsx";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Form field prefix carrying a row's edited remark (`remark_<row>`).
pub const REMARK_FIELD_PREFIX: &str = "remark_";

// ============================================================================
// Artifacts and stores
// ============================================================================

/// A produced workbook waiting to be fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadArtifact {
    pub filename: String,
    pub mime: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl DownloadArtifact {
    pub fn xlsx(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { filename: filename.into(), mime: XLSX_MIME.to_string(), bytes }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// The two stores a run needs.
#[derive(Clone, Copy)]
pub struct Stores<'a> {
    pub jobs: &'a dyn KvStore<Job>,
    pub downloads: &'a dyn KvStore<DownloadArtifact>,
}

// ============================================================================
// Step 1: prepare
// ============================================================================

pub struct PrepareRequest {
    pub roster: Upload,
    pub summary: Upload,
    pub overlay: Option<Upload>,
    pub form: FormInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewRow {
    /// 0-based data-row index; the key for a remark override.
    pub index: usize,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preview {
    pub job: Handle,
    pub constants: Constants,
    pub first_sheet: String,
    pub columns: Vec<String>,
    pub rows: Vec<PreviewRow>,
    pub total_rows: usize,
    pub summary: EnrichSummary,
    pub roster_download: Handle,
}

impl Preview {
    /// Write the preview as CSV with a leading `ROW` column holding each row's
    /// index, ready to be edited and fed back as remarks.
    pub fn write_csv<W: std::io::Write>(&self, out: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(std::iter::once("ROW").chain(self.columns.iter().map(String::as_str)))?;
        for row in &self.rows {
            let index = row.index.to_string();
            wtr.write_record(std::iter::once(index.as_str()).chain(row.cells.iter().map(String::as_str)))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

pub fn form_choices(settings: &Settings) -> FormChoices {
    FormChoices {
        algo: settings.form.algo_choices.clone(),
        operator: settings.form.operator_choices.clone(),
    }
}

fn roster_header(settings: &Settings) -> HeaderRow {
    if settings.roster.detect_header {
        HeaderRow::Detect { scan_rows: DEFAULT_SCAN_ROWS }
    } else {
        HeaderRow::Fixed(settings.roster.header_row)
    }
}

/// Step 1: validate, read, clean, enrich. Stores the cleaned usersetting
/// workbook and the job, and returns the preview.
pub fn prepare(req: &PrepareRequest, stores: Stores<'_>, settings: &Settings) -> Result<Preview, PipelineError> {
    let server = derive_server([req.roster.filename(), req.summary.filename()]);
    let constants = Constants::resolve(&req.form, server, &form_choices(settings))?;
    if constants.requires_mtm_overlay() && req.overlay.is_none() {
        return Err(ReconError::MissingInput(FileRole::MtmOverlay).into());
    }
    log::info!(
        "prepare: SERVER={} ALGO={} OPERATOR={} EXPIRY={}",
        constants.server,
        constants.algo,
        constants.operator,
        constants.expiry
    );

    let raw_roster = read_table(&req.roster, roster_header(settings), ReadMode::RawText)?;
    let roster = clean_roster(&raw_roster)?;
    let lookup = build_lookup(&roster);

    let sheets = read_sheets(&req.summary, ReadMode::Typed)?;
    let overlay = match &req.overlay {
        Some(upload) => Some(MtmOverlay::from_table(&read_table(upload, HeaderRow::Fixed(0), ReadMode::Typed)?)?),
        None => None,
    };

    let (first_sheet, enriched) = {
        let (name, first) = sheets
            .first()
            .ok_or_else(|| IoError::malformed(FileRole::Summary, "file contains no sheets"))?;
        let request = EnrichRequest {
            lookup: &lookup,
            constants: &constants,
            overlay: overlay.as_ref(),
            remark_overrides: None,
        };
        (name.to_string(), enrich(first, &request)?)
    };

    let roster_bytes = write_table(ROSTER_SHEET, &roster)?;

    let preview_table = enriched.table.head(settings.preview.row_limit);
    let columns: Vec<String> = preview_table.column_names().map(str::to_string).collect();
    let rows = (0..preview_table.len())
        .map(|index| PreviewRow { index, cells: preview_table.row_display(index) })
        .collect();
    let total_rows = enriched.table.len();

    // Everything succeeded; make the results addressable.
    let roster_download = stores.downloads.put(ROSTER_PREFIX, DownloadArtifact::xlsx(ROSTER_FILENAME, roster_bytes))?;
    let mut job = Job::new(
        constants.clone(),
        roster,
        sheets,
        first_sheet.clone(),
        enriched.table,
        enriched.summary.clone(),
        roster_download.clone(),
    );

    let handle = match park_job(stores.jobs, &mut job) {
        Ok(h) => h,
        Err(e) => {
            let _ = stores.downloads.take(&roster_download);
            return Err(e);
        }
    };

    log::info!("prepare: job {handle}, {total_rows} rows, preview {}", preview_table.len());
    Ok(Preview {
        job: handle,
        constants,
        first_sheet,
        columns,
        rows,
        total_rows,
        summary: enriched.summary,
        roster_download,
    })
}

/// Store a new job and move it to `Previewed`.
fn park_job(jobs: &dyn KvStore<Job>, job: &mut Job) -> Result<Handle, PipelineError> {
    let handle = jobs.put(JOB_PREFIX, job.clone())?;
    job.advance(JobState::Previewed)?;
    if !jobs.replace(&handle, job.clone())? {
        return Err(PipelineError::SessionExpired(JOB_EXPIRED));
    }
    Ok(handle)
}

// ============================================================================
// Step 2: finalize
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalOutput {
    pub summary_download: Handle,
    pub roster_download: Handle,
    pub filename: String,
    pub sheets: Vec<String>,
    pub overrides_applied: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_rows: Option<usize>,
}

/// `Output_<YYYYmmdd_HHMMSS>.xlsx`
pub fn output_filename(at: DateTime<Local>) -> String {
    format!("Output_{}.xlsx", at.format("%Y%m%d_%H%M%S"))
}

/// Step 2: apply edited remarks to the parked job, compose the final
/// workbook, optionally append to the ledger, and store the download.
/// The job is consumed on success.
pub fn finalize(
    job_handle: &str,
    overrides: &RemarkOverrides,
    stores: Stores<'_>,
    ledger: Option<&Ledger>,
) -> Result<FinalOutput, PipelineError> {
    let handle = Handle::parse(job_handle).ok_or(PipelineError::SessionExpired(JOB_EXPIRED))?;
    let mut job = match stores.jobs.get(&handle)? {
        Slot::Live(job) => job,
        Slot::Expired(mut job) => {
            if job.advance(JobState::Expired).is_ok() {
                log::info!("job {handle} expired");
            }
            return Err(PipelineError::SessionExpired(JOB_EXPIRED));
        }
        Slot::Missing => return Err(PipelineError::SessionExpired(JOB_EXPIRED)),
    };
    job.check(JobState::Finalized)?;

    let overrides_applied = finalize_remarks(&mut job.enriched, overrides);
    let bytes = compose(&job.enriched, &job.sheets, &job.first_sheet)?;

    let filename = output_filename(Local::now());
    let summary_download = stores.downloads.put(SUMMARY_PREFIX, DownloadArtifact::xlsx(filename.clone(), bytes))?;

    // Ledger rows cannot be withdrawn; append after the download write and drop
    // that download if the append fails.
    let ledger_rows = match ledger.map(|l| l.append(&job.enriched)).transpose() {
        Ok(rows) => rows,
        Err(e) => {
            if let Err(cleanup) = stores.downloads.take(&summary_download) {
                log::warn!("finalize: could not drop download {summary_download}: {cleanup}");
            }
            return Err(e);
        }
    };

    job.advance(JobState::Finalized)?;
    stores.jobs.take(&handle)?;

    log::info!("finalize: job {handle} -> {summary_download} ({overrides_applied} remarks)");
    Ok(FinalOutput {
        summary_download,
        roster_download: job.roster_download,
        filename,
        sheets: job.sheets.names().map(str::to_string).collect(),
        overrides_applied,
        ledger_rows,
    })
}

/// Fetch a stored workbook. Downloads are removed on retrieval.
pub fn download(handle: &str, downloads: &dyn KvStore<DownloadArtifact>) -> Result<DownloadArtifact, PipelineError> {
    let handle = Handle::parse(handle).ok_or(PipelineError::SessionExpired(DOWNLOAD_EXPIRED))?;
    downloads
        .take(&handle)?
        .live()
        .ok_or(PipelineError::SessionExpired(DOWNLOAD_EXPIRED))
}

// ============================================================================
// Remark input
// ============================================================================

/// Collect `remark_<row>` fields into overrides. Anything after a second `_`
/// is ignored, values are trimmed, and keys that do not parse are skipped.
pub fn parse_remark_fields<I, K, V>(fields: I) -> RemarkOverrides
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut overrides = RemarkOverrides::new();
    for (key, value) in fields {
        let Some(rest) = key.as_ref().strip_prefix(REMARK_FIELD_PREFIX) else {
            continue;
        };
        let index = rest.split('_').next().unwrap_or_default().trim();
        match index.parse::<usize>() {
            Ok(row) => {
                overrides.insert(row, value.as_ref().trim().to_string());
            }
            Err(_) => log::debug!("ignoring remark field '{}'", key.as_ref()),
        }
    }
    overrides
}

/// Read overrides from an edited preview: a `ROW` column plus a `REMARK`
/// column, headers matched loosely. Other columns are ignored.
pub fn remarks_from_table(table: &Table) -> Result<RemarkOverrides, PipelineError> {
    let find = |wanted: &str| {
        let key = normalize(wanted);
        table
            .column_names()
            .find(|name| normalize(name) == key)
            .map(str::to_string)
            .ok_or_else(|| ReconError::MissingColumn { role: FileRole::Remarks, column: wanted.to_string() })
    };
    let row_col = find("ROW")?;
    let remark_col = find(REMARK)?;

    let fields = (0..table.len()).map(|i| {
        let cell = |name: &str| table.get(i, name).map(CellValue::display).unwrap_or_default();
        (format!("{REMARK_FIELD_PREFIX}{}", cell(&row_col)), cell(&remark_col))
    });
    Ok(parse_remark_fields(fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remark_field_keys() {
        let overrides = parse_remark_fields([
            ("remark_3", "  Reviewed "),
            ("remark_0_extra", "a"),
            ("remark_x", "bad"),
            ("remark_-1", "negative"),
            ("other_2", "skip"),
            ("remark_", "empty"),
        ]);
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[&3], "Reviewed");
        assert_eq!(overrides[&0], "a");
    }

    #[test]
    fn remarks_from_edited_preview() {
        let t = Table::from_rows(
            vec!["row".into(), "UserID".into(), "Remark ".into()],
            vec![
                vec![CellValue::Number(0.0), CellValue::text("U1"), CellValue::text("ok")],
                vec![CellValue::Number(2.0), CellValue::text("U3"), CellValue::Empty],
                vec![CellValue::text("n/a"), CellValue::text("U4"), CellValue::text("x")],
            ],
        );
        let overrides = remarks_from_table(&t).unwrap();
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[&0], "ok");
        assert_eq!(overrides[&2], "");
    }

    #[test]
    fn remarks_need_both_columns() {
        let t = Table::from_rows(vec!["ROW".into()], vec![]);
        assert!(matches!(
            remarks_from_table(&t),
            Err(PipelineError::Recon(ReconError::MissingColumn { role: FileRole::Remarks, .. }))
        ));
    }

    #[test]
    fn output_name_format() {
        use chrono::TimeZone;
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(output_filename(at), "Output_20240309_070501.xlsx");
    }

    #[test]
    fn artifact_bytes_survive_json() {
        let a = DownloadArtifact::xlsx("x.xlsx", vec![0, 159, 146, 150]);
        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"AJ+Slg==\""));
        assert_eq!(serde_json::from_str::<DownloadArtifact>(&json).unwrap(), a);
    }

    #[test]
    fn preview_csv_has_row_column() {
        let preview = Preview {
            job: Handle::generate(JOB_PREFIX),
            constants: Constants {
                server: "VS1".into(),
                algo: "3".into(),
                operator: "op".into(),
                expiry: sumrec_recon::Expiry::Nifty0Dte,
                remark_seed: None,
            },
            first_sheet: "Sheet1".into(),
            columns: vec!["UserID".into(), "REMARK".into()],
            rows: vec![PreviewRow { index: 0, cells: vec!["U1".into(), "".into()] }],
            total_rows: 1,
            summary: EnrichSummary::default(),
            roster_download: Handle::generate(ROSTER_PREFIX),
        };
        let mut out = Vec::new();
        preview.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ROW,UserID,REMARK\n0,U1,\n");
    }
}
