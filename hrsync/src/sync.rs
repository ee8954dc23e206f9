//! Historic pull: status table in, one posting row per employee out, posted
//! to the history sheet (fresh) and the recognition sheet (update in place).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use chrono::{Local, NaiveDate};
use roxmltree::{Document, Node};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::{AppConfig, SyncSettings};
use crate::directory::{DirectoryLookup, JsonDirectory, LookupError};
use crate::lifecycle::{
    derive_lifecycle, EmployeeStatusRecord, EmploymentEvent, EventDate, ReconstructError,
};
use crate::posting::{JsonFileSink, PostingRow, RowSink, SinkError};

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("status table unreadable at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("status table at {} is malformed: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("status table at {} is not valid XML: {source}", .path.display())]
    Xml {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },
    #[error("status table at {} has an unusable entry: {reason}", .path.display())]
    Table { path: PathBuf, reason: String },
    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),
    #[error("directory lookup failed for employee {employee_id}: {source}")]
    Lookup {
        employee_id: String,
        #[source]
        source: LookupError,
    },
    #[error("directory unavailable: {0}")]
    Directory(#[source] LookupError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("a roster worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub employees: usize,
    pub recognition_updated: usize,
}

/// Reads the employment-status table. Files ending in `.xml` are taken to be
/// the HR system's own export; anything else is the cleaned JSON form.
pub fn load_status_table(path: impl AsRef<Path>) -> Result<Vec<EmployeeStatusRecord>, SyncError> {
    let path = path.as_ref();
    let is_xml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
    if is_xml {
        return load_status_table_xml(path);
    }

    let raw = read_table(path)?;
    let records: Vec<EmployeeStatusRecord> =
        serde_json::from_str(&raw).map_err(|source| SyncError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    info!(table = %path.display(), employees = records.len(), "status table loaded");
    Ok(records)
}

/// Reads the XML export:
/// `<table><employee id><row><field id="date"/><field id="employmentStatus"/></row></employee></table>`.
/// Employees and rows keep document order. A row without a date is treated
/// as the sentinel date; a row without a status gets an empty one.
pub fn load_status_table_xml(
    path: impl AsRef<Path>,
) -> Result<Vec<EmployeeStatusRecord>, SyncError> {
    let path = path.as_ref();
    let raw = read_table(path)?;
    let records = parse_status_xml(path, &raw)?;
    info!(table = %path.display(), employees = records.len(), "status table loaded");
    Ok(records)
}

fn read_table(path: &Path) -> Result<String, SyncError> {
    fs::read_to_string(path).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_status_xml(path: &Path, raw: &str) -> Result<Vec<EmployeeStatusRecord>, SyncError> {
    let unusable = |reason: String| SyncError::Table {
        path: path.to_path_buf(),
        reason,
    };
    let document = Document::parse(raw).map_err(|source| SyncError::Xml {
        path: path.to_path_buf(),
        source,
    })?;
    let table = document.root_element();
    if !table.has_tag_name("table") {
        return Err(unusable(format!(
            "root element is <{}>, expected <table>",
            table.tag_name().name()
        )));
    }

    table
        .children()
        .filter(|node| node.has_tag_name("employee"))
        .map(|employee| -> Result<EmployeeStatusRecord, SyncError> {
            let employee_id = employee
                .attribute("id")
                .ok_or_else(|| unusable("<employee> without an id".to_string()))?;
            let events = employee
                .children()
                .filter(|node| node.has_tag_name("row"))
                .map(|row| -> Result<EmploymentEvent, SyncError> {
                    let date = match field_text(row, "date") {
                        Some(text) => text.parse::<EventDate>().map_err(|err| {
                            unusable(format!("employee {employee_id}: {err}"))
                        })?,
                        None => EventDate::Unknown,
                    };
                    let status = field_text(row, "employmentStatus").unwrap_or_default();
                    Ok(EmploymentEvent::new(date, status))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(EmployeeStatusRecord::new(employee_id, events))
        })
        .collect()
}

fn field_text<'a>(row: Node<'a, '_>, id: &str) -> Option<&'a str> {
    row.children()
        .find(|node| node.has_tag_name("field") && node.attribute("id") == Some(id))
        .and_then(|node| node.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

/// Derived dates plus directory attributes for one employee.
pub fn build_posting_row<L>(record: &EmployeeStatusRecord, lookup: &L) -> Result<PostingRow, SyncError>
where
    L: DirectoryLookup + ?Sized,
{
    let dates = derive_lifecycle(record, lookup)?;
    let sage_id = lookup
        .fetch_sage_id(&record.employee_id)
        .map_err(|source| SyncError::Lookup {
            employee_id: record.employee_id.clone(),
            source,
        })?;
    let entry = lookup.employee(&record.employee_id);
    Ok(PostingRow::assemble(
        &record.employee_id,
        entry.as_ref(),
        &dates,
        sage_id,
    ))
}

/// Builds rows on up to `workers` threads. Output order matches `records`.
pub fn arrange_posting_rows<L>(
    records: &[EmployeeStatusRecord],
    lookup: &L,
    workers: usize,
) -> Result<Vec<PostingRow>, SyncError>
where
    L: DirectoryLookup + ?Sized,
{
    let total = records.len();
    info!(total, workers, "arranging posting rows");
    if total == 0 {
        return Ok(Vec::new());
    }
    let chunk_len = total.div_ceil(workers.max(1));
    let arranged = AtomicUsize::new(0);

    let chunks = thread::scope(|scope| {
        let handles: Vec<_> = records
            .chunks(chunk_len)
            .map(|chunk| {
                let arranged = &arranged;
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|record| {
                            let row = build_posting_row(record, lookup);
                            let done = arranged.fetch_add(1, Ordering::Relaxed) + 1;
                            if done % PROGRESS_EVERY == 0 {
                                info!(arranged = done, total, "posting rows arranged");
                            }
                            row
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().map_err(|_| SyncError::WorkerPanicked)?)
            .collect::<Result<Vec<_>, _>>()
    })?;

    Ok(chunks.into_iter().flatten().collect())
}

pub struct HistoricSync<L, H, R> {
    directory: L,
    history: H,
    recognition: R,
    update_key: String,
    workers: usize,
}

impl<L, H, R> HistoricSync<L, H, R>
where
    L: DirectoryLookup,
    H: RowSink,
    R: RowSink,
{
    pub fn new(settings: &SyncSettings, directory: L, history: H, recognition: R) -> Self {
        Self {
            directory,
            history,
            recognition,
            update_key: settings.recognition_update_key.clone(),
            workers: settings.workers,
        }
    }

    #[instrument(skip_all, fields(employees = records.len()))]
    pub fn run(
        &mut self,
        records: &[EmployeeStatusRecord],
        today: NaiveDate,
    ) -> Result<SyncReport, SyncError> {
        let rows = arrange_posting_rows(records, &self.directory, self.workers)?;

        info!(rows = rows.len(), "posting history sheet");
        self.history.post_fresh(&rows)?;
        self.history.stamp_last_run(today)?;

        info!(key = %self.update_key, "updating recognition sheet");
        let recognition_updated = self.recognition.update_rows(&rows, &self.update_key)?;
        self.recognition.stamp_last_run(today)?;

        info!("sync finished");
        Ok(SyncReport {
            employees: rows.len(),
            recognition_updated,
        })
    }
}

/// Runs the historic pull against the file-backed collaborators named in
/// `config`.
pub fn run_from_config(config: &AppConfig) -> Result<SyncReport, SyncError> {
    let settings = &config.sync;
    let directory = JsonDirectory::load(&settings.directory_report).map_err(SyncError::Directory)?;
    let records = load_status_table(&settings.status_table)?;
    let mut sync = HistoricSync::new(
        settings,
        directory,
        JsonFileSink::new(&settings.history_output),
        JsonFileSink::new(&settings.recognition_output),
    );
    sync.run(&records, Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::{
        arrange_posting_rows, load_status_table, load_status_table_xml, run_from_config,
        HistoricSync, SyncError,
    };
    use crate::config::{AppConfig, SyncSettings};
    use crate::directory::{DirectoryEntry, JsonDirectory};
    use crate::lifecycle::{EmployeeStatusRecord, EmploymentEvent, EventDate, ReconstructError};
    use crate::posting::{PostingRow, RowSink, SinkError};
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        fresh: Vec<PostingRow>,
        updated_with: Option<String>,
        stamped: Option<NaiveDate>,
    }

    impl RowSink for RecordingSink {
        fn post_fresh(&mut self, rows: &[PostingRow]) -> Result<(), SinkError> {
            self.fresh = rows.to_vec();
            Ok(())
        }

        fn update_rows(&mut self, rows: &[PostingRow], key_field: &str) -> Result<usize, SinkError> {
            self.updated_with = Some(key_field.to_string());
            Ok(rows.len())
        }

        fn stamp_last_run(&mut self, date: NaiveDate) -> Result<(), SinkError> {
            self.stamped = Some(date);
            Ok(())
        }
    }

    fn entry(id: &str, first: &str, hire: Option<&str>) -> DirectoryEntry {
        DirectoryEntry {
            id: id.to_string(),
            first_name: Some(first.to_string()),
            last_name: Some("Doe".to_string()),
            original_hire_date: hire.map(str::to_string),
            sage_id: Some(format!("S{id}")),
            ..DirectoryEntry::default()
        }
    }

    fn record(id: &str, rows: &[(&str, &str)]) -> EmployeeStatusRecord {
        EmployeeStatusRecord::new(
            id,
            rows.iter()
                .map(|(date, status)| EmploymentEvent::new(date.parse().unwrap(), *status))
                .collect(),
        )
    }

    fn roster(n: usize) -> Vec<EmployeeStatusRecord> {
        (0..n)
            .map(|i| {
                record(
                    &i.to_string(),
                    &[("2015-01-01", "Full Time"), ("2016-01-01", "Terminated")],
                )
            })
            .collect()
    }

    #[test]
    fn arranges_rows_in_input_order_across_workers() {
        let directory = JsonDirectory::from_entries((0..250).map(|i| entry(&i.to_string(), "E", None)));
        let records = roster(250);
        for workers in [1, 3, 16] {
            let rows = arrange_posting_rows(&records, &directory, workers).unwrap();
            let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
            let expected: Vec<String> = (0..250).map(|i| i.to_string()).collect();
            assert_eq!(ids, expected);
            assert!(rows.iter().all(|row| row.original_termination == "2016-01-01"));
        }
        assert!(arrange_posting_rows(&[], &directory, 4).unwrap().is_empty());
    }

    #[test]
    fn run_posts_history_and_updates_recognition() {
        let directory = JsonDirectory::from_entries([
            entry("1", "Ann", None),
            entry("2", "Bob", Some("2009-05-04")),
        ]);
        let records = vec![
            record("1", &[("2015-09-28", "Original Hire Date"), ("2019-01-24", "Terminated")]),
            record("2", &[("0000-00-00", "Original Hire Date"), ("2012-01-01", "Full Time")]),
        ];
        let settings = SyncSettings {
            recognition_update_key: "Name".to_string(),
            ..SyncSettings::default()
        };
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let mut sync = HistoricSync::new(
            &settings,
            directory,
            RecordingSink::default(),
            RecordingSink::default(),
        );

        let report = sync.run(&records, today).unwrap();
        assert_eq!(report.employees, 2);
        assert_eq!(report.recognition_updated, 2);

        let history = &sync.history.fresh;
        assert_eq!(history[0].name, "Ann Doe");
        assert_eq!(history[0].original_termination, "2019-01-24");
        assert_eq!(history[1].original_hire, "2009-05-04");
        assert_eq!(history[1].sage_id, "S2");
        assert_eq!(sync.history.stamped, Some(today));
        assert_eq!(sync.recognition.updated_with.as_deref(), Some("Name"));
        assert_eq!(sync.recognition.stamped, Some(today));
    }

    #[test]
    fn empty_record_aborts_the_run() {
        let directory = JsonDirectory::default();
        let mut records = roster(3);
        records.push(EmployeeStatusRecord::new("bad", Vec::new()));
        let err = arrange_posting_rows(&records, &directory, 2).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Reconstruct(ReconstructError::InvalidRecord { ref employee_id }) if employee_id == "bad"
        ));
    }

    #[test]
    fn runs_end_to_end_from_config_files() {
        let dir = TempDir::new().unwrap();
        let path = |name: &str| dir.path().join(name);
        fs::write(
            path("status.json"),
            json!([
                {"id": "1", "data": [
                    {"date": "2015-09-28", "employmentStatus": "Original Hire Date"},
                    {"date": "2019-01-24", "employmentStatus": "Terminated"},
                    {"date": "2020-02-03", "employmentStatus": "Rehired"}
                ]}
            ])
            .to_string(),
        )
        .unwrap();
        fs::write(
            path("directory.json"),
            json!({"employees": [{"id": "1", "firstName": "Ann", "lastName": "Lee",
                                  "workEmail": "ann@example.com"}]})
            .to_string(),
        )
        .unwrap();
        fs::write(
            path("recognition.json"),
            json!({"rows": [{"Id": "1", "Shout-outs": "3"}]}).to_string(),
        )
        .unwrap();

        let config = AppConfig {
            sync: SyncSettings {
                status_table: path("status.json"),
                directory_report: path("directory.json"),
                history_output: path("history.json"),
                recognition_output: path("recognition.json"),
                ..SyncSettings::default()
            },
            ..AppConfig::default()
        };
        let report = run_from_config(&config).unwrap();
        assert_eq!(report.employees, 1);
        assert_eq!(report.recognition_updated, 1);

        let history: Value =
            serde_json::from_str(&fs::read_to_string(path("history.json")).unwrap()).unwrap();
        assert_eq!(history["rows"][0]["HRIS Rehire"], "2020-02-03");
        assert_eq!(history["rows"][0]["Work Email"], "ann@example.com");
        assert!(history["summary"]["Last API Automation"].is_string());

        let recognition: Value =
            serde_json::from_str(&fs::read_to_string(path("recognition.json")).unwrap()).unwrap();
        assert_eq!(recognition["rows"][0]["Shout-outs"], "3");
        assert_eq!(recognition["rows"][0]["Name"], "Ann Lee");
    }

    const STATUS_XML: &str = r#"<?xml version="1.0"?>
<table id="employmentStatus">
  <employee id="1" lastChanged="2020-02-03T17:02:11+00:00">
    <row>
      <field id="date">2015-09-28</field>
      <field id="employmentStatus">Original Hire Date</field>
    </row>
    <row>
      <field id="employmentStatus">Terminated</field>
      <field id="date">2019-01-24</field>
    </row>
    <row>
      <field id="date">2020-02-03</field>
    </row>
  </employee>
  <employee id="2" lastChanged="2012-01-01T00:00:00+00:00">
    <row>
      <field id="employmentStatus">Original Hire Date</field>
    </row>
  </employee>
</table>
"#;

    #[test]
    fn reads_the_hr_xml_export_in_document_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.xml");
        fs::write(&path, STATUS_XML).unwrap();

        let records = load_status_table_xml(&path).unwrap();
        assert_eq!(records, load_status_table(&path).unwrap());
        assert_eq!(
            records,
            vec![
                record(
                    "1",
                    &[
                        ("2015-09-28", "Original Hire Date"),
                        ("2019-01-24", "Terminated"),
                        ("2020-02-03", ""),
                    ],
                ),
                record("2", &[("0000-00-00", "Original Hire Date")]),
            ]
        );
        assert_eq!(records[1].events[0].date, EventDate::Unknown);
    }

    #[test]
    fn runs_from_an_xml_status_table() {
        let dir = TempDir::new().unwrap();
        let path = |name: &str| dir.path().join(name);
        fs::write(path("status.XML"), STATUS_XML).unwrap();
        fs::write(
            path("directory.json"),
            json!({"employees": [{"id": "2", "firstName": "Bob", "lastName": "Ray",
                                  "originalHireDate": "2009-05-04"}]})
            .to_string(),
        )
        .unwrap();

        let config = AppConfig {
            sync: SyncSettings {
                status_table: path("status.XML"),
                directory_report: path("directory.json"),
                history_output: path("history.json"),
                recognition_output: path("recognition.json"),
                ..SyncSettings::default()
            },
            ..AppConfig::default()
        };
        let report = run_from_config(&config).unwrap();
        assert_eq!(report.employees, 2);
        assert_eq!(report.recognition_updated, 0);

        let history: Value =
            serde_json::from_str(&fs::read_to_string(path("history.json")).unwrap()).unwrap();
        assert_eq!(history["rows"][0]["HRIS Original Termination"], "2019-01-24");
        assert_eq!(history["rows"][0]["HRIS Rehire"], "2020-02-03");
        assert_eq!(history["rows"][1]["Name"], "Bob Ray");
        assert_eq!(history["rows"][1]["HRIS Original Hire"], "2009-05-04");
    }

    #[test]
    fn rejects_unusable_xml_exports() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.xml");
        for (contents, bad_xml) in [
            ("<table><employee id=\"1\">", true),
            ("<employees/>", false),
            ("<table><employee><row/></employee></table>", false),
            (
                "<table><employee id=\"1\"><row><field id=\"date\">01/02/2020</field></row></employee></table>",
                false,
            ),
        ] {
            fs::write(&path, contents).unwrap();
            let err = load_status_table(&path).unwrap_err();
            if bad_xml {
                assert!(matches!(err, SyncError::Xml { .. }), "{contents}");
            } else {
                assert!(matches!(err, SyncError::Table { .. }), "{contents}");
            }
        }
    }

    #[test]
    fn missing_directory_report_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            sync: SyncSettings {
                directory_report: dir.path().join("absent.json"),
                ..SyncSettings::default()
            },
            ..AppConfig::default()
        };
        assert!(matches!(
            run_from_config(&config),
            Err(SyncError::Directory(_))
        ));
    }
}
