//! SQLite exporter: flattens the aggregate document into `events` and
//! `summary` tables for offline analysis.
//!
//! Every run clears and rewrites both tables inside one transaction, so a
//! reader sees either the previous export or the new one in full.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Instant;

use rusqlite::{Connection, OpenFlags, Transaction, params};
use serde_json::Value;

use crate::core::errors::{Result, TelemetryError};
use crate::logger::activity::{ActivityEvent, ActivityLog};
use crate::model::document::TelemetryDocument;
use crate::model::event::Event;
use crate::store::document::DocumentStore;

/// Row counts written by one export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ExportReport {
    pub events_written: usize,
    pub summary_rows: usize,
}

/// Owns the export database connection.
pub struct Exporter {
    conn: Connection,
    path: PathBuf,
}

impl Exporter {
    /// Open (or create) the export database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| TelemetryError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace both tables with the projection of `document`.
    pub fn export(&mut self, document: &TelemetryDocument) -> Result<ExportReport> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM events", [])?;
        tx.execute("DELETE FROM summary", [])?;

        let events_written = write_events(&tx, document)?;
        let summary = summary_rows(document);
        write_summary(&tx, &summary)?;
        tx.commit()?;

        Ok(ExportReport {
            events_written,
            summary_rows: summary.len(),
        })
    }

    /// Read back the `events` table in log order.
    pub fn event_rows(&self) -> Result<Vec<EventRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT row_index, type, timestamp, dataset, succeeded, metadata_received,
                    resume_attempts, note, feedback_level, feedback_rating, feedback_text,
                    career_stage, experience_years, research_area, use_case, institution,
                    github_link, original_rating, log_analysis, os, python, cli_version,
                    session_id
             FROM events ORDER BY row_index ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EventRow {
                    row_index: row.get(0)?,
                    event_type: row.get(1)?,
                    timestamp: row.get(2)?,
                    dataset: row.get(3)?,
                    succeeded: row.get(4)?,
                    metadata_received: row.get(5)?,
                    resume_attempts: row.get(6)?,
                    note: row.get(7)?,
                    feedback_level: row.get(8)?,
                    feedback_rating: row.get(9)?,
                    feedback_text: row.get(10)?,
                    career_stage: row.get(11)?,
                    experience_years: row.get(12)?,
                    research_area: row.get(13)?,
                    use_case: row.get(14)?,
                    institution: row.get(15)?,
                    github_link: row.get(16)?,
                    original_rating: row.get(17)?,
                    log_analysis: row.get(18)?,
                    os: row.get(19)?,
                    python: row.get(20)?,
                    cli_version: row.get(21)?,
                    session_id: row.get(22)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Read back the `summary` table in insertion order.
    pub fn summary_table(&self) -> Result<Vec<SummaryRow>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT section, metric, value FROM summary ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SummaryRow {
                    section: row.get(0)?,
                    metric: row.get(1)?,
                    value: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Load the document lock-free from `store`, export it, and log the run.
pub fn run_export(
    store: &DocumentStore,
    database: &Path,
    activity: &ActivityLog,
) -> Result<ExportReport> {
    let started = Instant::now();
    let document = store.load();
    let outcome = Exporter::open(database).and_then(|mut exporter| exporter.export(&document));
    match &outcome {
        Ok(report) => activity.record(ActivityEvent::ExportCompleted {
            events_written: report.events_written,
            summary_rows: report.summary_rows,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }),
        Err(e) => activity.record(ActivityEvent::from_error(e)),
    }
    outcome
}

// ──────────────────── row types ────────────────────

/// Row for the `events` table; `None` where a column does not apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRow {
    pub row_index: i64,
    pub event_type: Option<String>,
    pub timestamp: Option<String>,
    pub dataset: Option<String>,
    pub succeeded: Option<bool>,
    pub metadata_received: Option<bool>,
    pub resume_attempts: Option<i64>,
    pub note: Option<String>,
    pub feedback_level: Option<String>,
    pub feedback_rating: Option<String>,
    pub feedback_text: Option<String>,
    pub career_stage: Option<String>,
    pub experience_years: Option<String>,
    pub research_area: Option<String>,
    pub use_case: Option<String>,
    pub institution: Option<String>,
    pub github_link: Option<String>,
    pub original_rating: Option<String>,
    /// Compact JSON text of the attached analysis.
    pub log_analysis: Option<String>,
    pub os: Option<String>,
    pub python: Option<String>,
    pub cli_version: Option<String>,
    pub session_id: Option<String>,
}

impl EventRow {
    /// Flatten one raw log entry. Entries without an admissible `type` keep
    /// whatever `type` text they carry and leave every other column empty.
    #[must_use]
    pub fn from_raw(row_index: i64, raw: &Value) -> Self {
        let Some(event) = Event::from_stored(raw) else {
            return Self {
                row_index,
                event_type: raw.get("type").and_then(Value::as_str).map(str::to_string),
                ..Self::default()
            };
        };

        let env = event.env();
        let mut row = Self {
            row_index,
            event_type: Some(event.kind().to_string()),
            timestamp: env.timestamp.clone(),
            os: env.os.clone(),
            python: env.runtime_version.clone(),
            cli_version: env.cli_version.clone(),
            session_id: env.session_id.clone(),
            ..Self::default()
        };

        match &event {
            Event::Download(d) => {
                row.dataset = Some(d.dataset.clone());
                row.succeeded = Some(d.succeeded);
                row.metadata_received = Some(d.metadata_received);
                row.resume_attempts = Some(sql_int(d.resume_attempts));
                row.note.clone_from(&d.note);
            }
            Event::Feedback(f) => {
                row.feedback_level = Some(f.level.as_str().to_string());
                row.feedback_rating = Some(f.rating.clone());
                row.feedback_text.clone_from(&f.text);
                row.career_stage.clone_from(&f.context.career_stage);
                row.experience_years.clone_from(&f.context.experience_years);
                row.research_area.clone_from(&f.context.research_area);
                row.use_case.clone_from(&f.context.use_case);
                row.institution.clone_from(&f.context.institution);
                row.github_link.clone_from(&f.context.github_link);
                row.log_analysis = f.context.log_analysis.as_ref().map(Value::to_string);
            }
            Event::FeedbackLogFollowup(f) => {
                row.original_rating.clone_from(&f.original_rating);
                row.log_analysis = f.log_analysis.as_ref().map(Value::to_string);
            }
        }
        row
    }
}

/// Row for the `summary` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub section: String,
    pub metric: String,
    pub value: i64,
}

impl SummaryRow {
    fn new(section: &str, metric: impl Into<String>, value: u64) -> Self {
        Self {
            section: section.to_string(),
            metric: metric.into(),
            value: sql_int(value),
        }
    }
}

/// Summary projection: totals, feedback levels, rating breakdown, per-dataset.
#[must_use]
pub fn summary_rows(document: &TelemetryDocument) -> Vec<SummaryRow> {
    let counts = &document.counts;
    let feedback = &counts.feedback_count;
    let mut rows = vec![
        SummaryRow::new("totals", "total_successful_runs", counts.total_successful_runs),
        SummaryRow::new("totals", "total_failed_runs", counts.total_failed_runs),
        SummaryRow::new("totals", "total_runs", counts.total_runs()),
        SummaryRow::new("totals", "retained_events", document.total_events() as u64),
        SummaryRow::new("feedback", "quick", feedback.quick),
        SummaryRow::new("feedback", "detailed", feedback.detailed),
        SummaryRow::new("feedback", "short", feedback.short),
        SummaryRow::new("feedback", "comprehensive", feedback.comprehensive),
        SummaryRow::new("feedback", "with_logs", feedback.with_logs),
    ];
    rows.extend(
        feedback
            .by_rating
            .iter()
            .map(|(rating, count)| SummaryRow::new("rating", rating.as_str(), *count)),
    );
    for (dataset, ds) in &counts.per_dataset {
        rows.push(SummaryRow::new("dataset", format!("{dataset}/success"), ds.success));
        rows.push(SummaryRow::new("dataset", format!("{dataset}/fail"), ds.fail));
    }
    rows
}

// ──────────────────── writers ────────────────────

fn write_events(tx: &Transaction<'_>, document: &TelemetryDocument) -> Result<usize> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO events (
            row_index, type, timestamp, dataset, succeeded, metadata_received,
            resume_attempts, note, feedback_level, feedback_rating, feedback_text,
            career_stage, experience_years, research_area, use_case, institution,
            github_link, original_rating, log_analysis, os, python, cli_version,
            session_id
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)",
    )?;

    for (index, raw) in document.events.iter().enumerate() {
        let row = EventRow::from_raw(sql_int(index as u64), raw);
        stmt.execute(params![
            row.row_index,
            row.event_type,
            row.timestamp,
            row.dataset,
            row.succeeded,
            row.metadata_received,
            row.resume_attempts,
            row.note,
            row.feedback_level,
            row.feedback_rating,
            row.feedback_text,
            row.career_stage,
            row.experience_years,
            row.research_area,
            row.use_case,
            row.institution,
            row.github_link,
            row.original_rating,
            row.log_analysis,
            row.os,
            row.python,
            row.cli_version,
            row.session_id,
        ])?;
    }
    Ok(document.events.len())
}

fn write_summary(tx: &Transaction<'_>, rows: &[SummaryRow]) -> Result<()> {
    let mut stmt =
        tx.prepare_cached("INSERT INTO summary (section, metric, value) VALUES (?1,?2,?3)")?;
    for row in rows {
        stmt.execute(params![row.section, row.metric, row.value])?;
    }
    Ok(())
}

fn sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ──────────────────── schema ────────────────────

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            row_index INTEGER PRIMARY KEY,
            type TEXT,
            timestamp TEXT,
            dataset TEXT,
            succeeded INTEGER,
            metadata_received INTEGER,
            resume_attempts INTEGER,
            note TEXT,
            feedback_level TEXT,
            feedback_rating TEXT,
            feedback_text TEXT,
            career_stage TEXT,
            experience_years TEXT,
            research_area TEXT,
            use_case TEXT,
            institution TEXT,
            github_link TEXT,
            original_rating TEXT,
            log_analysis TEXT,
            os TEXT,
            python TEXT,
            cli_version TEXT,
            session_id TEXT
        );

        CREATE TABLE IF NOT EXISTS summary (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            section TEXT NOT NULL,
            metric TEXT NOT NULL,
            value INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
        CREATE INDEX IF NOT EXISTS idx_events_dataset ON events(dataset);
        CREATE INDEX IF NOT EXISTS idx_summary_section ON summary(section);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
