use crate::domain::models::AnalysisHistoryEntry;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Which emails were analyzed for a user, and with what outcome.
pub trait AnalysisHistoryRepository: Send + Sync {
    fn is_analyzed(&self, user_id: &str, email_id: &str) -> Result<bool, InfraError>;
    /// Inserts or replaces the entry for `(user_id, email_id)`.
    fn record(&self, entry: &AnalysisHistoryEntry) -> Result<(), InfraError>;
    fn list(&self, user_id: &str, limit: u32) -> Result<Vec<AnalysisHistoryEntry>, InfraError>;
    fn delete(&self, user_id: &str, email_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteAnalysisHistoryRepository {
    db_path: PathBuf,
}

impl SqliteAnalysisHistoryRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

type HistoryRow = (String, String, String, String, String, u32, u32, String);

fn into_entry(row: HistoryRow) -> Result<AnalysisHistoryEntry, InfraError> {
    let (user_id, email_id, email_subject, email_sender, analysis_json, tasks, events, analyzed_at) =
        row;
    let analyzed_at = DateTime::parse_from_rfc3339(&analyzed_at)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid email_analysis_history.analyzed_at '{analyzed_at}': {error}"
            ))
        })?;
    Ok(AnalysisHistoryEntry {
        analysis: serde_json::from_str(&analysis_json)?,
        user_id,
        email_id,
        email_subject,
        email_sender,
        saved_tasks_count: tasks,
        saved_events_count: events,
        analyzed_at,
    })
}

/// Upserts one history row on `connection`, which may be an open transaction.
pub(crate) fn write_history_row(
    connection: &Connection,
    entry: &AnalysisHistoryEntry,
) -> Result<(), InfraError> {
    let analysis_json = serde_json::to_string(&entry.analysis)?;
    connection.execute(
        "INSERT INTO email_analysis_history (
           user_id, email_id, email_subject, email_sender, analysis_json,
           saved_tasks_count, saved_events_count, analyzed_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(user_id, email_id) DO UPDATE SET
           email_subject = excluded.email_subject,
           email_sender = excluded.email_sender,
           analysis_json = excluded.analysis_json,
           saved_tasks_count = excluded.saved_tasks_count,
           saved_events_count = excluded.saved_events_count,
           analyzed_at = excluded.analyzed_at",
        params![
            entry.user_id,
            entry.email_id,
            entry.email_subject,
            entry.email_sender,
            analysis_json,
            entry.saved_tasks_count,
            entry.saved_events_count,
            entry.analyzed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl AnalysisHistoryRepository for SqliteAnalysisHistoryRepository {
    fn is_analyzed(&self, user_id: &str, email_id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let found: Option<i64> = connection
            .query_row(
                "SELECT 1 FROM email_analysis_history WHERE user_id = ?1 AND email_id = ?2",
                params![user_id, email_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn record(&self, entry: &AnalysisHistoryEntry) -> Result<(), InfraError> {
        write_history_row(&self.connect()?, entry)
    }

    fn list(&self, user_id: &str, limit: u32) -> Result<Vec<AnalysisHistoryEntry>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT user_id, email_id, email_subject, email_sender, analysis_json,
                    saved_tasks_count, saved_events_count, analyzed_at
             FROM email_analysis_history
             WHERE user_id = ?1
             ORDER BY analyzed_at DESC
             LIMIT ?2",
        )?;
        let rows = statement
            .query_map(params![user_id, limit], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<Result<Vec<HistoryRow>, _>>()?;
        rows.into_iter().map(into_entry).collect()
    }

    fn delete(&self, user_id: &str, email_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "DELETE FROM email_analysis_history WHERE user_id = ?1 AND email_id = ?2",
            params![user_id, email_id],
        )?;
        if changed == 0 {
            return Err(InfraError::NotFound(format!("analysis history for email {email_id}")));
        }
        Ok(())
    }
}
