use crate::domain::datetime::{format_canonical, normalize_datetime};
use crate::domain::models::{
    AnalysisHistoryEntry, CalendarEntry, CandidateStatus, EmailSource, EventCandidate, Priority, StoredEventCandidate,
    StoredTaskCandidate, TaskCandidate, Todo, TodoStatus,
};
use crate::infrastructure::analysis_history_repository::write_history_row;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Pending candidates and the todos/events they turn into once approved.
pub trait CandidateRepository: Send + Sync {
    fn insert_task_candidate(
        &self,
        user_id: &str,
        candidate: &TaskCandidate,
        source: Option<&EmailSource>,
    ) -> Result<StoredTaskCandidate, InfraError>;
    fn insert_event_candidate(
        &self,
        user_id: &str,
        candidate: &EventCandidate,
        source: Option<&EmailSource>,
    ) -> Result<StoredEventCandidate, InfraError>;
    /// Stores the gated candidates of one email together with its history
    /// entry. Either everything is written or nothing is.
    fn save_analysis(
        &self,
        source: &EmailSource,
        tasks: &[TaskCandidate],
        events: &[EventCandidate],
        history: &AnalysisHistoryEntry,
    ) -> Result<SavedAnalysis, InfraError>;
    fn list_task_candidates(&self, user_id: &str, limit: u32)
        -> Result<Vec<StoredTaskCandidate>, InfraError>;
    fn list_event_candidates(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredEventCandidate>, InfraError>;
    fn approve_task_candidate(&self, user_id: &str, candidate_id: &str) -> Result<Todo, InfraError>;
    fn approve_event_candidate(
        &self,
        user_id: &str,
        candidate_id: &str,
    ) -> Result<CalendarEntry, InfraError>;
    fn reject_task_candidate(&self, user_id: &str, candidate_id: &str) -> Result<(), InfraError>;
    fn reject_event_candidate(&self, user_id: &str, candidate_id: &str) -> Result<(), InfraError>;
    fn list_todos(&self, user_id: &str, include_completed: bool) -> Result<Vec<Todo>, InfraError>;
    fn complete_todo(&self, user_id: &str, todo_id: &str) -> Result<Todo, InfraError>;
    fn delete_todo(&self, user_id: &str, todo_id: &str) -> Result<(), InfraError>;
    fn list_events(&self, user_id: &str) -> Result<Vec<CalendarEntry>, InfraError>;
    fn delete_event(&self, user_id: &str, event_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedAnalysis {
    pub task_ids: Vec<String>,
    pub event_ids: Vec<String>,
}

pub struct SqliteCandidateRepository {
    db_path: PathBuf,
    now_provider: NowProvider,
}

impl SqliteCandidateRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn pending_task(
        &self,
        user_id: &str,
        candidate: &TaskCandidate,
        source: Option<&EmailSource>,
    ) -> Result<StoredTaskCandidate, InfraError> {
        candidate.validate().map_err(InfraError::InvalidConfig)?;
        Ok(StoredTaskCandidate {
            id: new_id(),
            user_id: user_id.to_string(),
            candidate: candidate.clone(),
            status: CandidateStatus::Pending,
            source: source.cloned(),
            created_at: self.now(),
        })
    }

    fn pending_event(
        &self,
        user_id: &str,
        candidate: &EventCandidate,
        source: Option<&EmailSource>,
    ) -> Result<StoredEventCandidate, InfraError> {
        candidate.validate().map_err(InfraError::InvalidConfig)?;
        Ok(StoredEventCandidate {
            id: new_id(),
            user_id: user_id.to_string(),
            candidate: candidate.clone(),
            status: CandidateStatus::Pending,
            source: source.cloned(),
            created_at: self.now(),
        })
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn parse_utc(raw: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| InfraError::InvalidConfig(format!("invalid {field_name} '{raw}': {error}")))
}

fn parse_local(raw: &str, field_name: &str) -> Result<NaiveDateTime, InfraError> {
    normalize_datetime(Some(raw))
        .ok_or_else(|| InfraError::InvalidConfig(format!("invalid {field_name} '{raw}'")))
}

fn parse_status(raw: &str) -> Result<CandidateStatus, InfraError> {
    CandidateStatus::parse(raw).map_err(InfraError::InvalidConfig)
}

fn source_from_columns(
    email_id: Option<String>,
    subject: Option<String>,
    sender: Option<String>,
) -> Option<EmailSource> {
    email_id.map(|email_id| EmailSource {
        email_id,
        subject: subject.unwrap_or_default(),
        sender: sender.unwrap_or_default(),
    })
}

fn not_found_unless_changed(changed: usize, what: &str, id: &str) -> Result<(), InfraError> {
    if changed == 0 {
        return Err(InfraError::NotFound(format!("{what} {id}")));
    }
    Ok(())
}

struct TaskCandidateRow {
    id: String,
    user_id: String,
    title: String,
    description: String,
    due_date: Option<String>,
    priority: String,
    confidence: f64,
    status: String,
    source_email_id: Option<String>,
    source_subject: Option<String>,
    source_sender: Option<String>,
    created_at: String,
}

const TASK_CANDIDATE_COLUMNS: &str = "id, user_id, title, description, due_date, priority, confidence, status, source_email_id, source_subject, source_sender, created_at";

impl TaskCandidateRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            due_date: row.get(4)?,
            priority: row.get(5)?,
            confidence: row.get(6)?,
            status: row.get(7)?,
            source_email_id: row.get(8)?,
            source_subject: row.get(9)?,
            source_sender: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_stored(self) -> Result<StoredTaskCandidate, InfraError> {
        let due_date = self
            .due_date
            .as_deref()
            .map(|raw| parse_local(raw, "todo_candidates.due_date"))
            .transpose()?;
        Ok(StoredTaskCandidate {
            candidate: TaskCandidate {
                title: self.title,
                description: self.description,
                due_date,
                priority: Priority::parse_lenient(&self.priority),
                confidence: self.confidence,
            },
            status: parse_status(&self.status)?,
            source: source_from_columns(self.source_email_id, self.source_subject, self.source_sender),
            created_at: parse_utc(&self.created_at, "todo_candidates.created_at")?,
            id: self.id,
            user_id: self.user_id,
        })
    }
}

struct EventCandidateRow {
    id: String,
    user_id: String,
    title: String,
    description: String,
    start_time: String,
    end_time: String,
    location: String,
    confidence: f64,
    status: String,
    source_email_id: Option<String>,
    source_subject: Option<String>,
    source_sender: Option<String>,
    created_at: String,
}

const EVENT_CANDIDATE_COLUMNS: &str = "id, user_id, title, description, start_time, end_time, location, confidence, status, source_email_id, source_subject, source_sender, created_at";

impl EventCandidateRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            location: row.get(6)?,
            confidence: row.get(7)?,
            status: row.get(8)?,
            source_email_id: row.get(9)?,
            source_subject: row.get(10)?,
            source_sender: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_stored(self) -> Result<StoredEventCandidate, InfraError> {
        Ok(StoredEventCandidate {
            candidate: EventCandidate {
                title: self.title,
                description: self.description,
                start: parse_local(&self.start_time, "event_candidates.start_time")?,
                end: parse_local(&self.end_time, "event_candidates.end_time")?,
                location: self.location,
                confidence: self.confidence,
            },
            status: parse_status(&self.status)?,
            source: source_from_columns(self.source_email_id, self.source_subject, self.source_sender),
            created_at: parse_utc(&self.created_at, "event_candidates.created_at")?,
            id: self.id,
            user_id: self.user_id,
        })
    }
}

const TODO_COLUMNS: &str = "id, user_id, title, description, due_date, priority, status, completed, confidence, source_email_id, created_at, updated_at, approved_at";

fn read_todo(row: &Row<'_>) -> rusqlite::Result<TodoRow> {
    Ok(TodoRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        due_date: row.get(4)?,
        priority: row.get(5)?,
        status: row.get(6)?,
        completed: row.get(7)?,
        confidence: row.get(8)?,
        source_email_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        approved_at: row.get(12)?,
    })
}

struct TodoRow {
    id: String,
    user_id: String,
    title: String,
    description: String,
    due_date: Option<String>,
    priority: String,
    status: String,
    completed: bool,
    confidence: f64,
    source_email_id: Option<String>,
    created_at: String,
    updated_at: String,
    approved_at: String,
}

impl TodoRow {
    fn into_todo(self) -> Result<Todo, InfraError> {
        Ok(Todo {
            due_date: self
                .due_date
                .as_deref()
                .map(|raw| parse_local(raw, "todos.due_date"))
                .transpose()?,
            priority: Priority::parse_lenient(&self.priority),
            status: TodoStatus::parse(&self.status).map_err(InfraError::InvalidConfig)?,
            created_at: parse_utc(&self.created_at, "todos.created_at")?,
            updated_at: parse_utc(&self.updated_at, "todos.updated_at")?,
            approved_at: parse_utc(&self.approved_at, "todos.approved_at")?,
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            description: self.description,
            completed: self.completed,
            confidence: self.confidence,
            source_email_id: self.source_email_id,
        })
    }
}

const EVENT_COLUMNS: &str = "id, user_id, title, description, start_time, end_time, location, confidence, source_email_id, created_at, approved_at";

struct CalendarEntryRow {
    id: String,
    user_id: String,
    title: String,
    description: String,
    start_time: String,
    end_time: String,
    location: String,
    confidence: f64,
    source_email_id: Option<String>,
    created_at: String,
    approved_at: String,
}

impl CalendarEntryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            location: row.get(6)?,
            confidence: row.get(7)?,
            source_email_id: row.get(8)?,
            created_at: row.get(9)?,
            approved_at: row.get(10)?,
        })
    }

    fn into_entry(self) -> Result<CalendarEntry, InfraError> {
        Ok(CalendarEntry {
            start: parse_local(&self.start_time, "events.start_time")?,
            end: parse_local(&self.end_time, "events.end_time")?,
            created_at: parse_utc(&self.created_at, "events.created_at")?,
            approved_at: parse_utc(&self.approved_at, "events.approved_at")?,
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            description: self.description,
            location: self.location,
            confidence: self.confidence,
            source_email_id: self.source_email_id,
        })
    }
}

fn load_todo(connection: &Connection, user_id: &str, todo_id: &str) -> Result<Option<Todo>, InfraError> {
    connection
        .query_row(
            &format!("SELECT {TODO_COLUMNS} FROM todos WHERE id = ?1 AND user_id = ?2"),
            params![todo_id, user_id],
            read_todo,
        )
        .optional()?
        .map(TodoRow::into_todo)
        .transpose()
}

fn write_task_candidate(
    connection: &Connection,
    stored: &StoredTaskCandidate,
) -> Result<(), InfraError> {
    let candidate = &stored.candidate;
    let source = stored.source.as_ref();
    connection.execute(
        "INSERT INTO todo_candidates (
           id, user_id, title, description, due_date, priority, confidence, status,
           source_email_id, source_subject, source_sender, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            stored.id,
            stored.user_id,
            candidate.title,
            candidate.description,
            candidate.due_date.as_ref().map(format_canonical),
            candidate.priority.as_str(),
            candidate.confidence,
            stored.status.as_str(),
            source.map(|value| value.email_id.as_str()),
            source.map(|value| value.subject.as_str()),
            source.map(|value| value.sender.as_str()),
            stored.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn write_event_candidate(
    connection: &Connection,
    stored: &StoredEventCandidate,
) -> Result<(), InfraError> {
    let candidate = &stored.candidate;
    let source = stored.source.as_ref();
    connection.execute(
        "INSERT INTO event_candidates (
           id, user_id, title, description, start_time, end_time, location, confidence,
           status, source_email_id, source_subject, source_sender, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            stored.id,
            stored.user_id,
            candidate.title,
            candidate.description,
            format_canonical(&candidate.start),
            format_canonical(&candidate.end),
            candidate.location,
            candidate.confidence,
            stored.status.as_str(),
            source.map(|value| value.email_id.as_str()),
            source.map(|value| value.subject.as_str()),
            source.map(|value| value.sender.as_str()),
            stored.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl CandidateRepository for SqliteCandidateRepository {
    fn insert_task_candidate(
        &self,
        user_id: &str,
        candidate: &TaskCandidate,
        source: Option<&EmailSource>,
    ) -> Result<StoredTaskCandidate, InfraError> {
        let stored = self.pending_task(user_id, candidate, source)?;
        write_task_candidate(&self.connect()?, &stored)?;
        Ok(stored)
    }

    fn insert_event_candidate(
        &self,
        user_id: &str,
        candidate: &EventCandidate,
        source: Option<&EmailSource>,
    ) -> Result<StoredEventCandidate, InfraError> {
        let stored = self.pending_event(user_id, candidate, source)?;
        write_event_candidate(&self.connect()?, &stored)?;
        Ok(stored)
    }

    fn save_analysis(
        &self,
        source: &EmailSource,
        tasks: &[TaskCandidate],
        events: &[EventCandidate],
        history: &AnalysisHistoryEntry,
    ) -> Result<SavedAnalysis, InfraError> {
        let user_id = history.user_id.as_str();
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let mut saved = SavedAnalysis::default();

        for candidate in tasks {
            let stored = self.pending_task(user_id, candidate, Some(source))?;
            write_task_candidate(&transaction, &stored)?;
            saved.task_ids.push(stored.id);
        }
        for candidate in events {
            let stored = self.pending_event(user_id, candidate, Some(source))?;
            write_event_candidate(&transaction, &stored)?;
            saved.event_ids.push(stored.id);
        }
        write_history_row(&transaction, history)?;

        transaction.commit()?;
        Ok(saved)
    }

    fn list_task_candidates(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredTaskCandidate>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {TASK_CANDIDATE_COLUMNS} FROM todo_candidates
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let rows = statement
            .query_map(params![user_id, limit], TaskCandidateRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TaskCandidateRow::into_stored).collect()
    }

    fn list_event_candidates(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredEventCandidate>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {EVENT_CANDIDATE_COLUMNS} FROM event_candidates
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let rows = statement
            .query_map(params![user_id, limit], EventCandidateRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EventCandidateRow::into_stored).collect()
    }

    fn approve_task_candidate(&self, user_id: &str, candidate_id: &str) -> Result<Todo, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let stored = transaction
            .query_row(
                &format!(
                    "SELECT {TASK_CANDIDATE_COLUMNS} FROM todo_candidates WHERE id = ?1 AND user_id = ?2"
                ),
                params![candidate_id, user_id],
                TaskCandidateRow::read,
            )
            .optional()?
            .ok_or_else(|| InfraError::NotFound(format!("task candidate {candidate_id}")))?
            .into_stored()?;

        let now = self.now();
        let todo = Todo {
            id: new_id(),
            user_id: stored.user_id,
            title: stored.candidate.title,
            description: stored.candidate.description,
            due_date: stored.candidate.due_date,
            priority: stored.candidate.priority,
            status: TodoStatus::Approved,
            completed: false,
            confidence: stored.candidate.confidence,
            source_email_id: stored.source.map(|source| source.email_id),
            created_at: now,
            updated_at: now,
            approved_at: now,
        };

        transaction.execute(
            &format!(
                "INSERT INTO todos ({TODO_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                todo.id,
                todo.user_id,
                todo.title,
                todo.description,
                todo.due_date.as_ref().map(format_canonical),
                todo.priority.as_str(),
                todo.status.as_str(),
                todo.completed,
                todo.confidence,
                todo.source_email_id,
                todo.created_at.to_rfc3339(),
                todo.updated_at.to_rfc3339(),
                todo.approved_at.to_rfc3339(),
            ],
        )?;
        transaction.execute(
            "DELETE FROM todo_candidates WHERE id = ?1",
            params![candidate_id],
        )?;
        transaction.commit()?;
        Ok(todo)
    }

    fn approve_event_candidate(
        &self,
        user_id: &str,
        candidate_id: &str,
    ) -> Result<CalendarEntry, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let stored = transaction
            .query_row(
                &format!(
                    "SELECT {EVENT_CANDIDATE_COLUMNS} FROM event_candidates WHERE id = ?1 AND user_id = ?2"
                ),
                params![candidate_id, user_id],
                EventCandidateRow::read,
            )
            .optional()?
            .ok_or_else(|| InfraError::NotFound(format!("event candidate {candidate_id}")))?
            .into_stored()?;

        let now = self.now();
        let entry = CalendarEntry {
            id: new_id(),
            user_id: stored.user_id,
            title: stored.candidate.title,
            description: stored.candidate.description,
            start: stored.candidate.start,
            end: stored.candidate.end,
            location: stored.candidate.location,
            confidence: stored.candidate.confidence,
            source_email_id: stored.source.map(|source| source.email_id),
            created_at: now,
            approved_at: now,
        };

        transaction.execute(
            &format!(
                "INSERT INTO events ({EVENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                entry.id,
                entry.user_id,
                entry.title,
                entry.description,
                format_canonical(&entry.start),
                format_canonical(&entry.end),
                entry.location,
                entry.confidence,
                entry.source_email_id,
                entry.created_at.to_rfc3339(),
                entry.approved_at.to_rfc3339(),
            ],
        )?;
        transaction.execute(
            "DELETE FROM event_candidates WHERE id = ?1",
            params![candidate_id],
        )?;
        transaction.commit()?;
        Ok(entry)
    }

    fn reject_task_candidate(&self, user_id: &str, candidate_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "DELETE FROM todo_candidates WHERE id = ?1 AND user_id = ?2",
            params![candidate_id, user_id],
        )?;
        not_found_unless_changed(changed, "task candidate", candidate_id)
    }

    fn reject_event_candidate(&self, user_id: &str, candidate_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "DELETE FROM event_candidates WHERE id = ?1 AND user_id = ?2",
            params![candidate_id, user_id],
        )?;
        not_found_unless_changed(changed, "event candidate", candidate_id)
    }

    fn list_todos(&self, user_id: &str, include_completed: bool) -> Result<Vec<Todo>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {TODO_COLUMNS} FROM todos
             WHERE user_id = ?1 AND (?2 OR completed = 0)
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = statement
            .query_map(params![user_id, include_completed], read_todo)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TodoRow::into_todo).collect()
    }

    fn complete_todo(&self, user_id: &str, todo_id: &str) -> Result<Todo, InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "UPDATE todos SET completed = 1, status = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            params![
                TodoStatus::Completed.as_str(),
                self.now().to_rfc3339(),
                todo_id,
                user_id
            ],
        )?;
        not_found_unless_changed(changed, "todo", todo_id)?;
        load_todo(&connection, user_id, todo_id)?
            .ok_or_else(|| InfraError::NotFound(format!("todo {todo_id}")))
    }

    fn delete_todo(&self, user_id: &str, todo_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "DELETE FROM todos WHERE id = ?1 AND user_id = ?2",
            params![todo_id, user_id],
        )?;
        not_found_unless_changed(changed, "todo", todo_id)
    }

    fn list_events(&self, user_id: &str) -> Result<Vec<CalendarEntry>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?1 ORDER BY start_time ASC"
        ))?;
        let rows = statement
            .query_map(params![user_id], CalendarEntryRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(CalendarEntryRow::into_entry).collect()
    }

    fn delete_event(&self, user_id: &str, event_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "DELETE FROM events WHERE id = ?1 AND user_id = ?2",
            params![event_id, user_id],
        )?;
        not_found_unless_changed(changed, "event", event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::datetime::CANONICAL_FORMAT;
    use crate::infrastructure::storage::initialize_database;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDatabase {
        dir: PathBuf,
        path: PathBuf,
    }

    impl TempDatabase {
        fn new() -> Self {
            let sequence = NEXT_DB.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "inbox-planner-candidates-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            let path = dir.join("state.sqlite");
            initialize_database(&path).expect("initialize database");
            Self { dir, path }
        }

        fn repository(&self) -> SqliteCandidateRepository {
            SqliteCandidateRepository::new(&self.path)
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, CANONICAL_FORMAT).expect("valid timestamp")
    }

    fn task(title: &str) -> TaskCandidate {
        TaskCandidate {
            title: title.to_string(),
            description: "from email".to_string(),
            due_date: Some(at("2025-03-07T17:00:00")),
            priority: Priority::High,
            confidence: 0.9,
        }
    }

    fn event(title: &str) -> EventCandidate {
        EventCandidate {
            title: title.to_string(),
            description: String::new(),
            start: at("2025-03-01T10:00:00"),
            end: at("2025-03-01T11:00:00"),
            location: "Room 4".to_string(),
            confidence: 0.8,
        }
    }

    fn source() -> EmailSource {
        EmailSource {
            email_id: "msg-1".to_string(),
            subject: "Quarterly report".to_string(),
            sender: "boss@example.com".to_string(),
        }
    }

    #[test]
    fn save_analysis_rolls_back_when_a_candidate_is_invalid() {
        use crate::domain::models::AnalysisResult;
        use crate::infrastructure::analysis_history_repository::{
            AnalysisHistoryRepository, SqliteAnalysisHistoryRepository,
        };

        let db = TempDatabase::new();
        let repository = db.repository();
        let history_repository = SqliteAnalysisHistoryRepository::new(&db.path);
        let history = AnalysisHistoryEntry {
            user_id: "alice".to_string(),
            email_id: "msg-1".to_string(),
            email_subject: "Quarterly report".to_string(),
            email_sender: "boss@example.com".to_string(),
            analysis: AnalysisResult::empty(),
            saved_tasks_count: 2,
            saved_events_count: 1,
            analyzed_at: Utc::now(),
        };

        let broken = [task("Write summary"), task("   ")];
        assert!(repository
            .save_analysis(&source(), &broken, &[event("Review")], &history)
            .is_err());
        assert!(repository.list_task_candidates("alice", 50).expect("list").is_empty());
        assert!(!history_repository.is_analyzed("alice", "msg-1").expect("lookup"));

        let saved = repository
            .save_analysis(&source(), &[task("Write summary")], &[event("Review")], &history)
            .expect("save");
        assert_eq!(saved.task_ids.len(), 1);
        assert_eq!(saved.event_ids.len(), 1);
        let stored = repository.list_event_candidates("alice", 50).expect("list");
        assert_eq!(stored[0].source, Some(source()));
        assert!(history_repository.is_analyzed("alice", "msg-1").expect("lookup"));
    }

    #[test]
    fn inserted_candidates_are_listed_per_user() {
        let db = TempDatabase::new();
        let repository = db.repository();

        let stored = repository
            .insert_task_candidate("alice", &task("Send report"), Some(&source()))
            .expect("insert task");
        repository
            .insert_task_candidate("bob", &task("Other user"), None)
            .expect("insert other");
        repository
            .insert_event_candidate("alice", &event("Review"), Some(&source()))
            .expect("insert event");

        let tasks = repository.list_task_candidates("alice", 50).expect("list tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0], stored);
        assert_eq!(tasks[0].status, CandidateStatus::Pending);
        assert_eq!(tasks[0].source, Some(source()));

        let events = repository.list_event_candidates("alice", 50).expect("list events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].candidate, event("Review"));
    }

    #[test]
    fn invalid_candidates_are_not_inserted() {
        let db = TempDatabase::new();
        let result = db.repository().insert_task_candidate("alice", &task("  "), None);
        assert!(matches!(result, Err(InfraError::InvalidConfig(_))));
    }

    #[test]
    fn approving_a_task_moves_it_to_todos() {
        let db = TempDatabase::new();
        let repository = db.repository();
        let stored = repository
            .insert_task_candidate("alice", &task("Send report"), Some(&source()))
            .expect("insert task");

        let todo = repository
            .approve_task_candidate("alice", &stored.id)
            .expect("approve task");
        assert_eq!(todo.title, "Send report");
        assert_eq!(todo.status, TodoStatus::Approved);
        assert_eq!(todo.source_email_id.as_deref(), Some("msg-1"));
        assert!(todo.validate().is_ok());

        assert!(repository.list_task_candidates("alice", 50).expect("list").is_empty());
        assert_eq!(repository.list_todos("alice", true).expect("todos"), vec![todo]);

        assert!(matches!(
            repository.approve_task_candidate("alice", &stored.id),
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn approving_an_event_moves_it_to_events() {
        let db = TempDatabase::new();
        let repository = db.repository();
        let stored = repository
            .insert_event_candidate("alice", &event("Review"), None)
            .expect("insert event");

        assert!(matches!(
            repository.approve_event_candidate("bob", &stored.id),
            Err(InfraError::NotFound(_))
        ));

        let entry = repository
            .approve_event_candidate("alice", &stored.id)
            .expect("approve event");
        assert_eq!(entry.start, at("2025-03-01T10:00:00"));
        assert_eq!(entry.source_email_id, None);
        assert!(repository.list_event_candidates("alice", 50).expect("list").is_empty());
        assert_eq!(repository.list_events("alice").expect("events"), vec![entry.clone()]);

        repository.delete_event("alice", &entry.id).expect("delete event");
        assert!(repository.list_events("alice").expect("events").is_empty());
    }

    #[test]
    fn rejecting_deletes_or_reports_missing() {
        let db = TempDatabase::new();
        let repository = db.repository();
        let stored = repository
            .insert_event_candidate("alice", &event("Review"), None)
            .expect("insert event");

        repository
            .reject_event_candidate("alice", &stored.id)
            .expect("reject event");
        assert!(repository.list_event_candidates("alice", 50).expect("list").is_empty());
        assert!(matches!(
            repository.reject_event_candidate("alice", &stored.id),
            Err(InfraError::NotFound(_))
        ));
        assert!(matches!(
            repository.reject_task_candidate("alice", "missing"),
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn completing_and_deleting_todos() {
        let db = TempDatabase::new();
        let repository = db.repository();
        let stored = repository
            .insert_task_candidate("alice", &task("Send report"), None)
            .expect("insert task");
        let todo = repository
            .approve_task_candidate("alice", &stored.id)
            .expect("approve");

        let completed = repository.complete_todo("alice", &todo.id).expect("complete");
        assert!(completed.completed);
        assert_eq!(completed.status, TodoStatus::Completed);
        assert!(completed.validate().is_ok());

        assert!(repository.list_todos("alice", false).expect("open todos").is_empty());
        assert_eq!(repository.list_todos("alice", true).expect("all todos").len(), 1);

        repository.delete_todo("alice", &todo.id).expect("delete");
        assert!(matches!(
            repository.delete_todo("alice", &todo.id),
            Err(InfraError::NotFound(_))
        ));
        assert!(matches!(
            repository.complete_todo("alice", &todo.id),
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn list_limit_keeps_newest() {
        let db = TempDatabase::new();
        let base = Utc::now();
        for (offset, title) in ["first", "second", "third"].iter().enumerate() {
            let created_at = base + chrono::Duration::seconds(offset as i64);
            db.repository()
                .with_now_provider(Arc::new(move || created_at))
                .insert_task_candidate("alice", &task(title), None)
                .expect("insert");
        }

        let listed = db.repository().list_task_candidates("alice", 2).expect("list");
        let titles: Vec<_> = listed.iter().map(|stored| stored.candidate.title.as_str()).collect();
        assert_eq!(titles, vec!["third", "second"]);
    }
}
