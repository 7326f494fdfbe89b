use crate::errors::{AppError, AppResult};
use crate::filters::RecordFilter;
use crate::models::{Finance, FinanceChanges, NewFinance, NewTask, Task, TaskChanges, UserRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");
const TASK_COLUMNS: &str = "id, title, description, created_at, completed_at, is_completed, tags";
const FINANCE_COLUMNS: &str = "id, description, value, tags, created_at";
const USER_COLUMNS: &str = "id, username, email, password_hash, is_superuser, created_at";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::from)?;
        Self::with_connection(conn)
    }

    /// Opens the store named by a connection string: `sqlite://path`,
    /// `sqlite:path`, a bare path, or `:memory:`.
    pub fn open(url: &str) -> AppResult<Self> {
        match parse_database_url(url)? {
            None => Self::in_memory(),
            Some(path) => Self::new(&path),
        }
    }

    fn with_connection(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn create_task(&self, task: &NewTask) -> AppResult<Task> {
        self.create_task_at(task, Utc::now())
    }

    /// Inserts with an explicit creation instant. The HTTP layer always goes
    /// through [`Database::create_task`]; this exists for seeding and tests.
    pub fn create_task_at(&self, task: &NewTask, created_at: DateTime<Utc>) -> AppResult<Task> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (title, description, created_at, completed_at, is_completed, tags)
             VALUES (?1, ?2, ?3, NULL, 0, ?4)",
            params![task.title, task.description, format_time(created_at), task.tags],
        )?;

        Ok(Task {
            id: conn.last_insert_rowid(),
            title: task.title.clone(),
            description: task.description.clone(),
            created_at: truncate_to_stored_precision(created_at),
            completed_at: None,
            is_completed: false,
            tags: task.tags.clone(),
        })
    }

    pub fn get_task(&self, task_id: i64) -> AppResult<Option<Task>> {
        let conn = self.lock()?;
        fetch_task(&conn, task_id)
    }

    /// Tasks matching `filter`, most recent first.
    pub fn find_tasks(&self, filter: &RecordFilter, tz: Tz) -> AppResult<Vec<Task>> {
        if filter.is_unsatisfiable() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let (query, bounds) = windowed_select("tasks", TASK_COLUMNS, filter, tz);
        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map(rusqlite::params_from_iter(bounds.iter()), parse_task_row)?;

        let mut result = Vec::new();
        for row in rows {
            let task = row?;
            if filter.matches(&task, tz) {
                result.push(task);
            }
        }
        Ok(result)
    }

    /// Applies `changes` in one statement. Completion is monotonic: once a
    /// task is completed its `completed_at` is never rewritten.
    pub fn update_task(&self, task_id: i64, changes: &TaskChanges) -> AppResult<Option<Task>> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE tasks SET
               title = COALESCE(?1, title),
               description = COALESCE(?2, description),
               tags = COALESCE(?3, tags),
               completed_at = CASE WHEN ?4 = 1 AND is_completed = 0 THEN ?5 ELSE completed_at END,
               is_completed = CASE WHEN ?4 = 1 THEN 1 ELSE is_completed END
             WHERE id = ?6",
            params![
                changes.title,
                changes.description,
                changes.tags,
                changes.mark_completed,
                format_time(Utc::now()),
                task_id,
            ],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        fetch_task(&conn, task_id)
    }

    pub fn complete_task(&self, task_id: i64) -> AppResult<Option<Task>> {
        self.update_task(
            task_id,
            &TaskChanges {
                mark_completed: true,
                ..TaskChanges::default()
            },
        )
    }

    pub fn create_finance(&self, finance: &NewFinance) -> AppResult<Finance> {
        self.create_finance_at(finance, Utc::now())
    }

    pub fn create_finance_at(&self, finance: &NewFinance, created_at: DateTime<Utc>) -> AppResult<Finance> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO finances (description, value, tags, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                finance.description,
                finance.value.to_string(),
                finance.tags,
                format_time(created_at)
            ],
        )?;

        Ok(Finance {
            id: conn.last_insert_rowid(),
            description: finance.description.clone(),
            value: finance.value,
            tags: finance.tags.clone(),
            created_at: truncate_to_stored_precision(created_at),
        })
    }

    pub fn get_finance(&self, finance_id: i64) -> AppResult<Option<Finance>> {
        let conn = self.lock()?;
        fetch_finance(&conn, finance_id)
    }

    pub fn find_finances(&self, filter: &RecordFilter, tz: Tz) -> AppResult<Vec<Finance>> {
        if filter.is_unsatisfiable() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let (query, bounds) = windowed_select("finances", FINANCE_COLUMNS, filter, tz);
        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map(rusqlite::params_from_iter(bounds.iter()), parse_finance_row)?;

        let mut result = Vec::new();
        for row in rows {
            let finance = row?;
            if filter.matches(&finance, tz) {
                result.push(finance);
            }
        }
        Ok(result)
    }

    pub fn update_finance(&self, finance_id: i64, changes: &FinanceChanges) -> AppResult<Option<Finance>> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE finances SET
               description = COALESCE(?1, description),
               value = COALESCE(?2, value),
               tags = COALESCE(?3, tags)
             WHERE id = ?4",
            params![
                changes.description,
                changes.value.map(|value| value.to_string()),
                changes.tags,
                finance_id,
            ],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        fetch_finance(&conn, finance_id)
    }

    pub fn delete_finance(&self, finance_id: i64) -> AppResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM finances WHERE id = ?1", [finance_id])?;
        Ok(deleted > 0)
    }

    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        is_superuser: bool,
    ) -> AppResult<UserRecord> {
        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (username, email, password_hash, is_superuser, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![username, email, password_hash, is_superuser, format_time(now)],
        )?;

        Ok(UserRecord {
            id: conn.last_insert_rowid(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            is_superuser,
            created_at: truncate_to_stored_precision(now),
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> AppResult<Option<UserRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            [username],
            parse_user_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn get_user(&self, user_id: i64) -> AppResult<Option<UserRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [user_id],
            parse_user_row,
        )
        .optional()
        .map_err(AppError::from)
    }
}

/// `SELECT` narrowed by the filter's date window expressed as UTC bounds.
/// Stored timestamps share one fixed-width format, so text comparison orders
/// them chronologically.
fn windowed_select(table: &str, columns: &str, filter: &RecordFilter, tz: Tz) -> (String, Vec<String>) {
    let mut query = format!("SELECT {columns} FROM {table} WHERE 1 = 1");
    let mut bounds = Vec::new();
    let (lower, upper) = filter.window.utc_bounds(tz);
    if let Some(lower) = lower {
        query.push_str(" AND created_at >= ?");
        bounds.push(format_time(lower));
    }
    if let Some(upper) = upper {
        query.push_str(" AND created_at < ?");
        bounds.push(format_time(upper));
    }
    query.push_str(" ORDER BY created_at DESC, id DESC");
    (query, bounds)
}

fn fetch_task(conn: &Connection, task_id: i64) -> AppResult<Option<Task>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        [task_id],
        parse_task_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn fetch_finance(conn: &Connection, finance_id: i64) -> AppResult<Option<Finance>> {
    conn.query_row(
        &format!("SELECT {FINANCE_COLUMNS} FROM finances WHERE id = ?1"),
        [finance_id],
        parse_finance_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        created_at: parse_time(&row.get::<_, String>(3)?)?,
        completed_at: row
            .get::<_, Option<String>>(4)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        is_completed: row.get(5)?,
        tags: row.get(6)?,
    })
}

fn parse_finance_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Finance> {
    Ok(Finance {
        id: row.get(0)?,
        description: row.get(1)?,
        value: parse_decimal(&row.get::<_, String>(2)?)?,
        tags: row.get(3)?,
        created_at: parse_time(&row.get::<_, String>(4)?)?,
    })
}

fn parse_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        is_superuser: row.get(4)?,
        created_at: parse_time(&row.get::<_, String>(5)?)?,
    })
}

fn parse_database_url(url: &str) -> AppResult<Option<PathBuf>> {
    let url = url.trim();
    if matches!(url, ":memory:" | "sqlite::memory:" | "sqlite://:memory:") {
        return Ok(None);
    }
    let path = if let Some(rest) = url.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = url.strip_prefix("sqlite:") {
        rest
    } else if url.contains("://") {
        return Err(AppError::Internal(format!("unsupported database url: {}", url)));
    } else {
        url
    };
    if path.is_empty() {
        return Err(AppError::Internal("database url has no path".to_string()));
    }
    Ok(Some(PathBuf::from(path)))
}

fn format_time(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn truncate_to_stored_precision(instant: DateTime<Utc>) -> DateTime<Utc> {
    parse_time(&format_time(instant)).unwrap_or(instant)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_failure(error.to_string()))
}

fn parse_decimal(raw: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(raw).map_err(|error| conversion_failure(error.to_string()))
}

fn conversion_failure(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

#[cfg(test)]
mod tests {
    use super::{parse_database_url, Database};
    use crate::filters::{DateWindow, RecordFilter};
    use crate::models::{FinanceChanges, NewFinance, NewTask, TaskChanges};
    use chrono::{DateTime, NaiveDate, Utc};
    use chrono_tz::America::Sao_Paulo;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use std::str::FromStr;

    fn instant(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid instant")
            .with_timezone(&Utc)
    }

    fn new_task(title: &str, tags: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: String::new(),
            tags: tags.to_string(),
        }
    }

    fn new_finance(description: &str, value: &str) -> NewFinance {
        NewFinance {
            description: description.to_string(),
            value: Decimal::from_str(value).expect("decimal"),
            tags: String::new(),
        }
    }

    #[test]
    fn task_round_trips_through_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let created = db.create_task(&new_task("Buy milk", "errand,home")).expect("create");
        let loaded = db.get_task(created.id).expect("get").expect("task exists");
        assert_eq!(loaded, created);
        assert!(!loaded.is_completed);
        assert!(loaded.completed_at.is_none());
        assert!(db.get_task(created.id + 100).expect("get").is_none());
    }

    #[test]
    fn completion_is_set_once() {
        let db = Database::in_memory().expect("db");
        let task = db.create_task(&new_task("Write report", "")).expect("create");

        let completed = db.complete_task(task.id).expect("complete").expect("exists");
        assert!(completed.is_completed);
        let first_completion = completed.completed_at.expect("completed_at set");

        let renamed = db
            .update_task(
                task.id,
                &TaskChanges {
                    title: Some("Write the report".to_string()),
                    mark_completed: true,
                    ..TaskChanges::default()
                },
            )
            .expect("update")
            .expect("exists");
        assert_eq!(renamed.title, "Write the report");
        assert_eq!(renamed.completed_at, Some(first_completion));
        assert_eq!(renamed.created_at, task.created_at);

        assert!(db.complete_task(9_999).expect("complete").is_none());
    }

    #[test]
    fn find_tasks_filters_by_local_window_and_orders_newest_first() {
        let db = Database::in_memory().expect("db");
        // Local (UTC-3) days: 09, 10, 10, 11.
        db.create_task_at(&new_task("a", "home"), instant("2024-01-10T02:00:00Z")).expect("a");
        db.create_task_at(&new_task("b", "Home"), instant("2024-01-10T12:00:00Z")).expect("b");
        db.create_task_at(&new_task("c", "work"), instant("2024-01-11T02:50:00Z")).expect("c");
        db.create_task_at(&new_task("d", "home"), instant("2024-01-11T03:10:00Z")).expect("d");

        let day = NaiveDate::from_ymd_opt(2024, 1, 10).expect("date");
        let on_the_tenth = RecordFilter::new().within(DateWindow::single_day(day));
        let titles: Vec<_> = db
            .find_tasks(&on_the_tenth, Sao_Paulo)
            .expect("find")
            .into_iter()
            .map(|task| task.title)
            .collect();
        assert_eq!(titles, vec!["c", "b"]);

        let tagged = RecordFilter::new().with_tag(Some("HOME"));
        let titles: Vec<_> = db
            .find_tasks(&tagged, Sao_Paulo)
            .expect("find")
            .into_iter()
            .map(|task| task.title)
            .collect();
        assert_eq!(titles, vec!["d", "b", "a"]);
    }

    #[test]
    fn finance_crud_keeps_exact_values() {
        let db = Database::in_memory().expect("db");
        let created = db.create_finance(&new_finance("Coffee", "4.50")).expect("create");
        assert_eq!(created.value.to_string(), "4.50");

        let updated = db
            .update_finance(
                created.id,
                &FinanceChanges {
                    value: Some(Decimal::from_str("5.25").expect("decimal")),
                    ..FinanceChanges::default()
                },
            )
            .expect("update")
            .expect("exists");
        assert_eq!(updated.description, "Coffee");
        assert_eq!(updated.value.to_string(), "5.25");

        assert!(db.delete_finance(created.id).expect("delete"));
        assert!(!db.delete_finance(created.id).expect("delete again"));
        assert!(db.get_finance(created.id).expect("get").is_none());
    }

    #[test]
    fn find_finances_with_empty_window_short_circuits() {
        let db = Database::in_memory().expect("db");
        db.create_finance(&new_finance("Lunch", "30.00")).expect("create");
        let impossible = RecordFilter::new().within(DateWindow::between(
            NaiveDate::from_ymd_opt(2024, 2, 1).expect("date"),
            NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
        ));
        assert!(db.find_finances(&impossible, Sao_Paulo).expect("find").is_empty());
        assert_eq!(db.find_finances(&RecordFilter::new(), Sao_Paulo).expect("find").len(), 1);
    }

    #[test]
    fn usernames_are_unique() {
        let db = Database::in_memory().expect("db");
        let user = db.create_user("admin", "admin@example.com", "hash", true).expect("create");
        assert!(db.create_user("admin", "", "other", false).is_err());
        let loaded = db.get_user_by_username("admin").expect("get").expect("exists");
        assert_eq!(loaded, user);
        assert_eq!(db.get_user(user.id).expect("get"), Some(user));
    }

    #[test]
    fn parses_connection_strings() {
        assert_eq!(parse_database_url(":memory:").expect("memory"), None);
        assert_eq!(
            parse_database_url("sqlite:///var/data/db.sqlite3").expect("abs"),
            Some(PathBuf::from("/var/data/db.sqlite3"))
        );
        assert_eq!(
            parse_database_url("sqlite://db.sqlite3").expect("rel"),
            Some(PathBuf::from("db.sqlite3"))
        );
        assert!(parse_database_url("postgres://localhost/db").is_err());
    }
}
