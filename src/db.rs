use crate::db_models::{RunningRecord, SessionRecord};
use crate::progress::BookProgress;
use anyhow::{Context as AnyhowContext, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use turso::{Builder, Connection, Row};

/// Client for interacting with the Turso (SQLite) database.
pub struct DbClient {
    conn: Arc<Mutex<Connection>>, // Persist the connection
    db_file: PathBuf,
}

impl DbClient {
    /// Creates a new `DbClient` and initializes the database schema.
    pub async fn new(db_file: &Path) -> Result<Self> {
        let turso_db_client = Arc::new(
            Builder::new_local(db_file.to_str().ok_or_else(|| {
                anyhow::anyhow!("Cannot convert path name to unicode: {:?}", db_file)
            })?)
            .build()
            .await
            .with_context(|| {
                format!("Failed to open db (and/or its wal file). File name: {db_file:?}")
            })?,
        );

        let conn = Arc::new(Mutex::new(turso_db_client.connect()?));

        let client = DbClient {
            conn,
            db_file: PathBuf::from(db_file),
        };
        client
            .init_db()
            .await
            .with_context(|| format!("Failed to init db file {db_file:?} (and/or its wal file)"))?;
        Ok(client)
    }

    /// Initializes the schema if it doesn't already exist. The PRIMARY KEY on
    /// `running_sessions.subject` is what makes "at most one running session
    /// per reader" hold across restarts and concurrent writers.
    async fn init_db(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS running_sessions (
                subject TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                record TEXT NOT NULL -- JSON
            )",
            (),
        )
        .await?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                title TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                record TEXT NOT NULL -- JSON
            )",
            (),
        )
        .await?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS books (
                title TEXT PRIMARY KEY,
                author TEXT,
                total_pages INTEGER,
                pages_read_total INTEGER NOT NULL,
                completed_count INTEGER NOT NULL
            )",
            (),
        )
        .await?;
        Ok(())
    }

    /// Persists a newly started session.
    pub async fn insert_running(&self, record: &RunningRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO running_sessions (subject, session_id, record) VALUES (?, ?, ?)",
                (record.subject.clone(), record.session_id.clone(), json),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to insert into running_sessions. File name: {:?}",
                    self.db_file
                )
            })?;
        Ok(())
    }

    pub async fn delete_running(&self, subject: &str) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "DELETE FROM running_sessions WHERE subject = ?",
                (subject.to_string(),),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to delete running session. File name: {:?}",
                    self.db_file
                )
            })?;
        Ok(())
    }

    /// Loads every persisted running session, for restart recovery.
    pub async fn load_running(&self) -> Result<Vec<RunningRecord>> {
        let mut results = self
            .conn
            .lock()
            .await
            .query("SELECT record FROM running_sessions", ())
            .await
            .with_context(|| {
                format!(
                    "Failed to load running sessions. File name: {:?}",
                    self.db_file
                )
            })?;
        let mut rows = Vec::new();
        while let Some(row) = results.next().await? {
            rows.push(Self::record_from_row::<RunningRecord>(row)?);
        }
        Ok(rows)
    }

    /// Inserts one finished session record.
    pub async fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO sessions (session_id, subject, title, finished_at, record)
                 VALUES (?, ?, ?, ?, ?)",
                (
                    record.session_id.clone(),
                    record.subject.clone(),
                    record.title.clone(),
                    record.finished_at.to_rfc3339(),
                    json,
                ),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to insert into sessions. File name: {:?}",
                    self.db_file
                )
            })?;
        Ok(())
    }

    /// Finished sessions for one reader, newest first.
    pub async fn history(&self, subject: &str) -> Result<Vec<SessionRecord>> {
        let mut results = self
            .conn
            .lock()
            .await
            .query(
                "SELECT record FROM sessions WHERE subject = ? ORDER BY finished_at DESC",
                (subject.to_string(),),
            )
            .await
            .with_context(|| format!("Failed to load history. File name: {:?}", self.db_file))?;
        let mut rows = Vec::new();
        while let Some(row) = results.next().await? {
            rows.push(Self::record_from_row::<SessionRecord>(row)?);
        }
        Ok(rows)
    }

    pub async fn get_book(&self, title: &str) -> Result<Option<BookProgress>> {
        let mut results = self
            .conn
            .lock()
            .await
            .query(
                "SELECT title, author, total_pages, pages_read_total, completed_count
                 FROM books WHERE title = ?",
                (title.to_string(),),
            )
            .await
            .with_context(|| format!("Failed to load book. File name: {:?}", self.db_file))?;
        match results.next().await? {
            Some(row) => Ok(Some(Self::map_row_to_book(row)?)),
            None => Ok(None),
        }
    }

    /// Writes the folded aggregate back: UPDATE the existing row, INSERT when
    /// the book is new. Runs under the state lock, on the single connection.
    pub async fn upsert_book(&self, book: &BookProgress) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE books SET author = ?, total_pages = ?, pages_read_total = ?, completed_count = ?
                 WHERE title = ?",
                (
                    book.author.clone(),
                    book.total_pages.map(i64::from),
                    book.pages_read_total as i64,
                    book.completed_count as i64,
                    book.title.clone(),
                ),
            )
            .await
            .with_context(|| format!("Failed to update book. File name: {:?}", self.db_file))?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO books (title, author, total_pages, pages_read_total, completed_count)
                 VALUES (?, ?, ?, ?, ?)",
                (
                    book.title.clone(),
                    book.author.clone(),
                    book.total_pages.map(i64::from),
                    book.pages_read_total as i64,
                    book.completed_count as i64,
                ),
            )
            .await
            .with_context(|| format!("Failed to insert book. File name: {:?}", self.db_file))?;
        }
        Ok(())
    }

    /// All per-book aggregates, alphabetical.
    pub async fn list_progress(&self) -> Result<Vec<BookProgress>> {
        let mut results = self
            .conn
            .lock()
            .await
            .query(
                "SELECT title, author, total_pages, pages_read_total, completed_count
                 FROM books ORDER BY title",
                (),
            )
            .await
            .with_context(|| format!("Failed to load progress. File name: {:?}", self.db_file))?;
        let mut rows = Vec::new();
        while let Some(row) = results.next().await? {
            rows.push(Self::map_row_to_book(row)?);
        }
        Ok(rows)
    }

    /// Helper to parse a single-column JSON document row.
    fn record_from_row<T: serde::de::DeserializeOwned>(row: Row) -> Result<T> {
        let json = row.get::<String>(0)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Helper function to convert a `books` row into a `BookProgress`.
    fn map_row_to_book(row: Row) -> Result<BookProgress> {
        let title = row.get::<String>(0)?;
        let author = row.get::<Option<String>>(1)?;
        let total_pages = row.get::<Option<i64>>(2)?;
        let pages_read_total = row.get::<i64>(3)?;
        let completed_count = row.get::<i64>(4)?;

        Ok(BookProgress {
            title,
            author,
            total_pages: total_pages.map(u32::try_from).transpose()?,
            pages_read_total: u64::try_from(pages_read_total)?,
            completed_count: u64::try_from(completed_count)?,
        })
    }
}
