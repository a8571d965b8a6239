//! SQLite implementation of [`RepositoryStore`].
//!
//! The schema is created when the database is opened. History, version and comment rows reference
//! their repository with `ON DELETE CASCADE`, so foreign keys are switched on for every
//! connection.

use super::{RepositoryStore, UpsertOutcome, append_note, append_tag, check_user_text, new_comment, plan_upsert};
use crate::record::{CommentEntry, HistoryEntry, RepositoryRecord, VersionEntry};
use crate::timestamp::now_iso;
use crate::{RepoId, Result};
use camino::Utf8Path;
use chrono::Utc;
use ohno::{IntoAppError, bail};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fs;
use std::sync::{Mutex, MutexGuard};

const LOG_TARGET: &str = "     store";

const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS repositories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL,
    topics TEXT NOT NULL DEFAULT '',
    license TEXT,
    created_at TEXT,
    updated_at TEXT,
    pushed_at TEXT,
    stars INTEGER NOT NULL DEFAULT 0,
    forks INTEGER NOT NULL DEFAULT 0,
    open_issues INTEGER NOT NULL DEFAULT 0,
    contributors TEXT NOT NULL DEFAULT '0',
    commits INTEGER NOT NULL DEFAULT 0,
    latest_release TEXT,
    tags TEXT,
    notes TEXT,
    version INTEGER NOT NULL DEFAULT 1,
    last_synced TEXT
);

CREATE TABLE IF NOT EXISTS repository_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    field TEXT NOT NULL,
    old_value TEXT NOT NULL,
    new_value TEXT NOT NULL,
    changed_at TEXT NOT NULL,
    actor TEXT
);

CREATE INDEX IF NOT EXISTS idx_repository_history_repo_id ON repository_history(repo_id);

CREATE TABLE IF NOT EXISTS repository_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    version_number TEXT NOT NULL,
    release_date TEXT,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(repo_id, version_number)
);

CREATE TABLE IF NOT EXISTS repository_comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    comment TEXT NOT NULL,
    author TEXT NOT NULL DEFAULT 'Anonymous',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_repository_comments_repo_id ON repository_comments(repo_id);
";

const RECORD_COLUMNS: &str = "id, name, description, url, topics, license, created_at, updated_at, pushed_at, \
     stars, forks, open_issues, contributors, commits, latest_release, tags, notes, version, last_synced";

/// A [`RepositoryStore`] backed by a SQLite database.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`, creating parent directories as needed.
    pub fn open(path: &Utf8Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent).into_app_err_with(|| format!("creating database directory '{parent}'"))?;
        }

        let conn = Connection::open(path).into_app_err_with(|| format!("opening database '{path}'"))?;
        log::debug!(target: LOG_TARGET, "Opened database '{path}'");
        Self::with_connection(conn)
    }

    /// A private database that disappears when the store is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().into_app_err("opening in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).into_app_err("creating database schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("lock not poisoned")
    }
}

impl RepositoryStore for SqliteStore {
    fn get_existing(&self, id: &RepoId) -> Result<Option<RepositoryRecord>> {
        query_record(&self.lock(), id)
    }

    fn upsert(&self, record: RepositoryRecord, actor: Option<&str>) -> Result<UpsertOutcome> {
        let mut conn = self.lock();
        let tx = conn.transaction().into_app_err("starting upsert transaction")?;

        let existing = query_record(&tx, &record.id)?;
        let numbers = version_numbers(&tx, &record.id)?;
        let plan = plan_upsert(existing.as_ref(), record, &numbers, actor, Utc::now())?;

        write_record(&tx, &plan.record)?;
        for entry in &plan.history {
            insert_history(&tx, entry)?;
        }
        if let Some(version) = &plan.version {
            insert_version(&tx, version)?;
        }

        tx.commit().into_app_err_with(|| format!("committing upsert of '{}'", plan.record.id))?;

        log::debug!(target: LOG_TARGET, "Upserted '{}' at version {}: {:?}", plan.record.id, plan.record.version, plan.outcome);
        Ok(plan.outcome)
    }

    fn list(&self) -> Result<Vec<RepositoryRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {RECORD_COLUMNS} FROM repositories ORDER BY id"))
            .into_app_err("preparing repository listing")?;

        stmt.query_map([], read_record)
            .and_then(Iterator::collect)
            .into_app_err("listing repositories")
    }

    fn history(&self, id: &RepoId) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT field, old_value, new_value, changed_at, actor FROM repository_history \
                 WHERE repo_id = ?1 ORDER BY changed_at DESC, id DESC",
            )
            .into_app_err("preparing history query")?;

        stmt.query_map(params![id.to_string()], |row| {
            Ok(HistoryEntry {
                repo_id: id.clone(),
                field: row.get(0)?,
                old_value: row.get(1)?,
                new_value: row.get(2)?,
                changed_at: row.get(3)?,
                actor: row.get(4)?,
            })
        })
        .and_then(Iterator::collect)
        .into_app_err_with(|| format!("reading history of '{id}'"))
    }

    fn versions(&self, id: &RepoId) -> Result<Vec<VersionEntry>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT version_number, release_date, description, created_at FROM repository_versions \
                 WHERE repo_id = ?1 ORDER BY id",
            )
            .into_app_err("preparing version query")?;

        stmt.query_map(params![id.to_string()], |row| {
            Ok(VersionEntry {
                repo_id: id.clone(),
                version_number: row.get(0)?,
                release_date: row.get(1)?,
                description: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .and_then(Iterator::collect)
        .into_app_err_with(|| format!("reading versions of '{id}'"))
    }

    fn delete(&self, id: &RepoId) -> Result<bool> {
        let deleted = self
            .lock()
            .execute("DELETE FROM repositories WHERE id = ?1", params![id.to_string()])
            .into_app_err_with(|| format!("deleting '{id}'"))?;

        Ok(deleted > 0)
    }

    fn add_tag(&self, id: &RepoId, tag: &str) -> Result<()> {
        check_user_text("tag", tag)?;
        let mut conn = self.lock();
        let tx = conn.transaction().into_app_err("starting tag transaction")?;

        let current = user_column(&tx, id, "tags")?;
        if let Some(tags) = append_tag(current.as_deref(), tag.trim()) {
            let _ = tx
                .execute("UPDATE repositories SET tags = ?1 WHERE id = ?2", params![tags, id.to_string()])
                .into_app_err_with(|| format!("tagging '{id}'"))?;
        }

        tx.commit().into_app_err_with(|| format!("committing tag of '{id}'"))
    }

    fn add_note(&self, id: &RepoId, note: &str) -> Result<()> {
        check_user_text("note", note)?;
        let mut conn = self.lock();
        let tx = conn.transaction().into_app_err("starting note transaction")?;

        let current = user_column(&tx, id, "notes")?;
        let notes = append_note(current.as_deref(), note);
        let _ = tx
            .execute("UPDATE repositories SET notes = ?1 WHERE id = ?2", params![notes, id.to_string()])
            .into_app_err_with(|| format!("adding note to '{id}'"))?;

        tx.commit().into_app_err_with(|| format!("committing note of '{id}'"))
    }

    fn add_version(&self, id: &RepoId, version_number: &str, release_date: Option<&str>, description: &str) -> Result<VersionEntry> {
        check_user_text("version number", version_number)?;
        let mut conn = self.lock();
        let tx = conn.transaction().into_app_err("starting version transaction")?;

        if query_record(&tx, id)?.is_none() {
            bail!("repository '{id}' is not tracked");
        }
        if version_numbers(&tx, id)?.iter().any(|n| n == version_number) {
            bail!("version '{version_number}' already exists for repository '{id}'");
        }

        let entry = VersionEntry {
            repo_id: id.clone(),
            version_number: version_number.to_string(),
            release_date: release_date.map(String::from),
            description: description.to_string(),
            created_at: now_iso(),
        };
        insert_version(&tx, &entry)?;

        tx.commit().into_app_err_with(|| format!("committing version of '{id}'"))?;
        Ok(entry)
    }

    fn add_comment(&self, id: &RepoId, comment: &str, author: Option<&str>) -> Result<CommentEntry> {
        let entry = new_comment(id, comment, author)?;
        let mut conn = self.lock();
        let tx = conn.transaction().into_app_err("starting comment transaction")?;

        if query_record(&tx, id)?.is_none() {
            bail!("repository '{id}' is not tracked");
        }

        let _ = tx
            .execute(
                "INSERT INTO repository_comments (repo_id, comment, author, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), entry.comment, entry.author, entry.created_at],
            )
            .into_app_err_with(|| format!("adding comment to '{id}'"))?;

        tx.commit().into_app_err_with(|| format!("committing comment on '{id}'"))?;
        Ok(entry)
    }

    fn comments(&self, id: &RepoId) -> Result<Vec<CommentEntry>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT comment, author, created_at FROM repository_comments \
                 WHERE repo_id = ?1 ORDER BY created_at DESC, id DESC",
            )
            .into_app_err("preparing comment query")?;

        stmt.query_map(params![id.to_string()], |row| {
            Ok(CommentEntry {
                repo_id: id.clone(),
                comment: row.get(0)?,
                author: row.get(1)?,
                created_at: row.get(2)?,
            })
        })
        .and_then(Iterator::collect)
        .into_app_err_with(|| format!("reading comments of '{id}'"))
    }
}

fn query_record(conn: &Connection, id: &RepoId) -> Result<Option<RepositoryRecord>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM repositories WHERE id = ?1"),
        params![id.to_string()],
        read_record,
    )
    .optional()
    .into_app_err_with(|| format!("reading repository '{id}'"))
}

fn version_numbers(conn: &Connection, id: &RepoId) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT version_number FROM repository_versions WHERE repo_id = ?1")
        .into_app_err("preparing version number query")?;

    stmt.query_map(params![id.to_string()], |row| row.get(0))
        .and_then(Iterator::collect)
        .into_app_err_with(|| format!("reading version numbers of '{id}'"))
}

/// Reads the `tags` or `notes` column, failing when `id` is not stored.
fn user_column(conn: &Connection, id: &RepoId, column: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> = conn
        .query_row(&format!("SELECT {column} FROM repositories WHERE id = ?1"), params![id.to_string()], |row| row.get(0))
        .optional()
        .into_app_err_with(|| format!("reading {column} of '{id}'"))?;

    match value {
        Some(value) => Ok(value),
        None => bail!("repository '{id}' is not tracked"),
    }
}

fn write_record(conn: &Connection, r: &RepositoryRecord) -> Result<()> {
    let _ = conn
        .execute(
            &format!(
                "INSERT INTO repositories ({RECORD_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19) \
                 ON CONFLICT(id) DO UPDATE SET \
                 name = excluded.name, description = excluded.description, url = excluded.url, \
                 topics = excluded.topics, license = excluded.license, created_at = excluded.created_at, \
                 updated_at = excluded.updated_at, pushed_at = excluded.pushed_at, stars = excluded.stars, \
                 forks = excluded.forks, open_issues = excluded.open_issues, contributors = excluded.contributors, \
                 commits = excluded.commits, latest_release = excluded.latest_release, tags = excluded.tags, \
                 notes = excluded.notes, version = excluded.version, last_synced = excluded.last_synced"
            ),
            params![
                r.id.to_string(),
                r.name,
                r.description,
                r.url,
                r.topics_joined(),
                r.license,
                r.created_at,
                r.updated_at,
                r.pushed_at,
                to_sql_int(r.stars),
                to_sql_int(r.forks),
                to_sql_int(r.open_issues),
                r.contributors.to_string(),
                to_sql_int(r.commits),
                r.latest_release,
                r.tags,
                r.notes,
                to_sql_int(r.version),
                r.last_synced,
            ],
        )
        .into_app_err_with(|| format!("writing repository '{}'", r.id))?;

    Ok(())
}

fn insert_history(conn: &Connection, h: &HistoryEntry) -> Result<()> {
    let _ = conn
        .execute(
            "INSERT INTO repository_history (repo_id, field, old_value, new_value, changed_at, actor) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![h.repo_id.to_string(), h.field, h.old_value, h.new_value, h.changed_at, h.actor],
        )
        .into_app_err_with(|| format!("recording history of '{}'", h.repo_id))?;

    Ok(())
}

fn insert_version(conn: &Connection, v: &VersionEntry) -> Result<()> {
    let _ = conn
        .execute(
            "INSERT INTO repository_versions (repo_id, version_number, release_date, description, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![v.repo_id.to_string(), v.version_number, v.release_date, v.description, v.created_at],
        )
        .into_app_err_with(|| format!("recording version '{}' of '{}'", v.version_number, v.repo_id))?;

    Ok(())
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<RepositoryRecord> {
    let id: String = row.get(0)?;
    let topics: String = row.get(4)?;
    let contributors: String = row.get(12)?;

    Ok(RepositoryRecord {
        id: RepoId::parse(&id).map_err(|e| conversion_error(0, &e))?,
        name: row.get(1)?,
        description: row.get(2)?,
        url: row.get(3)?,
        topics: RepositoryRecord::split_topics(&topics),
        license: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        pushed_at: row.get(8)?,
        stars: from_sql_int(row.get(9)?),
        forks: from_sql_int(row.get(10)?),
        open_issues: from_sql_int(row.get(11)?),
        contributors: contributors.parse().map_err(|e| conversion_error(12, &e))?,
        commits: from_sql_int(row.get(13)?),
        latest_release: row.get(14)?,
        tags: row.get(15)?,
        notes: row.get(16)?,
        version: from_sql_int(row.get(17)?),
        last_synced: row.get(18)?,
    })
}

fn conversion_error(column: usize, e: &ohno::AppError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, e.to_string().into())
}

fn to_sql_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_sql_int(n: i64) -> u64 {
    u64::try_from(n).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ContributorCount;

    fn record(stars: u64) -> RepositoryRecord {
        RepositoryRecord {
            description: "demo".into(),
            topics: vec!["cli".into(), "rust".into()],
            license: Some("MIT License".into()),
            created_at: Some("2011-01-26T19:01:12Z".into()),
            stars,
            contributors: ContributorCount::capped(),
            ..RepositoryRecord::new(RepoId::parse("octocat/Hello-World").unwrap())
        }
    }

    #[test]
    fn test_record_survives_storage() {
        let store = SqliteStore::open_in_memory().unwrap();
        let _ = store.upsert(record(3), None).unwrap();

        let stored = store.get_existing(&record(3).id).unwrap().unwrap();
        assert_eq!(stored.topics, ["cli", "rust"]);
        assert_eq!(stored.contributors, ContributorCount::AtLeast(5000));
        assert_eq!(stored.license.as_deref(), Some("MIT License"));
        assert_eq!(stored.stars, 3);
        assert_eq!(stored.version, 1);
        assert!(stored.last_synced.is_some());
    }

    #[test]
    fn test_user_column_requires_tracked_repo() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = RepoId::parse("no/such-repo").unwrap();
        assert!(store.add_tag(&id, "x").is_err());
        assert!(store.add_note(&id, "x").is_err());
    }

    #[test]
    fn test_sql_int_saturates() {
        assert_eq!(to_sql_int(u64::MAX), i64::MAX);
        assert_eq!(from_sql_int(-1), 0);
    }
}
