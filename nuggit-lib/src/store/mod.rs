//! Insert-or-update persistence with field-level change history.
//!
//! # Implementation Model
//!
//! [`RepositoryStore`] is implemented twice: [`MemoryStore`] for tests and short-lived
//! sessions, and [`SqliteStore`] for the on-disk database. Both delegate the decision of
//! what an upsert does to [`plan_upsert`], which is pure. A store only has to read the
//! existing row, hand it to the planner, and apply the resulting [`UpsertPlan`]
//! atomically.
//!
//! The planner:
//!
//! - Inserts unknown ids with `version = 1` and an `origin` version entry.
//! - Rejects a caller-supplied `version` that does not match the stored one.
//! - Compares [`RepositoryRecord::tracked_fields`] as strings and emits one
//!   [`HistoryEntry`] per differing field.
//! - Keeps stored tags and notes when the incoming record leaves them unset.
//! - Bumps `version` only when something changed.
//! - Adds a dated version entry on every refresh of a stored repository.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::record::{CommentEntry, HistoryEntry, RepositoryRecord, VersionEntry};
use crate::timestamp::{format_utc, now_iso};
use crate::{RepoId, Result};
use chrono::{DateTime, Utc};
use ohno::bail;

/// Version number given to the entry created when a repository is first stored.
pub const ORIGIN_VERSION: &str = "origin";

const ORIGIN_DESCRIPTION: &str = "Initial version";

/// Author recorded for comments left without one.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// What an upsert did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,

    /// The listed fields changed.
    Updated { changed: Vec<String> },

    Unchanged,
}

/// Persistence for tracked repositories.
///
/// Every operation is atomic per repository id.
pub trait RepositoryStore: Send + Sync {
    fn get_existing(&self, id: &RepoId) -> Result<Option<RepositoryRecord>>;

    /// Inserts `record` or merges it into the stored copy, recording changes under `actor`.
    fn upsert(&self, record: RepositoryRecord, actor: Option<&str>) -> Result<UpsertOutcome>;

    /// All stored repositories ordered by id.
    fn list(&self) -> Result<Vec<RepositoryRecord>>;

    /// History entries for `id`, newest first.
    fn history(&self, id: &RepoId) -> Result<Vec<HistoryEntry>>;

    /// Version entries for `id` in creation order.
    fn versions(&self, id: &RepoId) -> Result<Vec<VersionEntry>>;

    /// Removes `id` with its history, versions and comments. Returns `false` when `id` was not stored.
    fn delete(&self, id: &RepoId) -> Result<bool>;

    /// Appends `tag` to the comma-separated tags. A tag already present is ignored.
    fn add_tag(&self, id: &RepoId, tag: &str) -> Result<()>;

    /// Appends `note` as a new line of the notes.
    fn add_note(&self, id: &RepoId, note: &str) -> Result<()>;

    /// Records a named version. Fails when `version_number` already exists for `id`.
    fn add_version(&self, id: &RepoId, version_number: &str, release_date: Option<&str>, description: &str) -> Result<VersionEntry>;

    /// Records a comment, attributed to [`ANONYMOUS_AUTHOR`] when `author` is `None`.
    fn add_comment(&self, id: &RepoId, comment: &str, author: Option<&str>) -> Result<CommentEntry>;

    /// Comments on `id`, newest first.
    fn comments(&self, id: &RepoId) -> Result<Vec<CommentEntry>>;
}

/// The writes an upsert has to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertPlan {
    /// The row to store.
    pub record: RepositoryRecord,
    pub history: Vec<HistoryEntry>,
    pub version: Option<VersionEntry>,
    pub outcome: UpsertOutcome,
}

/// Decides what storing `incoming` over `existing` means.
///
/// `version_numbers` are the version numbers already recorded for the repository.
pub fn plan_upsert(
    existing: Option<&RepositoryRecord>,
    mut incoming: RepositoryRecord,
    version_numbers: &[String],
    actor: Option<&str>,
    now: DateTime<Utc>,
) -> Result<UpsertPlan> {
    let stamp = format_utc(now);
    incoming.last_synced = Some(stamp.clone());

    let Some(existing) = existing else {
        incoming.version = 1;
        let version = VersionEntry {
            repo_id: incoming.id.clone(),
            version_number: ORIGIN_VERSION.to_string(),
            release_date: incoming.created_at.clone(),
            description: ORIGIN_DESCRIPTION.to_string(),
            created_at: stamp,
        };

        return Ok(UpsertPlan {
            record: incoming,
            history: Vec::new(),
            version: Some(version),
            outcome: UpsertOutcome::Inserted,
        });
    };

    if incoming.version > 0 && incoming.version != existing.version {
        bail!(
            "version conflict for repository '{}': expected version {}, stored version is {}",
            existing.id,
            incoming.version,
            existing.version
        );
    }

    let mut history: Vec<HistoryEntry> = existing
        .tracked_fields()
        .into_iter()
        .zip(incoming.tracked_fields())
        .filter(|((_, old), (_, new))| old != new)
        .map(|((field, old_value), (_, new_value))| HistoryEntry {
            repo_id: existing.id.clone(),
            field: field.to_string(),
            old_value,
            new_value,
            changed_at: stamp.clone(),
            actor: actor.map(String::from),
        })
        .collect();

    for ((field, old), (_, new)) in existing.user_fields().into_iter().zip(incoming.user_fields()) {
        if let Some(new) = new
            && old.unwrap_or_default() != new
        {
            history.push(HistoryEntry {
                repo_id: existing.id.clone(),
                field: field.to_string(),
                old_value: old.unwrap_or_default().to_string(),
                new_value: new.to_string(),
                changed_at: stamp.clone(),
                actor: actor.map(String::from),
            });
        }
    }

    if incoming.tags.is_none() {
        incoming.tags.clone_from(&existing.tags);
    }
    if incoming.notes.is_none() {
        incoming.notes.clone_from(&existing.notes);
    }

    let changed: Vec<String> = history.iter().map(|h| h.field.clone()).collect();
    let (description, outcome) = if changed.is_empty() {
        incoming.version = existing.version;
        ("Refreshed from GitHub: no changes".to_string(), UpsertOutcome::Unchanged)
    } else {
        incoming.version = existing.version + 1;
        (format!("Refreshed from GitHub: {}", changed.join(", ")), UpsertOutcome::Updated { changed })
    };

    let version = VersionEntry {
        repo_id: existing.id.clone(),
        version_number: dated_version_number(now, version_numbers),
        release_date: Some(stamp.clone()),
        description,
        created_at: stamp,
    };

    Ok(UpsertPlan {
        record: incoming,
        history,
        version: Some(version),
        outcome,
    })
}

/// `YYYY.MM.DD` for `now`, suffixed with `-2`, `-3`, ... when already taken.
#[must_use]
pub fn dated_version_number(now: DateTime<Utc>, taken: &[String]) -> String {
    let base = now.format("%Y.%m.%d").to_string();
    if !taken.contains(&base) {
        return base;
    }

    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Appends `tag` to a comma-separated list unless already present.
///
/// Returns `None` when nothing changes.
fn append_tag(tags: Option<&str>, tag: &str) -> Option<String> {
    let mut list: Vec<&str> = tags.unwrap_or_default().split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
    if list.contains(&tag) {
        return None;
    }

    list.push(tag);
    Some(list.join(","))
}

fn append_note(notes: Option<&str>, note: &str) -> String {
    match notes {
        Some(existing) if !existing.is_empty() => format!("{existing}\n{note}"),
        _ => note.to_string(),
    }
}

fn new_comment(id: &RepoId, comment: &str, author: Option<&str>) -> Result<CommentEntry> {
    check_user_text("comment", comment)?;
    let author = author.map(str::trim).filter(|a| !a.is_empty()).unwrap_or(ANONYMOUS_AUTHOR);

    Ok(CommentEntry {
        repo_id: id.clone(),
        comment: comment.to_string(),
        author: author.to_string(),
        created_at: now_iso(),
    })
}

fn check_user_text(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{kind} must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ContributorCount;
    use chrono::TimeZone;

    fn id() -> RepoId {
        RepoId::parse("octocat/Hello-World").unwrap()
    }

    fn record() -> RepositoryRecord {
        RepositoryRecord {
            description: "My first repository".into(),
            stars: 10,
            topics: vec!["demo".into()],
            ..RepositoryRecord::new(id())
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_insert_plan() {
        let plan = plan_upsert(None, record(), &[], Some("alice"), at(1)).unwrap();

        assert_eq!(plan.outcome, UpsertOutcome::Inserted);
        assert_eq!(plan.record.version, 1);
        assert_eq!(plan.record.last_synced.as_deref(), Some("2024-03-01T12:00:00Z"));
        assert!(plan.history.is_empty());

        let version = plan.version.unwrap();
        assert_eq!(version.version_number, "origin");
        assert_eq!(version.description, "Initial version");
    }

    #[test]
    fn test_identical_plan_is_unchanged() {
        let stored = plan_upsert(None, record(), &[], None, at(1)).unwrap().record;
        let plan = plan_upsert(Some(&stored), record(), &["origin".into()], None, at(2)).unwrap();

        assert_eq!(plan.outcome, UpsertOutcome::Unchanged);
        assert!(plan.history.is_empty());
        assert_eq!(plan.record.version, 1);

        let version = plan.version.unwrap();
        assert_eq!(version.version_number, "2024.03.02");
        assert_eq!(version.description, "Refreshed from GitHub: no changes");
        assert_eq!(plan.record.last_synced.as_deref(), Some("2024-03-02T12:00:00Z"));
    }

    #[test]
    fn test_changed_fields_produce_history() {
        let stored = plan_upsert(None, record(), &[], None, at(1)).unwrap().record;
        let incoming = RepositoryRecord {
            stars: 50,
            contributors: ContributorCount::capped(),
            ..record()
        };

        let plan = plan_upsert(Some(&stored), incoming, &["origin".into()], Some("bob"), at(2)).unwrap();

        assert_eq!(
            plan.outcome,
            UpsertOutcome::Updated {
                changed: vec!["stars".into(), "contributors".into()]
            }
        );
        assert_eq!(plan.record.version, 2);

        let stars = &plan.history[0];
        assert_eq!((stars.old_value.as_str(), stars.new_value.as_str()), ("10", "50"));
        assert_eq!(stars.actor.as_deref(), Some("bob"));
        assert_eq!(plan.history[1].new_value, "5000+");
        assert_eq!(plan.version.unwrap().version_number, "2024.03.02");
    }

    #[test]
    fn test_user_fields_are_preserved_when_absent() {
        let mut stored = plan_upsert(None, record(), &[], None, at(1)).unwrap().record;
        stored.tags = Some("rust,cli".into());
        stored.notes = Some("keep me".into());

        let plan = plan_upsert(Some(&stored), record(), &[], None, at(2)).unwrap();
        assert_eq!(plan.outcome, UpsertOutcome::Unchanged);
        assert_eq!(plan.record.tags.as_deref(), Some("rust,cli"));
        assert_eq!(plan.record.notes.as_deref(), Some("keep me"));
    }

    #[test]
    fn test_supplied_user_fields_are_diffed() {
        let stored = plan_upsert(None, record(), &[], None, at(1)).unwrap().record;
        let incoming = RepositoryRecord {
            tags: Some("fav".into()),
            ..record()
        };

        let plan = plan_upsert(Some(&stored), incoming, &[], None, at(2)).unwrap();
        assert_eq!(plan.history.len(), 1);
        assert_eq!(plan.history[0].field, "tags");
        assert_eq!(plan.history[0].old_value, "");
        assert_eq!(plan.record.tags.as_deref(), Some("fav"));
    }

    #[test]
    fn test_version_conflict() {
        let stored = plan_upsert(None, record(), &[], None, at(1)).unwrap().record;

        let stale = RepositoryRecord { version: 7, ..record() };
        assert!(plan_upsert(Some(&stored), stale, &[], None, at(2)).is_err());

        let current = RepositoryRecord { version: 1, ..record() };
        let _ = plan_upsert(Some(&stored), current, &[], None, at(2)).unwrap();
    }

    #[test]
    fn test_dated_version_number_suffixes() {
        assert_eq!(dated_version_number(at(5), &[]), "2024.03.05");

        let taken = vec!["2024.03.05".to_string(), "2024.03.05-2".to_string()];
        assert_eq!(dated_version_number(at(5), &taken), "2024.03.05-3");
        assert_eq!(dated_version_number(at(6), &taken), "2024.03.06");
    }

    #[test]
    fn test_append_tag() {
        assert_eq!(append_tag(None, "rust").as_deref(), Some("rust"));
        assert_eq!(append_tag(Some("rust"), "cli").as_deref(), Some("rust,cli"));
        assert!(append_tag(Some("rust, cli"), "cli").is_none());
    }

    #[test]
    fn test_append_note() {
        assert_eq!(append_note(None, "first"), "first");
        assert_eq!(append_note(Some("first"), "second"), "first\nsecond");
    }
}
