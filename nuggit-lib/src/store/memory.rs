use super::{RepositoryStore, UpsertOutcome, append_note, append_tag, check_user_text, new_comment, plan_upsert};
use crate::record::{CommentEntry, HistoryEntry, RepositoryRecord, VersionEntry};
use crate::timestamp::now_iso;
use crate::{RepoId, Result};
use chrono::Utc;
use ohno::bail;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<RepoId, RepositoryRecord>,

    /// Oldest first.
    history: Vec<HistoryEntry>,

    versions: Vec<VersionEntry>,

    /// Oldest first.
    comments: Vec<CommentEntry>,
}

impl State {
    fn record_mut(&mut self, id: &RepoId) -> Result<&mut RepositoryRecord> {
        match self.records.get_mut(id) {
            Some(record) => Ok(record),
            None => bail!("repository '{id}' is not tracked"),
        }
    }

    fn version_numbers(&self, id: &RepoId) -> Vec<String> {
        self.versions
            .iter()
            .filter(|v| v.repo_id == *id)
            .map(|v| v.version_number.clone())
            .collect()
    }
}

/// A [`RepositoryStore`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("lock not poisoned")
    }
}

impl RepositoryStore for MemoryStore {
    fn get_existing(&self, id: &RepoId) -> Result<Option<RepositoryRecord>> {
        Ok(self.lock().records.get(id).cloned())
    }

    fn upsert(&self, record: RepositoryRecord, actor: Option<&str>) -> Result<UpsertOutcome> {
        let mut state = self.lock();

        let id = record.id.clone();
        let numbers = state.version_numbers(&id);
        let plan = plan_upsert(state.records.get(&id), record, &numbers, actor, Utc::now())?;

        state.history.extend(plan.history);
        state.versions.extend(plan.version);
        let _ = state.records.insert(plan.record.id.clone(), plan.record);

        Ok(plan.outcome)
    }

    fn list(&self) -> Result<Vec<RepositoryRecord>> {
        Ok(self.lock().records.values().cloned().collect())
    }

    fn history(&self, id: &RepoId) -> Result<Vec<HistoryEntry>> {
        let state = self.lock();
        Ok(state.history.iter().rev().filter(|h| h.repo_id == *id).cloned().collect())
    }

    fn versions(&self, id: &RepoId) -> Result<Vec<VersionEntry>> {
        let state = self.lock();
        Ok(state.versions.iter().filter(|v| v.repo_id == *id).cloned().collect())
    }

    fn delete(&self, id: &RepoId) -> Result<bool> {
        let mut state = self.lock();
        if state.records.remove(id).is_none() {
            return Ok(false);
        }

        state.history.retain(|h| h.repo_id != *id);
        state.versions.retain(|v| v.repo_id != *id);
        state.comments.retain(|c| c.repo_id != *id);
        Ok(true)
    }

    fn add_tag(&self, id: &RepoId, tag: &str) -> Result<()> {
        check_user_text("tag", tag)?;
        let mut state = self.lock();
        let record = state.record_mut(id)?;

        if let Some(tags) = append_tag(record.tags.as_deref(), tag.trim()) {
            record.tags = Some(tags);
        }
        Ok(())
    }

    fn add_note(&self, id: &RepoId, note: &str) -> Result<()> {
        check_user_text("note", note)?;
        let mut state = self.lock();
        let record = state.record_mut(id)?;

        record.notes = Some(append_note(record.notes.as_deref(), note));
        Ok(())
    }

    fn add_version(&self, id: &RepoId, version_number: &str, release_date: Option<&str>, description: &str) -> Result<VersionEntry> {
        check_user_text("version number", version_number)?;
        let mut state = self.lock();
        let _ = state.record_mut(id)?;

        if state.version_numbers(id).iter().any(|n| n == version_number) {
            bail!("version '{version_number}' already exists for repository '{id}'");
        }

        let entry = VersionEntry {
            repo_id: id.clone(),
            version_number: version_number.to_string(),
            release_date: release_date.map(String::from),
            description: description.to_string(),
            created_at: now_iso(),
        };
        state.versions.push(entry.clone());
        Ok(entry)
    }

    fn add_comment(&self, id: &RepoId, comment: &str, author: Option<&str>) -> Result<CommentEntry> {
        let entry = new_comment(id, comment, author)?;
        let mut state = self.lock();
        let _ = state.record_mut(id)?;

        state.comments.push(entry.clone());
        Ok(entry)
    }

    fn comments(&self, id: &RepoId) -> Result<Vec<CommentEntry>> {
        let state = self.lock();
        Ok(state.comments.iter().rev().filter(|c| c.repo_id == *id).cloned().collect())
    }
}
