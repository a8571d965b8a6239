//! Commands that read or edit the stored repositories without contacting GitHub.

use super::Host;
use super::common::{CommonArgs, Session};
use crate::record::{HistoryEntry, RepositoryRecord, VersionEntry};
use crate::store::RepositoryStore;
use crate::timestamp::to_utc_iso;
use crate::{RepoId, Result};
use clap::Parser;
use ohno::{app_err, bail};
use std::io::Write;

#[derive(Parser, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
pub struct RepoArgs {
    /// Repository as `owner/name` or a GitHub URL
    #[arg(value_name = "REPO")]
    pub repo: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
pub struct TagArgs {
    /// Repository as `owner/name` or a GitHub URL
    #[arg(value_name = "REPO")]
    pub repo: String,

    /// Tag to add
    #[arg(value_name = "TAG")]
    pub tag: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
pub struct NoteArgs {
    /// Repository as `owner/name` or a GitHub URL
    #[arg(value_name = "REPO")]
    pub repo: String,

    /// Note to append
    #[arg(value_name = "NOTE")]
    pub note: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
pub struct AddVersionArgs {
    /// Repository as `owner/name` or a GitHub URL
    #[arg(value_name = "REPO")]
    pub repo: String,

    /// Version number, unique per repository
    #[arg(value_name = "VERSION")]
    pub version: String,

    /// When the version was released (RFC 3339 or `YYYY-MM-DD`)
    #[arg(long, value_name = "DATE")]
    pub release_date: Option<String>,

    /// Description of the version
    #[arg(long, value_name = "TEXT", default_value = "")]
    pub description: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
pub struct CommentArgs {
    /// Repository as `owner/name` or a GitHub URL
    #[arg(value_name = "REPO")]
    pub repo: String,

    /// Comment text
    #[arg(value_name = "TEXT")]
    pub comment: String,

    /// Who wrote the comment (default is `Anonymous`)
    #[arg(long, value_name = "NAME")]
    pub author: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Repository as `owner/name` or a GitHub URL
    #[arg(value_name = "REPO")]
    pub repo: String,

    /// Version number to compare from
    #[arg(value_name = "V1")]
    pub from: String,

    /// Version number to compare to
    #[arg(value_name = "V2")]
    pub to: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// List all stored repositories
pub fn list_repositories<H: Host>(host: &mut H, args: &ListArgs) -> Result<()> {
    let session = Session::new(host, &args.common)?;
    let records = session.store.list()?;

    let mut out = String::new();
    if records.is_empty() {
        out.push_str("No repositories are tracked yet\n");
    } else {
        let width = records.iter().map(|r| r.id.to_string().len()).max().unwrap_or(0).max("REPOSITORY".len());
        out.push_str(&session.heading(&format!("{:width$}  {:>8}  {:>7}  {:>7}  LAST SYNCED", "REPOSITORY", "STARS", "FORKS", "VERSION")));
        out.push('\n');
        for r in &records {
            out.push_str(&format!(
                "{:width$}  {:>8}  {:>7}  {:>7}  {}\n",
                r.id.to_string(),
                r.stars,
                r.forks,
                r.version,
                r.last_synced.as_deref().unwrap_or("-")
            ));
        }
    }

    let _ = write!(session.host.output(), "{out}");
    Ok(())
}

/// Print every stored field of one repository
pub fn show_repository<H: Host>(host: &mut H, args: &RepoArgs) -> Result<()> {
    let id = RepoId::parse(&args.repo)?;
    let session = Session::new(host, &args.common)?;
    let record = tracked(&session, &id)?;

    let mut out = session.heading(&record.id.to_string());
    out.push('\n');
    for (field, value) in fields(&record) {
        out.push_str(&format!("  {field:<15} {value}\n"));
    }

    let _ = write!(session.host.output(), "{out}");
    Ok(())
}

/// Print the change history of one repository, newest first
pub fn show_history<H: Host>(host: &mut H, args: &RepoArgs) -> Result<()> {
    let id = RepoId::parse(&args.repo)?;
    let session = Session::new(host, &args.common)?;
    let _ = tracked(&session, &id)?;

    let mut out = String::new();
    let history = session.store.history(&id)?;
    if history.is_empty() {
        out.push_str(&format!("No changes recorded for {id}\n"));
    }
    for h in &history {
        let actor = h.actor.as_deref().map(|a| format!(" by {a}")).unwrap_or_default();
        out.push_str(&format!("{} {}: '{}' -> '{}'{actor}\n", h.changed_at, h.field, h.old_value, h.new_value));
    }

    let _ = write!(session.host.output(), "{out}");
    Ok(())
}

/// Print the recorded versions of one repository
pub fn show_versions<H: Host>(host: &mut H, args: &RepoArgs) -> Result<()> {
    let id = RepoId::parse(&args.repo)?;
    let session = Session::new(host, &args.common)?;
    let _ = tracked(&session, &id)?;

    let mut out = String::new();
    for v in session.store.versions(&id)? {
        let released = v.release_date.as_deref().unwrap_or("-");
        out.push_str(&format!("{:<14} released {released:<20}  {}\n", v.version_number, v.description));
    }

    let _ = write!(session.host.output(), "{out}");
    Ok(())
}

/// Record a named version of a repository
pub fn add_version<H: Host>(host: &mut H, args: &AddVersionArgs) -> Result<()> {
    let id = RepoId::parse(&args.repo)?;
    let release_date = args
        .release_date
        .as_deref()
        .map(|d| to_utc_iso(d).ok_or_else(|| app_err!("invalid release date '{d}'")))
        .transpose()?;

    let session = Session::new(host, &args.common)?;
    let entry = session
        .store
        .add_version(&id, &args.version, release_date.as_deref(), &args.description)?;

    let _ = writeln!(session.host.output(), "{id}: added version {}", entry.version_number);
    Ok(())
}

/// Append a tag to a repository
pub fn tag_repository<H: Host>(host: &mut H, args: &TagArgs) -> Result<()> {
    let id = RepoId::parse(&args.repo)?;
    let session = Session::new(host, &args.common)?;
    session.store.add_tag(&id, &args.tag)?;

    let tags = tracked(&session, &id)?.tags.unwrap_or_default();
    let _ = writeln!(session.host.output(), "{id}: tags are now '{tags}'");
    Ok(())
}

/// Append a note to a repository
pub fn note_repository<H: Host>(host: &mut H, args: &NoteArgs) -> Result<()> {
    let id = RepoId::parse(&args.repo)?;
    let session = Session::new(host, &args.common)?;
    session.store.add_note(&id, &args.note)?;

    let _ = writeln!(session.host.output(), "{id}: note added");
    Ok(())
}

/// Leave a comment on a repository
pub fn comment_repository<H: Host>(host: &mut H, args: &CommentArgs) -> Result<()> {
    let id = RepoId::parse(&args.repo)?;
    let session = Session::new(host, &args.common)?;
    let entry = session.store.add_comment(&id, &args.comment, args.author.as_deref())?;

    let _ = writeln!(session.host.output(), "{id}: comment added by {}", entry.author);
    Ok(())
}

/// Print the comments on one repository, newest first
pub fn show_comments<H: Host>(host: &mut H, args: &RepoArgs) -> Result<()> {
    let id = RepoId::parse(&args.repo)?;
    let session = Session::new(host, &args.common)?;
    let _ = tracked(&session, &id)?;

    let mut out = String::new();
    let comments = session.store.comments(&id)?;
    if comments.is_empty() {
        out.push_str(&format!("No comments on {id}\n"));
    }
    for c in &comments {
        out.push_str(&format!("{} {}: {}\n", c.created_at, c.author, c.comment));
    }

    let _ = write!(session.host.output(), "{out}");
    Ok(())
}

/// Compare two recorded versions of a repository
pub fn compare_versions<H: Host>(host: &mut H, args: &CompareArgs) -> Result<()> {
    let id = RepoId::parse(&args.repo)?;
    let session = Session::new(host, &args.common)?;
    let _ = tracked(&session, &id)?;

    let versions = session.store.versions(&id)?;
    let find = |number: &str| {
        versions
            .iter()
            .find(|v| v.version_number == number)
            .ok_or_else(|| app_err!("version '{number}' not found for repository '{id}'"))
    };
    let from = find(&args.from)?;
    let to = find(&args.to)?;

    let mut out = session.heading(&format!("{id}: {} -> {}", from.version_number, to.version_number));
    out.push('\n');
    for (field, ours, theirs) in from.differences(to) {
        out.push_str(&format!("  {field:<15} '{ours}' -> '{theirs}'\n"));
    }

    let history = session.store.history(&id)?;
    let changes = changes_between(&history, from, to);
    if changes.is_empty() {
        out.push_str("No field changes recorded between these versions\n");
    } else {
        out.push_str("Field changes recorded between these versions:\n");
        for h in changes {
            out.push_str(&format!("  {} {}: '{}' -> '{}'\n", h.changed_at, h.field, h.old_value, h.new_value));
        }
    }

    let _ = write!(session.host.output(), "{out}");
    Ok(())
}

/// Stop tracking a repository, discarding its history, versions and comments
pub fn delete_repository<H: Host>(host: &mut H, args: &RepoArgs) -> Result<()> {
    let id = RepoId::parse(&args.repo)?;
    let session = Session::new(host, &args.common)?;

    if !session.store.delete(&id)? {
        bail!("repository '{id}' is not tracked");
    }

    let _ = writeln!(session.host.output(), "{id}: deleted");
    Ok(())
}

fn tracked<H: Host>(session: &Session<'_, H>, id: &RepoId) -> Result<RepositoryRecord> {
    session
        .store
        .get_existing(id)?
        .ok_or_else(|| app_err!("repository '{id}' is not tracked"))
}

/// History entries recorded after the earlier version and up to the later one, oldest first.
///
/// `history` is newest first, as the store returns it.
fn changes_between<'h>(history: &'h [HistoryEntry], a: &VersionEntry, b: &VersionEntry) -> Vec<&'h HistoryEntry> {
    let (start, end) = if a.created_at <= b.created_at {
        (a.created_at.as_str(), b.created_at.as_str())
    } else {
        (b.created_at.as_str(), a.created_at.as_str())
    };

    history
        .iter()
        .rev()
        .filter(|h| h.changed_at.as_str() > start && h.changed_at.as_str() <= end)
        .collect()
}

fn fields(r: &RepositoryRecord) -> Vec<(&'static str, String)> {
    let mut fields = r.tracked_fields();
    fields.push(("tags", r.tags.clone().unwrap_or_default()));
    fields.push(("notes", r.notes.as_deref().unwrap_or_default().replace('\n', " | ")));
    fields.push(("version", r.version.to_string()));
    fields.push(("last_synced", r.last_synced.clone().unwrap_or_default()));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ContributorCount;

    #[test]
    fn test_fields_include_user_and_sync_state() {
        let r = RepositoryRecord {
            notes: Some("one\ntwo".into()),
            contributors: ContributorCount::capped(),
            version: 3,
            ..RepositoryRecord::new(RepoId::parse("a/b").unwrap())
        };

        let fields = fields(&r);
        let get = |name: &str| fields.iter().find(|(f, _)| *f == name).map(|(_, v)| v.clone()).unwrap();

        assert_eq!(get("notes"), "one | two");
        assert_eq!(get("contributors"), "5000+");
        assert_eq!(get("version"), "3");
        assert_eq!(get("tags"), "");
    }

    fn version(number: &str, created_at: &str) -> VersionEntry {
        VersionEntry {
            repo_id: RepoId::parse("a/b").unwrap(),
            version_number: number.into(),
            release_date: None,
            description: String::new(),
            created_at: created_at.into(),
        }
    }

    fn change(field: &str, changed_at: &str) -> HistoryEntry {
        HistoryEntry {
            repo_id: RepoId::parse("a/b").unwrap(),
            field: field.into(),
            old_value: "1".into(),
            new_value: "2".into(),
            changed_at: changed_at.into(),
            actor: None,
        }
    }

    #[test]
    fn test_changes_between_versions() {
        let history = [
            change("forks", "2024-03-03T12:00:00Z"),
            change("stars", "2024-03-02T12:00:00Z"),
            change("license", "2024-03-01T12:00:00Z"),
        ];
        let origin = version("origin", "2024-03-01T12:00:00Z");
        let dated = version("2024.03.02", "2024-03-02T12:00:00Z");

        let fields = |changes: Vec<&HistoryEntry>| changes.into_iter().map(|h| h.field.clone()).collect::<Vec<_>>();
        assert_eq!(fields(changes_between(&history, &origin, &dated)), ["stars"]);
        assert_eq!(fields(changes_between(&history, &dated, &origin)), ["stars"], "order of the versions does not matter");

        let latest = version("2024.03.03", "2024-03-03T12:00:00Z");
        assert_eq!(fields(changes_between(&history, &origin, &latest)), ["stars", "forks"]);
        assert!(changes_between(&history, &latest, &latest).is_empty());
    }
}
