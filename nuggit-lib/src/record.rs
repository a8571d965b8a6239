//! The normalized repository snapshot and the rows recorded about it.

use crate::RepoId;
use core::fmt::{Display, Formatter};
use core::str::FromStr;
use ohno::app_err;
use serde::{Deserialize, Serialize};

/// Contributor count used when the exact number cannot be retrieved.
pub const CONTRIBUTORS_CAP: u64 = 5000;

/// Number of contributors, possibly only known as a lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContributorCount {
    Exact(u64),

    /// At least this many; rendered with a trailing `+`.
    AtLeast(u64),
}

impl ContributorCount {
    /// The sentinel used when contributors could not be counted.
    #[must_use]
    pub const fn capped() -> Self {
        Self::AtLeast(CONTRIBUTORS_CAP)
    }
}

impl Default for ContributorCount {
    fn default() -> Self {
        Self::Exact(0)
    }
}

impl Display for ContributorCount {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "{n}"),
            Self::AtLeast(n) => write!(f, "{n}+"),
        }
    }
}

impl FromStr for ContributorCount {
    type Err = ohno::AppError;

    fn from_str(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        let (digits, at_least) = s.strip_suffix('+').map_or((s, false), |d| (d, true));
        let n = digits.parse().map_err(|_parse_error| app_err!("invalid contributor count '{s}'"))?;
        Ok(if at_least { Self::AtLeast(n) } else { Self::Exact(n) })
    }
}

impl TryFrom<String> for ContributorCount {
    type Error = ohno::AppError;

    fn try_from(value: String) -> crate::Result<Self> {
        value.parse()
    }
}

impl From<ContributorCount> for String {
    fn from(value: ContributorCount) -> Self {
        value.to_string()
    }
}

/// A point-in-time copy of a repository's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: RepoId,
    pub name: String,
    pub description: String,
    pub url: String,
    pub topics: Vec<String>,
    pub license: Option<String>,

    /// Timestamps in `YYYY-MM-DDTHH:MM:SSZ` form.
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub pushed_at: Option<String>,

    pub stars: u64,
    pub forks: u64,
    pub open_issues: u64,
    pub contributors: ContributorCount,
    pub commits: u64,
    pub latest_release: Option<String>,

    /// Comma-separated user tags. `None` leaves the stored value alone on upsert.
    pub tags: Option<String>,

    /// Newline-separated user notes. `None` leaves the stored value alone on upsert.
    pub notes: Option<String>,

    /// Optimistic concurrency counter; 0 means the caller does not care.
    pub version: u64,

    pub last_synced: Option<String>,
}

impl RepositoryRecord {
    /// An otherwise empty record for `id`.
    #[must_use]
    pub fn new(id: RepoId) -> Self {
        Self {
            name: id.name().to_string(),
            url: id.html_url(),
            id,
            description: String::new(),
            topics: Vec::new(),
            license: None,
            created_at: None,
            updated_at: None,
            pushed_at: None,
            stars: 0,
            forks: 0,
            open_issues: 0,
            contributors: ContributorCount::default(),
            commits: 0,
            latest_release: None,
            tags: None,
            notes: None,
            version: 0,
            last_synced: None,
        }
    }

    /// Topics as stored: comma-joined in their original order.
    #[must_use]
    pub fn topics_joined(&self) -> String {
        self.topics.join(", ")
    }

    /// The remote-owned fields compared between snapshots, rendered as strings.
    ///
    /// Absent values render as the empty string.
    #[must_use]
    pub fn tracked_fields(&self) -> Vec<(&'static str, String)> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();

        vec![
            ("name", self.name.clone()),
            ("description", self.description.clone()),
            ("url", self.url.clone()),
            ("topics", self.topics_joined()),
            ("license", opt(&self.license)),
            ("created_at", opt(&self.created_at)),
            ("updated_at", opt(&self.updated_at)),
            ("pushed_at", opt(&self.pushed_at)),
            ("stars", self.stars.to_string()),
            ("forks", self.forks.to_string()),
            ("open_issues", self.open_issues.to_string()),
            ("contributors", self.contributors.to_string()),
            ("commits", self.commits.to_string()),
            ("latest_release", opt(&self.latest_release)),
        ]
    }

    /// The user-owned fields, `None` when not supplied.
    #[must_use]
    pub fn user_fields(&self) -> [(&'static str, Option<&str>); 2] {
        [("tags", self.tags.as_deref()), ("notes", self.notes.as_deref())]
    }

    /// Splits a stored comma-joined topics string.
    #[must_use]
    pub fn split_topics(joined: &str) -> Vec<String> {
        joined
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }
}

/// One changed field between two stored snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub repo_id: RepoId,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub changed_at: String,

    /// Who triggered the change, when known.
    pub actor: Option<String>,
}

/// A named version of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub repo_id: RepoId,
    pub version_number: String,
    pub release_date: Option<String>,
    pub description: String,
    pub created_at: String,
}

impl VersionEntry {
    /// The fields that differ from `other`, as `(field, ours, theirs)`.
    ///
    /// An absent release date renders as the empty string.
    #[must_use]
    pub fn differences(&self, other: &Self) -> Vec<(&'static str, String, String)> {
        let fields = |v: &Self| {
            [
                ("version_number", v.version_number.clone()),
                ("release_date", v.release_date.clone().unwrap_or_default()),
                ("description", v.description.clone()),
                ("created_at", v.created_at.clone()),
            ]
        };

        fields(self)
            .into_iter()
            .zip(fields(other))
            .filter(|((_, ours), (_, theirs))| ours != theirs)
            .map(|((field, ours), (_, theirs))| (field, ours, theirs))
            .collect()
    }
}

/// A free-form comment left on a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEntry {
    pub repo_id: RepoId,
    pub comment: String,
    pub author: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RepositoryRecord {
        RepositoryRecord::new(RepoId::parse("octocat/Hello-World").unwrap())
    }

    #[test]
    fn test_contributor_count_display() {
        assert_eq!(ContributorCount::Exact(12).to_string(), "12");
        assert_eq!(ContributorCount::capped().to_string(), "5000+");
    }

    #[test]
    fn test_contributor_count_parse() {
        assert_eq!("12".parse::<ContributorCount>().unwrap(), ContributorCount::Exact(12));
        assert_eq!("5000+".parse::<ContributorCount>().unwrap(), ContributorCount::AtLeast(5000));
        assert!("many".parse::<ContributorCount>().is_err());
        assert!("+".parse::<ContributorCount>().is_err());
    }

    #[test]
    fn test_new_record_defaults() {
        let r = record();
        assert_eq!(r.name, "Hello-World");
        assert_eq!(r.url, "https://github.com/octocat/Hello-World");
        assert_eq!(r.version, 0);
        assert!(r.tags.is_none());
    }

    #[test]
    fn test_tracked_fields_render_absent_as_empty() {
        let r = RepositoryRecord {
            topics: vec!["a".into(), "b".into()],
            stars: 3,
            ..record()
        };

        let fields = r.tracked_fields();
        let get = |name: &str| fields.iter().find(|(f, _)| *f == name).map(|(_, v)| v.as_str()).unwrap();

        assert_eq!(get("topics"), "a, b");
        assert_eq!(get("license"), "");
        assert_eq!(get("stars"), "3");
        assert_eq!(get("contributors"), "0");
        assert!(fields.iter().all(|(f, _)| *f != "tags" && *f != "notes"));
    }

    #[test]
    fn test_version_differences() {
        let origin = VersionEntry {
            repo_id: RepoId::parse("a/b").unwrap(),
            version_number: "origin".into(),
            release_date: Some("2020-01-01T00:00:00Z".into()),
            description: "Initial version".into(),
            created_at: "2024-03-01T12:00:00Z".into(),
        };
        let named = VersionEntry {
            version_number: "v1.0.0".into(),
            release_date: None,
            description: "Initial version".into(),
            ..origin.clone()
        };

        assert_eq!(origin.differences(&named), vec![
            ("version_number", "origin".to_string(), "v1.0.0".to_string()),
            ("release_date", "2020-01-01T00:00:00Z".to_string(), String::new()),
        ]);
        assert!(origin.differences(&origin).is_empty());
    }

    #[test]
    fn test_split_topics() {
        assert_eq!(RepositoryRecord::split_topics("a, b,,c "), ["a", "b", "c"]);
        assert!(RepositoryRecord::split_topics("").is_empty());
    }

    #[test]
    fn test_record_serde() {
        let r = RepositoryRecord {
            contributors: ContributorCount::capped(),
            ..record()
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["contributors"], "5000+");
        assert_eq!(json["id"], "octocat/Hello-World");

        let back: RepositoryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
