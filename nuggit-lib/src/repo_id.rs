use crate::Result;
use core::fmt::{Display, Formatter};
use core::str::FromStr;
use ohno::bail;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// Identifies a GitHub repository as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId {
    owner: Arc<str>,
    name: Arc<str>,
}

impl RepoId {
    /// Accepts `owner/name`, `https://github.com/owner/name[/...]`, or `github.com/owner/name`.
    ///
    /// A trailing `.git` on the name is stripped.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            bail!("repository identifier is empty");
        }

        if input.contains("://") {
            let url = Url::parse(input).map_err(|e| ohno::app_err!("invalid repository URL '{input}': {e}"))?;
            return Self::from_url(&url);
        }

        let path = input.strip_prefix("github.com/").unwrap_or(input);
        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) => Self::from_parts(owner, name),
            _ => bail!("invalid repository identifier '{input}': expected 'owner/name'"),
        }
    }

    fn from_url(url: &Url) -> Result<Self> {
        if url.host_str().is_some_and(|h| h != "github.com" && h != "www.github.com") {
            bail!("not a GitHub repository URL: {url}");
        }

        let segments: Vec<_> = url.path_segments().map(Iterator::collect).unwrap_or_default();
        match segments.as_slice() {
            [owner, name, ..] => Self::from_parts(owner, name),
            _ => bail!("invalid repository URL format: {url}"),
        }
    }

    fn from_parts(owner: &str, name: &str) -> Result<Self> {
        let name = name.trim_end_matches(".git");
        if owner.is_empty() || name.is_empty() {
            bail!("invalid repository identifier: empty owner or name in '{owner}/{name}'");
        }

        let valid = |s: &str| s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid(owner) || !valid(name) {
            bail!("invalid characters in repository identifier '{owner}/{name}'");
        }

        Ok(Self {
            owner: Arc::from(owner),
            name: Arc::from(name),
        })
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The repository's page on github.com.
    #[must_use]
    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl Display for RepoId {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = ohno::AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RepoId {
    type Error = ohno::AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RepoId> for String {
    fn from(value: RepoId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_owner_name() {
        let id = RepoId::parse("octocat/Hello-World").unwrap();
        assert_eq!(id.owner(), "octocat");
        assert_eq!(id.name(), "Hello-World");
        assert_eq!(id.to_string(), "octocat/Hello-World");
        assert_eq!(id.html_url(), "https://github.com/octocat/Hello-World");
    }

    #[test]
    fn test_parse_github_url() {
        let id = RepoId::parse("https://github.com/tokio-rs/tokio").unwrap();
        assert_eq!(id.to_string(), "tokio-rs/tokio");
    }

    #[test]
    fn test_parse_url_with_git_extension() {
        let id = RepoId::parse("https://github.com/serde-rs/serde.git").unwrap();
        assert_eq!(id.name(), "serde");
    }

    #[test]
    fn test_parse_url_with_additional_path_segments() {
        let id = RepoId::parse("https://github.com/tokio-rs/tokio/tree/master/tokio-util").unwrap();
        assert_eq!(id.to_string(), "tokio-rs/tokio");
    }

    #[test]
    fn test_parse_host_prefix() {
        let id = RepoId::parse("github.com/rust-lang/rust").unwrap();
        assert_eq!(id.to_string(), "rust-lang/rust");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for input in ["", "octocat", "a/b/c", "/b", "a/", "https://github.com/only", "https://gitlab.com/a/b", "a b/c"] {
            assert!(RepoId::parse(input).is_err(), "accepted '{input}'");
        }
    }

    #[test]
    fn test_serde_as_string() {
        let id: RepoId = serde_json::from_str(r#""a/b""#).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""a/b""#);
        assert!(serde_json::from_str::<RepoId>(r#""nope""#).is_err());
    }
}
