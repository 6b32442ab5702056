//! Repository input parsing.

use std::fmt;

use crate::error::ParseError;

/// Ref used when the caller does not name one.
pub const DEFAULT_REF: &str = "HEAD";

const MAX_REF_LEN: usize = 256;

/// Canonical `{owner, repo}` pair.
///
/// Both segments are non-empty, lowercase, and drawn from `[a-z0-9_-]`.
/// Values can only be built through [`parse`](Self::parse) or
/// [`from_parts`](Self::from_parts).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryReference {
    owner: String,
    repo: String,
}

impl RepositoryReference {
    /// Parse free-form repository input.
    ///
    /// Accepted, in priority order:
    /// - `git@host:owner/repo`
    /// - `https://host/owner/repo` (or `http://`)
    /// - `owner/repo`
    ///
    /// Surrounding whitespace, one trailing `/` and a trailing `.git` are
    /// ignored. Segments are lowercased.
    ///
    /// # Errors
    ///
    /// [`ParseError::EmptyInput`] for blank input, [`ParseError::InvalidFormat`]
    /// when no form matches or a segment holds characters outside the slug
    /// charset.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let path = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let path = path.strip_suffix(".git").unwrap_or(path);

        let invalid = || ParseError::InvalidFormat {
            input: trimmed.to_string(),
        };

        let (owner, repo) = split_ssh(path)
            .or_else(|| split_https(path))
            .or_else(|| split_bare(path))
            .ok_or_else(invalid)?;

        Self::from_parts(owner, repo).map_err(|_| invalid())
    }

    /// Build a reference from already-separated segments.
    ///
    /// # Errors
    ///
    /// [`ParseError::InvalidFormat`] if either segment is not a valid slug.
    pub fn from_parts(owner: &str, repo: &str) -> Result<Self, ParseError> {
        let owner = owner.to_ascii_lowercase();
        let repo = repo.to_ascii_lowercase();
        if !is_slug(&owner) || !is_slug(&repo) {
            return Err(ParseError::InvalidFormat {
                input: format!("{owner}/{repo}"),
            });
        }
        Ok(Self { owner, repo })
    }

    /// Repository owner (user or organization).
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name. Also the installed folder name.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// `git@host:owner/repo`
fn split_ssh(input: &str) -> Option<(&str, &str)> {
    let rest = input.strip_prefix("git@")?;
    let (host, path) = rest.split_once(':')?;
    if host.is_empty() {
        return None;
    }
    split_pair(path)
}

/// `https://host/owner/repo`
fn split_https(input: &str) -> Option<(&str, &str)> {
    let rest = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))?;
    let (host, path) = rest.split_once('/')?;
    if host.is_empty() {
        return None;
    }
    split_pair(path)
}

/// `owner/repo`
fn split_bare(input: &str) -> Option<(&str, &str)> {
    if input.contains("://") || input.starts_with("git@") {
        return None;
    }
    split_pair(input)
}

/// Exactly two non-empty `/`-separated segments.
fn split_pair(path: &str) -> Option<(&str, &str)> {
    let (owner, repo) = path.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}

/// Whether `value` is a non-empty run of `[a-z0-9_-]`.
#[must_use]
pub fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_'))
}

/// Normalize an optional git ref.
///
/// Blank means [`DEFAULT_REF`]. Any other character is allowed (the fetcher
/// percent-encodes it) except control characters.
///
/// # Errors
///
/// [`ParseError::InvalidRef`] for refs longer than 256 bytes, containing
/// control characters, or consisting of `.` or `..`.
pub fn normalize_ref(git_ref: Option<&str>) -> Result<String, ParseError> {
    let trimmed = git_ref.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Ok(DEFAULT_REF.to_string());
    }
    if trimmed.len() > MAX_REF_LEN {
        return Err(ParseError::InvalidRef {
            message: format!("must be at most {MAX_REF_LEN} bytes, got {}", trimmed.len()),
        });
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ParseError::InvalidRef {
            message: "contains control characters".to_string(),
        });
    }
    if trimmed == "." || trimmed == ".." {
        return Err(ParseError::InvalidRef {
            message: format!("'{trimmed}' is not a ref"),
        });
    }
    Ok(trimmed.to_string())
}
