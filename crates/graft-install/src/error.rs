//! Install pipeline error types.
//!
//! Each stage has its own error enum. [`InstallError`] is what the inbound
//! operations return; [`InstallError::kind`] gives a stable tag for hosts
//! that translate failures into their own messages.

use std::path::PathBuf;

use graft_storage::StorageError;

/// Boxed underlying cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from parsing repository input.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The input was blank.
    #[error("repository input is empty")]
    EmptyInput,

    /// No accepted form matched, or a segment contains characters outside
    /// the slug charset.
    #[error("invalid repository '{input}': expected owner/repo, an https URL, or git@host:owner/repo")]
    InvalidFormat {
        /// The trimmed input.
        input: String,
    },

    /// The git ref is unusable.
    #[error("invalid git ref: {message}")]
    InvalidRef {
        /// What is wrong with it.
        message: String,
    },
}

/// Errors from downloading an archive.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request could not be completed.
    #[error("archive request failed: {message}")]
    Transport {
        /// Short description.
        message: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// The server answered with something other than 200.
    #[error("archive request returned HTTP {code}")]
    HttpStatus {
        /// Response status code.
        code: u16,
    },

    /// The server answered 200 with no body.
    #[error("archive response body is empty")]
    EmptyBody,

    /// The archive is larger than the configured limit.
    #[error("archive too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Size seen so far (or announced).
        size: u64,
        /// Configured limit.
        limit: u64,
    },
}

impl FetchError {
    /// Wrap an underlying transport failure.
    pub fn transport(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: source.into(),
        }
    }
}

/// Errors from writing and extracting an archive.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    /// No temporary file could be allocated.
    #[error("failed to create temporary archive file")]
    TmpCreate(#[source] std::io::Error),

    /// The archive bytes did not land on disk intact.
    #[error("failed to persist archive to {path}: {message}")]
    Persist {
        /// Temporary file path.
        path: PathBuf,
        /// What went wrong.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<std::io::Error>,
    },

    /// The archive is corrupt, unsupported, or unsafe to extract.
    #[error("extraction failed: {message}")]
    Extract {
        /// What went wrong.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Extraction created no new directory in the install root.
    #[error("extraction produced no new folder in the install root")]
    FolderNotFound,
}

impl MaterializeError {
    pub(crate) fn extract(message: impl Into<String>) -> Self {
        Self::Extract {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn extract_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Extract {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Errors from the collision policy and the final move.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The target folder exists and overwriting was not requested.
    #[error("plugin folder '{folder}' already exists")]
    FolderExists {
        /// Target folder name.
        folder: String,
    },

    /// A registered plugin lives in the target folder and overwriting was
    /// not requested.
    #[error("plugin '{plugin}' is already registered in folder '{folder}'")]
    AlreadyRegistered {
        /// Target folder name.
        folder: String,
        /// Registered plugin path, relative to the install root.
        plugin: String,
    },

    /// Renaming into place failed.
    #[error("failed to move {from} to {to}")]
    MoveFailed {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// The per-folder install lock could not be taken.
    #[error("failed to lock {path}")]
    LockFailed {
        /// Lock file path.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by [`Installer`](crate::Installer) operations.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Repository input was rejected.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The archive could not be downloaded.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The archive could not be written or extracted.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    /// The install was refused or could not be committed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Update was requested for a folder with no recorded repository.
    #[error("no GitHub repository is associated with plugin folder '{folder}'")]
    NoMapping {
        /// Folder name that was looked up.
        folder: String,
    },

    /// The folder name given to update is not a valid slug.
    #[error("invalid plugin folder name '{folder}'")]
    InvalidFolderName {
        /// The rejected name.
        folder: String,
    },

    /// The repository mapping could not be read or written.
    #[error("repository mapping error: {0}")]
    Mapping(#[from] StorageError),
}

impl InstallError {
    /// Stable snake_case tag for this failure.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(e) => match e {
                ParseError::EmptyInput => "empty_input",
                ParseError::InvalidFormat { .. } => "invalid_format",
                ParseError::InvalidRef { .. } => "invalid_ref",
            },
            Self::Fetch(e) => match e {
                FetchError::Transport { .. } => "transport",
                FetchError::HttpStatus { .. } => "http_status",
                FetchError::EmptyBody => "empty_body",
                FetchError::TooLarge { .. } => "too_large",
            },
            Self::Materialize(e) => match e {
                MaterializeError::TmpCreate(_) => "tmp_create",
                MaterializeError::Persist { .. } => "persist",
                MaterializeError::Extract { .. } => "extract",
                MaterializeError::FolderNotFound => "folder_not_found",
            },
            Self::Resolve(e) => match e {
                ResolveError::FolderExists { .. } => "folder_exists",
                ResolveError::AlreadyRegistered { .. } => "already_registered",
                ResolveError::MoveFailed { .. } => "move_failed",
                ResolveError::LockFailed { .. } => "lock_failed",
            },
            Self::NoMapping { .. } => "no_mapping",
            Self::InvalidFolderName { .. } => "invalid_folder_name",
            Self::Mapping(_) => "storage",
        }
    }
}

/// Result type for install operations.
pub type InstallResult<T> = Result<T, InstallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(InstallError::from(ParseError::EmptyInput).kind(), "empty_input");
        assert_eq!(
            InstallError::from(FetchError::HttpStatus { code: 404 }).kind(),
            "http_status"
        );
        assert_eq!(
            InstallError::from(MaterializeError::FolderNotFound).kind(),
            "folder_not_found"
        );
        assert_eq!(
            InstallError::from(ResolveError::FolderExists {
                folder: "x".into()
            })
            .kind(),
            "folder_exists"
        );
        assert_eq!(
            InstallError::NoMapping {
                folder: "x".into()
            }
            .kind(),
            "no_mapping"
        );
    }

    #[test]
    fn messages_carry_context() {
        let err = InstallError::from(FetchError::HttpStatus { code: 404 });
        assert_eq!(err.to_string(), "archive request returned HTTP 404");

        let err = InstallError::NoMapping {
            folder: "hello-world".into(),
        };
        assert!(err.to_string().contains("hello-world"));
    }

    #[test]
    fn transport_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = FetchError::transport("connect failed", io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "refused");
    }
}
