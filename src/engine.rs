//! Contract with the versioned-dataset engine.
//!
//! The engine owns content-addressed storage, commits, tags and working-tree
//! inspection. Commit identity is always passed explicitly, never taken from
//! the invoking user or from process-wide environment.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::ResultEvent;
use crate::error::CloneError;
use crate::model::{ContentKey, FileRecord};

pub const ACTION_CREATE: &str = "create";
pub const ACTION_ADDURLS: &str = "addurls";
pub const ACTION_SAVE: &str = "save";

/// Stand-in for an unspecified date; git reads an empty date as "now" and
/// refuses timestamp zero.
pub const UNSPECIFIED_GIT_DATE: &str = "1970-01-01T00:00:01+00:00";

/// Author and committer of a commit; both are always identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
    /// `None` leaves the date unspecified, never filled in from the clock.
    pub date: Option<String>,
}

impl CommitIdentity {
    /// Variables describing this identity to git, scoped to one child process.
    pub fn git_env(&self) -> [(&'static str, String); 6] {
        let date = self
            .date
            .clone()
            .unwrap_or_else(|| UNSPECIFIED_GIT_DATE.to_string());
        [
            ("GIT_AUTHOR_NAME", self.name.clone()),
            ("GIT_AUTHOR_EMAIL", self.email.clone()),
            ("GIT_AUTHOR_DATE", date.clone()),
            ("GIT_COMMITTER_NAME", self.name.clone()),
            ("GIT_COMMITTER_EMAIL", self.email.clone()),
            ("GIT_COMMITTER_DATE", date),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    /// Committed with the dataset (`.datalad/config`).
    Branch,
    /// Local to this clone (`.git/config`).
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    path: Utf8PathBuf,
}

impl DatasetHandle {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Symlink,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Relative to the dataset root.
    pub path: Utf8PathBuf,
    pub kind: EntryKind,
}

/// A file to register by reference, without downloading its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRecord {
    pub url: String,
    pub name: String,
    pub key: Option<ContentKey>,
}

impl From<&FileRecord> for UrlRecord {
    fn from(record: &FileRecord) -> Self {
        Self {
            url: record.url.clone(),
            name: record.relative_name.clone(),
            key: record.content_key(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SaveRequest<'a> {
    pub message: Option<&'a str>,
    pub tag: Option<&'a str>,
    /// Fold the changes into the previous commit instead of adding one.
    pub amend: bool,
    pub identity: &'a CommitIdentity,
}

pub trait DatasetEngine {
    /// Initializes an empty dataset at `path`, with a root commit by `identity`.
    fn create(&self, path: &Utf8Path, identity: &CommitIdentity)
    -> Result<DatasetHandle, CloneError>;

    fn set_config(
        &self,
        dataset: &DatasetHandle,
        key: &str,
        value: &str,
        scope: ConfigScope,
    ) -> Result<(), CloneError>;

    /// Tracked and untracked entries of the working tree.
    fn status(&self, dataset: &DatasetHandle, recursive: bool)
    -> Result<Vec<StatusEntry>, CloneError>;

    /// Registers files by URL. A malformed record yields an error result for
    /// that record only.
    fn register_urls(
        &self,
        dataset: &DatasetHandle,
        records: &[UrlRecord],
    ) -> Result<Vec<ResultEvent>, CloneError>;

    /// Commits all working-tree changes and optionally tags the commit.
    fn save(
        &self,
        dataset: &DatasetHandle,
        request: &SaveRequest<'_>,
    ) -> Result<Vec<ResultEvent>, CloneError>;
}
