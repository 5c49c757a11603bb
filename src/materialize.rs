use std::collections::BTreeSet;
use std::fs;
use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::dataproxy::BucketClient;
use crate::domain::ResultEvent;
use crate::engine::{
    ACTION_ADDURLS, ACTION_SAVE, DatasetEngine, DatasetHandle, EntryKind, SaveRequest, UrlRecord,
};
use crate::error::CloneError;
use crate::kg::KgClient;
use crate::model::{DatasetVersion, FileRecord};
use crate::repository::FileRepositoryAdapter;

pub const ACTION_CLEAN: &str = "clean";
pub const ACTION_METADATA: &str = "metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOutcome {
    Committed,
    /// The version was understood but cannot be represented.
    Impossible,
    Failed,
}

#[derive(Debug, Clone)]
pub struct MaterializedVersion {
    pub outcome: VersionOutcome,
    pub events: Vec<ResultEvent>,
}

impl MaterializedVersion {
    fn stop(outcome: VersionOutcome, mut events: Vec<ResultEvent>, last: ResultEvent) -> Self {
        events.push(last);
        Self { outcome, events }
    }
}

/// Turns one dataset version into one commit of the target dataset.
pub struct Materializer<'a, K, B, E> {
    kg: &'a K,
    engine: &'a E,
    settings: &'a Settings,
    files: FileRepositoryAdapter<'a, K, B>,
}

impl<'a, K, B, E> Materializer<'a, K, B, E>
where
    K: KgClient,
    B: BucketClient,
    E: DatasetEngine,
{
    pub fn new(kg: &'a K, buckets: &'a B, engine: &'a E, settings: &'a Settings) -> Self {
        Self {
            kg,
            engine,
            settings,
            files: FileRepositoryAdapter::new(kg, buckets, settings),
        }
    }

    pub fn materialize(&self, dataset: &DatasetHandle, version: &DatasetVersion) -> MaterializedVersion {
        info!(
            version = %version.version_identifier,
            uuid = %version.id,
            "materializing dataset version"
        );
        let mut events = Vec::new();

        match self.clean_worktree(dataset) {
            Ok(removed) => {
                debug!(removed, "cleaned working tree");
                events.push(ResultEvent::ok(ACTION_CLEAN).with_path(dataset.path().to_string()));
            }
            Err(err) => {
                return MaterializedVersion::stop(
                    VersionOutcome::Failed,
                    events,
                    ResultEvent::error(ACTION_CLEAN, err.to_string()),
                );
            }
        }

        let records = match self.file_records(version) {
            Ok(records) => records,
            Err(CloneError::UnsupportedBackend { address }) => {
                return MaterializedVersion::stop(
                    VersionOutcome::Impossible,
                    events,
                    ResultEvent::impossible(
                        ACTION_ADDURLS,
                        format!("unsupported file repository backend: {address}"),
                    )
                    .with_path(dataset.path().to_string()),
                );
            }
            Err(err) => {
                return MaterializedVersion::stop(
                    VersionOutcome::Failed,
                    events,
                    ResultEvent::error(ACTION_ADDURLS, err.to_string()),
                );
            }
        };
        let url_records: Vec<UrlRecord> = records.iter().map(UrlRecord::from).collect();
        match self.engine.register_urls(dataset, &url_records) {
            Ok(registered) => {
                let failed = registered.iter().filter(|event| !event.is_ok()).count();
                events.extend(registered);
                if failed > 0 {
                    warn!(failed, "files could not be registered, version is not committed");
                    return Self::failed(events);
                }
            }
            Err(err) => {
                return MaterializedVersion::stop(
                    VersionOutcome::Failed,
                    events,
                    ResultEvent::error(ACTION_ADDURLS, err.to_string()),
                );
            }
        }

        if let Err(err) = self.apply_metadata(dataset, version) {
            return MaterializedVersion::stop(
                VersionOutcome::Failed,
                events,
                ResultEvent::error(ACTION_METADATA, err.to_string()),
            );
        }

        match self.commit(dataset, version) {
            Ok(saved) => {
                let committed = saved.iter().all(ResultEvent::is_ok);
                events.extend(saved);
                if committed {
                    MaterializedVersion {
                        outcome: VersionOutcome::Committed,
                        events,
                    }
                } else {
                    Self::failed(events)
                }
            }
            Err(err) => MaterializedVersion::stop(
                VersionOutcome::Failed,
                events,
                ResultEvent::error(ACTION_SAVE, CloneError::Commit(err.to_string()).to_string()),
            ),
        }
    }

    fn failed(events: Vec<ResultEvent>) -> MaterializedVersion {
        MaterializedVersion {
            outcome: VersionOutcome::Failed,
            events,
        }
    }

    /// Removes everything but dataset bookkeeping, so that the next file set
    /// fully replaces the previous one. Returns the number of removed entries.
    pub fn clean_worktree(&self, dataset: &DatasetHandle) -> Result<usize, CloneError> {
        let mut removed = 0;
        let mut parents = BTreeSet::new();
        for entry in self.engine.status(dataset, true)? {
            if is_bookkeeping(entry.path.as_str()) {
                continue;
            }
            parents.extend(
                entry
                    .path
                    .ancestors()
                    .skip(1)
                    .filter(|parent| !parent.as_str().is_empty())
                    .map(Utf8Path::to_path_buf),
            );
            let path = dataset.path().join(&entry.path);
            let result = match entry.kind {
                EntryKind::Directory => fs::remove_dir_all(path.as_std_path()),
                EntryKind::File | EntryKind::Symlink => fs::remove_file(path.as_std_path()),
            };
            match result {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(CloneError::Filesystem(format!("{path}: {err}")));
                }
            }
        }
        prune_empty_dirs(dataset.path(), parents)?;
        Ok(removed)
    }

    /// All file records of the version's repository, or the first error.
    pub fn file_records(&self, version: &DatasetVersion) -> Result<Vec<FileRecord>, CloneError> {
        let repository_id = version.repository.ok_or_else(|| {
            CloneError::MalformedRecord(format!(
                "dataset version {} has no file repository",
                version.id
            ))
        })?;
        let repository = self
            .kg
            .file_repository(&repository_id)?
            .ok_or_else(|| CloneError::NotFound(repository_id.to_string()))?;
        debug!(repository = %repository.iri, "listing file repository");
        self.files.iterate(&repository)?.collect()
    }

    /// Per-version metadata beyond the file set. Nothing is recorded yet.
    pub fn apply_metadata(
        &self,
        _dataset: &DatasetHandle,
        _version: &DatasetVersion,
    ) -> Result<(), CloneError> {
        Ok(())
    }

    fn commit(
        &self,
        dataset: &DatasetHandle,
        version: &DatasetVersion,
    ) -> Result<Vec<ResultEvent>, CloneError> {
        let identity = self.settings.identity(version.release_date.as_ref());
        self.engine.save(
            dataset,
            &SaveRequest {
                message: Some(&version.version_innovation),
                tag: Some(&version.version_identifier),
                amend: false,
                identity: &identity,
            },
        )
    }
}

/// Removes the directories in `candidates` that are left empty, deepest first.
fn prune_empty_dirs(root: &Utf8Path, candidates: BTreeSet<Utf8PathBuf>) -> Result<(), CloneError> {
    // a directory sorts before everything below it
    for relative in candidates.into_iter().rev() {
        let dir = root.join(&relative);
        let empty = match fs::read_dir(dir.as_std_path()) {
            Ok(mut entries) => entries.next().is_none(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(CloneError::Filesystem(format!("{dir}: {err}"))),
        };
        if empty {
            fs::remove_dir(dir.as_std_path())
                .map_err(|err| CloneError::Filesystem(format!("{dir}: {err}")))?;
        }
    }
    Ok(())
}

/// `.datalad/` content and the top-level attributes file survive cleanup.
fn is_bookkeeping(path: &str) -> bool {
    let path = Utf8Path::new(path);
    let mut components = path.components();
    match components.next() {
        Some(Utf8Component::Normal(".datalad")) => true,
        Some(Utf8Component::Normal(".gitattributes")) => components.next().is_none(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bookkeeping_paths_are_kept() {
        assert!(is_bookkeeping(".datalad/config"));
        assert!(is_bookkeeping(".gitattributes"));
        assert!(!is_bookkeeping("sub/.gitattributes"));
        assert!(!is_bookkeeping("data/file.nii.gz"));
        assert!(!is_bookkeeping(".dataladx"));
    }
}
