#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use ebrains_clone::app::{ProgressEvent, ProgressSink};
use ebrains_clone::config::Settings;
use ebrains_clone::dataproxy::{BucketClient, BucketObject};
use ebrains_clone::domain::{KgId, ResultEvent};
use ebrains_clone::engine::{
    CommitIdentity, ConfigScope, DatasetEngine, DatasetHandle, EntryKind, SaveRequest,
    StatusEntry, UrlRecord,
};
use ebrains_clone::error::CloneError;
use ebrains_clone::kg::KgClient;
use ebrains_clone::model::{
    Checksum, Dataset, DatasetVersion, FileRepositoryRecord, KgFile, KgInstance,
};

pub const DATASET: &str = "fd303d56-e1aa-46a2-9d0c-7e5215aeb7ca";
pub const DATASET_LOCAL_ID: &str = "d85d561d-563c-5ecc-a140-dc9634408fd4";

pub fn id(raw: &str) -> KgId {
    raw.parse().unwrap()
}

pub fn version_id(index: usize) -> KgId {
    id(&format!("00000000-0000-4000-8000-{index:012}"))
}

pub fn repository_id(index: usize) -> KgId {
    id(&format!("00000000-0000-4000-9000-{index:012}"))
}

pub fn version(index: usize) -> DatasetVersion {
    DatasetVersion {
        id: version_id(index),
        version_identifier: format!("v{index}.0"),
        version_innovation: format!("Release {index}.\n\nWith a second paragraph."),
        release_date: Some(format!("2021-0{index}-15T10:30:00+02:00").parse().unwrap()),
        repository: Some(repository_id(index)),
        previous: None,
    }
}

pub fn bucket_url(index: usize) -> String {
    format!("https://data-proxy.ebrains.eu/api/v1/public/buckets/d-{index}")
}

pub fn object(name: &str, hash: &str, bytes: u64) -> BucketObject {
    BucketObject {
        name: name.to_string(),
        hash: Some(hash.to_string()),
        bytes: Some(bytes),
    }
}

/// KG with dataset [`DATASET`] owning `count` versions, each stored in its
/// own public bucket holding a shared file plus one file unique to it.
pub fn chain(count: usize) -> (MockKg, MockBuckets) {
    let mut kg = MockKg::default();
    let mut buckets = MockBuckets::default();
    let versions: Vec<DatasetVersion> = (1..=count).map(version).collect();
    kg.add_dataset(Dataset {
        id: id(DATASET),
        versions: versions.iter().map(|version| version.id).collect(),
    });
    for (index, version) in versions.into_iter().enumerate() {
        let index = index + 1;
        kg.add_version(version);
        kg.add_repository(
            FileRepositoryRecord {
                id: repository_id(index),
                iri: bucket_url(index),
            },
            Vec::new(),
        );
        buckets.add_bucket(
            &bucket_url(index),
            vec![
                object("README.md", "9E107D9D372BB6826BD81D3542A419D6", 12),
                object(
                    &format!("sub/v{index}.csv"),
                    &format!("{index:032x}"),
                    100 + index as u64,
                ),
            ],
        );
    }
    (kg, buckets)
}

pub fn settings() -> Settings {
    Settings::default()
}

pub fn kg_file(iri: &str, algorithm: &str, digest: &str, size: u64) -> KgFile {
    KgFile {
        iri: iri.to_string(),
        hash: Some(Checksum {
            algorithm: algorithm.to_string(),
            digest: digest.to_string(),
        }),
        storage_size: Some(size),
    }
}

#[derive(Default)]
pub struct MockKg {
    datasets: HashMap<KgId, Dataset>,
    versions: HashMap<KgId, DatasetVersion>,
    repositories: HashMap<KgId, FileRepositoryRecord>,
    files: HashMap<KgId, Vec<KgFile>>,
    pub requests: Mutex<Vec<String>>,
}

impl MockKg {
    pub fn add_dataset(&mut self, dataset: Dataset) {
        self.datasets.insert(dataset.id, dataset);
    }

    pub fn add_version(&mut self, version: DatasetVersion) {
        self.versions.insert(version.id, version);
    }

    pub fn add_repository(&mut self, repository: FileRepositoryRecord, files: Vec<KgFile>) {
        self.files.insert(repository.id, files);
        self.repositories.insert(repository.id, repository);
    }

    pub fn version_mut(&mut self, id: &KgId) -> &mut DatasetVersion {
        self.versions.get_mut(id).unwrap()
    }

    pub fn repository_mut(&mut self, id: &KgId) -> &mut FileRepositoryRecord {
        self.repositories.get_mut(id).unwrap()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: String) {
        self.requests.lock().unwrap().push(request);
    }
}

impl KgClient for MockKg {
    fn instance(&self, id: &KgId) -> Result<Option<KgInstance>, CloneError> {
        self.record(format!("instance {id}"));
        if let Some(version) = self.versions.get(id) {
            return Ok(Some(KgInstance::Version(version.clone())));
        }
        Ok(self.datasets.get(id).cloned().map(KgInstance::Dataset))
    }

    fn dataset_version(&self, id: &KgId) -> Result<Option<DatasetVersion>, CloneError> {
        self.record(format!("version {id}"));
        Ok(self.versions.get(id).cloned())
    }

    fn dataset_of_version(&self, version: &KgId) -> Result<Option<Dataset>, CloneError> {
        self.record(format!("owner {version}"));
        Ok(self
            .datasets
            .values()
            .find(|dataset| dataset.versions.contains(version))
            .cloned())
    }

    fn file_repository(&self, id: &KgId) -> Result<Option<FileRepositoryRecord>, CloneError> {
        self.record(format!("repository {id}"));
        Ok(self.repositories.get(id).cloned())
    }

    fn file_page(
        &self,
        repository: &KgId,
        from: usize,
        size: usize,
    ) -> Result<Vec<KgFile>, CloneError> {
        self.record(format!("files {repository} {from}"));
        let files = self.files.get(repository).cloned().unwrap_or_default();
        Ok(files.into_iter().skip(from).take(size).collect())
    }
}

#[derive(Default)]
pub struct MockBuckets {
    buckets: HashMap<String, Vec<BucketObject>>,
    pub requests: Mutex<Vec<(String, bool)>>,
}

impl MockBuckets {
    pub fn add_bucket(&mut self, url: &str, objects: Vec<BucketObject>) {
        self.buckets.insert(url.to_string(), objects);
    }
}

impl BucketClient for MockBuckets {
    fn list_objects(
        &self,
        bucket_url: &str,
        authenticated: bool,
    ) -> Result<Vec<BucketObject>, CloneError> {
        self.requests
            .lock()
            .unwrap()
            .push((bucket_url.to_string(), authenticated));
        self.buckets
            .get(bucket_url)
            .cloned()
            .ok_or_else(|| CloneError::DataProxyStatus {
                status: 404,
                message: format!("no bucket at {bucket_url}"),
            })
    }
}

/// A commit as observed by [`MemoryEngine`]; paths are relative, so two
/// datasets in different locations compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub message: String,
    pub tag: Option<String>,
    pub identity: CommitIdentity,
    /// Registered name to content key (or URL when no key was available).
    pub files: BTreeMap<String, String>,
    pub config: BTreeMap<String, String>,
}

/// Engine keeping history in memory and files in a real directory.
/// Registered files are placeholders holding their content key.
#[derive(Default)]
pub struct MemoryEngine {
    pub commits: Mutex<Vec<Commit>>,
    pub config: Mutex<BTreeMap<String, String>>,
    /// Saves tagged with this tag fail.
    pub fail_tag: Option<String>,
}

impl MemoryEngine {
    pub fn commits(&self) -> Vec<Commit> {
        self.commits.lock().unwrap().clone()
    }

    fn snapshot(&self, root: &Utf8Path) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        for path in walk(root.as_std_path(), root.as_std_path()) {
            if path.starts_with(".datalad/") || path == ".gitattributes" {
                continue;
            }
            let content = fs::read_to_string(root.join(&path).as_std_path()).unwrap_or_default();
            files.insert(path, content);
        }
        files
    }
}

impl DatasetEngine for MemoryEngine {
    fn create(
        &self,
        path: &Utf8Path,
        identity: &CommitIdentity,
    ) -> Result<DatasetHandle, CloneError> {
        if path.as_std_path().exists()
            && (path.as_std_path().is_file()
                || fs::read_dir(path.as_std_path()).unwrap().next().is_some())
        {
            return Err(CloneError::DatasetShellCreation(format!(
                "{path} is not an empty directory"
            )));
        }
        fs::create_dir_all(path.join(".datalad").as_std_path()).unwrap();
        fs::write(path.join(".gitattributes").as_std_path(), "* annex.backend=MD5E\n").unwrap();
        fs::write(path.join(".datalad/config").as_std_path(), "").unwrap();
        self.commits.lock().unwrap().push(Commit {
            message: "[DATALAD] new dataset".to_string(),
            tag: None,
            identity: identity.clone(),
            files: BTreeMap::new(),
            config: BTreeMap::new(),
        });
        Ok(DatasetHandle::new(path.to_path_buf()))
    }

    fn set_config(
        &self,
        _dataset: &DatasetHandle,
        key: &str,
        value: &str,
        scope: ConfigScope,
    ) -> Result<(), CloneError> {
        assert_eq!(scope, ConfigScope::Branch);
        self.config
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn status(
        &self,
        dataset: &DatasetHandle,
        _recursive: bool,
    ) -> Result<Vec<StatusEntry>, CloneError> {
        let root = dataset.path().as_std_path();
        Ok(walk(root, root)
            .into_iter()
            .map(|path| StatusEntry {
                path: Utf8PathBuf::from(path),
                kind: EntryKind::File,
            })
            .collect())
    }

    fn register_urls(
        &self,
        dataset: &DatasetHandle,
        records: &[UrlRecord],
    ) -> Result<Vec<ResultEvent>, CloneError> {
        Ok(records
            .iter()
            .map(|record| {
                let path = dataset.path().join(&record.name);
                if record.name.split('/').any(|part| part == "..") {
                    return ResultEvent::error("addurls", "name outside dataset")
                        .with_path(path.to_string());
                }
                fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
                let content = record
                    .key
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| record.url.clone());
                fs::write(path.as_std_path(), content).unwrap();
                ResultEvent::ok("addurls").with_path(path.to_string())
            })
            .collect())
    }

    fn save(
        &self,
        dataset: &DatasetHandle,
        request: &SaveRequest<'_>,
    ) -> Result<Vec<ResultEvent>, CloneError> {
        if request.tag.is_some() && request.tag == self.fail_tag.as_deref() {
            return Ok(vec![ResultEvent::error("save", "refusing to commit")]);
        }
        let files = self.snapshot(dataset.path());
        let config = self.config.lock().unwrap().clone();
        let mut commits = self.commits.lock().unwrap();
        if let Some(tag) = request.tag {
            if commits.iter().any(|commit| commit.tag.as_deref() == Some(tag)) {
                return Ok(vec![ResultEvent::error("tag", format!("tag {tag} exists"))]);
            }
        }
        let commit = Commit {
            message: request.message.map(str::to_string).unwrap_or_default(),
            tag: request.tag.map(str::to_string),
            identity: request.identity.clone(),
            files,
            config,
        };
        if request.amend {
            let previous = commits.pop().unwrap();
            commits.push(Commit {
                message: request
                    .message
                    .map(str::to_string)
                    .unwrap_or(previous.message),
                ..commit
            });
        } else {
            commits.push(commit);
        }
        Ok(vec![
            ResultEvent::ok("save").with_path(dataset.path().to_string()),
        ])
    }
}

/// Relative paths of all files below `dir`, with `/` separators.
fn walk(root: &Path, dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return found;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        if path.is_dir() {
            found.extend(walk(root, &path));
        } else {
            let relative = path.strip_prefix(root).unwrap();
            let parts: Vec<String> = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy().to_string())
                .collect();
            found.push(parts.join("/"));
        }
    }
    found.sort();
    found
}

/// Sink keeping every progress event in arrival order.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("dataset")).unwrap();
    (temp, path)
}
