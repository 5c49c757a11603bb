use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::dataproxy::BucketClient;
use crate::domain::{Depth, KgId, ResultEvent, dataset_identity};
use crate::engine::{ACTION_CREATE, ConfigScope, DatasetEngine, DatasetHandle, SaveRequest};
use crate::error::CloneError;
use crate::kg::KgClient;
use crate::materialize::{Materializer, VersionOutcome};
use crate::model::DatasetVersion;
use crate::resolver::{VersionChain, VersionResolver};

pub const DATASET_ID_KEY: &str = "datalad.dataset.id";

/// A validated clone invocation. Validation happens before any KG request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub source: KgId,
    pub path: Utf8PathBuf,
    pub depth: Option<Depth>,
}

impl CloneRequest {
    pub fn parse(source: &str, path: Option<&str>, depth: Option<i64>) -> Result<Self, CloneError> {
        let source: KgId = source.parse()?;
        let depth = depth.map(Depth::try_from).transpose()?;
        let path = path
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| Utf8PathBuf::from(source.to_string()));
        Ok(Self {
            source,
            path,
            depth,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CloneResult {
    pub dataset_id: KgId,
    /// Identity of the local dataset, derived from `dataset_id`.
    pub local_id: String,
    pub path: String,
    pub versions_total: usize,
    pub versions_completed: usize,
    pub events: Vec<ResultEvent>,
}

impl CloneResult {
    pub fn is_complete(&self) -> bool {
        self.versions_completed == self.versions_total
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionsResult {
    pub dataset_id: KgId,
    pub target: Option<KgId>,
    pub versions: Vec<DatasetVersion>,
}

impl From<VersionChain> for VersionsResult {
    fn from(chain: VersionChain) -> Self {
        Self {
            dataset_id: chain.dataset_id,
            target: chain.target,
            versions: chain.versions,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub completed: Option<usize>,
    pub total: Option<usize>,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            completed: None,
            total: None,
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<K: KgClient, B: BucketClient, E: DatasetEngine> {
    kg: K,
    buckets: B,
    engine: E,
    settings: Settings,
}

impl<K: KgClient, B: BucketClient, E: DatasetEngine> App<K, B, E> {
    pub fn new(kg: K, buckets: B, engine: E, settings: Settings) -> Self {
        Self {
            kg,
            buckets,
            engine,
            settings,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Resolves the version chain without touching any dataset.
    pub fn versions(
        &self,
        source: &KgId,
        depth: Option<Depth>,
        sink: &dyn ProgressSink,
    ) -> Result<VersionsResult, CloneError> {
        sink.event(ProgressEvent::message(format!("resolving versions of {source}")));
        let chain = VersionResolver::new(&self.kg).resolve(source, depth)?;
        sink.event(ProgressEvent::message("done"));
        Ok(chain.into())
    }

    /// Replays the version chain of `request.source` as commits of a new
    /// dataset at `request.path`.
    ///
    /// Resolution and shell creation failures are returned as errors. Once
    /// the shell exists, per-version failures end the run early and are
    /// reported as result events; earlier commits stay in place.
    pub fn clone_dataset(
        &self,
        request: &CloneRequest,
        sink: &dyn ProgressSink,
    ) -> Result<CloneResult, CloneError> {
        let started = Instant::now();
        sink.event(ProgressEvent::message(format!(
            "resolving versions of {}",
            request.source
        )));
        let chain = VersionResolver::new(&self.kg).resolve(&request.source, request.depth)?;
        let total = chain.versions.len();

        let dataset = self.create_shell(request, &chain)?;
        let mut events = vec![ResultEvent::ok(ACTION_CREATE).with_path(request.path.to_string())];
        sink.event(ProgressEvent {
            message: format!("created dataset at {}", request.path),
            completed: Some(0),
            total: Some(total),
            elapsed: Some(started.elapsed()),
        });

        let materializer = Materializer::new(&self.kg, &self.buckets, &self.engine, &self.settings);
        let mut completed = 0;
        for (index, version) in chain.versions.iter().enumerate() {
            let result = materializer.materialize(&dataset, version);
            events.extend(result.events);
            let halt = match result.outcome {
                VersionOutcome::Committed => {
                    completed += 1;
                    sink.event(ProgressEvent {
                        message: format!("version {}", version.version_identifier),
                        completed: Some(completed),
                        total: Some(total),
                        elapsed: Some(started.elapsed()),
                    });
                    false
                }
                // later versions would build on top of a missing one
                VersionOutcome::Impossible => index + 1 < total,
                VersionOutcome::Failed => true,
            };
            if halt {
                warn!(
                    version = %version.version_identifier,
                    completed,
                    total,
                    "stopping after a version could not be materialized"
                );
                break;
            }
        }

        info!(completed, total, path = %request.path, "clone finished");
        sink.event(ProgressEvent {
            message: "done".to_string(),
            completed: Some(completed),
            total: Some(total),
            elapsed: Some(started.elapsed()),
        });

        Ok(CloneResult {
            dataset_id: chain.dataset_id,
            local_id: dataset_identity(&chain.dataset_id).to_string(),
            path: request.path.to_string(),
            versions_total: total,
            versions_completed: completed,
            events,
        })
    }

    /// Creates the dataset with a root commit dated like the first version,
    /// then records the derived dataset identity in that same commit.
    fn create_shell(
        &self,
        request: &CloneRequest,
        chain: &VersionChain,
    ) -> Result<DatasetHandle, CloneError> {
        let first = chain
            .versions
            .first()
            .ok_or_else(|| CloneError::NoVersions(chain.dataset_id.to_string()))?;
        let identity = self.settings.identity(first.release_date.as_ref());
        let dataset = self
            .engine
            .create(&request.path, &identity)
            .map_err(shell_error)?;
        self.engine
            .set_config(
                &dataset,
                DATASET_ID_KEY,
                &dataset_identity(&chain.dataset_id).to_string(),
                ConfigScope::Branch,
            )
            .map_err(shell_error)?;
        let saved = self
            .engine
            .save(
                &dataset,
                &SaveRequest {
                    message: None,
                    tag: None,
                    amend: true,
                    identity: &identity,
                },
            )
            .map_err(shell_error)?;
        if let Some(failure) = saved.iter().find(|event| !event.is_ok()) {
            return Err(CloneError::DatasetShellCreation(
                failure.message.clone().unwrap_or_else(|| "saving dataset identity failed".to_string()),
            ));
        }
        Ok(dataset)
    }
}

fn shell_error(err: CloneError) -> CloneError {
    match err {
        CloneError::DatasetShellCreation(_) | CloneError::MissingTool(_) => err,
        other => CloneError::DatasetShellCreation(other.to_string()),
    }
}
