//! Version chain resolution.
//!
//! A starting identifier names either a dataset or one of its versions. Either
//! way the result is the dataset's versions, oldest first, cut off after the
//! requested version and optionally reduced to the last `depth` entries.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{Depth, KgId};
use crate::error::CloneError;
use crate::kg::KgClient;
use crate::model::{DatasetVersion, KgInstance};

#[derive(Debug, Clone, Serialize)]
pub struct VersionChain {
    /// KG identity of the dataset; for legacy revision chains, the root version.
    pub dataset_id: KgId,
    pub versions: Vec<DatasetVersion>,
    /// The version that was requested explicitly, if any.
    pub target: Option<KgId>,
}

pub struct VersionResolver<'a, K> {
    kg: &'a K,
}

impl<'a, K: KgClient> VersionResolver<'a, K> {
    pub fn new(kg: &'a K) -> Self {
        Self { kg }
    }

    pub fn resolve(&self, id: &KgId, depth: Option<Depth>) -> Result<VersionChain, CloneError> {
        let mut fetched = HashMap::new();
        let (dataset_id, mut refs, target) = match self.kg.instance(id)? {
            Some(KgInstance::Version(version)) => {
                debug!(version = %id, "identifier names a dataset version");
                match self.kg.dataset_of_version(id)? {
                    Some(dataset) => (dataset.id, dataset.versions, Some(*id)),
                    None => {
                        let chain = self.revision_chain(version)?;
                        let root = chain[0].id;
                        let refs = chain.iter().map(|version| version.id).collect();
                        fetched.extend(chain.into_iter().map(|version| (version.id, version)));
                        (root, refs, Some(*id))
                    }
                }
            }
            Some(KgInstance::Dataset(dataset)) => {
                debug!(dataset = %id, "identifier names a dataset");
                (dataset.id, dataset.versions, None)
            }
            None => return Err(CloneError::NotFound(id.to_string())),
        };

        if let Some(target) = target {
            let position = refs.iter().position(|version| *version == target).ok_or_else(|| {
                CloneError::MalformedRecord(format!(
                    "version {target} is not listed by its dataset {dataset_id}"
                ))
            })?;
            refs.truncate(position + 1);
        }
        if let Some(depth) = depth {
            let skip = refs.len().saturating_sub(depth.get());
            refs.drain(..skip);
        }
        if refs.is_empty() {
            return Err(CloneError::NoVersions(dataset_id.to_string()));
        }

        let mut versions = Vec::with_capacity(refs.len());
        for version_id in refs {
            let version = match fetched.remove(&version_id) {
                Some(version) => version,
                None => self
                    .kg
                    .dataset_version(&version_id)?
                    .ok_or_else(|| CloneError::NotFound(version_id.to_string()))?,
            };
            versions.push(version);
        }
        info!(
            dataset = %dataset_id,
            versions = versions.len(),
            "resolved version chain"
        );
        Ok(VersionChain {
            dataset_id,
            versions,
            target,
        })
    }

    /// Follows predecessor links from `head` back to the first version.
    /// Returns the chain oldest first.
    fn revision_chain(&self, head: DatasetVersion) -> Result<Vec<DatasetVersion>, CloneError> {
        let mut seen = HashSet::from([head.id]);
        let mut chain = vec![head];
        while let Some(previous) = chain.last().and_then(|version| version.previous) {
            if !seen.insert(previous) {
                return Err(CloneError::CircularRevisionChain(previous.to_string()));
            }
            let version = self
                .kg
                .dataset_version(&previous)?
                .ok_or_else(|| CloneError::NotFound(previous.to_string()))?;
            chain.push(version);
        }
        chain.reverse();
        Ok(chain)
    }
}
