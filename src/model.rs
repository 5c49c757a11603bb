//! Typed view over raw KG query results.
//!
//! The KG answers with JSON-LD whose keys are, depending on the endpoint and
//! the schema generation, plain snake_case names, camelCase names or fully
//! expanded vocabulary IRIs. Lookups here accept all three spellings, and
//! references are accepted as `{"@id": ..}` objects, bare strings, or lists
//! of either.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::KgId;
use crate::error::CloneError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub id: KgId,
    /// Version references in KG order, oldest first.
    pub versions: Vec<KgId>,
}

impl Dataset {
    pub fn from_record(record: &Value) -> Result<Self, CloneError> {
        let id = record_id(record)?;
        let versions = field(record, &["versions", "hasVersion", "has_version"])
            .map(references)
            .unwrap_or_default()
            .into_iter()
            .filter_map(reference_id)
            .collect();
        Ok(Self { id, versions })
    }
}

/// A KG instance that can start a version chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KgInstance {
    Dataset(Dataset),
    Version(DatasetVersion),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetVersion {
    pub id: KgId,
    pub version_identifier: String,
    /// Change description, used verbatim as commit message.
    pub version_innovation: String,
    pub release_date: Option<ReleaseDate>,
    pub repository: Option<KgId>,
    /// Predecessor link used by older schemas that have no dataset wrapper.
    pub previous: Option<KgId>,
}

impl DatasetVersion {
    pub fn from_record(record: &Value) -> Result<Self, CloneError> {
        let id = record_id(record)?;
        let version_identifier = field(record, &["version_identifier", "versionIdentifier"])
            .and_then(text)
            .ok_or_else(|| {
                CloneError::MalformedRecord(format!("dataset version {id} has no version identifier"))
            })?;
        let version_innovation = field(record, &["version_innovation", "versionInnovation"])
            .and_then(text)
            .unwrap_or_default();
        let release_date = field(record, &["release_date", "releaseDate"])
            .and_then(text)
            .map(|value| value.parse::<ReleaseDate>())
            .transpose()?;
        let repository = field(record, &["repository_ref", "repository"])
            .map(references)
            .and_then(|refs| refs.into_iter().find_map(reference_id));

        let predecessors = field(
            record,
            &["previous", "isNewVersionOf", "is_new_version_of", "wasRevisionOf", "was_revision_of"],
        )
        .map(references)
        .unwrap_or_default()
        .into_iter()
        .filter_map(reference_id)
        .collect::<Vec<_>>();
        if predecessors.len() > 1 {
            warn!(
                version = %id,
                "more than one predecessor for dataset version, proceeding with the first \
                 (version history will be incomplete)"
            );
        }

        Ok(Self {
            id,
            version_identifier,
            version_innovation,
            release_date,
            repository,
            previous: predecessors.into_iter().next(),
        })
    }
}

/// Release timestamp of a dataset version, as recorded by the KG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReleaseDate(DateTime<FixedOffset>);

impl ReleaseDate {
    pub fn timestamp(&self) -> &DateTime<FixedOffset> {
        &self.0
    }

    /// Form handed to git as author/committer date.
    pub fn to_git_date(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
    }
}

impl fmt::Display for ReleaseDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_git_date())
    }
}

impl Serialize for ReleaseDate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_git_date())
    }
}

impl std::str::FromStr for ReleaseDate {
    type Err = CloneError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if let Ok(stamp) = DateTime::parse_from_rfc3339(value) {
            return Ok(Self(stamp));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(Self(naive.and_utc().fixed_offset()));
        }
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
            return Ok(Self(midnight.and_utc().fixed_offset()));
        }
        Err(CloneError::MalformedRecord(format!(
            "unparseable release date: {value}"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRepositoryRecord {
    pub id: KgId,
    /// Address of the repository; its structure determines the backend.
    pub iri: String,
}

impl FileRepositoryRecord {
    pub fn from_record(record: &Value) -> Result<Self, CloneError> {
        let id = record_id(record)?;
        let iri = field(record, &["iri", "IRI"])
            .and_then(text)
            .ok_or_else(|| {
                CloneError::MalformedRecord(format!("file repository {id} has no IRI"))
            })?;
        Ok(Self { id, iri })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: String,
    pub digest: String,
}

impl Checksum {
    pub fn md5(digest: &str) -> Self {
        Self {
            algorithm: "MD5".to_string(),
            digest: digest.to_ascii_lowercase(),
        }
    }

    pub fn is_md5(&self) -> bool {
        self.algorithm.eq_ignore_ascii_case("md5")
    }
}

/// A file entry of the KG's own file query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KgFile {
    pub iri: String,
    pub hash: Option<Checksum>,
    pub storage_size: Option<u64>,
}

impl KgFile {
    pub fn from_record(record: &Value) -> Result<Self, CloneError> {
        let iri = field(record, &["iri", "IRI"])
            .and_then(text)
            .ok_or_else(|| CloneError::MalformedRecord("file record without IRI".to_string()))?;
        let hash = field(record, &["hash"])
            .map(references)
            .and_then(|hashes| hashes.into_iter().next())
            .and_then(|hash| {
                let algorithm = field(hash, &["algorithm"]).and_then(text)?;
                let digest = field(hash, &["digest"]).and_then(text)?;
                Some(Checksum { algorithm, digest })
            });
        let storage_size = field(record, &["storage_size", "storageSize"]).and_then(|size| {
            match size {
                Value::Object(_) => field(size, &["value"]).and_then(Value::as_u64),
                other => other.as_u64(),
            }
        });
        Ok(Self {
            iri,
            hash,
            storage_size,
        })
    }
}

/// The single record shape every file repository backend is normalized into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub url: String,
    pub relative_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FileRecord {
    /// Builds a record, refusing any checksum that is not MD5.
    pub fn new(
        url: String,
        relative_name: String,
        checksum: Option<Checksum>,
        size: Option<u64>,
    ) -> Result<Self, CloneError> {
        let md5 = match checksum {
            Some(checksum) if checksum.is_md5() => Some(checksum.digest.to_ascii_lowercase()),
            Some(checksum) => {
                return Err(CloneError::UnsupportedChecksum {
                    algorithm: checksum.algorithm,
                    address: url,
                });
            }
            None => None,
        };
        Ok(Self {
            url,
            relative_name,
            md5,
            size,
        })
    }

    pub fn content_key(&self) -> Option<ContentKey> {
        match (&self.md5, self.size) {
            (Some(md5), Some(size)) => Some(ContentKey {
                md5: md5.clone(),
                size,
            }),
            _ => None,
        }
    }
}

/// Content identity derived from checksum and size, in git-annex key syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKey {
    pub md5: String,
    pub size: u64,
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MD5-s{}--{}", self.size, self.md5)
    }
}

/// Looks up the first non-null field matching any of `names`, either exactly
/// or as the local part of an expanded IRI key.
pub fn field<'a>(record: &'a Value, names: &[&str]) -> Option<&'a Value> {
    let object = record.as_object()?;
    for name in names {
        if let Some(value) = object.get(*name).filter(|value| !value.is_null()) {
            return Some(value);
        }
    }
    object
        .iter()
        .filter(|(_, value)| !value.is_null())
        .find(|(key, _)| names.iter().any(|name| *name == local_name(key)))
        .map(|(_, value)| value)
}

/// Normalizes a single value or a list of values into a list.
pub fn references(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

pub fn reference_id(value: &Value) -> Option<KgId> {
    match value {
        Value::String(raw) => KgId::find_in(raw),
        Value::Object(_) => field(value, &["@id", "id", "uuid"])
            .and_then(text)
            .and_then(|raw| KgId::find_in(&raw)),
        _ => None,
    }
}

fn record_id(record: &Value) -> Result<KgId, CloneError> {
    field(record, &["uuid", "@id", "id"])
        .and_then(text)
        .and_then(|raw| KgId::find_in(&raw))
        .ok_or_else(|| CloneError::MalformedRecord("record without identifier".to_string()))
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => items.iter().find_map(text),
        Value::Object(_) => field(value, &["@value"]).and_then(text),
        _ => None,
    }
}

fn local_name(key: &str) -> &str {
    key.rsplit(['/', '#']).next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn expanded_iri_keys_are_understood() {
        let record = json!({
            "@id": "https://kg.ebrains.eu/api/instances/4ac9f0bc-560d-47e0-8916-7b24da9bb0ce",
            "https://openminds.ebrains.eu/vocab/versionIdentifier": "v2.1",
            "https://openminds.ebrains.eu/vocab/versionInnovation": "Fixed labels.",
            "https://openminds.ebrains.eu/vocab/releaseDate": "2022-05-04",
            "https://openminds.ebrains.eu/vocab/repository": {
                "@id": "https://kg.ebrains.eu/api/instances/0a4d1e5c-8c7e-4b2a-9ad1-7b1e2c3d4e5f"
            }
        });
        let version = DatasetVersion::from_record(&record).unwrap();
        assert_eq!(version.version_identifier, "v2.1");
        assert_eq!(version.version_innovation, "Fixed labels.");
        assert_eq!(
            version.release_date.unwrap().to_git_date(),
            "2022-05-04T00:00:00+00:00"
        );
        assert!(version.repository.is_some());
    }

    #[test]
    fn release_date_keeps_offset() {
        let date: ReleaseDate = "2023-02-06T15:06:59+01:00".parse().unwrap();
        assert_eq!(date.to_git_date(), "2023-02-06T15:06:59+01:00");
    }

    #[test]
    fn content_key_syntax() {
        let record = FileRecord::new(
            "https://example.org/a.txt".to_string(),
            "a.txt".to_string(),
            Some(Checksum::md5("16E1594B23E670086383FF7E7151D81A")),
            Some(194037),
        )
        .unwrap();
        assert_eq!(
            record.content_key().unwrap().to_string(),
            "MD5-s194037--16e1594b23e670086383ff7e7151d81a"
        );
    }
}
