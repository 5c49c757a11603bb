//! File repository backends.
//!
//! The KG does not label what kind of storage backs a dataset version; the
//! backend is inferred from the structure of the repository address alone.
//! Each backend yields the same [`FileRecord`] shape, with a dataset-relative
//! name recovered by stripping a backend-specific base from the file address.

use std::collections::VecDeque;

use url::Url;

use crate::config::Settings;
use crate::dataproxy::{BucketClient, BucketObject};
use crate::domain::KgId;
use crate::error::CloneError;
use crate::kg::KgClient;
use crate::model::{Checksum, FileRecord, FileRepositoryRecord, KgFile};

const PUBLIC_BUCKET_PATH: &str = "/api/v1/public/buckets/";
const PRIVATE_BUCKET_PATH: &str = "/api/v1/buckets/";
/// `api/v1/public/buckets/<id>`
const PUBLIC_BUCKET_SEGMENTS: usize = 5;
/// `api/v1/buckets/<id>`
const PRIVATE_BUCKET_SEGMENTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRepository {
    PublicBucket { bucket_url: String },
    PrivateBucket { bucket_url: String },
    PrefixedObjectStore { base_url: String, prefix: String },
    Unrecognized { address: String },
}

impl FileRepository {
    pub fn classify(address: &str, data_proxy_host: &str, object_store_hosts: &[String]) -> Self {
        let unrecognized = || FileRepository::Unrecognized {
            address: address.to_string(),
        };
        let Ok(parsed) = Url::parse(address) else {
            return unrecognized();
        };
        let Some(host) = parsed.host_str() else {
            return unrecognized();
        };
        let path = parsed.path();

        if host.eq_ignore_ascii_case(data_proxy_host) {
            let (public, skip) = if path.starts_with(PUBLIC_BUCKET_PATH) {
                (true, PUBLIC_BUCKET_SEGMENTS)
            } else if path.starts_with(PRIVATE_BUCKET_PATH) {
                (false, PRIVATE_BUCKET_SEGMENTS)
            } else {
                return unrecognized();
            };
            let segments = path_segments(path);
            if segments.len() < skip {
                return unrecognized();
            }
            let bucket_url = format!(
                "{}://{}/{}",
                parsed.scheme(),
                host,
                segments[..skip].join("/")
            );
            return if public {
                FileRepository::PublicBucket { bucket_url }
            } else {
                FileRepository::PrivateBucket { bucket_url }
            };
        }

        if object_store_hosts
            .iter()
            .any(|candidate| host.eq_ignore_ascii_case(candidate))
        {
            // the prefix must be the one and only query variable
            let Some((base_url, query)) = address.split_once('?') else {
                return unrecognized();
            };
            let Some(prefix) = query.strip_prefix("prefix=") else {
                return unrecognized();
            };
            if query.matches('=').count() != 1 || query.contains('&') {
                return unrecognized();
            }
            return FileRepository::PrefixedObjectStore {
                base_url: base_url.to_string(),
                prefix: prefix.to_string(),
            };
        }

        unrecognized()
    }

    /// Dataset-relative name of a file at `address` inside this repository.
    pub fn relative_name(&self, address: &str) -> Result<String, CloneError> {
        match self {
            FileRepository::PublicBucket { .. } => {
                strip_segments(address, PUBLIC_BUCKET_SEGMENTS)
            }
            FileRepository::PrivateBucket { .. } => {
                strip_segments(address, PRIVATE_BUCKET_SEGMENTS)
            }
            FileRepository::PrefixedObjectStore { base_url, prefix } => {
                // no better way to get at a relative path than to subtract the base
                let name = address
                    .strip_prefix(base_url.as_str())
                    .ok_or_else(|| {
                        CloneError::MalformedRecord(format!(
                            "file {address} is not located under {base_url}"
                        ))
                    })?
                    .trim_start_matches('/');
                let name = name
                    .strip_prefix(prefix.as_str())
                    .ok_or_else(|| {
                        CloneError::MalformedRecord(format!(
                            "file {address} does not carry the repository prefix {prefix}"
                        ))
                    })?
                    .trim_start_matches('/');
                non_empty(name, address)
            }
            FileRepository::Unrecognized { address } => Err(CloneError::UnsupportedBackend {
                address: address.clone(),
            }),
        }
    }
}

pub type FileRecordIter<'a> = Box<dyn Iterator<Item = Result<FileRecord, CloneError>> + 'a>;

pub struct FileRepositoryAdapter<'a, K, B> {
    kg: &'a K,
    buckets: &'a B,
    settings: &'a Settings,
}

impl<'a, K, B> FileRepositoryAdapter<'a, K, B>
where
    K: KgClient + 'a,
    B: BucketClient + 'a,
{
    pub fn new(kg: &'a K, buckets: &'a B, settings: &'a Settings) -> Self {
        Self {
            kg,
            buckets,
            settings,
        }
    }

    pub fn classify(&self, address: &str) -> FileRepository {
        FileRepository::classify(
            address,
            &self.settings.data_proxy_host,
            &self.settings.object_store_hosts,
        )
    }

    /// All file records of `repository`. Fails up front with
    /// `UnsupportedBackend` when the address matches no known backend;
    /// later failures (transport, checksum) surface as items.
    pub fn iterate(&self, repository: &FileRepositoryRecord) -> Result<FileRecordIter<'a>, CloneError> {
        let backend = self.classify(&repository.iri);
        match backend {
            FileRepository::PublicBucket { ref bucket_url } => {
                let objects = self.buckets.list_objects(bucket_url, false)?;
                Ok(bucket_records(backend, objects))
            }
            FileRepository::PrivateBucket { ref bucket_url } => {
                let objects = self.buckets.list_objects(bucket_url, true)?;
                Ok(bucket_records(backend, objects))
            }
            FileRepository::PrefixedObjectStore { .. } => Ok(Box::new(KgFilePages::new(
                self.kg,
                repository.id,
                backend,
                self.settings.page_size,
            ))),
            FileRepository::Unrecognized { address } => {
                Err(CloneError::UnsupportedBackend { address })
            }
        }
    }
}

fn bucket_records<'a>(backend: FileRepository, objects: Vec<BucketObject>) -> FileRecordIter<'a> {
    let bucket_url = match &backend {
        FileRepository::PublicBucket { bucket_url } | FileRepository::PrivateBucket { bucket_url } => {
            bucket_url.clone()
        }
        _ => String::new(),
    };
    Box::new(objects.into_iter().map(move |object| {
        // object names are taken verbatim; they may contain `?`, `#` or `%`
        let relative_name = non_empty(object.name.trim_start_matches('/'), &object.name)?;
        FileRecord::new(
            object_url(&bucket_url, &relative_name)?,
            relative_name,
            object.hash.as_deref().map(Checksum::md5),
            object.bytes,
        )
    }))
}

/// URL of the object `name` inside a bucket, each name segment percent-encoded.
pub fn object_url(bucket_url: &str, name: &str) -> Result<String, CloneError> {
    let malformed = || CloneError::MalformedRecord(format!("invalid bucket address {bucket_url}"));
    let mut url = Url::parse(bucket_url).map_err(|_| malformed())?;
    url.path_segments_mut()
        .map_err(|_| malformed())?
        .pop_if_empty()
        .extend(name.split('/'));
    Ok(url.to_string())
}

/// Pages through the KG's file query for one repository.
///
/// A page shorter than the page size is the last one; otherwise the offset
/// advances by the page length.
pub struct KgFilePages<'a, K> {
    kg: &'a K,
    repository: KgId,
    backend: FileRepository,
    page_size: usize,
    offset: usize,
    buffer: VecDeque<KgFile>,
    exhausted: bool,
}

impl<'a, K: KgClient> KgFilePages<'a, K> {
    pub fn new(kg: &'a K, repository: KgId, backend: FileRepository, page_size: usize) -> Self {
        Self {
            kg,
            repository,
            backend,
            page_size,
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn convert(&self, file: KgFile) -> Result<FileRecord, CloneError> {
        let relative_name = self.backend.relative_name(&file.iri)?;
        FileRecord::new(file_url(&file.iri)?, relative_name, file.hash, file.storage_size)
    }
}

impl<K: KgClient> Iterator for KgFilePages<'_, K> {
    type Item = Result<FileRecord, CloneError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(file) = self.buffer.pop_front() {
                return Some(self.convert(file));
            }
            if self.exhausted {
                return None;
            }
            match self
                .kg
                .file_page(&self.repository, self.offset, self.page_size)
            {
                Ok(page) => {
                    if page.len() < self.page_size {
                        self.exhausted = true;
                    }
                    self.offset += page.len();
                    self.buffer.extend(page);
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// A file IRI is not necessarily a valid URL; parsing quotes the path.
pub fn file_url(iri: &str) -> Result<String, CloneError> {
    Url::parse(iri)
        .map(|url| url.to_string())
        .map_err(|err| CloneError::MalformedRecord(format!("invalid file address {iri}: {err}")))
}

fn strip_segments(address: &str, skip: usize) -> Result<String, CloneError> {
    let path = raw_path(address);
    let segments = path_segments(path);
    if segments.len() <= skip {
        return Err(CloneError::MalformedRecord(format!(
            "file address {address} has no path below the bucket"
        )));
    }
    non_empty(&segments[skip..].join("/"), address)
}

/// Path component of an address, without percent-decoding or re-encoding.
fn raw_path(address: &str) -> &str {
    let rest = address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(address);
    let path = rest.find('/').map(|start| &rest[start..]).unwrap_or("");
    path.split(['?', '#']).next().unwrap_or(path)
}

fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

fn non_empty(name: &str, address: &str) -> Result<String, CloneError> {
    if name.is_empty() {
        return Err(CloneError::MalformedRecord(format!(
            "cannot derive a file name from {address}"
        )));
    }
    Ok(name.to_string())
}
