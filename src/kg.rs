use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Settings;
use crate::domain::KgId;
use crate::error::CloneError;
use crate::model::{
    Dataset, DatasetVersion, FileRepositoryRecord, KgFile, KgInstance, field, references,
};

const OPENMINDS_CORE: &str = "https://openminds.ebrains.eu/core";
const OPENMINDS_VOCAB: &str = "https://openminds.ebrains.eu/vocab";
const QUERY_VOCAB: &str = "https://schema.hbp.eu/myQuery/";

/// Read access to the knowledge graph, reduced to what version replay needs.
pub trait KgClient: Send + Sync {
    /// The dataset or dataset version stored under `id`; anything else is `None`.
    fn instance(&self, id: &KgId) -> Result<Option<KgInstance>, CloneError>;
    fn dataset_version(&self, id: &KgId) -> Result<Option<DatasetVersion>, CloneError>;
    /// The dataset listing `version` among its versions, if any.
    fn dataset_of_version(&self, version: &KgId) -> Result<Option<Dataset>, CloneError>;
    fn file_repository(&self, id: &KgId) -> Result<Option<FileRepositoryRecord>, CloneError>;
    /// One page of the file records stored in `repository`.
    fn file_page(
        &self,
        repository: &KgId,
        from: usize,
        size: usize,
    ) -> Result<Vec<KgFile>, CloneError>;
}

#[derive(Clone)]
pub struct KgHttpClient {
    client: Client,
    base_url: String,
    stage: String,
}

impl KgHttpClient {
    pub fn new(settings: &Settings) -> Result<Self, CloneError> {
        let token = settings.token()?;
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ebrains-clone/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CloneError::KgHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| CloneError::KgHttp(err.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| CloneError::KgHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.kg_base_url.trim_end_matches('/').to_string(),
            stage: settings.kg_stage.clone(),
        })
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, CloneError> {
        request
            .send()
            .map_err(|err| CloneError::KgHttp(err.to_string()))
    }

    fn handle_status(response: Response) -> Result<Response, CloneError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "KG request failed".to_string());
        Err(CloneError::KgStatus { status, message })
    }

    fn fetch_instance(&self, id: &KgId) -> Result<Option<Value>, CloneError> {
        let url = format!("{}/instances/{id}", self.base_url);
        debug!(%url, "GET KG instance");
        let response = self.send(
            self.client
                .get(&url)
                .query(&[("stage", self.stage.as_str())]),
        )?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = Self::handle_status(response)?
            .json()
            .map_err(|err| CloneError::KgHttp(err.to_string()))?;
        Ok(body.get("data").cloned().filter(|data| !data.is_null()))
    }

    fn query(&self, body: &Value, from: usize, size: usize) -> Result<Vec<Value>, CloneError> {
        let url = format!("{}/queries", self.base_url);
        debug!(%url, from, size, "POST KG query");
        let response = self.send(
            self.client
                .post(&url)
                .query(&[
                    ("stage", self.stage.clone()),
                    ("from", from.to_string()),
                    ("size", size.to_string()),
                ])
                .json(body),
        )?;
        let body: Value = Self::handle_status(response)?
            .json()
            .map_err(|err| CloneError::KgHttp(err.to_string()))?;
        if let Some(duration) = body.get("durationInMs").and_then(Value::as_u64) {
            debug!(duration_ms = duration, "KG query finished");
        }
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

impl KgClient for KgHttpClient {
    fn instance(&self, id: &KgId) -> Result<Option<KgInstance>, CloneError> {
        let Some(record) = self.fetch_instance(id)? else {
            return Ok(None);
        };
        if has_type(&record, "DatasetVersion") {
            DatasetVersion::from_record(&record).map(|version| Some(KgInstance::Version(version)))
        } else if has_type(&record, "Dataset") {
            Dataset::from_record(&record).map(|dataset| Some(KgInstance::Dataset(dataset)))
        } else {
            Ok(None)
        }
    }

    fn dataset_version(&self, id: &KgId) -> Result<Option<DatasetVersion>, CloneError> {
        match self.fetch_instance(id)? {
            Some(record) if has_type(&record, "DatasetVersion") => {
                DatasetVersion::from_record(&record).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn dataset_of_version(&self, version: &KgId) -> Result<Option<Dataset>, CloneError> {
        let records = self.query(&dataset_of_version_query(version), 0, 1)?;
        records.first().map(Dataset::from_record).transpose()
    }

    fn file_repository(&self, id: &KgId) -> Result<Option<FileRepositoryRecord>, CloneError> {
        match self.fetch_instance(id)? {
            Some(record) => FileRepositoryRecord::from_record(&record).map(Some),
            None => Ok(None),
        }
    }

    fn file_page(
        &self,
        repository: &KgId,
        from: usize,
        size: usize,
    ) -> Result<Vec<KgFile>, CloneError> {
        self.query(&file_query(repository), from, size)?
            .iter()
            .map(KgFile::from_record)
            .collect()
    }
}

fn has_type(record: &Value, expected: &str) -> bool {
    field(record, &["@type", "type"])
        .map(references)
        .unwrap_or_default()
        .into_iter()
        .filter_map(Value::as_str)
        .any(|kind| kind.rsplit('/').next() == Some(expected))
}

fn query_context() -> Value {
    json!({
        "@vocab": "https://core.kg.ebrains.eu/vocab/query/",
        "query": QUERY_VOCAB,
        "propertyName": {"@id": "propertyName", "@type": "@id"},
        "path": {"@id": "path", "@type": "@id"}
    })
}

fn dataset_of_version_query(version: &KgId) -> Value {
    json!({
        "@context": query_context(),
        "meta": {
            "type": format!("{OPENMINDS_CORE}/Dataset"),
            "responseVocab": QUERY_VOCAB
        },
        "structure": [
            {"propertyName": "query:uuid", "path": "@id"},
            {
                "propertyName": "query:versions",
                "path": format!("{OPENMINDS_VOCAB}/hasVersion"),
                "structure": [{"propertyName": "query:id", "path": "@id"}]
            },
            {
                "propertyName": "query:match",
                "path": format!("{OPENMINDS_VOCAB}/hasVersion"),
                "required": true,
                "structure": [{
                    "propertyName": "query:id",
                    "path": "@id",
                    "filter": {"op": "CONTAINS", "value": version.to_string()}
                }]
            }
        ]
    })
}

fn file_query(repository: &KgId) -> Value {
    json!({
        "@context": query_context(),
        "meta": {
            "type": format!("{OPENMINDS_CORE}/File"),
            "responseVocab": QUERY_VOCAB
        },
        "structure": [
            {"propertyName": "query:iri", "path": format!("{OPENMINDS_VOCAB}/IRI")},
            {
                "propertyName": "query:hash",
                "path": format!("{OPENMINDS_VOCAB}/hash"),
                "structure": [
                    {"propertyName": "query:algorithm", "path": format!("{OPENMINDS_VOCAB}/algorithm")},
                    {"propertyName": "query:digest", "path": format!("{OPENMINDS_VOCAB}/digest")}
                ]
            },
            {
                "propertyName": "query:storage_size",
                "path": format!("{OPENMINDS_VOCAB}/storageSize"),
                "structure": [
                    {"propertyName": "query:value", "path": format!("{OPENMINDS_VOCAB}/value")}
                ]
            },
            {
                "propertyName": "query:repository",
                "path": format!("{OPENMINDS_VOCAB}/fileRepository"),
                "required": true,
                "structure": [{
                    "propertyName": "query:id",
                    "path": "@id",
                    "filter": {"op": "CONTAINS", "value": repository.to_string()}
                }]
            }
        ]
    })
}
