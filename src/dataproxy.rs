use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::CloneError;

/// One entry of a data-proxy bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BucketObject {
    pub name: String,
    /// MD5 of the object content.
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BucketListing {
    #[serde(default)]
    objects: Vec<BucketObject>,
}

pub trait BucketClient: Send + Sync {
    /// Lists all objects of the bucket at `bucket_url`. Private buckets need
    /// `authenticated`; public ones must be queried without credentials.
    fn list_objects(
        &self,
        bucket_url: &str,
        authenticated: bool,
    ) -> Result<Vec<BucketObject>, CloneError>;
}

#[derive(Clone)]
pub struct DataProxyHttpClient {
    client: Client,
    token: Option<String>,
    token_env: String,
    limit: usize,
}

impl DataProxyHttpClient {
    pub fn new(settings: &Settings) -> Result<Self, CloneError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ebrains-clone/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CloneError::DataProxyHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| CloneError::DataProxyHttp(err.to_string()))?;
        Ok(Self {
            client,
            token: settings.token().ok(),
            token_env: settings.token_env.clone(),
            limit: settings.bucket_limit,
        })
    }

    fn handle_status(response: Response) -> Result<Response, CloneError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "data-proxy request failed".to_string());
        Err(CloneError::DataProxyStatus { status, message })
    }
}

impl BucketClient for DataProxyHttpClient {
    fn list_objects(
        &self,
        bucket_url: &str,
        authenticated: bool,
    ) -> Result<Vec<BucketObject>, CloneError> {
        debug!(url = bucket_url, authenticated, "GET bucket listing");
        let mut request = self
            .client
            .get(bucket_url)
            .query(&[("limit", self.limit.to_string())]);
        // the data proxy answers 400 when credentials accompany a public request
        if authenticated {
            let token = self
                .token
                .as_deref()
                .ok_or_else(|| CloneError::MissingToken(self.token_env.clone()))?;
            request = request
                .header(CONTENT_TYPE, "application/json")
                .bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|err| CloneError::DataProxyHttp(err.to_string()))?;
        let listing: BucketListing = Self::handle_status(response)?
            .json()
            .map_err(|err| CloneError::DataProxyHttp(err.to_string()))?;
        if listing.objects.len() >= self.limit {
            warn!(
                url = bucket_url,
                limit = self.limit,
                "bucket listing reached the request limit and may be truncated"
            );
        }
        Ok(listing.objects)
    }
}
