use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CloneError;

static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("static UUID pattern")
});

/// Identifier of a KG instance (dataset, dataset version, file repository).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KgId(Uuid);

impl KgId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> &Uuid {
        &self.0
    }

    /// Finds an identifier inside an arbitrary string such as a KG search or
    /// API URL. When several UUIDs are present the last one wins, because
    /// instance URLs end with the instance ID.
    pub fn find_in(value: &str) -> Option<Self> {
        UUID_PATTERN
            .find_iter(value)
            .last()
            .and_then(|found| Uuid::parse_str(found.as_str()).ok())
            .map(Self)
    }
}

impl fmt::Display for KgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for KgId {
    type Err = CloneError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::find_in(value.trim()).ok_or_else(|| CloneError::InvalidIdentifier(value.to_string()))
    }
}

/// Number of most recent versions to materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Depth(NonZeroUsize);

impl Depth {
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl TryFrom<i64> for Depth {
    type Error = CloneError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self)
            .ok_or(CloneError::InvalidDepth(value))
    }
}

/// Local dataset identity derived from the KG dataset UUID.
///
/// The two objects are linked but distinct, so the KG UUID is not reused
/// verbatim: it is hashed (UUID5) into a namespace that is itself the UUID5
/// of `datalad.org` in the DNS namespace.
pub fn dataset_identity(kg_dataset: &KgId) -> Uuid {
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"datalad.org");
    Uuid::new_v5(&namespace, kg_dataset.to_string().as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
    Impossible,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Error => write!(f, "error"),
            Status::Impossible => write!(f, "impossible"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub action: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResultEvent {
    pub fn new(action: &str, status: Status) -> Self {
        Self {
            action: action.to_string(),
            status,
            path: None,
            message: None,
        }
    }

    pub fn ok(action: &str) -> Self {
        Self::new(action, Status::Ok)
    }

    pub fn error(action: &str, message: impl Into<String>) -> Self {
        Self::new(action, Status::Error).with_message(message)
    }

    pub fn impossible(action: &str, message: impl Into<String>) -> Self {
        Self::new(action, Status::Impossible).with_message(message)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}
