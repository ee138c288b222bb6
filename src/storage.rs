//! # Object Storage
//!
//! Raw readings and the published feed both live in a bucket-style object
//! store addressed by `(container, key)`. Two backends are provided:
//!
//! - [`LocalStore`]: one subdirectory per container under a root directory,
//!   handy for development and for tests
//! - [`HttpStore`]: plain `GET`/`PUT {endpoint}/{container}/{key}` against an
//!   S3-compatible endpoint (public objects are sent with
//!   `x-amz-acl: public-read`)
//!
//! Writes overwrite the whole object. There is no locking: concurrent runs
//! publishing to the same key are last-writer-wins, and every writer stages
//! its body under its own name so overlapping puts never interfere.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by object store backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Location string could not be split into container and key
    #[error("invalid object location `{0}`")]
    InvalidLocation(String),

    /// Endpoint is not an absolute `http(s)` base URL
    #[error("invalid storage endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// No object at the requested location
    #[error("object not found: {0}")]
    NotFound(ObjectLocation),

    /// Filesystem failure in the local backend
    #[error("storage IO: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed (network, server, or protocol error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("{location}: server returned {status}")]
    Status {
        location: ObjectLocation,
        status: reqwest::StatusCode,
    },
}

/// Address of one object: container (bucket) plus key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectLocation {
    pub container: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        ObjectLocation {
            container: container.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.container, self.key)
    }
}

impl FromStr for ObjectLocation {
    type Err = StorageError;

    /// Accepts `s3://container/key/parts` or `container/key/parts`.
    ///
    /// Empty, `.` and `..` segments are rejected so a location can never
    /// name anything outside its container.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = s.strip_prefix("s3://").unwrap_or(s);
        match path.split_once('/') {
            Some((container, key))
                if is_plain_segment(container) && key.split('/').all(is_plain_segment) =>
            {
                Ok(ObjectLocation::new(container, key))
            }
            _ => Err(StorageError::InvalidLocation(s.to_string())),
        }
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !matches!(segment, "" | "." | "..")
}

impl TryFrom<String> for ObjectLocation {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObjectLocation> for String {
    fn from(location: ObjectLocation) -> Self {
        location.to_string()
    }
}

/// How an object should be stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    /// Object must be retrievable without credentials
    pub public_read: bool,
}

impl PutOptions {
    pub fn private(content_type: &str) -> Self {
        PutOptions {
            content_type: content_type.to_string(),
            public_read: false,
        }
    }

    pub fn public(content_type: &str) -> Self {
        PutOptions {
            content_type: content_type.to_string(),
            public_read: true,
        }
    }
}

/// Bucket-style object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object as UTF-8 text.
    async fn get(&self, location: &ObjectLocation) -> Result<String, StorageError>;

    /// Create or overwrite an object.
    async fn put(
        &self,
        location: &ObjectLocation,
        body: String,
        options: &PutOptions,
    ) -> Result<(), StorageError>;
}

/// Directory-backed store: `{root}/{container}/{key}`.
///
/// Content type and ACL have no meaning on a plain filesystem and are only
/// logged.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore { root: root.into() }
    }

    /// Filesystem path for a location.
    pub fn path_of(&self, location: &ObjectLocation) -> PathBuf {
        let mut path = self.root.join(&location.container);
        path.extend(location.key.split('/').filter(|part| !part.is_empty()));
        path
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get(&self, location: &ObjectLocation) -> Result<String, StorageError> {
        match tokio::fs::read_to_string(self.path_of(location)).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(location.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        body: String,
        options: &PutOptions,
    ) -> Result<(), StorageError> {
        let path = self.path_of(location);
        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(StorageError::InvalidLocation(location.to_string()));
        };
        tokio::fs::create_dir_all(parent).await?;

        // Write beside the target and rename so readers never see half a file.
        let staging = parent.join(format!(
            ".{}.{}.partial",
            file_name.to_string_lossy(),
            Uuid::new_v4().simple()
        ));
        let written = match tokio::fs::write(&staging, body).await {
            Ok(()) => tokio::fs::rename(&staging, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                tracing::debug!(
                    staging = %staging.display(),
                    error = %cleanup,
                    "staging file not removed"
                );
            }
            return Err(e.into());
        }

        tracing::debug!(
            %location,
            content_type = %options.content_type,
            public = options.public_read,
            "object written"
        );
        Ok(())
    }
}

/// S3-compatible HTTP store.
#[derive(Clone, Debug)]
pub struct HttpStore {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpStore {
    pub fn new(endpoint: &str) -> Result<Self, StorageError> {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: &str) -> Result<Self, StorageError> {
        let invalid = |reason: String| StorageError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };
        let endpoint_url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(endpoint_url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", endpoint_url.scheme())));
        }
        Ok(HttpStore {
            client,
            endpoint: endpoint_url,
        })
    }

    /// Object URL for a location. Container and key segments are
    /// percent-encoded.
    pub fn url_of(&self, location: &ObjectLocation) -> Url {
        let mut url = self.endpoint.clone();
        // http(s) URLs always have a path, so this cannot fail.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&location.container)
                .extend(location.key.split('/'));
        }
        url
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn get(&self, location: &ObjectLocation) -> Result<String, StorageError> {
        let response = self.client.get(self.url_of(location)).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response.text().await?)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(StorageError::NotFound(location.clone()))
        } else {
            Err(StorageError::Status {
                location: location.clone(),
                status,
            })
        }
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        body: String,
        options: &PutOptions,
    ) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put(self.url_of(location))
            .header(reqwest::header::CONTENT_TYPE, &options.content_type)
            .body(body);
        if options.public_read {
            request = request.header("x-amz-acl", "public-read");
        }

        let status = request.send().await?.status();
        if !status.is_success() {
            return Err(StorageError::Status {
                location: location.clone(),
                status,
            });
        }
        tracing::debug!(%location, "object uploaded");
        Ok(())
    }
}
