//! Remote object-store access.
//!
//! The hydration engine only ever needs two capabilities from the remote:
//! a single-level delimited listing and a full-object download. Everything
//! else (credentials, signing, retries) belongs to the concrete backend.

pub mod s3;

use std::time::SystemTime;

use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// One remote object as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Full object key, including any mount prefix.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Remote modification time, when the backend reports one.
    pub last_modified: Option<SystemTime>,
}

/// The result of listing one level of the remote namespace.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Delimiter-terminated prefixes one level below the listed prefix.
    pub common_prefixes: Vec<String>,
    /// Objects directly under the listed prefix.
    pub objects: Vec<RemoteObject>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key does not exist remotely.
    #[error("object not found")]
    NotFound,

    /// Anything else: network failures, auth failures, backend errors.
    /// Callers must not treat these as authoritative absence.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn transport(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Box::new(e))
    }
}

/// Streaming body of a remote object.
pub type ObjectBody = BoxStream<'static, Result<Bytes, StoreError>>;

/// Minimal remote-store contract consumed by the hydration engine.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// List one level of the namespace under `prefix`, grouping deeper keys
    /// by `delimiter`. Implementations must follow pagination to exhaustion;
    /// a truncated listing would silently drop entries from the mount.
    async fn list(&self, prefix: &str, delimiter: &str) -> Result<Listing, StoreError>;

    /// Stream the full content of the object at `key`.
    async fn get(&self, key: &str) -> Result<ObjectBody, StoreError>;
}
