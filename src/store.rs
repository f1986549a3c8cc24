use std::collections::BTreeMap;
use std::fmt;
use std::io;

use bytes::Bytes;
use thiserror::Error;

use crate::shared_types::{ByteCount, ByteStream, PartNumber};

/// Classification of a failure reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Parent directory of the target does not exist.
    ContainerMissing,
    BucketMissing,
    /// Container still holds entries.
    ContainerNotEmpty,
    NotFound,
    Other(String),
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErrorKind::ContainerMissing => f.write_str("container missing"),
            StoreErrorKind::BucketMissing => f.write_str("bucket missing"),
            StoreErrorKind::ContainerNotEmpty => f.write_str("container not empty"),
            StoreErrorKind::NotFound => f.write_str("not found"),
            StoreErrorKind::Other(code) => f.write_str(code),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} at {path}: {message}")]
    Remote {
        kind: StoreErrorKind,
        path: String,
        message: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed store response: {0}")]
    Protocol(String),
}

impl StoreError {
    pub fn remote(kind: StoreErrorKind, path: &str, message: impl Into<String>) -> Self {
        StoreError::Remote {
            kind,
            path: path.to_owned(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> Option<&StoreErrorKind> {
        match self {
            StoreError::Remote { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn is_kind(&self, expected: &StoreErrorKind) -> bool {
        self.kind() == Some(expected)
    }

    /// Absent target of any flavour.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind(),
            Some(StoreErrorKind::NotFound | StoreErrorKind::BucketMissing)
        )
    }
}

/// Addressing mode of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Directory,
    Bucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Object,
}

/// One child of a listed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
}

/// Per-write settings passed through to the store uninterpreted.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub durability_level: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHandle {
    pub id: String,
    pub path: String,
    /// Location parts are written under; backend specific.
    pub parts_location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReference {
    pub part_number: PartNumber,
    pub etag: String,
}

/// User metadata of an object, keyed by header name.
pub type Metadata = BTreeMap<String, String>;

/// What a `HEAD` of an object reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub content_length: Option<ByteCount>,
    pub metadata: Metadata,
}

/// Operations the transfer core needs from an object store.
pub trait ObjectStoreClient {
    fn get(&self, path: &str) -> Result<ByteStream, StoreError>;

    fn ranged_get(
        &self,
        path: &str,
        start: ByteCount,
        end: ByteCount,
    ) -> Result<ByteStream, StoreError>;

    /// `content_length` of `None` streams the body with chunked encoding.
    fn put(
        &self,
        path: &str,
        body: ByteStream,
        content_length: Option<ByteCount>,
        options: &PutOptions,
    ) -> Result<(), StoreError>;

    fn initiate_multipart_upload(&self, path: &str) -> Result<UploadHandle, StoreError>;

    fn upload_part(
        &self,
        upload: &UploadHandle,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<PartReference, StoreError>;

    fn complete_multipart_upload(
        &self,
        upload: &UploadHandle,
        parts: &[PartReference],
    ) -> Result<(), StoreError>;

    fn abort_multipart_upload(&self, upload: &UploadHandle) -> Result<(), StoreError>;

    fn create_container(&self, path: &str, kind: ContainerKind) -> Result<(), StoreError>;

    fn delete_container(&self, path: &str, kind: ContainerKind) -> Result<(), StoreError>;

    fn list_children(&self, path: &str) -> Result<Vec<Entry>, StoreError>;

    fn delete_entry(&self, path: &str) -> Result<(), StoreError>;

    /// Replaces the user metadata of an existing object.
    fn put_metadata(&self, path: &str, metadata: &Metadata) -> Result<(), StoreError>;

    fn head(&self, path: &str) -> Result<ObjectInfo, StoreError>;
}
