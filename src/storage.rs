//! Container and object operations on top of an [`ObjectStoreClient`],
//! routing reads through segmented range fetches and writes through
//! multipart uploads as configured.

use std::io::{self, Read};

use crate::chunked_upload::ChunkedUploadCoordinator;
use crate::config::{ContainerMode, TransferConfig};
use crate::errors::{Result, TransferError};
use crate::range_reader::SequentialRangeReader;
use crate::retry_policy::{on_store_error, CreateOnDemandRetryPolicy};
use crate::segment_source::StoreSegmentSource;
use crate::shared_types::{ByteCount, ByteStream};
use crate::store::{
    ContainerKind, EntryKind, Metadata, ObjectStoreClient, PutOptions, StoreError,
    StoreErrorKind,
};

const BUCKETS_DIRECTORY: &str = "buckets";
const METADATA_KEY_PREFIX: &str = "m-";
const BUCKET_OBJECTS_DIRECTORY: &str = "objects";

/// Bucket and bucket object names only keep lowercase alphanumerics.
fn sanitize(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub struct Storage<C: ObjectStoreClient> {
    client: C,
    config: TransferConfig,
    home: String,
    root: String,
}

impl<C: ObjectStoreClient> Storage<C> {
    pub fn new(client: C, config: TransferConfig, home: impl Into<String>) -> Self {
        let home = home.into().trim_end_matches('/').to_owned();
        let root = match config.mode {
            ContainerMode::Directory => format!("{home}/{}", config.base_directory),
            ContainerMode::Buckets => format!("{home}/{BUCKETS_DIRECTORY}"),
        };
        Self {
            client,
            config,
            home,
            root,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Makes sure the directory or bucket root objects are placed under exists.
    pub fn init(&self) -> Result<()> {
        match self.config.mode {
            ContainerMode::Directory => {
                self.create_directories(&self.root)?;
            }
            ContainerMode::Buckets => match self.client.list_children(&self.root) {
                Err(e) if e.is_not_found() => {
                    error!("Buckets not supported by the store at {}", self.root);
                    return Err(e.into());
                }
                result => {
                    result?;
                }
            },
        }
        debug!("storage initialized at {}", self.root);
        Ok(())
    }

    pub fn create_container(&self, container: &str) -> Result<()> {
        if self.config.logging {
            match self.config.mode {
                ContainerMode::Directory => info!("Performing PUT dir at /{}", container),
                ContainerMode::Buckets => info!("Performing CREATE bucket at /{}", container),
            }
        }
        self.client
            .create_container(&self.container_path(container), self.container_kind())?;
        Ok(())
    }

    /// Deletes a container together with everything in it. A container that
    /// does not exist counts as deleted.
    pub fn delete_container(&self, container: &str) -> Result<()> {
        if self.config.logging {
            match self.config.mode {
                ContainerMode::Directory => info!("Performing DELETE dir at /{}", container),
                ContainerMode::Buckets => info!("Performing DELETE bucket at /{}", container),
            }
        }

        let path = self.container_path(container);
        let kind = self.container_kind();
        let mut policy = on_store_error(StoreErrorKind::ContainerNotEmpty, || {
            self.remove_children(&self.listing_path(&path))
        });

        match policy.attempt(|| self.client.delete_container(&path, kind)) {
            Err(e) if e.is_not_found() => {
                debug!("{} was already gone", path);
                Ok(())
            }
            result => {
                if let Err(e) = &result {
                    if self.config.logging {
                        error!("Error deleting container {}: {}", container, e);
                    }
                }
                Ok(result?)
            }
        }
    }

    /// Writes `length` bytes produced by `open` to the object. `open` is
    /// called again when the write is retried after creating a missing
    /// container, so it must yield the full payload every time.
    pub fn create_object<F>(
        &self,
        container: &str,
        object: &str,
        mut open: F,
        length: ByteCount,
    ) -> Result<()>
    where
        F: FnMut() -> io::Result<ByteStream>,
    {
        if self.config.logging {
            info!("Performing PUT at {}", self.display_path(container, object));
        }

        let path = self.object_path(container, object);
        let container_path = self.container_path(container);
        let missing = match self.config.mode {
            ContainerMode::Directory => StoreErrorKind::ContainerMissing,
            ContainerMode::Buckets => StoreErrorKind::BucketMissing,
        };
        let mut policy = CreateOnDemandRetryPolicy::new(
            move |e: &TransferError| matches!(e, TransferError::Store(s) if s.is_kind(&missing)),
            || {
                debug!("creating missing container {}", container_path);
                self.ensure_container(&container_path)
                    .map_err(TransferError::from)
            },
        );

        let result = if self.config.multipart {
            let coordinator = ChunkedUploadCoordinator::new(&self.client, self.config.split_size)?;
            policy
                .attempt(|| coordinator.upload(&path, open()?, length))
                .map(|parts| debug!("{} written in {} parts", path, parts.len()))
        } else {
            let content_length = if self.config.chunked {
                None
            } else {
                Some(length)
            };
            let options = PutOptions {
                durability_level: self.config.durability_level,
            };
            policy.attempt(|| {
                self.client
                    .put(&path, open()?, content_length, &options)
                    .map_err(TransferError::from)
            })
        };

        if let Err(e) = &result {
            if self.config.logging {
                error!("Error creating object {}: {}", path, e);
            }
        }
        result
    }

    /// Opens the object for reading: a plain stream for a single section,
    /// otherwise ranged fetches spliced into one stream.
    pub fn get_object(&self, container: &str, object: &str) -> Result<Box<dyn Read + '_>> {
        let path = self.object_path(container, object);

        if self.config.sections == 1 {
            if self.config.logging {
                info!("Performing GET at {}", self.display_path(container, object));
            }
            return Ok(Box::new(self.client.get(&path)?));
        }

        let size = self.config.object_size.ok_or_else(|| {
            TransferError::InvalidArgument(
                "object size must be set when more than one section is requested".into(),
            )
        })?;
        if self.config.logging {
            info!(
                "Performing GET with HTTP byte range at {}",
                self.display_path(container, object)
            );
        }
        let source = StoreSegmentSource::new(&self.client, path.clone());
        let reader = SequentialRangeReader::new(path, source, size, self.config.sections)?;
        Ok(Box::new(reader))
    }

    /// Deletes the object; a missing object counts as deleted.
    pub fn delete_object(&self, container: &str, object: &str) -> Result<()> {
        if self.config.logging {
            info!("Performing DELETE at {}", self.display_path(container, object));
        }

        let path = self.object_path(container, object);
        match self.client.delete_entry(&path) {
            Err(e) if e.is_not_found() => Ok(()),
            result => Ok(result?),
        }
    }

    /// Replaces the object's user metadata. Every key is stored with an `m-`
    /// prefix, the namespace the store keeps user metadata in.
    pub fn create_metadata(
        &self,
        container: &str,
        object: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        if self.config.logging {
            info!("Performing POST at {}", self.display_path(container, object));
        }

        let prefixed: Metadata = metadata
            .iter()
            .map(|(key, value)| (format!("{METADATA_KEY_PREFIX}{key}"), value.clone()))
            .collect();
        let path = self.object_path(container, object);
        self.client.put_metadata(&path, &prefixed).map_err(|e| {
            if self.config.logging {
                error!("Error creating metadata of {}: {}", path, e);
            }
            e.into()
        })
    }

    /// User metadata of the object, keys as stored (`m-` prefixed).
    pub fn get_metadata(&self, container: &str, object: &str) -> Result<Metadata> {
        if self.config.logging {
            info!("Performing HEAD at {}", self.display_path(container, object));
        }

        let path = self.object_path(container, object);
        match self.client.head(&path) {
            Ok(info) => Ok(info.metadata),
            Err(e) => {
                if self.config.logging {
                    error!("Error getting metadata of {}: {}", path, e);
                }
                Err(e.into())
            }
        }
    }

    fn container_kind(&self) -> ContainerKind {
        match self.config.mode {
            ContainerMode::Directory => ContainerKind::Directory,
            ContainerMode::Buckets => ContainerKind::Bucket,
        }
    }

    fn container_path(&self, container: &str) -> String {
        match self.config.mode {
            ContainerMode::Directory => format!("{}/{}", self.root, container),
            ContainerMode::Buckets => format!("{}/{}", self.root, sanitize(container)),
        }
    }

    /// Where the objects of a container are listed.
    fn listing_path(&self, container_path: &str) -> String {
        match self.config.mode {
            ContainerMode::Directory => container_path.to_owned(),
            ContainerMode::Buckets => format!("{container_path}/{BUCKET_OBJECTS_DIRECTORY}"),
        }
    }

    fn object_path(&self, container: &str, object: &str) -> String {
        let container_path = self.container_path(container);
        match self.config.mode {
            ContainerMode::Directory => format!("{container_path}/{object}"),
            ContainerMode::Buckets => format!(
                "{}/{}",
                self.listing_path(&container_path),
                sanitize(object)
            ),
        }
    }

    fn display_path(&self, container: &str, object: &str) -> String {
        match self.config.mode {
            ContainerMode::Directory => format!("/{container}/{object}"),
            ContainerMode::Buckets => format!("/{container}/{BUCKET_OBJECTS_DIRECTORY}/{object}"),
        }
    }

    fn ensure_container(&self, container_path: &str) -> std::result::Result<(), StoreError> {
        match self.config.mode {
            ContainerMode::Directory => self.create_directories(container_path),
            ContainerMode::Buckets => self
                .client
                .create_container(container_path, ContainerKind::Bucket),
        }
    }

    /// Creates every directory of `path` below the home directory.
    fn create_directories(&self, path: &str) -> std::result::Result<(), StoreError> {
        let relative = path
            .strip_prefix(&self.home)
            .unwrap_or(path)
            .trim_matches('/');
        let mut current = self.home.clone();
        for component in relative.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            self.client
                .create_container(&current, ContainerKind::Directory)?;
        }
        Ok(())
    }

    /// Deletes everything listed under `listing_path`, descending into
    /// subdirectories. Entries that vanish meanwhile are ignored.
    fn remove_children(&self, listing_path: &str) -> std::result::Result<(), StoreError> {
        for entry in self.client.list_children(listing_path)? {
            let child = format!("{listing_path}/{}", entry.name);
            if entry.kind == EntryKind::Directory {
                self.remove_children(&child)?;
            }
            match self.client.delete_entry(&child) {
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    if self.config.logging {
                        error!("Container is not empty. Error deleting {}: {}", child, e);
                    }
                    return Err(e);
                }
                Ok(()) => {}
            }
        }
        Ok(())
    }
}
