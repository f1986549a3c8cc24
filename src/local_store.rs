//! Filesystem-backed store. Containers are directories and objects are files
//! under a root directory; multipart parts are staged under `.uploads/` and
//! object metadata lives in JSON sidecars under `.metadata/`.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::shared_types::{ByteCount, ByteStream, PartNumber};
use crate::store::{
    ContainerKind, Entry, EntryKind, Metadata, ObjectInfo, ObjectStoreClient, PartReference,
    PutOptions, StoreError, StoreErrorKind, UploadHandle,
};

const STAGING_DIR: &str = ".uploads";
const METADATA_DIR: &str = ".metadata";
const ASSEMBLED_FILE: &str = "assembled";
const BUCKET_OBJECTS_DIR: &str = "objects";

pub struct LocalStore {
    root: PathBuf,
    next_upload: AtomicU64,
}

fn not_found_or_io(path: &str, err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::remote(StoreErrorKind::NotFound, path, err.to_string())
    } else {
        StoreError::Io(err)
    }
}

fn is_empty_dir(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            next_upload: AtomicU64::new(0),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }

    fn missing_kind(key: &str) -> StoreErrorKind {
        if key.contains("/buckets/") {
            StoreErrorKind::BucketMissing
        } else {
            StoreErrorKind::ContainerMissing
        }
    }

    fn ensure_parent(&self, key: &str) -> Result<PathBuf, StoreError> {
        let path = self.path_for(key);
        match path.parent() {
            Some(dir) if dir.is_dir() => Ok(path),
            _ => Err(StoreError::remote(
                Self::missing_kind(key),
                key,
                "parent directory does not exist",
            )),
        }
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root
            .join(METADATA_DIR)
            .join(format!("{}.json", key.trim_start_matches('/')))
    }

    /// A rewritten or deleted object loses its metadata.
    fn clear_metadata(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.metadata_path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(StoreError::Io(e)),
            _ => Ok(()),
        }
    }

    fn staging_dir(&self, upload: &UploadHandle) -> PathBuf {
        self.root.join(STAGING_DIR).join(&upload.id)
    }

    fn remove_empty_dir(&self, key: &str, dir: &Path) -> Result<(), StoreError> {
        if !is_empty_dir(dir).map_err(|e| not_found_or_io(key, e))? {
            return Err(StoreError::remote(
                StoreErrorKind::ContainerNotEmpty,
                key,
                "directory is not empty",
            ));
        }
        fs::remove_dir(dir).map_err(|e| not_found_or_io(key, e))
    }
}

impl ObjectStoreClient for LocalStore {
    fn get(&self, path: &str) -> Result<ByteStream, StoreError> {
        let file = File::open(self.path_for(path)).map_err(|e| not_found_or_io(path, e))?;
        Ok(Box::new(file))
    }

    fn ranged_get(
        &self,
        path: &str,
        start: ByteCount,
        end: ByteCount,
    ) -> Result<ByteStream, StoreError> {
        let mut file = File::open(self.path_for(path)).map_err(|e| not_found_or_io(path, e))?;
        file.seek(SeekFrom::Start(start))?;
        Ok(Box::new(file.take(end - start + 1)))
    }

    fn put(
        &self,
        path: &str,
        mut body: ByteStream,
        content_length: Option<ByteCount>,
        _options: &PutOptions,
    ) -> Result<(), StoreError> {
        let target = self.ensure_parent(path)?;
        let mut file = File::create(&target)?;
        let written = io::copy(&mut body, &mut file)?;
        file.flush()?;
        self.clear_metadata(path)?;

        match content_length {
            Some(expected) if expected != written => Err(StoreError::Protocol(format!(
                "{path}: expected {expected} bytes, received {written}"
            ))),
            _ => Ok(()),
        }
    }

    fn initiate_multipart_upload(&self, path: &str) -> Result<UploadHandle, StoreError> {
        let id = format!(
            "{}-{}",
            std::process::id(),
            self.next_upload.fetch_add(1, Ordering::Relaxed)
        );
        let upload = UploadHandle {
            parts_location: format!("/{STAGING_DIR}/{id}"),
            id,
            path: path.to_owned(),
        };
        fs::create_dir_all(self.staging_dir(&upload))?;
        Ok(upload)
    }

    fn upload_part(
        &self,
        upload: &UploadHandle,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<PartReference, StoreError> {
        let part_path = self.staging_dir(upload).join(part_number.to_string());
        fs::write(&part_path, &payload).map_err(|e| not_found_or_io(&upload.parts_location, e))?;
        Ok(PartReference {
            part_number,
            etag: format!("{}-{}", part_number, payload.len()),
        })
    }

    fn complete_multipart_upload(
        &self,
        upload: &UploadHandle,
        parts: &[PartReference],
    ) -> Result<(), StoreError> {
        let target = self.ensure_parent(&upload.path)?;
        let staging = self.staging_dir(upload);

        let mut part_files = parts
            .iter()
            .map(|part| {
                File::open(staging.join(part.part_number.to_string()))
                    .map_err(|e| not_found_or_io(&upload.parts_location, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Assembled next to the parts, then moved over the target in one step.
        let assembled = staging.join(ASSEMBLED_FILE);
        let mut out = File::create(&assembled)?;
        for part_file in part_files.iter_mut() {
            io::copy(part_file, &mut out)?;
        }
        out.flush()?;
        drop(out);

        fs::rename(&assembled, &target)?;
        self.clear_metadata(&upload.path)?;
        fs::remove_dir_all(&staging)?;
        Ok(())
    }

    fn abort_multipart_upload(&self, upload: &UploadHandle) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.staging_dir(upload)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(StoreError::Io(e)),
            _ => Ok(()),
        }
    }

    fn create_container(&self, path: &str, kind: ContainerKind) -> Result<(), StoreError> {
        let dir = self.ensure_parent(path)?;
        if !dir.is_dir() {
            fs::create_dir(&dir)?;
        }
        if kind == ContainerKind::Bucket {
            fs::create_dir_all(dir.join(BUCKET_OBJECTS_DIR))?;
        }
        Ok(())
    }

    fn delete_container(&self, path: &str, kind: ContainerKind) -> Result<(), StoreError> {
        let dir = self.path_for(path);
        match kind {
            ContainerKind::Directory => self.remove_empty_dir(path, &dir),
            ContainerKind::Bucket => {
                if !dir.is_dir() {
                    return Err(StoreError::remote(
                        StoreErrorKind::BucketMissing,
                        path,
                        "bucket does not exist",
                    ));
                }
                let objects = dir.join(BUCKET_OBJECTS_DIR);
                if objects.is_dir() {
                    self.remove_empty_dir(path, &objects)?;
                }
                self.remove_empty_dir(path, &dir)
            }
        }
    }

    fn list_children(&self, path: &str) -> Result<Vec<Entry>, StoreError> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(self.path_for(path)).map_err(|e| not_found_or_io(path, e))? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name == STAGING_DIR || name == METADATA_DIR {
                continue;
            }
            let kind = if dirent.file_type()?.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::Object
            };
            entries.push(Entry { name, kind });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn delete_entry(&self, path: &str) -> Result<(), StoreError> {
        let target = self.path_for(path);
        let metadata = fs::metadata(&target).map_err(|e| not_found_or_io(path, e))?;
        if metadata.is_dir() {
            self.remove_empty_dir(path, &target)
        } else {
            fs::remove_file(&target).map_err(|e| not_found_or_io(path, e))?;
            self.clear_metadata(path)
        }
    }

    fn put_metadata(&self, path: &str, metadata: &Metadata) -> Result<(), StoreError> {
        fs::metadata(self.path_for(path)).map_err(|e| not_found_or_io(path, e))?;

        let sidecar = self.metadata_path(path);
        if let Some(dir) = sidecar.parent() {
            fs::create_dir_all(dir)?;
        }
        let encoded = serde_json::to_vec(metadata)
            .map_err(|e| StoreError::Protocol(format!("{path}: unencodable metadata: {e}")))?;
        fs::write(sidecar, encoded)?;
        Ok(())
    }

    fn head(&self, path: &str) -> Result<ObjectInfo, StoreError> {
        let stat = fs::metadata(self.path_for(path)).map_err(|e| not_found_or_io(path, e))?;
        let metadata = match fs::read(self.metadata_path(path)) {
            Ok(encoded) => serde_json::from_slice(&encoded)
                .map_err(|e| StoreError::Protocol(format!("{path}: corrupt metadata: {e}")))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Metadata::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };

        Ok(ObjectInfo {
            content_length: stat.is_file().then(|| stat.len()),
            metadata,
        })
    }
}
