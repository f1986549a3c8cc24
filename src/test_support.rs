//! In-memory `ObjectStoreClient` with call recording and failure injection.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Cursor, Read};

use bytes::Bytes;

use crate::shared_types::{ByteCount, ByteStream, PartNumber};
use crate::store::{
    ContainerKind, Entry, EntryKind, Metadata, ObjectInfo, ObjectStoreClient, PartReference,
    PutOptions, StoreError, StoreErrorKind, UploadHandle,
};

#[derive(Default)]
pub(crate) struct MemoryStore {
    objects: RefCell<BTreeMap<String, Vec<u8>>>,
    metadata: RefCell<HashMap<String, Metadata>>,
    containers: RefCell<BTreeSet<String>>,
    uploads: RefCell<HashMap<String, BTreeMap<PartNumber, Bytes>>>,
    part_sizes: RefCell<HashMap<String, Vec<usize>>>,
    calls: RefCell<Vec<String>>,
    next_upload: Cell<u32>,
    /// Part number whose upload fails.
    pub fail_part: Cell<Option<PartNumber>>,
    /// Remaining number of puts rejected as if their container was missing.
    pub reject_puts: Cell<u32>,
}

fn parent_of(path: &str) -> &str {
    let parent = path.rsplit_once('/').map_or("", |(parent, _)| parent);
    parent.strip_suffix("/objects").unwrap_or(parent)
}

impl MemoryStore {
    pub fn with_containers(paths: &[&str]) -> Self {
        let store = Self::default();
        store
            .containers
            .borrow_mut()
            .extend(paths.iter().map(|p| p.to_string()));
        store
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.borrow().get(path).cloned()
    }

    pub fn insert_object(&self, path: &str, data: &[u8]) {
        self.objects.borrow_mut().insert(path.to_owned(), data.to_vec());
    }

    pub fn has_container(&self, path: &str) -> bool {
        self.containers.borrow().contains(path)
    }

    pub fn part_sizes(&self, path: &str) -> Vec<usize> {
        self.part_sizes
            .borrow()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn missing_parent(&self, path: &str) -> Option<StoreError> {
        let parent = parent_of(path);
        if self.containers.borrow().contains(parent) {
            return None;
        }
        let kind = if parent.contains("/buckets/") {
            StoreErrorKind::BucketMissing
        } else {
            StoreErrorKind::ContainerMissing
        };
        Some(StoreError::remote(kind, path, "parent container does not exist"))
    }

    fn is_empty_container(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        !self.objects.borrow().keys().any(|k| k.starts_with(&prefix))
            && !self.containers.borrow().iter().any(|c| c.starts_with(&prefix))
    }
}

impl ObjectStoreClient for MemoryStore {
    fn get(&self, path: &str) -> Result<ByteStream, StoreError> {
        self.record(format!("get {path}"));
        let data = self
            .object(path)
            .ok_or_else(|| StoreError::remote(StoreErrorKind::NotFound, path, "no such object"))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn ranged_get(
        &self,
        path: &str,
        start: ByteCount,
        end: ByteCount,
    ) -> Result<ByteStream, StoreError> {
        self.record(format!("ranged_get {path} {start}-{end}"));
        let data = self
            .object(path)
            .ok_or_else(|| StoreError::remote(StoreErrorKind::NotFound, path, "no such object"))?;
        let end = (end as usize + 1).min(data.len());
        Ok(Box::new(Cursor::new(data[start as usize..end].to_vec())))
    }

    fn put(
        &self,
        path: &str,
        mut body: ByteStream,
        content_length: Option<ByteCount>,
        options: &PutOptions,
    ) -> Result<(), StoreError> {
        self.record(format!(
            "put {path} length={content_length:?} durability={:?}",
            options.durability_level
        ));
        if self.reject_puts.get() > 0 {
            self.reject_puts.set(self.reject_puts.get() - 1);
            return Err(StoreError::remote(
                StoreErrorKind::ContainerMissing,
                path,
                "rejected by test",
            ));
        }
        if let Some(err) = self.missing_parent(path) {
            return Err(err);
        }
        let mut data = Vec::new();
        body.read_to_end(&mut data)?;
        self.objects.borrow_mut().insert(path.to_owned(), data);
        self.metadata.borrow_mut().remove(path);
        Ok(())
    }

    fn initiate_multipart_upload(&self, path: &str) -> Result<UploadHandle, StoreError> {
        self.record(format!("initiate {path}"));
        let id = format!("upload-{}", self.next_upload.get());
        self.next_upload.set(self.next_upload.get() + 1);
        self.uploads.borrow_mut().insert(id.clone(), BTreeMap::new());
        Ok(UploadHandle {
            id: id.clone(),
            path: path.to_owned(),
            parts_location: format!("/uploads/{id}"),
        })
    }

    fn upload_part(
        &self,
        upload: &UploadHandle,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<PartReference, StoreError> {
        self.record(format!("part {} {}", upload.id, part_number));
        if self.fail_part.get() == Some(part_number) {
            return Err(StoreError::remote(
                StoreErrorKind::Other("InternalError".into()),
                &upload.parts_location,
                "part rejected",
            ));
        }
        let mut uploads = self.uploads.borrow_mut();
        let parts = uploads.get_mut(&upload.id).ok_or_else(|| {
            StoreError::remote(StoreErrorKind::NotFound, &upload.id, "unknown upload")
        })?;
        parts.insert(part_number, payload);
        Ok(PartReference {
            part_number,
            etag: format!("etag-{part_number}"),
        })
    }

    fn complete_multipart_upload(
        &self,
        upload: &UploadHandle,
        parts: &[PartReference],
    ) -> Result<(), StoreError> {
        self.record(format!("complete {} {}", upload.id, parts.len()));
        let staged = self.uploads.borrow_mut().remove(&upload.id).ok_or_else(|| {
            StoreError::remote(StoreErrorKind::NotFound, &upload.id, "unknown upload")
        })?;

        let mut data = Vec::new();
        let mut sizes = Vec::new();
        for part in parts {
            let payload = staged.get(&part.part_number).ok_or_else(|| {
                StoreError::Protocol(format!("part {} was never uploaded", part.part_number))
            })?;
            sizes.push(payload.len());
            data.extend_from_slice(payload);
        }
        self.part_sizes.borrow_mut().insert(upload.path.clone(), sizes);
        self.objects.borrow_mut().insert(upload.path.clone(), data);
        Ok(())
    }

    fn abort_multipart_upload(&self, upload: &UploadHandle) -> Result<(), StoreError> {
        self.record(format!("abort {}", upload.id));
        self.uploads.borrow_mut().remove(&upload.id);
        Ok(())
    }

    fn create_container(&self, path: &str, kind: ContainerKind) -> Result<(), StoreError> {
        self.record(format!("create_container {path} {kind:?}"));
        let mut containers = self.containers.borrow_mut();
        containers.insert(path.to_owned());
        if kind == ContainerKind::Bucket {
            containers.insert(format!("{path}/objects"));
        }
        Ok(())
    }

    fn delete_container(&self, path: &str, kind: ContainerKind) -> Result<(), StoreError> {
        self.record(format!("delete_container {path} {kind:?}"));
        if !self.has_container(path) {
            let missing = match kind {
                ContainerKind::Bucket => StoreErrorKind::BucketMissing,
                ContainerKind::Directory => StoreErrorKind::NotFound,
            };
            return Err(StoreError::remote(missing, path, "no such container"));
        }
        let holds_entries = match kind {
            ContainerKind::Bucket => !self.is_empty_container(&format!("{path}/objects")),
            ContainerKind::Directory => !self.is_empty_container(path),
        };
        if holds_entries {
            return Err(StoreError::remote(
                StoreErrorKind::ContainerNotEmpty,
                path,
                "container not empty",
            ));
        }
        let prefix = format!("{path}/");
        self.containers
            .borrow_mut()
            .retain(|c| c != path && !c.starts_with(&prefix));
        Ok(())
    }

    fn list_children(&self, path: &str) -> Result<Vec<Entry>, StoreError> {
        self.record(format!("list {path}"));
        let direct = |p: &String| p.rsplit_once('/').map(|(parent, _)| parent) == Some(path);
        let name = |p: &String| p.rsplit('/').next().unwrap_or_default().to_owned();

        let mut entries: Vec<Entry> = self
            .containers
            .borrow()
            .iter()
            .filter(|p| direct(*p))
            .map(|p| Entry {
                name: name(p),
                kind: EntryKind::Directory,
            })
            .collect();
        entries.extend(self.objects.borrow().keys().filter(|p| direct(*p)).map(|p| Entry {
            name: name(p),
            kind: EntryKind::Object,
        }));
        Ok(entries)
    }

    fn delete_entry(&self, path: &str) -> Result<(), StoreError> {
        self.record(format!("delete {path}"));
        if self.objects.borrow_mut().remove(path).is_some() {
            self.metadata.borrow_mut().remove(path);
            return Ok(());
        }
        if self.has_container(path) {
            return self.delete_container(path, ContainerKind::Directory);
        }
        Err(StoreError::remote(StoreErrorKind::NotFound, path, "no such entry"))
    }

    fn put_metadata(&self, path: &str, metadata: &Metadata) -> Result<(), StoreError> {
        self.record(format!("put_metadata {path} {}", metadata.len()));
        if self.object(path).is_none() {
            return Err(StoreError::remote(StoreErrorKind::NotFound, path, "no such object"));
        }
        self.metadata
            .borrow_mut()
            .insert(path.to_owned(), metadata.clone());
        Ok(())
    }

    fn head(&self, path: &str) -> Result<ObjectInfo, StoreError> {
        self.record(format!("head {path}"));
        let data = self
            .object(path)
            .ok_or_else(|| StoreError::remote(StoreErrorKind::NotFound, path, "no such object"))?;
        Ok(ObjectInfo {
            content_length: Some(data.len() as ByteCount),
            metadata: self
                .metadata
                .borrow()
                .get(path)
                .cloned()
                .unwrap_or_default(),
        })
    }
}
