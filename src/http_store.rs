use std::time::Duration;

use bytes::Bytes;
use if_chain::if_chain;
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, ETAG, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::shared_types::{ByteCount, ByteStream, PartNumber, Segment};
use crate::store::{
    ContainerKind, Entry, EntryKind, Metadata, ObjectInfo, ObjectStoreClient, PartReference,
    PutOptions, StoreError, StoreErrorKind, UploadHandle,
};

const DIRECTORY_CONTENT_TYPE: &str = "application/json; type=directory";
const DURABILITY_HEADER: &str = "durability-level";
const LIST_PAGE_SIZE: usize = 1024;
const METADATA_HEADER_PREFIX: &str = "m-";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ListingLine {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest<'a> {
    object_path: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    id: String,
    parts_directory: String,
}

#[derive(Serialize)]
struct CommitRequest<'a> {
    parts: Vec<&'a str>,
}

fn kind_for_code(code: &str) -> StoreErrorKind {
    match code {
        "DirectoryDoesNotExist" => StoreErrorKind::ContainerMissing,
        "BucketNotFound" => StoreErrorKind::BucketMissing,
        "BucketNotEmpty" | "DirectoryNotEmpty" => StoreErrorKind::ContainerNotEmpty,
        "ResourceNotFound" | "ObjectNotFound" => StoreErrorKind::NotFound,
        other => StoreErrorKind::Other(other.to_owned()),
    }
}

fn classify(path: &str, status: StatusCode, body: &str) -> StoreError {
    if_chain! {
        if !body.trim().is_empty();
        if let Ok(error) = serde_json::from_str::<ErrorBody>(body);
        then {
            StoreError::remote(kind_for_code(&error.code), path, error.message)
        } else {
            let kind = if status == StatusCode::NOT_FOUND {
                StoreErrorKind::NotFound
            } else {
                StoreErrorKind::Other(status.to_string())
            };
            StoreError::remote(kind, path, body.trim())
        }
    }
}

/// User metadata travels as `m-` prefixed headers.
fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
    headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with(METADATA_HEADER_PREFIX))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect()
}

fn entry_kind(kind: &str) -> EntryKind {
    match kind {
        "directory" | "bucket" => EntryKind::Directory,
        _ => EntryKind::Object,
    }
}

fn parse_listing(body: &str) -> Result<Vec<ListingLine>, StoreError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| StoreError::Protocol(format!("bad listing line {line:?}: {e}")))
        })
        .collect()
}

/// Blocking client for a Manta-style object store REST interface.
pub struct HttpStore {
    client: Client,
    base: Url,
    home: String,
}

impl HttpStore {
    pub fn new(base: Url, user: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Option::<Duration>::None)
            .build()?;
        Ok(Self {
            client,
            base,
            home: format!("/{user}"),
        })
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    /// Appends each component of `path` to the base URL as its own
    /// percent-encoded segment.
    fn url(&self, path: &str) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| StoreError::Protocol(format!("{} cannot hold a store path", self.base)))?
            .pop_if_empty()
            .extend(path.split('/').filter(|c| !c.is_empty()));
        Ok(url)
    }

    fn send(&self, path: &str, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(classify(path, status, &body))
    }
}

impl ObjectStoreClient for HttpStore {
    fn get(&self, path: &str) -> Result<ByteStream, StoreError> {
        let response = self.send(path, self.client.get(self.url(path)?))?;
        Ok(Box::new(response))
    }

    fn ranged_get(
        &self,
        path: &str,
        start: ByteCount,
        end: ByteCount,
    ) -> Result<ByteStream, StoreError> {
        let segment = Segment::new(start, end);
        let request = self
            .client
            .get(self.url(path)?)
            .header(RANGE, segment.to_string());
        let response = self.send(path, request)?;

        if response.status() != StatusCode::PARTIAL_CONTENT && start > 0 {
            return Err(StoreError::Protocol(format!(
                "{path}: store ignored range {segment} (status {})",
                response.status()
            )));
        }
        Ok(Box::new(response))
    }

    fn put(
        &self,
        path: &str,
        body: ByteStream,
        content_length: Option<ByteCount>,
        options: &PutOptions,
    ) -> Result<(), StoreError> {
        let body = match content_length {
            Some(len) => Body::sized(body, len),
            None => Body::new(body),
        };
        let mut request = self
            .client
            .put(self.url(path)?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body);
        if let Some(level) = options.durability_level {
            request = request.header(DURABILITY_HEADER, level.to_string());
        }

        self.send(path, request)?;
        debug!("PUT {} complete", path);
        Ok(())
    }

    fn initiate_multipart_upload(&self, path: &str) -> Result<UploadHandle, StoreError> {
        let uploads = format!("{}/uploads", self.home);
        let request = self
            .client
            .post(self.url(&uploads)?)
            .json(&InitiateRequest { object_path: path });
        let created: InitiateResponse = self.send(&uploads, request)?.json()?;

        Ok(UploadHandle {
            id: created.id,
            path: path.to_owned(),
            parts_location: created.parts_directory,
        })
    }

    fn upload_part(
        &self,
        upload: &UploadHandle,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<PartReference, StoreError> {
        let part_path = format!("{}/{}", upload.parts_location, part_number);
        let request = self.client.put(self.url(&part_path)?).body(payload);
        let response = self.send(&part_path, request)?;

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StoreError::Protocol(format!("{part_path}: response carried no etag")))?;
        Ok(PartReference {
            part_number,
            etag: etag.to_owned(),
        })
    }

    fn complete_multipart_upload(
        &self,
        upload: &UploadHandle,
        parts: &[PartReference],
    ) -> Result<(), StoreError> {
        let commit = format!("{}/commit", upload.parts_location);
        let body = CommitRequest {
            parts: parts.iter().map(|p| p.etag.as_str()).collect(),
        };
        self.send(&commit, self.client.post(self.url(&commit)?).json(&body))?;
        Ok(())
    }

    fn abort_multipart_upload(&self, upload: &UploadHandle) -> Result<(), StoreError> {
        let abort = format!("{}/abort", upload.parts_location);
        self.send(&abort, self.client.post(self.url(&abort)?))?;
        Ok(())
    }

    fn create_container(&self, path: &str, kind: ContainerKind) -> Result<(), StoreError> {
        let request = self.client.put(self.url(path)?);
        let request = match kind {
            ContainerKind::Directory => request.header(CONTENT_TYPE, DIRECTORY_CONTENT_TYPE),
            ContainerKind::Bucket => request,
        };
        self.send(path, request)?;
        Ok(())
    }

    fn delete_container(&self, path: &str, _kind: ContainerKind) -> Result<(), StoreError> {
        self.delete_entry(path)
    }

    fn list_children(&self, path: &str) -> Result<Vec<Entry>, StoreError> {
        let mut entries: Vec<Entry> = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.url(path)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("limit", &LIST_PAGE_SIZE.to_string());
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }
            let body = self.send(path, self.client.get(url))?.text()?;
            let page = parse_listing(&body)?;
            let page_len = page.len();

            entries.extend(
                page.into_iter()
                    .filter(|line| marker.as_deref() != Some(line.name.as_str()))
                    .map(|line| Entry {
                        kind: entry_kind(&line.kind),
                        name: line.name,
                    }),
            );

            let next_marker = entries.last().map(|e| e.name.clone());
            if page_len < LIST_PAGE_SIZE || next_marker == marker {
                break;
            }
            marker = next_marker;
        }

        Ok(entries)
    }

    fn delete_entry(&self, path: &str) -> Result<(), StoreError> {
        self.send(path, self.client.delete(self.url(path)?))?;
        debug!("DELETE {} complete", path);
        Ok(())
    }

    fn put_metadata(&self, path: &str, metadata: &Metadata) -> Result<(), StoreError> {
        let mut url = self.url(path)?;
        url.query_pairs_mut().append_pair("metadata", "true");

        let request = metadata
            .iter()
            .fold(self.client.put(url), |request, (name, value)| {
                request.header(name.as_str(), value.as_str())
            });
        self.send(path, request)?;
        debug!("metadata of {} replaced ({} keys)", path, metadata.len());
        Ok(())
    }

    fn head(&self, path: &str) -> Result<ObjectInfo, StoreError> {
        let response = self.send(path, self.client.head(self.url(path)?))?;
        let headers = response.headers();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Ok(ObjectInfo {
            content_length,
            metadata: metadata_from_headers(headers),
        })
    }
}
