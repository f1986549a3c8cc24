//! Splits an outgoing byte stream into bounded parts and drives a multipart
//! upload (initiate, upload each part, complete) through the store client.

use std::io::Read;

use bytes::Bytes;

use crate::errors::{Result, TransferError};
use crate::segment_planner;
use crate::shared_types::{ByteCount, PartNumber};
use crate::store::{ObjectStoreClient, PartReference, UploadHandle};

/// Default and minimum useful part size (5 MiB).
pub const DEFAULT_SPLIT_SIZE: ByteCount = 5_242_880;

#[derive(Debug, Clone)]
pub struct UploadPart {
    pub part_number: PartNumber,
    pub payload: Bytes,
}

pub struct ChunkedUploadCoordinator<'a, C: ObjectStoreClient> {
    client: &'a C,
    split_size: ByteCount,
}

impl<'a, C: ObjectStoreClient> ChunkedUploadCoordinator<'a, C> {
    pub fn new(client: &'a C, split_size: ByteCount) -> Result<Self> {
        if split_size == 0 {
            return Err(TransferError::InvalidArgument(
                "split size must be greater than zero".into(),
            ));
        }
        Ok(Self { client, split_size })
    }

    /// Uploads `available` bytes of `source` to `path` and returns the part
    /// manifest handed to the completion call.
    ///
    /// Any failure after initiation aborts the remote upload; nothing is
    /// completed partially.
    pub fn upload<R: Read>(
        &self,
        path: &str,
        mut source: R,
        available: ByteCount,
    ) -> Result<Vec<PartReference>> {
        let plan = segment_planner::split_by_size(available, self.split_size)?;
        let upload = self.client.initiate_multipart_upload(path)?;
        debug!(
            "multipart upload {} for {}: {} bytes in {} parts",
            upload.id,
            path,
            available,
            plan.len()
        );

        let result = plan
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let part = read_part(&mut source, i as PartNumber + 1, segment.size())?;
                self.upload_part(&upload, part)
            })
            .collect::<Result<Vec<_>>>()
            .and_then(|manifest| self.complete(&upload, manifest));

        if result.is_err() {
            self.abort(&upload);
        }
        result
    }

    fn upload_part(&self, upload: &UploadHandle, part: UploadPart) -> Result<PartReference> {
        let part_number = part.part_number;
        debug!(
            "uploading part {} of {} ({} bytes)",
            part_number,
            upload.id,
            part.payload.len()
        );
        self.client
            .upload_part(upload, part_number, part.payload)
            .map_err(|source| TransferError::PartUploadFailed {
                part_number,
                source,
            })
    }

    fn complete(
        &self,
        upload: &UploadHandle,
        manifest: Vec<PartReference>,
    ) -> Result<Vec<PartReference>> {
        if manifest.is_empty() {
            return Err(TransferError::EmptyUpload);
        }
        self.client.complete_multipart_upload(upload, &manifest)?;
        debug!("completed {} with {} parts", upload.id, manifest.len());
        Ok(manifest)
    }

    fn abort(&self, upload: &UploadHandle) {
        if let Err(e) = self.client.abort_multipart_upload(upload) {
            warn!("failed to abort multipart upload {}: {}", upload.id, e);
        }
    }
}

/// Reads exactly `len` bytes of the next part; never more.
fn read_part<R: Read>(source: &mut R, part_number: PartNumber, len: ByteCount) -> Result<UploadPart> {
    let mut payload = Vec::with_capacity(len as usize);
    let actual = source.take(len).read_to_end(&mut payload)? as ByteCount;
    if actual != len {
        return Err(TransferError::SourceTruncated {
            part_number,
            expected: len,
            actual,
        });
    }

    Ok(UploadPart {
        part_number,
        payload: Bytes::from(payload),
    })
}
