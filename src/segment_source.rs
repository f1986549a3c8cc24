use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::range_reader::SegmentSource;
use crate::shared_types::{ByteStream, Segment};
use crate::store::{ObjectStoreClient, StoreError};

/// Fetches each segment with a ranged GET against the store.
pub struct StoreSegmentSource<'a, C: ObjectStoreClient> {
    client: &'a C,
    path: String,
    fetched: u32,
}

impl<'a, C: ObjectStoreClient> StoreSegmentSource<'a, C> {
    pub fn new(client: &'a C, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
            fetched: 0,
        }
    }
}

impl<C: ObjectStoreClient> SegmentSource for StoreSegmentSource<'_, C> {
    type Stream = io::Take<ByteStream>;

    fn open_next(&mut self, segment: &Segment) -> Result<Self::Stream, StoreError> {
        self.fetched += 1;
        debug!("range GET #{} of {} ({})", self.fetched, self.path, segment);

        let stream = self
            .client
            .ranged_get(&self.path, segment.start, segment.end)?;
        Ok(stream.take(segment.size()))
    }
}

/// Reads each segment out of a local file, for offline verification.
pub struct FileSegmentSource {
    path: PathBuf,
    opened: u32,
}

impl FileSegmentSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            opened: 0,
        }
    }
}

impl SegmentSource for FileSegmentSource {
    type Stream = io::Take<File>;

    fn open_next(&mut self, segment: &Segment) -> Result<Self::Stream, StoreError> {
        self.opened += 1;
        debug!(
            "opening {} at {} for section #{}",
            self.path.display(),
            segment,
            self.opened
        );

        let mut file = File::open(&self.path)?;
        let position = file.seek(SeekFrom::Start(segment.start))?;
        if position != segment.start {
            return Err(StoreError::Protocol(format!(
                "seek in {} landed at {position} instead of {}",
                self.path.display(),
                segment.start
            )));
        }
        Ok(file.take(segment.size()))
    }
}
