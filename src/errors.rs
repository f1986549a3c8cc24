use std::io;

use thiserror::Error;

use crate::shared_types::{ByteCount, PartNumber};
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation not supported: {0}")]
    OperationNotSupported(&'static str),

    #[error("Failed to fetch segment {index}: {source}")]
    SegmentFetchFailed {
        index: usize,
        #[source]
        source: StoreError,
    },

    #[error("Segment {index} ended after {actual} of {expected} bytes")]
    SegmentTruncated {
        index: usize,
        expected: ByteCount,
        actual: ByteCount,
    },

    #[error("Failed to upload part {part_number}: {source}")]
    PartUploadFailed {
        part_number: PartNumber,
        #[source]
        source: StoreError,
    },

    #[error("Source ran dry while reading part {part_number}: got {actual} of {expected} bytes")]
    SourceTruncated {
        part_number: PartNumber,
        expected: ByteCount,
        actual: ByteCount,
    },

    #[error("Multipart upload has no parts to complete")]
    EmptyUpload,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<TransferError> for io::Error {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => e,
            TransferError::OperationNotSupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            TransferError::InvalidArgument(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            other => io::Error::other(other),
        }
    }
}
