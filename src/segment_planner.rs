//! Partitioning of a byte range into contiguous inclusive segments.

use crate::errors::{Result, TransferError};
use crate::shared_types::{ByteCount, Segment};

/// Splits `[0, total_size)` into `section_count` contiguous segments.
///
/// Every segment but the last has `total_size / section_count` bytes; the
/// last one also absorbs the remainder. When there are fewer bytes than
/// requested sections, one single-byte segment is emitted per byte.
pub fn partition(total_size: ByteCount, section_count: u32) -> Result<Vec<Segment>> {
    if total_size == 0 {
        return Err(TransferError::InvalidArgument(
            "size of object must be greater than zero".into(),
        ));
    }
    if section_count < 1 {
        return Err(TransferError::InvalidArgument(
            "number of sections must be one or greater".into(),
        ));
    }

    let sections = ByteCount::from(section_count).min(total_size);
    let base = total_size / sections;
    let remainder = total_size - base * sections;

    let mut segments = Vec::with_capacity(sections as usize);
    let mut position = 0;
    for i in 0..sections {
        let size = if i == sections - 1 { base + remainder } else { base };
        let segment = Segment::new(position, position + size - 1);
        position = segment.end + 1;
        segments.push(segment);
    }

    Ok(segments)
}

/// Splits `[0, total_size)` into runs of `split_size` bytes followed by a
/// shorter tail when `total_size` is not a multiple of `split_size`.
///
/// An empty range yields no segments.
pub fn split_by_size(total_size: ByteCount, split_size: ByteCount) -> Result<Vec<Segment>> {
    if split_size == 0 {
        return Err(TransferError::InvalidArgument(
            "split size must be greater than zero".into(),
        ));
    }

    let full = total_size / split_size;
    let tail = total_size % split_size;

    let mut segments: Vec<Segment> = (0..full)
        .map(|i| {
            let start = i * split_size;
            Segment::new(start, start + split_size - 1)
        })
        .collect();
    if tail != 0 {
        let start = full * split_size;
        segments.push(Segment::new(start, start + tail - 1));
    }

    Ok(segments)
}
