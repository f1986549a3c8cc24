use std::fmt;
use std::io::Read;

pub type ByteCount = u64;

/// 1-based multipart part number.
pub type PartNumber = u32;

/// Owned, sendable byte stream handed out by store backends.
pub type ByteStream = Box<dyn Read + Send>;

/// Inclusive `[start, end]` byte span of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    pub start: ByteCount,
    pub end: ByteCount,
}

impl Segment {
    pub fn new(start: ByteCount, end: ByteCount) -> Self {
        debug_assert!(start <= end, "segment start {start} is past end {end}");
        Self { start, end }
    }

    pub fn size(&self) -> ByteCount {
        self.end - self.start + 1
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}
