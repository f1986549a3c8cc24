//! A single forward-only byte stream spliced together from several
//! independently fetched range segments of one object.

use std::io::{self, Read};

use crate::errors::{Result, TransferError};
use crate::segment_planner;
use crate::shared_types::{ByteCount, Segment};
use crate::store::StoreError;

const MAX_AVAILABLE_HINT: u32 = i32::MAX as u32;

/// Supplies the backing stream of each segment, one at a time, in order.
pub trait SegmentSource {
    type Stream: Read;

    /// Opens the next unfetched segment. The returned stream yields exactly
    /// `segment.size()` bytes.
    fn open_next(&mut self, segment: &Segment) -> std::result::Result<Self::Stream, StoreError>;
}

enum ReaderState<T> {
    NotStarted,
    Reading {
        index: usize,
        stream: T,
        consumed: ByteCount,
    },
    Exhausted,
    Closed,
    Failed,
}

/// Presents `section_count` ranged fetches of an object as one sequential stream.
///
/// Only one backing stream is open at any time. The next segment is fetched
/// lazily, when the current one reports end of data and more bytes are
/// requested. A buffer read keeps filling across segment boundaries, so short
/// reads only happen at the true end of the object.
pub struct SequentialRangeReader<S: SegmentSource> {
    path: String,
    source: S,
    segments: Vec<Segment>,
    total_size: ByteCount,
    bytes_read: ByteCount,
    state: ReaderState<S::Stream>,
}

impl<S: SegmentSource> SequentialRangeReader<S> {
    pub fn new(
        path: impl Into<String>,
        source: S,
        total_size: ByteCount,
        section_count: u32,
    ) -> Result<Self> {
        if total_size == 0 {
            return Err(TransferError::InvalidArgument(
                "size of object must be greater than zero".into(),
            ));
        }
        if section_count <= 1 {
            return Err(TransferError::InvalidArgument(
                "number of sections must be greater than one".into(),
            ));
        }

        Ok(Self {
            path: path.into(),
            source,
            segments: segment_planner::partition(total_size, section_count)?,
            total_size,
            bytes_read: 0,
            state: ReaderState::NotStarted,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn bytes_read(&self) -> ByteCount {
        self.bytes_read
    }

    /// Remaining bytes, saturated at `i32::MAX` so the hint stays valid as a
    /// signed 32-bit count.
    pub fn available_hint(&self) -> u32 {
        let remaining = self.total_size - self.bytes_read;
        remaining.min(MAX_AVAILABLE_HINT as ByteCount) as u32
    }

    /// Next byte of the object, or `None` at end of stream.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read_into(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Fills `buf` from as many segments as needed. Returns the number of
    /// bytes written, which is less than `buf.len()` only at end of stream.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            match &mut self.state {
                ReaderState::NotStarted => self.open_segment(0)?,
                ReaderState::Exhausted | ReaderState::Closed => break,
                ReaderState::Failed => {
                    return Err(TransferError::Io(io::Error::other(format!(
                        "range reader for {} failed earlier",
                        self.path
                    ))))
                }
                ReaderState::Reading {
                    index,
                    stream,
                    consumed,
                } => {
                    let index = *index;
                    let n = match stream.read(&mut buf[filled..]) {
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            self.state = ReaderState::Failed;
                            return Err(TransferError::SegmentFetchFailed {
                                index,
                                source: StoreError::Io(e),
                            });
                        }
                    };

                    if n > 0 {
                        *consumed += n as ByteCount;
                        filled += n;
                        self.bytes_read += n as ByteCount;
                        continue;
                    }

                    let consumed = *consumed;
                    self.finish_segment(index, consumed)?;
                }
            }
        }

        Ok(filled)
    }

    pub fn skip(&mut self, _n: ByteCount) -> Result<ByteCount> {
        Err(TransferError::OperationNotSupported("skip"))
    }

    pub fn mark(&mut self, _read_limit: usize) -> Result<()> {
        Err(TransferError::OperationNotSupported("mark"))
    }

    pub fn reset(&mut self) -> Result<()> {
        Err(TransferError::OperationNotSupported("reset"))
    }

    pub fn mark_supported(&self) -> bool {
        false
    }

    /// Releases the currently open backing stream, if any. Segments that were
    /// never fetched stay untouched; later reads report end of stream.
    pub fn close(&mut self) -> Result<()> {
        if let ReaderState::Reading { index, .. } = &self.state {
            debug!("closing {} while reading section {}", self.path, index + 1);
        }
        self.state = ReaderState::Closed;
        Ok(())
    }

    fn open_segment(&mut self, index: usize) -> Result<()> {
        let segment = self.segments[index];
        debug!(
            "opening section {}/{} of {} ({})",
            index + 1,
            self.segments.len(),
            self.path,
            segment
        );

        match self.source.open_next(&segment) {
            Ok(stream) => {
                self.state = ReaderState::Reading {
                    index,
                    stream,
                    consumed: 0,
                };
                Ok(())
            }
            Err(source) => {
                self.state = ReaderState::Failed;
                Err(TransferError::SegmentFetchFailed { index, source })
            }
        }
    }

    /// Drops the exhausted backing stream and moves on to the next segment.
    fn finish_segment(&mut self, index: usize, consumed: ByteCount) -> Result<()> {
        self.state = ReaderState::Exhausted;

        let expected = self.segments[index].size();
        if consumed != expected {
            self.state = ReaderState::Failed;
            return Err(TransferError::SegmentTruncated {
                index,
                expected,
                actual: consumed,
            });
        }

        if index + 1 < self.segments.len() {
            self.open_segment(index + 1)
        } else {
            debug!("{} exhausted after {} bytes", self.path, self.bytes_read);
            Ok(())
        }
    }
}

impl<S: SegmentSource> Read for SequentialRangeReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_into(buf).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::{Cursor, Write};
    use std::rc::Rc;

    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    use super::*;
    use crate::segment_source::FileSegmentSource;

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(len as u64).fill_bytes(&mut data);
        data
    }

    fn temp_file_with(data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[derive(Default)]
    struct Journal {
        opened: Vec<Segment>,
        dropped: usize,
    }

    struct TrackedStream {
        inner: Cursor<Vec<u8>>,
        journal: Rc<RefCell<Journal>>,
    }

    impl Read for TrackedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Drop for TrackedStream {
        fn drop(&mut self) {
            self.journal.borrow_mut().dropped += 1;
        }
    }

    /// Serves segments out of memory and records every open and close.
    struct MemorySource {
        data: Vec<u8>,
        journal: Rc<RefCell<Journal>>,
        fail_at: Option<usize>,
        short_by: usize,
    }

    impl MemorySource {
        fn new(data: Vec<u8>) -> (Self, Rc<RefCell<Journal>>) {
            let journal = Rc::new(RefCell::new(Journal::default()));
            let source = Self {
                data,
                journal: journal.clone(),
                fail_at: None,
                short_by: 0,
            };
            (source, journal)
        }
    }

    impl SegmentSource for MemorySource {
        type Stream = TrackedStream;

        fn open_next(
            &mut self,
            segment: &Segment,
        ) -> std::result::Result<TrackedStream, StoreError> {
            let mut journal = self.journal.borrow_mut();
            if self.fail_at == Some(journal.opened.len()) {
                return Err(StoreError::Protocol("connection reset".into()));
            }
            journal.opened.push(*segment);

            let end = segment.end as usize + 1 - self.short_by;
            Ok(TrackedStream {
                inner: Cursor::new(self.data[segment.start as usize..end].to_vec()),
                journal: self.journal.clone(),
            })
        }
    }

    #[test]
    fn reads_file_in_sections_as_single_stream() {
        for &size in &[1usize, 10, 10_000] {
            let expected = random_bytes(size);
            let file = temp_file_with(&expected);

            for &sections in &[2u32, 5, 19] {
                let source = FileSegmentSource::new(file.path());
                let mut reader =
                    SequentialRangeReader::new("local", source, size as ByteCount, sections)
                        .unwrap();
                let mut actual = Vec::new();
                reader.read_to_end(&mut actual).unwrap();

                assert_eq!(actual, expected, "size={size} sections={sections}");
                assert_eq!(reader.bytes_read(), size as ByteCount);
                assert_eq!(reader.available_hint(), 0);
            }
        }
    }

    #[test]
    fn buffer_read_spans_segment_boundaries() {
        let data = random_bytes(100);
        let (source, journal) = MemorySource::new(data.clone());
        let mut reader = SequentialRangeReader::new("obj", source, 100, 4).unwrap();

        let mut buf = [0u8; 60];
        assert_eq!(reader.read_into(&mut buf).unwrap(), 60);
        assert_eq!(&buf[..], &data[..60]);
        assert_eq!(journal.borrow().opened.len(), 3);

        assert_eq!(reader.read_into(&mut buf).unwrap(), 40);
        assert_eq!(&buf[..40], &data[60..]);
        assert_eq!(reader.read_into(&mut buf).unwrap(), 0);
    }

    #[test]
    fn opens_one_segment_at_a_time_in_order() {
        let data = random_bytes(10);
        let (source, journal) = MemorySource::new(data.clone());
        let mut reader = SequentialRangeReader::new("obj", source, 10, 5).unwrap();

        for (i, expected) in data.iter().enumerate() {
            assert_eq!(reader.read_byte().unwrap(), Some(*expected));
            let journal = journal.borrow();
            assert_eq!(journal.opened.len(), i / 2 + 1);
            assert_eq!(journal.opened.len() - journal.dropped, 1);
        }

        assert_eq!(reader.read_byte().unwrap(), None);
        assert_eq!(reader.read_byte().unwrap(), None);
        let journal = journal.borrow();
        assert_eq!(journal.opened, segment_planner::partition(10, 5).unwrap());
        assert_eq!(journal.dropped, 5);
    }

    #[test]
    fn close_before_reading_fetches_nothing() {
        let (source, journal) = MemorySource::new(random_bytes(50));
        let mut reader = SequentialRangeReader::new("obj", source, 50, 5).unwrap();

        reader.close().unwrap();
        assert!(journal.borrow().opened.is_empty());
        assert_eq!(reader.read_byte().unwrap(), None);
    }

    #[test]
    fn close_mid_stream_releases_only_current_segment() {
        let (source, journal) = MemorySource::new(random_bytes(50));
        let mut reader = SequentialRangeReader::new("obj", source, 50, 5).unwrap();

        let mut buf = [0u8; 15];
        reader.read_into(&mut buf).unwrap();
        reader.close().unwrap();

        let journal = journal.borrow();
        assert_eq!(journal.opened.len(), 2);
        assert_eq!(journal.dropped, 2);
    }

    #[test]
    fn unsupported_operations_fail_at_any_position() {
        let (source, _) = MemorySource::new(random_bytes(20));
        let mut reader = SequentialRangeReader::new("obj", source, 20, 2).unwrap();

        for _ in 0..3 {
            assert!(matches!(
                reader.skip(1),
                Err(TransferError::OperationNotSupported("skip"))
            ));
            assert!(matches!(
                reader.mark(8),
                Err(TransferError::OperationNotSupported("mark"))
            ));
            assert!(matches!(
                reader.reset(),
                Err(TransferError::OperationNotSupported("reset"))
            ));
            reader.read_into(&mut [0u8; 9]).unwrap();
        }
        assert!(!reader.mark_supported());
    }

    #[test]
    fn rejects_invalid_construction() {
        let (source, _) = MemorySource::new(Vec::new());
        assert!(matches!(
            SequentialRangeReader::new("obj", source, 0, 4),
            Err(TransferError::InvalidArgument(_))
        ));
        let (source, _) = MemorySource::new(random_bytes(8));
        assert!(matches!(
            SequentialRangeReader::new("obj", source, 8, 1),
            Err(TransferError::InvalidArgument(_))
        ));
    }

    #[test]
    fn fetch_failure_carries_segment_index_and_poisons_reader() {
        let (mut source, journal) = MemorySource::new(random_bytes(30));
        source.fail_at = Some(1);
        let mut reader = SequentialRangeReader::new("obj", source, 30, 3).unwrap();

        let mut buf = [0u8; 30];
        match reader.read_into(&mut buf) {
            Err(TransferError::SegmentFetchFailed { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(journal.borrow().dropped, 1);
        assert!(reader.read_into(&mut buf).is_err());
    }

    #[test]
    fn short_segment_is_reported() {
        let (mut source, _) = MemorySource::new(random_bytes(30));
        source.short_by = 2;
        let mut reader = SequentialRangeReader::new("obj", source, 30, 3).unwrap();

        let mut sink = Vec::new();
        let err = reader.read_to_end(&mut sink).unwrap_err();
        assert!(err.to_string().contains("Segment 0 ended after 8 of 10 bytes"));
    }

    #[test]
    fn available_hint_tracks_progress() {
        let (source, _) = MemorySource::new(random_bytes(64));
        let mut reader = SequentialRangeReader::new("obj", source, 64, 4).unwrap();
        assert_eq!(reader.available_hint(), 64);
        reader.read_into(&mut [0u8; 24]).unwrap();
        assert_eq!(reader.available_hint(), 40);
    }

    #[test]
    fn available_hint_saturates_at_signed_32_bit_max() {
        const GIB: ByteCount = 1024 * 1024 * 1024;
        for (size, expected) in [
            (3 * GIB, 2_147_483_647),
            (2 * GIB, 2_147_483_647),
            (2 * GIB - 1, 2_147_483_647),
            (2 * GIB - 2, 2_147_483_646),
            (345_345_324_532, 2_147_483_647),
        ] {
            let (source, journal) = MemorySource::new(Vec::new());
            let reader = SequentialRangeReader::new("big", source, size, 4).unwrap();
            assert_eq!(reader.available_hint(), expected, "size={size}");
            assert!(journal.borrow().opened.is_empty());
        }
    }
}
