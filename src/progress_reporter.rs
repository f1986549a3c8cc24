use std::io::{self, Read};
use std::time::{Duration, Instant};

use circular_buffer::CircularBuffer;
use indicatif::{MultiProgress, ProgressBar, ProgressState, ProgressStyle};

use crate::shared_types::ByteCount;

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);
const MIB: f64 = 1024.0 * 1024.0;

type ProgressPoint = (ByteCount, Instant);

/// Adds a byte-progress bar to `multi`; a spinner when the size is unknown.
pub fn transfer_bar(multi: &MultiProgress, total_size: Option<ByteCount>) -> ProgressBar {
    let pb = total_size.map_or_else(ProgressBar::new_spinner, ProgressBar::new);
    let pb = multi.add(pb);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta}) ({msg})",
    )
    .map(|style| {
        style
            .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
            })
            .progress_chars("#>-")
    })
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec > MIB {
        format!("{:.1} MB/s", bytes_per_sec / MIB)
    } else {
        format!("{:.1} kB/s", bytes_per_sec / 1024.0)
    }
}

/// Reports bytes flowing through `inner` on a progress bar, with throughput
/// measured over the most recent reads.
pub struct ProgressReader<R> {
    inner: R,
    pb: ProgressBar,
    progress: ByteCount,
    window: CircularBuffer<50, ProgressPoint>,
    last_update: Instant,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, pb: ProgressBar) -> Self {
        pb.set_position(0);
        Self {
            inner,
            pb,
            progress: 0,
            window: CircularBuffer::new(),
            last_update: Instant::now(),
        }
    }

    pub fn transferred(&self) -> ByteCount {
        self.progress
    }

    /// Throughput across the sampled window, if it spans any time.
    pub fn window_speed(&self) -> Option<f64> {
        let (latest_byte, latest_instant) = self.window.back()?;
        let (oldest_byte, oldest_instant) = self.window.front()?;
        let elapsed = latest_instant.duration_since(*oldest_instant).as_secs_f64();
        if latest_byte == oldest_byte || elapsed == 0.0 {
            return None;
        }
        Some((latest_byte - oldest_byte) as f64 / elapsed)
    }

    /// Stops the bar with the average speed of the whole transfer.
    pub fn finish(self) -> R {
        let elapsed = self.pb.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let speed = self.progress as f64 / elapsed;
            self.pb.finish_with_message(format_speed(speed));
        } else {
            self.pb.finish();
        }
        self.inner
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.progress += n as ByteCount;
            self.pb.set_position(self.progress);

            let now = Instant::now();
            self.window.push_back((self.progress, now));
            if now.duration_since(self.last_update) >= UPDATE_INTERVAL {
                if let Some(speed) = self.window_speed() {
                    self.pb.set_message(format_speed(speed));
                }
                self.last_update = now;
            }
        }
        Ok(n)
    }
}
