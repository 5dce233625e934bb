use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Duration, Instant};

/// Result of one attempt at reading a frame off a sensor connection.
/// Not having a frame yet is a normal outcome, not an error
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Frame(Vec<u8>),
    /// Nothing complete arrived before the wait elapsed
    Idle,
    /// Peer closed the connection
    Closed,
}

/// Splits a byte stream into newline terminated frames. Partial frames are
/// kept across calls, so a wait that elapses mid-frame loses nothing.
/// Frames longer than `max_frame_bytes` are discarded up to the next newline
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
    // Bytes of `buffer` already searched for a newline
    scanned: usize,
    max_frame_bytes: usize,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            scanned: 0,
            max_frame_bytes,
            discarding: false,
        }
    }

    /// Wait at most `wait` for the next complete frame
    pub async fn next_frame(&mut self, wait: Duration) -> std::io::Result<ReadOutcome> {
        let deadline = Instant::now() + wait;
        let mut chunk = [0u8; 1024];

        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(ReadOutcome::Frame(frame));
            }

            // read() is cancel safe: on timeout no bytes have been consumed
            match timeout_at(deadline, self.inner.read(&mut chunk)).await {
                Err(_) => return Ok(ReadOutcome::Idle),
                Ok(Ok(0)) => {
                    if !self.buffer.is_empty() {
                        log::debug!(
                            "Connection closed with {} bytes of unterminated frame",
                            self.buffer.len()
                        );
                    }
                    return Ok(ReadOutcome::Closed);
                }
                Ok(Ok(len)) => self.buffer.extend_from_slice(&chunk[..len]),
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let newline = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == b'\n');
            let Some(end) = newline.map(|pos| self.scanned + pos) else {
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_frame_bytes {
                    if !self.discarding {
                        log::warn!(
                            "Frame exceeds {} bytes, discarding it",
                            self.max_frame_bytes
                        );
                    }
                    self.discarding = true;
                    self.buffer.clear();
                    self.scanned = 0;
                }
                return None;
            };

            let mut frame: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;
            frame.pop();
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }

            if self.discarding {
                // Tail end of an oversized frame
                self.discarding = false;
                continue;
            }
            if frame.len() > self.max_frame_bytes {
                log::warn!(
                    "Frame exceeds {} bytes, discarding it",
                    self.max_frame_bytes
                );
                continue;
            }
            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(frame);
        }
    }
}
