use std::io::{self, Read};

use crate::error::{ProtocolErrorKind, Result, StreamError};

/// Terminator for every textual segment on the recorder connection.
pub const DELIMITER: &[u8; 4] = b"\r\n\r\n";

/// Receive size while looking for a [`DELIMITER`].
const SEEK_CHUNK: usize = 1024;
/// Receive size while filling a fixed-length binary payload.
const FILL_CHUNK: usize = 4096;

/// Consecutive undecodable segments tolerated before the stream is
/// considered desynchronized.
pub const MAX_UNDECODABLE_SEGMENTS: usize = 16;

/// Incremental byte accumulator over a recorder socket.
///
/// All bytes received from the socket land in one contiguous backlog.
/// [`read_delimited`](Self::read_delimited) pops everything up to the next
/// `\r\n\r\n`; [`read_exact`](Self::read_exact) pops a fixed number of
/// bytes. Whatever is left stays in the backlog for the next call, so the
/// result never depends on how the peer's bytes were split across reads.
///
/// `Ok(None)` from either read means the peer closed the connection before
/// the request could be satisfied. Socket errors are returned as `Err`.
pub struct FrameBuffer<S> {
    stream: S,
    backlog: Vec<u8>,
    /// Prefix of `backlog` already known not to contain a delimiter start.
    scanned: usize,
}

impl<S: Read> FrameBuffer<S> {
    pub fn new(stream: S) -> Self {
        FrameBuffer {
            stream,
            backlog: Vec::new(),
            scanned: 0,
        }
    }

    /// Pop the bytes preceding the next delimiter, consuming the delimiter.
    pub fn read_delimited(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = self.find_delimiter() {
                let mut segment: Vec<u8> = self.backlog.drain(..pos + DELIMITER.len()).collect();
                segment.truncate(pos);
                self.scanned = 0;
                return Ok(Some(segment));
            }
            if self.fill(SEEK_CHUNK)? == 0 {
                return Ok(None);
            }
        }
    }

    /// Pop exactly `n` bytes, blocking until that many are buffered.
    pub fn read_exact(&mut self, n: usize) -> io::Result<Option<Vec<u8>>> {
        while self.backlog.len() < n {
            if self.fill(FILL_CHUNK)? == 0 {
                return Ok(None);
            }
        }
        self.scanned = 0;
        Ok(Some(self.backlog.drain(..n).collect()))
    }

    /// Pop the next delimited segment as trimmed UTF-8 text.
    ///
    /// Segments that are not valid UTF-8 are protocol noise and are skipped.
    /// Every retry still goes through the socket, so EOF and socket errors
    /// end the loop; after [`MAX_UNDECODABLE_SEGMENTS`] consecutive skips the
    /// stream is reported as desynchronized.
    pub fn read_text(&mut self) -> Result<Option<String>> {
        let mut skipped = 0;
        loop {
            let Some(segment) = self.read_delimited()? else {
                return Ok(None);
            };
            match String::from_utf8(segment) {
                Ok(text) => return Ok(Some(text.trim().to_string())),
                Err(e) => {
                    skipped += 1;
                    tracing::debug!(
                        len = e.as_bytes().len(),
                        skipped,
                        "skipping undecodable segment"
                    );
                    if skipped >= MAX_UNDECODABLE_SEGMENTS {
                        return Err(StreamError::protocol(
                            ProtocolErrorKind::UndecodableSegments(skipped),
                        ));
                    }
                }
            }
        }
    }

    /// Number of bytes received but not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    fn find_delimiter(&mut self) -> Option<usize> {
        let found = self.backlog[self.scanned..]
            .windows(DELIMITER.len())
            .position(|w| w == DELIMITER)
            .map(|p| p + self.scanned);
        if found.is_none() {
            self.scanned = self.backlog.len().saturating_sub(DELIMITER.len() - 1);
        }
        found
    }

    fn fill(&mut self, chunk: usize) -> io::Result<usize> {
        let start = self.backlog.len();
        self.backlog.resize(start + chunk, 0);
        let result = loop {
            match self.stream.read(&mut self.backlog[start..]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        let n = *result.as_ref().unwrap_or(&0);
        self.backlog.truncate(start + n);
        result
    }
}
