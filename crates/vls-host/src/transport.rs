//! Header-framed message transport.
//!
//! The server speaks the usual stdio framing:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```

use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use crate::errors::TransportError;

const CONTENT_LENGTH: &str = "Content-Length:";

/// Largest payload a single frame may announce.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Reads framed messages from the server's stdout.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a raw byte stream.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Reads the next message payload.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingContentLength`] when a header block has
    /// no length, [`TransportError::InvalidHeader`] when the length does not
    /// parse, [`TransportError::FrameTooLarge`] when it exceeds
    /// [`MAX_FRAME_BYTES`], and [`TransportError::Io`] when the stream fails or
    /// ends inside a frame.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(content_length) = self.read_headers()? else {
            return Ok(None);
        };
        if content_length > MAX_FRAME_BYTES {
            return Err(TransportError::FrameTooLarge {
                length: content_length,
                limit: MAX_FRAME_BYTES,
            });
        }
        let mut content = vec![0u8; content_length];
        self.reader.read_exact(&mut content)?;
        Ok(Some(content))
    }

    fn read_headers(&mut self) -> Result<Option<usize>, TransportError> {
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line)?;
            if bytes_read == 0 {
                if saw_header {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed while reading headers",
                    )));
                }
                return Ok(None);
            }
            saw_header = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some(value) = trimmed.strip_prefix(CONTENT_LENGTH) {
                content_length = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| TransportError::InvalidHeader)?,
                );
            }
            // Content-Type and friends carry nothing we need.
        }

        content_length
            .map(Some)
            .ok_or(TransportError::MissingContentLength)
    }
}

/// Writes framed messages to the server's stdin.
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps a raw byte sink.
    #[must_use]
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::new(inner),
        }
    }

    /// Writes one framed message and flushes it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if writing to the sink fails.
    pub fn write_frame(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let header = format!("{CONTENT_LENGTH} {}\r\n\r\n", message.len());
        self.writer.write_all(header.as_bytes())?;
        self.writer.write_all(message)?;
        self.writer.flush()?;
        Ok(())
    }
}
