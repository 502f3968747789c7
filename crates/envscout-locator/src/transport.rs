//! Header-framed stdio transport.
//!
//! The locator speaks the framing used by `vscode-jsonrpc`:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```
//! The two halves are split so the reader can live in its own task while
//! writers share the outbound half behind a lock.

use std::io;
use std::pin::Pin;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Boxed inbound byte stream (the locator's stdout).
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Boxed outbound byte stream (the locator's stdin).
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

const CONTENT_LENGTH: &str = "Content-Length: ";

/// Largest payload accepted from the locator.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Missing Content-Length header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// Invalid header format.
    #[error("invalid header format")]
    InvalidHeader,

    /// Announced payload exceeds [`MAX_FRAME_BYTES`].
    #[error("frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Announced `Content-Length`.
        length: usize,
        /// Accepted maximum.
        limit: usize,
    },
}

/// Reads framed messages from the locator.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wraps an inbound stream.
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Receives one framed message, or `None` on a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingContentLength`] if the header block
    /// has no length, [`TransportError::InvalidHeader`] if the length does not
    /// parse, [`TransportError::FrameTooLarge`] if the length exceeds
    /// [`MAX_FRAME_BYTES`], and [`TransportError::Io`] if the stream fails or
    /// closes mid-frame.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };
        if content_length > MAX_FRAME_BYTES {
            return Err(TransportError::FrameTooLarge {
                length: content_length,
                limit: MAX_FRAME_BYTES,
            });
        }
        let mut content = vec![0u8; content_length];
        self.reader.read_exact(&mut content).await?;
        Ok(Some(content))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, TransportError> {
        let mut content_length: Option<usize> = None;
        let mut seen_header = false;

        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                if seen_header {
                    return Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed while reading headers",
                    )));
                }
                return Ok(None);
            }
            seen_header = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some(value) = trimmed.strip_prefix(CONTENT_LENGTH) {
                content_length = Some(value.parse().map_err(|_| TransportError::InvalidHeader)?);
            }
            // Other headers (e.g. Content-Type) are ignored.
        }

        content_length
            .map(Some)
            .ok_or(TransportError::MissingContentLength)
    }
}

/// Writes framed messages to the locator.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wraps an outbound stream.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Sends one framed message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if writing to the locator fails.
    pub async fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let header = format!("{CONTENT_LENGTH}{}\r\n\r\n", message.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(message).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Closes the outbound stream, signalling end of input to the locator.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the shutdown fails.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    #[tokio::test]
    async fn sends_framed_message() {
        let mut writer = FrameWriter::new(Vec::new());

        writer.send(b"test payload").await.expect("send failed");

        let written = String::from_utf8(writer.writer).expect("invalid utf8");
        assert_eq!(written, "Content-Length: 12\r\n\r\ntest payload");
    }

    #[tokio::test]
    async fn receives_consecutive_frames() {
        let input = b"Content-Length: 5\r\n\r\nhelloContent-Length: 5\r\n\r\nworld".to_vec();
        let mut reader = FrameReader::new(Cursor::new(input));

        assert_eq!(reader.receive().await.expect("first").as_deref(), Some(&b"hello"[..]));
        assert_eq!(reader.receive().await.expect("second").as_deref(), Some(&b"world"[..]));
        assert_eq!(reader.receive().await.expect("eof"), None);
    }

    #[tokio::test]
    async fn rejects_oversized_frames_before_allocating() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(Cursor::new(header.into_bytes()));

        let error = reader.receive().await.expect_err("frame too large");

        assert!(matches!(
            error,
            TransportError::FrameTooLarge { length, limit: MAX_FRAME_BYTES }
                if length == MAX_FRAME_BYTES + 1
        ));
    }

    #[tokio::test]
    async fn ignores_additional_headers() {
        let input =
            b"Content-Length: 4\r\nContent-Type: application/vscode-jsonrpc\r\n\r\ntest".to_vec();
        let mut reader = FrameReader::new(Cursor::new(input));

        let received = reader.receive().await.expect("receive failed");

        assert_eq!(received.as_deref(), Some(&b"test"[..]));
    }

    #[rstest]
    #[case(&b"Content-Type: application/json\r\n\r\ntest"[..])]
    #[case(&b"\r\n"[..])]
    #[tokio::test]
    async fn reports_missing_content_length(#[case] input: &'static [u8]) {
        let mut reader = FrameReader::new(Cursor::new(input.to_vec()));

        let result = reader.receive().await;

        assert!(matches!(result, Err(TransportError::MissingContentLength)));
    }

    #[tokio::test]
    async fn reports_invalid_content_length() {
        let mut reader = FrameReader::new(Cursor::new(b"Content-Length: many\r\n\r\n".to_vec()));

        let result = reader.receive().await;

        assert!(matches!(result, Err(TransportError::InvalidHeader)));
    }

    #[tokio::test]
    async fn reports_eof_inside_headers() {
        let mut reader = FrameReader::new(Cursor::new(b"Content-Length: 10".to_vec()));

        let result = reader.receive().await;

        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
