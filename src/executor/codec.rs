//! UTF-8 chunk codec for agent stdout.
//!
//! Agent output is forwarded to callers as text as soon as it arrives,
//! without waiting for line boundaries. A read may end in the middle of a
//! multi-byte character; [`Utf8ChunkCodec`] holds such a partial sequence
//! back until the rest of it arrives so no character is ever split across
//! two chunks. Invalid byte sequences are replaced with U+FFFD.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_dispatch::executor::codec::Utf8ChunkCodec;
//!
//! let chunks = FramedRead::new(child_stdout, Utf8ChunkCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::AppError;

/// Decoder yielding every complete UTF-8 prefix of the read buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8ChunkCodec;

impl Utf8ChunkCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Utf8ChunkCodec {
    type Item = String;
    type Error = AppError;

    /// Take the longest decodable prefix of `src`.
    ///
    /// Returns `Ok(None)` when `src` is empty or holds only the start of an
    /// incomplete multi-byte character.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let take = match std::str::from_utf8(&src[..]) {
            Ok(_) => src.len(),
            // Incomplete trailing sequence: keep it for the next read.
            Err(err) => match err.error_len() {
                None => err.valid_up_to(),
                Some(invalid) => err.valid_up_to() + invalid,
            },
        };

        if take == 0 {
            return Ok(None);
        }

        let bytes = src.split_to(take);
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Flush whatever remains at EOF, replacing a dangling partial
    /// character with U+FFFD.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(chunk) = self.decode(src)? {
            return Ok(Some(chunk));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let bytes = src.split_to(src.len());
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}
