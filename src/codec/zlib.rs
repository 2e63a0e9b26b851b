//! `zlib-stream` transport compression.
//!
//! The whole connection is one deflate stream. Every message is terminated by a sync flush,
//! so a message is complete once the buffered input ends with `00 00 ff ff`.

use flate2::{Decompress, FlushDecompress};

use crate::error::DecodeError;

const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Compressed input buffered for one message before the stream is given up.
pub const MAX_BUFFERED_INPUT: usize = 16 * 1024 * 1024;

/// Persistent inflate context for one connection.
pub struct ZlibStream {
    inflater: Decompress,
    buffer: Vec<u8>,
}

impl Default for ZlibStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibStream {
    pub fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Feeds one frame into the stream, returning the inflated message once it is complete.
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
        if self.buffer.len() + frame.len() > MAX_BUFFERED_INPUT {
            let buffered = self.buffer.len() + frame.len();
            self.buffer = Vec::new();
            return Err(DecodeError::Oversized { buffered, limit: MAX_BUFFERED_INPUT });
        }

        self.buffer.extend_from_slice(frame);
        if !self.buffer.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let input = std::mem::take(&mut self.buffer);
        let mut output = Vec::with_capacity(input.len().saturating_mul(4).max(1024));
        let mut offset = 0;

        loop {
            let total_in = self.inflater.total_in();
            let total_out = self.inflater.total_out();
            self.inflater.decompress_vec(&input[offset..], &mut output, FlushDecompress::Sync)?;

            let consumed = (self.inflater.total_in() - total_in) as usize;
            let produced = self.inflater.total_out() - total_out;
            offset += consumed;

            if output.len() == output.capacity() {
                // the output filled up, there may be more pending
                output.reserve(output.capacity());
                continue;
            }

            if offset >= input.len() {
                break;
            }

            if consumed == 0 && produced == 0 {
                return Err(DecodeError::UnexpectedFrame("stalled zlib"));
            }
        }

        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Compresses messages the way the gateway does: one stream, a sync flush per message.
    fn gateway_stream(messages: &[&str]) -> Vec<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        let mut frames = Vec::new();
        let mut written = 0;
        for message in messages {
            encoder.write_all(message.as_bytes()).unwrap();
            encoder.flush().unwrap();
            let produced = encoder.get_ref()[written..].to_vec();
            written += produced.len();
            frames.push(produced);
        }
        frames
    }

    #[test]
    fn inflates_consecutive_messages_from_one_stream() {
        let frames = gateway_stream(&[r#"{"op":10}"#, r#"{"op":11}"#]);
        let mut stream = ZlibStream::new();

        assert_eq!(stream.push(&frames[0]).unwrap().unwrap(), br#"{"op":10}"#.to_vec());
        // the second message only inflates with the first one's dictionary state
        assert_eq!(stream.push(&frames[1]).unwrap().unwrap(), br#"{"op":11}"#.to_vec());
    }

    #[test]
    fn buffers_until_suffix() {
        let frames = gateway_stream(&[r#"{"op":0,"t":"READY"}"#]);
        let (head, tail) = frames[0].split_at(frames[0].len() - 2);
        let mut stream = ZlibStream::new();

        assert_eq!(stream.push(head).unwrap(), None);
        assert_eq!(stream.push(tail).unwrap().unwrap(), br#"{"op":0,"t":"READY"}"#.to_vec());
    }

    #[test]
    fn large_messages_grow_the_output() {
        let large = "x".repeat(200_000);
        let frames = gateway_stream(&[&large]);
        let mut stream = ZlibStream::new();
        assert_eq!(stream.push(&frames[0]).unwrap().unwrap().len(), 200_000);
    }

    #[test]
    fn garbage_is_rejected() {
        let mut stream = ZlibStream::new();
        assert!(stream.push(&[1, 2, 3, 4, 0, 0, 0xff, 0xff]).is_err());
    }

    #[test]
    fn unterminated_input_is_capped() {
        let mut stream = ZlibStream::new();
        let chunk = vec![0x78; MAX_BUFFERED_INPUT / 4];
        for _ in 0..4 {
            assert_eq!(stream.push(&chunk).unwrap(), None);
        }

        let error = stream.push(&[0x00]).unwrap_err();
        assert!(matches!(error, DecodeError::Oversized { buffered, .. } if buffered == MAX_BUFFERED_INPUT + 1));
        assert!(stream.buffer.is_empty());
    }
}
