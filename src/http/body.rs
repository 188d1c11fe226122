//! Message body framing shared by the request tokenizer and the response parser.
//!
//! # Responsibilities
//! - Decode `Transfer-Encoding: chunked` bodies incrementally
//! - Encode body fragments as wire chunks
//! - Interpret `Content-Length` and `Transfer-Encoding` values

use std::fmt::Write as _;

use bytes::BytesMut;

use crate::http::ParseError;

/// Terminal zero-length chunk with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Longest chunk-size line we are willing to buffer (size plus extensions).
const MAX_CHUNK_LINE: usize = 1024;

/// Trailer fields are parsed only to find where they end.
const MAX_TRAILERS: usize = 32;

/// Append `data` to `out` as one chunk: `<HEX-LEN>\r\n<data>\r\n`.
///
/// Empty fragments are skipped, since a zero-length chunk would end the body.
pub fn encode_chunk(out: &mut BytesMut, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    // Writing into a BytesMut cannot fail.
    let _ = write!(out, "{:X}\r\n", data.len());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Parse a `Content-Length` value. Only a plain run of digits is accepted.
pub fn parse_content_length(value: &[u8]) -> Result<u64, ParseError> {
    let value = std::str::from_utf8(value)
        .map_err(|_| ParseError::InvalidContentLength)?
        .trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidContentLength);
    }
    value.parse().map_err(|_| ParseError::InvalidContentLength)
}

/// True if the final transfer coding listed in `value` is `chunked`.
pub fn final_coding_is_chunked(value: &[u8]) -> bool {
    String::from_utf8_lossy(value)
        .rsplit(',')
        .next()
        .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ChunkState {
    #[default]
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

/// Result of one [`ChunkedDecoder::decode`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Bytes of the input that were consumed.
    pub consumed: usize,
    /// The last chunk and the trailer section have been read.
    pub done: bool,
}

/// Incremental decoder for a chunked body.
#[derive(Debug, Clone, Default)]
pub struct ChunkedDecoder {
    state: ChunkState,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `buf` as possible, handing chunk payloads to `on_data`.
    ///
    /// Stops early when a size line, a chunk terminator or the trailer section
    /// is incomplete; the caller keeps the unconsumed bytes for the next pass.
    pub fn decode<F>(&mut self, buf: &[u8], mut on_data: F) -> Result<Decoded, ParseError>
    where
        F: FnMut(&[u8]),
    {
        let mut pos = 0;
        loop {
            let rest = &buf[pos..];
            match self.state {
                ChunkState::Size => match httparse::parse_chunk_size(rest) {
                    Ok(httparse::Status::Complete((n, size))) => {
                        pos += n;
                        self.state = if size == 0 {
                            ChunkState::Trailers
                        } else {
                            ChunkState::Data(size)
                        };
                    }
                    Ok(httparse::Status::Partial) => {
                        if rest.len() > MAX_CHUNK_LINE {
                            return Err(ParseError::InvalidChunkSize);
                        }
                        return Ok(Decoded { consumed: pos, done: false });
                    }
                    Err(_) => return Err(ParseError::InvalidChunkSize),
                },
                ChunkState::Data(remaining) => {
                    if rest.is_empty() {
                        return Ok(Decoded { consumed: pos, done: false });
                    }
                    let n = remaining.min(rest.len() as u64) as usize;
                    on_data(&rest[..n]);
                    pos += n;
                    let left = remaining - n as u64;
                    self.state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                }
                ChunkState::DataEnd => {
                    if rest.len() < 2 {
                        if rest.first().is_some_and(|b| *b != b'\r') {
                            return Err(ParseError::InvalidChunkSuffix);
                        }
                        return Ok(Decoded { consumed: pos, done: false });
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(ParseError::InvalidChunkSuffix);
                    }
                    pos += 2;
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let mut trailers = [httparse::EMPTY_HEADER; MAX_TRAILERS];
                    match httparse::parse_headers(rest, &mut trailers) {
                        Ok(httparse::Status::Complete((n, _))) => {
                            pos += n;
                            self.state = ChunkState::Done;
                        }
                        Ok(httparse::Status::Partial) => {
                            return Ok(Decoded { consumed: pos, done: false });
                        }
                        Err(e) => return Err(ParseError::Trailers(e)),
                    }
                }
                ChunkState::Done => return Ok(Decoded { consumed: pos, done: true }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut ChunkedDecoder, input: &[u8]) -> (Vec<u8>, Decoded) {
        let mut body = Vec::new();
        let decoded = decoder
            .decode(input, |data| body.extend_from_slice(data))
            .unwrap();
        (body, decoded)
    }

    #[test]
    fn test_encodes_upper_case_hex_sizes() {
        let mut out = BytesMut::new();
        encode_chunk(&mut out, &[b'x'; 10]);
        encode_chunk(&mut out, b"");
        encode_chunk(&mut out, b"hello");
        assert_eq!(&out[..], b"A\r\nxxxxxxxxxx\r\n5\r\nhello\r\n");
    }

    #[test]
    fn test_decodes_complete_body() {
        let mut decoder = ChunkedDecoder::new();
        let input = b"5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\nGET";
        let (body, decoded) = decode_all(&mut decoder, input);
        assert_eq!(body, b"hello world");
        assert!(decoded.done);
        assert_eq!(&input[decoded.consumed..], b"GET");
    }

    #[test]
    fn test_decodes_across_split_input() {
        let mut decoder = ChunkedDecoder::new();
        let (first, decoded) = decode_all(&mut decoder, b"5\r\nhel");
        assert_eq!(first, b"hel");
        assert_eq!(decoded.consumed, 6);
        assert!(!decoded.done);

        let (second, decoded) = decode_all(&mut decoder, b"lo\r");
        assert_eq!(second, b"lo");
        assert_eq!(decoded.consumed, 2);

        let (rest, decoded) = decode_all(&mut decoder, b"\r\n0\r\nX-Trailer: 1\r\n\r\n");
        assert!(rest.is_empty());
        assert!(decoded.done);
        assert_eq!(decoded.consumed, 21);
    }

    #[test]
    fn test_rejects_garbage_after_chunk_data() {
        let mut decoder = ChunkedDecoder::new();
        let err = decoder.decode(b"2\r\nhiXX", |_| {}).unwrap_err();
        assert_eq!(err, ParseError::InvalidChunkSuffix);
    }

    #[test]
    fn test_rejects_bad_size_line() {
        let mut decoder = ChunkedDecoder::new();
        let err = decoder.decode(b"zz\r\n", |_| {}).unwrap_err();
        assert_eq!(err, ParseError::InvalidChunkSize);
    }

    #[test]
    fn test_content_length_must_be_digits() {
        assert_eq!(parse_content_length(b" 42 ").unwrap(), 42);
        assert!(parse_content_length(b"-1").is_err());
        assert!(parse_content_length(b"4 2").is_err());
        assert!(parse_content_length(b"").is_err());
    }

    #[test]
    fn test_chunked_must_be_final_coding() {
        assert!(final_coding_is_chunked(b"chunked"));
        assert!(final_coding_is_chunked(b"gzip, Chunked"));
        assert!(!final_coding_is_chunked(b"chunked, gzip"));
        assert!(!final_coding_is_chunked(b"identity"));
    }
}
