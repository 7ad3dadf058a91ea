//! Resumable decoder for `Transfer-Encoding: chunked` bodies.

use bytes::{Bytes, BytesMut};

use super::parser::HttpParseError;

/// Decodes chunk-by-chunk, remembering how far it got so that each new feed
/// only looks at bytes past the last complete chunk.
///
/// Chunk format: `[hex-size][;ext]\r\n[data]\r\n`, terminated by a zero-size
/// chunk followed by optional trailer lines and an empty line.
#[derive(Debug)]
pub struct ChunkedDecoder {
    body: BytesMut,
    /// Offset of the first byte not yet consumed by a complete chunk.
    pos: usize,
    in_trailer: bool,
    /// Largest chunk size accepted before any chunk data arrives.
    limit: usize,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::with_limit(usize::MAX)
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            body: BytesMut::new(),
            pos: 0,
            in_trailer: false,
            limit,
        }
    }

    /// Continues decoding `data`, which must start at the beginning of the
    /// chunked body and only ever grow between calls.
    ///
    /// Returns the logical body and the number of bytes the encoded body
    /// occupies once the terminating chunk and trailers are present.
    pub fn decode(&mut self, data: &[u8]) -> Result<Option<(Bytes, usize)>, HttpParseError> {
        loop {
            if self.in_trailer {
                let Some(line_end) = find_crlf(data, self.pos) else {
                    return Ok(None);
                };
                let empty = line_end == self.pos;
                self.pos = line_end + 2;
                if empty {
                    let body = std::mem::take(&mut self.body).freeze();
                    return Ok(Some((body, self.pos)));
                }
                continue;
            }

            let Some(line_end) = find_crlf(data, self.pos) else {
                return Ok(None);
            };
            let size = parse_chunk_size(&data[self.pos..line_end])?;
            let data_start = line_end + 2;

            if size == 0 {
                self.pos = data_start;
                self.in_trailer = true;
                continue;
            }

            if size > self.limit {
                return Err(HttpParseError::MessageTooLarge { limit: self.limit });
            }
            let data_end = data_start
                .checked_add(size)
                .ok_or(HttpParseError::InvalidChunkSize)?;
            let frame_end = data_end
                .checked_add(2)
                .ok_or(HttpParseError::InvalidChunkSize)?;
            if data.len() < frame_end {
                return Ok(None);
            }
            if &data[data_end..frame_end] != b"\r\n" {
                return Err(HttpParseError::MalformedChunk);
            }
            self.body.extend_from_slice(&data[data_start..data_end]);
            self.pos = frame_end;
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, HttpParseError> {
    let size = match line.iter().position(|&b| b == b';') {
        Some(ext) => &line[..ext],
        None => line,
    };
    let size = std::str::from_utf8(size).map_err(|_| HttpParseError::InvalidChunkSize)?;
    usize::from_str_radix(size.trim(), 16).map_err(|_| HttpParseError::InvalidChunkSize)
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|idx| from + idx)
}
