//! Request Body Stream
//!
//! Pull-based reader over a materialized request body: either a chain of
//! in-memory buffers or a spooled temporary file.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};

use bytes::{Buf, Bytes};

// == Request Body ==
/// A request body as the host materialized it.
#[derive(Debug)]
pub enum RequestBody {
    /// Buffers in arrival order
    Chain(Vec<Bytes>),
    /// Body spooled to temporary storage, positioned at its start
    File(File),
}

impl RequestBody {
    pub fn empty() -> Self {
        RequestBody::Chain(Vec::new())
    }
}

// == Body Stream ==
/// Reads a [`RequestBody`] sequentially.
///
/// In chain mode each `read` copies from at most one buffer, never more
/// than requested, and returns 0 once every buffer is consumed.
#[derive(Debug)]
pub struct BodyStream {
    source: Source,
}

#[derive(Debug)]
enum Source {
    Chain(VecDeque<Bytes>),
    File(File),
}

impl BodyStream {
    pub fn new(body: RequestBody) -> Self {
        let source = match body {
            RequestBody::Chain(buffers) => Source::Chain(buffers.into()),
            RequestBody::File(file) => Source::File(file),
        };
        Self { source }
    }

    /// Reads up to `limit` bytes, or everything left when `limit` is `None`.
    pub fn read_up_to(&mut self, limit: Option<usize>) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        match limit {
            Some(limit) => {
                let mut buf = vec![0u8; 8192.min(limit.max(1))];
                while out.len() < limit {
                    let want = buf.len().min(limit - out.len());
                    let n = self.read(&mut buf[..want])?;
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&buf[..n]);
                }
            }
            None => {
                self.read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }
}

impl Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.source {
            Source::File(file) => file.read(buf),
            Source::Chain(buffers) => {
                // Drop exhausted buffers
                while buffers.front().is_some_and(|b| !b.has_remaining()) {
                    buffers.pop_front();
                }
                let Some(current) = buffers.front_mut() else {
                    return Ok(0);
                };
                let count = current.remaining().min(buf.len());
                current.copy_to_slice(&mut buf[..count]);
                if !current.has_remaining() {
                    buffers.pop_front();
                }
                Ok(count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    fn chain(parts: &[&'static [u8]]) -> BodyStream {
        BodyStream::new(RequestBody::Chain(
            parts.iter().map(|p| Bytes::from_static(p)).collect(),
        ))
    }

    #[test]
    fn test_chain_reads_one_buffer_per_call() {
        let mut stream = chain(&[b"hello ", b"world"]);
        let mut buf = [0u8; 64];

        assert_eq!(stream.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"hello ");
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_chain_never_copies_more_than_requested() {
        let mut stream = chain(&[b"abcdef"]);
        let mut buf = [0u8; 4];

        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_chain_skips_empty_buffers() {
        let mut stream = chain(&[b"", b"ab", b"", b"c"]);
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_empty_body_is_end_of_stream() {
        let mut stream = BodyStream::new(RequestBody::empty());
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_file_body() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"spooled body").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut stream = BodyStream::new(RequestBody::File(file));
        assert_eq!(stream.read_up_to(Some(7)).unwrap(), b"spooled");
        assert_eq!(stream.read_up_to(None).unwrap(), b" body");
        assert!(stream.read_up_to(Some(4)).unwrap().is_empty());
    }

    #[test]
    fn test_read_up_to_spans_buffers() {
        let mut stream = chain(&[b"ab", b"cd", b"ef"]);
        assert_eq!(stream.read_up_to(Some(5)).unwrap(), b"abcde");
        assert_eq!(stream.read_up_to(Some(5)).unwrap(), b"f");
    }
}
