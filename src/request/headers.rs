//! Header helpers
//!
//! Request-header copy-in with duplicate merging, and the static lookup of
//! response headers that the protocol addresses through dedicated slots.

use bytes::{BufMut, Bytes, BytesMut};
use http::HeaderMap;

use crate::error::Result;
use crate::table::Table;

// == Merge Header ==
/// Sets `name` to `value`, joining with an existing value as `"A, B"`.
pub fn merge_header(table: &mut Table<Bytes>, name: &[u8], value: &[u8]) -> Result<()> {
    let merged = match table.peek(name) {
        Some(existing) => {
            let mut joined = BytesMut::with_capacity(existing.len() + 2 + value.len());
            joined.put_slice(existing);
            joined.put_slice(b", ");
            joined.put_slice(value);
            joined.freeze()
        }
        None => Bytes::copy_from_slice(value),
    };
    table.set(name, merged)?;
    Ok(())
}

// == Copy Request Headers ==
/// Copies every request header into `table`, merging repeated names.
pub fn copy_request_headers(table: &mut Table<Bytes>, headers: &HeaderMap) -> Result<()> {
    for (name, value) in headers {
        merge_header(table, name.as_str().as_bytes(), value.as_bytes())?;
    }
    Ok(())
}

/// Whether `name` is `Content-Length`, compared case-insensitively.
pub fn is_content_length(name: &[u8]) -> bool {
    name.eq_ignore_ascii_case(b"content-length")
}

// == Well-Known Headers ==
/// Response headers bound to a dedicated response slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownHeader {
    Date,
    ETag,
    Server,
    Refresh,
    Expires,
    Location,
    LastModified,
    ContentRange,
    AcceptRanges,
    ContentEncoding,
    WwwAuthenticate,
}

const WELL_KNOWN: [(&str, WellKnownHeader); WellKnownHeader::COUNT] = [
    ("date", WellKnownHeader::Date),
    ("etag", WellKnownHeader::ETag),
    ("server", WellKnownHeader::Server),
    ("refresh", WellKnownHeader::Refresh),
    ("expires", WellKnownHeader::Expires),
    ("location", WellKnownHeader::Location),
    ("last-modified", WellKnownHeader::LastModified),
    ("content-range", WellKnownHeader::ContentRange),
    ("accept-ranges", WellKnownHeader::AcceptRanges),
    ("content-encoding", WellKnownHeader::ContentEncoding),
    ("www-authenticate", WellKnownHeader::WwwAuthenticate),
];

impl WellKnownHeader {
    pub const COUNT: usize = 11;

    /// Maps a header name to its dedicated slot, ignoring ASCII case.
    pub fn lookup(name: &[u8]) -> Option<Self> {
        WELL_KNOWN
            .iter()
            .find(|(known, _)| known.len() == name.len() && known.as_bytes().eq_ignore_ascii_case(name))
            .map(|(_, header)| *header)
    }

    /// Slot index in `0..COUNT`.
    pub fn index(self) -> usize {
        self as usize
    }
}
