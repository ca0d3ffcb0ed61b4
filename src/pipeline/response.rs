//! Response Assembly
//!
//! The protocol response head a script's output is copied into, plus the
//! status mapping and body/header-only corrections applied on completion.

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};

use crate::error::OutputError;
use crate::request::WellKnownHeader;

// == Response Head ==
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    /// Index into `headers` for each well-known header
    dedicated: [Option<usize>; WellKnownHeader::COUNT],
    /// Length derived from the buffered body, never from script headers
    pub content_length: Option<u64>,
    /// Send the header without a body
    pub header_only: bool,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            dedicated: [None; WellKnownHeader::COUNT],
            content_length: None,
            header_only: false,
        }
    }
}

impl ResponseHead {
    pub fn new() -> Self {
        Self::default()
    }

    // == Push ==
    /// Appends a header, binding well-known names to their dedicated slot.
    pub fn push(&mut self, name: &[u8], value: &[u8]) -> Result<(), OutputError> {
        let header_name = HeaderName::from_bytes(name)
            .map_err(|_| OutputError::InvalidHeaderName(String::from_utf8_lossy(name).into_owned()))?;
        let header_value = HeaderValue::from_bytes(value)
            .map_err(|_| OutputError::InvalidHeaderValue(header_name.to_string()))?;

        if let Some(known) = WellKnownHeader::lookup(name) {
            self.dedicated[known.index()] = Some(self.headers.len());
        }
        self.headers.push((header_name, header_value));
        Ok(())
    }

    /// Value bound to a dedicated slot.
    pub fn dedicated(&self, header: WellKnownHeader) -> Option<&HeaderValue> {
        self.dedicated[header.index()].map(|i| &self.headers[i].1)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter().map(|(name, value)| (name, value))
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Builds the header map sent on the wire.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len() + 1);
        for (name, value) in &self.headers {
            map.append(name.clone(), value.clone());
        }
        if let Some(length) = self.content_length {
            map.insert(http::header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        map
    }
}

// == Status Mapping ==
/// Maps a non-success result code to a protocol status.
///
/// Codes in `100..600` pass through; anything else is an internal error.
pub fn map_result_code(rc: i32) -> StatusCode {
    u16::try_from(rc)
        .ok()
        .filter(|code| (100..600).contains(code))
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

// == Shaping ==
/// Correction applied to a response whose body disagrees with its method or status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// A body was produced but HEAD, 204 or 304 forbids one
    BodyIgnored,
    /// No body was produced but one is implied; length set to zero
    BodyExpected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub content_length: Option<u64>,
    pub header_only: bool,
    pub correction: Option<Correction>,
}

fn forbids_body(method: &Method, status: StatusCode) -> bool {
    method == Method::HEAD || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

/// Decides length and header-only flag for a body of `body_len` bytes.
pub fn shape(method: &Method, status: StatusCode, body_len: usize) -> Shape {
    let forbidden = forbids_body(method, status);
    if body_len > 0 {
        if forbidden {
            Shape {
                content_length: None,
                header_only: true,
                correction: Some(Correction::BodyIgnored),
            }
        } else {
            Shape {
                content_length: Some(body_len as u64),
                header_only: false,
                correction: None,
            }
        }
    } else if !forbidden && status.as_u16() >= 200 {
        Shape {
            content_length: Some(0),
            header_only: true,
            correction: Some(Correction::BodyExpected),
        }
    } else {
        Shape {
            content_length: None,
            header_only: false,
            correction: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_result_code() {
        assert_eq!(map_result_code(302), StatusCode::FOUND);
        assert_eq!(map_result_code(100), StatusCode::CONTINUE);
        assert_eq!(map_result_code(599).as_u16(), 599);
        assert_eq!(map_result_code(700), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(map_result_code(600), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(map_result_code(99), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(map_result_code(-1), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_shape_body_with_head() {
        let shaped = shape(&Method::HEAD, StatusCode::OK, 5);
        assert!(shaped.header_only);
        assert_eq!(shaped.content_length, None);
        assert_eq!(shaped.correction, Some(Correction::BodyIgnored));
    }

    #[test]
    fn test_shape_body_with_no_content_statuses() {
        for status in [StatusCode::NO_CONTENT, StatusCode::NOT_MODIFIED] {
            let shaped = shape(&Method::GET, status, 3);
            assert_eq!(shaped.correction, Some(Correction::BodyIgnored));
            assert!(shaped.header_only);
        }
    }

    #[test]
    fn test_shape_regular_body() {
        let shaped = shape(&Method::POST, StatusCode::CREATED, 12);
        assert_eq!(
            shaped,
            Shape {
                content_length: Some(12),
                header_only: false,
                correction: None
            }
        );
    }

    #[test]
    fn test_shape_missing_body() {
        let shaped = shape(&Method::GET, StatusCode::OK, 0);
        assert_eq!(shaped.content_length, Some(0));
        assert!(shaped.header_only);
        assert_eq!(shaped.correction, Some(Correction::BodyExpected));

        for (method, status) in [
            (Method::HEAD, StatusCode::OK),
            (Method::GET, StatusCode::NO_CONTENT),
            (Method::GET, StatusCode::NOT_MODIFIED),
            (Method::GET, StatusCode::CONTINUE),
        ] {
            assert_eq!(shape(&method, status, 0).correction, None);
        }
    }

    #[test]
    fn test_push_binds_dedicated_slots() {
        let mut head = ResponseHead::new();
        head.push(b"X-Custom", b"1").unwrap();
        head.push(b"etag", b"\"abc\"").unwrap();
        head.push(b"Location", b"/elsewhere").unwrap();

        assert_eq!(head.headers().count(), 3);
        assert_eq!(
            head.dedicated(WellKnownHeader::ETag).unwrap(),
            &HeaderValue::from_static("\"abc\"")
        );
        assert_eq!(
            head.dedicated(WellKnownHeader::Location).unwrap(),
            "/elsewhere"
        );
        assert!(head.dedicated(WellKnownHeader::Date).is_none());
    }

    #[test]
    fn test_push_rejects_invalid_headers() {
        let mut head = ResponseHead::new();
        assert!(matches!(
            head.push(b"bad name", b"v"),
            Err(OutputError::InvalidHeaderName(_))
        ));
        assert!(matches!(
            head.push(b"X-Ok", b"line\nbreak"),
            Err(OutputError::InvalidHeaderValue(_))
        ));
        assert!(head.is_empty());
    }

    #[test]
    fn test_header_map_carries_length() {
        let mut head = ResponseHead::new();
        head.push(b"Set-Cookie", b"a=1").unwrap();
        head.push(b"Set-Cookie", b"b=2").unwrap();
        head.content_length = Some(5);

        let map = head.to_header_map();
        assert_eq!(map.get_all("set-cookie").iter().count(), 2);
        assert_eq!(map.get("content-length").unwrap(), "5");
    }
}
