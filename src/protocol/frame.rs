//! Output frames.
//!
//! Every output line is `<id>|<tag>|<payload>` where the payload is the
//! result fields joined by `|`:
//!
//! ```text
//! 0|ready|
//! a1|response|hello
//! a2|error|unknown command: frobnicate
//! ```
//!
//! An empty payload and a payload of one empty field both encode as
//! `<id>|<tag>|`; [`Frame::parse`] reads that back as an empty payload.

use bytes::BytesMut;
use std::fmt;

use super::request::DELIMITER;

/// Id carried by the readiness frame.
pub const READY_ID: &str = "0";

/// Protocol marker separating control lines from task responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Worker is live and accepting requests.
    Ready,
    /// Successful task outcome.
    Response,
    /// Failed task outcome.
    Error,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Ready => "ready",
            Tag::Response => "response",
            Tag::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Tag> {
        match s {
            "ready" => Some(Tag::Ready),
            "response" => Some(Tag::Response),
            "error" => Some(Tag::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: String,
    pub tag: Tag,
    pub payload: Vec<String>,
}

impl Frame {
    /// The one-time readiness frame.
    pub fn ready() -> Frame {
        Frame {
            id: READY_ID.to_string(),
            tag: Tag::Ready,
            payload: Vec::new(),
        }
    }

    /// A successful outcome for request `id`.
    pub fn response(id: impl Into<String>, payload: Vec<String>) -> Frame {
        Frame {
            id: id.into(),
            tag: Tag::Response,
            payload,
        }
    }

    /// A failed outcome for request `id`.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Frame {
        Frame {
            id: id.into(),
            tag: Tag::Error,
            payload: vec![message.into()],
        }
    }

    /// Encode to a `\n`-terminated line.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encode into an existing buffer.
    ///
    /// Line terminators inside the id or payload are replaced with spaces so
    /// a frame always occupies exactly one line.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        push_sanitized(buf, &self.id);
        buf.extend_from_slice(&[DELIMITER as u8]);
        buf.extend_from_slice(self.tag.as_str().as_bytes());
        buf.extend_from_slice(&[DELIMITER as u8]);
        for (i, field) in self.payload.iter().enumerate() {
            if i > 0 {
                buf.extend_from_slice(&[DELIMITER as u8]);
            }
            push_sanitized(buf, field);
        }
        buf.extend_from_slice(b"\n");
    }

    /// Parse an output line (terminator already stripped).
    ///
    /// Returns `None` for lines that are not frames.
    pub fn parse(line: &str) -> Option<Frame> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(3, DELIMITER);
        let id = parts.next().filter(|id| !id.is_empty())?;
        let tag = Tag::parse(parts.next()?)?;
        let payload = match parts.next() {
            None | Some("") => Vec::new(),
            Some(rest) => rest.split(DELIMITER).map(str::to_string).collect(),
        };

        Some(Frame {
            id: id.to_string(),
            tag,
            payload,
        })
    }
}

fn push_sanitized(buf: &mut BytesMut, s: &str) {
    if s.contains(['\n', '\r']) {
        buf.extend_from_slice(s.replace(['\n', '\r'], " ").as_bytes());
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_ready() {
        assert_eq!(&Frame::ready().encode()[..], b"0|ready|\n");
    }

    #[test]
    fn test_encode_response() {
        let frame = Frame::response("a1", vec!["pong".into(), "more data".into()]);
        assert_eq!(&frame.encode()[..], b"a1|response|pong|more data\n");
    }

    #[test]
    fn test_encode_error() {
        let frame = Frame::error("a2", "unknown command: foo");
        assert_eq!(&frame.encode()[..], b"a2|error|unknown command: foo\n");
    }

    #[test]
    fn test_encode_strips_newlines() {
        let frame = Frame::response("a3", vec!["two\nlines\r".into()]);
        assert_eq!(&frame.encode()[..], b"a3|response|two lines \n");
    }

    #[test]
    fn test_parse() {
        let frame = Frame::parse("a1|response|pong|x").unwrap();
        assert_eq!(frame.id, "a1");
        assert_eq!(frame.tag, Tag::Response);
        assert_eq!(frame.payload, vec!["pong", "x"]);

        let ready = Frame::parse("0|ready|").unwrap();
        assert_eq!(ready, Frame::ready());

        // Readiness without the trailing delimiter is accepted too.
        assert_eq!(Frame::parse("0|ready").unwrap(), Frame::ready());
    }

    #[test]
    fn test_single_empty_field_reads_back_empty() {
        let frame = Frame::response("a1", vec![String::new()]);
        assert_eq!(&frame.encode()[..], b"a1|response|\n");
        assert!(Frame::parse("a1|response|").unwrap().payload.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_frames() {
        assert!(Frame::parse("").is_none());
        assert!(Frame::parse("hello world").is_none());
        assert!(Frame::parse("a1|bogus|x").is_none());
        assert!(Frame::parse("|response|x").is_none());
    }
}
