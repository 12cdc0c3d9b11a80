//! Request decoding.
//!
//! A request line is `<id>|<field>|<field>|...`. Only the id is checked;
//! the remaining fields belong to whichever executor runs the request.

use crate::error::{Result, WorkerError};

/// Field delimiter shared by requests and response frames.
pub const DELIMITER: char = '|';

/// One decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Caller-supplied correlation id. Opaque and not checked for uniqueness.
    pub id: String,
    /// Command fields following the id, unmodified.
    pub fields: Vec<String>,
}

impl Request {
    /// Build a request from an id and its fields.
    pub fn new<I, S>(id: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Request {
            id: id.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Decode one line (terminator already stripped).
    ///
    /// Surrounding whitespace, including the `\r` of a CRLF terminator, is
    /// trimmed from the whole line before splitting.
    pub fn decode(line: &str) -> Result<Request> {
        let line = line.trim();
        if line.is_empty() {
            return Err(WorkerError::MalformedRequest("empty line".to_string()));
        }

        let mut parts = line.split(DELIMITER);
        let id = parts.next().unwrap_or_default();
        if id.is_empty() {
            return Err(WorkerError::MalformedRequest(
                "missing request id".to_string(),
            ));
        }

        Ok(Request {
            id: id.to_string(),
            fields: parts.map(str::to_string).collect(),
        })
    }

    /// Encode as a request line, without the terminator.
    pub fn encode(&self) -> String {
        let mut line = self.id.clone();
        for field in &self.fields {
            line.push(DELIMITER);
            line.push_str(field);
        }
        line
    }

    /// First field, conventionally the command name.
    pub fn command(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let request = Request::decode("a1|test|hello|0").unwrap();
        assert_eq!(request.id, "a1");
        assert_eq!(request.fields, vec!["test", "hello", "0"]);
        assert_eq!(request.command(), Some("test"));
    }

    #[test]
    fn test_decode_id_only() {
        let request = Request::decode("42").unwrap();
        assert_eq!(request.id, "42");
        assert!(request.fields.is_empty());
        assert_eq!(request.command(), None);
    }

    #[test]
    fn test_decode_keeps_empty_fields() {
        let request = Request::decode("x||b|").unwrap();
        assert_eq!(request.fields, vec!["", "b", ""]);
    }

    #[test]
    fn test_decode_trims_crlf() {
        let request = Request::decode("c1|random|8\r").unwrap();
        assert_eq!(request.fields, vec!["random", "8"]);
    }

    #[test]
    fn test_empty_line() {
        assert!(matches!(
            Request::decode(""),
            Err(WorkerError::MalformedRequest(_))
        ));
        assert!(matches!(
            Request::decode("   "),
            Err(WorkerError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_missing_id() {
        match Request::decode("|test|hello|0") {
            Err(WorkerError::MalformedRequest(msg)) => assert_eq!(msg, "missing request id"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_encode() {
        let request = Request::new("d1", ["ping", "some data"]);
        assert_eq!(request.encode(), "d1|ping|some data");
        assert_eq!(Request::decode(&request.encode()).unwrap(), request);
    }
}
