//! Line assembler for the request stream.
//!
//! [`LineAssembler`] is a [`Decoder`] used with
//! [`tokio_util::codec::FramedRead`]. It accumulates whatever chunks the
//! reader hands it, down to single bytes, and yields one item per
//! `\n`-terminated line with the terminator stripped.
//!
//! Items are themselves results: a line that is too long or not UTF-8 is
//! reported as `Ok(Err(..))` so the stream keeps going. `FramedRead` ends the
//! stream after the first decoder error, so only I/O failures travel through
//! the decoder's error channel.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::error::{Result, WorkerError};

/// Default maximum line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line terminator.
const NEWLINE: u8 = b'\n';

/// Outcome of assembling one line.
pub type LineResult = Result<String>;

/// Incremental `\n` line framing with a maximum line length.
#[derive(Debug)]
pub struct LineAssembler {
    /// Longest accepted line, excluding the terminator.
    max_line_bytes: usize,
    /// Bytes of the buffer already scanned for a terminator.
    next_index: usize,
    /// Set while skipping the remainder of an over-long line.
    discarding: bool,
}

impl LineAssembler {
    /// Create an assembler with the default [`MAX_LINE_BYTES`] limit.
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    /// Create an assembler that rejects lines longer than `max_line_bytes`.
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            next_index: 0,
            discarding: false,
        }
    }

    /// Maximum accepted line length.
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    fn reset(&mut self) {
        self.next_index = 0;
        self.discarding = false;
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineAssembler {
    type Item = LineResult;
    type Error = WorkerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            // Never look further than one byte past the limit.
            let read_to = src.len().min(self.max_line_bytes.saturating_add(1));
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == NEWLINE)
                .map(|offset| offset + self.next_index);

            match (self.discarding, newline) {
                (true, Some(index)) => {
                    src.advance(index + 1);
                    self.reset();
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(index)) => {
                    self.next_index = 0;
                    let mut line = src.split_to(index + 1);
                    line.truncate(index);
                    let line = String::from_utf8(line.to_vec()).map_err(|_| {
                        WorkerError::MalformedRequest("line is not valid UTF-8".to_string())
                    });
                    return Ok(Some(line));
                }
                (false, None) if src.len() > self.max_line_bytes => {
                    self.discarding = true;
                    return Ok(Some(Err(WorkerError::LineTooLong(self.max_line_bytes))));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }

        // An unterminated tail is never a line.
        if !src.is_empty() {
            debug!(bytes = src.len(), "Discarding unterminated input at end of stream");
            src.clear();
        }
        self.reset();
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio_util::codec::FramedRead;

    async fn collect<R>(reader: R, assembler: LineAssembler) -> Vec<LineResult>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut framed = FramedRead::new(reader, assembler);
        let mut out = Vec::new();
        while let Some(item) = framed.next().await {
            out.push(item.unwrap());
        }
        out
    }

    fn lines(items: Vec<LineResult>) -> Vec<String> {
        items.into_iter().map(|item| item.unwrap()).collect()
    }

    #[test]
    fn test_decode_single_line() {
        let mut assembler = LineAssembler::new();
        let mut buf = BytesMut::from("a1|test|hello|0\n");

        let line = assembler.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(line, "a1|test|hello|0");
        assert!(buf.is_empty());
        assert!(assembler.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_incremental() {
        let mut assembler = LineAssembler::new();
        let mut buf = BytesMut::new();

        for byte in b"b1|random|8" {
            buf.extend_from_slice(&[*byte]);
            assert!(assembler.decode(&mut buf).unwrap().is_none());
        }
        buf.extend_from_slice(b"\nb2");

        let line = assembler.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(line, "b1|random|8");
        assert_eq!(&buf[..], b"b2");
    }

    #[test]
    fn test_empty_line() {
        let mut assembler = LineAssembler::new();
        let mut buf = BytesMut::from("\n");
        let line = assembler.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(line, "");
    }

    #[tokio::test]
    async fn test_byte_at_a_time() {
        let input = b"a1|test|hello|0\na2|test|world|0\n";
        let mut builder = tokio_test::io::Builder::new();
        for byte in input.iter() {
            builder.read(std::slice::from_ref(byte));
        }

        let items = collect(builder.build(), LineAssembler::new()).await;
        assert_eq!(lines(items), vec!["a1|test|hello|0", "a2|test|world|0"]);
    }

    #[tokio::test]
    async fn test_arbitrary_chunks() {
        let reader = tokio_test::io::Builder::new()
            .read(b"one|a")
            .read(b"\ntwo|b\nthr")
            .read(b"ee|c")
            .read(b"\n")
            .read(b"four|d\nfive|e\n")
            .build();

        let items = collect(reader, LineAssembler::new()).await;
        assert_eq!(
            lines(items),
            vec!["one|a", "two|b", "three|c", "four|d", "five|e"]
        );
    }

    #[tokio::test]
    async fn test_dangling_partial_discarded() {
        let reader = tokio_test::io::Builder::new()
            .read(b"a1|test|x|0\n")
            .read(b"a2|test|never")
            .build();

        let items = collect(reader, LineAssembler::new()).await;
        assert_eq!(lines(items), vec!["a1|test|x|0"]);
    }

    #[tokio::test]
    async fn test_line_too_long_recovers() {
        let reader = tokio_test::io::Builder::new()
            .read(b"ok|1\n")
            .read(b"0123456789abcdef")
            .read(b"ghij\n")
            .read(b"ok|2\n")
            .build();

        let items = collect(reader, LineAssembler::with_max_line_bytes(8)).await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_deref().unwrap(), "ok|1");
        assert!(matches!(items[1], Err(WorkerError::LineTooLong(8))));
        assert_eq!(items[2].as_deref().unwrap(), "ok|2");
    }

    #[tokio::test]
    async fn test_line_at_limit_accepted() {
        let reader = tokio_test::io::Builder::new().read(b"12345678\n").build();
        let items = collect(reader, LineAssembler::with_max_line_bytes(8)).await;
        assert_eq!(lines(items), vec!["12345678"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_per_line() {
        let reader = tokio_test::io::Builder::new()
            .read(b"bad|\xff\xfe\n")
            .read(b"good|1\n")
            .build();

        let items = collect(reader, LineAssembler::new()).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(WorkerError::MalformedRequest(_))));
        assert_eq!(items[1].as_deref().unwrap(), "good|1");
    }
}
