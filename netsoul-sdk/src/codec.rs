//! Line codec for the netsoul wire format.
//!
//! Wire format:
//! ```text
//! <verb> <field> <field> ...\n
//! ```
//! Fields are separated by spaces. The codec never escapes anything: callers
//! URL-encode fields that may contain spaces (see [`url_encode`]).

use bytes::{Buf, BufMut, BytesMut};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::Outbound;

/// Longest line accepted before the decoder starts discarding.
pub const MAX_LINE_LENGTH: usize = 16 * 1024;

/// One decoded line: field 0 is the command verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    fields: Vec<String>,
}

impl CommandRecord {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn verb(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Fields after the verb.
    pub fn args(&self) -> &[String] {
        self.fields.get(1..).unwrap_or(&[])
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl std::fmt::Display for CommandRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fields.join(" "))
    }
}

/// Encode a command as a single `\n`-terminated line.
pub fn encode<S: AsRef<str>>(verb: &str, fields: &[S]) -> Vec<u8> {
    let mut line = String::with_capacity(verb.len() + 1);
    line.push_str(verb);
    for field in fields {
        line.push(' ');
        line.push_str(field.as_ref());
    }
    line.push('\n');
    line.into_bytes()
}

/// Extract at most one complete record from `buf`.
///
/// Returns the record (if a full line was available) and the unconsumed
/// remainder. A blank line consumes its terminator and yields no record.
pub fn decode(buf: &[u8]) -> (Option<CommandRecord>, &[u8]) {
    match buf.iter().position(|b| *b == b'\n') {
        Some(pos) => (parse_line(&buf[..pos]), &buf[pos + 1..]),
        None => (None, buf),
    }
}

fn parse_line(line: &[u8]) -> Option<CommandRecord> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = String::from_utf8_lossy(line);
    let fields: Vec<String> = text
        .split(' ')
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    if fields.is_empty() {
        None
    } else {
        Some(CommandRecord::new(fields))
    }
}

/// URL-encode a free-text field (location, comment, message body).
pub fn url_encode(text: &str) -> String {
    utf8_percent_encode(text, NON_ALPHANUMERIC).to_string()
}

/// Decode a URL-encoded field. Invalid UTF-8 is replaced, never rejected.
pub fn url_decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

/// `tokio_util` codec over [`encode`]/[`decode`].
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Skipping the tail of an oversized line until the next terminator.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = CommandRecord;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<CommandRecord>, Self::Error> {
        loop {
            let newline = src.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        src.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
            }

            let Some(pos) = newline else {
                if src.len() > MAX_LINE_LENGTH {
                    tracing::warn!(len = src.len(), "Discarding oversized line");
                    src.clear();
                    self.discarding = true;
                }
                return Ok(None);
            };

            let line = src.split_to(pos + 1);
            if let (Some(record), _) = decode(&line) {
                return Ok(Some(record));
            }
            // Blank line: keep draining.
        }
    }

    /// A partial line left when the peer closes is dropped, not an error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<CommandRecord>, Self::Error> {
        if let Some(record) = self.decode(src)? {
            return Ok(Some(record));
        }
        if !src.is_empty() {
            tracing::debug!(len = src.len(), "Discarding partial line at end of stream");
            src.clear();
        }
        self.discarding = false;
        Ok(None)
    }
}

impl Encoder<Outbound> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_line();
        dst.reserve(line.len());
        dst.put_slice(&line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> CommandRecord {
        CommandRecord::new(fields.iter().map(|f| f.to_string()).collect())
    }

    #[test]
    fn encode_appends_single_terminator() {
        assert_eq!(
            encode("auth_ag", &["ext_user", "none", "none"]),
            b"auth_ag ext_user none none\n"
        );
        assert_eq!(encode::<&str>("ping", &[]), b"ping\n");
    }

    #[test]
    fn decode_returns_remainder() {
        let (rec, rest) = decode(b"rep 002 -- cmd end\nsalut 1");
        assert_eq!(rec, Some(record(&["rep", "002", "--", "cmd", "end"])));
        assert_eq!(rest, b"salut 1");
    }

    #[test]
    fn decode_without_terminator_keeps_buffer() {
        let (rec, rest) = decode(b"salut 4 abc");
        assert!(rec.is_none());
        assert_eq!(rest, b"salut 4 abc");
    }

    #[test]
    fn decode_strips_carriage_return_and_extra_spaces() {
        let (rec, _) = decode(b"ping  600\r\n");
        assert_eq!(rec, Some(record(&["ping", "600"])));
    }

    #[test]
    fn chunk_boundaries_do_not_change_records() {
        let lines: Vec<Vec<u8>> = vec![
            encode("salut", &["12", "0123abcd", "10.0.0.1", "4242", "1285000000"]),
            encode("rep", &["002", "--", "cmd", "end"]),
            encode("user_cmd", &["7:user:1/3:bob@10.0.0.2:~:home:2012", "|", "state", "away:12"]),
            encode::<&str>("ping", &[]),
        ];
        let expected: Vec<CommandRecord> = lines.iter().map(|l| decode(l).0.unwrap()).collect();
        let stream: Vec<u8> = lines.concat();

        for chunk in 1..=stream.len() {
            let mut codec = LineCodec::new();
            let mut buf = BytesMut::new();
            let mut got = Vec::new();
            for piece in stream.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(rec) = codec.decode(&mut buf).unwrap() {
                    got.push(rec);
                }
            }
            assert_eq!(got, expected, "chunk size {chunk}");
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn split_points_between_every_pair_of_bytes() {
        let stream = b"a 1\nb 2\n\nc 3\n";
        for split in 0..=stream.len() {
            let mut codec = LineCodec::new();
            let mut buf = BytesMut::from(&stream[..split]);
            let mut got = Vec::new();
            while let Some(rec) = codec.decode(&mut buf).unwrap() {
                got.push(rec.to_string());
            }
            buf.extend_from_slice(&stream[split..]);
            while let Some(rec) = codec.decode(&mut buf).unwrap() {
                got.push(rec.to_string());
            }
            assert_eq!(got, vec!["a 1", "b 2", "c 3"], "split at {split}");
        }
    }

    #[test]
    fn oversized_line_is_dropped_without_losing_the_next_one() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'x'; MAX_LINE_LENGTH + 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"xxxx\nping 10\n");
        let rec = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(rec, record(&["ping", "10"]));
    }

    #[test]
    fn partial_line_at_eof_is_discarded() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"ping 1\nsalut 12 abc"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(record(&["ping", "1"])));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn url_encoding_round_trips_free_text() {
        let encoded = url_encode("at home: 42%");
        assert!(!encoded.contains(' '));
        assert_eq!(url_decode(&encoded), "at home: 42%");
    }
}
