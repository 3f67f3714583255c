//! Framing for `tokio_util::codec`.
//!
//! Inbound, [`NavxCodec`] splits the byte stream into newline-terminated
//! lines and decodes each one. After a `FEED:` header it switches to binary
//! mode, waits for exactly `chunk_count × 92` bytes in the same read buffer,
//! and yields the whole batch as one [`Telemetry::Feed`] item before going
//! back to line mode. Outbound, it writes one [`Command`] per line.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::NavxError;
use crate::protocol::feed::{self, FeedHeader};
use crate::protocol::{Command, FeedBatch, Telemetry, decode_line};

/// Longest line accepted before a terminator must appear.
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

#[derive(Debug)]
pub struct NavxCodec {
    /// Header of a Feed frame whose binary records are still arriving.
    pending_feed: Option<FeedHeader>,
    /// Bytes already scanned for a newline, so partial lines are not rescanned.
    scanned: usize,
    max_line_length: usize,
}

impl NavxCodec {
    pub fn new() -> Self {
        Self {
            pending_feed: None,
            scanned: 0,
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            ..Self::new()
        }
    }

    /// `true` while the codec is in the middle of a binary Feed payload.
    pub fn is_reading_feed(&self) -> bool {
        self.pending_feed.is_some()
    }

    fn decode_feed_payload(
        &mut self,
        header: FeedHeader,
        src: &mut BytesMut,
    ) -> Result<Option<Telemetry>, NavxError> {
        let needed = header.payload_len();
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }
        self.pending_feed = None;
        let payload = src.split_to(needed);
        let samples = feed::decode_records(&payload)?;
        if header.declared_len as usize != needed {
            trace!(
                declared = header.declared_len,
                actual = needed,
                "feed header length disagrees with chunk count"
            );
        }
        Ok(Some(Telemetry::Feed(FeedBatch {
            declared_len: header.declared_len,
            samples,
        })))
    }
}

impl Default for NavxCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NavxCodec {
    type Item = Telemetry;
    type Error = NavxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(header) = self.pending_feed {
                return self.decode_feed_payload(header, src);
            }

            let newline = src[self.scanned..].iter().position(|b| *b == b'\n');
            let Some(offset) = newline else {
                if src.len() > self.max_line_length {
                    return Err(NavxError::LineTooLong {
                        size: src.len(),
                        max: self.max_line_length,
                    });
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let end = self.scanned + offset;
            self.scanned = 0;
            if end > self.max_line_length {
                return Err(NavxError::LineTooLong {
                    size: end,
                    max: self.max_line_length,
                });
            }

            let raw = src.split_to(end + 1);
            let mut line = &raw[..end];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            let line = std::str::from_utf8(line)?;
            trace!(line, "rx");

            match decode_line(line)? {
                Telemetry::FeedHeader(header) => {
                    // Binary records follow immediately; keep decoding from
                    // the same buffer.
                    self.pending_feed = Some(header);
                }
                telemetry => return Ok(Some(telemetry)),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(item) => Ok(Some(item)),
            None if buf.is_empty() && self.pending_feed.is_none() => Ok(None),
            None => Err(NavxError::Connection(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed mid-frame",
            ))),
        }
    }
}

impl Encoder<Command> for NavxCodec {
    type Error = NavxError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_line();
        trace!(line = line.as_str(), "tx");
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::feed::encode_batch;
    use crate::protocol::{DataKind, FeedSample, HealthReport};

    fn samples(n: u32) -> Vec<FeedSample> {
        (0..n)
            .map(|i| FeedSample {
                timestamp: i,
                yaw: i as f32 * 1.5,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn decodes_lines_incrementally() {
        let mut codec = NavxCodec::new();
        let mut buf = BytesMut::from(&b"HEALTH:1024|20"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"48|25.50\r\nYPR:1|2|3\n");
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            first,
            Telemetry::Health(HealthReport {
                mem_used: 1024,
                mem_total: 2048,
                core_temp_c: 25.5
            })
        );
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(second, Telemetry::Ypr(_)));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn feed_payload_split_across_reads() {
        let mut codec = NavxCodec::new();
        let wire = encode_batch(&samples(2));
        let mut buf = BytesMut::new();

        // Header plus half the binary payload.
        let cut = wire.len() - 100;
        buf.extend_from_slice(&wire[..cut]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.is_reading_feed());

        buf.extend_from_slice(&wire[cut..]);
        buf.extend_from_slice(b"YPR:0|0|0\n");
        let batch = codec.decode(&mut buf).unwrap().unwrap();
        match batch {
            Telemetry::Feed(b) => {
                assert_eq!(b.declared_len, 184);
                assert_eq!(b.samples, samples(2));
            }
            other => panic!("expected feed, got {other:?}"),
        }
        assert!(!codec.is_reading_feed());

        // Line mode resumes right after the last record.
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Telemetry::Ypr(_))
        ));
    }

    #[test]
    fn binary_payload_may_contain_newlines() {
        let mut batch = samples(1);
        batch[0].timestamp = 0x0A0A_0A0A;
        let mut codec = NavxCodec::new();
        let mut buf = BytesMut::from(&encode_batch(&batch)[..]);
        let item = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(item, Telemetry::Feed(b) if b.samples[0].timestamp == 0x0A0A_0A0A));
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_feed_yields_empty_batch() {
        let mut codec = NavxCodec::new();
        let mut buf = BytesMut::from(&b"FEED:0|0\n"[..]);
        let item = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(item, Telemetry::Feed(b) if b.samples.is_empty()));
    }

    #[test]
    fn line_too_long() {
        let mut codec = NavxCodec::with_max_line_length(16);
        let mut buf = BytesMut::from(&[b'x'; 32][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(NavxError::LineTooLong { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let mut codec = NavxCodec::new();
        let mut buf = BytesMut::from(&b"YPR:\xff\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(NavxError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn eof_mid_feed_is_an_error() {
        let mut codec = NavxCodec::new();
        let wire = encode_batch(&samples(1));
        let mut buf = BytesMut::from(&wire[..wire.len() - 1]);
        assert!(codec.decode_eof(&mut buf).is_err());
    }

    #[test]
    fn clean_eof() {
        let mut codec = NavxCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encodes_one_command_per_line() {
        let mut codec = NavxCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(Command::SetDataKind(DataKind::Feed), &mut dst)
            .unwrap();
        codec.encode(Command::RequestHealth, &mut dst).unwrap();
        assert_eq!(&dst[..], b"SETDATA:FEED\nGETHEALTH:\n");
    }
}
