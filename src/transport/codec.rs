//! Newline-delimited JSON framing

use std::io;

use bytes::{BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// One decoded line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed JSON value
    Message(Value),
    /// A line that could not be used; reported, then skipped
    Malformed {
        /// Offending text (empty when it was too long to keep)
        raw: String,
        /// What was wrong with it
        error: String,
    },
}

/// Codec turning a byte stream into JSON values, one per line
///
/// Partial reads are buffered until the newline arrives. `\r\n` endings and
/// blank lines are tolerated. Invalid JSON and over-long lines come out as
/// [`Frame::Malformed`] instead of errors, so one bad line never ends the
/// stream.
#[derive(Debug)]
pub struct JsonLineCodec {
    lines: LinesCodec,
    max_length: usize,
}

impl JsonLineCodec {
    /// Codec accepting lines of at most `max_length` bytes
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    fn frame(&self, result: Result<Option<String>, LinesCodecError>) -> Option<Option<Frame>> {
        match result {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                Some(Some(match serde_json::from_str::<Value>(line) {
                    Ok(value) => Frame::Message(value),
                    Err(e) => Frame::Malformed {
                        raw: line.to_string(),
                        error: e.to_string(),
                    },
                }))
            }
            Ok(None) => Some(None),
            Err(LinesCodecError::MaxLineLengthExceeded) => Some(Some(Frame::Malformed {
                raw: String::new(),
                error: format!("line exceeds {} bytes", self.max_length),
            })),
            Err(LinesCodecError::Io(e)) => Some(Some(Frame::Malformed {
                raw: String::new(),
                error: e.to_string(),
            })),
        }
    }
}

impl Decoder for JsonLineCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            let result = self.lines.decode(src);
            if let Some(frame) = self.frame(result) {
                return Ok(frame);
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            let result = self.lines.decode_eof(src);
            if let Some(frame) = self.frame(result) {
                return Ok(frame);
            }
        }
    }
}

impl Encoder<Value> for JsonLineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), io::Error> {
        let line = serde_json::to_vec(&item)?;
        dst.reserve(line.len() + 1);
        dst.extend_from_slice(&line);
        dst.put_u8(b'\n');
        Ok(())
    }
}
