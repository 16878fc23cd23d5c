//! # Notification Parser Module
//!
//! Decodes raw notification payloads into acceleration triples.
//!
//! Two device families are supported:
//! - **Fixed format**: exactly 12 bytes, three little-endian `f32` values (x, y, z).
//! - **Text stream**: UTF-8 fragments of `(x,y,z)` that may be split across
//!   several notifications. Fragments are accumulated in a [`TextBuffer`]
//!   owned by the session until a full triple is available.
//!
//! A `(` opens a new tuple and drops any stale partial one; a `)` closes it.
//! Tuples sent without parentheses are decoded as soon as three non-empty
//! fields are present. A record that outgrows [`MAX_RECORD_LEN`] or gets a
//! fourth field is rejected and the rest of it, up to its `)`, is skipped.
//!
//! Each call returns the first result it decoded; further tuples from the
//! same notification wait in the buffer (see [`Parser::next_decoded`]).

use crate::config::Config;
use crate::error::ParseError;
use std::collections::VecDeque;

const FIXED_PAYLOAD_LEN: usize = 12;

/// Longest partial record kept between notifications
pub const MAX_RECORD_LEN: usize = 64;

/// One accelerometer reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    FixedFormat,
    TextStream,
}

impl DeviceFamily {
    /// Pick the decoding strategy for a device by name, falling back to the
    /// known fixed-format addresses
    pub fn identify(name: &str, address: &str, config: &Config) -> Result<Self, ParseError> {
        if config.fixed_format_names.iter().any(|n| n == name) {
            Ok(DeviceFamily::FixedFormat)
        } else if config.text_stream_names.iter().any(|n| n == name) {
            Ok(DeviceFamily::TextStream)
        } else if config.is_known_address(address) {
            Ok(DeviceFamily::FixedFormat)
        } else {
            Err(ParseError::UnknownDevice(name.to_string()))
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ParseOutcome {
    Sample(Acceleration),
    /// More fragments are needed before a sample can be produced
    Incomplete,
}

/// Text carried over between notifications of one session
#[derive(Debug, Default)]
pub struct TextBuffer {
    pending: String,
    opened: bool,
    /// Skipping the tail of a rejected record until its `)`
    skipping: bool,
    decoded: VecDeque<Result<Acceleration, ParseError>>,
}

impl TextBuffer {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.decoded.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.pending
    }

    /// Results decoded by an earlier call but not returned yet
    pub fn next_decoded(&mut self) -> Option<Result<Acceleration, ParseError>> {
        self.decoded.pop_front()
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.opened = false;
        self.skipping = false;
    }

    fn reject(&mut self, error: ParseError) {
        self.skipping = self.opened;
        self.pending.clear();
        self.opened = false;
        self.decoded.push_back(Err(error));
    }

    fn push(&mut self, ch: char) {
        if self.skipping {
            return;
        }
        if self.opened && ch == ',' && self.pending.matches(',').count() >= 2 {
            let record = format!("{},", self.pending);
            self.reject(ParseError::Malformed(record));
        } else if self.pending.len() >= MAX_RECORD_LEN {
            let record = format!("{}...", self.pending);
            self.reject(ParseError::Malformed(record));
        } else {
            self.pending.push(ch);
        }
    }
}

/// Decode one notification for a device of the given family
pub fn parse(
    raw: &[u8],
    family: DeviceFamily,
    buffer: &mut TextBuffer,
) -> Result<ParseOutcome, ParseError> {
    match family {
        DeviceFamily::FixedFormat => parse_fixed(raw).map(ParseOutcome::Sample),
        DeviceFamily::TextStream => parse_text(raw, buffer),
    }
}

fn parse_fixed(raw: &[u8]) -> Result<Acceleration, ParseError> {
    let bytes: &[u8; FIXED_PAYLOAD_LEN] = raw
        .try_into()
        .map_err(|_| ParseError::WrongLength(raw.len()))?;

    let axis = |i: usize| {
        let word = [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
        f64::from(f32::from_le_bytes(word))
    };

    Ok(Acceleration {
        x: axis(0),
        y: axis(4),
        z: axis(8),
    })
}

fn parse_text(raw: &[u8], buffer: &mut TextBuffer) -> Result<ParseOutcome, ParseError> {
    match std::str::from_utf8(raw) {
        Ok(fragment) => scan_fragment(fragment, buffer),
        Err(_) => {
            buffer.clear();
            buffer.decoded.push_back(Err(ParseError::InvalidUtf8));
        }
    }

    match buffer.decoded.pop_front() {
        Some(result) => result.map(ParseOutcome::Sample),
        None => Ok(ParseOutcome::Incomplete),
    }
}

fn scan_fragment(fragment: &str, buffer: &mut TextBuffer) {
    for ch in fragment.chars() {
        match ch {
            '(' => {
                if !buffer.pending.is_empty() {
                    log::warn!("Dropping unterminated tuple '{}'", buffer.pending);
                }
                buffer.clear();
                buffer.opened = true;
            }
            ')' if buffer.skipping => buffer.skipping = false,
            ')' => {
                let record = std::mem::take(&mut buffer.pending);
                buffer.opened = false;
                buffer.decoded.push_back(decode_closed(&record));
            }
            c if c.is_whitespace() => {}
            c => buffer.push(c),
        }
    }

    if buffer.opened || buffer.skipping {
        return;
    }

    // No parentheses in play: decode as soon as all three fields are there
    let fields: Vec<&str> = buffer.pending.splitn(3, ',').collect();
    if fields.len() < 3 || fields.iter().any(|f| f.is_empty()) {
        return;
    }

    let result = decode_fields(&fields);
    buffer.clear();
    buffer.decoded.push_back(result);
}

fn decode_closed(record: &str) -> Result<Acceleration, ParseError> {
    let fields: Vec<&str> = record.splitn(3, ',').collect();
    if fields.len() < 3 {
        return Err(ParseError::Malformed(record.to_string()));
    }
    decode_fields(&fields)
}

fn decode_fields(fields: &[&str]) -> Result<Acceleration, ParseError> {
    let number = |field: &str| {
        field
            .parse::<f64>()
            .map_err(|_| ParseError::InvalidNumber(field.to_string()))
    };

    Ok(Acceleration {
        x: number(fields[0])?,
        y: number(fields[1])?,
        z: number(fields[2])?,
    })
}

/// Parser bound to one device, owning that device's carry-over buffer
#[derive(Debug)]
pub struct Parser {
    family: DeviceFamily,
    buffer: TextBuffer,
}

impl Parser {
    pub fn new(family: DeviceFamily) -> Self {
        Self {
            family,
            buffer: TextBuffer::default(),
        }
    }

    pub fn parse(&mut self, raw: &[u8]) -> Result<ParseOutcome, ParseError> {
        parse(raw, self.family, &mut self.buffer)
    }

    /// Next result queued when one notification carried several tuples
    pub fn next_decoded(&mut self) -> Option<Result<Acceleration, ParseError>> {
        self.buffer.next_decoded()
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }
}
