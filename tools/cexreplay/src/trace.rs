//! Extraction of value annotations from raw verifier output.
//!
//! The verifier interleaves annotations with unrelated diagnostics. Only lines
//! carrying [`TRACE_MARKER`] matter; everything else is dropped silently. A
//! marked line has the shape `... (smack:<key> = <value>) ...` where `<key>` is
//! either `ext:<fn>` (a value returned by an external call) or
//! `arg:<fn>:<index>` (an entry-point argument capture).
//!
//! Keys are decoded exactly once, here, into a tagged [`TraceRecord`]. Marker
//! lines that cannot be decoded surface as a [`TraceWarning`] instead of a
//! record; they never abort the scan.

use std::fmt;
use std::io::BufRead;

pub const TRACE_MARKER: &str = "(smack:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Return,
    Argument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    Return {
        function: String,
        value: String,
    },
    Argument {
        function: String,
        index: String,
        value: String,
    },
}

impl TraceRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Return { .. } => RecordKind::Return,
            Self::Argument { .. } => RecordKind::Argument,
        }
    }

    pub fn function(&self) -> &str {
        match self {
            Self::Return { function, .. } | Self::Argument { function, .. } => function,
        }
    }

    pub fn index(&self) -> Option<&str> {
        match self {
            Self::Return { .. } => None,
            Self::Argument { index, .. } => Some(index),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Return { value, .. } | Self::Argument { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceWarning {
    /// A marker line whose payload is not `key = value`.
    MalformedLine { line_number: usize, line: String },
    /// A well-formed payload whose key is neither `ext:<fn>` nor `arg:<fn>:<index>`.
    UnexpectedKey { line_number: usize, key: String },
    /// The input stream failed mid-read; scanning stops at this point.
    Unreadable { line_number: usize, error: String },
}

impl fmt::Display for TraceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedLine { line_number, line } => {
                write!(f, "malformed trace annotation on line {line_number}: {line}")
            }
            Self::UnexpectedKey { key, .. } => write!(f, "unexpected key {key}"),
            Self::Unreadable { line_number, error } => {
                write!(f, "trace input unreadable after line {line_number}: {error}")
            }
        }
    }
}

pub type TraceItem = Result<TraceRecord, TraceWarning>;

/// Parses one line of verifier output. `None` means the line carries no marker.
pub fn parse_line(line: &str, line_number: usize) -> Option<TraceItem> {
    let start = line.rfind(TRACE_MARKER)? + TRACE_MARKER.len();
    let rest = &line[start..];
    let malformed = || TraceWarning::MalformedLine {
        line_number,
        line: line.trim_end().to_string(),
    };

    let Some(end) = rest.rfind(')') else {
        return Some(Err(malformed()));
    };
    let Some((key, value)) = rest[..end].rsplit_once(" = ") else {
        return Some(Err(malformed()));
    };
    let value = value.trim();
    if key.is_empty() || value.is_empty() {
        return Some(Err(malformed()));
    }

    Some(decode_key(key, value).ok_or_else(|| TraceWarning::UnexpectedKey {
        line_number,
        key: key.to_string(),
    }))
}

fn decode_key(key: &str, value: &str) -> Option<TraceRecord> {
    let fields = key.split(':').collect::<Vec<_>>();
    match fields.as_slice() {
        ["ext", function] if !function.is_empty() => Some(TraceRecord::Return {
            function: (*function).to_string(),
            value: value.to_string(),
        }),
        ["arg", function, index] if !function.is_empty() && !index.is_empty() => {
            Some(TraceRecord::Argument {
                function: (*function).to_string(),
                index: (*index).to_string(),
                value: value.to_string(),
            })
        }
        _ => None,
    }
}

/// Single-pass scanner over a verifier output stream.
///
/// Input is read as bytes and decoded lossily; verifier output is not
/// guaranteed to be UTF-8 outside the annotations.
pub struct TraceParser<R> {
    reader: R,
    line_number: usize,
    buffer: Vec<u8>,
    finished: bool,
}

impl<R: BufRead> TraceParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
            buffer: Vec::new(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for TraceParser<R> {
    type Item = TraceItem;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            self.buffer.clear();
            match self.reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => self.finished = true,
                Ok(_) => {
                    self.line_number += 1;
                    let line = String::from_utf8_lossy(&self.buffer);
                    if let Some(item) = parse_line(&line, self.line_number) {
                        return Some(item);
                    }
                }
                Err(error) => {
                    self.finished = true;
                    return Some(Err(TraceWarning::Unreadable {
                        line_number: self.line_number,
                        error: error.to_string(),
                    }));
                }
            }
        }
        None
    }
}

pub fn parse_trace(text: &str) -> TraceParser<&[u8]> {
    TraceParser::new(text.as_bytes())
}
