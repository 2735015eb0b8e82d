//! Streaming reader for VM profiling logs
//!
//! Every line is one CSV record whose first field names the record type. A
//! static dispatch table maps each type to the field parsers for its
//! arguments and to the processor that consumes them. Types missing from the
//! table are ignored.
//!
//! In timed-range mode only records between two `current-time` markers are
//! processed. Lines are buffered after a marker and replayed when the next
//! marker arrives; ticks outside any range are dropped and other records
//! outside a range are processed immediately.

use crate::code_entry::UnknownCodeState;
use crate::csv_parser::{self, CsvError};
use fnv::FnvHashMap;
use thiserror::Error;
use tracing::{trace, warn};

/// Marker line delimiting timed ranges
pub const TIMER_MARKER: &str = "current-time";

/// Largest integer a log writer can emit without losing precision
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// Errors raised while decoding or processing a record
#[derive(Error, Debug)]
pub enum LogError {
    #[error(transparent)]
    Csv(#[from] CsvError),

    #[error("invalid integer {0:?}")]
    InvalidInt(String),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("missing field {0}")]
    MissingField(usize),

    #[error("field {index} is not {expected}")]
    FieldType { index: usize, expected: &'static str },

    #[error(transparent)]
    CodeState(#[from] UnknownCodeState),
}

/// Result type for record processing
pub type Result<T> = std::result::Result<T, LogError>;

/// Parse an integer the way the log writer prints them: decimal or
/// `0x`-prefixed hex, with an optional sign.
pub fn parse_int(text: &str) -> Result<i64> {
    let invalid = || LogError::InvalidInt(text.to_string());
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|_| invalid())?;
    if magnitude < 0 {
        return Err(invalid());
    }
    Ok(if negative { -magnitude } else { magnitude })
}

/// Parse an unsigned code address, decimal or `0x`-prefixed hex
pub fn parse_address(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    }
    .map_err(|_| LogError::InvalidAddress(text.to_string()))
}

/// How one argument field is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldParser {
    String,
    Int,
    Address,
    /// Every remaining field, undecoded
    VarArgs,
}

/// A decoded argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Str(String),
    Int(i64),
    Address(u64),
    VarArgs(Vec<String>),
    /// The line ended before this field
    Missing,
}

/// Decoded arguments of one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    fields: Vec<Field>,
}

impl Args {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn get(&self, index: usize) -> Option<&Field> {
        match self.fields.get(index) {
            None | Some(Field::Missing) => None,
            Some(field) => Some(field),
        }
    }

    pub fn str(&self, index: usize) -> Result<&str> {
        match self.get(index) {
            Some(Field::Str(value)) => Ok(value.as_str()),
            Some(_) => Err(LogError::FieldType {
                index,
                expected: "a string",
            }),
            None => Err(LogError::MissingField(index)),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64> {
        self.opt_int(index)?.ok_or(LogError::MissingField(index))
    }

    pub fn opt_int(&self, index: usize) -> Result<Option<i64>> {
        match self.get(index) {
            Some(Field::Int(value)) => Ok(Some(*value)),
            Some(_) => Err(LogError::FieldType {
                index,
                expected: "an integer",
            }),
            None => Ok(None),
        }
    }

    pub fn address(&self, index: usize) -> Result<u64> {
        match self.get(index) {
            Some(Field::Address(value)) => Ok(*value),
            Some(_) => Err(LogError::FieldType {
                index,
                expected: "an address",
            }),
            None => Err(LogError::MissingField(index)),
        }
    }

    /// Trailing fields; empty when the line ended earlier
    pub fn var_args(&self, index: usize) -> &[String] {
        match self.get(index) {
            Some(Field::VarArgs(values)) => values,
            _ => &[],
        }
    }
}

/// Processor callback for one record type
pub type Processor<H> = fn(&mut H, &Args) -> Result<()>;

/// Schema and processor for one record type
pub struct Dispatch<H> {
    pub parsers: &'static [FieldParser],
    pub processor: Processor<H>,
}

impl<H> Clone for Dispatch<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for Dispatch<H> {}

impl<H> std::fmt::Debug for Dispatch<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("parsers", &self.parsers)
            .finish_non_exhaustive()
    }
}

/// Which lines are processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeMode {
    /// Every line
    #[default]
    Direct,
    /// Lines between consecutive markers; every marker closes the previous
    /// range and opens the next
    Timed,
    /// Markers alternately open and close a range
    Pairwise,
}

impl RangeMode {
    /// Pairing only applies once timed ranges are enabled
    pub fn from_flags(timed_range: bool, pairwise_timed_range: bool) -> Self {
        match (timed_range, pairwise_timed_range) {
            (false, _) => Self::Direct,
            (true, false) => Self::Timed,
            (true, true) => Self::Pairwise,
        }
    }
}

/// Line-oriented log reader dispatching records to a handler of type `H`
#[derive(Debug)]
pub struct LogReader<H> {
    dispatch: FnvHashMap<&'static str, Dispatch<H>>,
    mode: RangeMode,
    seen_marker: bool,
    buffered: Vec<(usize, String)>,
    line_number: usize,
    partial: String,
    errors: usize,
    warned_precision: bool,
}

impl<H> LogReader<H> {
    pub fn new(
        dispatch: impl IntoIterator<Item = (&'static str, Dispatch<H>)>,
        mode: RangeMode,
    ) -> Self {
        Self {
            dispatch: dispatch.into_iter().collect(),
            mode,
            seen_marker: false,
            buffered: Vec::new(),
            line_number: 0,
            partial: String::new(),
            errors: 0,
            warned_precision: false,
        }
    }

    /// Number of lines that failed to decode or process
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Number of lines read so far
    pub fn line_count(&self) -> usize {
        self.line_number
    }

    /// Feed a block of log text. A trailing incomplete line is kept until
    /// the next chunk or [`LogReader::finish`].
    pub fn process_log_chunk(&mut self, handler: &mut H, chunk: &str) {
        self.partial.push_str(chunk);
        let Some(last_newline) = self.partial.rfind('\n') else {
            return;
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        for line in complete.lines() {
            self.process_log_line(handler, line);
        }
    }

    /// Process any incomplete line left over from the last chunk
    pub fn finish(&mut self, handler: &mut H) {
        if self.partial.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.partial);
        self.process_log_line(handler, line.trim_end_matches('\r'));
    }

    /// Process one line, honoring the timed-range mode
    pub fn process_log_line(&mut self, handler: &mut H, line: &str) {
        self.line_number += 1;
        let line_number = self.line_number;

        if self.mode == RangeMode::Direct {
            self.dispatch_line(handler, line_number, line);
            return;
        }

        if line.starts_with(TIMER_MARKER) {
            if self.seen_marker {
                for (number, buffered) in std::mem::take(&mut self.buffered) {
                    self.dispatch_line(handler, number, &buffered);
                }
                if self.mode == RangeMode::Pairwise {
                    self.seen_marker = false;
                }
            } else {
                self.seen_marker = true;
            }
        } else if self.seen_marker {
            self.buffered.push((line_number, line.to_string()));
        } else if !line.starts_with("tick") {
            self.dispatch_line(handler, line_number, line);
        }
    }

    fn dispatch_line(&mut self, handler: &mut H, line_number: usize, line: &str) {
        if let Err(err) = self.try_dispatch(handler, line) {
            self.errors += 1;
            warn!("line {line_number}: {err}");
        }
    }

    fn try_dispatch(&mut self, handler: &mut H, line: &str) -> Result<()> {
        let fields = csv_parser::parse_line(line)?;
        let Some((tag, values)) = fields.split_first() else {
            return Ok(());
        };
        let Some(dispatch) = self.dispatch.get(tag.as_str()).copied() else {
            trace!("ignoring {tag} record");
            return Ok(());
        };
        let args = self.decode(dispatch.parsers, values)?;
        (dispatch.processor)(handler, &args)
    }

    fn decode(&mut self, parsers: &[FieldParser], values: &[String]) -> Result<Args> {
        let mut fields = Vec::with_capacity(parsers.len());
        for (index, parser) in parsers.iter().enumerate() {
            let Some(value) = values.get(index) else {
                fields.push(Field::Missing);
                continue;
            };
            let field = match parser {
                FieldParser::String => Field::Str(value.clone()),
                FieldParser::Int => Field::Int(self.decode_int(value)?),
                FieldParser::Address => Field::Address(parse_address(value)?),
                FieldParser::VarArgs => Field::VarArgs(values[index..].to_vec()),
            };
            fields.push(field);
        }
        Ok(Args::new(fields))
    }

    fn decode_int(&mut self, value: &str) -> Result<i64> {
        let parsed = parse_int(value)?;
        if !self.warned_precision && !(-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&parsed) {
            self.warned_precision = true;
            warn!("integer {value} exceeds 2^53-1; other log consumers may lose precision");
        }
        Ok(parsed)
    }
}

/// Expand the frames of a tick record into absolute addresses.
///
/// The stack starts with `pc`, followed by `func` when it is non-zero.
/// Frames prefixed with `+` or `-` are hex offsets from the previous offset
/// frame (initially `pc`); other frames are absolute hex addresses. An
/// `overflow` marker and undecodable frames are dropped.
pub fn process_stack(pc: u64, func: u64, frames: &[String]) -> Vec<u64> {
    let mut stack = Vec::with_capacity(frames.len() + 2);
    stack.push(pc);
    if func != 0 {
        stack.push(func);
    }
    let mut previous = pc;
    for frame in frames {
        match frame.as_bytes().first() {
            Some(b'+') | Some(b'-') => match parse_hex_offset(frame) {
                Some(offset) => {
                    previous = previous.wrapping_add_signed(offset);
                    stack.push(previous);
                }
                None => warn!("dropping frame {frame:?}"),
            },
            Some(b'o') => warn!("dropping: {frame}"),
            _ => match parse_hex(frame) {
                Some(addr) => stack.push(addr),
                None => warn!("dropping frame {frame:?}"),
            },
        }
    }
    stack
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

fn parse_hex_offset(text: &str) -> Option<i64> {
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        _ => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = i64::try_from(parse_hex(rest)?).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
