//! CSV line parsing for VM profiling logs
//!
//! Log records are comma separated. Commas, newlines and backslashes inside a
//! field are written as backslash escapes, so splitting on the raw separator is
//! always safe and every field is unescaped afterwards.
//!
//! Supported escapes: `\n`, `\\`, `\xHH` (Latin-1), `\uHHHH` (UTF-16 code
//! unit) and the short form `\2C` for a literal comma.

use thiserror::Error;

/// Field separator used by the log writer
pub const SEPARATOR: char = ',';

/// Errors raised while decoding a log line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsvError {
    #[error("invalid escape sequence '\\{sequence}' at byte {offset}")]
    InvalidEscape { sequence: String, offset: usize },

    #[error("truncated escape sequence at byte {offset}")]
    TruncatedEscape { offset: usize },
}

/// Result type for CSV decoding
pub type Result<T> = std::result::Result<T, CsvError>;

/// Split a log line into unescaped fields.
///
/// An empty line has no fields. A line ending in a separator has a trailing
/// empty field, matching how the VM writes empty optional values.
pub fn parse_line(line: &str) -> Result<Vec<String>> {
    if line.is_empty() {
        return Ok(Vec::new());
    }

    let mut fields = Vec::new();
    let mut offset = 0;
    for raw in line.split(SEPARATOR) {
        fields.push(unescape_field(raw, offset)?);
        offset += raw.len() + SEPARATOR.len_utf8();
    }
    Ok(fields)
}

/// Escape a field so that [`parse_line`] yields it back unchanged
pub fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            SEPARATOR => out.push_str("\\x2C"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape `fields` and join them into a log line
pub fn join_fields<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

fn unescape_field(raw: &str, base: usize) -> Result<String> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    // Consecutive \u escapes may encode a surrogate pair.
    let mut units: Vec<u16> = Vec::new();
    let mut chars = raw.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        if c != '\\' {
            flush_units(&mut units, &mut out);
            out.push(c);
            continue;
        }

        let offset = base + pos;
        let Some((_, kind)) = chars.next() else {
            return Err(CsvError::TruncatedEscape { offset });
        };

        match kind {
            'n' => {
                flush_units(&mut units, &mut out);
                out.push('\n');
            }
            '\\' => {
                flush_units(&mut units, &mut out);
                out.push('\\');
            }
            'x' => {
                let digits = take_hex(&mut chars, 2, offset)?;
                let byte = decode_hex(&digits, offset)?;
                flush_units(&mut units, &mut out);
                out.push(char::from(byte[0]));
            }
            'u' => {
                let digits = take_hex(&mut chars, 4, offset)?;
                let bytes = decode_hex(&digits, offset)?;
                units.push(u16::from_be_bytes([bytes[0], bytes[1]]));
            }
            '2' if matches!(chars.peek(), Some((_, 'C' | 'c'))) => {
                chars.next();
                flush_units(&mut units, &mut out);
                out.push(SEPARATOR);
            }
            other => {
                return Err(CsvError::InvalidEscape {
                    sequence: other.to_string(),
                    offset,
                });
            }
        }
    }

    flush_units(&mut units, &mut out);
    Ok(out)
}

fn take_hex<I>(chars: &mut I, count: usize, offset: usize) -> Result<String>
where
    I: Iterator<Item = (usize, char)>,
{
    let digits: String = chars.take(count).map(|(_, c)| c).collect();
    if digits.chars().count() < count {
        return Err(CsvError::TruncatedEscape { offset });
    }
    Ok(digits)
}

fn decode_hex(digits: &str, offset: usize) -> Result<Vec<u8>> {
    hex::decode(digits).map_err(|_| CsvError::InvalidEscape {
        sequence: digits.to_string(),
        offset,
    })
}

fn flush_units(units: &mut Vec<u16>, out: &mut String) {
    if units.is_empty() {
        return;
    }
    out.extend(
        char::decode_utf16(units.drain(..)).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)),
    );
}
