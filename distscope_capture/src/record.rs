//! Distance estimate record parser
//!
//! A ranging device logs one record per antenna path per measurement round,
//! for example:
//!
//! ```text
//! Distance estimates on antenna path 2: ifft: 1.5, phase_slope: -0.3, rtt: 9.9, best: 1.5
//! ```
//!
//! The grammar is fixed: the literal prefix, an unsigned integer antenna path,
//! then the four metrics in [`Metric::ALL`] order as `name: number` pairs
//! separated by `", "`. A number is an optional sign, one or more digits and
//! an optional fraction of one or more digits. Anything else is not a record
//! and [`Parser::parse`] returns `None`; there is no partial extraction and no
//! defaulting of malformed fields.
//!
//! Callers are expected to strip line terminators before parsing.

use serde::{Deserialize, Serialize};

use crate::metric::{METRIC_COUNT, Metric, Readings, SourceId};

/// Literal text that opens every record.
pub const PREFIX: &str = "Distance estimates on antenna path ";

const ID_SEPARATOR: &str = ": ";
const FIELD_SEPARATOR: &str = ", ";
const NAME_SEPARATOR: &str = ": ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// How much of a line a record must occupy.
pub enum MatchMode {
    /// The whole line is the record, byte for byte.
    #[default]
    Exact,
    /// The record may be preceded by arbitrary text, as with device log
    /// decorations like `[00:00:03.512,000] <inf> app: `, and followed by
    /// arbitrary text once the final number ends.
    Embedded,
}

/// One parsed record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// The antenna path that produced the record.
    pub source: SourceId,
    /// The four distance estimates of the record.
    pub readings: Readings,
}

#[derive(Debug, Clone, Copy, Default)]
/// Parser for distance estimate records
pub struct Parser {
    mode: MatchMode,
}

impl Parser {
    /// Create a new parser with the given [`MatchMode`]
    #[must_use]
    pub const fn new(mode: MatchMode) -> Self {
        Self { mode }
    }

    /// The [`MatchMode`] of this parser.
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Parse a single line, returning `None` if the line is not a record.
    ///
    /// This function is total: it never panics and never allocates.
    #[must_use]
    pub fn parse(&self, line: &str) -> Option<Sample> {
        match self.mode {
            MatchMode::Exact => parse_body(line.strip_prefix(PREFIX)?, true),
            // A record cut short by a serial glitch may be followed by a
            // complete one on the same line, so every occurrence is tried.
            MatchMode::Embedded => line
                .match_indices(PREFIX)
                .find_map(|(start, _)| parse_body(&line[start + PREFIX.len()..], false)),
        }
    }
}

/// Parse everything after [`PREFIX`]. With `whole` set nothing may follow the
/// final number.
fn parse_body(rest: &str, whole: bool) -> Option<Sample> {
    let (id, rest) = split_while(rest, |c| c.is_ascii_digit());
    if id.is_empty() {
        return None;
    }
    let source = SourceId::new(id.parse::<u8>().ok()?);
    let mut rest = rest.strip_prefix(ID_SEPARATOR)?;

    let mut values = [0.0; METRIC_COUNT];
    for metric in Metric::ALL {
        if metric.index() > 0 {
            rest = rest.strip_prefix(FIELD_SEPARATOR)?;
        }
        rest = rest
            .strip_prefix(metric.name())?
            .strip_prefix(NAME_SEPARATOR)?;
        let (token, tail) = split_while(rest, is_number_char);
        values[metric.index()] = parse_number(token)?;
        rest = tail;
    }

    if whole && !rest.is_empty() {
        return None;
    }

    Some(Sample {
        source,
        readings: Readings::new(values),
    })
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '+' | '-' | '.')
}

fn split_while(s: &str, pred: impl Fn(char) -> bool) -> (&str, &str) {
    let end = s.find(|c: char| !pred(c)).unwrap_or(s.len());
    s.split_at(end)
}

/// Parse `[+-]?[0-9]+(\.[0-9]+)?`, rejecting everything else.
fn parse_number(token: &str) -> Option<f64> {
    let unsigned = token
        .strip_prefix('+')
        .or_else(|| token.strip_prefix('-'))
        .unwrap_or(token);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    if int.is_empty() || !int.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Some(frac) = frac {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    token.parse::<f64>().ok()
}
