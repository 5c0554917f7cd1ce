//! Reader for the `key = value` text dumps exported by planning systems.
//!
//! Entry order is preserved: the plan parsers rely on position for
//! sequence membership and for section markers.

use crate::domain::{DosiaError, ErrorCode, ParserResult};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpEntry {
    pub source_line: usize,
    pub key: String,
    pub value: String,
}

impl DumpEntry {
    pub fn new(source_line: usize, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            source_line,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Bare lines (no `=`) carry an empty value.
    pub fn is_bare(&self) -> bool {
        self.value.is_empty()
    }

    pub fn index(&self, occurrence: usize) -> Option<usize> {
        bracket_index(&self.key, occurrence)
    }

    pub fn f64_value(&self) -> ParserResult<f64> {
        leading_token(&self.value)
            .and_then(|token| token.parse::<f64>().ok())
            .ok_or_else(|| self.invalid_value("a number"))
    }

    pub fn i64_value(&self) -> ParserResult<i64> {
        let token = leading_token(&self.value).ok_or_else(|| self.invalid_value("an integer"))?;
        if let Ok(value) = token.parse::<i64>() {
            return Ok(value);
        }
        // Some exports write integral fields as `30.0`.
        token
            .parse::<f64>()
            .ok()
            .filter(|value| value.fract() == 0.0)
            .map(|value| value as i64)
            .ok_or_else(|| self.invalid_value("an integer"))
    }

    pub fn count_value(&self) -> ParserResult<usize> {
        let value = self.i64_value()?;
        usize::try_from(value).map_err(|_| self.invalid_value("a non-negative count"))
    }

    /// Splits a multi-valued field such as `0.0\1.5\-2.0`.
    pub fn f64_values(&self, separator: char) -> ParserResult<Vec<f64>> {
        self.value
            .split(separator)
            .map(|token| {
                token
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| self.invalid_value("a list of numbers"))
            })
            .collect()
    }

    fn invalid_value(&self, expected: &str) -> DosiaError {
        DosiaError::input_validation(
            ErrorCode::InvalidDumpValue,
            "INPUT.DUMP_VALUE",
            format!(
                "expected {} for '{}' at line {}, found '{}'",
                expected, self.key, self.source_line, self.value
            ),
        )
    }
}

fn leading_token(value: &str) -> Option<&str> {
    value.split_whitespace().next()
}

pub fn parse_dump(source: &str) -> Vec<DumpEntry> {
    source
        .lines()
        .enumerate()
        .filter_map(|(index, line)| parse_dump_line(index + 1, line))
        .collect()
}

fn parse_dump_line(source_line: usize, line: &str) -> Option<DumpEntry> {
    let parts: Vec<&str> = line.split('=').collect();
    if parts.len() != 2 {
        return Some(DumpEntry::new(source_line, line, ""));
    }

    let key = parts[0].trim();
    if key.starts_with('"') {
        return None;
    }

    Some(DumpEntry::new(source_line, key, strip_quotes(parts[1].trim())))
}

fn strip_quotes(value: &str) -> &str {
    if value.starts_with('"') && value.len() > 2 {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

pub fn load_dump(path: impl AsRef<Path>) -> ParserResult<Vec<DumpEntry>> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| {
        DosiaError::io_system(
            ErrorCode::TextReadFailure,
            "IO.DUMP_READ",
            format!("failed to read dump '{}': {}", path.display(), source),
        )
    })?;
    Ok(parse_dump(&source))
}

/// Loads a dump that must contain at least one entry.
pub fn load_required_dump(path: impl AsRef<Path>) -> ParserResult<Vec<DumpEntry>> {
    let path = path.as_ref();
    let entries = load_dump(path)?;
    if entries.is_empty() {
        return Err(DosiaError::input_validation(
            ErrorCode::EmptyDump,
            "INPUT.EMPTY_DUMP",
            format!("dump '{}' has no entries", path.display()),
        ));
    }
    Ok(entries)
}

/// Returns the integer inside the `occurrence`-th bracket pair of `key`
/// (1-based), e.g. `bracket_index("points_element[3][7]", 2) == Some(7)`.
pub fn bracket_index(key: &str, occurrence: usize) -> Option<usize> {
    let open = key
        .match_indices('[')
        .map(|(position, _)| position)
        .filter(|position| *position >= 1)
        .nth(occurrence.checked_sub(1)?)?;
    let digits_start = open + 1;
    let close = key[digits_start..].find(']')? + digits_start;
    key[digits_start..close].trim().parse::<usize>().ok()
}

/// Splits a hierarchical key such as `ControlPointSequence[2].GantryAngle`.
pub fn key_segments(key: &str) -> Vec<&str> {
    key.split('.').collect()
}
