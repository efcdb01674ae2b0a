//! # Observing block files
//!
//! Readers for the two text files attached to an observing block:
//!
//! * the **parameter file** (`.paf`), one `KEY "value";` entry per line, read into a
//!   [`ParameterFile`] that keeps the file order;
//! * the **ephemeris file** (`.eph`), whose `INS.EPHEM.RECORD` lines hold the predicted
//!   positions and whose `PAF.DESC` lines describe the target, read into an [`EphemerisFile`].
//!
//! Record layout
//! -----------------
//! ```text
//! INS.EPHEM.RECORD "2024-01-01 00:00:00.000, 60310.000000, 05, 34, 31.9, -05, 23, 28.0";
//! ```
//! Fields are comma separated: date-time (a `T` separator is accepted), MJD (ignored), then the
//! right ascension as `hh, mm, ss.s` and the declination as `dd, mm, ss.s`. Quotes may
//! enclose the whole record or only the date. Extra trailing fields (rates, magnitude) are
//! ignored.
//!
//! The rows feed the pipeline through
//! [`QueryTarget::Ephemeris`](crate::pipeline::QueryTarget::Ephemeris).
use ahash::AHashMap;
use camino::Utf8Path;
use itertools::Itertools;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, opt, rest},
    sequence::{delimited, preceded, terminated},
    IResult, Parser,
};

use crate::conversion::{parse_dec_to_deg, parse_ra_to_deg};
use crate::ephemeris::EphemerisRow;
use crate::skypatch_errors::SkyPatchError;
use crate::time::parse_utc_datetime;

const RECORD_KEY: &str = "INS.EPHEM.RECORD";
const DESC_KEY: &str = "PAF.DESC";

fn is_key_char(c: char) -> bool {
    !c.is_whitespace() && c != ';' && c != '"'
}

fn parse_key(input: &str) -> IResult<&str, &str> {
    take_while1(is_key_char).parse(input)
}

fn parse_value(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_till(|c: char| c == '"'), char('"')),
        take_while1(is_key_char),
    ))
    .parse(input)
}

fn parse_comment(input: &str) -> IResult<&str, &str> {
    preceded(char('#'), rest).parse(input)
}

/// `KEY [value][;] [# comment]`, the whole line.
fn parse_paf_line(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    all_consuming(terminated(
        (
            parse_key,
            opt(preceded(multispace1, parse_value)),
        ),
        (
            multispace0,
            opt(tag(";")),
            multispace0,
            opt(parse_comment),
        ),
    ))
    .parse(input)
}

/// `KEY <anything>`, for records whose value is not a single quoted string.
fn parse_raw_line(input: &str) -> IResult<&str, (&str, &str)> {
    (parse_key, preceded(multispace1, rest)).parse(input)
}

fn is_skipped(line: &str) -> bool {
    line.is_empty() || line.starts_with('#')
}

fn parse_error(line_no: usize, reason: impl std::fmt::Display) -> SkyPatchError {
    SkyPatchError::ObservingBlockParse(format!("line {line_no}: {reason}"))
}

/// Key/value entries of a `.paf` file, in file order.
///
/// A repeated key keeps its first position and takes the last value.
#[derive(Debug, Clone, Default)]
pub struct ParameterFile {
    entries: Vec<(String, String)>,
    index: AHashMap<String, usize>,
}

impl ParameterFile {
    pub fn parse(text: &str) -> Result<Self, SkyPatchError> {
        let mut file = ParameterFile::default();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if is_skipped(line) {
                continue;
            }
            let (_, (key, value)) = parse_paf_line(line)
                .map_err(|e| parse_error(line_no + 1, format!("malformed entry ({e})")))?;
            file.insert(key, value.unwrap_or_default());
        }
        Ok(file)
    }

    pub fn from_path(path: &Utf8Path) -> Result<Self, SkyPatchError> {
        let text = std::fs::read_to_string(path)?;
        ParameterFile::parse(&text)
    }

    fn insert(&mut self, key: &str, value: &str) {
        match self.index.get(key) {
            Some(&i) => self.entries[i].1 = value.to_string(),
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), value.to_string()));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&i| self.entries[i].1.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Content of an `.eph` file: the target description and its ephemeris rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EphemerisFile {
    /// `name: value` pairs of the `PAF.DESC` lines, in file order
    pub description: Vec<(String, String)>,
    pub rows: Vec<EphemerisRow>,
}

impl EphemerisFile {
    pub fn parse(text: &str) -> Result<Self, SkyPatchError> {
        let mut file = EphemerisFile::default();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if is_skipped(line) {
                continue;
            }
            let Ok((_, (key, value))) = parse_raw_line(line) else {
                continue;
            };
            let value = value.trim().trim_end_matches(';').replace('"', "");

            if key == RECORD_KEY {
                file.rows.push(parse_record(line_no + 1, &value)?);
            } else if key == DESC_KEY {
                if let Some((name, text)) = value.split_once(':') {
                    file.description
                        .push((name.trim().to_string(), text.trim().to_string()));
                }
            }
        }
        log::debug!("{} ephemeris records read", file.rows.len());
        Ok(file)
    }

    pub fn from_path(path: &Utf8Path) -> Result<Self, SkyPatchError> {
        let text = std::fs::read_to_string(path)?;
        EphemerisFile::parse(&text)
    }

    pub fn describe(&self, name: &str) -> Option<&str> {
        self.description
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One `INS.EPHEM.RECORD` value, quotes and trailing `;` already removed.
fn parse_record(line_no: usize, value: &str) -> Result<EphemerisRow, SkyPatchError> {
    let fields: Vec<&str> = value.split(',').map(str::trim).collect();
    if fields.len() < 8 {
        return Err(parse_error(
            line_no,
            format!("expected at least 8 record fields, found {}", fields.len()),
        ));
    }

    let timestamp = parse_utc_datetime("date", fields[0]).map_err(|e| parse_error(line_no, e))?;
    let ra = parse_ra_to_deg(&fields[2..5].iter().join(":")).map_err(|e| parse_error(line_no, e))?;
    let dec =
        parse_dec_to_deg(&fields[5..8].iter().join(":")).map_err(|e| parse_error(line_no, e))?;

    EphemerisRow::new(timestamp, ra, dec).map_err(|e| parse_error(line_no, e))
}
