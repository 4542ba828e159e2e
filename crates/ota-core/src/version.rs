//! Version identifiers and their ordering
//!
//! A version is an opaque string split into segments on `.`. Segments that are
//! plain decimal numbers compare by value, anything else compares byte-wise.
//! `"1.9.0" < "1.10.0"`, `"1.2" < "1.2.0"`, `"1.0-rc1" < "1.0-rc2"`.
//!
//! A numeric segment sorts before a non-numeric one (`"1.10" < "1.1a"`), so
//! `"9" < "10" < "1a"` holds without a cycle. Mixing value and byte comparison
//! within one pair of segments would make the order intransitive.
//!
//! The ordering is strict-total over distinct strings: two versions compare
//! [`Ordering::Equal`] only when they are byte-identical. Numeric segments with
//! the same value but different spelling (`"01"` vs `"1"`) fall back to a
//! byte-wise tiebreak.
//!
//! Every "latest version" decision goes through [`compare`] / [`max`]; never
//! take a lexicographic `max` over version strings.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OtaError, OtaResult};

/// Segment delimiter
pub const SEGMENT_DELIMITER: char = '.';

/// Maximum accepted length of a version string in bytes
pub const MAX_VERSION_LEN: usize = 64;

/// Characters that are unsafe in a directory name or URL path segment
const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '#', '%'];

/// Path segments the HTTP surface reserves under a device type
const RESERVED: &[&str] = &["latest"];

/// A firmware version identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    /// Parse and validate a version string
    ///
    /// The string is used as a storage directory name, so it must be a
    /// non-empty run of printable ASCII without path separators and must not
    /// start with a dot.
    pub fn parse(s: &str) -> OtaResult<Self> {
        if s.is_empty() {
            return Err(OtaError::InvalidRequest("version must not be empty".into()));
        }
        if s.len() > MAX_VERSION_LEN {
            return Err(OtaError::InvalidRequest(format!(
                "version longer than {} bytes",
                MAX_VERSION_LEN
            )));
        }
        if s.starts_with('.') {
            return Err(OtaError::InvalidRequest(format!(
                "version '{}' must not start with '.'",
                s
            )));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !c.is_ascii_graphic() || FORBIDDEN.contains(c))
        {
            return Err(OtaError::InvalidRequest(format!(
                "version '{}' contains invalid character {:?}",
                s, c
            )));
        }
        if RESERVED.contains(&s) {
            return Err(OtaError::InvalidRequest(format!("version '{}' is reserved", s)));
        }
        Ok(Self(s.to_string()))
    }

    /// The raw version string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> std::str::Split<'_, char> {
        self.0.split(SEGMENT_DELIMITER)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Version {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = OtaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.0
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Digits of a plain decimal segment with leading zeros removed
fn numeric(segment: &str) -> Option<&str> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(segment.trim_start_matches('0'))
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    match (numeric(a), numeric(b)) {
        // No leading zeros left, so a longer digit run is a larger value
        (Some(x), Some(y)) => x
            .len()
            .cmp(&y.len())
            .then_with(|| x.as_bytes().cmp(y.as_bytes()))
            .then_with(|| a.as_bytes().cmp(b.as_bytes())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.as_bytes().cmp(b.as_bytes()),
    }
}

/// Compare two versions segment by segment
pub fn compare(a: &Version, b: &Version) -> Ordering {
    let mut left = a.segments();
    let mut right = b.segments();
    loop {
        match (left.next(), right.next()) {
            (Some(x), Some(y)) => match compare_segments(x, y) {
                Ordering::Equal => continue,
                other => return other,
            },
            // All shared segments equal: the shorter version is less
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => return Ordering::Equal,
        }
    }
}

/// The greatest version of a set
///
/// Returns [`OtaError::EmptyVersionSet`] when the set is empty.
pub fn max<'a, I>(versions: I) -> OtaResult<&'a Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    versions
        .into_iter()
        .max_by(|a, b| compare(a, b))
        .ok_or(OtaError::EmptyVersionSet)
}
