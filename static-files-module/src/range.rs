// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte range processing (`Range` HTTP header)

use http::header;
use module_utils::pingora::SessionWrapper;
use std::fmt::Display;
use std::str::FromStr;

use crate::metadata::Metadata;

/// A single byte range from the `Range` header, at least one of the bounds is present.
///
/// Both bounds are inclusive byte positions. A range with only the end bound present is a
/// suffix range (`-500`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte of the range
    pub start: Option<u64>,
    /// Last byte of the range, or length of a suffix range
    pub end: Option<u64>,
}

/// Errors produced when parsing byte ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// The given range specifier is malformed
    Invalid(String),
    /// A range specifier has neither start nor end
    Empty,
}

impl Display for RangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(specifier) => write!(f, "Byte range: {specifier} is invalid."),
            Self::Empty => write!(f, "One of the byte ranges is empty."),
        }
    }
}

impl std::error::Error for RangeError {}

impl ByteRange {
    /// Parses a comma-separated list of `start-end` range specifiers, without the unit prefix.
    ///
    /// An empty list produces no ranges. Any malformed specifier fails the entire list.
    pub fn parse_list(value: &str) -> Result<Vec<Self>, RangeError> {
        if value.trim().is_empty() {
            return Ok(Vec::new());
        }

        value.split(',').map(Self::parse).collect()
    }

    fn parse(specifier: &str) -> Result<Self, RangeError> {
        let invalid = || RangeError::Invalid(specifier.to_owned());

        let mut bounds = specifier.split('-');
        let start = bounds.next().unwrap_or_default();
        let end = bounds.next().unwrap_or_default();
        if bounds.next().is_some() {
            return Err(invalid());
        }

        let parse_bound = |bound: &str| {
            let bound = bound.trim();
            if bound.is_empty() {
                Ok(None)
            } else {
                u64::from_str(bound).map(Some).map_err(|_| invalid())
            }
        };
        let start = parse_bound(start)?;
        let end = parse_bound(end)?;

        match (start, end) {
            (None, None) => Err(RangeError::Empty),
            (Some(start), Some(end)) if start > end => Err(invalid()),
            _ => Ok(Self { start, end }),
        }
    }

    /// Checks whether the range cannot be satisfied for an entity of the given size.
    ///
    /// Bounds are inclusive, so each present bound has to be smaller than the entity size.
    /// Negative entity sizes are never satisfiable.
    pub fn is_bad_range(&self, entity_size: i64) -> bool {
        let Ok(size) = u64::try_from(entity_size) else {
            return true;
        };

        match (self.start, self.end) {
            (Some(start), Some(end)) => start >= size || end >= size,
            (Some(start), None) => start >= size,
            (None, Some(end)) => end >= size,
            (None, None) => true,
        }
    }

    /// Converts the range into first and last byte position within an entity of the given size.
    ///
    /// Returns `None` if the range cannot be satisfied.
    pub fn resolve(&self, size: u64) -> Option<(u64, u64)> {
        if self.is_bad_range(i64::try_from(size).unwrap_or(i64::MAX)) {
            return None;
        }

        match (self.start, self.end) {
            (Some(start), Some(end)) => Some((start, end)),
            (Some(start), None) => Some((start, size - 1)),
            (None, Some(0)) | (None, None) => None,
            (None, Some(len)) => Some((size - len, size - 1)),
        }
    }
}

/// Result of processing the `Range` and `If-Range` request headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RangeRequest {
    /// No usable range, the entire file should be produced
    Full,
    /// A single satisfiable range
    Partial(u64, u64),
    /// None of the requested ranges can be satisfied
    Unsatisfiable,
    /// The `Range` header could not be parsed
    Invalid(RangeError),
}

/// This processes the `Range` and `If-Range` request headers to produce the requested byte range
/// if any.
///
/// `Range` header missing, using some unsupported unit or overruled by `If-Range` header will
/// all result in the full file being requested. Unsatisfiable ranges are discarded; if
/// multiple ranges remain, the full file is produced as well.
pub(crate) fn extract_range(session: &impl SessionWrapper, meta: &Metadata) -> RangeRequest {
    let headers = &session.req_header().headers;
    if let Some(value) = headers
        .get(header::IF_RANGE)
        .and_then(|value| value.to_str().ok())
    {
        if value != meta.etag
            && !meta
                .modified
                .as_ref()
                .is_some_and(|modified| modified == value)
        {
            return RangeRequest::Full;
        }
    }

    let Some(value) = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
    else {
        return RangeRequest::Full;
    };

    let list = match value.split_once('=') {
        Some((unit, list)) if unit.trim().eq_ignore_ascii_case("bytes") => list,
        Some(_) => return RangeRequest::Full,
        None => value,
    };

    let ranges = match ByteRange::parse_list(list) {
        Ok(ranges) => ranges,
        Err(err) => return RangeRequest::Invalid(err),
    };
    if ranges.is_empty() {
        return RangeRequest::Full;
    }

    let mut satisfiable = ranges.iter().filter_map(|range| range.resolve(meta.size));
    match (satisfiable.next(), satisfiable.next()) {
        (Some((start, end)), None) => RangeRequest::Partial(start, end),
        (Some(_), Some(_)) => RangeRequest::Full,
        (None, _) => RangeRequest::Unsatisfiable,
    }
}
