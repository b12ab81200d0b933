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

//! Recognizing tail requests by their query parameters.

use serde_urlencoded::from_str;
use std::fmt::Display;

/// A request to tail a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailRequest {
    /// Position to start streaming from, `None` means the current end of file
    pub offset: Option<u64>,
}

/// The `tail_offset` query parameter isn't a valid offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidOffset;

impl Display for InvalidOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tail offset must be a positive integer.")
    }
}

impl std::error::Error for InvalidOffset {}

/// Checks a query string for tail parameters.
///
/// Returns `None` unless a `tail` parameter is present. The value of `tail` is ignored, the
/// optional `tail_offset` parameter has to be a non-negative integer if it isn't empty.
pub fn parse_tail_query(query: Option<&str>) -> Result<Option<TailRequest>, InvalidOffset> {
    let params: Vec<(String, String)> = from_str(query.unwrap_or_default()).unwrap_or_default();

    if !params.iter().any(|(name, _)| name == "tail") {
        return Ok(None);
    }

    let offset = params
        .iter()
        .find(|(name, _)| name == "tail_offset")
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.parse::<u64>().map_err(|_| InvalidOffset))
        .transpose()?;

    Ok(Some(TailRequest { offset }))
}
