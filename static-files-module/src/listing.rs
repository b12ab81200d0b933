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

//! Plain text directory listings.

use http::{header, status::StatusCode};
use log::{debug, warn};
use module_utils::pingora::{Error, ResponseHeader, SessionWrapper};
use module_utils::standard_response::{send_response, text_response};
use module_utils::RequestFilterResult;
use std::fmt::Write;
use std::fs;
use std::io;
use std::path::Path;

/// Formats a file size for humans: bytes below 1 KiB, otherwise one decimal place of the
/// largest fitting binary unit.
pub fn format_size(size: u64) -> String {
    const UNITS: [(u32, char); 4] = [(40, 'T'), (30, 'G'), (20, 'M'), (10, 'K')];

    for (shift, unit) in UNITS {
        let threshold = 1_u64 << shift;
        if size >= threshold {
            let value = size as f64 / threshold as f64;
            return format!("{value:.1}{unit}");
        }
    }
    format!("{size}B")
}

/// Produces the listing of a directory, one line with name and size per entry.
///
/// Entries are sorted by name. Subdirectories are marked with a trailing slash and have no size.
pub fn render_listing(path: &Path) -> Result<String, io::Error> {
    let mut entries = fs::read_dir(path)?
        .map(|entry| {
            let entry = entry?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            let metadata = entry.metadata()?;
            let size = if metadata.is_dir() {
                name.push('/');
                "-".to_owned()
            } else {
                format_size(metadata.len())
            };
            Ok((name, size))
        })
        .collect::<Result<Vec<_>, io::Error>>()?;
    entries.sort();

    let mut listing = String::new();
    for (name, size) in entries {
        let _ = writeln!(listing, "{name:<35} {size:>10}");
    }
    Ok(listing)
}

/// Responds with the listing of a directory.
///
/// Failure to read the directory produces a `500 Internal Server Error` response.
pub async fn list_directory(
    session: &mut impl SessionWrapper,
    path: &Path,
) -> Result<RequestFilterResult, Box<Error>> {
    let listing = match render_listing(path) {
        Ok(listing) => listing,
        Err(err) => {
            warn!("failed listing directory {path:?}: {err}");
            text_response(
                session,
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Can't serve request due to error: {err}"),
            )
            .await?;
            return Ok(RequestFilterResult::ResponseSent);
        }
    };
    debug!("listing directory {path:?}");

    let mut header = ResponseHeader::build(StatusCode::OK, Some(2))?;
    header.append_header(header::CONTENT_TYPE, "text/plain")?;
    send_response(session, header, listing.into()).await?;
    Ok(RequestFilterResult::ResponseSent)
}
