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

//! File metadata handling

use http::{header, header::HeaderName, status::StatusCode};
use httpdate::{fmt_http_date, parse_http_date};
use mime_guess::Mime;
use module_utils::pingora::{Error, ResponseHeader, SessionWrapper};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::time::SystemTime;

/// Helper wrapping file metadata information
#[derive(Debug)]
pub struct Metadata {
    /// MIME type guessed from the file extension
    pub mime: Mime,
    /// File size in bytes
    pub size: u64,
    /// Last modified time of the file in the format `Fri, 15 May 2015 15:34:21 GMT` if the time
    /// can be retrieved
    pub modified: Option<String>,
    /// ETag header for the file, encoding last modified time and file size
    pub etag: String,
}

impl Metadata {
    /// Collects the metadata for a file.
    ///
    /// This method will return any errors produced by [`std::fs::metadata()`]. It will also result
    /// in a [`ErrorKind::InvalidInput`] error if the path given doesn’t point to a regular file.
    pub fn from_path(path: &Path) -> Result<Self, io::Error> {
        let meta = path.metadata()?;

        if !meta.is_file() {
            return Err(ErrorKind::InvalidInput.into());
        }

        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let size = meta.len();
        let modified = meta.modified().ok().map(fmt_http_date);
        let etag = format!(
            "\"{:x}-{:x}\"",
            meta.modified()
                .ok()
                .and_then(|modified| modified.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map_or(0, |duration| duration.as_secs()),
            meta.len()
        );

        Ok(Self {
            mime,
            size,
            modified,
            etag,
        })
    }

    /// Checks whether the file was modified after the HTTP date given. `None` means that either
    /// date is unknown or invalid.
    fn modified_after(&self, date: &str) -> Option<bool> {
        let modified = parse_http_date(self.modified.as_deref()?).ok()?;
        Some(modified > parse_http_date(date).ok()?)
    }

    /// Checks an ETag list from `If-Match` or `If-None-Match` headers against the file’s ETag.
    /// Weak comparison ignores the `W/` prefix of the listed tags.
    fn etag_listed(&self, list: &str, weak: bool) -> bool {
        list.trim() == "*"
            || list
                .split(',')
                .map(str::trim)
                .map(|tag| if weak { tag.trim_start_matches("W/") } else { tag })
                .any(|tag| tag == self.etag)
    }

    /// Checks `If-Match` and `If-Unmodified-Since` headers of the request to determine whether
    /// a `412 Precondition Failed` response should be produced.
    pub fn has_failed_precondition(&self, session: &impl SessionWrapper) -> bool {
        if let Some(list) = request_header(session, header::IF_MATCH) {
            !self.etag_listed(list, false)
        } else if let Some(date) = request_header(session, header::IF_UNMODIFIED_SINCE) {
            self.modified_after(date) == Some(true)
        } else {
            false
        }
    }

    /// Checks `If-None-Match` and `If-Modified-Since` headers of the request to determine whether
    /// a `304 Not Modified` response should be produced.
    pub fn is_not_modified(&self, session: &impl SessionWrapper) -> bool {
        if let Some(list) = request_header(session, header::IF_NONE_MATCH) {
            self.etag_listed(list, true)
        } else if let Some(date) = request_header(session, header::IF_MODIFIED_SINCE) {
            self.modified_after(date) == Some(false)
        } else {
            false
        }
    }

    /// Starts a response header with `Content-Type`, `Last-Modified` and `ETag` headers.
    fn response_header(
        &self,
        status: StatusCode,
        content_length: Option<u64>,
    ) -> Result<ResponseHeader, Box<Error>> {
        let mut header = ResponseHeader::build(status, Some(6))?;
        if let Some(content_length) = content_length {
            header.append_header(header::CONTENT_LENGTH, content_length.to_string())?;
        }
        header.append_header(header::CONTENT_TYPE, self.mime.as_ref())?;
        if let Some(modified) = &self.modified {
            header.append_header(header::LAST_MODIFIED, modified)?;
        }
        header.append_header(header::ETAG, &self.etag)?;
        Ok(header)
    }

    /// Produces a `200 OK` response header for the entire file.
    pub(crate) fn to_response_header(&self) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = self.response_header(StatusCode::OK, Some(self.size))?;
        header.append_header(header::ACCEPT_RANGES, "bytes")?;
        Ok(Box::new(header))
    }

    /// Produces a `206 Partial Content` response header for the bytes `start` to `end`.
    pub(crate) fn to_partial_content_header(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header =
            self.response_header(StatusCode::PARTIAL_CONTENT, Some(end - start + 1))?;
        header.append_header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", self.size),
        )?;
        header.append_header(header::ACCEPT_RANGES, "bytes")?;
        Ok(Box::new(header))
    }

    /// Produces a `416 Range Not Satisfiable` response header indicating the actual file size.
    pub(crate) fn to_unsatisfiable_header(&self) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = self.response_header(StatusCode::RANGE_NOT_SATISFIABLE, Some(0))?;
        header.append_header(header::CONTENT_RANGE, format!("bytes */{}", self.size))?;
        Ok(Box::new(header))
    }

    /// Produces a response header without `Content-Length`, for responses that never have a
    /// body.
    pub(crate) fn to_custom_header(
        &self,
        status: StatusCode,
    ) -> Result<Box<ResponseHeader>, Box<Error>> {
        Ok(Box::new(self.response_header(status, None)?))
    }
}

fn request_header(session: &impl SessionWrapper, name: HeaderName) -> Option<&str> {
    session
        .req_header()
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
}
