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

//! Serving a single file, the response is chosen based on the request method and headers.

use http::{method::Method, status::StatusCode};
use log::{debug, warn};
use module_utils::pingora::{Error, SessionWrapper};
use module_utils::standard_response::{error_response, text_response};
use module_utils::RequestFilterResult;
use std::io::ErrorKind;
use std::path::Path;

use crate::file_writer::file_response;
use crate::metadata::Metadata;
use crate::range::{extract_range, RangeRequest};

/// Responds with the contents of the file at `path`.
///
/// Only `GET` and `HEAD` requests are accepted. Conditional requests (`If-Match`,
/// `If-None-Match`, `If-Modified-Since`, `If-Unmodified-Since`) and byte range requests
/// (`Range`, `If-Range`) are supported. Will typically return
/// [`RequestFilterResult::ResponseSent`], an error should only be returned in exceptional cases.
pub async fn serve_file(
    session: &mut impl SessionWrapper,
    path: &Path,
) -> Result<RequestFilterResult, Box<Error>> {
    match session.req_header().method {
        Method::GET | Method::HEAD => {
            // Allowed
        }
        _ => {
            warn!("Denying method {}", session.req_header().method);
            error_response(session, StatusCode::METHOD_NOT_ALLOWED).await?;
            return Ok(RequestFilterResult::ResponseSent);
        }
    }

    let meta = match Metadata::from_path(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::InvalidInput => {
            warn!("Path {path:?} is not a regular file, denying access");
            error_response(session, StatusCode::FORBIDDEN).await?;
            return Ok(RequestFilterResult::ResponseSent);
        }
        Err(err) => {
            warn!("failed retrieving metadata for path {path:?}: {err}");
            text_response(
                session,
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Can't serve request due to error: {err}"),
            )
            .await?;
            return Ok(RequestFilterResult::ResponseSent);
        }
    };

    if meta.has_failed_precondition(session) {
        debug!("If-Match/If-Unmodified-Since precondition failed");
        let header = meta.to_custom_header(StatusCode::PRECONDITION_FAILED)?;
        session.write_response_header(header, true).await?;
        return Ok(RequestFilterResult::ResponseSent);
    }

    if meta.is_not_modified(session) {
        debug!("If-None-Match/If-Modified-Since check resulted in Not Modified");
        let header = meta.to_custom_header(StatusCode::NOT_MODIFIED)?;
        session.write_response_header(header, true).await?;
        return Ok(RequestFilterResult::ResponseSent);
    }

    let (header, start, end) = match extract_range(session, &meta) {
        RangeRequest::Partial(start, end) => {
            debug!("bytes range requested: {start}-{end}");
            (meta.to_partial_content_header(start, end)?, start, end)
        }
        RangeRequest::Unsatisfiable => {
            debug!("requested bytes ranges are out of bounds");
            let header = meta.to_unsatisfiable_header()?;
            session.write_response_header(header, true).await?;
            return Ok(RequestFilterResult::ResponseSent);
        }
        RangeRequest::Invalid(err) => {
            debug!("rejecting Range header: {err}");
            text_response(session, StatusCode::RANGE_NOT_SATISFIABLE, err.to_string()).await?;
            return Ok(RequestFilterResult::ResponseSent);
        }
        RangeRequest::Full => {
            if meta.size == 0 {
                let header = meta.to_response_header()?;
                session.write_response_header(header, true).await?;
                return Ok(RequestFilterResult::ResponseSent);
            }
            (meta.to_response_header()?, 0, meta.size - 1)
        }
    };

    let send_body = session.req_header().method == Method::GET;
    session.write_response_header(header, !send_body).await?;

    if send_body {
        // sendfile would be nice but not currently possible within pingora-proxy (see
        // https://github.com/cloudflare/pingora/issues/160)
        file_response(session, path, start, end).await?;
    }
    Ok(RequestFilterResult::ResponseSent)
}
