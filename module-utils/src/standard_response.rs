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

//! Standard responses for various conditions

use bytes::Bytes;
use http::{header, method::Method, status::StatusCode};
use maud::{html, DOCTYPE};

use crate::pingora::{Error, ResponseHeader, SessionWrapper};

/// Produces the text of a standard response page for the given status code.
pub fn response_text(status: StatusCode) -> String {
    let status_str = status.as_str();
    let reason = status.canonical_reason().unwrap_or("");
    html! {
        (DOCTYPE)
        html {
            head {
                title {
                    (status_str) " " (reason)
                }
            }

            body {
                center {
                    h1 {
                        (status_str) " " (reason)
                    }
                }
            }
        }
    }
    .into()
}

/// Sends a complete response consisting of the given header and body.
///
/// `Content-Length` header is set according to the body size. The body is omitted for `HEAD`
/// requests.
pub async fn send_response(
    session: &mut impl SessionWrapper,
    mut header: ResponseHeader,
    body: Bytes,
) -> Result<(), Box<Error>> {
    header.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;

    let send_body = session.req_header().method != Method::HEAD && !body.is_empty();
    session
        .write_response_header(Box::new(header), !send_body)
        .await?;

    if send_body {
        session.write_response_body(Some(body), true).await?;
    }

    Ok(())
}

async fn typed_response(
    session: &mut impl SessionWrapper,
    status: StatusCode,
    content_type: &str,
    text: String,
) -> Result<(), Box<Error>> {
    let mut header = ResponseHeader::build(status, Some(2))?;
    header.append_header(header::CONTENT_TYPE, content_type)?;
    send_response(session, header, text.into()).await
}

/// Responds with a standard error page for the given status code.
pub async fn error_response(
    session: &mut impl SessionWrapper,
    status: StatusCode,
) -> Result<(), Box<Error>> {
    typed_response(
        session,
        status,
        "text/html; charset=utf-8",
        response_text(status),
    )
    .await
}

/// Responds with a plain text diagnostic message and the given status code.
pub async fn text_response(
    session: &mut impl SessionWrapper,
    status: StatusCode,
    text: impl Into<String>,
) -> Result<(), Box<Error>> {
    typed_response(session, status, "text/plain; charset=utf-8", text.into()).await
}
