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

//! Request processing: authority lookup, then listing, tailing or serving the resolved path.

use async_trait::async_trait;
use authority_module::{AuthorityConf, AuthorityHandler};
use http::{header, Method, StatusCode};
use log::{debug, warn};
use module_utils::pingora::{Error, ResponseHeader, SessionWrapper};
use module_utils::standard_response::{error_response, send_response, text_response};
use module_utils::{merge_conf, RequestFilter, RequestFilterResult};
use static_files_module::{list_directory, serve_file};
use tail_module::{parse_tail_query, TailConf, TailHandler};

const ENTITY_NOT_FOUND: &str = "Entity not found.\n";

merge_conf! {
    /// Configuration settings of the request handler
    pub(crate) struct HandlerConf {
        pub(crate) authority: AuthorityConf,
        pub(crate) tail: TailConf,
    }
}

/// Handler for all requests of the directory server
#[derive(Debug)]
pub(crate) struct DirectoryHandler {
    authority: AuthorityHandler,
    tail: TailHandler,
}

impl TryFrom<HandlerConf> for DirectoryHandler {
    type Error = Box<Error>;

    fn try_from(conf: HandlerConf) -> Result<Self, Self::Error> {
        Ok(Self {
            authority: conf.authority.try_into()?,
            tail: conf.tail.try_into()?,
        })
    }
}

/// Tells the client that the resolved path doesn’t exist. The `X-Cascade` header allows a
/// front-end router to try other backends.
async fn entity_not_found(session: &mut impl SessionWrapper) -> Result<(), Box<Error>> {
    let mut header = ResponseHeader::build(StatusCode::BAD_REQUEST, Some(3))?;
    header.append_header(header::CONTENT_TYPE, "text/plain")?;
    header.append_header("X-Cascade", "pass")?;
    send_response(session, header, ENTITY_NOT_FOUND.into()).await
}

#[async_trait]
impl RequestFilter for DirectoryHandler {
    type Conf = HandlerConf;
    type CTX = ();

    fn new_ctx() -> Self::CTX {}

    async fn request_filter(
        &self,
        session: &mut impl SessionWrapper,
        _ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        let method = session.req_header().method.clone();
        if method != Method::GET && method != Method::HEAD {
            warn!("Denying method {method}");
            error_response(session, StatusCode::METHOD_NOT_ALLOWED).await?;
            return Ok(RequestFilterResult::ResponseSent);
        }

        let Some(path) = self.authority.lookup(session).await? else {
            return Ok(RequestFilterResult::ResponseSent);
        };

        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) => {
                debug!("failed retrieving metadata for {}: {err}", path.display());
                entity_not_found(session).await?;
                return Ok(RequestFilterResult::ResponseSent);
            }
        };

        if meta.is_dir() {
            return list_directory(session, &path).await;
        }

        if method == Method::GET {
            match parse_tail_query(session.uri().query()) {
                Ok(Some(request)) => return self.tail.handle(session, &path, request.offset).await,
                Ok(None) => {}
                Err(err) => {
                    warn!("rejecting tail request for {}: {err}", path.display());
                    text_response(session, StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                        .await?;
                    return Ok(RequestFilterResult::ResponseSent);
                }
            }
        }

        serve_file(session, &path).await
    }
}
