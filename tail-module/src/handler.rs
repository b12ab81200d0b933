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

//! Pingora glue for tail sessions.

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, StatusCode};
use log::{debug, info, warn};
use module_utils::pingora::{Error, ErrorType, ResponseHeader, SessionWrapper};
use module_utils::standard_response::text_response;
use module_utils::RequestFilterResult;
use std::path::Path;

use crate::configuration::TailConf;
use crate::streamer::{TailOutput, TailSession, TailSettings, Termination};

/// Handler streaming a file as it grows
#[derive(Debug)]
pub struct TailHandler {
    settings: TailSettings,
}

impl TryFrom<TailConf> for TailHandler {
    type Error = Box<Error>;

    fn try_from(conf: TailConf) -> Result<Self, Self::Error> {
        if conf.flush_interval == 0 {
            return Err(Error::explain(
                ErrorType::InternalError,
                "Flush interval should be at least 1 millisecond.",
            ));
        }

        if conf.poll_interval == Some(0) {
            return Err(Error::explain(
                ErrorType::InternalError,
                "Poll interval should be at least 1 millisecond.",
            ));
        }

        Ok(Self {
            settings: conf.settings(),
        })
    }
}

impl TailHandler {
    /// Settings used for new tail sessions.
    pub fn settings(&self) -> &TailSettings {
        &self.settings
    }

    /// Streams the file at `path` to the client, starting at `offset`.
    ///
    /// Failures to set up the session produce a `500 Internal Server Error` response. Once
    /// streaming started, the response is completed normally if the file is renamed or
    /// removed. If the session times out or the client goes away, an error is returned
    /// instead so that the connection is dropped without completing the response.
    pub async fn handle(
        &self,
        session: &mut impl SessionWrapper,
        path: &Path,
        offset: Option<u64>,
    ) -> Result<RequestFilterResult, Box<Error>> {
        let tail = match TailSession::open(path, offset, self.settings.clone()).await {
            Ok(tail) => tail,
            Err(err) => {
                warn!("failed tailing {}: {err}", path.display());
                text_response(
                    session,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Can't serve request due to error: {}", err.root_cause()),
                )
                .await?;
                return Ok(RequestFilterResult::ResponseSent);
            }
        };

        info!(
            "tailing {} starting at offset {}",
            path.display(),
            tail.cursor()
        );

        let mut header = ResponseHeader::build(StatusCode::OK, Some(2))?;
        header.insert_header(header::TRANSFER_ENCODING, "chunked")?;
        header.insert_header(header::CACHE_CONTROL, "no-cache")?;
        session.write_response_header(Box::new(header), false).await?;

        let termination = tail
            .run(&mut SessionOutput {
                session: &mut *session,
            })
            .await;
        if termination.is_clean() {
            session.write_response_body(None, true).await?;
            return Ok(RequestFilterResult::ResponseSent);
        }

        let reason = match termination {
            Termination::TimedOut => "tailed file idle, dropping connection",
            _ => {
                debug!("client disconnected while tailing {}", path.display());
                "client disconnected while tailing"
            }
        };
        Err(Error::explain(ErrorType::ConnectionClosed, reason).into_down())
    }
}

struct SessionOutput<'a, S> {
    session: &'a mut S,
}

#[async_trait]
impl<S: SessionWrapper> TailOutput for SessionOutput<'_, S> {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), Box<Error>> {
        self.session.write_response_body(Some(chunk), false).await
    }
}
