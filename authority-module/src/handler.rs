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

use bytes::{Bytes, BytesMut};
use http::{header, HeaderName, Method, StatusCode};
use log::{debug, error, info, warn};
use module_utils::pingora::{
    Connector, Error, ErrorType, HttpPeer, RequestHeader, ResponseHeader, SessionWrapper,
};
use module_utils::standard_response::{send_response, text_response};
use serde::Deserialize;
use std::fmt::Debug;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::time::Duration;

use crate::configuration::AuthorityConf;

const DEFAULT_TIMEOUT: u64 = 10;

#[derive(Debug, Deserialize)]
struct Resolution {
    instance_path: String,
}

#[derive(Debug)]
struct AuthorityResponse {
    header: ResponseHeader,
    body: Bytes,
}

/// Client resolving requests to file system paths by asking the authority
pub struct AuthorityHandler {
    connector: Connector,
    peer: HttpPeer,
    host_port: String,
    timeout: Duration,
}

impl Debug for AuthorityHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityHandler")
            .field("host_port", &self.host_port)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AuthorityHandler {
    /// Asks the authority about the current request.
    ///
    /// Returns the file system path to be served if the authority approved the request. If
    /// `None` is returned, a response has been sent already: either the authority’s own
    /// response or an error message if the authority couldn’t be reached or produced an invalid
    /// response.
    pub async fn lookup(
        &self,
        session: &mut impl SessionWrapper,
    ) -> Result<Option<PathBuf>, Box<Error>> {
        let path_and_query = session
            .uri()
            .path_and_query()
            .map_or("/", |path_and_query| path_and_query.as_str())
            .to_owned();
        info!(
            "Sending HTTP request to authority: http://{}{path_and_query}",
            self.host_port
        );

        let response = match tokio::time::timeout(self.timeout, self.query(&path_and_query)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!("Request to authority failed: {err}");
                text_response(
                    session,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Authority is unreachable",
                )
                .await?;
                return Ok(None);
            }
            Err(_) => {
                warn!(
                    "Authority didn’t respond within {} seconds",
                    self.timeout.as_secs()
                );
                text_response(
                    session,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Authority is unreachable",
                )
                .await?;
                return Ok(None);
            }
        };

        if response.header.status != StatusCode::OK {
            debug!(
                "Authority rejected request with status {}, forwarding its response",
                response.header.status
            );
            forward_response(session, response).await?;
            return Ok(None);
        }

        match serde_json::from_slice::<Resolution>(&response.body) {
            Ok(resolution) => {
                info!(
                    "Authority resolved {path_and_query} to {}",
                    resolution.instance_path
                );
                Ok(Some(resolution.instance_path.into()))
            }
            Err(err) => {
                warn!("Authority responded with invalid JSON: {err}");
                text_response(
                    session,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Authority responded with invalid JSON",
                )
                .await?;
                Ok(None)
            }
        }
    }

    async fn query(&self, path_and_query: &str) -> Result<AuthorityResponse, Box<Error>> {
        let (mut client, _) = self.connector.get_http_session(&self.peer).await?;

        let mut request = RequestHeader::build(Method::GET, path_and_query.as_bytes(), None)?;
        request.insert_header(header::HOST, &self.host_port)?;
        client.write_request_header(Box::new(request)).await?;
        client.finish_request_body().await?;

        client.read_response_header().await?;
        let header = client.response_header().cloned().ok_or_else(|| {
            Error::explain(
                ErrorType::InvalidHTTPHeader,
                "authority response has no header",
            )
        })?;

        let mut body = BytesMut::new();
        while let Some(chunk) = client.read_response_body().await? {
            body.extend_from_slice(&chunk);
        }

        Ok(AuthorityResponse {
            header,
            body: body.freeze(),
        })
    }
}

/// Headers describing the framing of the authority’s response, these are not forwarded.
fn is_framing_header(name: &HeaderName) -> bool {
    name == header::CONTENT_LENGTH
        || name == header::TRANSFER_ENCODING
        || name == header::CONNECTION
}

async fn forward_response(
    session: &mut impl SessionWrapper,
    response: AuthorityResponse,
) -> Result<(), Box<Error>> {
    let AuthorityResponse {
        header: upstream,
        body,
    } = response;

    let mut header = ResponseHeader::build(upstream.status, Some(upstream.headers.len()))?;
    for (name, value) in &upstream.headers {
        if !is_framing_header(name) {
            header.append_header(name.clone(), value.clone())?;
        }
    }
    send_response(session, header, body).await
}

impl TryFrom<AuthorityConf> for AuthorityHandler {
    type Error = Box<Error>;

    fn try_from(conf: AuthorityConf) -> Result<Self, Self::Error> {
        let port = u16::try_from(conf.authority_port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| {
                error!("Authority port should be between 1 and 65535.");
                Error::explain(
                    ErrorType::InternalError,
                    "Authority port should be between 1 and 65535.",
                )
            })?;

        let host = conf.authority_host.as_str();
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|err| {
                error!("failed resolving authority host name {host}: {err}");
                Error::new(ErrorType::InternalError)
            })?
            .next()
            .ok_or_else(|| {
                error!("DNS lookup of authority host name {host} didn't produce any results");
                Error::new(ErrorType::InternalError)
            })?;

        let host_port = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };

        let timeout = if conf.authority_timeout == 0 {
            DEFAULT_TIMEOUT
        } else {
            conf.authority_timeout
        };

        Ok(Self {
            connector: Connector::new(None),
            peer: HttpPeer::new(addr, false, String::new()),
            host_port,
            timeout: Duration::from_secs(timeout),
        })
    }
}
