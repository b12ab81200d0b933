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

use async_trait::async_trait;
use http::{header, StatusCode};
use module_utils::pingora::{create_test_session, Error, RequestHeader, SessionWrapper};
use module_utils::standard_response::text_response;
use module_utils::{RequestFilter, RequestFilterResult};
use startup_module::{AppResult, DefaultApp};
use std::time::{Duration, Instant};
use test_log::test;

use crate::testing::{resolved, response, FakeAuthority};
use crate::{AuthorityConf, AuthorityHandler};

#[derive(Debug)]
struct Handler {
    authority: AuthorityHandler,
}

#[async_trait]
impl RequestFilter for Handler {
    type Conf = AuthorityConf;
    type CTX = ();

    fn new_ctx() -> Self::CTX {}

    async fn request_filter(
        &self,
        session: &mut impl SessionWrapper,
        _ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        if let Some(path) = self.authority.lookup(session).await? {
            text_response(
                session,
                StatusCode::OK,
                format!("resolved: {}", path.display()),
            )
            .await?;
        }
        Ok(RequestFilterResult::ResponseSent)
    }
}

impl TryFrom<AuthorityConf> for Handler {
    type Error = Box<Error>;

    fn try_from(conf: AuthorityConf) -> Result<Self, Self::Error> {
        Ok(Self {
            authority: conf.try_into()?,
        })
    }
}

async fn run(conf: AuthorityConf, method: &str, uri: &str) -> AppResult {
    let mut app = DefaultApp::<Handler>::from_conf(conf).unwrap();
    let header = RequestHeader::build(method, uri.as_bytes(), None).unwrap();
    let session = create_test_session(header).await;
    app.handle_request(session).await
}

fn status(result: &mut AppResult) -> StatusCode {
    result.session().response_written().unwrap().status
}

#[test(tokio::test)]
async fn resolved_path() {
    let authority = FakeAuthority::start(resolved("/var/vcap/data/app.log"))
        .await
        .unwrap();
    let mut result = run(authority.conf(), "GET", "/instances/1/logs?tail").await;

    assert!(result.err().is_none());
    assert_eq!(status(&mut result), StatusCode::OK);
    assert_eq!(result.body_str(), "resolved: /var/vcap/data/app.log");

    let requests = authority.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("GET /instances/1/logs?tail HTTP/1.1\r\n"));
    let host = format!("host: 127.0.0.1:{}\r\n", authority.port());
    assert!(requests[0].to_lowercase().contains(&host));
}

#[test(tokio::test)]
async fn denial_is_forwarded() {
    let authority = FakeAuthority::start(response(
        StatusCode::UNAUTHORIZED,
        &[
            ("WWW-Authenticate", "Basic realm=\"apps\""),
            ("X-Authority", "yes"),
        ],
        "Not authorized\n",
    ))
    .await
    .unwrap();
    let mut result = run(authority.conf(), "GET", "/instances/1/logs").await;

    assert!(result.err().is_none());
    assert_eq!(result.body_str(), "Not authorized\n");

    let session = result.session();
    let response = session.response_written().unwrap();
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers.get(header::WWW_AUTHENTICATE).unwrap(),
        "Basic realm=\"apps\""
    );
    assert_eq!(response.headers.get("X-Authority").unwrap(), "yes");
    assert_eq!(response.headers.get(header::CONTENT_LENGTH).unwrap(), "15");
}

#[test(tokio::test)]
async fn denial_without_body_for_head() {
    let authority = FakeAuthority::start(response(StatusCode::NOT_FOUND, &[], "Unknown app\n"))
        .await
        .unwrap();
    let mut result = run(authority.conf(), "HEAD", "/instances/2/logs").await;

    assert!(result.err().is_none());
    assert_eq!(status(&mut result), StatusCode::NOT_FOUND);
    assert_eq!(result.body_str(), "");
}

#[test(tokio::test)]
async fn invalid_json() {
    let authority = FakeAuthority::start(response(StatusCode::OK, &[], "{\"path\": \"/tmp\"}"))
        .await
        .unwrap();
    let mut result = run(authority.conf(), "GET", "/").await;

    assert!(result.err().is_none());
    assert_eq!(status(&mut result), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(result.body_str(), "Authority responded with invalid JSON");

    let authority = FakeAuthority::start(response(StatusCode::OK, &[], "not json"))
        .await
        .unwrap();
    let mut result = run(authority.conf(), "GET", "/").await;
    assert_eq!(status(&mut result), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(result.body_str(), "Authority responded with invalid JSON");
}

#[test(tokio::test)]
async fn unreachable_authority() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let conf = AuthorityConf {
        authority_port: port.into(),
        ..Default::default()
    };
    let mut result = run(conf, "GET", "/").await;

    assert!(result.err().is_none());
    assert_eq!(status(&mut result), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(result.body_str(), "Authority is unreachable");
}

#[test(tokio::test)]
async fn authority_timeout() {
    let authority = FakeAuthority::silent().await.unwrap();
    let conf = AuthorityConf {
        authority_timeout: 1,
        ..authority.conf()
    };

    let start = Instant::now();
    let mut result = run(conf, "GET", "/").await;
    assert!(start.elapsed() >= Duration::from_secs(1));

    assert!(result.err().is_none());
    assert_eq!(status(&mut result), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(result.body_str(), "Authority is unreachable");
}

#[test]
fn invalid_port() {
    for port in [0, 65536] {
        let conf = AuthorityConf {
            authority_port: port,
            ..Default::default()
        };
        let err = AuthorityHandler::try_from(conf).unwrap_err();
        assert_eq!(
            err.context.as_ref().map(ToString::to_string).as_deref(),
            Some("Authority port should be between 1 and 65535.")
        );
    }

    let conf = AuthorityConf {
        authority_port: 65535,
        ..Default::default()
    };
    assert!(AuthorityHandler::try_from(conf).is_ok());
}
