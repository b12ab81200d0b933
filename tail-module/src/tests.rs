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
use module_utils::pingora::{
    create_test_session, Error, ErrorType, ProxyHttp, RequestHeader, Session, SessionWrapper,
    Stream,
};
use module_utils::{FromYaml, RequestFilter, RequestFilterResult};
use startup_module::{AppResult, DefaultApp};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use test_log::test;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::{parse_tail_query, TailConf, TailHandler};

#[derive(Debug)]
struct Handler {
    tail: TailHandler,
    path: PathBuf,
}

#[async_trait]
impl RequestFilter for Handler {
    type Conf = ();
    type CTX = ();

    fn new_ctx() -> Self::CTX {}

    async fn request_filter(
        &self,
        session: &mut impl SessionWrapper,
        _ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        let offset = parse_tail_query(session.uri().query())
            .unwrap()
            .and_then(|request| request.offset);
        self.tail.handle(session, &self.path, offset).await
    }
}

fn setup(contents: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("output.log");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

fn append(path: &Path, data: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(data).unwrap();
}

fn make_app(conf: &str, path: &Path) -> DefaultApp<Handler> {
    let conf = TailConf::from_yaml(conf).unwrap();
    DefaultApp::new(Handler {
        tail: conf.try_into().unwrap(),
        path: path.to_path_buf(),
    })
}

async fn run(app: &mut DefaultApp<Handler>, uri: &str) -> AppResult {
    let header = RequestHeader::build("GET", uri.as_bytes(), None).unwrap();
    let session = create_test_session(header).await;
    tokio::time::timeout(Duration::from_secs(10), app.handle_request(session))
        .await
        .unwrap()
}

/// Processes a request arriving over a TCP connection, returns the processing result and the raw
/// bytes received by the client until the connection closed.
async fn run_over_socket(
    app: &DefaultApp<Handler>,
    uri: &str,
) -> (Result<bool, Box<Error>>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = TcpStream::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (server, _) = listener.accept().await.unwrap();

    client
        .write_all(format!("GET {uri} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut session = Session::new_h1(Box::new(Stream::from(server)));
    assert!(session.read_request().await.unwrap());
    let mut ctx = app.new_ctx();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        app.request_filter(&mut session, &mut ctx),
    )
    .await
    .unwrap();
    drop(session);

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    (result, String::from_utf8(received).unwrap())
}

fn split_response(response: &str) -> (String, &str) {
    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    (head.to_ascii_lowercase(), body)
}

fn assert_streaming_headers(result: &mut AppResult) {
    let session = result.session();
    let response = session.response_written().unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.headers.get(header::TRANSFER_ENCODING).unwrap(),
        "chunked"
    );
    assert_eq!(
        response.headers.get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );
}

#[test(tokio::test)]
async fn removal_completes_response() {
    let (_dir, path) = setup(b"hello\n");
    let mut app = make_app("flush_interval: 10", &path);

    let producer = {
        let path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            append(&path, b"world\n");
            tokio::time::sleep(Duration::from_millis(300)).await;
            fs::remove_file(&path).unwrap();
        })
    };

    let mut result = run(&mut app, "/?tail&tail_offset=0").await;
    producer.await.unwrap();

    assert!(result.err().is_none());
    assert_streaming_headers(&mut result);
    assert_eq!(result.body_str(), "hello\nworld\n");
}

#[test(tokio::test)]
async fn rename_completes_response() {
    let (dir, path) = setup(b"old data\n");
    let mut app = make_app("flush_interval: 10", &path);

    let producer = {
        let path = path.clone();
        let rotated = dir.path().join("output.log.1");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            append(&path, b"new data\n");
            tokio::time::sleep(Duration::from_millis(300)).await;
            fs::rename(&path, rotated).unwrap();
        })
    };

    let mut result = run(&mut app, "/?tail").await;
    producer.await.unwrap();

    assert!(result.err().is_none());
    assert_streaming_headers(&mut result);
    assert_eq!(result.body_str(), "new data\n");
}

#[test(tokio::test)]
async fn idle_timeout_drops_connection() {
    let (_dir, path) = setup(b"");
    let mut app = make_app("streaming_timeout: 1\nflush_interval: 10", &path);

    let producer = {
        let path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            append(&path, b"hello\n");
        })
    };

    let mut result = run(&mut app, "/?tail").await;
    producer.await.unwrap();

    assert_eq!(
        result.err().as_ref().map(|err| &err.etype),
        Some(&ErrorType::ConnectionClosed)
    );
    assert_streaming_headers(&mut result);
    assert_eq!(result.body_str(), "hello\n");
}

#[test(tokio::test)]
async fn idle_timeout_leaves_body_unterminated() {
    let (_dir, path) = setup(b"");
    let app = make_app("streaming_timeout: 1\nflush_interval: 10", &path);

    let producer = {
        let path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            append(&path, b"hello\n");
        })
    };

    let (result, response) = run_over_socket(&app, "/?tail").await;
    producer.await.unwrap();

    assert_eq!(
        result.as_ref().err().map(|err| &err.etype),
        Some(&ErrorType::ConnectionClosed)
    );
    let (head, body) = split_response(&response);
    assert!(head.starts_with("http/1.1 200 ok\r\n"));
    assert!(head.contains("transfer-encoding: chunked"));
    assert_eq!(body, "6\r\nhello\n\r\n");
    assert!(!body.ends_with("0\r\n\r\n"));
}

#[test(tokio::test)]
async fn removal_terminates_body() {
    let (_dir, path) = setup(b"hello\n");
    let app = make_app("flush_interval: 10", &path);

    let producer = {
        let path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            fs::remove_file(&path).unwrap();
        })
    };

    let (result, response) = run_over_socket(&app, "/?tail&tail_offset=0").await;
    producer.await.unwrap();

    assert!(result.unwrap());
    let (head, body) = split_response(&response);
    assert!(head.contains("transfer-encoding: chunked"));
    assert_eq!(body, "6\r\nhello\n\r\n0\r\n\r\n");
}

#[test(tokio::test)]
async fn missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = make_app("{}", &dir.path().join("missing.log"));

    let mut result = run(&mut app, "/?tail").await;
    assert!(result.err().is_none());
    assert_eq!(
        result.session().response_written().unwrap().status,
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert!(result
        .body_str()
        .starts_with("Can't serve request due to error: "));
}

#[test]
fn invalid_configuration() {
    let conf = TailConf::from_yaml("flush_interval: 0").unwrap();
    assert!(TailHandler::try_from(conf).is_err());

    let conf = TailConf::from_yaml("poll_interval: 0").unwrap();
    assert!(TailHandler::try_from(conf).is_err());

    let conf = TailConf::from_yaml("streaming_timeout: 0").unwrap();
    let handler = TailHandler::try_from(conf).unwrap();
    assert_eq!(handler.settings().idle_timeout, Duration::from_secs(60));
}
