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

//! A fake authority producing canned responses, meant for tests of code using
//! [`AuthorityHandler`](crate::AuthorityHandler)

use bytes::Bytes;
use http::StatusCode;
use log::debug;
use std::fmt::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::AuthorityConf;

/// Builds a raw HTTP/1.1 response with the given status, headers and body.
///
/// `Content-Length` and `Connection: close` headers are added automatically.
pub fn response(status: StatusCode, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_str(),
        status.canonical_reason().unwrap_or("")
    );
    for (name, value) in headers {
        let _ = write!(response, "{name}: {value}\r\n");
    }
    let _ = write!(
        response,
        "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    response
}

/// Builds a response resolving the request to the given file system path.
pub fn resolved(path: impl AsRef<Path>) -> String {
    let body = serde_json::json!({ "instance_path": path.as_ref().to_string_lossy() });
    response(
        StatusCode::OK,
        &[("Content-Type", "application/json")],
        &body.to_string(),
    )
}

/// An authority listening on a random local port
///
/// Every request receives the same response. The server shuts down when this value is dropped.
#[derive(Debug)]
pub struct FakeAuthority {
    port: u16,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeAuthority {
    /// Starts an authority sending the given raw response to every request.
    pub async fn start(response: impl Into<String>) -> std::io::Result<Self> {
        Self::start_with(Some(Bytes::from(response.into()))).await
    }

    /// Starts an authority that accepts connections but never responds.
    pub async fn silent() -> std::io::Result<Self> {
        Self::start_with(None).await
    }

    async fn start_with(response: Option<Bytes>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(serve(listener, response, requests.clone()));
        Ok(Self {
            port,
            requests,
            task,
        })
    }

    /// Port the authority is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Configuration pointing the authority module to this authority.
    pub fn conf(&self) -> AuthorityConf {
        AuthorityConf {
            authority_port: self.port.into(),
            ..Default::default()
        }
    }

    /// Header sections of all requests received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for FakeAuthority {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(listener: TcpListener, response: Option<Bytes>, requests: Arc<Mutex<Vec<String>>>) {
    let mut held = Vec::new();
    while let Ok((mut stream, _)) = listener.accept().await {
        let request = read_header(&mut stream).await;
        debug!("Fake authority received request: {request:?}");
        requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        if let Some(response) = &response {
            let _ = stream.write_all(response).await;
            let _ = stream.shutdown().await;
        } else {
            held.push(stream);
        }
    }
}

async fn read_header(stream: &mut TcpStream) -> String {
    let mut header = Vec::new();
    let mut buf = [0; 1024];
    while !header.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(len) => header.extend_from_slice(&buf[..len]),
        }
    }
    String::from_utf8_lossy(&header).into_owned()
}
