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

//! Exposes some types from the `pingora` crate, so that typical modules no longer need it as a
//! direct dependency.

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Extensions, Uri};
pub use pingora::connectors::http::Connector;
pub use pingora::http::{RequestHeader, ResponseHeader};
pub use pingora::protocols::l4::stream::Stream;
pub use pingora::proxy::{http_proxy_service, ProxyHttp, Session};
pub use pingora::server::configuration::{Opt as ServerOpt, ServerConf};
pub use pingora::server::Server;
pub use pingora::upstreams::peer::HttpPeer;
pub use pingora::{Error, ErrorSource, ErrorType};
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};

/// A trait implemented by wrappers around Pingora’s session
///
/// All the usual methods and fields of [`Session`] are available as well.
#[async_trait]
pub trait SessionWrapper: Send + Deref<Target = Session> + DerefMut {
    /// Returns a reference to the associated extensions.
    fn extensions(&self) -> &Extensions;

    /// Returns a mutable reference to the associated extensions.
    fn extensions_mut(&mut self) -> &mut Extensions;

    /// Returns the request URI.
    fn uri(&self) -> &Uri {
        &self.req_header().uri
    }

    /// See [`Session::write_response_header`](pingora::proxy::Session::write_response_header)
    async fn write_response_header(
        &mut self,
        resp: Box<ResponseHeader>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        self.deref_mut()
            .write_response_header(resp, end_of_stream)
            .await
    }

    /// See [`Session::response_written`](pingora::protocols::http::server::Session::response_written)
    fn response_written(&self) -> Option<&ResponseHeader> {
        self.deref().response_written()
    }

    /// See [`Session::write_response_body`](pingora::proxy::Session::write_response_body)
    async fn write_response_body(
        &mut self,
        data: Option<Bytes>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        self.deref_mut()
            .write_response_body(data, end_of_stream)
            .await
    }
}

/// Creates a new Pingora session for tests with given request header
pub async fn create_test_session(mut header: RequestHeader) -> Session {
    let mut cursor = Cursor::new(Vec::<u8>::new());
    let _ = cursor.write(b"GET / HTTP/1.1\r\n");
    let _ = cursor.write(b"Connection: close\r\n");
    let _ = cursor.write(b"\r\n");
    let _ = cursor.seek(SeekFrom::Start(0));

    let _ = header.insert_header(header::CONTENT_LENGTH, 0);

    let mut session = Session::new_h1(Box::new(cursor));
    assert!(session.read_request().await.unwrap());
    *session.req_header_mut() = header;

    session
}
