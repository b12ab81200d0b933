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

//! # Startup module
//!
//! This crate takes care of the process-level concerns of the directory server: listening
//! addresses, logging setup and creating a Pingora server from the configuration. It also
//! provides [`DefaultApp`], a Pingora app delegating all request processing to a
//! [`RequestFilter`] implementation, and test helpers to run requests through it.

mod configuration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
pub use configuration::{StartupConf, StartupOpt};
use http::Extensions;
use log::{debug, info};
use module_utils::pingora::{
    Error, ErrorSource, ErrorType, HttpPeer, ProxyHttp, ResponseHeader, Session, SessionWrapper,
};
use module_utils::{RequestFilter, RequestFilterResult};
use std::borrow::Cow;
use std::fmt::Debug;
use std::ops::{Deref, DerefMut};

struct NoDebug<T> {
    inner: T,
}

impl<T> Debug for NoDebug<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("skipped").finish()
    }
}

impl<T> From<T> for NoDebug<T> {
    fn from(value: T) -> Self {
        Self { inner: value }
    }
}

impl<T> Deref for NoDebug<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> DerefMut for NoDebug<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Result of a test execution of the app
#[derive(Debug)]
pub struct AppResult {
    session: NoDebug<Session>,
    err: Option<Box<Error>>,
    extensions: Extensions,
    body: BytesMut,
}

impl AppResult {
    fn new(
        session: Session,
        err: Option<Box<Error>>,
        extensions: Extensions,
        body: BytesMut,
    ) -> Self {
        Self {
            session: session.into(),
            err,
            extensions,
            body,
        }
    }

    /// Produces the resulting session state of the request
    pub fn session(&mut self) -> impl SessionWrapper + '_ {
        SessionWrapperImpl::new(&mut self.session, &mut self.extensions, false)
    }

    /// Retrieves the error if any
    pub fn err(&self) -> &Option<Box<Error>> {
        &self.err
    }

    /// Retrieves the response body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Retrieves the response body as string
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// A basic Pingora app implementation, to be passed to [`StartupConf::into_server`]
///
/// This app will only handle the `request_filter` and `logging` phases. Request processing is
/// delegated to the [`RequestFilter`] implementation, requests it leaves unhandled result in a
/// `404 Not Found` response.
#[derive(Debug)]
pub struct DefaultApp<H> {
    handler: H,
    capture_body: bool,
}

impl<H> DefaultApp<H> {
    /// Creates a new app from a [`RequestFilter`] instance.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            capture_body: false,
        }
    }

    /// Creates a new app from a [`RequestFilter`] configuration.
    ///
    /// Any errors occurring when converting configuration to handler will be passed on.
    pub fn from_conf<C>(conf: C) -> Result<Self, Box<Error>>
    where
        H: RequestFilter<Conf = C> + TryFrom<C, Error = Box<Error>>,
    {
        Ok(Self::new(conf.try_into()?))
    }

    /// Provides read-only access to the handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Handles all request phases for a request like Pingora would do it.
    ///
    /// This method is meant for testing. The response body is captured rather than written to
    /// the session, it can be retrieved via [`AppResult::body`]. A request not handled by the
    /// handler results in a `HTTPStatus(404)` error.
    pub async fn handle_request(&mut self, mut session: Session) -> AppResult
    where
        H: RequestFilter + Sync,
        H::CTX: Send + Sync,
    {
        self.capture_body = true;

        let mut ctx = self.new_ctx();
        let result = match self.request_filter(&mut session, &mut ctx).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::new(ErrorType::HTTPStatus(404))),
            Err(err) => Err(err),
        };

        self.logging(
            &mut session,
            result.as_ref().err().map(|err| err.as_ref()),
            &mut ctx,
        )
        .await;

        self.capture_body = false;

        let body = ctx.extensions.remove::<BytesMut>().unwrap_or_default();

        AppResult::new(session, result.err(), ctx.extensions, body)
    }
}

/// Context for the default app
#[derive(Debug, Clone)]
pub struct DefaultCtx<C> {
    extensions: Extensions,
    handler: C,
}

#[async_trait]
impl<H> ProxyHttp for DefaultApp<H>
where
    H: RequestFilter + Sync,
    H::CTX: Send,
{
    type CTX = DefaultCtx<<H as RequestFilter>::CTX>;

    fn new_ctx(&self) -> Self::CTX {
        Self::CTX {
            extensions: Extensions::new(),
            handler: H::new_ctx(),
        }
    }

    async fn request_filter(
        &self,
        session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<bool, Box<Error>> {
        let mut session = SessionWrapperImpl::new(session, &mut ctx.extensions, self.capture_body);
        Ok(self
            .handler
            .request_filter(&mut session, &mut ctx.handler)
            .await?
            == RequestFilterResult::ResponseSent)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>, Box<Error>> {
        Err(Error::new(ErrorType::HTTPStatus(404)))
    }

    fn suppress_error_log(&self, _session: &Session, _ctx: &Self::CTX, error: &Error) -> bool {
        // Clients going away are routine, `logging` reports these at debug level
        error.esource() == &ErrorSource::Downstream
            && matches!(
                error.etype(),
                ErrorType::ConnectionClosed | ErrorType::WriteError
            )
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, _ctx: &mut Self::CTX) {
        let status = session
            .response_written()
            .map_or(0, |response| response.status.as_u16());
        let request = session.req_header();
        if let Some(err) = e {
            debug!(
                "{} {} {status}, request ended with: {err}",
                request.method, request.uri
            );
        } else {
            info!("{} {} {status}", request.method, request.uri);
        }
    }
}

struct SessionWrapperImpl<'a> {
    inner: &'a mut Session,
    extensions: &'a mut Extensions,
    capture_body: bool,
}

impl<'a> SessionWrapperImpl<'a> {
    /// Creates a new session wrapper for the given Pingora session.
    fn new(inner: &'a mut Session, extensions: &'a mut Extensions, capture_body: bool) -> Self {
        Self {
            inner,
            extensions,
            capture_body,
        }
    }
}

#[async_trait]
impl SessionWrapper for SessionWrapperImpl<'_> {
    fn extensions(&self) -> &Extensions {
        self.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        self.extensions
    }

    async fn write_response_body(
        &mut self,
        data: Option<Bytes>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        if self.capture_body {
            if let Some(data) = data {
                self.extensions_mut()
                    .get_or_insert_default::<BytesMut>()
                    .extend_from_slice(&data);
            }
            Ok(())
        } else {
            self.deref_mut()
                .write_response_body(data, end_of_stream)
                .await
        }
    }
}

impl Deref for SessionWrapperImpl<'_> {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl DerefMut for SessionWrapperImpl<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner
    }
}
