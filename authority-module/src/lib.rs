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

//! # Authority Module for Pingora
//!
//! The directory server doesn’t decide on its own which file a request maps to or whether the
//! client may see it. For each request it asks an authority process instead, by sending a
//! `GET` request with the same path and query string to the configured authority address.
//!
//! If the authority responds with `200 OK`, the response body is expected to be a JSON object
//! with an `instance_path` field, the file system path to serve. Any other response is passed
//! on to the client as is, with the exception of the headers related to message framing.
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use authority_module::{AuthorityConf, AuthorityHandler};
//! use module_utils::pingora::{Error, SessionWrapper};
//! use module_utils::{RequestFilter, RequestFilterResult};
//!
//! #[derive(Debug)]
//! struct Handler {
//!     authority: AuthorityHandler,
//! }
//!
//! #[async_trait]
//! impl RequestFilter for Handler {
//!     type Conf = AuthorityConf;
//!     type CTX = ();
//!     fn new_ctx() -> Self::CTX {}
//!
//!     async fn request_filter(
//!         &self,
//!         session: &mut impl SessionWrapper,
//!         _ctx: &mut Self::CTX,
//!     ) -> Result<RequestFilterResult, Box<Error>> {
//!         let Some(path) = self.authority.lookup(session).await? else {
//!             // Authority denied the request or failed, response has been sent already
//!             return Ok(RequestFilterResult::ResponseSent);
//!         };
//!
//!         // Serve `path` here
//!         Ok(RequestFilterResult::Unhandled)
//!     }
//! }
//! ```
//!
//! ## Configuration settings
//!
//! | Setting             | Command line         | Default     | Meaning |
//! |---------------------|----------------------|-------------|---------|
//! | `authority_host`    | `--authority-host`   | `127.0.0.1` | Host name or IP address of the authority |
//! | `authority_port`    | `--authority-port`   |             | Port of the authority, required |
//! | `authority_timeout` | `--authority-timeout`| 10          | Seconds to wait for the authority’s response |

mod configuration;
mod handler;
pub mod testing;
#[cfg(test)]
mod tests;

pub use configuration::{AuthorityConf, AuthorityOpt};
pub use handler::AuthorityHandler;
