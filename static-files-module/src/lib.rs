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

//! # Static Files Module for Pingora
//!
//! This crate serves files and directory listings for the directory server. The file system
//! path to be served is determined by the caller, typically after consulting the authority.
//!
//! ## Supported functionality
//!
//! * `GET` and `HEAD` requests
//! * Conditional requests via `If-Modified-Since`, `If-Unmodified-Since`, `If-Match` and
//!   `If-None-Match` HTTP headers
//! * Byte range requests via `Range` and `If-Range` HTTP headers, see [`ByteRange`] for the
//!   accepted syntax
//! * Plain text directory listings with human-readable file sizes
//!
//! ## Known limitations
//!
//! * Requests with multiple satisfiable byte ranges are not supported and will result in the
//!   full file being returned. The complexity required for implementing this feature isn’t worth
//!   this rare use case.
//! * Zero-copy data transfer (a.k.a. sendfile) cannot currently be supported within the Pingora
//!   framework.

mod file_writer;
mod handler;
mod listing;
pub mod metadata;
pub mod range;


pub use handler::serve_file;
pub use listing::{format_size, list_directory, render_listing};
pub use range::{ByteRange, RangeError};
