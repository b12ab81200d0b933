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

//! # Tail Module for Pingora
//!
//! This crate streams files to the client while they are being written, similar to `tail -f`.
//! Data already present after the start offset is sent immediately, data appended later is
//! sent as it arrives using chunked transfer encoding. Changes are detected via file system
//! notifications, both for the file itself and for its directory.
//!
//! A tail session ends normally when the file is renamed or removed, the client then sees a
//! complete response. If no new data arrives within the streaming timeout, the connection is
//! dropped without completing the response instead, so that clients can distinguish a source
//! that went away from a server that stopped waiting.
//!
//! Written data is sent to the client on a fixed cadence, see [`PacedWriter`].
//!
//! ## Configuration settings
//!
//! | Setting             | Command line        | Default | Meaning |
//! |---------------------|---------------------|---------|---------|
//! | `streaming_timeout` | `--streaming-timeout` | 60    | Idle timeout in seconds, 0 means default |
//! | `flush_interval`    | `--flush-interval`  | 50      | Milliseconds between transmissions |
//! | `max_buffered`      |                     | 65536   | Unsent bytes that trigger an early transmission |
//! | `poll_interval`     | `--poll-interval`   | none    | Poll the file system instead of native notifications (milliseconds) |

mod configuration;
mod handler;
mod offset;
mod paced_writer;
mod streamer;
#[cfg(test)]
mod tests;
mod watcher;

pub use configuration::{TailConf, TailOpt};
pub use handler::TailHandler;
pub use offset::{parse_tail_query, InvalidOffset, TailRequest};
pub use paced_writer::{FlushSink, PacedWriter};
pub use streamer::{TailOutput, TailSession, TailSettings, Termination};
pub use watcher::{FileWatcher, NotifyWatcher, WatchEvent};
