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

//! Data structures required for `TailHandler` configuration

use clap::Parser;
use serde::Deserialize;
use std::time::Duration;

use crate::streamer::TailSettings;

const DEFAULT_STREAMING_TIMEOUT: u64 = 60;

/// Command line options of the tail module
#[derive(Debug, Default, Parser)]
pub struct TailOpt {
    /// Number of seconds without new data after which a tailing connection is closed.
    #[clap(long)]
    pub streaming_timeout: Option<u64>,

    /// Number of milliseconds between transmissions of tailed data.
    #[clap(long)]
    pub flush_interval: Option<u64>,

    /// Poll the file system with this interval (in milliseconds) instead of relying on native
    /// change notifications.
    #[clap(long)]
    pub poll_interval: Option<u64>,
}

/// Configuration file settings of the tail module
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TailConf {
    /// Number of seconds without new data after which a tailing connection is closed, 0 means
    /// the default of one minute.
    pub streaming_timeout: u64,

    /// Number of milliseconds between transmissions of tailed data.
    pub flush_interval: u64,

    /// Amount of unsent data (in bytes) that is transmitted without waiting for the next flush.
    /// The file is not read any further while the client hasn't accepted this data.
    pub max_buffered: usize,

    /// If set, the file system is polled with this interval (in milliseconds) instead of relying
    /// on native change notifications.
    pub poll_interval: Option<u64>,
}

impl TailConf {
    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: TailOpt) {
        if let Some(streaming_timeout) = opt.streaming_timeout {
            self.streaming_timeout = streaming_timeout;
        }

        if let Some(flush_interval) = opt.flush_interval {
            self.flush_interval = flush_interval;
        }

        if opt.poll_interval.is_some() {
            self.poll_interval = opt.poll_interval;
        }
    }

    /// Converts configuration values into the settings of a tail session.
    pub fn settings(&self) -> TailSettings {
        let streaming_timeout = if self.streaming_timeout == 0 {
            DEFAULT_STREAMING_TIMEOUT
        } else {
            self.streaming_timeout
        };

        TailSettings {
            idle_timeout: Duration::from_secs(streaming_timeout),
            flush_interval: Duration::from_millis(self.flush_interval),
            max_buffered: self.max_buffered,
            poll_interval: self.poll_interval.map(Duration::from_millis),
        }
    }
}

impl Default for TailConf {
    fn default() -> Self {
        let settings = TailSettings::default();
        Self {
            streaming_timeout: DEFAULT_STREAMING_TIMEOUT,
            flush_interval: 50,
            max_buffered: settings.max_buffered,
            poll_interval: None,
        }
    }
}
