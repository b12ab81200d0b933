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

//! Data structures required for `AuthorityHandler` configuration

use clap::Parser;
use serde::Deserialize;

/// Command line options of the authority module
#[derive(Debug, Default, Parser)]
pub struct AuthorityOpt {
    /// Host name or IP address of the authority resolving requests to file system paths.
    #[clap(long)]
    pub authority_host: Option<String>,

    /// Port of the authority resolving requests to file system paths.
    #[clap(long)]
    pub authority_port: Option<u32>,

    /// Number of seconds to wait for the authority’s response.
    #[clap(long)]
    pub authority_timeout: Option<u64>,
}

/// Configuration file settings of the authority module
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthorityConf {
    /// Host name or IP address of the authority.
    pub authority_host: String,

    /// Port of the authority. This setting is required, values outside the range 1 to 65535 are
    /// rejected when creating the handler.
    pub authority_port: u32,

    /// Number of seconds to wait for the authority’s response, 0 means the default of ten
    /// seconds.
    pub authority_timeout: u64,
}

impl AuthorityConf {
    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: AuthorityOpt) {
        if let Some(authority_host) = opt.authority_host {
            self.authority_host = authority_host;
        }

        if let Some(authority_port) = opt.authority_port {
            self.authority_port = authority_port;
        }

        if let Some(authority_timeout) = opt.authority_timeout {
            self.authority_timeout = authority_timeout;
        }
    }
}

impl Default for AuthorityConf {
    fn default() -> Self {
        Self {
            authority_host: "127.0.0.1".to_owned(),
            authority_port: 0,
            authority_timeout: 10,
        }
    }
}
