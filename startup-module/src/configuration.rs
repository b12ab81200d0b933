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

use clap::Parser;
use log::LevelFilter;
use module_utils::pingora::{
    http_proxy_service, Error, ErrorType, ProxyHttp, Server, ServerConf, ServerOpt,
};
use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;

/// Run a directory server
#[derive(Debug, Default, Parser)]
pub struct StartupOpt {
    /// Address and port to listen on, e.g. "127.0.0.1:8080". This command line flag can be
    /// specified multiple times.
    #[clap(short, long)]
    pub listen: Option<Vec<String>>,
    /// Use this flag to make the server run in the background.
    #[clap(short, long)]
    pub daemon: bool,
    /// Test the configuration and exit. This is useful to validate the configuration before
    /// restarting the process.
    #[clap(short, long)]
    pub test: bool,
    /// The path to the configuration file. This command line flag can be specified multiple times.
    #[clap(short, long)]
    pub conf: Option<Vec<String>>,
    /// Minimal level of log messages to be written, e.g. "debug". The RUST_LOG environment
    /// variable takes precedence over this setting.
    #[clap(long)]
    pub log_level: Option<String>,
}

/// Configuration settings of the startup module
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartupConf {
    /// List of address/port combinations to listen on, e.g. "127.0.0.1:8080".
    pub listen: Vec<String>,
    /// Number of worker threads, Pingora's default is used if omitted.
    pub threads: Option<usize>,
    /// Location of the PID file when running in the background.
    pub pid_file: Option<String>,
    /// Minimal level of log messages to be written, `info` by default.
    pub log_level: Option<String>,
    /// File to append log messages to instead of writing them to stderr.
    pub log_file: Option<PathBuf>,
}

impl StartupConf {
    /// Merges the command line options into the configuration.
    ///
    /// Listening addresses and log level given on the command line replace the ones from the
    /// configuration files.
    pub fn merge_with_opt(&mut self, opt: &StartupOpt) {
        if let Some(listen) = &opt.listen {
            self.listen = listen.clone();
        }

        if opt.log_level.is_some() {
            self.log_level = opt.log_level.clone();
        }
    }

    fn log_filter(&self) -> Result<LevelFilter, Box<Error>> {
        match &self.log_level {
            Some(level) => LevelFilter::from_str(level).map_err(|err| {
                Error::because(
                    ErrorType::InternalError,
                    format!("invalid log level {level:?}"),
                    err,
                )
            }),
            None => Ok(LevelFilter::Info),
        }
    }

    /// Sets up the global logger according to the configuration.
    ///
    /// This should be called once, before the server is started.
    pub fn init_logging(&self) -> Result<(), Box<Error>> {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.log_filter()?);
        builder.parse_default_env();

        if let Some(path) = &self.log_file {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    Error::because(
                        ErrorType::FileOpenError,
                        format!("failed opening log file {}", path.display()),
                        err,
                    )
                })?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        builder.try_init().map_err(|err| {
            Error::because(ErrorType::InternalError, "failed initializing logger", err)
        })
    }

    /// Sets up a server with the given configuration and command line options
    pub fn into_server<SV>(self, app: SV, opt: Option<StartupOpt>) -> Server
    where
        SV: ProxyHttp + Send + Sync + 'static,
        <SV as ProxyHttp>::CTX: Send + Sync,
    {
        let opt = opt.unwrap_or_default();

        let mut listen = opt.listen.unwrap_or(self.listen);
        if listen.is_empty() {
            // Make certain we have a listening address
            listen.push("127.0.0.1:8080".to_owned());
            listen.push("[::1]:8080".to_owned());
        }

        let mut conf = ServerConf::default();
        if let Some(threads) = self.threads {
            conf.threads = threads;
        }
        if let Some(pid_file) = self.pid_file {
            conf.pid_file = pid_file;
        }

        let mut server = Server::new_with_opt_and_conf(
            ServerOpt {
                daemon: opt.daemon,
                test: opt.test,
                upgrade: false,
                nocapture: false,
                conf: None,
            },
            conf,
        );
        server.bootstrap();

        let mut proxy = http_proxy_service(&server.configuration, app);
        for addr in listen {
            proxy.add_tcp(&addr);
        }
        server.add_service(proxy);

        server
    }
}
