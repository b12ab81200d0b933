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

#![doc = include_str!("../README.md")]

mod handler;

use authority_module::AuthorityOpt;
use clap::Parser;
use log::error;
use module_utils::{merge_conf, FromYaml};
use startup_module::{DefaultApp, StartupConf, StartupOpt};
use tail_module::TailOpt;

use crate::handler::{DirectoryHandler, HandlerConf};

/// Run a directory server
#[derive(Debug, Parser)]
struct Opt {
    #[clap(flatten)]
    startup: StartupOpt,
    #[clap(flatten)]
    authority: AuthorityOpt,
    #[clap(flatten)]
    tail: TailOpt,
}

merge_conf! {
    /// The configuration of the directory server
    struct Conf {
        startup: StartupConf,
        handler: HandlerConf,
    }
}

fn main() {
    let opt = Opt::parse();

    let mut conf = match Conf::load_from_files(opt.startup.conf.as_deref().unwrap_or(&[])) {
        Ok(conf) => conf,
        Err(err) => {
            // Logging cannot be configured without the configuration, fall back to defaults
            let _ = StartupConf::default().init_logging();
            error!("{err}");
            return;
        }
    };

    conf.startup.merge_with_opt(&opt.startup);
    conf.handler.authority.merge_with_opt(opt.authority);
    conf.handler.tail.merge_with_opt(opt.tail);

    if let Err(err) = conf.startup.init_logging() {
        eprintln!("{err}");
        return;
    }

    let app = match DefaultApp::<DirectoryHandler>::from_conf(conf.handler) {
        Ok(app) => app,
        Err(err) => {
            error!("{err}");
            return;
        }
    };

    conf.startup
        .into_server(app, Some(opt.startup))
        .run_forever();
}
