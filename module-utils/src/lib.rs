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

//! # Module helpers
//!
//! This crate contains the plumbing shared by the directory server modules: the
//! [`RequestFilter`] trait implemented by all handlers, YAML configuration loading and a few
//! re-exports from Pingora so that modules don’t need to depend on it directly.

pub mod pingora;
pub mod standard_response;

use async_trait::async_trait;
use log::trace;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::fmt::Debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::pingora::{Error, ErrorType, SessionWrapper};

/// Request filter result indicating how the current request should be processed further
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RequestFilterResult {
    /// Response has been sent, no further processing should happen. Other Pingora phases should
    /// not be triggered.
    ResponseSent,

    /// Request has been handled and further request filters should not run. Response hasn’t been
    /// sent however, next Pingora phase should deal with that.
    Handled,

    /// Request filter could not handle this request, next request filter should run if it exists.
    #[default]
    Unhandled,
}

/// Trait to be implemented by request filters.
#[async_trait]
pub trait RequestFilter: Sized {
    /// Configuration type of this handler.
    type Conf;

    /// Per-request state of this handler, see [`pingora::proxy::ProxyHttp::CTX`]
    type CTX;

    /// Creates a new instance of the handler from its configuration.
    fn new(conf: Self::Conf) -> Result<Self, Box<Error>>
    where
        Self::Conf: TryInto<Self, Error = Box<Error>>,
    {
        conf.try_into()
    }

    /// Creates a new state object, see [`pingora::proxy::ProxyHttp::new_ctx`]
    fn new_ctx() -> Self::CTX;

    /// Handler to run during Pingora’s `request_filter` state, see
    /// [`pingora::proxy::ProxyHttp::request_filter`]. This uses a different return type to
    /// account for the existence of multiple request filters.
    async fn request_filter(
        &self,
        session: &mut impl SessionWrapper,
        ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>>;
}

/// Trait for configuration structures that can be loaded from YAML files. This trait has a blanket
/// implementation for any structure implementing [`serde::Deserialize`] and [`Default`].
pub trait FromYaml {
    /// Loads configuration from a YAML string.
    fn from_yaml<S>(yaml: S) -> Result<Self, Box<Error>>
    where
        S: AsRef<str>,
        Self: Sized;

    /// Loads configuration from a YAML file.
    fn load_from_yaml<P>(path: P) -> Result<Self, Box<Error>>
    where
        P: AsRef<Path>,
        Self: Sized;

    /// Loads configuration from a list of YAML files. Settings from files later in the list
    /// override the ones from earlier files, nested maps are merged key by key. An empty list
    /// produces the default configuration.
    fn load_from_files<P>(files: &[P]) -> Result<Self, Box<Error>>
    where
        P: AsRef<Path>,
        Self: Sized;
}

impl<D> FromYaml for D
where
    D: DeserializeOwned + Debug + Default,
{
    fn from_yaml<S: AsRef<str>>(yaml: S) -> Result<Self, Box<Error>> {
        let value = serde_yaml::from_str(yaml.as_ref()).map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                "failed parsing configuration",
                err,
            )
        })?;
        from_value(value)
    }

    fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<Error>> {
        from_value(read_yaml(path.as_ref())?)
    }

    fn load_from_files<P: AsRef<Path>>(files: &[P]) -> Result<Self, Box<Error>> {
        let mut merged = Value::Null;
        for path in files {
            merge_values(&mut merged, read_yaml(path.as_ref())?);
        }
        from_value(merged)
    }
}

fn read_yaml(path: &Path) -> Result<Value, Box<Error>> {
    let file = File::open(path).map_err(|err| {
        Error::because(
            ErrorType::FileOpenError,
            format!("failed opening configuration file {path:?}"),
            err,
        )
    })?;
    let reader = BufReader::new(file);

    serde_yaml::from_reader(reader).map_err(|err| {
        Error::because(
            ErrorType::FileReadError,
            format!("failed reading configuration file {path:?}"),
            err,
        )
    })
}

fn from_value<D>(value: Value) -> Result<D, Box<Error>>
where
    D: DeserializeOwned + Debug + Default,
{
    if value.is_null() {
        return Ok(D::default());
    }

    let conf = serde_yaml::from_value(value).map_err(|err| {
        Error::because(
            ErrorType::FileReadError,
            "failed interpreting configuration",
            err,
        )
    })?;
    trace!("Loaded configuration: {conf:#?}");

    Ok(conf)
}

/// Merges `source` into `target`. Mappings are merged recursively, any other value in `source`
/// replaces the one in `target`. A null `source` (e.g. an empty file) leaves `target` unchanged.
fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (_, Value::Null) => {}
        (Value::Mapping(target), Value::Mapping(source)) => {
            for (key, value) in source {
                if let Some(existing) = target.get_mut(&key) {
                    merge_values(existing, value);
                } else {
                    target.insert(key, value);
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// This macro merges multiple structures implementing [`serde::Deserialize`] and [`Default`] into
/// a structure containing all of them.
///
/// The structure of the expected configuration file is flattened, so that the configuration
/// settings from each component are still expected to be found on the top level.
///
/// ```rust
/// use module_utils::{merge_conf, FromYaml};
/// use serde::Deserialize;
///
/// #[derive(Debug, Default, Deserialize)]
/// #[serde(default)]
/// struct ListenConf {
///     listen: Vec<String>,
/// }
///
/// #[derive(Debug, Default, Deserialize)]
/// #[serde(default)]
/// struct TimeoutConf {
///     streaming_timeout: u64,
/// }
///
/// merge_conf! {
///     struct Conf {
///         listen: ListenConf,
///         timeout: TimeoutConf,
///     }
/// }
///
/// let conf = Conf::from_yaml("listen: [127.0.0.1:8080]\nstreaming_timeout: 5").unwrap();
/// assert_eq!(conf.listen.listen, vec!["127.0.0.1:8080".to_owned()]);
/// assert_eq!(conf.timeout.streaming_timeout, 5);
/// ```
#[macro_export]
macro_rules! merge_conf {
    (
        $(#[$struct_attr:meta])*
        $struct_vis:vis struct $struct_name:ident {
            $(
                $(#[$field_attr:meta])*
                $field_vis:vis $field_name:ident: $field_type:ty,
            )*
        }
    ) => {
        $(#[$struct_attr])*
        #[derive(::std::fmt::Debug, ::std::default::Default, ::serde::Deserialize)]
        #[serde(default)]
        $struct_vis struct $struct_name {
            $(
                #[serde(flatten)]
                $(#[$field_attr])*
                $field_vis $field_name: $field_type,
            )*
        }
    }
}
