// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0
//
// ConfigLoader reads the configuration file once and exposes lazy, cached
// accessors for each top-level section. A missing section yields its
// defaults; a malformed one is an error.

use lazy_static::lazy_static;
use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::debug;

use courier_rpc::SessionConfig;
use courier_tracing::TracingConfiguration;

use crate::client::ClientConfiguration;
use crate::runtime::RuntimeConfiguration;
use crate::server::ServerConfiguration;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration - impossible to parse yaml")]
    InvalidYaml,
    #[error("invalid configuration - key {0} not valid")]
    InvalidKey(String),
    #[error("invalid configuration - section {key}: {source}")]
    InvalidSection {
        key: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
}

lazy_static! {
    static ref CONFIG_KEYS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("tracing");
        s.insert("runtime");
        s.insert("session");
        s.insert("server");
        s.insert("client");
        s
    };
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    root: Mapping,
    tracing: Option<TracingConfiguration>,
    runtime: Option<RuntimeConfiguration>,
    session: Option<SessionConfig>,
    server: Option<ServerConfiguration>,
    client: Option<ClientConfiguration>,
}

impl ConfigLoader {
    pub fn new(file_path: &str) -> Result<Self, ConfigError> {
        let config_str =
            std::fs::read_to_string(file_path).map_err(|e| ConfigError::NotFound(e.to_string()))?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml::from_str(config_str).map_err(|_| ConfigError::InvalidYaml)?;

        // an empty document is an empty configuration
        let root = match root {
            Value::Null => Mapping::new(),
            Value::Mapping(mapping) => mapping,
            _ => return Err(ConfigError::InvalidYaml),
        };

        for key in root.keys() {
            let k = key.as_str().ok_or(ConfigError::InvalidYaml)?;
            if !CONFIG_KEYS.contains(k) {
                return Err(ConfigError::InvalidKey(k.to_string()));
            }
        }

        Ok(Self {
            root,
            ..Self::default()
        })
    }

    /// Loads `file_path` when given, defaults otherwise.
    pub fn load(file_path: Option<&str>) -> Result<Self, ConfigError> {
        match file_path {
            Some(path) => Self::new(path),
            None => Ok(Self::default()),
        }
    }

    pub fn tracing(&mut self) -> Result<&TracingConfiguration, ConfigError> {
        let cfg = match self.tracing.take() {
            Some(cfg) => cfg,
            None => self.section("tracing")?,
        };
        Ok(&*self.tracing.insert(cfg))
    }

    pub fn runtime(&mut self) -> Result<&RuntimeConfiguration, ConfigError> {
        let cfg = match self.runtime.take() {
            Some(cfg) => cfg,
            None => self.section("runtime")?,
        };
        Ok(&*self.runtime.insert(cfg))
    }

    pub fn session(&mut self) -> Result<&SessionConfig, ConfigError> {
        let cfg = match self.session.take() {
            Some(cfg) => cfg,
            None => self.section("session")?,
        };
        Ok(&*self.session.insert(cfg))
    }

    pub fn server(&mut self) -> Result<&ServerConfiguration, ConfigError> {
        let cfg = match self.server.take() {
            Some(cfg) => cfg,
            None => self.section("server")?,
        };
        Ok(&*self.server.insert(cfg))
    }

    pub fn client(&mut self) -> Result<&ClientConfiguration, ConfigError> {
        let cfg = match self.client.take() {
            Some(cfg) => cfg,
            None => self.section("client")?,
        };
        Ok(&*self.client.insert(cfg))
    }

    fn section<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default + std::fmt::Debug,
    {
        let cfg = match self.root.get(key) {
            None | Some(Value::Null) => T::default(),
            Some(value) => serde_yaml::from_value(value.clone())
                .map_err(|source| ConfigError::InvalidSection { key, source })?,
        };
        debug!(section = key, ?cfg, "configuration loaded");
        Ok(cfg)
    }
}
