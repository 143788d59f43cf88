//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration

use std::{convert::TryFrom, path::PathBuf};

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// -----------------------------------------------------------------------------
// Constants

pub const OPERATOR_NAMESPACE: &str = "kubedb";
pub const OPERATOR_NAME: &str = "kubedb-operator";
pub const OPERATOR_PORT: u16 = 8443;
pub const OPERATOR_SELECTOR: &str = "app.kubernetes.io/name=kubedb";
pub const OPERATOR_IMAGE: &str = "kubedb/operator";
pub const OPERATOR_VERSION: &str = "v0.40.0";
pub const PROMETHEUS_NAME: &str = "prometheus-operated";
pub const PROMETHEUS_NAMESPACE: &str = "monitoring";
pub const PROMETHEUS_PORT: u16 = 9090;
pub const DASHBOARD_BRANCH: &str = "master";

// -----------------------------------------------------------------------------
// Operator structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Operator {
    #[serde(rename = "namespace")]
    pub namespace: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "port")]
    pub port: u16,
    #[serde(rename = "selector")]
    pub selector: String,
    #[serde(rename = "image")]
    pub image: String,
    #[serde(rename = "version")]
    pub version: String,
}

// -----------------------------------------------------------------------------
// Prometheus structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Prometheus {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "namespace")]
    pub namespace: String,
    #[serde(rename = "port")]
    pub port: u16,
    #[serde(rename = "dashboard_branch")]
    pub dashboard_branch: String,
}

// -----------------------------------------------------------------------------
// Editor structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Editor {
    #[serde(rename = "command", default)]
    pub command: Option<String>,
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to build configuration, {0}")]
    Build(ConfigError),
    #[error("failed to load configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "operator")]
    pub operator: Operator,
    #[serde(rename = "prometheus")]
    pub prometheus: Prometheus,
    #[serde(rename = "editor", default)]
    pub editor: Editor,
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        defaults(Config::builder())?
            .add_source(environment())
            .add_source(File::from(path).required(true))
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Cast)
    }
}

impl Configuration {
    pub fn try_default() -> Result<Self, Error> {
        let mut builder = defaults(Config::builder())?;

        let mut paths = vec![PathBuf::from(format!(
            "/etc/{}/config",
            env!("CARGO_PKG_NAME")
        ))];

        match std::env::var("HOME") {
            Ok(home) => paths.push(PathBuf::from(format!(
                "{}/.config/{}/config",
                home,
                env!("CARGO_PKG_NAME")
            ))),
            Err(err) => warn!(
                error = err.to_string(),
                "could not resolve home directory, skip user configuration"
            ),
        }

        paths.push(PathBuf::from("config"));
        for path in paths {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder
            .add_source(environment())
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Cast)
    }

    pub fn help(&self) {
        info!(
            namespace = &self.operator.namespace,
            selector = &self.operator.selector,
            port = self.operator.port,
            "Operator is looked up using this configuration"
        );
        info!(
            name = &self.prometheus.name,
            namespace = &self.prometheus.namespace,
            port = self.prometheus.port,
            "Prometheus is reached through this service"
        );
    }
}

// -----------------------------------------------------------------------------
// helpers

fn environment() -> Environment {
    Environment::with_prefix(&env!("CARGO_PKG_NAME").replace('-', "_").to_uppercase())
        .prefix_separator("_")
        .separator("__")
}

fn defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, Error> {
    let values: [(&str, config::Value); 10] = [
        ("operator.namespace", OPERATOR_NAMESPACE.into()),
        ("operator.name", OPERATOR_NAME.into()),
        ("operator.port", i64::from(OPERATOR_PORT).into()),
        ("operator.selector", OPERATOR_SELECTOR.into()),
        ("operator.image", OPERATOR_IMAGE.into()),
        ("operator.version", OPERATOR_VERSION.into()),
        ("prometheus.name", PROMETHEUS_NAME.into()),
        ("prometheus.namespace", PROMETHEUS_NAMESPACE.into()),
        ("prometheus.port", i64::from(PROMETHEUS_PORT).into()),
        ("prometheus.dashboard_branch", DASHBOARD_BRANCH.into()),
    ];

    values
        .into_iter()
        .try_fold(builder, |builder, (key, value)| {
            builder
                .set_default(key, value)
                .map_err(|err| Error::Default(key.to_string(), err))
        })
}
