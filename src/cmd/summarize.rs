//! # Summarize module
//!
//! This module provides the `summarize` command which exports the report the
//! operator computes for a database

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::{
    cmd::{Context, Database, Executor},
    svc::{
        http::{self, RestClient},
        k8s::{
            client, resource,
            tunnel::{self, Target, Tunnel},
            State,
        },
    },
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to retrieve database, {0}")]
    Resource(resource::Error),
    #[error("failed to find operator pod, {0}")]
    Pod(tunnel::Error),
    #[error("operator pod not found in namespace '{0}' with selector '{1}'")]
    NoOperator(String, String),
    #[error("failed to open tunnel to the operator, {0}")]
    Tunnel(tunnel::Error),
    #[error("failed to retrieve report, {0}")]
    Report(http::Error),
    #[error("failed to serialize report, {0}")]
    Serialize(serde_json::Error),
    #[error("failed to write '{0:?}', {1}")]
    Write(PathBuf, std::io::Error),
}

// -----------------------------------------------------------------------------
// Summarize structure

#[derive(clap::Args, Clone, Debug)]
pub struct Summarize {
    #[clap(flatten)]
    pub database: Database,
    /// Namespace of the kubedb operator
    #[clap(long = "operator-namespace")]
    pub operator_namespace: Option<String>,
    /// Index of the report, the operator returns the whole report by default
    #[clap(long = "index")]
    pub index: Option<String>,
    /// Directory the report is written to
    #[clap(short = 'o', long = "output", default_value = ".")]
    pub output: PathBuf,
}

#[derive(Serialize, PartialEq, Eq, Clone, Debug)]
struct Query {
    #[serde(rename = "index")]
    index: String,
}

#[async_trait]
impl Executor for Summarize {
    type Error = Error;

    #[tracing::instrument(skip_all, fields(name = %self.database.name))]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;
        let info = self.database.get(&state).await.map_err(Error::Resource)?;

        let tunnel = operator_tunnel(&state, &self.operator_namespace).await?;
        let endpoint = format!(
            "http://{}{}",
            tunnel.address(),
            report_path(info.kind.plural(), &info.namespace(), &info.name())
        );

        let client = http::Client::default();
        let report: Value = match &self.index {
            Some(index) => client.get_with(&endpoint, &Query { index: index.to_owned() }).await,
            None => client.get(&endpoint).await,
        }
        .map_err(Error::Report)?;

        tunnel.close();

        let path = write(&self.output, "report", &report, Utc::now()).await?;
        println!(
            "Summary report for {} {}/{} has been stored in '{}'",
            info.kind,
            info.namespace(),
            info.name(),
            path.display()
        );
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// helpers

/// opens a tunnel to the first running operator pod
pub async fn operator_tunnel(state: &State, namespace: &Option<String>) -> Result<Tunnel, Error> {
    let operator = &state.config.operator;
    let namespace = namespace
        .to_owned()
        .unwrap_or_else(|| operator.namespace.to_owned());

    let pod = tunnel::running_pod(state.kube.to_owned(), &namespace, &operator.selector)
        .await
        .map_err(Error::Pod)?
        .ok_or_else(|| Error::NoOperator(namespace.to_owned(), operator.selector.to_owned()))?;

    let name = pod.metadata.name.unwrap_or_default();
    info!(namespace = &namespace, pod = &name, "Found operator pod");

    Tunnel::open(state.kube.to_owned(), &namespace, Target::Pod(name), operator.port)
        .await
        .map_err(Error::Tunnel)
}

/// returns the path of the report of a database on the operator
pub fn report_path(plural: &str, namespace: &str, name: &str) -> String {
    format!(
        "/kubedb.com/v1/namespaces/{}/{}/{}/report",
        namespace, plural, name
    )
}

/// returns `<directory>/<prefix>-<YYYYMMDD-HHMMSS>.json`
pub fn timestamped(directory: &Path, prefix: &str, now: DateTime<Utc>) -> PathBuf {
    directory.join(format!("{}-{}.json", prefix, now.format("%Y%m%d-%H%M%S")))
}

/// writes the value as pretty json in a timestamped file of the directory
pub async fn write(
    directory: &Path,
    prefix: &str,
    value: &Value,
    now: DateTime<Utc>,
) -> Result<PathBuf, Error> {
    let path = timestamped(directory, prefix, now);
    let content = serde_json::to_vec_pretty(value).map_err(Error::Serialize)?;

    tokio::fs::create_dir_all(directory)
        .await
        .map_err(|err| Error::Write(directory.to_owned(), err))?;

    tokio::fs::write(&path, content)
        .await
        .map_err(|err| Error::Write(path.to_owned(), err))?;

    Ok(path)
}
