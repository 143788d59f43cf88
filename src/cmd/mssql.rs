//! # MSSQL module
//!
//! This module provides the `mssql` commands, `dag-config` exports the secrets
//! a distributed availability group needs on the remote cluster

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::Subcommand;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::DynamicObject, Api};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    cmd::{Context, Executor},
    svc::k8s::{client, kind, secret, State},
};

// -----------------------------------------------------------------------------
// Constants

pub const DAG_SECRET_SUFFIXES: [&str; 3] = ["dbm-login", "master-key", "endpoint-cert"];
pub const CONFIG_SUFFIX: &str = "dag-config.yaml";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to retrieve mssql server '{0}/{1}', {2}")]
    Server(String, String, kube::Error),
    #[error("failed to retrieve secret '{0}/{1}', {2}")]
    Secret(String, String, kube::Error),
    #[error("secret '{0}/{1}' not found, is the availability group configured?")]
    MissingSecret(String, String),
    #[error("failed to render yaml, {0}")]
    Yaml(serde_yaml::Error),
    #[error("failed to write '{0}', {1}")]
    Write(PathBuf, std::io::Error),
}

// -----------------------------------------------------------------------------
// Mssql enumeration

#[derive(Subcommand, Clone, Debug)]
pub enum Mssql {
    /// Export the secrets of a distributed availability group
    #[clap(name = "dag-config")]
    DagConfig(DagConfig),
}

#[async_trait]
impl Executor for Mssql {
    type Error = Error;

    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        match self {
            Self::DagConfig(cmd) => cmd.execute(ctx).await,
        }
    }
}

// -----------------------------------------------------------------------------
// DagConfig structure

#[derive(clap::Args, Clone, Debug)]
pub struct DagConfig {
    /// Name of the mssql server
    #[clap(name = "name")]
    pub name: String,
    /// Namespace of the mssql server, default to the one of the kubeconfig context
    #[clap(short = 'n', long = "namespace")]
    pub namespace: Option<String>,
    /// Directory where the configuration is written
    #[clap(long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,
}

#[async_trait]
impl Executor for DagConfig {
    type Error = Error;

    #[tracing::instrument(skip_all, fields(name = %self.name))]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;
        let namespace = state.namespace(&self.namespace);
        let content = self.render(&state, &namespace).await?;

        let path = self.output_dir.join(format!("{}-{}", self.name, CONFIG_SUFFIX));
        tokio::fs::write(&path, content)
            .await
            .map_err(|err| Error::Write(path.to_owned(), err))?;

        info!(path = %path.display(), "Wrote distributed availability group configuration");
        println!(
            "Apply the configuration on the remote cluster before creating its mssql server:"
        );
        println!("  kubectl apply -f {}", path.display());
        Ok(())
    }
}

impl DagConfig {
    /// checks the server exists and renders its secrets
    async fn render(&self, state: &State, namespace: &str) -> Result<String, Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(state.kube.to_owned(), namespace, &kind::mssql_resource());

        debug!(
            kind = "MSSQLServer",
            namespace = namespace,
            name = self.name.as_str(),
            "execute a request to retrieve mssql server"
        );
        api.get(&self.name)
            .await
            .map_err(|err| Error::Server(namespace.to_string(), self.name.to_owned(), err))?;

        let mut output = String::new();
        for (index, suffix) in DAG_SECRET_SUFFIXES.iter().enumerate() {
            let name = format!("{}-{}", self.name, suffix);
            let found = secret::get(state.kube.to_owned(), namespace, &name)
                .await
                .map_err(|err| Error::Secret(namespace.to_string(), name.to_owned(), err))?
                .ok_or_else(|| Error::MissingSecret(namespace.to_string(), name.to_owned()))?;

            if index > 0 {
                output.push_str("---\n");
            }

            output.push_str(&serde_yaml::to_string(&clean(&found)).map_err(Error::Yaml)?);
        }

        Ok(output)
    }
}

// -----------------------------------------------------------------------------
// helpers

/// keeps the fields the remote cluster needs to recreate the secret
pub fn clean(secret: &Secret) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": secret.metadata.name,
            "namespace": secret.metadata.namespace,
        },
        "type": secret.type_,
        "data": secret.data,
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use hyper::Method;

    use super::*;
    use crate::{
        cmd::{Args, Command},
        svc::k8s::mock::{self, Exchange},
    };

    fn parse(args: &[&str]) -> DagConfig {
        let args =
            Args::try_parse_from(["kubectl-dba", "mssql", "dag-config"].iter().chain(args)).unwrap();
        match args.command {
            Some(Command::Mssql(Mssql::DagConfig(cmd))) => cmd,
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn secret(name: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": name,
                "namespace": "demo",
                "uid": "0c1d",
                "resourceVersion": "7",
                "labels": {"app.kubernetes.io/instance": "ms-demo"}
            },
            "type": "Opaque",
            "data": {"password": "c2VjcmV0"}
        })
    }

    #[test]
    fn parses_arguments() {
        let cmd = parse(&["ms-demo", "-n", "demo", "--output-dir", "/tmp"]);

        assert_eq!(cmd.name, "ms-demo");
        assert_eq!(cmd.namespace.as_deref(), Some("demo"));
        assert_eq!(cmd.output_dir, PathBuf::from("/tmp"));
    }

    #[tokio::test]
    async fn exports_availability_group_secrets() {
        let mut exchanges = vec![Exchange::new(
            Method::GET,
            "/apis/kubedb.com/v1alpha2/namespaces/demo/mssqlservers/ms-demo",
            json!({
                "apiVersion": "kubedb.com/v1alpha2",
                "kind": "MSSQLServer",
                "metadata": {"name": "ms-demo", "namespace": "demo"}
            }),
        )];

        for suffix in DAG_SECRET_SUFFIXES {
            let name = format!("ms-demo-{}", suffix);
            exchanges.push(Exchange::new(
                Method::GET,
                &format!("/api/v1/namespaces/demo/secrets/{}", name),
                secret(&name),
            ));
        }

        let (client, server) = mock::client(exchanges);
        let output = parse(&["ms-demo"])
            .render(&mock::state(client), "demo")
            .await
            .unwrap();

        let documents: Vec<&str> = output.split("---\n").collect();
        assert_eq!(documents.len(), 3);
        assert!(documents[0].contains("name: ms-demo-dbm-login"));
        assert!(documents[2].contains("name: ms-demo-endpoint-cert"));
        assert!(documents[1].contains("password: c2VjcmV0"));
        assert!(!output.contains("uid"));
        assert!(!output.contains("labels"));
        assert_eq!(server.await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn fails_on_missing_secret() {
        let (client, server) = mock::client(vec![
            Exchange::new(
                Method::GET,
                "/apis/kubedb.com/v1alpha2/namespaces/demo/mssqlservers/ms-demo",
                json!({
                    "apiVersion": "kubedb.com/v1alpha2",
                    "kind": "MSSQLServer",
                    "metadata": {"name": "ms-demo", "namespace": "demo"}
                }),
            ),
            Exchange::not_found(Method::GET, "/api/v1/namespaces/demo/secrets/ms-demo-dbm-login"),
        ]);

        let err = parse(&["ms-demo"])
            .render(&mock::state(client), "demo")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingSecret(_, name) if name == "ms-demo-dbm-login"));
        assert_eq!(server.await.unwrap().len(), 2);
    }
}
