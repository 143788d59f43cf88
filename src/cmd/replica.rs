//! # Replica module
//!
//! This module provides the `remote-config` command which prepares a postgres
//! or a mysql database to be replicated from another cluster and writes the
//! objects that cluster needs

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::{
    cmd::{connect, Context, Database, Executor},
    svc::{
        database::{
            replica::{self, REMOTE_AUTH_SUFFIX},
            restarter,
        },
        k8s::{client, resource::Info, State},
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const CONFIG_SUFFIX: &str = "remote-config.yaml";
pub const DEFAULT_CERTIFICATE_TIMEOUT: u64 = 120;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("{0}")]
    Connect(connect::Error),
    #[error("{0}")]
    Ready(restarter::Error),
    #[error("{0}")]
    Replica(replica::Error),
    #[error("a password is required for user '{0}'")]
    MissingPassword(String),
    #[error("failed to read answer, {0}")]
    Prompt(std::io::Error),
    #[error("aborted by user")]
    Aborted,
    #[error("failed to write '{0}', {1}")]
    Write(PathBuf, std::io::Error),
}

impl From<replica::Error> for Error {
    fn from(err: replica::Error) -> Self {
        Self::Replica(err)
    }
}

// -----------------------------------------------------------------------------
// RemoteConfig structure

#[derive(clap::Args, Clone, Debug)]
pub struct RemoteConfig {
    #[clap(flatten)]
    pub database: Database,
    /// Name of the replication user
    #[clap(short = 'u', long = "user")]
    pub user: String,
    /// Password of the replication user, default to the admin password when
    /// the user is the admin
    #[clap(short = 'p', long = "pass")]
    pub pass: Option<String>,
    /// Host name under which the remote cluster reaches the database
    #[clap(short = 'd', long = "dns")]
    pub dns: String,
    /// Skip the confirmation prompt
    #[clap(short = 'y', long = "yes")]
    pub yes: bool,
    /// Directory where the configuration is written
    #[clap(long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,
    /// Seconds to wait for the client certificate to be issued
    #[clap(long = "timeout", default_value_t = DEFAULT_CERTIFICATE_TIMEOUT)]
    pub timeout: u64,
}

#[async_trait]
impl Executor for RemoteConfig {
    type Error = Error;

    #[tracing::instrument(skip_all, fields(name = %self.database.name))]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;
        let info = self.prepare(&state).await?;

        if !self.yes && !confirm(&self.user, &info).await? {
            return Err(Error::Aborted);
        }

        let app_binding =
            replica::app_binding(state.kube.to_owned(), &info.namespace(), &info.name()).await?;

        let (tunnel, session) = connect::open(&state, &info)
            .await
            .map_err(Error::Connect)?;

        let password = match &self.pass {
            Some(pass) => pass.to_owned(),
            None if self.user == session.username => session.password.to_owned(),
            None => return Err(Error::MissingPassword(self.user.to_owned())),
        };

        replica::ensure_user(&session, &self.user, &password).await?;
        tunnel.close();

        let tls_secret = if info.database().map_err(replica::Error::Resource)?.spec.enable_ssl {
            Some(self.client_certificate(&state, &info, &app_binding).await?)
        } else {
            None
        };

        let documents = documents(
            &info,
            &app_binding,
            &self.dns,
            &self.user,
            &password,
            tls_secret.as_ref(),
        )?;

        let path = self.output_dir.join(format!("{}-{}", info.name(), CONFIG_SUFFIX));
        tokio::fs::write(&path, replica::render(&documents)?)
            .await
            .map_err(|err| Error::Write(path.to_owned(), err))?;

        info!(path = %path.display(), "Wrote remote replica configuration");
        println!("Apply the configuration on the remote cluster with:");
        println!("  kubectl apply -f {}", path.display());
        Ok(())
    }
}

impl RemoteConfig {
    /// retrieves the database and checks that it can be replicated
    async fn prepare(&self, state: &State) -> Result<Info, Error> {
        replica::ensure_supported(self.database.kind)?;
        replica::validate_username(&self.user)?;

        let info = self
            .database
            .get(state)
            .await
            .map_err(|err| Error::Connect(connect::Error::Resource(err)))?;

        restarter::ensure_ready(&info).map_err(Error::Ready)?;
        Ok(info)
    }

    /// issues the client certificate of the user and waits for its secret
    async fn client_certificate(
        &self,
        state: &State,
        info: &Info,
        app_binding: &DynamicObject,
    ) -> Result<Secret, Error> {
        let certificate = replica::certificate(info, app_binding, &self.user)?;
        replica::apply_certificate(state.kube.to_owned(), &certificate).await?;

        let secret = replica::wait_secret(
            state.kube.to_owned(),
            &info.namespace(),
            &replica::client_secret_name(info, &self.user)?,
            Duration::from_secs(self.timeout),
        )
        .await?;

        Ok(secret)
    }
}

// -----------------------------------------------------------------------------
// helpers

async fn confirm(user: &str, info: &Info) -> Result<bool, Error> {
    println!(
        "User '{}' will be granted replication rights on {} {}/{}. Do you want to proceed? (y/n)",
        user,
        info.kind,
        info.namespace(),
        info.name()
    );

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await
        .map_err(Error::Prompt)?;

    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// the objects to apply on the remote cluster
pub fn documents(
    info: &Info,
    app_binding: &DynamicObject,
    dns: &str,
    user: &str,
    password: &str,
    tls_secret: Option<&Secret>,
) -> Result<Vec<Value>, Error> {
    let auth = replica::auth_secret(&info.namespace(), &info.name(), user, password);
    let auth_name = format!("{}-{}", info.name(), REMOTE_AUTH_SUFFIX);

    let mut documents = vec![replica::portable(&auth_name, &auth)?];
    let mut tls_name = None;
    if let Some(secret) = tls_secret {
        let name = secret.metadata.name.to_owned().unwrap_or_default();
        let mut value = replica::portable(&name, secret)?;
        value["apiVersion"] = "v1".into();
        value["kind"] = "Secret".into();

        documents.push(value);
        tls_name = Some(name);
    }

    documents.push(replica::remote_app_binding(
        app_binding,
        dns,
        &auth_name,
        tls_name.as_deref(),
    )?);

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use hyper::Method;
    use kube::{api::ObjectMeta, ResourceExt};
    use serde_json::json;

    use super::*;
    use crate::{
        cmd::{Args, Command},
        svc::k8s::{
            kind::ResourceKind,
            mock::{self, Exchange},
        },
    };

    fn parse(args: &[&str]) -> RemoteConfig {
        let args =
            Args::try_parse_from(["kubectl-dba", "remote-config"].iter().chain(args)).unwrap();
        match args.command {
            Some(Command::RemoteConfig(cmd)) => cmd,
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn info() -> Info {
        Info {
            kind: ResourceKind::Postgres,
            object: DynamicObject::new("pg-demo", &ResourceKind::Postgres.api_resource())
                .within("demo")
                .data(json!({"status": {"phase": "Ready"}})),
        }
    }

    fn app_binding() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "appcatalog.appscode.com/v1alpha1",
            "kind": "AppBinding",
            "metadata": {"name": "pg-demo", "namespace": "demo", "uid": "1f6c"},
            "spec": {
                "clientConfig": {"service": {"name": "pg-demo", "port": 5432}},
                "secret": {"name": "pg-demo-auth"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_arguments() {
        let cmd = parse(&[
            "postgres", "pg-demo", "-n", "demo", "-u", "replica", "-p", "pass", "-d", "pg.example.com",
            "-y",
        ]);

        assert_eq!(cmd.database.kind, ResourceKind::Postgres);
        assert_eq!(cmd.database.namespace.as_deref(), Some("demo"));
        assert_eq!(cmd.user, "replica");
        assert_eq!(cmd.pass.as_deref(), Some("pass"));
        assert_eq!(cmd.dns, "pg.example.com");
        assert!(cmd.yes);
        assert_eq!(cmd.output_dir, PathBuf::from("."));
        assert_eq!(cmd.timeout, DEFAULT_CERTIFICATE_TIMEOUT);
    }

    #[tokio::test]
    async fn refuses_unsupported_kinds_before_any_request() {
        let (client, server) = mock::client(vec![]);
        let cmd = parse(&["redis", "rd-demo", "-u", "replica", "-d", "rd.example.com"]);

        let err = cmd.prepare(&mock::state(client)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Replica(replica::Error::Unsupported(ResourceKind::Redis))
        ));
        assert!(server.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refuses_unready_databases() {
        let (client, server) = mock::client(vec![Exchange::new(
            Method::GET,
            "/apis/kubedb.com/v1/namespaces/demo/mysqls/my-demo",
            json!({
                "apiVersion": "kubedb.com/v1",
                "kind": "MySQL",
                "metadata": {"name": "my-demo", "namespace": "demo"},
                "status": {"phase": "Provisioning"}
            }),
        )]);

        let cmd = parse(&["mysql", "my-demo", "-u", "replica", "-d", "my.example.com"]);
        let err = cmd.prepare(&mock::state(client)).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Ready(restarter::Error::NotReady(ResourceKind::MySql, _, _))
        ));
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[test]
    fn builds_documents_without_tls() {
        let documents =
            documents(&info(), &app_binding(), "pg.example.com", "replica", "pass", None).unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0]["metadata"]["name"], "pg-demo-remote-replica-auth");
        assert_eq!(documents[0]["stringData"]["password"], "pass");
        assert_eq!(documents[1]["kind"], "AppBinding");
        assert_eq!(documents[1]["spec"]["secret"]["name"], "pg-demo-remote-replica-auth");
        assert!(documents[1]["spec"].get("tlsSecret").is_none());
    }

    #[test]
    fn builds_documents_with_client_certificate() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("pg-demo-client-cert-replica".to_string()),
                namespace: Some("demo".to_string()),
                uid: Some("77aa".to_string()),
                resource_version: Some("12".to_string()),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            ..Default::default()
        };

        let documents = documents(
            &info(),
            &app_binding(),
            "pg.example.com",
            "replica",
            "pass",
            Some(&secret),
        )
        .unwrap();

        assert_eq!(documents.len(), 3);
        assert_eq!(documents[1]["kind"], "Secret");
        assert!(documents[1]["metadata"].get("uid").is_none());
        assert_eq!(
            documents[2]["spec"]["tlsSecret"]["name"],
            secret.name_any().as_str()
        );
    }
}
