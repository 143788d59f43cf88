//! # Command module
//!
//! This module provide command line interface structures and helpers
use std::{fmt::Display, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use kube::ResourceExt;

use crate::svc::{
    cfg::Configuration,
    k8s::{
        client,
        kind::ResourceKind,
        manifest,
        resource::{self, Info, Scope, Selection},
        State,
    },
};

pub mod compare;
pub mod connect;
pub mod create;
pub mod credentials;
pub mod data;
pub mod debug;
pub mod delete;
pub mod describe;
pub mod edit;
pub mod exec;
pub mod get;
pub mod init;
pub mod monitor;
pub mod mssql;
pub mod pause;
pub mod replica;
pub mod restart;
pub mod resume;
pub mod summarize;

// -----------------------------------------------------------------------------
// Context structure

/// what every command needs to reach the cluster, the kubernetes client is
/// only built by commands that use it
#[derive(Clone, Debug)]
pub struct Context {
    pub config: Arc<Configuration>,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
}

impl Context {
    pub async fn state(&self) -> Result<State, client::Error> {
        let (kube, namespace) =
            client::try_new(self.kubeconfig.to_owned(), self.context.to_owned()).await?;

        Ok(State::new(kube, namespace, self.config.to_owned()))
    }
}

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// Aggregate structure

/// the distinct messages of the errors met while processing several objects
#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug, Default)]
#[error("{}", .0.join("\n"))]
pub struct Aggregate(pub Vec<String>);

impl Aggregate {
    pub fn push<E: Display>(&mut self, err: E) {
        let message = err.to_string();
        if !self.0.contains(&message) {
            self.0.push(message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            return Ok(());
        }

        Err(self)
    }
}

// -----------------------------------------------------------------------------
// Target structure

/// selects kubedb objects like `kubectl` does
#[derive(clap::Args, Clone, Debug, Default)]
pub struct Target {
    /// Resources in `TYPE [NAME...]` or `TYPE/NAME...` form
    #[clap(name = "resources")]
    pub resources: Vec<String>,
    /// Namespace of the resources, default to the one of the kubeconfig context
    #[clap(short = 'n', long = "namespace")]
    pub namespace: Option<String>,
    /// Selector (label query) to filter on
    #[clap(short = 'l', long = "selector")]
    pub selector: Option<String>,
    /// List the requested objects across all namespaces
    #[clap(short = 'A', long = "all-namespaces")]
    pub all_namespaces: bool,
    /// Files that contain the resources, '-' reads the standard input
    #[clap(short = 'f', long = "filename")]
    pub files: Vec<PathBuf>,
}

impl Target {
    pub fn scope(&self, state: &State) -> Scope {
        Scope {
            namespace: state.namespace(&self.namespace),
            all_namespaces: self.all_namespaces,
            selector: self.selector.to_owned(),
        }
    }

    /// fetches the selected objects, errors met on a named object are
    /// returned along with the objects that have been found
    pub async fn resolve(&self, state: &State) -> Result<(Vec<Info>, Aggregate), resource::Error> {
        if !self.files.is_empty() {
            return Ok(self.resolve_files(state).await);
        }

        let selections = Selection::parse(&self.resources)?;
        let (infos, errors) = resource::resolve(&state.kube, &self.scope(state), &selections).await;

        let mut aggregate = Aggregate::default();
        errors.iter().for_each(|err| aggregate.push(err));

        Ok((infos, aggregate))
    }

    /// fetches the current state of the objects written in the manifests
    async fn resolve_files(&self, state: &State) -> (Vec<Info>, Aggregate) {
        let mut infos = vec![];
        let mut aggregate = Aggregate::default();

        for file in &self.files {
            let objects = match manifest::read(file)
                .await
                .and_then(|content| manifest::parse(&content))
            {
                Ok(objects) => objects,
                Err(err) => {
                    aggregate.push(err);
                    continue;
                }
            };

            for (kind, object) in objects {
                let namespace = object
                    .namespace()
                    .unwrap_or_else(|| state.namespace(&self.namespace));

                match resource::get(state.kube.to_owned(), kind, &namespace, &object.name_any())
                    .await
                {
                    Ok(info) => infos.push(info),
                    Err(err) => aggregate.push(err),
                }
            }
        }

        (infos, aggregate)
    }
}

/// returns the message printed when a selection matches nothing
pub fn no_resources(scope: &Scope) -> String {
    if scope.all_namespaces {
        return "No resources found".to_string();
    }

    format!("No resources found in {} namespace.", scope.namespace)
}

// -----------------------------------------------------------------------------
// Database structure

/// a single kubedb database given as `TYPE NAME`
#[derive(clap::Args, Clone, Debug)]
pub struct Database {
    /// Type of the database, e.g. postgres, pg or postgreses.kubedb.com
    #[clap(name = "type")]
    pub kind: ResourceKind,
    /// Name of the database
    #[clap(name = "name")]
    pub name: String,
    /// Namespace of the database, default to the one of the kubeconfig context
    #[clap(short = 'n', long = "namespace")]
    pub namespace: Option<String>,
}

impl Database {
    pub async fn get(&self, state: &State) -> Result<Info, resource::Error> {
        resource::get(
            state.kube.to_owned(),
            self.kind,
            &state.namespace(&self.namespace),
            &self.name,
        )
        .await
    }
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<Error>),
    #[error("{0}")]
    Get(get::Error),
    #[error("{0}")]
    Create(create::Error),
    #[error("{0}")]
    Delete(delete::Error),
    #[error("{0}")]
    Describe(describe::Error),
    #[error("{0}")]
    Edit(edit::Error),
    #[error("{0}")]
    Pause(pause::Error),
    #[error("{0}")]
    Resume(resume::Error),
    #[error("{0}")]
    Restart(restart::Error),
    #[error("{0}")]
    Credentials(credentials::Error),
    #[error("{0}")]
    Monitor(monitor::Error),
    #[error("{0}")]
    Summarize(summarize::Error),
    #[error("{0}")]
    Compare(compare::Error),
    #[error("{0}")]
    Connect(connect::Error),
    #[error("{0}")]
    Exec(exec::Error),
    #[error("{0}")]
    Data(data::Error),
    #[error("{0}")]
    Debug(debug::Error),
    #[error("{0}")]
    Init(init::Error),
    #[error("{0}")]
    RemoteConfig(replica::Error),
    #[error("{0}")]
    Mssql(mssql::Error),
}

// -----------------------------------------------------------------------------
// Command enumeration

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Display one or many kubedb databases
    #[clap(name = "get")]
    Get(get::Get),
    /// Create kubedb databases from files or standard input
    #[clap(name = "create")]
    Create(create::Create),
    /// Delete kubedb databases by type and names, label selector or files
    #[clap(name = "delete")]
    Delete(delete::Delete),
    /// Show details of kubedb databases
    #[clap(name = "describe")]
    Describe(describe::Describe),
    /// Edit a kubedb database in an editor
    #[clap(name = "edit")]
    Edit(edit::Edit),
    /// Pause the reconciliation and the backups of kubedb databases
    #[clap(name = "pause")]
    Pause(pause::Pause),
    /// Resume the reconciliation and the backups of kubedb databases
    #[clap(name = "resume")]
    Resume(resume::Resume),
    /// Restart kubedb databases through an ops request
    #[clap(name = "restart")]
    Restart(restart::Restart),
    /// Show the credentials of kubedb databases
    #[clap(name = "show-credentials")]
    ShowCredentials(credentials::ShowCredentials),
    /// Check the monitoring of a kubedb database
    #[clap(name = "monitor", subcommand)]
    Monitor(monitor::Monitor),
    /// Retrieve the report of a kubedb database from the operator
    #[clap(name = "summarize")]
    Summarize(summarize::Summarize),
    /// Compare two reports of a kubedb database
    #[clap(name = "compare")]
    Compare(compare::Compare),
    /// Open an interactive shell to a kubedb database
    #[clap(name = "connect")]
    Connect(connect::Connect),
    /// Run a command or a script on a kubedb database
    #[clap(name = "exec")]
    Exec(exec::Exec),
    /// Insert, verify or drop test data in a kubedb database
    #[clap(name = "data", subcommand)]
    Data(data::Data),
    /// Collect the objects and logs needed to debug a kubedb database
    #[clap(name = "debug")]
    Debug(debug::Debug),
    /// Install or upgrade the kubedb operator
    #[clap(name = "init")]
    Init(init::Init),
    /// Prepare a postgres or mysql database for replication from another cluster
    #[clap(name = "remote-config")]
    RemoteConfig(replica::RemoteConfig),
    /// Manage mssql servers
    #[clap(name = "mssql", subcommand)]
    Mssql(mssql::Mssql),
}

#[async_trait]
impl Executor for Command {
    type Error = Error;

    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let (name, result) = match self {
            Self::Get(cmd) => ("get", cmd.execute(ctx).await.map_err(Error::Get)),
            Self::Create(cmd) => ("create", cmd.execute(ctx).await.map_err(Error::Create)),
            Self::Delete(cmd) => ("delete", cmd.execute(ctx).await.map_err(Error::Delete)),
            Self::Describe(cmd) => ("describe", cmd.execute(ctx).await.map_err(Error::Describe)),
            Self::Edit(cmd) => ("edit", cmd.execute(ctx).await.map_err(Error::Edit)),
            Self::Pause(cmd) => ("pause", cmd.execute(ctx).await.map_err(Error::Pause)),
            Self::Resume(cmd) => ("resume", cmd.execute(ctx).await.map_err(Error::Resume)),
            Self::Restart(cmd) => ("restart", cmd.execute(ctx).await.map_err(Error::Restart)),
            Self::ShowCredentials(cmd) => (
                "show-credentials",
                cmd.execute(ctx).await.map_err(Error::Credentials),
            ),
            Self::Monitor(cmd) => ("monitor", cmd.execute(ctx).await.map_err(Error::Monitor)),
            Self::Summarize(cmd) => ("summarize", cmd.execute(ctx).await.map_err(Error::Summarize)),
            Self::Compare(cmd) => ("compare", cmd.execute(ctx).await.map_err(Error::Compare)),
            Self::Connect(cmd) => ("connect", cmd.execute(ctx).await.map_err(Error::Connect)),
            Self::Exec(cmd) => ("exec", cmd.execute(ctx).await.map_err(Error::Exec)),
            Self::Data(cmd) => ("data", cmd.execute(ctx).await.map_err(Error::Data)),
            Self::Debug(cmd) => ("debug", cmd.execute(ctx).await.map_err(Error::Debug)),
            Self::Init(cmd) => ("init", cmd.execute(ctx).await.map_err(Error::Init)),
            Self::RemoteConfig(cmd) => (
                "remote-config",
                cmd.execute(ctx).await.map_err(Error::RemoteConfig),
            ),
            Self::Mssql(cmd) => ("mssql", cmd.execute(ctx).await.map_err(Error::Mssql)),
        };

        result.map_err(|err| Error::Execution(name.to_string(), Arc::new(err)))
    }
}

// -----------------------------------------------------------------------------
// Args structure

#[derive(Parser, Clone, Debug)]
#[clap(name = "kubectl-dba", author, version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[clap(short = 'v', global = true, action = ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of kubeconfig
    #[clap(short = 'k', long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,
    /// Name of the kubeconfig context to use
    #[clap(long = "context", global = true)]
    pub context: Option<String>,
    /// Specify location of configuration
    #[clap(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[clap(short = 't', long = "check")]
    pub check: bool,
    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verifies_command_line_interface() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "kubectl-dba",
            "get",
            "pg",
            "pg-demo",
            "-n",
            "demo",
            "-vvv",
            "--context",
            "kind-kind",
        ])
        .unwrap();

        assert_eq!(args.verbosity, 3);
        assert_eq!(args.context.as_deref(), Some("kind-kind"));
        match args.command {
            Some(Command::Get(get)) => {
                assert_eq!(get.target.resources, vec!["pg", "pg-demo"]);
                assert_eq!(get.target.namespace.as_deref(), Some("demo"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_database_kind() {
        let args = Args::try_parse_from(["kubectl-dba", "connect", "mg", "mg-demo"]).unwrap();
        match args.command {
            Some(Command::Connect(connect)) => {
                assert_eq!(connect.database.kind, ResourceKind::MongoDb);
                assert_eq!(connect.database.name, "mg-demo");
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Args::try_parse_from(["kubectl-dba", "connect", "snapshot", "a"]).is_err());
    }

    #[test]
    fn aggregates_distinct_messages() {
        let mut aggregate = Aggregate::default();
        aggregate.push("not found");
        aggregate.push("forbidden");
        aggregate.push("not found");

        assert_eq!(aggregate.to_string(), "not found\nforbidden");
        assert!(aggregate.into_result().is_err());
        assert!(Aggregate::default().into_result().is_ok());
    }

    #[test]
    fn renders_no_resources_message() {
        let scope = Scope {
            namespace: "demo".into(),
            all_namespaces: false,
            selector: None,
        };
        assert_eq!(no_resources(&scope), "No resources found in demo namespace.");

        let all = Scope {
            all_namespaces: true,
            ..scope
        };
        assert_eq!(no_resources(&all), "No resources found");
    }

    #[tokio::test]
    async fn resolves_objects_written_in_files() {
        use hyper::Method;
        use serde_json::json;

        use crate::svc::k8s::mock::{self, Exchange};

        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("databases.yaml");
        std::fs::write(
            &path,
            "apiVersion: kubedb.com/v1\nkind: Postgres\nmetadata:\n  name: pg-a\n---\n\
             apiVersion: kubedb.com/v1\nkind: MySQL\nmetadata:\n  name: my-b\n  namespace: prod\n",
        )
        .unwrap();

        let (client, server) = mock::client(vec![
            Exchange::new(
                Method::GET,
                "/apis/kubedb.com/v1/namespaces/demo/postgreses/pg-a",
                json!({
                    "apiVersion": "kubedb.com/v1",
                    "kind": "Postgres",
                    "metadata": {"name": "pg-a", "namespace": "demo"}
                }),
            ),
            Exchange::not_found(Method::GET, "/apis/kubedb.com/v1/namespaces/prod/mysqls/my-b"),
        ]);

        let args = Args::try_parse_from([
            "kubectl-dba",
            "pause",
            "-f",
            path.to_str().unwrap(),
        ])
        .unwrap();

        let target = match args.command {
            Some(Command::Pause(pause)) => pause.target,
            other => panic!("unexpected command {:?}", other),
        };

        let (infos, errors) = target.resolve(&mock::state(client)).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].kind, ResourceKind::Postgres);
        assert_eq!(infos[0].name(), "pg-a");
        assert_eq!(errors.0.len(), 1);

        server.await.unwrap();
    }
}
