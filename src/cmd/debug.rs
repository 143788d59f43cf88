//! # Debug module
//!
//! This module provides the `debug` command which collects the manifests and
//! the logs needed to investigate a database

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{ApiResource, DynamicObject, ListParams, LogParams},
    Api, ResourceExt,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    cmd::{Context, Database, Executor},
    svc::{
        crd::backup,
        k8s::{client, kind, resource, State},
    },
};

pub const LOGS_DIRECTORY: &str = "logs";
pub const YAMLS_DIRECTORY: &str = "yamls";
pub const PETSETS_DIRECTORY: &str = "petsets";
pub const OPS_DIRECTORY: &str = "ops";
pub const SCALERS_DIRECTORY: &str = "scaler";
pub const BACKUPS_DIRECTORY: &str = "backupconfigs";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to retrieve database, {0}")]
    Resource(resource::Error),
    #[error("failed to list {0} in namespace '{1}', {2}")]
    List(String, String, kube::Error),
    #[error("failed to collect backup configurations, {0}")]
    Backup(backup::Error),
    #[error("failed to serialize '{0}', {1}")]
    Serialize(String, serde_yaml::Error),
    #[error("failed to write '{0:?}', {1}")]
    Write(PathBuf, std::io::Error),
}

// -----------------------------------------------------------------------------
// Debug structure

#[derive(clap::Args, Clone, Debug)]
pub struct Debug {
    #[clap(flatten)]
    pub database: Database,
    /// Namespace of the kubedb operator
    #[clap(long = "operator-namespace")]
    pub operator_namespace: Option<String>,
    /// Directory the bundle is written to
    #[clap(short = 'o', long = "output", default_value = ".")]
    pub output: PathBuf,
}

#[async_trait]
impl Executor for Debug {
    type Error = Error;

    #[tracing::instrument(skip_all, fields(name = %self.database.name))]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;
        let info = self.database.get(&state).await.map_err(Error::Resource)?;
        let (namespace, name) = (info.namespace(), info.name());

        let bundle = Bundle::create(&self.output, &name).await?;
        bundle.yaml(&name, &info.object).await?;

        let selector = resource::selector(&resource::instance_labels(&name));
        collect_petsets(&state, &bundle, &namespace, &selector).await?;

        for pod in &pods(&state, &namespace, &selector).await? {
            bundle.yaml(&pod.name_any(), pod).await?;
            bundle.logs(&state, &namespace, pod).await?;
        }

        let operator = &state.config.operator;
        let operator_namespace = self
            .operator_namespace
            .to_owned()
            .unwrap_or_else(|| operator.namespace.to_owned());

        let operators = pods(&state, &operator_namespace, &operator.selector).await?;
        if operators.is_empty() {
            warn!(
                namespace = operator_namespace.as_str(),
                selector = operator.selector.as_str(),
                "Could not find operator pods, skip their logs"
            );
        }

        for pod in &operators {
            bundle.logs(&state, &operator_namespace, pod).await?;
        }

        collect_related(&state, &bundle, &info).await?;

        println!(
            "Debug information for {} {}/{} has been stored in '{}'",
            info.kind,
            namespace,
            name,
            bundle.root.display()
        );
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Bundle structure

/// directory layout of a debug bundle, `<root>/logs` and `<root>/yamls` with
/// a sub directory per collection of related objects
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Bundle {
    pub root: PathBuf,
}

impl Bundle {
    pub fn new(directory: &Path, name: &str) -> Self {
        Self {
            root: directory.join(name),
        }
    }

    pub async fn create(directory: &Path, name: &str) -> Result<Self, Error> {
        let bundle = Self::new(directory, name);

        for path in [bundle.logs_directory(), bundle.yamls_directory()] {
            create_dir(&path).await?;
        }

        Ok(bundle)
    }

    pub fn logs_directory(&self) -> PathBuf {
        self.root.join(LOGS_DIRECTORY)
    }

    pub fn yamls_directory(&self) -> PathBuf {
        self.root.join(YAMLS_DIRECTORY)
    }

    pub async fn yaml<T>(&self, name: &str, obj: &T) -> Result<PathBuf, Error>
    where
        T: Serialize,
    {
        write_yaml(&self.yamls_directory(), name, obj).await
    }

    /// writes the object in `<root>/yamls/<collection>/<name>.yaml`
    pub async fn collection_yaml<T>(
        &self,
        collection: &str,
        name: &str,
        obj: &T,
    ) -> Result<PathBuf, Error>
    where
        T: Serialize,
    {
        let directory = self.yamls_directory().join(collection);
        create_dir(&directory).await?;
        write_yaml(&directory, name, obj).await
    }

    /// writes the logs of every container of the pod in `<pod>_<container>.log`,
    /// a container whose logs cannot be retrieved is skipped
    pub async fn logs(&self, state: &State, namespace: &str, pod: &Pod) -> Result<(), Error> {
        let name = pod.name_any();
        let api: Api<Pod> = Api::namespaced(state.kube.to_owned(), namespace);

        for container in containers(pod) {
            debug!(
                pod = name.as_str(),
                container = container.as_str(),
                "execute a request to retrieve container logs"
            );

            let params = LogParams {
                container: Some(container.to_owned()),
                ..Default::default()
            };

            let logs = match api.logs(&name, &params).await {
                Ok(logs) => logs,
                Err(err) => {
                    warn!(
                        pod = name.as_str(),
                        namespace = namespace,
                        container = container.as_str(),
                        error = err.to_string(),
                        "Could not retrieve container logs, skip them"
                    );
                    continue;
                }
            };

            let path = self
                .logs_directory()
                .join(format!("{}_{}.log", name, container));

            write(&path, logs.as_bytes()).await?;
        }

        info!(pod = name.as_str(), namespace = namespace, "Collected pod logs");
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// helpers

async fn pods(state: &State, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
    let api: Api<Pod> = Api::namespaced(state.kube.to_owned(), namespace);

    Ok(api
        .list(&ListParams::default().labels(selector))
        .await
        .map_err(|err| Error::List("pods".to_string(), namespace.to_string(), err))?
        .items)
}

/// lists objects of a custom resource, none when the resource is not served
async fn objects(
    state: &State,
    namespace: &str,
    resource: &ApiResource,
    params: &ListParams,
) -> Result<Vec<DynamicObject>, Error> {
    let api: Api<DynamicObject> = Api::namespaced_with(state.kube.to_owned(), namespace, resource);

    debug!(
        kind = resource.kind.as_str(),
        namespace = namespace,
        "execute a request to list resources"
    );
    match api.list(params).await {
        Ok(list) => Ok(list.items),
        Err(kube::Error::Api(err)) if err.code == 404 => {
            debug!(
                kind = resource.kind.as_str(),
                namespace = namespace,
                "resource is not served by the api server, skip it"
            );
            Ok(vec![])
        }
        Err(err) => Err(Error::List(resource.plural.to_owned(), namespace.to_string(), err)),
    }
}

/// writes the petsets of the database in `<root>/yamls/petsets`
async fn collect_petsets(
    state: &State,
    bundle: &Bundle,
    namespace: &str,
    selector: &str,
) -> Result<(), Error> {
    let params = ListParams::default().labels(selector);
    for petset in objects(state, namespace, &kind::petset_resource(), &params).await? {
        bundle
            .collection_yaml(PETSETS_DIRECTORY, &petset.name_any(), &petset)
            .await?;
    }

    Ok(())
}

/// writes the ops requests, the autoscalers and the backup configurations of
/// the database in their own collection
async fn collect_related(
    state: &State,
    bundle: &Bundle,
    info: &resource::Info,
) -> Result<(), Error> {
    let (namespace, name) = (info.namespace(), info.name());
    let params = ListParams::default();

    let collections = [
        (OPS_DIRECTORY, info.kind.ops_request_resource()),
        (SCALERS_DIRECTORY, info.kind.autoscaler_resource()),
    ];

    for (collection, resource) in collections {
        for obj in objects(state, &namespace, &resource, &params).await? {
            if references(&obj, &name) {
                bundle.collection_yaml(collection, &obj.name_any(), &obj).await?;
            }
        }
    }

    let configurations = backup::list(state.kube.to_owned(), &namespace, &name)
        .await
        .map_err(Error::Backup)?;

    for configuration in &configurations {
        bundle
            .collection_yaml(BACKUPS_DIRECTORY, &configuration.name_any(), configuration)
            .await?;
    }

    Ok(())
}

async fn create_dir(path: &Path) -> Result<(), Error> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| Error::Write(path.to_owned(), err))
}

async fn write_yaml<T>(directory: &Path, name: &str, obj: &T) -> Result<PathBuf, Error>
where
    T: Serialize,
{
    let content =
        serde_yaml::to_string(obj).map_err(|err| Error::Serialize(name.to_string(), err))?;

    let path = directory.join(format!("{}.yaml", name));
    write(&path, content.as_bytes()).await?;
    Ok(path)
}

async fn write(path: &Path, content: &[u8]) -> Result<(), Error> {
    tokio::fs::write(path, content)
        .await
        .map_err(|err| Error::Write(path.to_owned(), err))
}

pub fn containers(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .map(|spec| spec.containers.iter().map(|c| c.name.to_owned()).collect())
        .unwrap_or_default()
}

/// returns if the ops request or the autoscaler targets the database, through
/// `spec.databaseRef.name`
pub fn references(obj: &DynamicObject, name: &str) -> bool {
    obj.data
        .pointer("/spec/databaseRef/name")
        .and_then(serde_json::Value::as_str)
        == Some(name)
}
