//! # Init module
//!
//! This module provides the `init` command which installs or upgrades the
//! kubedb operator deployment

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::{
    api::{ObjectMeta, PostParams},
    Api,
};
use tracing::{debug, info};

use crate::{
    cmd::{Context, Executor},
    svc::{
        cfg::Operator,
        k8s::{client, State},
    },
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to retrieve deployment '{0}/{1}', {2}")]
    Get(String, String, kube::Error),
    #[error("failed to create deployment '{0}/{1}', {2}")]
    Create(String, String, kube::Error),
    #[error("failed to upgrade deployment '{0}/{1}', {2}")]
    Replace(String, String, kube::Error),
    #[error("deployment '{0}/{1}' not found, run without --upgrade to install the operator")]
    NotFound(String, String),
    #[error("deployment '{0}/{1}' does not have any container")]
    NoContainer(String, String),
}

// -----------------------------------------------------------------------------
// Init structure

#[derive(clap::Args, Clone, Debug)]
pub struct Init {
    /// Namespace of the kubedb operator
    #[clap(long = "operator-namespace")]
    pub operator_namespace: Option<String>,
    /// Version of the kubedb operator
    #[clap(long = "version")]
    pub version: Option<String>,
    /// Upgrade the running kubedb operator to the version
    #[clap(long = "upgrade")]
    pub upgrade: bool,
}

#[async_trait]
impl Executor for Init {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;
        let operator = &state.config.operator;

        let namespace = self
            .operator_namespace
            .to_owned()
            .unwrap_or_else(|| operator.namespace.to_owned());

        let version = self
            .version
            .to_owned()
            .unwrap_or_else(|| operator.version.to_owned());

        if self.upgrade {
            upgrade(&state, &namespace, &version).await
        } else {
            install(&state, &namespace, &version).await
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

async fn install(state: &State, namespace: &str, version: &str) -> Result<(), Error> {
    let operator = &state.config.operator;
    let api: Api<Deployment> = Api::namespaced(state.kube.to_owned(), namespace);

    debug!(
        namespace = namespace,
        name = operator.name.as_str(),
        "execute a request to retrieve deployment"
    );
    let existing = api
        .get_opt(&operator.name)
        .await
        .map_err(|err| Error::Get(namespace.to_string(), operator.name.to_owned(), err))?;

    if existing.is_some() {
        println!(
            "Operator deployment {}/{} already exists, use --upgrade to change its version",
            namespace, operator.name
        );
        return Ok(());
    }

    let deployment = deployment(operator, namespace, version);

    debug!(
        namespace = namespace,
        name = operator.name.as_str(),
        "execute a request to create deployment"
    );
    api.create(&PostParams::default(), &deployment)
        .await
        .map_err(|err| Error::Create(namespace.to_string(), operator.name.to_owned(), err))?;

    info!(namespace = namespace, version = version, "Installed operator");
    println!(
        "Successfully installed operator {}/{} with image {}",
        namespace,
        operator.name,
        image(&operator.image, version)
    );
    Ok(())
}

async fn upgrade(state: &State, namespace: &str, version: &str) -> Result<(), Error> {
    let name = &state.config.operator.name;
    let api: Api<Deployment> = Api::namespaced(state.kube.to_owned(), namespace);

    let mut deployment = api
        .get_opt(name)
        .await
        .map_err(|err| Error::Get(namespace.to_string(), name.to_owned(), err))?
        .ok_or_else(|| Error::NotFound(namespace.to_string(), name.to_owned()))?;

    let container = deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .and_then(|spec| spec.containers.first_mut())
        .ok_or_else(|| Error::NoContainer(namespace.to_string(), name.to_owned()))?;

    let current = container.image.to_owned().unwrap_or_default();
    if tag(&current) == Some(version) {
        println!("Operator {}/{} is already running version {}", namespace, name, version);
        return Ok(());
    }

    let upgraded = image(repository(&current), version);
    container.image = Some(upgraded.to_owned());

    debug!(
        namespace = namespace,
        name = name.as_str(),
        "execute a request to replace deployment"
    );
    api.replace(name, &PostParams::default(), &deployment)
        .await
        .map_err(|err| Error::Replace(namespace.to_string(), name.to_owned(), err))?;

    println!(
        "Successfully upgraded operator {}/{} from {} to {}",
        namespace, name, current, upgraded
    );
    Ok(())
}

/// parses an equality based label selector, e.g. `a=b,c=d`
pub fn labels(selector: &str) -> BTreeMap<String, String> {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

pub fn image(repository: &str, version: &str) -> String {
    format!("{}:{}", repository, version)
}

/// returns the image without its tag, a registry port is not a tag
pub fn repository(image: &str) -> &str {
    match image.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => repository,
        _ => image,
    }
}

pub fn tag(image: &str) -> Option<&str> {
    match image.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') => Some(tag),
        _ => None,
    }
}

pub fn deployment(operator: &Operator, namespace: &str, version: &str) -> Deployment {
    let labels = labels(&operator.selector);

    Deployment {
        metadata: ObjectMeta {
            name: Some(operator.name.to_owned()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.to_owned()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.to_owned()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "operator".to_string(),
                        image: Some(image(&operator.image, version)),
                        args: Some(vec![
                            "run".to_string(),
                            format!("--address=:{}", operator.port),
                        ]),
                        ports: Some(vec![ContainerPort {
                            container_port: i32::from(operator.port),
                            name: Some("api".to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svc::cfg;

    fn operator() -> Operator {
        Operator {
            namespace: cfg::OPERATOR_NAMESPACE.to_string(),
            name: cfg::OPERATOR_NAME.to_string(),
            port: cfg::OPERATOR_PORT,
            selector: "app.kubernetes.io/name=kubedb, app=operator".to_string(),
            image: cfg::OPERATOR_IMAGE.to_string(),
            version: cfg::OPERATOR_VERSION.to_string(),
        }
    }

    #[test]
    fn builds_operator_deployment() {
        let deployment = deployment(&operator(), "kubedb", "v0.41.0");
        let spec = deployment.spec.unwrap();
        let container = &spec.template.spec.unwrap().containers[0];

        assert_eq!(deployment.metadata.name.as_deref(), Some("kubedb-operator"));
        assert_eq!(deployment.metadata.namespace.as_deref(), Some("kubedb"));
        assert_eq!(container.image.as_deref(), Some("kubedb/operator:v0.41.0"));
        assert_eq!(
            container.args.to_owned().unwrap(),
            vec!["run".to_string(), "--address=:8443".to_string()]
        );
        assert_eq!(
            spec.selector.match_labels.unwrap(),
            BTreeMap::from([
                ("app".to_string(), "operator".to_string()),
                ("app.kubernetes.io/name".to_string(), "kubedb".to_string()),
            ])
        );
    }

    #[test]
    fn splits_image_tags() {
        assert_eq!(tag("kubedb/operator:v0.40.0"), Some("v0.40.0"));
        assert_eq!(repository("kubedb/operator:v0.40.0"), "kubedb/operator");
        assert_eq!(tag("registry:5000/kubedb/operator"), None);
        assert_eq!(repository("registry:5000/kubedb/operator"), "registry:5000/kubedb/operator");
        assert_eq!(tag("registry:5000/kubedb/operator:v1"), Some("v1"));
        assert_eq!(repository("kubedb/operator"), "kubedb/operator");
    }
}
