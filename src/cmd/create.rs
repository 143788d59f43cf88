//! # Create module
//!
//! This module provides the `create` command which creates kubedb databases
//! from yaml or json manifests

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use kube::{
    api::{DynamicObject, PostParams},
    Api, ResourceExt,
};
use tracing::debug;

use crate::{
    cmd::{Aggregate, Context, Executor},
    svc::k8s::{client, kind::ResourceKind, manifest, State},
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to load manifest, {0}")]
    Manifest(manifest::Error),
    #[error("failed to create {0} '{1}/{2}', {3}")]
    Create(ResourceKind, String, String, kube::Error),
    #[error("{0}")]
    Aggregate(Aggregate),
}

// -----------------------------------------------------------------------------
// Create structure

#[derive(clap::Args, Clone, Debug)]
pub struct Create {
    /// Files that contain the databases to create, '-' reads the standard input
    #[clap(short = 'f', long = "filename", required = true)]
    pub files: Vec<PathBuf>,
    /// Namespace of the databases which do not define one
    #[clap(short = 'n', long = "namespace")]
    pub namespace: Option<String>,
}

#[async_trait]
impl Executor for Create {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;
        let mut errors = Aggregate::default();

        for file in &self.files {
            let objects = match manifest::read(file)
                .await
                .and_then(|content| manifest::parse(&content))
            {
                Ok(objects) => objects,
                Err(err) => {
                    errors.push(Error::Manifest(err));
                    continue;
                }
            };

            for (kind, object) in objects {
                match create(&state, &self.namespace, kind, object).await {
                    Ok(name) => println!("{}/{} created", kind.qualified(), name),
                    Err(err) => errors.push(err),
                }
            }
        }

        errors.into_result().map_err(Error::Aggregate)
    }
}

// -----------------------------------------------------------------------------
// helpers

/// creates the object in its own namespace or the selected one
pub async fn create(
    state: &State,
    namespace: &Option<String>,
    kind: ResourceKind,
    object: DynamicObject,
) -> Result<String, Error> {
    let namespace = object
        .namespace()
        .unwrap_or_else(|| state.namespace(namespace));
    let name = object.name_any();

    let resource = match object.types.as_ref().and_then(|types| version(&types.api_version)) {
        Some(version) => kind.versioned_resource(version),
        None => kind.api_resource(),
    };

    let api: Api<DynamicObject> = Api::namespaced_with(state.kube.to_owned(), &namespace, &resource);

    debug!(
        kind = kind.kind(),
        version = resource.version.as_str(),
        namespace = &namespace,
        name = &name,
        "execute a request to create resource"
    );
    let created = api
        .create(&PostParams::default(), &object)
        .await
        .map_err(|err| Error::Create(kind, namespace.to_owned(), name, err))?;

    Ok(created.name_any())
}

/// returns the version of a `group/version` api version
pub fn version(api_version: &str) -> Option<&str> {
    api_version
        .split_once('/')
        .map(|(_, version)| version)
        .filter(|version| !version.is_empty())
}
