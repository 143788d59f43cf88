//! # Restarter module
//!
//! This module restarts a database by creating a `Restart` ops request that
//! the operator carries out

use kube::{
    api::{DynamicObject, PostParams},
    Api, Client, ResourceExt,
};
use serde_json::json;
use tracing::{debug, info};

use crate::svc::k8s::{
    kind::ResourceKind,
    resource::{self, Info},
};

// -----------------------------------------------------------------------------
// Constants

pub const RESTART: &str = "Restart";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0} {1}/{2} is not in Ready state")]
    NotReady(ResourceKind, String, String),
    #[error("failed to read database, {0}")]
    Resource(resource::Error),
    #[error("failed to create ops request for {0} '{1}/{2}', {3}")]
    Create(ResourceKind, String, String, kube::Error),
}

// -----------------------------------------------------------------------------
// helpers

/// builds the ops request asking the operator to restart the database
pub fn ops_request(kind: ResourceKind, namespace: &str, name: &str) -> DynamicObject {
    let mut request = DynamicObject::new("", &kind.ops_request_resource())
        .within(namespace)
        .data(json!({
            "spec": {
                "type": RESTART,
                "databaseRef": { "name": name }
            }
        }));

    request.metadata.name = None;
    request.metadata.generate_name = Some(format!("{}-restart-", name));
    request
}

/// fails unless the database is ready
pub fn ensure_ready(info: &Info) -> Result<(), Error> {
    let database = info.database().map_err(Error::Resource)?;
    if !database.ready() {
        return Err(Error::NotReady(info.kind, info.namespace(), info.name()));
    }

    Ok(())
}

/// creates a restart ops request for the database, returns its generated name
#[tracing::instrument(skip(client, info), fields(name = %info.name(), namespace = %info.namespace()))]
pub async fn restart(client: Client, info: &Info) -> Result<String, Error> {
    ensure_ready(info)?;

    let (namespace, name) = (info.namespace(), info.name());
    let resource = info.kind.ops_request_resource();
    let api: Api<DynamicObject> = Api::namespaced_with(client, &namespace, &resource);

    debug!(
        kind = &resource.kind,
        namespace = &namespace,
        database = &name,
        "execute a request to create resource"
    );
    let created = api
        .create(&PostParams::default(), &ops_request(info.kind, &namespace, &name))
        .await
        .map_err(|err| Error::Create(info.kind, namespace.to_owned(), name.to_owned(), err))?;

    info!(
        namespace = &namespace,
        database = &name,
        opsrequest = created.name_any(),
        "Created restart ops request"
    );
    Ok(created.name_any())
}
