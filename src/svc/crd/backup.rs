//! # Backup configuration
//!
//! This module provide the stash backup configuration custom resource and
//! helpers to pause or resume the ones targeting a kubedb database

use kube::{
    api::{ListParams, Patch, PatchParams},
    Api, Client, CustomResource, ResourceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

// -----------------------------------------------------------------------------
// Constants

pub const APP_BINDING_KIND: &str = "AppBinding";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to list backup configurations in namespace '{0}', {1}")]
    List(String, kube::Error),
    #[error("failed to patch backup configuration '{0}/{1}', {2}")]
    Patch(String, String, kube::Error),
}

// -----------------------------------------------------------------------------
// Target structures

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct TargetRef {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(rename = "kind", default)]
    pub kind: String,
    #[serde(rename = "name", default)]
    pub name: String,
    #[serde(rename = "namespace", default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct BackupTarget {
    #[serde(rename = "ref")]
    pub reference: TargetRef,
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "stash.appscode.com")]
#[kube(version = "v1beta1")]
#[kube(kind = "BackupConfiguration")]
#[kube(plural = "backupconfigurations")]
#[kube(namespaced)]
#[kube(derive = "PartialEq")]
pub struct Spec {
    #[serde(rename = "target", default, skip_serializing_if = "Option::is_none")]
    pub target: Option<BackupTarget>,
    #[serde(rename = "schedule", default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(rename = "paused", default)]
    pub paused: bool,
}

impl BackupConfiguration {
    /// returns if the configuration backs up the app binding of the database
    pub fn targets(&self, database: &str) -> bool {
        self.spec
            .target
            .as_ref()
            .map(|target| {
                target.reference.kind == APP_BINDING_KIND && target.reference.name == database
            })
            .unwrap_or(false)
    }
}

// -----------------------------------------------------------------------------
// helpers

/// lists the backup configurations targeting the database, none when stash is
/// not installed
pub async fn list(
    client: Client,
    namespace: &str,
    database: &str,
) -> Result<Vec<BackupConfiguration>, Error> {
    let api: Api<BackupConfiguration> = Api::namespaced(client, namespace);

    debug!(
        kind = "BackupConfiguration",
        namespace = namespace,
        "execute a request to list backup configurations"
    );
    match api.list(&ListParams::default()).await {
        Ok(configurations) => Ok(configurations
            .items
            .into_iter()
            .filter(|c| c.targets(database))
            .collect()),
        Err(kube::Error::Api(err)) if err.code == 404 => {
            debug!(
                kind = "BackupConfiguration",
                namespace = namespace,
                "backup configurations are not served by the api server"
            );
            Ok(vec![])
        }
        Err(err) => Err(Error::List(namespace.to_string(), err)),
    }
}

/// sets `spec.paused` on every backup configuration targeting the database,
/// returns the number of configurations patched
#[tracing::instrument(skip(client))]
pub async fn set_paused(
    client: Client,
    namespace: &str,
    database: &str,
    paused: bool,
) -> Result<usize, Error> {
    // Without stash, the list is empty and there is nothing to pause
    let configurations = list(client.to_owned(), namespace, database).await?;
    let api: Api<BackupConfiguration> = Api::namespaced(client, namespace);

    let patch = json!({ "spec": { "paused": paused } });
    let mut count = 0;
    for configuration in &configurations {
        let name = configuration.name_any();
        debug!(
            kind = "BackupConfiguration",
            namespace = namespace,
            name = &name,
            paused = paused,
            "execute patch request on resource"
        );

        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|err| Error::Patch(namespace.to_string(), name.to_owned(), err))?;

        info!(namespace = namespace, name = &name, paused = paused, "Patched backup configuration");
        count += 1;
    }

    Ok(count)
}
