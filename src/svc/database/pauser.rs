//! # Pauser module
//!
//! This module pauses a database reconciliation, its backups and archiver

use chrono::{DateTime, Utc};
use kube::{
    api::{DynamicObject, Patch, PatchParams},
    Api, Client,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::svc::{
    crd::backup,
    k8s::resource::{self, Condition, Info},
};

// -----------------------------------------------------------------------------
// Constants

pub const DATABASE_PAUSED: &str = "DatabasePaused";
pub const PAUSED_REASON: &str = "PausedByUser";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read database, {0}")]
    Resource(resource::Error),
    #[error("failed to update status of {0} '{1}/{2}', {3}")]
    Status(String, String, String, kube::Error),
    #[error("failed to update backup configurations, {0}")]
    Backup(backup::Error),
    #[error("failed to update archiver '{0}/{1}', {2}")]
    Archiver(String, String, kube::Error),
}

impl From<resource::Error> for Error {
    fn from(err: resource::Error) -> Self {
        Self::Resource(err)
    }
}

impl From<backup::Error> for Error {
    fn from(err: backup::Error) -> Self {
        Self::Backup(err)
    }
}

// -----------------------------------------------------------------------------
// Options structure

/// restricts the operation to the database or to its backups
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub struct Options {
    pub only_db: bool,
    pub only_backup: bool,
}

// -----------------------------------------------------------------------------
// Outcome structure

/// what has been changed by a pause or a resume
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Outcome {
    pub database: bool,
    pub backups: Option<usize>,
    pub archiver: Option<String>,
}

// -----------------------------------------------------------------------------
// helpers

#[tracing::instrument(skip(client, info), fields(name = %info.name(), namespace = %info.namespace()))]
pub async fn pause(
    client: Client,
    info: &Info,
    opts: Options,
    now: DateTime<Utc>,
) -> Result<Outcome, Error> {
    let mut outcome = Outcome::default();

    if !opts.only_backup {
        let mut conditions = info.database()?.status.conditions;
        let message = format!(
            "{} {}/{} is paused by user",
            info.kind,
            info.namespace(),
            info.name()
        );

        resource::set_condition(
            &mut conditions,
            Condition::new(DATABASE_PAUSED, PAUSED_REASON, message, now),
        );

        write_conditions(client.to_owned(), info, &conditions).await?;
        outcome.database = true;
    }

    if !opts.only_db {
        outcome.backups =
            Some(backup::set_paused(client.to_owned(), &info.namespace(), &info.name(), true).await?);
        outcome.archiver = set_archiver_paused(client, info, true).await?;
    }

    info!(outcome = ?outcome, "Paused database");
    Ok(outcome)
}

/// writes the conditions through the status subresource
pub async fn write_conditions(
    client: Client,
    info: &Info,
    conditions: &[Condition],
) -> Result<(), Error> {
    let patch = conditions_patch(conditions);

    resource::patch_status(client, info, &patch)
        .await
        .map_err(|err| {
            Error::Status(
                info.kind.to_string(),
                info.namespace(),
                info.name(),
                err,
            )
        })?;

    Ok(())
}

pub fn conditions_patch(conditions: &[Condition]) -> Value {
    json!({ "status": { "conditions": conditions } })
}

/// sets `spec.pause` on the archiver referenced by the database, returns the
/// archiver's name when there is one
pub async fn set_archiver_paused(
    client: Client,
    info: &Info,
    paused: bool,
) -> Result<Option<String>, Error> {
    let resource = match info.kind.archiver_resource() {
        Some(resource) => resource,
        None => return Ok(None),
    };

    let reference = match info.database()?.spec.archiver.and_then(|a| a.reference) {
        Some(reference) => reference,
        None => return Ok(None),
    };

    let namespace = reference.namespace.unwrap_or_else(|| info.namespace());
    let api: Api<DynamicObject> = Api::namespaced_with(client, &namespace, &resource);
    let patch = json!({ "spec": { "pause": paused } });

    debug!(
        kind = &resource.kind,
        namespace = &namespace,
        name = &reference.name,
        paused = paused,
        "execute patch request on resource"
    );
    api.patch(&reference.name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|err| Error::Archiver(namespace.to_owned(), reference.name.to_owned(), err))?;

    Ok(Some(format!("{}/{}", namespace, reference.name)))
}
