//! # Pause module
//!
//! This module provides the `pause` command

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    cmd::{no_resources, Aggregate, Context, Executor, Target},
    svc::{
        database::pauser::{self, Options, Outcome},
        k8s::{
            client,
            resource::{self, Info},
        },
    },
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to select resources, {0}")]
    Resource(resource::Error),
    #[error("{0}")]
    Aggregate(Aggregate),
}

// -----------------------------------------------------------------------------
// Only structure

/// restricts a pause or a resume
#[derive(clap::Args, Clone, Copy, Debug)]
pub struct Only {
    /// Only update the database, leave its backups untouched
    #[clap(long = "only-db", conflicts_with = "only_backup")]
    pub db: bool,
    /// Only update the backups of the database
    #[clap(long = "only-backupconfig", id = "only_backup")]
    pub backup: bool,
}

impl From<Only> for Options {
    fn from(only: Only) -> Self {
        Self {
            only_db: only.db,
            only_backup: only.backup,
        }
    }
}

// -----------------------------------------------------------------------------
// Pause structure

#[derive(clap::Args, Clone, Debug)]
pub struct Pause {
    #[clap(flatten)]
    pub target: Target,
    #[clap(flatten)]
    pub only: Only,
}

#[async_trait]
impl Executor for Pause {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;
        let (infos, mut errors) = self.target.resolve(&state).await.map_err(Error::Resource)?;

        if infos.is_empty() && errors.is_empty() {
            eprintln!("{}", no_resources(&self.target.scope(&state)));
            return Ok(());
        }

        for info in &infos {
            match pauser::pause(state.kube.to_owned(), info, self.only.into(), Utc::now()).await {
                Ok(outcome) => messages("paused", info, &outcome)
                    .iter()
                    .for_each(|message| println!("{}", message)),
                Err(err) => errors.push(err),
            }
        }

        errors.into_result().map_err(Error::Aggregate)
    }
}

/// returns what to tell the user once a pause or a resume is done
pub fn messages(verb: &str, info: &Info, outcome: &Outcome) -> Vec<String> {
    let target = format!("{}/{}", info.namespace(), info.name());
    let mut messages = vec![];

    if outcome.database {
        messages.push(format!("Successfully {} {}.", verb, target));
    }

    if outcome.backups.is_some() {
        messages.push(format!("Successfully {} backupconfigurations of {}.", verb, target));
    }

    if let Some(archiver) = &outcome.archiver {
        messages.push(format!("Successfully {} archiver {}.", verb, archiver));
    }

    messages
}
