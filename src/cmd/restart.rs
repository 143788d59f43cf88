//! # Restart module
//!
//! This module provides the `restart` command

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    cmd::{no_resources, Aggregate, Context, Executor, Target},
    svc::{
        database::restarter,
        k8s::{client, resource},
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
// Restart structure

#[derive(clap::Args, Clone, Debug)]
pub struct Restart {
    #[clap(flatten)]
    pub target: Target,
}

#[async_trait]
impl Executor for Restart {
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
            let namespace = info.namespace();
            match restarter::restart(state.kube.to_owned(), info).await {
                Ok(request) => println!(
                    "opsrequest {}/{} created for database {}/{}.",
                    namespace,
                    request,
                    namespace,
                    info.name()
                ),
                Err(err) => errors.push(err),
            }
        }

        errors.into_result().map_err(Error::Aggregate)
    }
}
