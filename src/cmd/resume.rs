//! # Resume module
//!
//! This module provides the `resume` command

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    cmd::{
        no_resources,
        pause::{messages, Only},
        Aggregate, Context, Executor, Target,
    },
    svc::{
        database::resumer,
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
// Resume structure

#[derive(clap::Args, Clone, Debug)]
pub struct Resume {
    #[clap(flatten)]
    pub target: Target,
    #[clap(flatten)]
    pub only: Only,
}

#[async_trait]
impl Executor for Resume {
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
            match resumer::resume(state.kube.to_owned(), info, self.only.into()).await {
                Ok(outcome) => messages("resumed", info, &outcome)
                    .iter()
                    .for_each(|message| println!("{}", message)),
                Err(err) => errors.push(err),
            }
        }

        errors.into_result().map_err(Error::Aggregate)
    }
}
