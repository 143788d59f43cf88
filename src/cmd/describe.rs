//! # Describe module
//!
//! This module provides the `describe` command

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;

use crate::{
    cmd::{no_resources, Aggregate, Context, Executor, Target},
    svc::{
        describer,
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
// Describe structure

#[derive(clap::Args, Clone, Debug)]
pub struct Describe {
    #[clap(flatten)]
    pub target: Target,
}

#[async_trait]
impl Executor for Describe {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;
        let (infos, mut errors) = self.target.resolve(&state).await.map_err(Error::Resource)?;

        if infos.is_empty() && errors.is_empty() {
            eprintln!("{}", no_resources(&self.target.scope(&state)));
            return Ok(());
        }

        let now = Utc::now();
        let results = join_all(
            infos
                .iter()
                .map(|info| describer::describe(state.kube.to_owned(), info, now)),
        )
        .await;

        let mut descriptions = vec![];
        for result in results {
            match result {
                Ok(description) => descriptions.push(description),
                Err(err) => errors.push(err),
            }
        }

        print!("{}", descriptions.join("\n\n"));
        errors.into_result().map_err(Error::Aggregate)
    }
}
