//! # Get module
//!
//! This module provides the `get` command which lists kubedb databases

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    cmd::{no_resources, Aggregate, Context, Executor, Target},
    svc::{
        k8s::{client, resource},
        printer::{self, Format},
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
    #[error("failed to print resources, {0}")]
    Print(printer::Error),
    #[error("{0}")]
    Aggregate(Aggregate),
}

// -----------------------------------------------------------------------------
// Get structure

#[derive(clap::Args, Clone, Debug)]
pub struct Get {
    #[clap(flatten)]
    pub target: Target,
    /// Output format, one of 'wide', 'yaml', 'json' or 'name'
    #[clap(short = 'o', long = "output")]
    pub output: Option<Format>,
}

#[async_trait]
impl Executor for Get {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;
        let (infos, errors) = self.target.resolve(&state).await.map_err(Error::Resource)?;

        if infos.is_empty() && errors.is_empty() {
            eprintln!("{}", no_resources(&self.target.scope(&state)));
            return Ok(());
        }

        if !infos.is_empty() {
            let output = printer::render(
                &infos,
                self.output.unwrap_or_default(),
                self.target.all_namespaces,
                Utc::now(),
            )
            .map_err(Error::Print)?;

            print!("{}", output);
        }

        errors.into_result().map_err(Error::Aggregate)
    }
}
