//! # Edit module
//!
//! This module provides the `edit` command

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    cmd::{Aggregate, Context, Executor},
    svc::{
        editor::{self, Format},
        k8s::{
            client,
            resource::{self, Scope, Selection},
        },
        printer,
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
    #[error("a name must be given for every resource to edit")]
    MissingNames,
    #[error("{0}")]
    Aggregate(Aggregate),
}

// -----------------------------------------------------------------------------
// Edit structure

#[derive(clap::Args, Clone, Debug)]
pub struct Edit {
    /// Resources in `TYPE NAME...` or `TYPE/NAME...` form
    #[clap(name = "resources", required = true)]
    pub resources: Vec<String>,
    /// Namespace of the resources, default to the one of the kubeconfig context
    #[clap(short = 'n', long = "namespace")]
    pub namespace: Option<String>,
    /// Format used to edit the resources, one of 'yaml' or 'json'
    #[clap(short = 'o', long = "output")]
    pub output: Option<Format>,
}

#[async_trait]
impl Executor for Edit {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let selections = Selection::parse(&self.resources).map_err(Error::Resource)?;
        if selections.iter().any(|selection| selection.names.is_empty()) {
            return Err(Error::MissingNames);
        }

        let state = ctx.state().await.map_err(Error::Client)?;
        let scope = Scope {
            namespace: state.namespace(&self.namespace),
            all_namespaces: false,
            selector: None,
        };

        let (infos, errs) = resource::resolve(&state.kube, &scope, &selections).await;
        let mut errors = Aggregate::default();
        errs.iter().for_each(|err| errors.push(err));

        let command = editor::command(&state.config.editor);
        for info in &infos {
            match editor::edit(state.kube.to_owned(), info, &command, self.output.unwrap_or_default()).await {
                Ok(Some(_)) => println!("{} edited", printer::name(info)),
                Ok(None) => println!("Edit cancelled, no changes made."),
                Err(err) => errors.push(err),
            }
        }

        errors.into_result().map_err(Error::Aggregate)
    }
}
