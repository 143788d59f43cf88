//! # KubeDB command line interface
//!
//! A kubectl plugin to manage kubedb databases through their custom resource
//! definition

use std::{convert::TryFrom, sync::Arc};

use clap::{CommandFactory, Parser};
use tracing::{debug, error};

use crate::{
    cmd::{Args, Context, Executor},
    svc::cfg::Configuration,
};

pub mod cmd;
pub mod logging;
pub mod svc;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to interact with command line interface, {0}")]
    Command(cmd::Error),
    #[error("failed to initialize logging system, {0}")]
    Logging(logging::Error),
    #[error("failed to load configuration, {0}")]
    Configuration(svc::cfg::Error),
    #[error("failed to print help, {0}")]
    Help(std::io::Error),
}

impl From<cmd::Error> for Error {
    fn from(err: cmd::Error) -> Self {
        Self::Command(err)
    }
}

impl From<logging::Error> for Error {
    fn from(err: logging::Error) -> Self {
        Self::Logging(err)
    }
}

impl From<svc::cfg::Error> for Error {
    fn from(err: svc::cfg::Error) -> Self {
        Self::Configuration(err)
    }
}

// -----------------------------------------------------------------------------
// main entrypoint

#[tokio::main]
pub(crate) async fn main() -> Result<(), Error> {
    let args = Args::parse();

    logging::initialize(args.verbosity as usize)?;
    let config = Arc::new(match &args.config {
        Some(path) => Configuration::try_from(path.to_owned())?,
        None => Configuration::try_default()?,
    });

    config.help();
    if args.check {
        println!("{} configuration is healthy!", env!("CARGO_PKG_NAME"));
        return Ok(());
    }

    let command = match &args.command {
        Some(command) => command,
        None => return Args::command().print_help().map_err(Error::Help),
    };

    let ctx = Arc::new(Context {
        config,
        kubeconfig: args.kubeconfig.to_owned(),
        context: args.context.to_owned(),
    });

    if let Err(err) = command.execute(ctx).await.map_err(Error::Command) {
        error!(
            error = err.to_string(),
            "could not execute {} properly",
            env!("CARGO_PKG_NAME"),
        );

        return Err(err);
    }

    debug!("{} halted!", env!("CARGO_PKG_NAME"));
    Ok(())
}
