//! # Exec module
//!
//! This module provides the `exec` command which runs a command or a script on
//! a database

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::ArgGroup;

use crate::{
    cmd::{
        connect::{self, session},
        Context, Database, Executor,
    },
    svc::database::shell::{self, Input},
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Connect(connect::Error),
    #[error("failed to run database client, {0}")]
    Shell(shell::Error),
}

// -----------------------------------------------------------------------------
// Exec structure

#[derive(clap::Args, Clone, Debug)]
#[clap(group(ArgGroup::new("input").required(true).args(["command", "file"])))]
pub struct Exec {
    #[clap(flatten)]
    pub database: Database,
    /// Command to execute
    #[clap(short = 'c', long = "command")]
    pub command: Option<String>,
    /// Script to execute
    #[clap(short = 'f', long = "file")]
    pub file: Option<PathBuf>,
    /// Name of the logical database to run the command on
    #[clap(short = 'd', long = "database")]
    pub dbname: Option<String>,
}

impl Exec {
    pub fn input(&self) -> Input {
        match (&self.command, &self.file) {
            (Some(command), _) => Input::Command(command.to_owned()),
            (None, Some(file)) => Input::File(file.to_owned()),
            (None, None) => Input::Interactive,
        }
    }
}

#[async_trait]
impl Executor for Exec {
    type Error = Error;

    #[tracing::instrument(skip_all, fields(name = %self.database.name))]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx
            .state()
            .await
            .map_err(|err| Error::Connect(connect::Error::Client(err)))?;

        let (tunnel, session) = session(&state, &self.database)
            .await
            .map_err(Error::Connect)?;

        session
            .invocation(&self.input(), self.dbname.as_deref())
            .map_err(Error::Shell)?
            .run()
            .await
            .map_err(Error::Shell)?;

        tunnel.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cmd::{Args, Command};

    fn parse(args: &[&str]) -> Result<Exec, clap::Error> {
        let args = Args::try_parse_from(["kubectl-dba", "exec"].iter().chain(args))?;
        match args.command {
            Some(Command::Exec(exec)) => Ok(exec),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn requires_a_command_or_a_file() {
        assert!(parse(&["pg", "pg-demo"]).is_err());
        assert!(parse(&["pg", "pg-demo", "-c", "select 1", "-f", "a.sql"]).is_err());

        let exec = parse(&["pg", "pg-demo", "-c", "select 1", "-d", "app"]).unwrap();
        assert_eq!(exec.input(), Input::Command("select 1".into()));
        assert_eq!(exec.dbname.as_deref(), Some("app"));

        let exec = parse(&["my", "my-demo", "-f", "seed.sql"]).unwrap();
        assert_eq!(exec.input(), Input::File("seed.sql".into()));
    }
}
