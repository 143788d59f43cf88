//! # Connect module
//!
//! This module provides the `connect` command which opens an interactive
//! shell to a database

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::{
    cmd::{Context, Database, Executor},
    svc::{
        database::shell::{self, Input, Session},
        k8s::{
            client,
            kind::ResourceKind,
            resource::{self, Info},
            tunnel::{self, Target, Tunnel},
            State,
        },
    },
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to retrieve database, {0}")]
    Resource(resource::Error),
    #[error("failed to open tunnel to the database, {0}")]
    Tunnel(tunnel::Error),
    #[error("failed to run database client, {0}")]
    Shell(shell::Error),
}

impl From<shell::Error> for Error {
    fn from(err: shell::Error) -> Self {
        Self::Shell(err)
    }
}

// -----------------------------------------------------------------------------
// Connect structure

#[derive(clap::Args, Clone, Debug)]
pub struct Connect {
    #[clap(flatten)]
    pub database: Database,
    /// Name of the logical database to connect to
    #[clap(short = 'd', long = "database")]
    pub dbname: Option<String>,
}

#[async_trait]
impl Executor for Connect {
    type Error = Error;

    #[tracing::instrument(skip_all, fields(name = %self.database.name))]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;
        let (tunnel, session) = session(&state, &self.database).await?;

        session
            .invocation(&Input::Interactive, self.dbname.as_deref())?
            .run()
            .await?;

        tunnel.close();
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// helpers

/// opens a tunnel to the database service and reads what its native client
/// needs, the session is usable as long as the tunnel lives
pub async fn session(state: &State, database: &Database) -> Result<(Tunnel, Session), Error> {
    if database.kind == ResourceKind::Elasticsearch {
        return Err(Error::Shell(shell::Error::Unsupported(database.kind)));
    }

    let info = database.get(state).await.map_err(Error::Resource)?;
    open(state, &info).await
}

/// opens a tunnel and a session to an already retrieved database
pub async fn open(state: &State, info: &Info) -> Result<(Tunnel, Session), Error> {
    let tunnel = database_tunnel(state, info).await?;
    let session = Session::try_new(state.kube.to_owned(), info, tunnel.local).await?;

    Ok((tunnel, session))
}

/// opens a tunnel to the service named after the database
pub async fn database_tunnel(state: &State, info: &Info) -> Result<Tunnel, Error> {
    let tunnel = Tunnel::open(
        state.kube.to_owned(),
        &info.namespace(),
        Target::Service(info.name()),
        info.kind.database_port(),
    )
    .await
    .map_err(Error::Tunnel)?;

    info!(
        kind = info.kind.kind(),
        namespace = info.namespace().as_str(),
        name = info.name().as_str(),
        address = tunnel.address().as_str(),
        "Opened tunnel to database"
    );

    Ok(tunnel)
}
