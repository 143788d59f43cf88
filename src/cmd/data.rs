//! # Data module
//!
//! This module provides the `data` command which inserts, verifies or drops
//! test data in a database

use std::sync::Arc;

use async_trait::async_trait;
use clap::Subcommand;

use crate::{
    cmd::{
        connect::{self, database_tunnel},
        Context, Database, Executor,
    },
    svc::{
        database::{
            credentials,
            data::{self, Operation, Outcome, DEFAULT_ROWS},
            restarter,
        },
        http::{self, Credentials},
        k8s::{
            kind::ResourceKind,
            resource::{self, Info},
            secret::{PASSWORD_KEY, USERNAME_KEY},
            State,
        },
    },
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Connect(connect::Error),
    #[error("failed to read database, {0}")]
    Resource(resource::Error),
    #[error("{0}")]
    Ready(restarter::Error),
    #[error("failed to retrieve credentials, {0}")]
    Credentials(credentials::Error),
    #[error("failed to configure tls, {0}")]
    Tls(http::Error),
    #[error("key '{0}' is missing from the auth secret")]
    MissingKey(&'static str),
    #[error("failed to {0} data, {1}")]
    Data(&'static str, data::Error),
}

// -----------------------------------------------------------------------------
// Data enumeration

#[derive(Subcommand, Clone, Debug)]
pub enum Data {
    /// Insert test rows in a database
    #[clap(name = "insert")]
    Insert {
        #[clap(flatten)]
        database: Database,
        /// Number of rows to insert
        #[clap(long = "rows", default_value_t = DEFAULT_ROWS)]
        rows: u64,
    },
    /// Verify that a database holds at least the given number of test rows
    #[clap(name = "verify")]
    Verify {
        #[clap(flatten)]
        database: Database,
        /// Number of rows expected
        #[clap(long = "rows", default_value_t = DEFAULT_ROWS)]
        rows: u64,
    },
    /// Drop the test data of a database
    #[clap(name = "drop")]
    Drop {
        #[clap(flatten)]
        database: Database,
    },
}

impl Data {
    pub fn database(&self) -> &Database {
        match self {
            Self::Insert { database, .. }
            | Self::Verify { database, .. }
            | Self::Drop { database } => database,
        }
    }

    pub fn operation(&self) -> (Operation, u64) {
        match self {
            Self::Insert { rows, .. } => (Operation::Insert, *rows),
            Self::Verify { rows, .. } => (Operation::Verify, *rows),
            Self::Drop { .. } => (Operation::Drop, 0),
        }
    }
}

#[async_trait]
impl Executor for Data {
    type Error = Error;

    #[tracing::instrument(skip_all, fields(name = %self.database().name))]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx
            .state()
            .await
            .map_err(|err| Error::Connect(connect::Error::Client(err)))?;

        let database = self.database();
        let (operation, rows) = self.operation();
        let outcome = run(&state, database, operation, rows).await?;

        println!("{}", message(database, &outcome));
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// helpers

/// executes the operation on a ready database
async fn run(
    state: &State,
    database: &Database,
    operation: Operation,
    rows: u64,
) -> Result<Outcome, Error> {
    let info = database
        .get(state)
        .await
        .map_err(|err| Error::Connect(connect::Error::Resource(err)))?;

    restarter::ensure_ready(&info).map_err(Error::Ready)?;

    if info.kind == ResourceKind::Elasticsearch {
        return elasticsearch(state, &info, operation, rows).await;
    }

    let (tunnel, session) = connect::open(state, &info).await.map_err(Error::Connect)?;
    let outcome = data::execute(&session, operation, rows)
        .await
        .map_err(|err| Error::Data(verb(operation), err))?;

    tunnel.close();
    Ok(outcome)
}

async fn elasticsearch(
    state: &State,
    info: &Info,
    operation: Operation,
    rows: u64,
) -> Result<Outcome, Error> {
    let secret = credentials::get(state.kube.to_owned(), info)
        .await
        .map_err(Error::Credentials)?;

    let credentials = Credentials {
        username: secret
            .get(USERNAME_KEY)
            .cloned()
            .ok_or(Error::MissingKey(USERNAME_KEY))?,
        password: secret
            .get(PASSWORD_KEY)
            .cloned()
            .ok_or(Error::MissingKey(PASSWORD_KEY))?,
    };

    let (scheme, client) = if info.database().map_err(Error::Resource)?.spec.enable_ssl {
        let authority = credentials::authority(state.kube.to_owned(), info)
            .await
            .map_err(Error::Credentials)?;

        let client = http::Client::with_authority(&authority).map_err(Error::Tls)?;
        ("https", client.with_credentials(credentials))
    } else {
        ("http", http::Client::from(credentials))
    };

    let tunnel = database_tunnel(state, info).await.map_err(Error::Connect)?;
    let endpoint = format!("{}://{}", scheme, endpoint_host(tunnel.local));

    let outcome = data::execute_http(&client, &endpoint, operation, rows)
        .await
        .map_err(|err| Error::Data(verb(operation), err))?;

    tunnel.close();
    Ok(outcome)
}

/// the certificates of the database are issued for `localhost`, the tunnel
/// listens on its loopback address
pub fn endpoint_host(port: u16) -> String {
    format!("localhost:{}", port)
}

const fn verb(operation: Operation) -> &'static str {
    match operation {
        Operation::Insert => "insert",
        Operation::Verify => "verify",
        Operation::Drop => "drop",
    }
}

pub fn message(database: &Database, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Inserted(rows) => format!(
            "Successfully inserted {} rows in {} {}",
            rows, database.kind, database.name
        ),
        Outcome::Verified(rows) => format!(
            "Successfully verified {} rows in {} {}",
            rows, database.kind, database.name
        ),
        Outcome::Dropped => format!(
            "Successfully dropped test data of {} {}",
            database.kind, database.name
        ),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cmd::{Args, Command};

    fn parse(args: &[&str]) -> Data {
        let args = Args::try_parse_from(["kubectl-dba", "data"].iter().chain(args)).unwrap();
        match args.command {
            Some(Command::Data(data)) => data,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_operations() {
        let data = parse(&["insert", "pg", "pg-demo", "--rows", "500"]);
        assert_eq!(data.operation(), (Operation::Insert, 500));
        assert_eq!(data.database().kind, ResourceKind::Postgres);

        let data = parse(&["verify", "es", "es-demo", "-n", "demo"]);
        assert_eq!(data.operation(), (Operation::Verify, DEFAULT_ROWS));
        assert_eq!(data.database().namespace.as_deref(), Some("demo"));

        assert_eq!(parse(&["drop", "rd", "rd-demo"]).operation().0, Operation::Drop);
    }

    #[test]
    fn renders_outcomes() {
        let database = parse(&["drop", "mg", "mg-demo"]).database().to_owned();

        assert_eq!(
            message(&database, &Outcome::Inserted(10)),
            format!("Successfully inserted 10 rows in {} mg-demo", database.kind)
        );
        assert_eq!(
            message(&database, &Outcome::Dropped),
            format!("Successfully dropped test data of {} mg-demo", database.kind)
        );
    }

    #[tokio::test]
    async fn refuses_unready_databases() {
        use hyper::Method;
        use serde_json::json;

        use crate::svc::k8s::mock::{self, Exchange};

        let (client, server) = mock::client(vec![Exchange::new(
            Method::GET,
            "/apis/kubedb.com/v1/namespaces/demo/elasticsearches/es-demo",
            json!({
                "apiVersion": "kubedb.com/v1",
                "kind": "Elasticsearch",
                "metadata": {"name": "es-demo", "namespace": "demo"},
                "spec": {"enableSSL": true},
                "status": {"phase": "Provisioning"}
            }),
        )]);

        let database = parse(&["insert", "es", "es-demo"]).database().to_owned();
        let err = run(&mock::state(client), &database, Operation::Insert, 10)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Ready(restarter::Error::NotReady(ResourceKind::Elasticsearch, _, _))
        ));
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[test]
    fn reaches_tunnel_through_certificate_host() {
        assert_eq!(endpoint_host(9200), "localhost:9200");
    }
}
