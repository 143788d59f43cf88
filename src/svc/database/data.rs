//! # Data module
//!
//! This module inserts, verifies and drops test data in a database. Sql,
//! mongodb and redis databases are reached with their native client,
//! elasticsearch through its http api.

use std::{io::Write, str::FromStr};

use hyper::Method;
use serde::Deserialize;
use tracing::{debug, info};

use crate::svc::{
    database::shell::{self, Input, Session},
    http::{self, Request, RestClient},
    k8s::kind::ResourceKind,
};

// -----------------------------------------------------------------------------
// Constants

pub const SCHEMA: &str = "kubedb_cli";
pub const TABLE: &str = "kubedb_cli_test_table";
pub const COLLECTION: &str = "kubedb_cli_test";
pub const KEY_PREFIX: &str = "kubedb-cli:";
pub const INDEX: &str = "kubedb-cli-test";
pub const DEFAULT_ROWS: u64 = 100;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("rows need to be greater than 0")]
    Rows,
    #[error("failed to run database client, {0}")]
    Shell(shell::Error),
    #[error("failed to execute request on elasticsearch, {0}")]
    Http(http::Error),
    #[error("elasticsearch responded with status code {0}, {1}")]
    Status(hyper::StatusCode, String),
    #[error("failed to decode elasticsearch response, {0}")]
    Decode(serde_json::Error),
    #[error("elasticsearch rejected {0} of the indexed documents, {1}")]
    Bulk(usize, String),
    #[error("failed to write statement to a temporary file, {0}")]
    Script(std::io::Error),
    #[error("could not find a row count in output '{0}'")]
    Count(String),
    #[error("expected at least {0} rows, found {1}")]
    Verify(u64, u64),
    #[error("failed to parse operation '{0}', available options are 'insert', 'verify' or 'drop'")]
    Operation(String),
}

impl From<shell::Error> for Error {
    fn from(err: shell::Error) -> Self {
        Self::Shell(err)
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Self::Http(err)
    }
}

// -----------------------------------------------------------------------------
// Operation enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Operation {
    Insert,
    Verify,
    Drop,
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "verify" => Ok(Self::Verify),
            "drop" => Ok(Self::Drop),
            _ => Err(Error::Operation(s.to_string())),
        }
    }
}

// -----------------------------------------------------------------------------
// Outcome enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Outcome {
    Inserted(u64),
    Verified(u64),
    Dropped,
}

// -----------------------------------------------------------------------------
// statements

/// returns the statement the native client runs for the operation
pub fn statement(kind: ResourceKind, operation: Operation, rows: u64) -> Result<String, Error> {
    if operation == Operation::Insert && rows == 0 {
        return Err(Error::Rows);
    }

    let statement = match (kind, operation) {
        (ResourceKind::Postgres, Operation::Insert) => format!(
            "CREATE TABLE IF NOT EXISTS {table} (id SERIAL PRIMARY KEY, value INT NOT NULL); \
             INSERT INTO {table} (value) SELECT generate_series(1, {rows});",
            table = TABLE,
            rows = rows
        ),
        (ResourceKind::Postgres, Operation::Verify) => format!("SELECT COUNT(*) FROM {};", TABLE),
        (ResourceKind::Postgres, Operation::Drop) => format!("DROP TABLE IF EXISTS {};", TABLE),

        (ResourceKind::MySql, Operation::Insert) => format!(
            "CREATE DATABASE IF NOT EXISTS {schema}; \
             CREATE TABLE IF NOT EXISTS {schema}.{table} (id INT AUTO_INCREMENT PRIMARY KEY, value INT NOT NULL); \
             SET SESSION cte_max_recursion_depth = {depth}; \
             INSERT INTO {schema}.{table} (value) \
             WITH RECURSIVE seq (n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < {rows}) \
             SELECT n FROM seq;",
            schema = SCHEMA,
            table = TABLE,
            depth = rows.max(1000),
            rows = rows
        ),
        (ResourceKind::MariaDb, Operation::Insert) => format!(
            "CREATE DATABASE IF NOT EXISTS {schema}; \
             CREATE TABLE IF NOT EXISTS {schema}.{table} (id INT AUTO_INCREMENT PRIMARY KEY, value INT NOT NULL); \
             INSERT INTO {schema}.{table} (value) SELECT seq FROM seq_1_to_{rows};",
            schema = SCHEMA,
            table = TABLE,
            rows = rows
        ),
        (ResourceKind::MySql | ResourceKind::MariaDb, Operation::Verify) => {
            format!("SELECT COUNT(*) FROM {}.{};", SCHEMA, TABLE)
        }
        (ResourceKind::MySql | ResourceKind::MariaDb, Operation::Drop) => {
            format!("DROP DATABASE IF EXISTS {};", SCHEMA)
        }

        (ResourceKind::MongoDb, Operation::Insert) => format!(
            "var docs = []; for (var i = 1; i <= {rows}; i++) {{ docs.push({{ value: i }}); }} \
             db.getSiblingDB(\"{schema}\").getCollection(\"{collection}\").insertMany(docs); \
             print(docs.length);",
            schema = SCHEMA,
            collection = COLLECTION,
            rows = rows
        ),
        (ResourceKind::MongoDb, Operation::Verify) => format!(
            "print(db.getSiblingDB(\"{}\").getCollection(\"{}\").countDocuments({{}}));",
            SCHEMA, COLLECTION
        ),
        (ResourceKind::MongoDb, Operation::Drop) => {
            format!("db.getSiblingDB(\"{}\").dropDatabase();", SCHEMA)
        }

        (ResourceKind::Redis, Operation::Insert) => format!(
            "EVAL \"for i = 1, tonumber(ARGV[1]) do redis.call('SET', KEYS[1] .. i, i) end return tonumber(ARGV[1])\" 1 {} {}",
            KEY_PREFIX, rows
        ),
        (ResourceKind::Redis, Operation::Verify) => format!(
            "EVAL \"return #redis.call('KEYS', KEYS[1] .. '*')\" 1 {}",
            KEY_PREFIX
        ),
        (ResourceKind::Redis, Operation::Drop) => format!(
            "EVAL \"local keys = redis.call('KEYS', KEYS[1] .. '*') for _, key in ipairs(keys) do redis.call('DEL', key) end return #keys\" 1 {}",
            KEY_PREFIX
        ),

        (ResourceKind::Elasticsearch, _) => return Err(Error::Shell(shell::Error::Unsupported(kind))),
    };

    Ok(statement)
}

/// returns the first integer printed by the client, redis-cli prefixes them
/// with `(integer)` when attached to a terminal
pub fn parse_count(output: &str) -> Result<u64, Error> {
    output
        .lines()
        .map(|line| line.trim().trim_start_matches("(integer)").trim())
        .find_map(|line| line.parse::<u64>().ok())
        .ok_or_else(|| Error::Count(output.trim().to_string()))
}

// -----------------------------------------------------------------------------
// helpers

/// runs the operation with the database's native client
#[tracing::instrument(skip(session))]
pub async fn execute(session: &Session, operation: Operation, rows: u64) -> Result<Outcome, Error> {
    let statement = statement(session.kind, operation, rows)?;

    // redis-cli only understands quoted arguments when reading its standard
    // input, the script file must outlive the invocation
    let script;
    let input = if session.kind == ResourceKind::Redis {
        let mut file = tempfile::NamedTempFile::new().map_err(Error::Script)?;
        writeln!(file, "{}", statement).map_err(Error::Script)?;
        let path = file.path().to_owned();
        script = Some(file);
        Input::File(path)
    } else {
        script = None;
        Input::Command(statement)
    };

    let output = session.invocation(&input, None)?.output().await?;
    drop(script);

    debug!(output = output.as_str(), "database client output");
    outcome(operation, rows, &output)
}

fn outcome(operation: Operation, rows: u64, output: &str) -> Result<Outcome, Error> {
    match operation {
        Operation::Insert => Ok(Outcome::Inserted(rows)),
        Operation::Drop => Ok(Outcome::Dropped),
        Operation::Verify => {
            let count = parse_count(output)?;
            if count < rows {
                return Err(Error::Verify(rows, count));
            }

            info!(count = count, "Verified rows");
            Ok(Outcome::Verified(count))
        }
    }
}

// -----------------------------------------------------------------------------
// Elasticsearch

#[derive(Deserialize, Clone, Debug)]
struct Count {
    #[serde(rename = "count")]
    count: u64,
}

#[derive(Deserialize, Clone, Debug)]
struct Bulk {
    #[serde(rename = "errors")]
    errors: bool,
    #[serde(rename = "items", default)]
    items: Vec<serde_json::Value>,
}

/// checks the response of a bulk request, elasticsearch answers `200 OK` even
/// when some documents were not indexed
pub fn bulk_result(body: &[u8]) -> Result<(), Error> {
    let bulk: Bulk = serde_json::from_slice(body).map_err(Error::Decode)?;
    if !bulk.errors {
        return Ok(());
    }

    let failures: Vec<&serde_json::Value> = bulk
        .items
        .iter()
        .filter_map(|item| item.as_object()?.values().next()?.get("error"))
        .collect();

    let reason = failures
        .first()
        .map(|error| match error.get("reason").and_then(serde_json::Value::as_str) {
            Some(reason) => reason.to_string(),
            None => error.to_string(),
        })
        .unwrap_or_else(|| "unknown reason".to_string());

    Err(Error::Bulk(failures.len(), reason))
}

/// returns the bulk request body indexing the test documents
pub fn bulk_body(rows: u64) -> String {
    (1..=rows)
        .map(|i| format!("{{\"index\":{{}}}}\n{{\"value\":{}}}\n", i))
        .collect()
}

/// runs the operation against the elasticsearch http api at `endpoint`
#[tracing::instrument(skip(client))]
pub async fn execute_http(
    client: &http::Client,
    endpoint: &str,
    operation: Operation,
    rows: u64,
) -> Result<Outcome, Error> {
    let index = format!("{}/{}", endpoint, INDEX);

    match operation {
        Operation::Insert => {
            if rows == 0 {
                return Err(Error::Rows);
            }

            let (status, body) = client
                .request(
                    &Method::POST,
                    &format!("{}/_bulk?refresh=true", index),
                    Some(("application/x-ndjson", bulk_body(rows).into_bytes())),
                )
                .await?;

            if !status.is_success() {
                return Err(Error::Status(status, String::from_utf8_lossy(&body).to_string()));
            }

            bulk_result(&body)?;
            Ok(Outcome::Inserted(rows))
        }
        Operation::Verify => {
            let count: Count = client.get(&format!("{}/_count", index)).await?;
            outcome(operation, rows, &count.count.to_string())
        }
        Operation::Drop => {
            let (status, body) = client.request(&Method::DELETE, &index, None).await?;

            // Dropping a missing index is not an error
            if !status.is_success() && status != hyper::StatusCode::NOT_FOUND {
                return Err(Error::Status(status, String::from_utf8_lossy(&body).to_string()));
            }

            Ok(Outcome::Dropped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operations() {
        assert_eq!("insert".parse::<Operation>().unwrap(), Operation::Insert);
        assert_eq!("Verify".parse::<Operation>().unwrap(), Operation::Verify);
        assert!("truncate".parse::<Operation>().is_err());
    }

    #[test]
    fn rejects_empty_inserts() {
        assert!(matches!(
            statement(ResourceKind::Postgres, Operation::Insert, 0),
            Err(Error::Rows)
        ));
    }

    #[test]
    fn builds_sql_statements() {
        let insert = statement(ResourceKind::Postgres, Operation::Insert, 500).unwrap();
        assert!(insert.contains("generate_series(1, 500)"));

        let insert = statement(ResourceKind::MySql, Operation::Insert, 5000).unwrap();
        assert!(insert.contains("cte_max_recursion_depth = 5000"));
        assert!(insert.contains("WHERE n < 5000"));

        let insert = statement(ResourceKind::MariaDb, Operation::Insert, 10).unwrap();
        assert!(insert.contains("seq_1_to_10"));

        assert_eq!(
            statement(ResourceKind::MySql, Operation::Verify, 10).unwrap(),
            "SELECT COUNT(*) FROM kubedb_cli.kubedb_cli_test_table;"
        );
    }

    #[test]
    fn builds_redis_scripts() {
        let insert = statement(ResourceKind::Redis, Operation::Insert, 42).unwrap();
        assert!(insert.starts_with("EVAL \""));
        assert!(insert.ends_with("1 kubedb-cli: 42"));
    }

    #[test]
    fn elasticsearch_goes_through_http() {
        assert!(statement(ResourceKind::Elasticsearch, Operation::Verify, 1).is_err());
        assert_eq!(
            bulk_body(2),
            "{\"index\":{}}\n{\"value\":1}\n{\"index\":{}}\n{\"value\":2}\n"
        );
    }

    #[test]
    fn fails_on_rejected_bulk_documents() {
        assert!(bulk_result(br#"{"took": 3, "errors": false, "items": []}"#).is_ok());

        let rejected = br#"{
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 201}},
                {"index": {"_id": "2", "status": 429, "error": {
                    "type": "es_rejected_execution_exception",
                    "reason": "rejected execution of bulk"
                }}},
                {"index": {"_id": "3", "status": 429, "error": {
                    "type": "es_rejected_execution_exception",
                    "reason": "rejected execution of bulk"
                }}}
            ]
        }"#;

        match bulk_result(rejected) {
            Err(Error::Bulk(count, reason)) => {
                assert_eq!(count, 2);
                assert_eq!(reason, "rejected execution of bulk");
            }
            other => panic!("unexpected result {:?}", other),
        }

        assert!(matches!(bulk_result(b"not json"), Err(Error::Decode(_))));
    }

    #[test]
    fn parses_client_counts() {
        assert_eq!(parse_count(" count \n-------\n   100\n(1 row)\n").unwrap(), 100);
        assert_eq!(parse_count("COUNT(*)\n250\n").unwrap(), 250);
        assert_eq!(parse_count("(integer) 7\n").unwrap(), 7);
        assert!(parse_count("ERROR: relation does not exist").is_err());
    }

    #[test]
    fn verifies_row_counts() {
        assert_eq!(
            outcome(Operation::Verify, 100, "120").unwrap(),
            Outcome::Verified(120)
        );
        assert!(matches!(
            outcome(Operation::Verify, 100, "99"),
            Err(Error::Verify(100, 99))
        ));
    }
}
