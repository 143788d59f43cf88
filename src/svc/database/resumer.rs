//! # Resumer module
//!
//! This module resumes a paused database, its backups and archiver

use kube::Client;
use tracing::info;

use crate::svc::{
    crd::backup,
    database::pauser::{self, Error, Options, Outcome, DATABASE_PAUSED},
    k8s::resource::{self, Info},
};

#[tracing::instrument(skip(client, info), fields(name = %info.name(), namespace = %info.namespace()))]
pub async fn resume(client: Client, info: &Info, opts: Options) -> Result<Outcome, Error> {
    let mut outcome = Outcome::default();

    if !opts.only_backup {
        let mut conditions = info.database()?.status.conditions;

        // Nothing to write when the database is not paused
        if resource::remove_condition(&mut conditions, DATABASE_PAUSED) {
            pauser::write_conditions(client.to_owned(), info, &conditions).await?;
        }

        outcome.database = true;
    }

    if !opts.only_db {
        outcome.backups = Some(
            backup::set_paused(client.to_owned(), &info.namespace(), &info.name(), false).await?,
        );
        outcome.archiver = pauser::set_archiver_paused(client, info, false).await?;
    }

    info!(outcome = ?outcome, "Resumed database");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use hyper::Method;
    use kube::api::DynamicObject;
    use serde_json::{json, Value};

    use super::*;
    use crate::svc::k8s::{
        kind::ResourceKind,
        mock::{self, Exchange},
    };

    const STATUS: &str = "/apis/kubedb.com/v1/namespaces/demo/mongodbs/mg-demo/status";

    fn info(data: Value) -> Info {
        Info {
            kind: ResourceKind::MongoDb,
            object: DynamicObject::new("mg-demo", &ResourceKind::MongoDb.api_resource())
                .within("demo")
                .data(data),
        }
    }

    fn only_db() -> Options {
        Options {
            only_db: true,
            only_backup: false,
        }
    }

    #[tokio::test]
    async fn removes_paused_condition() {
        let data = json!({"status": {"conditions": [
            {"type": "Ready", "status": "True"},
            {"type": "DatabasePaused", "status": "True", "reason": "PausedByUser"}
        ]}});

        let (client, server) = mock::client(vec![Exchange::new(
            Method::PATCH,
            STATUS,
            json!({
                "apiVersion": "kubedb.com/v1",
                "kind": "MongoDB",
                "metadata": {"name": "mg-demo", "namespace": "demo"}
            }),
        )]);

        let outcome = resume(client, &info(data), only_db()).await.unwrap();
        assert!(outcome.database);
        assert_eq!(outcome.backups, None);

        let requests = server.await.unwrap();
        assert_eq!(
            requests[0].body,
            json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}})
        );
    }

    #[tokio::test]
    async fn skips_status_write_when_not_paused() {
        let (client, server) = mock::client(vec![]);
        let data = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});

        assert!(resume(client, &info(data), only_db()).await.unwrap().database);
        assert!(server.await.unwrap().is_empty());
    }
}
