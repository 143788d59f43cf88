//! # Describer module
//!
//! This module renders a detailed description of a kubedb database with the
//! pods and services the operator created for it

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{api::ListParams, Api, Client, ResourceExt};
use prettytable::{format::consts::FORMAT_CLEAN, Row, Table};
use tracing::debug;

use crate::svc::{
    database::pauser::DATABASE_PAUSED,
    k8s::resource::{self, Info},
    printer,
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read database, {0}")]
    Resource(resource::Error),
    #[error("failed to list {0} of '{1}/{2}', {3}")]
    List(&'static str, String, String, kube::Error),
}

// -----------------------------------------------------------------------------
// Writer structure

/// accumulates `Key: value` lines aligned on their value
#[derive(Clone, Debug, Default)]
struct Writer {
    output: String,
}

impl Writer {
    const WIDTH: usize = 20;

    fn line(&mut self, level: usize, key: &str, value: &str) {
        let indent = "  ".repeat(level);
        let key = format!("{}:", key);
        let width = Self::WIDTH.saturating_sub(indent.len());

        self.output
            .push_str(format!("{}{:<width$}{}", indent, key, value, width = width).trim_end());
        self.output.push('\n');
    }

    fn map(&mut self, level: usize, key: &str, values: &BTreeMap<String, String>) {
        if values.is_empty() {
            return self.line(level, key, printer::NONE);
        }

        for (i, (k, v)) in values.iter().enumerate() {
            let value = format!("{}={}", k, v);
            match i {
                0 => self.line(level, key, &value),
                _ => self.output.push_str(&format!(
                    "{}{}\n",
                    " ".repeat(Self::WIDTH + 2 * level),
                    value
                )),
            }
        }
    }

    /// writes a titled table indented under the title
    fn table(&mut self, title: &str, header: &[&str], rows: Vec<Vec<String>>) {
        self.output.push_str(&format!("\n{}:\n", title));
        if rows.is_empty() {
            self.output.push_str(&format!("  {}\n", printer::NONE));
            return;
        }

        let mut table = Table::new();
        table.set_format(*FORMAT_CLEAN);
        table.set_titles(Row::from(header));
        for row in rows {
            table.add_row(Row::from(row));
        }

        for line in table.to_string().lines() {
            self.output.push_str(&format!("  {}\n", line.trim_end()));
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

/// fetches the pods and services of the database and describes it
#[tracing::instrument(skip(client, info), fields(name = %info.name(), namespace = %info.namespace()))]
pub async fn describe(client: Client, info: &Info, now: DateTime<Utc>) -> Result<String, Error> {
    let (namespace, name) = (info.namespace(), info.name());
    let selector = resource::selector(&resource::instance_labels(&name));
    let params = ListParams::default().labels(&selector);

    debug!(namespace = &namespace, selector = &selector, "execute a request to list pods");
    let pods: Api<Pod> = Api::namespaced(client.to_owned(), &namespace);
    let pods = pods
        .list(&params)
        .await
        .map_err(|err| Error::List("pods", namespace.to_owned(), name.to_owned(), err))?;

    debug!(namespace = &namespace, selector = &selector, "execute a request to list services");
    let services: Api<Service> = Api::namespaced(client, &namespace);
    let services = services
        .list(&params)
        .await
        .map_err(|err| Error::List("services", namespace.to_owned(), name.to_owned(), err))?;

    render(info, &pods.items, &services.items, now)
}

pub fn render(
    info: &Info,
    pods: &[Pod],
    services: &[Service],
    now: DateTime<Utc>,
) -> Result<String, Error> {
    let database = info.database().map_err(Error::Resource)?;
    let meta = &info.object.metadata;
    let mut w = Writer::default();

    w.line(0, "Name", &info.name());
    w.line(0, "Namespace", &info.namespace());
    w.line(
        0,
        "CreationTimestamp",
        &meta
            .creation_timestamp
            .as_ref()
            .map(|t| format!("{} ({} ago)", t.0.format("%a, %d %b %Y %H:%M:%S %z"), printer::age(info, now)))
            .unwrap_or_else(|| printer::UNKNOWN.to_string()),
    );
    w.map(0, "Labels", &info.object.labels().to_owned());
    w.map(0, "Annotations", &info.object.annotations().to_owned());

    if let Some(replicas) = database.spec.replicas {
        w.line(0, "Replicas", &format!("{}  total", replicas));
    }

    w.line(0, "Version", database.spec.version.as_deref().unwrap_or_default());
    w.line(0, "Status", database.status.phase.as_deref().unwrap_or_default());
    w.line(0, "StorageType", database.spec.storage_type.as_deref().unwrap_or("Durable"));
    if let Some(size) = database.storage_size() {
        w.line(0, "Volume", "");
        w.line(1, "Capacity", size);
    }

    w.line(
        0,
        "Paused",
        &resource::has_condition(&database.status.conditions, DATABASE_PAUSED).to_string(),
    );
    w.line(0, "DeletionPolicy", database.deletion_policy().unwrap_or_default());

    if let Some(secret) = database.spec.auth_secret.as_ref().and_then(|s| s.name.as_deref()) {
        w.line(0, "Auth Secret", "");
        w.line(1, "Name", secret);
    }

    w.table(
        "Pods",
        &["NAME", "STATUS", "AGE"],
        pods.iter()
            .map(|pod| {
                vec![
                    pod.name_any(),
                    pod.status
                        .as_ref()
                        .and_then(|status| status.phase.to_owned())
                        .unwrap_or_default(),
                    pod.metadata
                        .creation_timestamp
                        .as_ref()
                        .map(|t| printer::short_duration(now - t.0))
                        .unwrap_or_else(|| printer::UNKNOWN.to_string()),
                ]
            })
            .collect(),
    );

    w.table(
        "Services",
        &["NAME", "TYPE", "CLUSTER-IP", "PORTS"],
        services
            .iter()
            .map(|service| {
                let spec = service.spec.to_owned().unwrap_or_default();
                let ports = spec
                    .ports
                    .unwrap_or_default()
                    .iter()
                    .map(|p| format!("{}/{}", p.port, p.protocol.as_deref().unwrap_or("TCP")))
                    .collect::<Vec<_>>()
                    .join(",");

                vec![
                    service.name_any(),
                    spec.type_.unwrap_or_else(|| "ClusterIP".to_string()),
                    spec.cluster_ip.unwrap_or_else(|| printer::NONE.to_string()),
                    ports,
                ]
            })
            .collect(),
    );

    w.table(
        "Conditions",
        &["TYPE", "STATUS", "REASON", "MESSAGE", "LAST TRANSITION"],
        database
            .status
            .conditions
            .iter()
            .map(|c| {
                vec![
                    c.kind.to_owned(),
                    c.status.to_owned(),
                    c.reason.to_owned().unwrap_or_default(),
                    c.message.to_owned().unwrap_or_default(),
                    c.last_transition_time.to_owned().unwrap_or_default(),
                ]
            })
            .collect(),
    );

    Ok(w.output)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use k8s_openapi::{
        api::core::v1::{PodStatus, ServicePort, ServiceSpec},
        apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time},
    };
    use kube::api::DynamicObject;
    use serde_json::json;

    use super::*;
    use crate::svc::k8s::kind::ResourceKind;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn info() -> Info {
        let mut object = DynamicObject::new("pg-demo", &ResourceKind::Postgres.api_resource())
            .within("demo")
            .data(json!({
                "spec": {
                    "version": "16.1",
                    "replicas": 3,
                    "authSecret": {"name": "pg-demo-auth"},
                    "storageType": "Durable",
                    "storage": {"resources": {"requests": {"storage": "1Gi"}}},
                    "deletionPolicy": "Delete"
                },
                "status": {
                    "phase": "Ready",
                    "conditions": [
                        {"type": "DatabasePaused", "status": "True", "reason": "PausedByUser", "message": "paused"}
                    ]
                }
            }));

        object.metadata.creation_timestamp = Some(Time(now() - Duration::days(2)));
        object.metadata.labels = Some(BTreeMap::from([
            ("team".to_string(), "data".to_string()),
            ("tier".to_string(), "db".to_string()),
        ]));
        Info {
            kind: ResourceKind::Postgres,
            object,
        }
    }

    #[test]
    fn describes_database_fields() {
        let output = render(&info(), &[], &[], now()).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines[0], format!("{:<20}{}", "Name:", "pg-demo"));
        assert!(lines[2].contains("(2d ago)"));
        assert_eq!(lines[3], format!("{:<20}{}", "Labels:", "team=data"));
        assert_eq!(lines[4], format!("{}{}", " ".repeat(20), "tier=db"));
        assert!(output.contains(&format!("{:<20}{}\n", "Annotations:", "<none>")));
        assert!(output.contains(&format!("{:<20}{}\n", "Replicas:", "3  total")));
        assert!(output.contains(&format!("  {:<18}{}\n", "Capacity:", "1Gi")));
        assert!(output.contains(&format!("{:<20}{}\n", "Paused:", "true")));
        assert!(output.contains(&format!("{:<20}{}\n", "DeletionPolicy:", "Delete")));
        assert!(output.contains(&format!("  {:<18}{}\n", "Name:", "pg-demo-auth")));
        assert!(output.contains("\nPods:\n  <none>\n"));
    }

    #[test]
    fn describes_pods_services_and_conditions() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("pg-demo-0".into()),
                creation_timestamp: Some(Time(now() - Duration::minutes(3))),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let service = Service {
            metadata: ObjectMeta {
                name: Some("pg-demo".into()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some("10.0.0.12".into()),
                ports: Some(vec![ServicePort {
                    port: 5432,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let output = render(&info(), &[pod], &[service], now()).unwrap();
        let words: Vec<Vec<&str>> = output
            .lines()
            .map(|line| line.split_whitespace().collect())
            .collect();

        assert!(words.contains(&vec!["pg-demo-0", "Running", "3m"]));
        assert!(words.contains(&vec!["pg-demo", "ClusterIP", "10.0.0.12", "5432/TCP"]));
        assert!(words.contains(&vec!["DatabasePaused", "True", "PausedByUser", "paused"]));
    }
}
