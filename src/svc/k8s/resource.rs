//! # Resource module
//!
//! This module provide helpers to select kubedb resources from command line
//! arguments, fetch them and read the few fields the command line interface
//! cares about.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::{
    api::{DynamicObject, ListParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::svc::k8s::kind::{self, ResourceKind};

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_NAMESPACE: &str = "default";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const PHASE_READY: &str = "Ready";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("you must specify the type of resource, valid resource types include: {0}")]
    MissingType(String),
    #[error("there is no need to specify a resource type as a separate argument when passing arguments in resource/name form (e.g. 'dba get resource/<resource_name>' instead of 'dba get resource resource/<resource_name>'")]
    MixedForms,
    #[error("arguments in resource/name form must have a single resource and name, got '{0}'")]
    InvalidReference(String),
    #[error("{0}")]
    Kind(kind::Error),
    #[error("failed to decode {0} '{1}', {2}")]
    Decode(ResourceKind, String, serde_json::Error),
    #[error("failed to execute request on kubernetes api, {0}")]
    Kube(kube::Error),
}

impl From<kind::Error> for Error {
    fn from(err: kind::Error) -> Self {
        Self::Kind(err)
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::Kube(err)
    }
}

// -----------------------------------------------------------------------------
// Selection structure

/// a resource type and the names requested for it, no name means every
/// object of that type
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Selection {
    pub kind: ResourceKind,
    pub names: Vec<String>,
}

impl Selection {
    /// parses positional arguments using the `TYPE[,TYPE...] [NAME...]` or the
    /// `TYPE/NAME...` grammar
    pub fn parse(args: &[String]) -> Result<Vec<Self>, Error> {
        let first = match args.first() {
            Some(first) => first,
            None => return Err(Error::MissingType(valid_types())),
        };

        if first.contains('/') {
            return args
                .iter()
                .map(|arg| {
                    let (kind, name) = arg
                        .split_once('/')
                        .ok_or(Error::MixedForms)?;

                    if kind.is_empty() || name.is_empty() || name.contains('/') {
                        return Err(Error::InvalidReference(arg.to_owned()));
                    }

                    Ok(Self {
                        kind: kind.parse()?,
                        names: vec![name.to_string()],
                    })
                })
                .collect();
        }

        let names: Vec<String> = args[1..].to_vec();
        if names.iter().any(|name| name.contains('/')) {
            return Err(Error::MixedForms);
        }

        first
            .split(',')
            .filter(|kind| !kind.is_empty())
            .map(|kind| {
                Ok(Self {
                    kind: kind.parse()?,
                    names: names.to_owned(),
                })
            })
            .collect()
    }
}

/// returns the comma separated list of every supported resource type
pub fn valid_types() -> String {
    ResourceKind::ALL
        .iter()
        .map(ResourceKind::singular)
        .collect::<Vec<_>>()
        .join(", ")
}

// -----------------------------------------------------------------------------
// Scope structure

/// where to look for resources
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Scope {
    pub namespace: String,
    pub all_namespaces: bool,
    pub selector: Option<String>,
}

impl Scope {
    pub fn api(&self, client: Client, kind: ResourceKind) -> Api<DynamicObject> {
        if self.all_namespaces {
            Api::all_with(client, &kind.api_resource())
        } else {
            Api::namespaced_with(client, &self.namespace, &kind.api_resource())
        }
    }

    pub fn list_params(&self) -> ListParams {
        match &self.selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        }
    }
}

// -----------------------------------------------------------------------------
// Info structure

/// a fetched kubedb object and its kind
#[derive(Clone, Debug)]
pub struct Info {
    pub kind: ResourceKind,
    pub object: DynamicObject,
}

impl Info {
    pub fn name(&self) -> String {
        self.object.name_any()
    }

    pub fn namespace(&self) -> String {
        self.object
            .namespace()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }

    pub fn database(&self) -> Result<Database, Error> {
        Database::from_object(self.kind, &self.object)
    }
}

/// fetches every object matching the selections, failures on named objects
/// do not prevent the others from being fetched
pub async fn resolve(
    client: &Client,
    scope: &Scope,
    selections: &[Selection],
) -> (Vec<Info>, Vec<Error>) {
    let mut infos = vec![];
    let mut errors = vec![];

    for selection in selections {
        // Named objects are always looked up in the selected namespace
        let api: Api<DynamicObject> = Api::namespaced_with(
            client.to_owned(),
            &scope.namespace,
            &selection.kind.api_resource(),
        );

        if selection.names.is_empty() {
            debug!(
                kind = selection.kind.kind(),
                namespace = &scope.namespace,
                all_namespaces = scope.all_namespaces,
                "execute a request to list resources"
            );

            match scope
                .api(client.to_owned(), selection.kind)
                .list(&scope.list_params())
                .await
            {
                Ok(list) => infos.extend(list.items.into_iter().map(|object| Info {
                    kind: selection.kind,
                    object,
                })),
                Err(err) => errors.push(Error::Kube(err)),
            }

            continue;
        }

        for name in &selection.names {
            debug!(
                kind = selection.kind.kind(),
                namespace = &scope.namespace,
                name = name,
                "execute a request to retrieve resource"
            );

            match api.get(name).await {
                Ok(object) => infos.push(Info {
                    kind: selection.kind,
                    object,
                }),
                Err(err) => errors.push(Error::Kube(err)),
            }
        }
    }

    (infos, errors)
}

/// fetches a single kubedb object
pub async fn get(
    client: Client,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> Result<Info, Error> {
    let api: Api<DynamicObject> = Api::namespaced_with(client, namespace, &kind.api_resource());

    debug!(
        kind = kind.kind(),
        namespace = namespace,
        name = name,
        "execute a request to retrieve resource"
    );
    let object = api.get(name).await?;

    Ok(Info { kind, object })
}

/// make a merge patch request on the given object's status
pub async fn patch_status(
    client: Client,
    info: &Info,
    patch: &Value,
) -> Result<DynamicObject, kube::Error> {
    let (namespace, name) = (info.namespace(), info.name());
    let api: Api<DynamicObject> =
        Api::namespaced_with(client, &namespace, &info.kind.api_resource());

    debug!(
        kind = info.kind.kind(),
        namespace = &namespace,
        name = &name,
        patch = patch.to_string(),
        "execute patch request on resource's status"
    );
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(patch))
        .await
}

/// returns the labels put by the operator on every object it creates for the
/// given database
pub fn instance_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INSTANCE_LABEL.to_string(), name.to_string()),
        (MANAGED_BY_LABEL.to_string(), kind::GROUP.to_string()),
    ])
}

/// renders labels as a label selector, e.g. `a=b,c=d`
pub fn selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

// -----------------------------------------------------------------------------
// Database structures

/// the fields of a kubedb database read by the command line interface
#[derive(Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Database {
    #[serde(rename = "spec", default)]
    pub spec: DatabaseSpec,
    #[serde(rename = "status", default)]
    pub status: DatabaseStatus,
}

impl Database {
    pub fn from_object(kind: ResourceKind, obj: &DynamicObject) -> Result<Self, Error> {
        serde_json::from_value(obj.data.to_owned())
            .map_err(|err| Error::Decode(kind, obj.name_any(), err))
    }

    pub fn ready(&self) -> bool {
        self.status.phase.as_deref() == Some(PHASE_READY)
    }

    pub fn deletion_policy(&self) -> Option<&str> {
        self.spec
            .deletion_policy
            .as_deref()
            .or(self.spec.termination_policy.as_deref())
    }

    pub fn storage_size(&self) -> Option<&str> {
        self.spec
            .storage
            .as_ref()
            .and_then(|storage| storage.resources.as_ref())
            .and_then(|resources| resources.requests.get("storage"))
            .map(String::as_str)
    }
}

#[derive(Deserialize, PartialEq, Clone, Debug, Default)]
pub struct DatabaseSpec {
    #[serde(rename = "version")]
    pub version: Option<String>,
    #[serde(rename = "replicas")]
    pub replicas: Option<i64>,
    #[serde(rename = "authSecret")]
    pub auth_secret: Option<LocalObjectReference>,
    #[serde(rename = "storageType")]
    pub storage_type: Option<String>,
    #[serde(rename = "storage")]
    pub storage: Option<Storage>,
    #[serde(rename = "deletionPolicy")]
    pub deletion_policy: Option<String>,
    #[serde(rename = "terminationPolicy")]
    pub termination_policy: Option<String>,
    #[serde(rename = "archiver")]
    pub archiver: Option<Archiver>,
    #[serde(rename = "enableSSL", default)]
    pub enable_ssl: bool,
    #[serde(rename = "tls")]
    pub tls: Option<TlsConfig>,
}

impl DatabaseSpec {
    /// returns the configuration of the certificate with the given alias
    pub fn certificate(&self, alias: &str) -> Option<&CertificateSpec> {
        self.tls
            .as_ref()?
            .certificates
            .iter()
            .find(|certificate| certificate.alias == alias)
    }
}

#[derive(Deserialize, PartialEq, Clone, Debug, Default)]
pub struct TlsConfig {
    #[serde(rename = "issuerRef")]
    pub issuer_ref: Option<IssuerRef>,
    #[serde(rename = "certificates", default)]
    pub certificates: Vec<CertificateSpec>,
}

#[derive(Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct IssuerRef {
    #[serde(rename = "apiGroup")]
    pub api_group: Option<String>,
    #[serde(rename = "kind", default)]
    pub kind: String,
    #[serde(rename = "name", default)]
    pub name: String,
}

#[derive(Deserialize, PartialEq, Clone, Debug, Default)]
pub struct CertificateSpec {
    #[serde(rename = "alias", default)]
    pub alias: String,
    #[serde(rename = "secretName")]
    pub secret_name: Option<String>,
    #[serde(rename = "issuerRef")]
    pub issuer_ref: Option<IssuerRef>,
    #[serde(rename = "subject")]
    pub subject: Option<serde_json::Value>,
    #[serde(rename = "duration")]
    pub duration: Option<String>,
    #[serde(rename = "renewBefore")]
    pub renew_before: Option<String>,
    #[serde(rename = "dnsNames", default)]
    pub dns_names: Vec<String>,
    #[serde(rename = "ipAddresses", default)]
    pub ip_addresses: Vec<String>,
    #[serde(rename = "uris", default)]
    pub uris: Vec<String>,
    #[serde(rename = "emailAddresses", default)]
    pub email_addresses: Vec<String>,
}

#[derive(Deserialize, PartialEq, Clone, Debug, Default)]
pub struct LocalObjectReference {
    #[serde(rename = "name")]
    pub name: Option<String>,
}

#[derive(Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Storage {
    #[serde(rename = "resources")]
    pub resources: Option<StorageResources>,
}

#[derive(Deserialize, PartialEq, Clone, Debug, Default)]
pub struct StorageResources {
    #[serde(rename = "requests", default)]
    pub requests: BTreeMap<String, String>,
}

#[derive(Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Archiver {
    #[serde(rename = "ref")]
    pub reference: Option<ObjectReference>,
}

#[derive(Deserialize, PartialEq, Clone, Debug, Default)]
pub struct ObjectReference {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "namespace")]
    pub namespace: Option<String>,
}

#[derive(Deserialize, PartialEq, Clone, Debug, Default)]
pub struct DatabaseStatus {
    #[serde(rename = "phase")]
    pub phase: Option<String>,
    #[serde(rename = "conditions", default)]
    pub conditions: Vec<Condition>,
}

// -----------------------------------------------------------------------------
// Condition structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "status")]
    pub status: String,
    #[serde(rename = "reason", skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "message", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(kind: &str, reason: &str, message: String, now: DateTime<Utc>) -> Self {
        Self {
            kind: kind.to_string(),
            status: "True".to_string(),
            reason: Some(reason.to_string()),
            message: Some(message),
            last_transition_time: Some(now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            observed_generation: None,
        }
    }
}

/// replaces the condition of the same type or appends it, the transition time
/// is kept when the status does not change
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.kind == condition.kind) {
        Some(existing) if existing.status == condition.status => {
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
        }
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// removes every condition of the given type, returns if one was removed
pub fn remove_condition(conditions: &mut Vec<Condition>, kind: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.kind != kind);
    before != conditions.len()
}

pub fn has_condition(conditions: &[Condition], kind: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.kind == kind && c.status == "True")
}

/// returns the topology of the database as displayed by `get -o wide`
pub fn mode(kind: ResourceKind, obj: &DynamicObject) -> String {
    let spec = &obj.data["spec"];
    let mode = match kind {
        ResourceKind::Postgres | ResourceKind::MySql | ResourceKind::MariaDb => {
            spec["topology"]["mode"].as_str().map(str::to_string)
        }
        ResourceKind::Redis => spec["mode"].as_str().map(str::to_string),
        ResourceKind::MongoDb if !spec["shardTopology"].is_null() => Some("Sharded".into()),
        ResourceKind::MongoDb if !spec["replicaSet"].is_null() => Some("ReplicaSet".into()),
        ResourceKind::MongoDb => None,
        ResourceKind::Elasticsearch if !spec["topology"].is_null() => Some("Topology".into()),
        ResourceKind::Elasticsearch => Some("Combined".into()),
    };

    mode.unwrap_or_else(|| "Standalone".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn object(kind: ResourceKind, name: &str, data: Value) -> DynamicObject {
        DynamicObject::new(name, &kind.api_resource())
            .within("demo")
            .data(data)
    }

    #[test]
    fn parses_type_and_names() {
        let selections = Selection::parse(&args(&["pg", "a", "b"])).unwrap();
        assert_eq!(
            selections,
            vec![Selection {
                kind: ResourceKind::Postgres,
                names: args(&["a", "b"]),
            }]
        );
    }

    #[test]
    fn parses_comma_separated_types() {
        let selections = Selection::parse(&args(&["pg,mysql"])).unwrap();
        assert_eq!(selections.len(), 2);
        assert_eq!(selections[1].kind, ResourceKind::MySql);
        assert!(selections[1].names.is_empty());
    }

    #[test]
    fn parses_type_slash_name() {
        let selections = Selection::parse(&args(&["pg/a", "redis/b"])).unwrap();
        assert_eq!(selections[0].names, args(&["a"]));
        assert_eq!(selections[1].kind, ResourceKind::Redis);
    }

    #[test]
    fn rejects_mixed_forms() {
        assert!(matches!(
            Selection::parse(&args(&["pg/a", "b"])),
            Err(Error::MixedForms)
        ));
        assert!(matches!(
            Selection::parse(&args(&["pg", "mysql/b"])),
            Err(Error::MixedForms)
        ));
    }

    #[test]
    fn rejects_missing_type() {
        let err = Selection::parse(&[]).unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(matches!(
            Selection::parse(&args(&["snapshot", "a"])),
            Err(Error::Kind(_))
        ));
    }

    #[test]
    fn decodes_database_fields() {
        let obj = object(
            ResourceKind::Postgres,
            "pg-demo",
            json!({
                "spec": {
                    "version": "16.1",
                    "replicas": 3,
                    "authSecret": {"name": "pg-demo-auth"},
                    "storage": {"resources": {"requests": {"storage": "1Gi"}}},
                    "terminationPolicy": "WipeOut",
                    "unknownField": true
                },
                "status": {
                    "phase": "Ready",
                    "conditions": [{"type": "Ready", "status": "True"}]
                }
            }),
        );

        let db = Database::from_object(ResourceKind::Postgres, &obj).unwrap();
        assert!(db.ready());
        assert_eq!(db.spec.version.as_deref(), Some("16.1"));
        assert_eq!(db.spec.replicas, Some(3));
        assert_eq!(db.storage_size(), Some("1Gi"));
        assert_eq!(db.deletion_policy(), Some("WipeOut"));
        assert_eq!(db.status.conditions.len(), 1);
    }

    #[test]
    fn sets_and_removes_conditions() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut conditions = vec![Condition {
            kind: "Ready".into(),
            status: "True".into(),
            ..Default::default()
        }];

        set_condition(
            &mut conditions,
            Condition::new("DatabasePaused", "Paused", "paused".into(), now),
        );
        assert_eq!(conditions.len(), 2);
        assert!(has_condition(&conditions, "DatabasePaused"));
        assert_eq!(
            conditions[1].last_transition_time.as_deref(),
            Some("2024-01-02T03:04:05Z")
        );

        let later = Utc.with_ymd_and_hms(2024, 2, 2, 3, 4, 5).unwrap();
        set_condition(
            &mut conditions,
            Condition::new("DatabasePaused", "Paused", "again".into(), later),
        );
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[1].message.as_deref(), Some("again"));
        assert_eq!(
            conditions[1].last_transition_time.as_deref(),
            Some("2024-01-02T03:04:05Z")
        );

        assert!(remove_condition(&mut conditions, "DatabasePaused"));
        assert!(!remove_condition(&mut conditions, "DatabasePaused"));
        assert!(!has_condition(&conditions, "DatabasePaused"));
    }

    #[test]
    fn computes_database_mode() {
        let mg = object(
            ResourceKind::MongoDb,
            "mg",
            json!({"spec": {"replicaSet": {"name": "rs0"}}}),
        );
        assert_eq!(mode(ResourceKind::MongoDb, &mg), "ReplicaSet");

        let rd = object(ResourceKind::Redis, "rd", json!({"spec": {"mode": "Cluster"}}));
        assert_eq!(mode(ResourceKind::Redis, &rd), "Cluster");

        let pg = object(ResourceKind::Postgres, "pg", json!({"spec": {}}));
        assert_eq!(mode(ResourceKind::Postgres, &pg), "Standalone");
    }

    #[test]
    fn renders_selector() {
        assert_eq!(
            selector(&instance_labels("pg-demo")),
            "app.kubernetes.io/instance=pg-demo,app.kubernetes.io/managed-by=kubedb.com"
        );
    }
}
