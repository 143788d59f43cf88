//! # Replica module
//!
//! This module generates what a remote cluster needs to replicate a postgres
//! or a mysql database: an auth secret for a replication user, the secret of
//! its client certificate when the database serves tls and the app binding
//! pointing at the source database.

use std::{collections::BTreeMap, io::Write, time::Duration};

use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{DynamicObject, ObjectMeta, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::svc::{
    database::{
        data,
        shell::{self, Input, Session},
    },
    k8s::{
        kind::{self, ResourceKind},
        resource::{self, Info},
        secret::{PASSWORD_KEY, USERNAME_KEY},
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const REMOTE_AUTH_SUFFIX: &str = "remote-replica-auth";
pub const CLIENT_CERTIFICATE_ALIAS: &str = "client";
pub const BASIC_AUTH_TYPE: &str = "kubernetes.io/basic-auth";
pub const FIELD_MANAGER: &str = "kubectl-dba";
pub const SECRET_POLL_INTERVAL: Duration = Duration::from_millis(300);

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("remote replicas are not supported for {0}")]
    Unsupported(ResourceKind),
    #[error("username '{0}' may only contain letters, digits and underscores")]
    Username(String),
    #[error("failed to read database, {0}")]
    Resource(resource::Error),
    #[error("failed to run database client, {0}")]
    Shell(shell::Error),
    #[error("failed to write statement to a temporary file, {0}")]
    Script(std::io::Error),
    #[error("failed to check if user '{0}' exists, {1}")]
    Lookup(String, data::Error),
    #[error("failed to retrieve app binding '{0}/{1}', {2}")]
    AppBinding(String, String, kube::Error),
    #[error("failed to apply certificate '{0}/{1}', {2}")]
    Certificate(String, String, kube::Error),
    #[error("failed to retrieve secret '{0}/{1}', {2}")]
    Secret(String, String, kube::Error),
    #[error("secret '{0}/{1}' was not issued in time")]
    Timeout(String, String),
    #[error("failed to serialize '{0}', {1}")]
    Serialize(String, serde_json::Error),
    #[error("failed to render yaml, {0}")]
    Yaml(serde_yaml::Error),
}

impl From<shell::Error> for Error {
    fn from(err: shell::Error) -> Self {
        Self::Shell(err)
    }
}

// -----------------------------------------------------------------------------
// helpers

pub fn ensure_supported(kind: ResourceKind) -> Result<(), Error> {
    match kind {
        ResourceKind::Postgres | ResourceKind::MySql => Ok(()),
        other => Err(Error::Unsupported(other)),
    }
}

/// the username ends up in sql statements and in object names
pub fn validate_username(username: &str) -> Result<(), Error> {
    let valid = !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(Error::Username(username.to_string()));
    }

    Ok(())
}

fn literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "''")
}

pub fn postgres_lookup(username: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM pg_roles WHERE rolname = '{}';",
        literal(username)
    )
}

/// returns the statement creating the replication user or updating the
/// password of an existing one
pub fn postgres_user(username: &str, password: &str, exists: bool) -> String {
    let password = literal(password);
    let grant = format!(
        "GRANT EXECUTE ON FUNCTION pg_read_binary_file(text) TO {};",
        username
    );

    if exists {
        return format!(
            "ALTER ROLE {} WITH PASSWORD '{}' REPLICATION; {}",
            username, password, grant
        );
    }

    format!(
        "CREATE USER {} WITH PASSWORD '{}'; ALTER ROLE {} WITH REPLICATION; {}",
        username, password, username, grant
    )
}

pub fn mysql_user(username: &str, password: &str) -> String {
    format!(
        "CREATE USER IF NOT EXISTS '{u}'@'%'; ALTER USER '{u}'@'%' IDENTIFIED BY '{p}'; \
         GRANT REPLICATION SLAVE, CLONE_ADMIN, BACKUP_ADMIN ON *.* TO '{u}'@'%' WITH GRANT OPTION;",
        u = username,
        p = literal(password)
    )
}

/// creates the replication user through the database client, the statement
/// goes through a script file to keep the password out of the command line
#[tracing::instrument(skip(session, password))]
pub async fn ensure_user(session: &Session, username: &str, password: &str) -> Result<(), Error> {
    let statement = match session.kind {
        ResourceKind::Postgres => {
            let output = session
                .invocation(&Input::Command(postgres_lookup(username)), None)?
                .output()
                .await?;

            let exists = data::parse_count(&output)
                .map_err(|err| Error::Lookup(username.to_string(), err))?
                > 0;

            postgres_user(username, password, exists)
        }
        ResourceKind::MySql => mysql_user(username, password),
        other => return Err(Error::Unsupported(other)),
    };

    let mut script = tempfile::NamedTempFile::new().map_err(Error::Script)?;
    writeln!(script, "{}", statement).map_err(Error::Script)?;

    session
        .invocation(&Input::File(script.path().to_owned()), None)?
        .output()
        .await?;

    info!(username = username, kind = session.kind.kind(), "Ensured replication user");
    Ok(())
}

/// the basic auth secret the remote cluster uses to reach the database
pub fn auth_secret(namespace: &str, database: &str, username: &str, password: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", database, REMOTE_AUTH_SUFFIX)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([
            (USERNAME_KEY.to_string(), username.to_string()),
            (PASSWORD_KEY.to_string(), password.to_string()),
        ])),
        type_: Some(BASIC_AUTH_TYPE.to_string()),
        ..Default::default()
    }
}

/// returns the name of the secret holding the client certificate of the user
pub fn client_secret_name(info: &Info, username: &str) -> Result<String, Error> {
    let database = info.database().map_err(Error::Resource)?;
    let secret = database
        .spec
        .certificate(CLIENT_CERTIFICATE_ALIAS)
        .and_then(|certificate| certificate.secret_name.to_owned())
        .unwrap_or_else(|| format!("{}-{}-cert", info.name(), CLIENT_CERTIFICATE_ALIAS));

    Ok(format!("{}-{}", secret, username))
}

/// builds the cert-manager certificate of the user, owned by the app binding
/// of the database
pub fn certificate(
    info: &Info,
    app_binding: &DynamicObject,
    username: &str,
) -> Result<DynamicObject, Error> {
    let database = info.database().map_err(Error::Resource)?;
    let alias = database.spec.certificate(CLIENT_CERTIFICATE_ALIAS);
    let issuer = alias
        .and_then(|certificate| certificate.issuer_ref.as_ref())
        .or_else(|| database.spec.tls.as_ref().and_then(|tls| tls.issuer_ref.as_ref()));

    let mut spec = Map::new();
    spec.insert("commonName".into(), json!(username));
    spec.insert("secretName".into(), json!(client_secret_name(info, username)?));
    spec.insert(
        "usages".into(),
        json!(["digital signature", "key encipherment", "client auth"]),
    );

    if let Some(issuer) = issuer {
        spec.insert(
            "issuerRef".into(),
            json!({
                "name": issuer.name,
                "kind": issuer.kind,
                "group": issuer.api_group.to_owned().unwrap_or_default(),
            }),
        );
    }

    if let Some(alias) = alias {
        let mut set = |key: &str, values: &[String]| {
            let mut values = values.to_vec();
            values.sort();
            values.dedup();
            if !values.is_empty() {
                spec.insert(key.to_string(), json!(values));
            }
        };

        set("dnsNames", &alias.dns_names);
        set("ipAddresses", &alias.ip_addresses);
        set("uris", &alias.uris);
        set("emailAddresses", &alias.email_addresses);

        for (key, value) in [
            ("duration", alias.duration.to_owned().map(Value::String)),
            ("renewBefore", alias.renew_before.to_owned().map(Value::String)),
            ("subject", alias.subject.to_owned()),
        ] {
            if let Some(value) = value {
                spec.insert(key.to_string(), value);
            }
        }
    }

    let resource = kind::certificate_resource();
    let mut certificate = DynamicObject::new(
        &format!("{}-{}-cert-{}", info.name(), CLIENT_CERTIFICATE_ALIAS, username),
        &resource,
    )
    .within(&info.namespace());

    certificate.metadata.labels = Some(resource::instance_labels(&info.name()));
    certificate.metadata.owner_references = Some(vec![
        k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
            api_version: kind::app_binding_resource().api_version,
            kind: kind::app_binding_resource().kind,
            name: app_binding.name_any(),
            uid: app_binding.uid().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        },
    ]);
    certificate.data = json!({ "spec": spec });

    Ok(certificate)
}

pub async fn app_binding(
    client: Client,
    namespace: &str,
    name: &str,
) -> Result<DynamicObject, Error> {
    let api: Api<DynamicObject> =
        Api::namespaced_with(client, namespace, &kind::app_binding_resource());

    debug!(
        kind = "AppBinding",
        namespace = namespace,
        name = name,
        "execute a request to retrieve app binding"
    );
    api.get(name)
        .await
        .map_err(|err| Error::AppBinding(namespace.to_string(), name.to_string(), err))
}

/// creates or updates the certificate with a server side apply
pub async fn apply_certificate(client: Client, certificate: &DynamicObject) -> Result<(), Error> {
    let namespace = certificate.namespace().unwrap_or_default();
    let name = certificate.name_any();
    let api: Api<DynamicObject> =
        Api::namespaced_with(client, &namespace, &kind::certificate_resource());

    debug!(
        kind = "Certificate",
        namespace = &namespace,
        name = &name,
        "execute apply request on resource"
    );
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(certificate),
    )
    .await
    .map_err(|err| Error::Certificate(namespace.to_owned(), name.to_owned(), err))?;

    Ok(())
}

/// waits for the secret to be issued
pub async fn wait_secret(
    client: Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<Secret, Error> {
    let api: Api<Secret> = Api::namespaced(client, namespace);

    let poll = async {
        loop {
            debug!(
                kind = "Secret",
                namespace = namespace,
                name = name,
                "execute a request to retrieve secret"
            );
            match api.get_opt(name).await {
                Ok(Some(secret)) => return Ok(secret),
                Ok(None) => tokio::time::sleep(SECRET_POLL_INTERVAL).await,
                Err(err) => return Err(Error::Secret(namespace.to_string(), name.to_string(), err)),
            }
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| Error::Timeout(namespace.to_string(), name.to_string()))?
}

/// drops the fields bound to the source cluster from an object
pub fn portable<T>(name: &str, obj: &T) -> Result<Value, Error>
where
    T: Serialize,
{
    let mut value =
        serde_json::to_value(obj).map_err(|err| Error::Serialize(name.to_string(), err))?;

    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in [
            "annotations",
            "managedFields",
            "ownerReferences",
            "uid",
            "resourceVersion",
            "creationTimestamp",
            "generation",
        ] {
            metadata.remove(field);
        }
    }

    if let Some(obj) = value.as_object_mut() {
        obj.remove("status");
    }

    Ok(value)
}

/// the app binding of the source database as the remote cluster sees it
pub fn remote_app_binding(
    app_binding: &DynamicObject,
    dns: &str,
    auth_secret: &str,
    tls_secret: Option<&str>,
) -> Result<Value, Error> {
    let mut value = portable(&app_binding.name_any(), app_binding)?;
    let resource = kind::app_binding_resource();

    value["apiVersion"] = json!(resource.api_version);
    value["kind"] = json!(resource.kind);
    value["spec"]["clientConfig"]["service"]["name"] = json!(dns);
    value["spec"]["secret"]["name"] = json!(auth_secret);
    if let Some(tls_secret) = tls_secret {
        value["spec"]["tlsSecret"]["name"] = json!(tls_secret);
    }

    Ok(value)
}

/// renders the documents as a multi document yaml
pub fn render(documents: &[Value]) -> Result<String, Error> {
    let mut output = String::new();
    for (index, document) in documents.iter().enumerate() {
        if index > 0 {
            output.push_str("---\n");
        }

        output.push_str(&serde_yaml::to_string(document).map_err(Error::Yaml)?);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use hyper::Method;

    use super::*;
    use crate::svc::k8s::mock::{self, Exchange};

    fn info(data: Value) -> Info {
        Info {
            kind: ResourceKind::Postgres,
            object: DynamicObject::new("pg-demo", &ResourceKind::Postgres.api_resource())
                .within("demo")
                .data(data),
        }
    }

    fn app_binding() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "appcatalog.appscode.com/v1alpha1",
            "kind": "AppBinding",
            "metadata": {
                "name": "pg-demo",
                "namespace": "demo",
                "uid": "1f6c",
                "resourceVersion": "42",
                "annotations": {"kubectl.kubernetes.io/last-applied-configuration": "{}"},
                "ownerReferences": [{"apiVersion": "kubedb.com/v1", "kind": "Postgres", "name": "pg-demo", "uid": "9a1b"}]
            },
            "spec": {
                "clientConfig": {"service": {"name": "pg-demo", "port": 5432, "scheme": "postgresql"}},
                "secret": {"name": "pg-demo-auth"},
                "tlsSecret": {"name": "pg-demo-client-cert"},
                "type": "kubedb.com/postgres"
            }
        }))
        .unwrap()
    }

    #[test]
    fn supports_postgres_and_mysql_only() {
        assert!(ensure_supported(ResourceKind::Postgres).is_ok());
        assert!(ensure_supported(ResourceKind::MySql).is_ok());
        assert!(matches!(
            ensure_supported(ResourceKind::Redis),
            Err(Error::Unsupported(ResourceKind::Redis))
        ));
    }

    #[test]
    fn validates_usernames() {
        assert!(validate_username("replica_1").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("bob; DROP TABLE x").is_err());
    }

    #[test]
    fn builds_user_statements() {
        assert_eq!(
            postgres_lookup("replica"),
            "SELECT COUNT(*) FROM pg_roles WHERE rolname = 'replica';"
        );
        assert_eq!(
            postgres_user("replica", "it's", false),
            "CREATE USER replica WITH PASSWORD 'it''s'; ALTER ROLE replica WITH REPLICATION; \
             GRANT EXECUTE ON FUNCTION pg_read_binary_file(text) TO replica;"
        );
        assert!(postgres_user("replica", "pass", true)
            .starts_with("ALTER ROLE replica WITH PASSWORD 'pass' REPLICATION;"));

        let mysql = mysql_user("replica", "pass");
        assert!(mysql.starts_with("CREATE USER IF NOT EXISTS 'replica'@'%';"));
        assert!(mysql.contains("IDENTIFIED BY 'pass'"));
        assert!(mysql.contains("GRANT REPLICATION SLAVE, CLONE_ADMIN, BACKUP_ADMIN"));
    }

    #[test]
    fn builds_auth_secret() {
        let secret = auth_secret("demo", "pg-demo", "replica", "pass");

        assert_eq!(secret.metadata.name.as_deref(), Some("pg-demo-remote-replica-auth"));
        assert_eq!(secret.type_.as_deref(), Some(BASIC_AUTH_TYPE));
        assert_eq!(
            secret.string_data.unwrap().get(USERNAME_KEY).map(String::as_str),
            Some("replica")
        );
    }

    #[test]
    fn builds_client_certificate() {
        let info = info(json!({
            "spec": {
                "tls": {
                    "issuerRef": {"apiGroup": "cert-manager.io", "kind": "Issuer", "name": "pg-issuer"},
                    "certificates": [{
                        "alias": "client",
                        "dnsNames": ["b.demo.svc", "a.demo.svc", "a.demo.svc"],
                        "duration": "2160h"
                    }]
                }
            }
        }));

        let certificate = certificate(&info, &app_binding(), "replica").unwrap();
        assert_eq!(certificate.name_any(), "pg-demo-client-cert-replica");
        assert_eq!(certificate.namespace().as_deref(), Some("demo"));

        let owner = &certificate.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "AppBinding");
        assert_eq!(owner.uid, "1f6c");

        let spec = &certificate.data["spec"];
        assert_eq!(spec["commonName"], "replica");
        assert_eq!(spec["secretName"], "pg-demo-client-cert-replica");
        assert_eq!(spec["issuerRef"]["name"], "pg-issuer");
        assert_eq!(spec["issuerRef"]["group"], "cert-manager.io");
        assert_eq!(spec["dnsNames"], json!(["a.demo.svc", "b.demo.svc"]));
        assert_eq!(spec["duration"], "2160h");
        assert_eq!(spec["usages"][2], "client auth");
    }

    #[test]
    fn points_app_binding_at_the_remote_dns() {
        let value =
            remote_app_binding(&app_binding(), "pg.example.com", "pg-demo-remote-replica-auth", None)
                .unwrap();

        assert_eq!(value["spec"]["clientConfig"]["service"]["name"], "pg.example.com");
        assert_eq!(value["spec"]["clientConfig"]["service"]["port"], 5432);
        assert_eq!(value["spec"]["secret"]["name"], "pg-demo-remote-replica-auth");
        assert_eq!(value["spec"]["tlsSecret"]["name"], "pg-demo-client-cert");

        let metadata = value["metadata"].as_object().unwrap();
        for field in ["annotations", "ownerReferences", "uid", "resourceVersion"] {
            assert!(!metadata.contains_key(field), "{} is kept", field);
        }
    }

    #[test]
    fn renders_documents() {
        let output = render(&[json!({"kind": "Secret"}), json!({"kind": "AppBinding"})]).unwrap();
        assert_eq!(output, "kind: Secret\n---\nkind: AppBinding\n");
    }

    #[tokio::test]
    async fn waits_for_issued_secret() {
        const SECRET: &str = "/api/v1/namespaces/demo/secrets/pg-demo-client-cert-replica";

        let (client, server) = mock::client(vec![
            Exchange::not_found(Method::GET, SECRET),
            Exchange::new(
                Method::GET,
                SECRET,
                json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": {"name": "pg-demo-client-cert-replica", "namespace": "demo"},
                    "type": "kubernetes.io/tls"
                }),
            ),
        ]);

        let secret = wait_secret(
            client,
            "demo",
            "pg-demo-client-cert-replica",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/tls"));
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn applies_certificate_server_side() {
        let (client, server) = mock::client(vec![Exchange::new(
            Method::PATCH,
            "/apis/cert-manager.io/v1/namespaces/demo/certificates/pg-demo-client-cert-replica",
            json!({
                "apiVersion": "cert-manager.io/v1",
                "kind": "Certificate",
                "metadata": {"name": "pg-demo-client-cert-replica", "namespace": "demo"}
            }),
        )]);

        let certificate = certificate(&info(json!({"spec": {}})), &app_binding(), "replica").unwrap();
        apply_certificate(client, &certificate).await.unwrap();

        let requests = server.await.unwrap();
        let query = requests[0].query.as_deref().unwrap_or_default();
        assert!(query.contains("fieldManager=kubectl-dba"));
        assert!(query.contains("force=true"));
        assert_eq!(requests[0].body["spec"]["commonName"], "replica");
    }
}
