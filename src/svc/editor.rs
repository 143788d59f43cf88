//! # Editor module
//!
//! This module opens a kubedb object in the user's editor and replaces it once
//! the edited version passed the immutable fields checks.

use std::{env, path::Path, str::FromStr};

use kube::{
    api::{DynamicObject, PostParams},
    Api, Client,
};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::svc::{
    cfg,
    k8s::{kind::ResourceKind, resource::Info},
};

// -----------------------------------------------------------------------------
// Constants

pub const KUBEDB_EDITOR: &str = "KUBEDB_EDITOR";
pub const EDITOR: &str = "EDITOR";
pub const DEFAULT_EDITOR: &str = "vi";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse output format '{0}', available options are 'yaml' or 'json'")]
    Format(String),
    #[error("failed to serialize object, {0}")]
    Serialize(String),
    #[error("failed to parse edited object, {0}")]
    Deserialize(String),
    #[error("failed to write temporary file, {0}")]
    TempFile(std::io::Error),
    #[error("failed to execute editor '{0}', {1}")]
    Spawn(String, std::io::Error),
    #[error("editor '{0}' exited with {1}")]
    Exit(String, std::process::ExitStatus),
    #[error("precondition failed for: {0}")]
    Precondition(String),
    #[error("failed to replace {0} '{1}/{2}', {3}")]
    Replace(ResourceKind, String, String, kube::Error),
}

// -----------------------------------------------------------------------------
// Format enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum Format {
    #[default]
    Yaml,
    Json,
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "yaml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(Error::Format(s.to_string())),
        }
    }
}

impl Format {
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Yaml => ".yaml",
            Self::Json => ".json",
        }
    }

    pub fn serialize(&self, value: &Value) -> Result<String, Error> {
        match self {
            Self::Yaml => serde_yaml::to_string(value).map_err(|err| Error::Serialize(err.to_string())),
            Self::Json => serde_json::to_string_pretty(value)
                .map(|s| s + "\n")
                .map_err(|err| Error::Serialize(err.to_string())),
        }
    }

    pub fn deserialize(&self, content: &str) -> Result<Value, Error> {
        match self {
            Self::Yaml => serde_yaml::from_str(content).map_err(|err| Error::Deserialize(err.to_string())),
            Self::Json => serde_json::from_str(content).map_err(|err| Error::Deserialize(err.to_string())),
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

/// returns the editor command, `KUBEDB_EDITOR` then `EDITOR` then the
/// configured one then `vi`
pub fn command(config: &cfg::Editor) -> String {
    select(
        env::var(KUBEDB_EDITOR).ok(),
        env::var(EDITOR).ok(),
        config.command.to_owned(),
    )
}

fn select(kubedb: Option<String>, editor: Option<String>, configured: Option<String>) -> String {
    [kubedb, editor, configured]
        .into_iter()
        .flatten()
        .map(|command| command.trim().to_string())
        .find(|command| !command.is_empty())
        .unwrap_or_else(|| DEFAULT_EDITOR.to_string())
}

/// returns the fields the edited object must keep untouched
pub fn immutable_fields(kind: ResourceKind) -> Vec<&'static str> {
    let mut fields = vec!["/apiVersion", "/kind", "/metadata/name", "/metadata/namespace", "/status"];

    match kind {
        ResourceKind::Elasticsearch => {
            fields.extend(["/spec/version", "/spec/storage", "/spec/nodeSelector", "/spec/init"])
        }
        ResourceKind::Postgres => fields.extend([
            "/spec/version",
            "/spec/storage",
            "/spec/nodeSelector",
            "/spec/init",
            "/spec/authSecret",
        ]),
        _ => fields.extend(["/spec/storage", "/spec/authSecret"]),
    }

    fields
}

/// checks that the edit did not touch an immutable field
pub fn check_preconditions(kind: ResourceKind, original: &Value, edited: &Value) -> Result<(), Error> {
    let violated: Vec<String> = immutable_fields(kind)
        .into_iter()
        .filter(|pointer| original.pointer(pointer) != edited.pointer(pointer))
        .map(|pointer| pointer.trim_start_matches('/').replace('/', "."))
        .collect();

    if violated.is_empty() {
        return Ok(());
    }

    Err(Error::Precondition(violated.join(", ")))
}

/// runs the editor on the file and waits for it
pub async fn launch(editor: &str, path: &Path) -> Result<(), Error> {
    debug!(editor = editor, path = ?path, "execute editor");

    // The editor may carry arguments, e.g. `code --wait`
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("{} \"$1\"", editor))
        .arg("sh")
        .arg(path)
        .status()
        .await
        .map_err(|err| Error::Spawn(editor.to_string(), err))?;

    if !status.success() {
        return Err(Error::Exit(editor.to_string(), status));
    }

    Ok(())
}

/// opens the object in the editor and replaces it, returns `None` when the
/// buffer has not been changed
#[tracing::instrument(skip(client, info), fields(name = %info.name(), namespace = %info.namespace()))]
pub async fn edit(
    client: Client,
    info: &Info,
    editor: &str,
    format: Format,
) -> Result<Option<DynamicObject>, Error> {
    let original = serde_json::to_value(&info.object).map_err(|err| Error::Serialize(err.to_string()))?;
    let buffer = format.serialize(&original)?;

    let file = tempfile::Builder::new()
        .prefix(&format!("{}-{}-", info.kind.singular(), info.name()))
        .suffix(format.extension())
        .tempfile()
        .map_err(Error::TempFile)?;

    tokio::fs::write(file.path(), &buffer)
        .await
        .map_err(Error::TempFile)?;

    launch(editor, file.path()).await?;

    let content = tokio::fs::read_to_string(file.path())
        .await
        .map_err(Error::TempFile)?;

    if content.trim() == buffer.trim() || content.trim().is_empty() {
        info!("Edit cancelled, no changes made");
        return Ok(None);
    }

    let edited = format.deserialize(&content)?;
    check_preconditions(info.kind, &original, &edited)?;

    let object: DynamicObject =
        serde_json::from_value(edited).map_err(|err| Error::Deserialize(err.to_string()))?;

    let (namespace, name) = (info.namespace(), info.name());
    let api: Api<DynamicObject> =
        Api::namespaced_with(client, &namespace, &info.kind.api_resource());

    debug!(kind = info.kind.kind(), namespace = &namespace, name = &name, "execute a request to replace resource");
    let object = api
        .replace(&name, &PostParams::default(), &object)
        .await
        .map_err(|err| Error::Replace(info.kind, namespace.to_owned(), name.to_owned(), err))?;

    Ok(Some(object))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn postgres() -> Value {
        json!({
            "apiVersion": "kubedb.com/v1",
            "kind": "Postgres",
            "metadata": {"name": "pg-demo", "namespace": "demo", "labels": {"a": "b"}},
            "spec": {
                "version": "16.1",
                "replicas": 1,
                "authSecret": {"name": "pg-demo-auth"},
                "storage": {"resources": {"requests": {"storage": "1Gi"}}}
            },
            "status": {"phase": "Ready"}
        })
    }

    #[test]
    fn selects_editor() {
        assert_eq!(select(Some("nano".into()), Some("emacs".into()), None), "nano");
        assert_eq!(select(Some(" ".into()), Some("emacs".into()), None), "emacs");
        assert_eq!(select(None, None, Some("code --wait".into())), "code --wait");
        assert_eq!(select(None, None, None), DEFAULT_EDITOR);
    }

    #[test]
    fn accepts_mutable_changes() {
        let original = postgres();
        let mut edited = original.clone();
        edited["spec"]["replicas"] = json!(3);
        edited["metadata"]["labels"]["c"] = json!("d");

        assert!(check_preconditions(ResourceKind::Postgres, &original, &edited).is_ok());
    }

    #[test]
    fn rejects_immutable_changes() {
        let original = postgres();
        let mut edited = original.clone();
        edited["spec"]["version"] = json!("16.2");
        edited["spec"]["authSecret"]["name"] = json!("other");
        edited["status"]["phase"] = json!("Halted");

        let err = check_preconditions(ResourceKind::Postgres, &original, &edited).unwrap_err();
        assert_eq!(
            err.to_string(),
            "precondition failed for: status, spec.version, spec.authSecret"
        );
    }

    #[test]
    fn checks_fields_per_kind() {
        let original = postgres();
        let mut edited = original.clone();
        edited["spec"]["version"] = json!("16.2");

        // the version is only immutable for postgres and elasticsearch
        assert!(check_preconditions(ResourceKind::MySql, &original, &edited).is_ok());
        assert!(check_preconditions(ResourceKind::Elasticsearch, &original, &edited).is_err());

        let mut renamed = original.clone();
        renamed["metadata"]["name"] = json!("other");
        let err = check_preconditions(ResourceKind::Redis, &original, &renamed).unwrap_err();
        assert_eq!(err.to_string(), "precondition failed for: metadata.name");
    }

    #[test]
    fn serializes_both_formats() {
        let value = postgres();
        for format in [Format::Yaml, Format::Json] {
            let content = format.serialize(&value).unwrap();
            assert_eq!(format.deserialize(&content).unwrap(), value);
        }

        assert_eq!("".parse::<Format>().unwrap(), Format::Yaml);
        assert!("wide".parse::<Format>().is_err());
    }
}
