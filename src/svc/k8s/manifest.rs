//! # Manifest module
//!
//! This module reads kubedb objects from yaml or json manifests

use std::path::{Path, PathBuf};

use kube::{api::DynamicObject, ResourceExt};
use serde::Deserialize;

use crate::svc::k8s::kind::{self, ResourceKind};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read manifest '{0:?}', {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse manifest, {0}")]
    Parse(serde_yaml::Error),
    #[error("manifest is missing the apiVersion or kind of object '{0}'")]
    MissingType(String),
    #[error("object '{0}' does not belong to the '{1}' api group")]
    Group(String, &'static str),
    #[error("{0}")]
    Kind(kind::Error),
}

// -----------------------------------------------------------------------------
// helpers

/// reads the manifest at the given path, `-` reads the standard input
pub async fn read(path: &Path) -> Result<String, Error> {
    if path == Path::new("-") {
        let mut content = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut content)
            .await
            .map_err(|err| Error::Read(path.to_owned(), err))?;

        return Ok(content);
    }

    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::Read(path.to_owned(), err))
}

/// parses every document of the manifest, json being a subset of yaml there
/// is no need to distinguish them
pub fn parse(content: &str) -> Result<Vec<(ResourceKind, DynamicObject)>, Error> {
    let mut objects = vec![];

    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(Error::Parse)?;
        if value.is_null() {
            continue;
        }

        let object: DynamicObject = serde_yaml::from_value(value).map_err(Error::Parse)?;
        let types = object
            .types
            .to_owned()
            .ok_or_else(|| Error::MissingType(object.name_any()))?;

        let group = types.api_version.split_once('/').map(|(group, _)| group);
        if group != Some(kind::GROUP) {
            return Err(Error::Group(object.name_any(), kind::GROUP));
        }

        let kind = ResourceKind::from_kind(&types.kind).map_err(Error::Kind)?;
        objects.push((kind, object));
    }

    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_documents() {
        let content = r#"
apiVersion: kubedb.com/v1
kind: Postgres
metadata:
  name: pg-demo
  namespace: demo
spec:
  version: "16.1"
---
---
apiVersion: kubedb.com/v1
kind: Redis
metadata:
  name: rd-demo
spec:
  version: "7.2.3"
"#;

        let objects = parse(content).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].0, ResourceKind::Postgres);
        assert_eq!(objects[0].1.namespace().as_deref(), Some("demo"));
        assert_eq!(objects[1].0, ResourceKind::Redis);
        assert_eq!(objects[1].1.data["spec"]["version"], "7.2.3");
    }

    #[test]
    fn parses_json() {
        let content = r#"{"apiVersion":"kubedb.com/v1","kind":"MySQL","metadata":{"name":"my"}}"#;

        let objects = parse(content).unwrap();
        assert_eq!(objects[0].0, ResourceKind::MySql);
    }

    #[test]
    fn rejects_foreign_objects() {
        let content = "apiVersion: v1\nkind: Secret\nmetadata:\n  name: s\n";
        assert!(matches!(parse(content), Err(Error::Group(..))));

        let content = "apiVersion: kubedb.com/v1\nkind: Memcached\nmetadata:\n  name: m\n";
        assert!(matches!(parse(content), Err(Error::Kind(_))));
    }
}
