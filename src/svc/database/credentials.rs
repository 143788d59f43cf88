//! # Credentials module
//!
//! This module reads the authentication secret of a database

use std::collections::BTreeMap;

use kube::Client;

use crate::svc::{
    http::Authority,
    k8s::{
        kind::ResourceKind,
        resource::{self, Info},
        secret::{self, CA_KEY, TLS_CERTIFICATE_KEY, TLS_KEY_KEY},
    },
};

pub const ADMIN_CERTIFICATE_SUFFIX: &str = "admin-cert";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("auth secret is not set for {0} {1}/{2}")]
    NotSet(ResourceKind, String, String),
    #[error("secret '{0}/{1}' not found")]
    NotFound(String, String),
    #[error("failed to read database, {0}")]
    Resource(resource::Error),
    #[error("failed to retrieve secret '{0}/{1}', {2}")]
    Get(String, String, kube::Error),
    #[error("key '{2}' is missing from secret '{0}/{1}'")]
    MissingKey(String, String, &'static str),
}

// -----------------------------------------------------------------------------
// helpers

pub fn auth_secret_name(info: &Info) -> Result<String, Error> {
    info.database()
        .map_err(Error::Resource)?
        .spec
        .auth_secret
        .and_then(|reference| reference.name)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::NotSet(info.kind, info.namespace(), info.name()))
}

/// returns the decoded content of the database's auth secret sorted by key
pub async fn get(client: Client, info: &Info) -> Result<BTreeMap<String, String>, Error> {
    let (namespace, name) = (info.namespace(), auth_secret_name(info)?);

    let secret = secret::get(client, &namespace, &name)
        .await
        .map_err(|err| Error::Get(namespace.to_owned(), name.to_owned(), err))?
        .ok_or_else(|| Error::NotFound(namespace.to_owned(), name.to_owned()))?;

    Ok(secret::decode(&secret))
}

/// returns the certificate authority and the client certificate stored in
/// the `<name>-admin-cert` secret of a database serving tls
pub async fn authority(client: Client, info: &Info) -> Result<Authority, Error> {
    let namespace = info.namespace();
    let name = format!("{}-{}", info.name(), ADMIN_CERTIFICATE_SUFFIX);

    let secret = secret::get(client, &namespace, &name)
        .await
        .map_err(|err| Error::Get(namespace.to_owned(), name.to_owned(), err))?
        .ok_or_else(|| Error::NotFound(namespace.to_owned(), name.to_owned()))?;

    let content = secret::decode(&secret);
    let bytes = |key: &str| content.get(key).map(|value| value.as_bytes().to_vec());

    Ok(Authority {
        ca: bytes(CA_KEY).ok_or_else(|| Error::MissingKey(namespace, name, CA_KEY))?,
        certificate: bytes(TLS_CERTIFICATE_KEY),
        key: bytes(TLS_KEY_KEY),
    })
}

/// renders credentials the way `show-credentials` prints them
pub fn render(info: &Info, credentials: &BTreeMap<String, String>) -> String {
    let mut output = format!(
        "Credentials for database {}/{}:\n",
        info.namespace(),
        info.name()
    );

    for (key, value) in credentials {
        output.push_str(&format!("{} = {}\n", key, value));
    }

    output
}
