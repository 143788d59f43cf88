//! # Secret module
//!
//! This module provide helpers to retrieve and decode secrets

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::debug;

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";
pub const CA_KEY: &str = "ca.crt";
pub const TLS_CERTIFICATE_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

pub async fn get(client: Client, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
    let api: Api<Secret> = Api::namespaced(client, namespace);

    debug!(
        kind = "Secret",
        namespace = namespace,
        name = name,
        "execute a request to retrieve secret"
    );
    api.get_opt(name).await
}

/// returns the secret's content, values from `stringData` take precedence
/// over the ones from `data` like the api server does on write
pub fn decode(secret: &Secret) -> BTreeMap<String, String> {
    let mut content: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.to_owned(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect();

    if let Some(string_data) = &secret.string_data {
        content.extend(string_data.to_owned());
    }

    content
}

#[cfg(test)]
mod tests {
    use k8s_openapi::ByteString;

    use super::*;

    #[test]
    fn decodes_data_and_string_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("username".to_string(), ByteString(b"postgres".to_vec())),
                ("password".to_string(), ByteString(b"old".to_vec())),
            ])),
            string_data: Some(BTreeMap::from([(
                "password".to_string(),
                "new".to_string(),
            )])),
            ..Default::default()
        };

        let content = decode(&secret);
        assert_eq!(content.get(USERNAME_KEY).map(String::as_str), Some("postgres"));
        assert_eq!(content.get(PASSWORD_KEY).map(String::as_str), Some("new"));
    }

    #[test]
    fn decodes_empty_secret() {
        assert!(decode(&Secret::default()).is_empty());
    }
}
