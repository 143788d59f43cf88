//! # Http module
//!
//! This module provide an http client used to reach prometheus, the operator
//! report endpoint, elasticsearch and to download grafana dashboards

use std::io::BufReader;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hyper::{
    body::{Buf, Bytes},
    client::HttpConnector,
    header, Body, Method, StatusCode,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use rustls_pemfile::Item;
use serde::{de::DeserializeOwned, Serialize};
use tracing::trace;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to build request, {0}")]
    RequestBuilder(hyper::http::Error),
    #[error("failed to execute request, {0}")]
    Request(hyper::Error),
    #[error("failed to execute request on '{0}', got status code {1}, {2}")]
    StatusCode(String, StatusCode, String),
    #[error("failed to aggregate body, {0}")]
    BodyAggregation(hyper::Error),
    #[error("failed to serialize query, {0}")]
    Query(serde_qs::Error),
    #[error("failed to deserialize body, {0}")]
    Deserialize(serde_json::Error),
    #[error("failed to read pem encoded certificates, {0}")]
    Pem(std::io::Error),
    #[error("no valid certificate authority found")]
    NoAuthority,
    #[error("no private key found for the client certificate")]
    NoPrivateKey,
    #[error("failed to configure tls, {0}")]
    Tls(rustls::Error),
}

// -----------------------------------------------------------------------------
// Credentials structure

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// returns the value of the `Authorization` header
    pub fn basic(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

// -----------------------------------------------------------------------------
// Authority structure

/// pem encoded content of a tls secret, the client certificate is presented
/// to the server when both of its parts are given
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Authority {
    pub ca: Vec<u8>,
    pub certificate: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
}

impl Authority {
    /// returns a store trusting only the certificate authority
    pub fn root_store(&self) -> Result<RootCertStore, Error> {
        let certificates =
            rustls_pemfile::certs(&mut BufReader::new(self.ca.as_slice())).map_err(Error::Pem)?;

        let mut store = RootCertStore::empty();
        let (added, _) = store.add_parsable_certificates(&certificates);
        if added == 0 {
            return Err(Error::NoAuthority);
        }

        Ok(store)
    }

    pub fn tls_config(&self) -> Result<ClientConfig, Error> {
        let builder = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(self.root_store()?);

        match (&self.certificate, &self.key) {
            (Some(certificate), Some(key)) => builder
                .with_client_auth_cert(certificates(certificate)?, private_key(key)?)
                .map_err(Error::Tls),
            _ => Ok(builder.with_no_client_auth()),
        }
    }
}

fn certificates(pem: &[u8]) -> Result<Vec<Certificate>, Error> {
    Ok(rustls_pemfile::certs(&mut BufReader::new(pem))
        .map_err(Error::Pem)?
        .into_iter()
        .map(Certificate)
        .collect())
}

fn private_key(pem: &[u8]) -> Result<PrivateKey, Error> {
    for item in rustls_pemfile::read_all(&mut BufReader::new(pem)).map_err(Error::Pem)? {
        match item {
            Item::PKCS8Key(key) | Item::RSAKey(key) | Item::ECKey(key) => return Ok(PrivateKey(key)),
            _ => continue,
        }
    }

    Err(Error::NoPrivateKey)
}

// -----------------------------------------------------------------------------
// Request trait

#[async_trait]
pub trait Request {
    type Error;

    /// executes the request and returns the status and the raw body, non
    /// successful statuses are not considered as errors
    async fn request(
        &self,
        method: &Method,
        endpoint: &str,
        body: Option<(&'static str, Vec<u8>)>,
    ) -> Result<(StatusCode, Bytes), Self::Error>;
}

// -----------------------------------------------------------------------------
// RestClient trait

#[async_trait]
pub trait RestClient {
    type Error;

    async fn get<T>(&self, endpoint: &str) -> Result<T, Self::Error>
    where
        T: DeserializeOwned + Send + Sync;

    async fn get_with<Q, T>(&self, endpoint: &str, query: &Q) -> Result<T, Self::Error>
    where
        Q: Serialize + Send + Sync,
        T: DeserializeOwned + Send + Sync;

    async fn get_raw(&self, endpoint: &str) -> Result<Bytes, Self::Error>;
}

// -----------------------------------------------------------------------------
// Client structure

#[derive(Clone, Debug)]
pub struct Client {
    inner: hyper::Client<HttpsConnector<HttpConnector>, Body>,
    credentials: Option<Credentials>,
}

impl Default for Client {
    fn default() -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .build();

        Self {
            inner: hyper::Client::builder().build(connector),
            credentials: None,
        }
    }
}

impl From<Credentials> for Client {
    fn from(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
            ..Default::default()
        }
    }
}

impl Client {
    /// returns a client which only trusts servers signed by the authority
    pub fn with_authority(authority: &Authority) -> Result<Self, Error> {
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(authority.tls_config()?)
            .https_or_http()
            .enable_http1()
            .build();

        Ok(Self {
            inner: hyper::Client::builder().build(connector),
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

#[async_trait]
impl Request for Client {
    type Error = Error;

    async fn request(
        &self,
        method: &Method,
        endpoint: &str,
        body: Option<(&'static str, Vec<u8>)>,
    ) -> Result<(StatusCode, Bytes), Self::Error> {
        let mut builder = hyper::Request::builder()
            .method(method)
            .uri(endpoint)
            .header(header::ACCEPT, "application/json");

        if let Some(credentials) = &self.credentials {
            builder = builder.header(header::AUTHORIZATION, credentials.basic());
        }

        let req = match body {
            Some((content_type, buf)) => {
                trace!(
                    endpoint = endpoint,
                    method = method.to_string(),
                    body = String::from_utf8_lossy(&buf).to_string(),
                    "execute request"
                );

                builder
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(buf))
            }
            None => {
                trace!(endpoint = endpoint, method = method.to_string(), body = "<none>", "execute request");
                builder.body(Body::empty())
            }
        }
        .map_err(Error::RequestBuilder)?;

        let res = self.inner.request(req).await.map_err(Error::Request)?;

        let status = res.status();
        let buf = hyper::body::to_bytes(res.into_body())
            .await
            .map_err(Error::BodyAggregation)?;

        trace!(endpoint = endpoint, method = method.to_string(), status = status.as_u16(), "got response");
        Ok((status, buf))
    }
}

#[async_trait]
impl RestClient for Client {
    type Error = Error;

    async fn get<T>(&self, endpoint: &str) -> Result<T, Self::Error>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let buf = self.get_raw(endpoint).await?;

        serde_json::from_reader(buf.reader()).map_err(Error::Deserialize)
    }

    async fn get_with<Q, T>(&self, endpoint: &str, query: &Q) -> Result<T, Self::Error>
    where
        Q: Serialize + Send + Sync,
        T: DeserializeOwned + Send + Sync,
    {
        let query = serde_qs::to_string(query).map_err(Error::Query)?;

        self.get(&format!("{}?{}", endpoint, query)).await
    }

    async fn get_raw(&self, endpoint: &str) -> Result<Bytes, Self::Error> {
        let (status, buf) = self.request(&Method::GET, endpoint, None).await?;
        if !status.is_success() {
            return Err(Error::StatusCode(
                endpoint.to_string(),
                status,
                String::from_utf8_lossy(&buf).to_string(),
            ));
        }

        Ok(buf)
    }
}
