//! # Mock module
//!
//! This module provides a scripted kubernetes api server for tests. Each
//! exchange asserts the method and path of the next request and answers it.

use std::sync::Arc;

use hyper::{Body, Method, Request, Response, StatusCode};
use kube::Client;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tower_test::mock;

use crate::svc::{
    cfg::{self, Configuration, Editor, Operator, Prometheus},
    k8s::State,
};

// -----------------------------------------------------------------------------
// Exchange structure

#[derive(Clone, Debug)]
pub struct Exchange {
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
    pub body: Value,
}

impl Exchange {
    pub fn new(method: Method, path: &str, body: Value) -> Self {
        Self {
            method,
            path: path.to_string(),
            status: StatusCode::OK,
            body,
        }
    }

    /// answers with a plain text body, e.g. container logs
    pub fn text(method: Method, path: &str, text: &str) -> Self {
        Self::new(method, path, Value::String(text.to_string()))
    }

    /// answers with a failure status object
    pub fn failure(method: Method, path: &str, status: StatusCode, reason: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            status,
            body: json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": format!("request failed, {}", reason),
                "reason": reason,
                "code": status.as_u16()
            }),
        }
    }

    pub fn not_found(method: Method, path: &str) -> Self {
        Self::failure(method, path, StatusCode::NOT_FOUND, "NotFound")
    }
}

// -----------------------------------------------------------------------------
// Recorded structure

/// a request received by the server
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub body: Value,
}

// -----------------------------------------------------------------------------
// helpers

/// returns a client talking to a server answering the exchanges in order, the
/// handle resolves to the received requests once every exchange happened
pub fn client(exchanges: Vec<Exchange>) -> (Client, JoinHandle<Vec<Recorded>>) {
    let (service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();

    let server = tokio::spawn(async move {
        let mut recorded = vec![];
        for exchange in exchanges {
            let (request, send) = handle
                .next_request()
                .await
                .expect("client to send another request");

            let (parts, body) = request.into_parts();
            assert_eq!(parts.method, exchange.method, "method of {}", parts.uri);
            assert_eq!(parts.uri.path(), exchange.path);

            let bytes = hyper::body::to_bytes(body).await.expect("request body");
            recorded.push(Recorded {
                method: parts.method,
                path: parts.uri.path().to_string(),
                query: parts.uri.query().map(str::to_string),
                body: if bytes.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_slice(&bytes).expect("json request body")
                },
            });

            let body = match exchange.body {
                Value::String(text) => text,
                other => other.to_string(),
            };

            send.send_response(
                Response::builder()
                    .status(exchange.status)
                    .body(Body::from(body))
                    .expect("response"),
            );
        }

        recorded
    });

    (Client::new(service, "default"), server)
}

/// wraps objects in a list response
pub fn list(items: Vec<Value>) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "List",
        "metadata": { "resourceVersion": "1" },
        "items": items
    })
}

/// returns a state using the client, `demo` as the context namespace and the
/// default configuration
pub fn state(client: Client) -> State {
    let config = Configuration {
        operator: Operator {
            namespace: cfg::OPERATOR_NAMESPACE.to_string(),
            name: cfg::OPERATOR_NAME.to_string(),
            port: cfg::OPERATOR_PORT,
            selector: cfg::OPERATOR_SELECTOR.to_string(),
            image: cfg::OPERATOR_IMAGE.to_string(),
            version: cfg::OPERATOR_VERSION.to_string(),
        },
        prometheus: Prometheus {
            name: cfg::PROMETHEUS_NAME.to_string(),
            namespace: cfg::PROMETHEUS_NAMESPACE.to_string(),
            port: cfg::PROMETHEUS_PORT,
            dashboard_branch: cfg::DASHBOARD_BRANCH.to_string(),
        },
        editor: Editor::default(),
    };

    State::new(client, "demo".to_string(), Arc::new(config))
}
