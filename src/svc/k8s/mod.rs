//! # Kubernetes module
//!
//! This module provide kubedb resource kinds, helpers to reach them through
//! the kubernetes api and the port-forward tunnel

use std::sync::Arc;

use crate::svc::cfg::Configuration;

pub mod client;
pub mod kind;
pub mod manifest;
#[cfg(test)]
pub mod mock;
pub mod resource;
pub mod secret;
pub mod tunnel;

// -----------------------------------------------------------------------------
// State structure

/// contains the client to interact with kubernetes, the namespace selected by
/// the kubeconfig context and the configuration
#[derive(Clone)]
pub struct State {
    pub kube: kube::Client,
    pub namespace: String,
    pub config: Arc<Configuration>,
}

impl From<(kube::Client, String, Arc<Configuration>)> for State {
    fn from((kube, namespace, config): (kube::Client, String, Arc<Configuration>)) -> Self {
        Self {
            kube,
            namespace,
            config,
        }
    }
}

impl State {
    pub fn new(k: kube::Client, n: String, c: Arc<Configuration>) -> Self {
        Self::from((k, n, c))
    }

    /// returns the namespace given on the command line or the one of the
    /// kubeconfig context
    pub fn namespace(&self, namespace: &Option<String>) -> String {
        namespace
            .to_owned()
            .unwrap_or_else(|| self.namespace.to_owned())
    }
}
