//! # Tunnel module
//!
//! This module provides a local tcp proxy to a pod or a service inside the
//! cluster using the api server's `pods/portforward` subresource.

use std::net::{Ipv4Addr, SocketAddr};

use k8s_openapi::{
    api::core::v1::{Pod, Service},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{api::ListParams, Api, Client, ResourceExt};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::svc::k8s::resource;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to bind local listener, {0}")]
    Bind(std::io::Error),
    #[error("failed to retrieve {0} '{1}/{2}', {3}")]
    Get(&'static str, String, String, kube::Error),
    #[error("failed to list pods matching '{0}', {1}")]
    List(String, kube::Error),
    #[error("service '{0}/{1}' does not select any pod")]
    NoSelector(String, String),
    #[error("no running pod found for '{0}/{1}'")]
    NoPod(String, String),
    #[error("service '{0}/{1}' does not expose port {2}")]
    NoPort(String, String, u16),
    #[error("pod '{0}' does not expose a port named '{1}'")]
    NamedPort(String, String),
    #[error("port {0} is out of range")]
    OutOfRange(i32),
    #[error("failed to open port-forward stream to '{0}', {1}")]
    PortForward(String, kube::Error),
    #[error("port-forward to '{0}' did not provide a stream for port {1}")]
    Stream(String, u16),
    #[error("failed to forward traffic, {0}")]
    Copy(std::io::Error),
    #[error("port-forward to '{0}' ended with an error, {1}")]
    Join(String, String),
}

// -----------------------------------------------------------------------------
// Target enumeration

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Target {
    Pod(String),
    Service(String),
}

// -----------------------------------------------------------------------------
// Tunnel structure

/// forwards connections accepted on `127.0.0.1:<local>` to the remote port
/// until it is closed or dropped
#[derive(Debug)]
pub struct Tunnel {
    pub local: u16,
    pub remote: u16,
    pub pod: String,
    handle: JoinHandle<()>,
}

impl Tunnel {
    /// resolves the target pod, binds the local listener and starts accepting
    /// connections. It returns once the listener is ready.
    #[tracing::instrument(skip(client))]
    pub async fn open(
        client: Client,
        namespace: &str,
        target: Target,
        remote: u16,
    ) -> Result<Self, Error> {
        let (pod, port) = match &target {
            Target::Pod(name) => (name.to_owned(), remote),
            Target::Service(name) => resolve_service(client.to_owned(), namespace, name, remote).await?,
        };

        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .map_err(Error::Bind)?;

        let local = listener.local_addr().map_err(Error::Bind)?.port();
        let pods: Api<Pod> = Api::namespaced(client, namespace);

        info!(
            namespace = namespace,
            pod = pod.as_str(),
            local = local,
            remote = port,
            "Forwarding local port to pod"
        );

        let handle = tokio::spawn(accept(listener, pods, pod.to_owned(), port));

        Ok(Self {
            local,
            remote: port,
            pod,
            handle,
        })
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.local)
    }

    pub fn close(self) {}
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        debug!(local = self.local, "Closing port-forward tunnel");
        self.handle.abort();
    }
}

// -----------------------------------------------------------------------------
// helpers

async fn accept(listener: TcpListener, pods: Api<Pod>, pod: String, port: u16) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(err) => {
                error!(error = err.to_string(), "could not accept connection");
                return;
            }
        };

        debug!(peer = peer.to_string(), pod = pod.as_str(), "Accepted connection");
        let (pods, pod) = (pods.to_owned(), pod.to_owned());
        tokio::spawn(async move {
            if let Err(err) = forward(pods, &pod, port, socket).await {
                warn!(error = err.to_string(), "could not forward connection");
            }
        });
    }
}

async fn forward(pods: Api<Pod>, pod: &str, port: u16, mut socket: TcpStream) -> Result<(), Error> {
    let mut forwarder = pods
        .portforward(pod, &[port])
        .await
        .map_err(|err| Error::PortForward(pod.to_string(), err))?;

    let mut upstream = forwarder
        .take_stream(port)
        .ok_or_else(|| Error::Stream(pod.to_string(), port))?;

    tokio::io::copy_bidirectional(&mut socket, &mut upstream)
        .await
        .map_err(Error::Copy)?;

    drop(upstream);
    forwarder
        .join()
        .await
        .map_err(|err| Error::Join(pod.to_string(), err.to_string()))
}

/// returns a running pod selected by the service and the container port the
/// service port is mapped to
async fn resolve_service(
    client: Client,
    namespace: &str,
    name: &str,
    port: u16,
) -> Result<(String, u16), Error> {
    let services: Api<Service> = Api::namespaced(client.to_owned(), namespace);
    let service = services
        .get(name)
        .await
        .map_err(|err| Error::Get("service", namespace.to_string(), name.to_string(), err))?;

    let labels = service
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.to_owned())
        .filter(|selector| !selector.is_empty())
        .ok_or_else(|| Error::NoSelector(namespace.to_string(), name.to_string()))?;

    let selector = resource::selector(&labels);
    let pod = running_pod(client, namespace, &selector)
        .await?
        .ok_or_else(|| Error::NoPod(namespace.to_string(), name.to_string()))?;

    let target = target_port(&service, &pod, port)
        .ok_or_else(|| Error::NoPort(namespace.to_string(), name.to_string(), port))??;

    Ok((pod.name_any(), target))
}

/// returns the first running pod matching the label selector
pub async fn running_pod(
    client: Client,
    namespace: &str,
    selector: &str,
) -> Result<Option<Pod>, Error> {
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let list = pods
        .list(&ListParams::default().labels(selector))
        .await
        .map_err(|err| Error::List(selector.to_string(), err))?;

    Ok(list.items.into_iter().find(running))
}

pub fn running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some("Running")
}

/// translates a service port to the pod's container port, `None` when the
/// service does not expose the port
fn target_port(service: &Service, pod: &Pod, port: u16) -> Option<Result<u16, Error>> {
    let service_port = service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.port == i32::from(port))?;

    Some(match &service_port.target_port {
        None => Ok(port),
        Some(IntOrString::Int(target)) => port_number(*target),
        Some(IntOrString::String(named)) => pod
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .flat_map(|container| container.ports.iter().flatten())
            .find(|p| p.name.as_deref() == Some(named.as_str()))
            .ok_or_else(|| Error::NamedPort(pod.name_any(), named.to_owned()))
            .and_then(|p| port_number(p.container_port)),
    })
}

fn port_number(port: i32) -> Result<u16, Error> {
    u16::try_from(port)
        .ok()
        .filter(|port| *port != 0)
        .ok_or(Error::OutOfRange(port))
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{
        Container, ContainerPort, PodSpec, PodStatus, ServicePort, ServiceSpec,
    };

    use super::*;

    fn service(target: Option<IntOrString>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: 5432,
                    target_port: target,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(phase: &str) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "postgres".into(),
                    ports: Some(vec![ContainerPort {
                        name: Some("db".into()),
                        container_port: 15432,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn maps_service_port_to_container_port() {
        let p = pod("Running");

        assert_eq!(target_port(&service(None), &p, 5432).unwrap().unwrap(), 5432);
        assert_eq!(
            target_port(&service(Some(IntOrString::Int(6432))), &p, 5432)
                .unwrap()
                .unwrap(),
            6432
        );
        assert_eq!(
            target_port(&service(Some(IntOrString::String("db".into()))), &p, 5432)
                .unwrap()
                .unwrap(),
            15432
        );
    }

    #[test]
    fn rejects_unknown_ports() {
        let p = pod("Running");

        assert!(target_port(&service(None), &p, 3306).is_none());
        assert!(matches!(
            target_port(&service(Some(IntOrString::String("http".into()))), &p, 5432),
            Some(Err(Error::NamedPort(..)))
        ));
    }

    #[test]
    fn rejects_out_of_range_ports() {
        let p = pod("Running");

        assert!(matches!(
            target_port(&service(Some(IntOrString::Int(70000))), &p, 5432),
            Some(Err(Error::OutOfRange(70000)))
        ));
        assert!(matches!(
            target_port(&service(Some(IntOrString::Int(-1))), &p, 5432),
            Some(Err(Error::OutOfRange(-1)))
        ));

        let mut wrapped = pod("Running");
        if let Some(spec) = wrapped.spec.as_mut() {
            spec.containers[0].ports = Some(vec![ContainerPort {
                name: Some("db".into()),
                container_port: 65536 + 5432,
                ..Default::default()
            }]);
        }
        assert!(matches!(
            target_port(&service(Some(IntOrString::String("db".into()))), &wrapped, 5432),
            Some(Err(Error::OutOfRange(70968)))
        ));
    }

    #[test]
    fn detects_running_pods() {
        assert!(running(&pod("Running")));
        assert!(!running(&pod("Pending")));
        assert!(!running(&Pod::default()));
    }
}
