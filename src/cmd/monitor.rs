//! # Monitor module
//!
//! This module provides the `monitor` commands which check the monitoring of a
//! kubedb database through a tunnel to the prometheus service

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use clap::Subcommand;
use prettytable::{format::consts::FORMAT_CLEAN, Row, Table};
use serde_json::Value;
use tracing::info;

use crate::{
    cmd::{Context, Database, Executor},
    svc::{
        cfg,
        http::{self, RestClient},
        k8s::{
            client, resource,
            tunnel::{self, Target, Tunnel},
            State,
        },
        prometheus::{self, dashboard, Sample},
    },
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to retrieve database, {0}")]
    Resource(resource::Error),
    #[error("failed to open tunnel to prometheus, {0}")]
    Tunnel(tunnel::Error),
    #[error("{0}")]
    Prometheus(prometheus::Error),
    #[error("failed to download dashboard, {0}")]
    Download(http::Error),
    #[error("failed to read dashboard '{0:?}', {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse dashboard, {0}")]
    Parse(serde_json::Error),
    #[error("a dashboard name, a --file or an --url is required")]
    MissingDashboard,
    #[error("prometheus does not scrape any target for {0} '{1}/{2}'")]
    NotScraped(String, String, String),
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Self::Prometheus(err)
    }
}

// -----------------------------------------------------------------------------
// PrometheusService structure

/// the prometheus service to reach, default to the configured one
#[derive(clap::Args, Clone, Debug, Default)]
pub struct PrometheusService {
    /// Name of the prometheus service
    #[clap(long = "prom-svc-name")]
    pub name: Option<String>,
    /// Namespace of the prometheus service
    #[clap(long = "prom-svc-namespace")]
    pub namespace: Option<String>,
    /// Port of the prometheus service
    #[clap(long = "prom-svc-port")]
    pub port: Option<u16>,
}

impl PrometheusService {
    pub fn resolve(&self, config: &cfg::Prometheus) -> (String, String, u16) {
        (
            self.name.to_owned().unwrap_or_else(|| config.name.to_owned()),
            self.namespace
                .to_owned()
                .unwrap_or_else(|| config.namespace.to_owned()),
            self.port.unwrap_or(config.port),
        )
    }

    /// opens a tunnel to the service and returns a client using it, the
    /// client is usable as long as the tunnel lives
    pub async fn connect(&self, state: &State) -> Result<(Tunnel, prometheus::Client), Error> {
        let (name, namespace, port) = self.resolve(&state.config.prometheus);
        let tunnel = Tunnel::open(state.kube.to_owned(), &namespace, Target::Service(name), port)
            .await
            .map_err(Error::Tunnel)?;

        let client = prometheus::Client::new(format!("http://{}", tunnel.address()));
        Ok((tunnel, client))
    }
}

// -----------------------------------------------------------------------------
// Monitor enumeration

#[derive(Subcommand, Clone, Debug)]
pub enum Monitor {
    /// Show the alerts fired for a database during the last hour
    #[clap(name = "get-alerts")]
    GetAlerts {
        #[clap(flatten)]
        database: Database,
        #[clap(flatten)]
        prometheus: PrometheusService,
    },
    /// Check that prometheus has every metric a grafana dashboard needs
    #[clap(name = "dashboard")]
    Dashboard {
        #[clap(flatten)]
        database: Database,
        /// Name of the dashboard in the grafana dashboards repository
        #[clap(name = "dashboard")]
        dashboard: Option<String>,
        /// Read the dashboard from a local file
        #[clap(long = "file", conflicts_with = "url")]
        file: Option<PathBuf>,
        /// Download the dashboard from an url
        #[clap(long = "url")]
        url: Option<String>,
        /// Branch of the grafana dashboards repository
        #[clap(long = "branch")]
        branch: Option<String>,
        #[clap(flatten)]
        prometheus: PrometheusService,
    },
    /// Check that prometheus scrapes the metrics of a database
    #[clap(name = "check-connection")]
    CheckConnection {
        #[clap(flatten)]
        database: Database,
        #[clap(flatten)]
        prometheus: PrometheusService,
    },
}

#[async_trait]
impl Executor for Monitor {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, ctx: Arc<Context>) -> Result<(), Self::Error> {
        let state = ctx.state().await.map_err(Error::Client)?;

        match self {
            Self::GetAlerts {
                database,
                prometheus,
            } => alerts(&state, database, prometheus).await,
            Self::Dashboard {
                database,
                dashboard,
                file,
                url,
                branch,
                prometheus,
            } => {
                let source = match (file, url, dashboard) {
                    (Some(file), _, _) => Source::File(file.to_owned()),
                    (_, Some(url), _) => Source::Url(url.to_owned()),
                    (_, _, Some(dashboard)) => Source::Url(dashboard::url(
                        branch
                            .as_deref()
                            .unwrap_or(&state.config.prometheus.dashboard_branch),
                        database.kind,
                        dashboard,
                    )),
                    _ => return Err(Error::MissingDashboard),
                };

                check_dashboard(&state, database, source, prometheus).await
            }
            Self::CheckConnection {
                database,
                prometheus,
            } => check_connection(&state, database, prometheus).await,
        }
    }
}

// -----------------------------------------------------------------------------
// alerts

#[tracing::instrument(skip_all, fields(name = %database.name))]
pub async fn alerts(
    state: &State,
    database: &Database,
    service: &PrometheusService,
) -> Result<(), Error> {
    let info = database.get(state).await.map_err(Error::Resource)?;
    let (_tunnel, client) = service.connect(state).await?;

    let query = prometheus::alerts_query(info.kind.plural(), &info.name(), &info.namespace());
    let (start, end) = prometheus::alerts_window(Utc::now());
    let series = client
        .query_range(&query, start, end, prometheus::ALERTS_STEP)
        .await?;

    println!(
        "Found {} firing alerts for {} {}/{}",
        series.len(),
        info.kind,
        info.namespace(),
        info.name()
    );

    if series.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(Row::from(["ALERT", "VALUE", "LABELS"]));
    for alert in series {
        let mut labels = alert.metric;
        let name = labels.remove("alertname").unwrap_or_default();
        let value = alert
            .values
            .last()
            .map(|(_, value)| value.to_owned())
            .unwrap_or_default();

        table.add_row(Row::from([name, value, prometheus::render_labels(&labels)]));
    }

    print!("{}", table);
    Ok(())
}

// -----------------------------------------------------------------------------
// check connection

#[tracing::instrument(skip_all, fields(name = %database.name))]
pub async fn check_connection(
    state: &State,
    database: &Database,
    service: &PrometheusService,
) -> Result<(), Error> {
    let info = database.get(state).await.map_err(Error::Resource)?;
    let (_tunnel, client) = service.connect(state).await?;

    let query = prometheus::up_query(&info.namespace(), &info.name());
    let samples = client.query(&query, Utc::now()).await?;
    if samples.is_empty() {
        return Err(Error::NotScraped(
            info.kind.to_string(),
            info.namespace(),
            info.name(),
        ));
    }

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(Row::from(["TARGET", "POD", "STATE"]));
    for sample in &samples {
        table.add_row(Row::from(target_state(sample)));
    }

    print!("{}", table);
    Ok(())
}

/// returns the instance, the pod and the state of an `up` sample
pub fn target_state(sample: &Sample) -> [String; 3] {
    let label = |key: &str| sample.metric.get(key).cloned().unwrap_or_default();
    let state = if sample.value.1 == "1" { "UP" } else { "DOWN" };

    [label("instance"), label("pod"), state.to_string()]
}

// -----------------------------------------------------------------------------
// dashboard

/// where to load a dashboard from
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Source {
    File(PathBuf),
    Url(String),
}

impl Source {
    pub async fn load(&self) -> Result<Value, Error> {
        match self {
            Self::File(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|err| Error::Read(path.to_owned(), err))?;

                serde_json::from_str(&content).map_err(Error::Parse)
            }
            Self::Url(url) => {
                info!(url = url.as_str(), "Downloading dashboard");
                http::Client::default().get(url).await.map_err(Error::Download)
            }
        }
    }
}

#[tracing::instrument(skip_all, fields(name = %database.name))]
pub async fn check_dashboard(
    state: &State,
    database: &Database,
    source: Source,
    service: &PrometheusService,
) -> Result<(), Error> {
    let info = database.get(state).await.map_err(Error::Resource)?;
    let dashboard = source.load().await?;
    let (_tunnel, client) = service.connect(state).await?;

    let now = Utc::now();
    let mut samples: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
    let mut missing = BTreeMap::new();
    for selector in dashboard::selectors(&dashboard) {
        if !samples.contains_key(&selector.metric) {
            let result = client.query(&selector.metric, now).await?;
            samples.insert(selector.metric.to_owned(), result);
        }

        let found = samples.get(&selector.metric).map(Vec::as_slice).unwrap_or_default();
        dashboard::check(&mut missing, &selector, found);
    }

    let missing = dashboard::ignore_unused_roles(info.kind, &info.object.data, missing);
    print!("{}", report(&missing));
    Ok(())
}

/// renders what the dashboard misses
pub fn report(missing: &BTreeMap<String, dashboard::Missing>) -> String {
    if missing.is_empty() {
        return "All metrics found\n".to_string();
    }

    let mut output = String::new();
    for (metric, entry) in missing {
        if entry.labels.is_empty() {
            output.push_str(&format!("Metric \"{}\" not found\n", metric));
        } else {
            output.push_str(&format!(
                "Labels {} of metric \"{}\" not found\n",
                entry.labels.join(", "),
                metric
            ));
        }

        output.push_str(&format!("  used in panels: {}\n", entry.panels.join(", ")));
    }

    output
}
