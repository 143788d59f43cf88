//! # Dashboard module
//!
//! This module extracts the metric selectors used by a grafana dashboard and
//! checks them against the samples prometheus holds.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::svc::{k8s::kind::ResourceKind, prometheus::Sample};

// -----------------------------------------------------------------------------
// Constants

pub const DASHBOARDS_REPOSITORY: &str =
    "https://raw.githubusercontent.com/appscode/grafana-dashboards";

// -----------------------------------------------------------------------------
// Selector structure

/// a metric selector found in a panel's target expression
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Selector {
    pub metric: String,
    pub labels: Vec<String>,
    pub panel: String,
}

// -----------------------------------------------------------------------------
// Missing structure

/// what a dashboard needs that prometheus does not have for a metric, no
/// label means the metric has no sample at all
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Missing {
    pub labels: Vec<String>,
    pub panels: Vec<String>,
}

// -----------------------------------------------------------------------------
// parser

/// returns the url of a dashboard in the appscode repository
pub fn url(branch: &str, kind: ResourceKind, dashboard: &str) -> String {
    let dashboard = dashboard.trim_end_matches(".json");

    format!(
        "{}/{}/{}/{}.json",
        DASHBOARDS_REPOSITORY,
        branch,
        kind.singular(),
        dashboard
    )
}

/// returns every selector used by the dashboard's panels, panels nested in
/// rows included
pub fn selectors(dashboard: &Value) -> Vec<Selector> {
    let mut selectors = vec![];
    collect(dashboard, &mut selectors);
    selectors
}

fn collect(container: &Value, selectors: &mut Vec<Selector>) {
    for panel in container["panels"].as_array().into_iter().flatten() {
        let title = panel["title"].as_str().unwrap_or_default();
        let expressions = panel["targets"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|target| target["expr"].as_str())
            .filter(|expr| !expr.is_empty());

        for expression in expressions {
            selectors.extend(parse(expression, title));
        }

        collect(panel, selectors);
    }
}

/// extracts the `metric{labels}` selectors of a promql expression
pub fn parse(expression: &str, panel: &str) -> Vec<Selector> {
    let bytes = expression.as_bytes();
    let mut selectors = vec![];
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }

        let mut start = i;
        while start > 0 && metric_char(bytes[start - 1]) {
            start -= 1;
        }

        let close = closing(bytes, i);
        let metric = &expression[start..i];
        if !metric.is_empty() {
            selectors.push(Selector {
                metric: metric.to_string(),
                labels: label_names(&expression[i + 1..close]),
                panel: panel.to_string(),
            });
        }

        i = close + 1;
    }

    selectors
}

fn metric_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b':'
}

/// returns the position of the brace closing the one at `open`, the end of
/// the expression when it is unbalanced
fn closing(bytes: &[u8], open: usize) -> usize {
    let mut balance = 0;
    for (i, c) in bytes.iter().enumerate().skip(open) {
        match c {
            b'{' => balance += 1,
            b'}' => balance -= 1,
            _ => {}
        }

        if balance == 0 {
            return i;
        }
    }

    bytes.len()
}

/// returns the label names of a selector body, quoted values are ignored
fn label_names(body: &str) -> Vec<String> {
    let mut unquoted = String::with_capacity(body.len());
    let mut quoted = false;
    for c in body.chars() {
        match c {
            '"' => quoted = !quoted,
            _ if !quoted => unquoted.push(c),
            _ => {}
        }
    }

    unquoted
        .split(',')
        .map(|part| {
            part.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|name| !name.is_empty())
        .collect()
}

// -----------------------------------------------------------------------------
// checks

/// records what the samples returned for a selector's metric lack
pub fn check(
    missing: &mut BTreeMap<String, Missing>,
    selector: &Selector,
    samples: &[Sample],
) {
    let absent: Vec<&String> = if samples.is_empty() {
        vec![]
    } else {
        selector
            .labels
            .iter()
            .filter(|label| !samples.iter().any(|s| s.metric.contains_key(label.as_str())))
            .collect()
    };

    if !samples.is_empty() && absent.is_empty() {
        return;
    }

    let entry = missing.entry(selector.metric.to_owned()).or_default();
    for label in absent {
        push_unique(&mut entry.labels, label);
    }

    push_unique(&mut entry.panels, &selector.panel);
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

/// drops the metrics of elasticsearch node roles the database's topology does
/// not define
pub fn ignore_unused_roles(
    kind: ResourceKind,
    database: &Value,
    missing: BTreeMap<String, Missing>,
) -> BTreeMap<String, Missing> {
    if kind != ResourceKind::Elasticsearch {
        return missing;
    }

    let topology = database["spec"]["topology"].as_object();
    missing
        .into_iter()
        .filter(|(metric, _)| match node_role(metric) {
            None => true,
            Some(role) => topology
                .and_then(|topology| {
                    topology
                        .iter()
                        .find(|(key, _)| key.to_lowercase() == role)
                        .map(|(_, value)| value.as_object().map(|v| !v.is_empty()).unwrap_or(false))
                })
                .unwrap_or(false),
        })
        .collect()
}

/// returns the node role of per-role elasticsearch metrics, e.g. `datahot`
/// for `kubedb_com_elasticsearch_datahot_node_replicas`
fn node_role(metric: &str) -> Option<&str> {
    let rest = metric.strip_prefix("kubedb_com_elasticsearch_")?;
    ["_node_replicas", "_node_storage_class_info", "_node_max_unavailable"]
        .iter()
        .find_map(|suffix| rest.strip_suffix(suffix))
}
